use crate::{
    STORE_VERSION,
    store::{KvBackend, StoreError, Transaction, WriteOp, decode_row, encode_row},
};

/// Bookkeeping table: schema version and per-tree event sequences. Excluded
/// from undo row images.
pub const META_TABLE: &str = "meta";

const VERSION_KEY: &[u8] = b"store_version";

/// Gate a backend on the supported schema version. A fresh store is stamped;
/// a newer stamp fails `UnsupportedVersion` (no forward migration — a bump
/// re-creates the store).
pub fn ensure_store_version(backend: &dyn KvBackend) -> Result<(), StoreError> {
    match backend.get(META_TABLE, VERSION_KEY) {
        Some(bytes) => {
            let found: u32 = decode_row(&bytes)?;
            if found > STORE_VERSION {
                return Err(StoreError::UnsupportedVersion {
                    found,
                    supported: STORE_VERSION,
                });
            }

            Ok(())
        }
        None => {
            let op = WriteOp {
                table: META_TABLE.to_string(),
                key: VERSION_KEY.to_vec(),
                value: Some(encode_row(&STORE_VERSION)?),
            };
            backend.apply(&[], &[op])
        }
    }
}

/// Read a u64 meta counter; absent counters read 0.
pub fn read_meta_u64(txn: &Transaction<'_>, key: &[u8]) -> Result<u64, StoreError> {
    match txn.get(META_TABLE, key) {
        Some(bytes) => decode_row(&bytes),
        None => Ok(0),
    }
}

/// Stage a u64 meta counter write inside the caller's transaction.
pub fn write_meta_u64(txn: &mut Transaction<'_>, key: &[u8], value: u64) -> Result<(), StoreError> {
    let bytes = encode_row(&value)?;
    txn.put(META_TABLE, key, bytes);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn fresh_store_is_stamped_with_current_version() {
        let store = MemoryStore::new();
        ensure_store_version(&store).unwrap();
        ensure_store_version(&store).unwrap();

        let bytes = store.get(META_TABLE, VERSION_KEY).unwrap();
        assert_eq!(decode_row::<u32>(&bytes).unwrap(), STORE_VERSION);
    }

    #[test]
    fn newer_store_version_is_rejected() {
        let store = MemoryStore::new();
        store
            .apply(
                &[],
                &[WriteOp {
                    table: META_TABLE.to_string(),
                    key: VERSION_KEY.to_vec(),
                    value: Some(encode_row(&(STORE_VERSION + 1)).unwrap()),
                }],
            )
            .unwrap();

        let err = ensure_store_version(&store).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedVersion { .. }));
    }

    #[test]
    fn meta_counters_default_to_zero() {
        let store = MemoryStore::new();
        let mut txn = Transaction::new(&store);

        assert_eq!(read_meta_u64(&txn, b"seq:x").unwrap(), 0);

        write_meta_u64(&mut txn, b"seq:x", 9).unwrap();
        assert_eq!(read_meta_u64(&txn, b"seq:x").unwrap(), 9);
    }
}
