use crate::store::{KvBackend, StoreError, TableGuard, WriteOp};
use std::{
    cell::RefCell,
    collections::BTreeMap,
    ops::Bound::{Excluded, Included, Unbounded},
};
use xxhash_rust::xxh3::Xxh3;

const FINGERPRINT_VERSION: u8 = 1;

///
/// StoredRow
///
/// Raw value plus non-authoritative diagnostic fingerprint, debug-verified
/// on read.
///

#[derive(Clone, Debug)]
struct StoredRow {
    bytes: Vec<u8>,
    fingerprint: u128,
}

impl StoredRow {
    fn new(key: &[u8], bytes: Vec<u8>) -> Self {
        let fingerprint = row_fingerprint(key, &bytes);

        Self { bytes, fingerprint }
    }

    #[cfg(debug_assertions)]
    fn verify_if_debug(&self, key: &[u8]) {
        debug_assert!(
            self.fingerprint == row_fingerprint(key, &self.bytes),
            "debug invariant violation: row fingerprint mismatch"
        );
    }
}

fn row_fingerprint(key: &[u8], bytes: &[u8]) -> u128 {
    let mut hasher = Xxh3::new();
    hasher.update(&[FINGERPRINT_VERSION]);
    hasher.update(key);
    hasher.update(bytes);

    hasher.digest128()
}

///
/// Table
///

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<Vec<u8>, StoredRow>,
    generation: u64,
}

///
/// MemoryStore
///
/// In-process ordered table store: the embedded equivalent of the browser's
/// indexed store for hosts that own persistence themselves. Single-threaded;
/// interior mutability keeps the backend shareable by reference.
///

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RefCell<BTreeMap<String, Table>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every table. Test support and version re-initialisation only.
    pub fn clear(&self) {
        self.tables.borrow_mut().clear();
    }
}

impl KvBackend for MemoryStore {
    fn get(&self, table: &str, key: &[u8]) -> Option<Vec<u8>> {
        let tables = self.tables.borrow();
        let row = tables.get(table)?.rows.get(key)?;

        #[cfg(debug_assertions)]
        row.verify_if_debug(key);

        Some(row.bytes.clone())
    }

    fn range(&self, table: &str, lo: &[u8], hi: Option<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let tables = self.tables.borrow();
        let Some(state) = tables.get(table) else {
            return Vec::new();
        };

        let upper = hi.map_or(Unbounded, |hi| Excluded(hi.to_vec()));
        state
            .rows
            .range((Included(lo.to_vec()), upper))
            .map(|(key, row)| (key.clone(), row.bytes.clone()))
            .collect()
    }

    fn generation(&self, table: &str) -> u64 {
        self.tables
            .borrow()
            .get(table)
            .map_or(0, |state| state.generation)
    }

    fn apply(&self, guards: &[TableGuard], ops: &[WriteOp]) -> Result<(), StoreError> {
        let mut tables = self.tables.borrow_mut();

        for guard in guards {
            let current = tables.get(&guard.table).map_or(0, |state| state.generation);
            if current != guard.generation {
                return Err(StoreError::Conflict {
                    table: guard.table.clone(),
                });
            }
        }

        // Guards verified; the whole batch lands.
        let mut touched = std::collections::BTreeSet::new();
        for op in ops {
            let state = tables.entry(op.table.clone()).or_default();
            match &op.value {
                Some(bytes) => {
                    state
                        .rows
                        .insert(op.key.clone(), StoredRow::new(&op.key, bytes.clone()));
                }
                None => {
                    state.rows.remove(&op.key);
                }
            }
            touched.insert(op.table.as_str());
        }

        let touched: Vec<String> = touched.into_iter().map(str::to_string).collect();
        for table in touched {
            if let Some(state) = tables.get_mut(&table) {
                state.generation = state.generation.saturating_add(1);
            }
        }

        Ok(())
    }

    fn table_names(&self) -> Vec<String> {
        self.tables
            .borrow()
            .iter()
            .filter(|(_, state)| !state.rows.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn row_count(&self, table: &str) -> u64 {
        self.tables
            .borrow()
            .get(table)
            .map_or(0, |state| state.rows.len() as u64)
    }

    fn byte_size(&self, table: &str) -> u64 {
        self.tables.borrow().get(table).map_or(0, |state| {
            state
                .rows
                .iter()
                .map(|(key, row)| (key.len() + row.bytes.len() + 16) as u64)
                .sum()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(table: &str, key: &[u8], value: &[u8]) -> WriteOp {
        WriteOp {
            table: table.to_string(),
            key: key.to_vec(),
            value: Some(value.to_vec()),
        }
    }

    #[test]
    fn apply_is_atomic_and_bumps_generation_once() {
        let store = MemoryStore::new();
        store
            .apply(
                &[],
                &[put("t", b"a", b"1"), put("t", b"b", b"2"), put("u", b"c", b"3")],
            )
            .unwrap();

        assert_eq!(store.get("t", b"a"), Some(b"1".to_vec()));
        assert_eq!(store.get("u", b"c"), Some(b"3".to_vec()));
        // generations bump once per batch per table, not per op
        assert_eq!(store.generation("t"), 1);
        assert_eq!(store.generation("u"), 1);

        store
            .apply(
                &[TableGuard {
                    table: "t".to_string(),
                    generation: 1,
                }],
                &[put("t", b"a", b"9")],
            )
            .unwrap();
        assert_eq!(store.generation("t"), 2);
    }

    #[test]
    fn stale_guard_fails_conflict_and_applies_nothing() {
        let store = MemoryStore::new();
        store.apply(&[], &[put("t", b"a", b"1")]).unwrap();

        let err = store
            .apply(
                &[TableGuard {
                    table: "t".to_string(),
                    generation: 7,
                }],
                &[put("t", b"a", b"2")],
            )
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.get("t", b"a"), Some(b"1".to_vec()));
    }

    #[test]
    fn range_is_half_open_and_ordered() {
        let store = MemoryStore::new();
        store
            .apply(
                &[],
                &[put("t", b"a", b"1"), put("t", b"b", b"2"), put("t", b"c", b"3")],
            )
            .unwrap();

        let rows = store.range("t", b"a", Some(b"c"));
        let keys: Vec<_> = rows.iter().map(|(k, _)| k.clone()).collect();

        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }
}
