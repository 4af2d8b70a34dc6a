use crate::store::StoreError;
use serde::{Serialize, de::DeserializeOwned};

/// Encode a row for storage. CBOR keeps rows compact and self-describing.
pub fn encode_row<T: Serialize>(row: &T) -> Result<Vec<u8>, StoreError> {
    serde_cbor::to_vec(row).map_err(|err| StoreError::Corrupt {
        message: format!("row encode failed: {err}"),
    })
}

/// Decode a stored row. Failures are corruption: rows are written only by
/// this crate's codec.
pub fn decode_row<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    serde_cbor::from_slice(bytes).map_err(|err| StoreError::Corrupt {
        message: format!("row decode failed: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct Sample {
        name: String,
        version: u64,
    }

    #[test]
    fn rows_round_trip() {
        let row = Sample {
            name: "A".to_string(),
            version: 3,
        };
        let bytes = encode_row(&row).unwrap();

        assert_eq!(decode_row::<Sample>(&bytes).unwrap(), row);
    }

    #[test]
    fn garbage_decodes_as_corruption() {
        let err = decode_row::<Sample>(&[0xFF, 0x00, 0x13]).unwrap_err();

        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
