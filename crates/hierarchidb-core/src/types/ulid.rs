use derive_more::{Deref, DerefMut, Display, FromStr};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error as ThisError;
use ulid::Ulid as WrappedUlid;

///
/// UlidError
///

#[derive(Debug, ThisError)]
pub enum UlidError {
    #[error("invalid ulid string")]
    InvalidString,

    #[error("monotonic error - overflow")]
    GeneratorOverflow,
}

///
/// UlidDecodeError
///

#[derive(Debug, ThisError)]
pub enum UlidDecodeError {
    #[error("invalid ulid length: {len} bytes")]
    InvalidSize { len: usize },
}

///
/// Ulid
///
/// 16-byte lexicographically sortable identifier; the timestamp half makes
/// every id time-orderable, which the undo log and event ordering rely on.
///

#[derive(
    Clone, Copy, Debug, Deref, DerefMut, Display, Eq, FromStr, Hash, Ord, PartialEq, PartialOrd,
)]
#[repr(transparent)]
pub struct Ulid(WrappedUlid);

impl Ulid {
    pub const STORED_SIZE: usize = 16;

    pub const MIN: Self = Self::from_bytes([0x00; 16]);
    pub const MAX: Self = Self::from_bytes([0xFF; 16]);

    #[must_use]
    pub const fn nil() -> Self {
        Self(WrappedUlid::nil())
    }

    #[must_use]
    pub const fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    #[must_use]
    pub const fn from_parts(timestamp_ms: u64, random: u128) -> Self {
        Self(WrappedUlid::from_parts(timestamp_ms, random))
    }

    /// Monotonic increment; returns `None` on overflow.
    #[must_use]
    pub fn increment(&self) -> Option<Self> {
        self.0.increment().map(Self)
    }

    /// Millisecond timestamp component.
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(WrappedUlid::from_bytes(bytes))
    }

    #[must_use]
    pub const fn to_bytes(self) -> [u8; 16] {
        self.0.to_bytes()
    }

    pub const fn try_from_bytes(bytes: &[u8]) -> Result<Self, UlidDecodeError> {
        if bytes.len() != Self::STORED_SIZE {
            return Err(UlidDecodeError::InvalidSize { len: bytes.len() });
        }

        let mut array = [0u8; 16];
        let mut i = 0;
        while i < 16 {
            array[i] = bytes[i];
            i += 1;
        }

        Ok(Self::from_bytes(array))
    }

    /// Parse the canonical 26-character form.
    pub fn try_parse(encoded: &str) -> Result<Self, UlidError> {
        WrappedUlid::from_string(encoded)
            .map(Self)
            .map_err(|_| UlidError::InvalidString)
    }
}

impl From<WrappedUlid> for Ulid {
    fn from(ulid: WrappedUlid) -> Self {
        Self(ulid)
    }
}

// Serialized as the canonical string form so ids survive a structured-clone
// boundary unchanged.
impl Serialize for Ulid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Ulid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;

        Self::try_parse(&encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_round_trip_preserves_order() {
        let a = Ulid::from_parts(1, 42);
        let b = Ulid::from_parts(2, 0);

        assert!(a < b);
        assert!(a.to_bytes() < b.to_bytes());
        assert_eq!(Ulid::try_from_bytes(&a.to_bytes()).unwrap(), a);
    }

    #[test]
    fn short_byte_slices_are_rejected() {
        let err = Ulid::try_from_bytes(&[1, 2, 3]).unwrap_err();

        assert!(matches!(err, UlidDecodeError::InvalidSize { len: 3 }));
    }
}
