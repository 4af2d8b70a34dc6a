mod de;
mod merge;
mod ser;

pub use merge::merge_patch;

use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, fmt};
use thiserror::Error as ThisError;

///
/// ValueError
///

#[derive(Debug, ThisError)]
pub enum ValueError {
    #[error("value is not a map")]
    NotAMap,

    #[error("failed to encode value: {0}")]
    Encode(String),

    #[error("failed to decode value: {0}")]
    Decode(String),
}

///
/// Value
///
/// Structured-clone-compatible payload value: the currency of entity
/// payloads, command payload fields, and patches. No function references,
/// no prototypes; maps are key-ordered so encodings are canonical.
///

#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    #[must_use]
    pub fn map() -> Self {
        Self::Map(BTreeMap::new())
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Map field lookup; `None` for non-maps and absent keys.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Insert into a map value; fails on non-maps.
    pub fn set(&mut self, key: impl Into<String>, value: Self) -> Result<(), ValueError> {
        self.as_map_mut()
            .ok_or(ValueError::NotAMap)?
            .insert(key.into(), value);

        Ok(())
    }

    /// Canonical CBOR bytes: map keys are ordered, so equal values encode to
    /// equal bytes. These bytes feed [`Value::content_hash`].
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, ValueError> {
        serde_cbor::to_vec(self).map_err(|err| ValueError::Encode(err.to_string()))
    }

    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, ValueError> {
        serde_cbor::from_slice(bytes).map_err(|err| ValueError::Decode(err.to_string()))
    }

    /// Lowercase-hex SHA-256 of the canonical encoding. Relational entities
    /// are addressed by this hash.
    pub fn content_hash(&self) -> Result<ContentHash, ValueError> {
        let bytes = self.canonical_bytes()?;
        let digest = Sha256::digest(&bytes);

        Ok(ContentHash(hex_encode(&digest)))
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

///
/// ContentHash
///
/// Surrogate address of a relational entity.
///

#[derive(
    Clone,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    serde::Deserialize,
    serde::Serialize,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_maps_hash_identically_regardless_of_insert_order() {
        let mut a = Value::map();
        a.set("x", Value::Int(1)).unwrap();
        a.set("y", Value::from("two")).unwrap();

        let mut b = Value::map();
        b.set("y", Value::from("two")).unwrap();
        b.set("x", Value::Int(1)).unwrap();

        assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());
    }

    #[test]
    fn distinct_values_hash_differently() {
        let a = Value::Int(1);
        let b = Value::Int(2);

        assert_ne!(a.content_hash().unwrap(), b.content_hash().unwrap());
    }

    #[test]
    fn canonical_bytes_round_trip() {
        let mut value = Value::map();
        value.set("name", Value::from("A")).unwrap();
        value.set("flags", Value::List(vec![Value::Bool(true)])).unwrap();
        value.set("blob", Value::Bytes(vec![1, 2, 3])).unwrap();

        let bytes = value.canonical_bytes().unwrap();
        assert_eq!(Value::from_canonical_bytes(&bytes).unwrap(), value);
    }
}
