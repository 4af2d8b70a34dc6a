// 1️⃣ Module declarations
mod codec;
mod memory;
mod meta;
mod txn;

// 2️⃣ Public re-exports
pub use codec::{decode_row, encode_row};
pub use memory::MemoryStore;
pub use meta::{META_TABLE, ensure_store_version, read_meta_u64, write_meta_u64};
pub use txn::{RowImage, Transaction, WriteCtx};

use crate::error::{CoreError, ErrorCode, ErrorOrigin};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

///
/// StoreError
///

#[derive(Clone, Debug, ThisError)]
pub enum StoreError {
    #[error("write/write race on table '{table}'")]
    Conflict { table: String },

    #[error("transaction aborted by caller")]
    Aborted,

    #[error("store corruption: {message}")]
    Corrupt { message: String },

    #[error("store version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("store invariant violation: {message}")]
    InvariantViolation { message: String },
}

impl StoreError {
    pub(crate) const fn code(&self) -> ErrorCode {
        match self {
            Self::Conflict { .. } => ErrorCode::StoreConflict,
            Self::Aborted => ErrorCode::Aborted,
            Self::UnsupportedVersion { .. } => ErrorCode::UnsupportedStoreVersion,
            Self::Corrupt { .. } | Self::InvariantViolation { .. } => ErrorCode::Internal,
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        Self::new(err.code(), ErrorOrigin::Store, err.to_string())
    }
}

///
/// WriteOp
///
/// Raw table mutation: store identity plus raw key/value bytes. `None`
/// deletes the row. The atomic apply unit of every commit.
///

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WriteOp {
    pub table: String,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

///
/// TableGuard
///
/// Generation stamp taken at a transaction's first write to a table;
/// verified at apply so a racing committed write surfaces as `Conflict`.
///

#[derive(Clone, Debug)]
pub struct TableGuard {
    pub table: String,
    pub generation: u64,
}

///
/// CommitReceipt
///

#[derive(Clone, Copy, Debug)]
pub struct CommitReceipt {
    pub ops_applied: usize,
    pub tables_touched: usize,
}

///
/// KvBackend
///
/// Ordered, indexed, transactional table storage. Tables are named; keys and
/// values are raw bytes. Reads outside a transaction see the latest committed
/// state. Durability on apply acknowledgement, no fsync semantics.
///

pub trait KvBackend {
    /// Latest committed value for a key.
    fn get(&self, table: &str, key: &[u8]) -> Option<Vec<u8>>;

    /// Committed rows with `lo <= key < hi` (`hi = None` scans to the end),
    /// in key order.
    fn range(&self, table: &str, lo: &[u8], hi: Option<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)>;

    /// Commit generation of a table; bumped once per applied batch that
    /// touches it. Unknown tables report 0.
    fn generation(&self, table: &str) -> u64;

    /// Apply a batch atomically: either every op lands or none does.
    /// Guards are checked first; a stale guard fails `Conflict`.
    fn apply(&self, guards: &[TableGuard], ops: &[WriteOp]) -> Result<(), StoreError>;

    /// Names of all tables that currently hold rows.
    fn table_names(&self) -> Vec<String>;

    /// Row count of a table (diagnostics).
    fn row_count(&self, table: &str) -> u64;

    /// Approximate byte footprint of a table (diagnostics).
    fn byte_size(&self, table: &str) -> u64;
}

/// Smallest byte key strictly greater than every key with this prefix, if
/// one exists (all-0xFF prefixes have none).
#[must_use]
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return Some(end);
        }
        end.pop();
    }

    None
}
