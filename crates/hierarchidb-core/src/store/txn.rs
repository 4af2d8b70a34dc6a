use crate::{
    error::{CoreError, ErrorOrigin},
    store::{CommitReceipt, KvBackend, StoreError, TableGuard, WriteOp, prefix_end},
    types::{IdGenerator, Timestamp, Ulid},
};
use serde::{Deserialize, Serialize};
use std::{cell::RefCell, collections::BTreeMap};

///
/// RowImage
///
/// Before/after image of one row touched by a transaction. The undo log
/// persists these verbatim; replaying `before` images in reverse restores
/// the pre-transaction state exactly.
///

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RowImage {
    pub table: String,
    pub key: Vec<u8>,
    pub before: Option<Vec<u8>>,
    pub after: Option<Vec<u8>>,
}

#[derive(Clone, Debug)]
struct Staged {
    before: Option<Vec<u8>>,
    after: Option<Vec<u8>>,
}

///
/// Transaction
///
/// Staged multi-table write set over a backend. Reads observe the
/// transaction's own writes; nothing reaches the backend until `commit`,
/// which applies the whole set atomically under generation guards.
///

pub struct Transaction<'a> {
    backend: &'a dyn KvBackend,
    staged: BTreeMap<(String, Vec<u8>), Staged>,
    guards: BTreeMap<String, u64>,
}

impl<'a> Transaction<'a> {
    #[must_use]
    pub fn new(backend: &'a dyn KvBackend) -> Self {
        Self {
            backend,
            staged: BTreeMap::new(),
            guards: BTreeMap::new(),
        }
    }

    // ------------------------------------------------------------------
    // Reads (read-your-writes)
    // ------------------------------------------------------------------

    #[must_use]
    pub fn get(&self, table: &str, key: &[u8]) -> Option<Vec<u8>> {
        let staged_key = (table.to_string(), key.to_vec());
        if let Some(staged) = self.staged.get(&staged_key) {
            return staged.after.clone();
        }

        self.backend.get(table, key)
    }

    #[must_use]
    pub fn exists(&self, table: &str, key: &[u8]) -> bool {
        self.get(table, key).is_some()
    }

    /// Ordered rows with `lo <= key < hi`, the staged overlay merged in.
    #[must_use]
    pub fn range(&self, table: &str, lo: &[u8], hi: Option<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .backend
            .range(table, lo, hi)
            .into_iter()
            .collect();

        for ((staged_table, key), staged) in &self.staged {
            if staged_table != table || key.as_slice() < lo {
                continue;
            }
            if let Some(hi) = hi
                && key.as_slice() >= hi
            {
                continue;
            }
            match &staged.after {
                Some(bytes) => {
                    merged.insert(key.clone(), bytes.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        merged.into_iter().collect()
    }

    #[must_use]
    pub fn scan_prefix(&self, table: &str, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let hi = prefix_end(prefix);
        self.range(table, prefix, hi.as_deref())
    }

    #[must_use]
    pub fn count_prefix(&self, table: &str, prefix: &[u8]) -> u64 {
        self.scan_prefix(table, prefix).len() as u64
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    pub fn put(&mut self, table: &str, key: &[u8], value: Vec<u8>) {
        self.stage(table, key, Some(value));
    }

    pub fn delete(&mut self, table: &str, key: &[u8]) {
        self.stage(table, key, None);
    }

    fn stage(&mut self, table: &str, key: &[u8], value: Option<Vec<u8>>) {
        if !self.guards.contains_key(table) {
            self.guards
                .insert(table.to_string(), self.backend.generation(table));
        }

        let staged_key = (table.to_string(), key.to_vec());
        match self.staged.get_mut(&staged_key) {
            Some(staged) => staged.after = value,
            None => {
                let before = self.backend.get(table, key);
                self.staged.insert(staged_key, Staged { before, after: value });
            }
        }
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    /// Before/after images of every effective write, for tables accepted by
    /// the filter. Bookkeeping tables are excluded by their callers so undo
    /// replay cannot revert sequence counters or the log itself.
    #[must_use]
    pub fn row_images(&self, mut include_table: impl FnMut(&str) -> bool) -> Vec<RowImage> {
        self.staged
            .iter()
            .filter(|((table, _), staged)| {
                staged.before != staged.after && include_table(table)
            })
            .map(|((table, key), staged)| RowImage {
                table: table.clone(),
                key: key.clone(),
                before: staged.before.clone(),
                after: staged.after.clone(),
            })
            .collect()
    }

    /// Apply the staged set atomically. No-op writes are dropped first.
    pub fn commit(self) -> Result<CommitReceipt, StoreError> {
        let guards: Vec<TableGuard> = self
            .guards
            .iter()
            .map(|(table, generation)| TableGuard {
                table: table.clone(),
                generation: *generation,
            })
            .collect();

        let ops: Vec<WriteOp> = self
            .staged
            .into_iter()
            .filter(|(_, staged)| staged.before != staged.after)
            .map(|((table, key), staged)| WriteOp {
                table,
                key,
                value: staged.after,
            })
            .collect();

        let receipt = CommitReceipt {
            ops_applied: ops.len(),
            tables_touched: guards.len(),
        };

        self.backend.apply(&guards, &ops)?;

        Ok(receipt)
    }

    /// Discard the staged set.
    pub fn rollback(self) {
        drop(self);
    }
}

///
/// WriteCtx
///
/// One mutation's execution environment: the open transaction, the stamp
/// every write in it shares, and the id generator.
///

pub struct WriteCtx<'a> {
    pub txn: Transaction<'a>,
    pub now: Timestamp,
    ids: &'a RefCell<IdGenerator>,
}

impl<'a> WriteCtx<'a> {
    #[must_use]
    pub fn new(backend: &'a dyn KvBackend, now: Timestamp, ids: &'a RefCell<IdGenerator>) -> Self {
        Self {
            txn: Transaction::new(backend),
            now,
            ids,
        }
    }

    /// Next time-ordered id, monotonic even within one millisecond.
    pub fn next_id(&self) -> Result<Ulid, CoreError> {
        self.ids
            .borrow_mut()
            .generate(self.now.as_millis())
            .map_err(|err| CoreError::internal(ErrorOrigin::Store, err.to_string()))
    }
}
