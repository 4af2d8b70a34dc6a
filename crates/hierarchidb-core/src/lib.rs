//! Core runtime for HierarchiDB: the tree store, working-copy protocol,
//! command pipeline, subscription engine, and the ergonomics exported via
//! the `prelude`.
#![warn(unreachable_pub)]

// public exports are one module level down
pub mod api;
pub mod command;
pub mod entity;
pub mod error;
pub mod model;
pub mod mutation;
pub mod obs;
pub mod query;
pub mod registry;
pub mod schema;
pub mod store;
pub mod subscription;
pub mod types;
pub mod value;
pub mod working_copy;

// test
#[cfg(test)]
pub(crate) mod test_support;
#[cfg(test)]
mod tests;

///
/// CONSTANTS
///

/// Maximum length of a node display name, in characters.
///
/// Longer names are rejected before any store write so the unique sibling
/// index key stays within bounded sizes.
pub const MAX_NODE_NAME_CHARS: usize = 255;

/// Default undo-ring capacity per tree, in command groups.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Default working-copy time-to-live in milliseconds (24h). Working copies
/// older than this are discarded by the init-time sweep.
pub const DEFAULT_WORKING_COPY_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Store schema version. Opening a store persisted by a newer version fails;
/// there is no forward-migration contract.
pub const STORE_VERSION: u32 = 1;

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No errors, executors, stores, serializers, or helpers are re-exported here.
///

pub mod prelude {
    pub use crate::{
        api::{HierarchiDb, InitConfig, TreeDefinition},
        model::{
            envelope::{Command, CommandEnvelope, NameConflictPolicy},
            event::{ChangeEvent, ChangeKind},
            node::{NodeTypeTag, TreeNode},
        },
        types::{NodeId, Timestamp, TreeId, ViewId},
        value::Value,
    };
}
