//! # hierarchidb
//!
//! `hierarchidb` is the **public facade crate** for the HierarchiDB engine.
//! It is the recommended dependency for downstream host applications.
//!
//! This crate exposes:
//! - the stable worker-side surface ([`api::HierarchiDb`]) aggregating
//!   mutations, queries, and subscriptions,
//! - the command-envelope vocabulary hosts build RPC transports around,
//! - and the collaborator boundaries hosts implement: the key-value
//!   backend, the clock, the broadcast channel, event sinks, and entity
//!   handlers.
//!
//! Low-level execution, storage, and engine internals live in
//! `hierarchidb-core` and are exposed only through `__internal`.
//!
//! ## Crate layout
//!
//! - `api`
//!   The facade: init configuration, dispatch, per-view state, diagnostics.
//!
//! - `model` / `types` / `value`
//!   Stable building blocks: envelopes, events, rows, ids, payload values.
//!
//! - `entity` / `registry`
//!   The plugin contract: entity handlers and node-type registration.
//!
//! - `command` / `subscription` / `query`
//!   Pipeline, observation, and read surfaces.
//!
//! - `error`
//!   The coded result taxonomy crossing the RPC boundary.
//!
//! ## Internal boundaries
//!
//! The `__internal` module exposes engine internals strictly for tests and
//! tooling. It is not part of the supported API surface and may change
//! without notice.

// core modules
pub use hierarchidb_core::{
    api, command, entity, error, model, obs, query, registry, store, subscription, types, value,
    working_copy,
};

pub use hierarchidb_core::error::CoreError as Error;

/// Internal
#[doc(hidden)]
pub mod __internal {
    pub use hierarchidb_core as core;
}

///
/// Host Prelude
/// using _ brings traits into scope and avoids name conflicts
///

pub mod prelude {
    pub use crate::{
        api::{HierarchiDb, InitConfig, TreeDefinition},
        command::{BroadcastChannel as _, CommandResponse, PeerMessage},
        entity::{BaseEntityHandler, EntityHandler as _},
        error::{CoreError, ErrorCode},
        model::{
            envelope::{Command, CommandEnvelope, NameConflictPolicy},
            event::{ChangeEvent, ChangeKind},
            node::{NodeTypeTag, TreeNode},
        },
        query::{ChildrenOptions, ChildrenSort},
        registry::NodeTypeDef,
        subscription::{EventSink as _, SubscriptionOptions, VecSink},
        types::*,
        value::Value,
    };
    pub use serde::{Deserialize, Serialize};
}

///
/// Consts
///

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
