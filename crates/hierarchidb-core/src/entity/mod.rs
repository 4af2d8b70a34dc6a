mod base;

pub use base::BaseEntityHandler;

use crate::{
    error::{CoreError, ErrorCode, ErrorOrigin},
    model::{
        entity::{EntityBackup, GroupEntity, GroupTypeTag, PeerEntity, RelationalEntity},
        node::NodeTypeTag,
    },
    store::{Transaction, WriteCtx},
    types::{NodeId, Timestamp},
    value::Value,
};
use thiserror::Error as ThisError;

///
/// EntityError
///

#[derive(Debug, ThisError)]
pub enum EntityError {
    #[error("peer entity already exists for node {node_id}")]
    DuplicatePeer { node_id: NodeId },

    #[error("no peer entity for node {node_id}")]
    PeerNotFound { node_id: NodeId },

    #[error("stale working copy for node {node_id}")]
    StaleWorkingCopy { node_id: NodeId },

    #[error("relational reference field '{field}' is not shareable content")]
    BadRelationalRef { field: String },
}

impl EntityError {
    const fn code(&self) -> ErrorCode {
        match self {
            Self::DuplicatePeer { .. } => ErrorCode::DuplicatePeer,
            Self::PeerNotFound { .. } => ErrorCode::NodeNotFound,
            Self::StaleWorkingCopy { .. } => ErrorCode::VersionConflict,
            Self::BadRelationalRef { .. } => ErrorCode::Internal,
        }
    }

    const fn node_id(&self) -> Option<NodeId> {
        match self {
            Self::DuplicatePeer { node_id }
            | Self::PeerNotFound { node_id }
            | Self::StaleWorkingCopy { node_id } => Some(*node_id),
            Self::BadRelationalRef { .. } => None,
        }
    }
}

impl From<EntityError> for CoreError {
    fn from(err: EntityError) -> Self {
        let core = Self::new(err.code(), ErrorOrigin::Entity, err.to_string());
        match err.node_id() {
            Some(node_id) => core.with_node(node_id),
            None => core,
        }
    }
}

///
/// EntityHandler
///
/// Per-node-type owner of the entity tables. Every method stages writes
/// into the caller's transaction; nothing here commits, so a failing
/// mutation rolls the entity side back with everything else.
///

pub trait EntityHandler {
    fn node_type(&self) -> &NodeTypeTag;

    /// Whether this type owns a peer entity at all. Pure container types
    /// (folders, roots) do not.
    fn has_peer(&self) -> bool;

    /// Allocate and insert the peer entity for a freshly created node.
    /// Fails `DuplicatePeer` when one already exists.
    fn create_entity(
        &self,
        ctx: &mut WriteCtx<'_>,
        node_id: NodeId,
        data: Option<&Value>,
    ) -> Result<Option<PeerEntity>, CoreError>;

    fn get_entity(
        &self,
        txn: &Transaction<'_>,
        node_id: NodeId,
    ) -> Result<Option<PeerEntity>, CoreError>;

    /// Merge a patch into the peer payload, stamp `updated_at`, bump
    /// `version`. Fails `NodeNotFound` when absent.
    fn update_entity(
        &self,
        ctx: &mut WriteCtx<'_>,
        node_id: NodeId,
        patch: &Value,
    ) -> Result<PeerEntity, CoreError>;

    /// Remove the peer, every group entity, and release relational
    /// references, all inside the open transaction.
    fn delete_entity(&self, ctx: &mut WriteCtx<'_>, node_id: NodeId) -> Result<(), CoreError>;

    fn create_group_entity(
        &self,
        ctx: &mut WriteCtx<'_>,
        node_id: NodeId,
        group_type: &GroupTypeTag,
        data: Value,
    ) -> Result<GroupEntity, CoreError>;

    fn get_group_entities(
        &self,
        txn: &Transaction<'_>,
        node_id: NodeId,
        group_type: &GroupTypeTag,
    ) -> Result<Vec<GroupEntity>, CoreError>;

    fn delete_group_entities(
        &self,
        ctx: &mut WriteCtx<'_>,
        node_id: NodeId,
        group_type: &GroupTypeTag,
    ) -> Result<u64, CoreError>;

    /// Deep-copy peer and group entities onto a new node, re-stamping
    /// identities. Relational references are shared, not copied; their
    /// counts go up.
    fn duplicate(
        &self,
        ctx: &mut WriteCtx<'_>,
        source_node_id: NodeId,
        target_node_id: NodeId,
    ) -> Result<(), CoreError>;

    /// Atomic snapshot of peer + group entities. `None` when the type has
    /// no peer or none exists.
    fn backup(
        &self,
        txn: &Transaction<'_>,
        node_id: NodeId,
        now: Timestamp,
    ) -> Result<Option<EntityBackup>, CoreError>;

    /// Atomic replace from a snapshot (modulo `updated_at`).
    fn restore(
        &self,
        ctx: &mut WriteCtx<'_>,
        node_id: NodeId,
        backup: &EntityBackup,
    ) -> Result<(), CoreError>;

    /// Pre-delete sweep: group entities and any other per-node residue.
    fn cleanup(&self, ctx: &mut WriteCtx<'_>, node_id: NodeId) -> Result<(), CoreError>;

    /// Deep copy of the current peer payload for a working-copy draft.
    fn working_copy_payload(
        &self,
        txn: &Transaction<'_>,
        node_id: NodeId,
    ) -> Result<Option<Value>, CoreError>;

    /// Commit a draft payload onto the peer entity under an optimistic
    /// guard: `expected_updated_at` must match the entity's current stamp.
    fn apply_working_copy(
        &self,
        ctx: &mut WriteCtx<'_>,
        node_id: NodeId,
        draft: Option<&Value>,
        expected_updated_at: Option<Timestamp>,
    ) -> Result<(), CoreError>;

    /// Look up shared content by hash.
    fn get_relational(
        &self,
        txn: &Transaction<'_>,
        hash: &crate::value::ContentHash,
    ) -> Result<Option<RelationalEntity>, CoreError>;
}
