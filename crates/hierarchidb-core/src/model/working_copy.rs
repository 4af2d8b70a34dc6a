use crate::{
    model::node::NodeTypeTag,
    types::{NodeId, Timestamp, TreeId, ViewId, WorkingCopyId},
    value::Value,
};
use serde::{Deserialize, Serialize};

///
/// WorkingCopyMode
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkingCopyMode {
    /// Draft of an existing node; commits back onto it under a version guard.
    Edit,
    /// Draft of a node that does not exist yet; commits as a create.
    Create,
}

///
/// WorkingCopy
///
/// An isolated draft of a node and its peer entity. Never visible to live
/// queries; terminates via commit or discard, or via the init-time TTL
/// sweep after a process restart.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingCopy {
    pub id: WorkingCopyId,
    pub mode: WorkingCopyMode,
    pub tree_id: TreeId,
    pub node_type: NodeTypeTag,
    pub view_id: ViewId,
    /// Edit mode only: the node this draft was copied from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_node_id: Option<NodeId>,
    /// Create mode only: the parent the committed node will land under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_node_id: Option<NodeId>,
    /// Edit mode only: `updated_at` of the source at draft time; commit
    /// fails `VersionConflict` when the source has moved past it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_updated_at: Option<Timestamp>,
    pub draft_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_payload: Option<Value>,
    pub dirty: bool,
    pub created_at: Timestamp,
}

impl WorkingCopy {
    #[must_use]
    pub const fn is_edit(&self) -> bool {
        matches!(self.mode, WorkingCopyMode::Edit)
    }

    /// Age against a clock reading, for the TTL sweep.
    #[must_use]
    pub const fn age_ms(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.created_at)
    }
}
