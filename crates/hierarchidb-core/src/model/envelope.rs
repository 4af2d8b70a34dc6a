use crate::{
    model::node::NodeTypeTag,
    types::{CommandId, GroupId, NodeId, Timestamp, TreeId, ViewId, WorkingCopyId},
    value::Value,
};
use serde::{Deserialize, Serialize};

///
/// NameConflictPolicy
///
/// Applied whenever a write would violate sibling-name uniqueness.
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NameConflictPolicy {
    /// Abort the command with `NameConflict`.
    #[default]
    Error,
    /// Suffix a counter until the unique index accepts the write.
    AutoRename,
    /// Delete the colliding sibling and its subtree first, same transaction.
    Overwrite,
}

///
/// Command
///
/// The closed set of mutation kinds with their typed payloads. The wire
/// shape is `{kind, payload}`; decoding enforces the closed set, so an
/// unknown kind never reaches dispatch.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum Command {
    Create(CreateSpec),
    Update(UpdateSpec),
    MoveNodes(MoveSpec),
    MoveToTrash(NodeSetSpec),
    RecoverFromTrash(RecoverSpec),
    PermanentDelete(NodeSetSpec),
    DuplicateNodes(DuplicateSpec),
    PasteNodes(PasteSpec),
    CreateWorkingCopy(CreateWorkingCopySpec),
    CommitWorkingCopy(CommitWorkingCopySpec),
    DiscardWorkingCopy(WorkingCopyRefSpec),
    CreateWorkingCopyForCreate(CreateDraftSpec),
    CommitWorkingCopyForCreate(WorkingCopyRefSpec),
    DiscardWorkingCopyForCreate(WorkingCopyRefSpec),
    Undo(HistorySpec),
    Redo(HistorySpec),
    ClearHistory(HistorySpec),
}

impl Command {
    /// Stable label for observability and undo-group display.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Update(_) => "update",
            Self::MoveNodes(_) => "moveNodes",
            Self::MoveToTrash(_) => "moveToTrash",
            Self::RecoverFromTrash(_) => "recoverFromTrash",
            Self::PermanentDelete(_) => "permanentDelete",
            Self::DuplicateNodes(_) => "duplicateNodes",
            Self::PasteNodes(_) => "pasteNodes",
            Self::CreateWorkingCopy(_) => "createWorkingCopy",
            Self::CommitWorkingCopy(_) => "commitWorkingCopy",
            Self::DiscardWorkingCopy(_) => "discardWorkingCopy",
            Self::CreateWorkingCopyForCreate(_) => "createWorkingCopyForCreate",
            Self::CommitWorkingCopyForCreate(_) => "commitWorkingCopyForCreate",
            Self::DiscardWorkingCopyForCreate(_) => "discardWorkingCopyForCreate",
            Self::Undo(_) => "undo",
            Self::Redo(_) => "redo",
            Self::ClearHistory(_) => "clearHistory",
        }
    }

    /// History commands replay the log instead of appending to it.
    #[must_use]
    pub const fn is_history(&self) -> bool {
        matches!(self, Self::Undo(_) | Self::Redo(_) | Self::ClearHistory(_))
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSpec {
    pub parent_id: NodeId,
    pub node_type: NodeTypeTag,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSpec {
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Entity patch, merged field-by-field into the peer payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Optimistic guard; mismatch fails `VersionConflict`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_updated_at: Option<Timestamp>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveSpec {
    pub node_ids: Vec<NodeId>,
    pub to_parent_id: NodeId,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSetSpec {
    pub node_ids: Vec<NodeId>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverSpec {
    pub node_ids: Vec<NodeId>,
    /// Absent: recover to `original_parent_id` when it is still live,
    /// otherwise to the live root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_parent_id: Option<NodeId>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateSpec {
    pub node_ids: Vec<NodeId>,
    pub to_parent_id: NodeId,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasteSpec {
    pub to_parent_id: NodeId,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkingCopySpec {
    pub working_copy_id: WorkingCopyId,
    pub source_node_id: NodeId,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitWorkingCopySpec {
    pub working_copy_id: WorkingCopyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_updated_at: Option<Timestamp>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingCopyRefSpec {
    pub working_copy_id: WorkingCopyId,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDraftSpec {
    pub working_copy_id: WorkingCopyId,
    pub parent_node_id: NodeId,
    pub node_type: NodeTypeTag,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySpec {
    pub tree_id: TreeId,
}

///
/// CommandEnvelope
///
/// The uniform mutation record. `group_id` clusters related commands into
/// one undo step; `source_view_id` scopes clipboard and working-copy state.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub command_id: CommandId,
    pub group_id: GroupId,
    #[serde(flatten)]
    pub command: Command,
    pub issued_at: Timestamp,
    pub source_view_id: ViewId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_name_conflict: Option<NameConflictPolicy>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_is_kind_plus_payload() {
        let command = Command::MoveToTrash(NodeSetSpec {
            node_ids: vec![NodeId::nil()],
        });
        let encoded = serde_json::to_value(&command).unwrap();

        assert_eq!(encoded["kind"], "moveToTrash");
        assert!(encoded["payload"]["nodeIds"].is_array());
    }

    #[test]
    fn unknown_kind_is_rejected_at_decode() {
        let raw = serde_json::json!({
            "kind": "formatHardDrive",
            "payload": {}
        });

        assert!(serde_json::from_value::<Command>(raw).is_err());
    }

    #[test]
    fn conflict_policy_uses_kebab_case() {
        let encoded = serde_json::to_value(NameConflictPolicy::AutoRename).unwrap();

        assert_eq!(encoded, "auto-rename");
    }
}
