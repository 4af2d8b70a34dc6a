use crate::{
    model::define_tag,
    types::{NodeId, Timestamp, TreeId},
};
use serde::{Deserialize, Serialize};

define_tag!(
    /// Registry key of a node type ("folder", "basemap", "spreadsheet", …).
    NodeTypeTag
);

impl NodeTypeTag {
    /// Built-in type of live and trash roots. Roots carry no peer entity and
    /// are never moved, trashed, or deleted.
    #[must_use]
    pub fn root() -> Self {
        Self::new("root")
    }

    /// Built-in container type with no peer entity.
    #[must_use]
    pub fn folder() -> Self {
        Self::new("folder")
    }
}

///
/// TreeNode
///
/// The unit of hierarchy. A node lives in exactly one tree; trashing
/// re-parents it under the trash root and stamps the removal metadata, the
/// id is preserved for its whole lifetime.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: NodeId,
    pub tree_id: TreeId,
    /// `None` only for the two roots.
    pub parent_id: Option<NodeId>,
    pub node_type: NodeTypeTag,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Monotonically increasing per node id; never reset.
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_parent_id: Option<NodeId>,
}

impl TreeNode {
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    #[must_use]
    pub const fn is_trashed(&self) -> bool {
        self.removed_at.is_some()
    }

    /// Stamp an update: `updated_at` takes the clock reading, `version`
    /// increments. Both are non-decreasing along the node's lifetime.
    pub const fn touch(&mut self, now: Timestamp) {
        if now.as_millis() > self.updated_at.as_millis() {
            self.updated_at = now;
        }
        self.version = self.version.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> TreeNode {
        TreeNode {
            id: NodeId::nil(),
            tree_id: TreeId::nil(),
            parent_id: Some(NodeId::nil()),
            node_type: NodeTypeTag::folder(),
            name: "A".to_string(),
            description: None,
            created_at: Timestamp::from_millis(10),
            updated_at: Timestamp::from_millis(10),
            version: 1,
            removed_at: None,
            original_parent_id: None,
        }
    }

    #[test]
    fn touch_never_decreases_updated_at() {
        let mut n = node();
        n.touch(Timestamp::from_millis(5));

        assert_eq!(n.updated_at, Timestamp::from_millis(10));
        assert_eq!(n.version, 2);

        n.touch(Timestamp::from_millis(20));
        assert_eq!(n.updated_at, Timestamp::from_millis(20));
        assert_eq!(n.version, 3);
    }

    #[test]
    fn trashed_is_derived_from_removal_stamp() {
        let mut n = node();
        assert!(!n.is_trashed());

        n.removed_at = Some(Timestamp::from_millis(11));
        assert!(n.is_trashed());
    }
}
