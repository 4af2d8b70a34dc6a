//! Table naming and key encoding.
//!
//! Every table keys on raw bytes; composite keys concatenate fixed-width
//! segments (16-byte ids, big-endian integers) so byte order equals logical
//! order and prefix scans enumerate children, groups, and log entries.

use crate::{
    model::{
        entity::{GroupTypeTag, RelationalKindTag},
        node::NodeTypeTag,
    },
    types::{NodeId, Timestamp, TreeId, ViewId},
    value::ContentHash,
};

// ---------------------------------------------------------------------
// Table names
// ---------------------------------------------------------------------

pub const TREES_TABLE: &str = "trees";
pub const NODES_TABLE: &str = "nodes";
/// Unique index `(treeId, parentId, name) -> nodeId`; the authoritative
/// sibling-name enforcement. The collision policy transforms names before
/// the write, never the index.
pub const NODES_BY_PARENT_NAME: &str = "nodes.by_parent_name";
/// Index `(treeId, parentId, updatedAt, nodeId) -> nodeId` for recency sorts.
pub const NODES_BY_PARENT_UPDATED: &str = "nodes.by_parent_updated";
/// Index `(treeId, removedAt, nodeId) -> nodeId` over trashed nodes.
pub const NODES_BY_REMOVED: &str = "nodes.by_removed";
pub const WORKING_COPIES_TABLE: &str = "working_copies";
/// Unique index `(sourceNodeId, viewId) -> workingCopyId`; the guard behind
/// `WorkingCopyExists`.
pub const WORKING_COPIES_BY_SOURCE: &str = "working_copies.by_source";

#[must_use]
pub fn entity_table(node_type: &NodeTypeTag) -> String {
    format!("entities.{node_type}")
}

#[must_use]
pub fn group_table(node_type: &NodeTypeTag, group_type: &GroupTypeTag) -> String {
    format!("group_entities.{node_type}.{group_type}")
}

#[must_use]
pub fn relational_table(kind: &RelationalKindTag) -> String {
    format!("relational_entities.{kind}")
}

#[must_use]
pub fn undo_table(tree_id: TreeId) -> String {
    format!("undo_log.{tree_id}")
}

#[must_use]
pub fn redo_table(tree_id: TreeId) -> String {
    format!("redo_log.{tree_id}")
}

/// Meta-table key of a tree's event sequence counter.
#[must_use]
pub fn tree_seq_key(tree_id: TreeId) -> Vec<u8> {
    let mut key = b"seq.".to_vec();
    key.extend_from_slice(&tree_id.to_bytes());
    key
}

/// Domain tables participate in undo row images; bookkeeping tables
/// (meta, the logs themselves) must not.
#[must_use]
pub fn is_domain_table(table: &str) -> bool {
    table != crate::store::META_TABLE
        && !table.starts_with("undo_log.")
        && !table.starts_with("redo_log.")
}

// ---------------------------------------------------------------------
// Key encoding
// ---------------------------------------------------------------------

#[must_use]
pub fn node_key(node_id: NodeId) -> Vec<u8> {
    node_id.to_bytes().to_vec()
}

#[must_use]
pub fn tree_key(tree_id: TreeId) -> Vec<u8> {
    tree_id.to_bytes().to_vec()
}

/// Exact key in the unique sibling index.
#[must_use]
pub fn parent_name_key(tree_id: TreeId, parent_id: NodeId, name: &str) -> Vec<u8> {
    let mut key = children_prefix(tree_id, parent_id);
    key.extend_from_slice(name.as_bytes());
    key
}

/// Prefix enumerating every direct child of a parent, in name order.
#[must_use]
pub fn children_prefix(tree_id: TreeId, parent_id: NodeId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(&tree_id.to_bytes());
    key.extend_from_slice(&parent_id.to_bytes());
    key
}

#[must_use]
pub fn parent_updated_key(
    tree_id: TreeId,
    parent_id: NodeId,
    updated_at: Timestamp,
    node_id: NodeId,
) -> Vec<u8> {
    let mut key = children_prefix(tree_id, parent_id);
    key.extend_from_slice(&updated_at.as_millis().to_be_bytes());
    key.extend_from_slice(&node_id.to_bytes());
    key
}

#[must_use]
pub fn removed_key(tree_id: TreeId, removed_at: Timestamp, node_id: NodeId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(&tree_id.to_bytes());
    key.extend_from_slice(&removed_at.as_millis().to_be_bytes());
    key.extend_from_slice(&node_id.to_bytes());
    key
}

#[must_use]
pub fn removed_prefix(tree_id: TreeId) -> Vec<u8> {
    tree_id.to_bytes().to_vec()
}

/// Key of a group entity: groups order by `(nodeId, ordinal)`.
#[must_use]
pub fn group_key(node_id: NodeId, ordinal: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(20);
    key.extend_from_slice(&node_id.to_bytes());
    key.extend_from_slice(&ordinal.to_be_bytes());
    key
}

#[must_use]
pub fn group_prefix(node_id: NodeId) -> Vec<u8> {
    node_id.to_bytes().to_vec()
}

#[must_use]
pub fn relational_key(hash: &ContentHash) -> Vec<u8> {
    hash.as_str().as_bytes().to_vec()
}

#[must_use]
pub fn working_copy_source_key(source_node_id: NodeId, view_id: ViewId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(&source_node_id.to_bytes());
    key.extend_from_slice(&view_id.to_bytes());
    key
}

/// Key of one undo/redo log entry; the log orders by sequence.
#[must_use]
pub fn log_key(seq: u64) -> Vec<u8> {
    seq.to_be_bytes().to_vec()
}

pub fn decode_log_key(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.try_into().ok()?;

    Some(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Ulid;

    fn id(n: u128) -> NodeId {
        NodeId::from_ulid(Ulid::from_parts(1, n))
    }

    #[test]
    fn sibling_keys_share_the_children_prefix() {
        let tree = TreeId::nil();
        let parent = id(7);
        let key = parent_name_key(tree, parent, "A");

        assert!(key.starts_with(&children_prefix(tree, parent)));
        assert!(key.ends_with(b"A"));
    }

    #[test]
    fn updated_index_orders_by_timestamp() {
        let tree = TreeId::nil();
        let parent = id(7);
        let older = parent_updated_key(tree, parent, Timestamp::from_millis(5), id(1));
        let newer = parent_updated_key(tree, parent, Timestamp::from_millis(6), id(1));

        assert!(older < newer);
    }

    #[test]
    fn log_keys_round_trip_and_order() {
        assert!(log_key(1) < log_key(2));
        assert_eq!(decode_log_key(&log_key(42)), Some(42));
        assert_eq!(decode_log_key(b"short"), None);
    }

    #[test]
    fn bookkeeping_tables_are_not_domain_tables() {
        assert!(is_domain_table(NODES_TABLE));
        assert!(is_domain_table(&entity_table(
            &crate::model::node::NodeTypeTag::folder()
        )));
        assert!(!is_domain_table("meta"));
        assert!(!is_domain_table(&undo_table(TreeId::nil())));
        assert!(!is_domain_table(&redo_table(TreeId::nil())));
    }
}
