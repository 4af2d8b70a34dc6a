//! Node-row persistence: the `nodes` table and its three secondary indexes
//! move together here, so no caller can write a row and forget an index.

use crate::{
    error::{CoreError, ErrorCode, ErrorOrigin},
    model::{node::TreeNode, tree::Tree},
    schema,
    store::{Transaction, decode_row, encode_row},
    types::{NodeId, TreeId},
};

pub(crate) fn read_tree(txn: &Transaction<'_>, tree_id: TreeId) -> Result<Tree, CoreError> {
    match txn.get(schema::TREES_TABLE, &schema::tree_key(tree_id)) {
        Some(bytes) => Ok(decode_row(&bytes)?),
        None => Err(CoreError::internal(
            ErrorOrigin::Mutation,
            format!("tree not found: {tree_id}"),
        )),
    }
}

pub(crate) fn write_tree(txn: &mut Transaction<'_>, tree: &Tree) -> Result<(), CoreError> {
    let bytes = encode_row(tree)?;
    txn.put(schema::TREES_TABLE, &schema::tree_key(tree.id), bytes);

    Ok(())
}

pub(crate) fn read_node(
    txn: &Transaction<'_>,
    node_id: NodeId,
) -> Result<Option<TreeNode>, CoreError> {
    match txn.get(schema::NODES_TABLE, &schema::node_key(node_id)) {
        Some(bytes) => Ok(Some(decode_row(&bytes)?)),
        None => Ok(None),
    }
}

pub(crate) fn require_node(txn: &Transaction<'_>, node_id: NodeId) -> Result<TreeNode, CoreError> {
    read_node(txn, node_id)?.ok_or_else(|| CoreError::node_not_found(node_id))
}

fn remove_index_entries(txn: &mut Transaction<'_>, node: &TreeNode) {
    if let Some(parent_id) = node.parent_id {
        txn.delete(
            schema::NODES_BY_PARENT_NAME,
            &schema::parent_name_key(node.tree_id, parent_id, &node.name),
        );
        txn.delete(
            schema::NODES_BY_PARENT_UPDATED,
            &schema::parent_updated_key(node.tree_id, parent_id, node.updated_at, node.id),
        );
    }
    if let Some(removed_at) = node.removed_at {
        txn.delete(
            schema::NODES_BY_REMOVED,
            &schema::removed_key(node.tree_id, removed_at, node.id),
        );
    }
}

fn insert_index_entries(txn: &mut Transaction<'_>, node: &TreeNode) {
    let id_bytes = node.id.to_bytes().to_vec();
    if let Some(parent_id) = node.parent_id {
        txn.put(
            schema::NODES_BY_PARENT_NAME,
            &schema::parent_name_key(node.tree_id, parent_id, &node.name),
            id_bytes.clone(),
        );
        txn.put(
            schema::NODES_BY_PARENT_UPDATED,
            &schema::parent_updated_key(node.tree_id, parent_id, node.updated_at, node.id),
            id_bytes.clone(),
        );
    }
    if let Some(removed_at) = node.removed_at {
        txn.put(
            schema::NODES_BY_REMOVED,
            &schema::removed_key(node.tree_id, removed_at, node.id),
            id_bytes,
        );
    }
}

/// Persist a node row and keep every secondary index in step. `before` is
/// the previously stored state (`None` on insert).
pub(crate) fn write_node(
    txn: &mut Transaction<'_>,
    before: Option<&TreeNode>,
    node: &TreeNode,
) -> Result<(), CoreError> {
    if let Some(before) = before {
        remove_index_entries(txn, before);
    }

    debug_assert!(
        child_by_name(txn, node.tree_id, node.parent_id.unwrap_or(node.id), &node.name)
            .is_none_or(|owner| owner == node.id),
        "sibling-name slot must be free or self before a node write"
    );

    let bytes = encode_row(node)?;
    txn.put(schema::NODES_TABLE, &schema::node_key(node.id), bytes);
    insert_index_entries(txn, node);

    Ok(())
}

/// Remove a node row and its index entries.
pub(crate) fn delete_node_row(txn: &mut Transaction<'_>, node: &TreeNode) {
    remove_index_entries(txn, node);
    txn.delete(schema::NODES_TABLE, &schema::node_key(node.id));
}

/// Owner of a sibling-name slot, if taken.
pub(crate) fn child_by_name(
    txn: &Transaction<'_>,
    tree_id: TreeId,
    parent_id: NodeId,
    name: &str,
) -> Option<NodeId> {
    txn.get(
        schema::NODES_BY_PARENT_NAME,
        &schema::parent_name_key(tree_id, parent_id, name),
    )
    .and_then(|bytes| NodeId::try_from_bytes(&bytes).ok())
}

/// Direct children in name order.
pub(crate) fn children_of(
    txn: &Transaction<'_>,
    tree_id: TreeId,
    parent_id: NodeId,
) -> Vec<NodeId> {
    txn.scan_prefix(
        schema::NODES_BY_PARENT_NAME,
        &schema::children_prefix(tree_id, parent_id),
    )
    .into_iter()
    .filter_map(|(_, bytes)| NodeId::try_from_bytes(&bytes).ok())
    .collect()
}

pub(crate) fn child_count(txn: &Transaction<'_>, tree_id: TreeId, parent_id: NodeId) -> u64 {
    txn.count_prefix(
        schema::NODES_BY_PARENT_NAME,
        &schema::children_prefix(tree_id, parent_id),
    )
}

// Parent-chain walks are bounded; a longer chain is store corruption, not a
// deep tree.
const MAX_DEPTH: usize = 10_000;

/// Whether `candidate` lies on `node`'s ancestor chain (inclusive of
/// `node` itself).
pub(crate) fn is_self_or_ancestor(
    txn: &Transaction<'_>,
    candidate: NodeId,
    node: NodeId,
) -> Result<bool, CoreError> {
    let mut cursor = Some(node);
    for _ in 0..MAX_DEPTH {
        let Some(current) = cursor else {
            return Ok(false);
        };
        if current == candidate {
            return Ok(true);
        }

        cursor = require_node(txn, current)?.parent_id;
    }

    Err(CoreError::internal(
        ErrorOrigin::Mutation,
        format!("ancestor chain of {node} exceeds {MAX_DEPTH} levels"),
    ))
}

/// Whether a node's chain terminates at the live root (vs the trash root).
pub(crate) fn is_in_live_tree(
    txn: &Transaction<'_>,
    tree: &Tree,
    node_id: NodeId,
) -> Result<bool, CoreError> {
    if node_id == tree.trash_root_id {
        return Ok(false);
    }

    is_self_or_ancestor(txn, tree.live_root_id, node_id)
}

/// The subtree rooted at `root` in depth-first pre-order (root first).
pub(crate) fn collect_subtree(
    txn: &Transaction<'_>,
    root: NodeId,
) -> Result<Vec<TreeNode>, CoreError> {
    let mut out = Vec::new();
    let mut stack = vec![root];

    while let Some(node_id) = stack.pop() {
        if out.len() >= MAX_DEPTH {
            return Err(CoreError::internal(
                ErrorOrigin::Mutation,
                format!("subtree under {root} exceeds {MAX_DEPTH} nodes"),
            ));
        }

        let node = require_node(txn, node_id)?;
        let children = children_of(txn, node.tree_id, node.id);
        out.push(node);
        // reversed push keeps name order in the pre-order output
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }

    Ok(out)
}

/// Live node count of one type; the unregistration guard.
pub(crate) fn count_nodes_of_type(
    txn: &Transaction<'_>,
    tag: &crate::model::node::NodeTypeTag,
) -> Result<u64, CoreError> {
    let mut count = 0;
    for (_, bytes) in txn.scan_prefix(schema::NODES_TABLE, &[]) {
        let node: TreeNode = decode_row(&bytes)?;
        if node.node_type == *tag {
            count += 1;
        }
    }

    Ok(count)
}

pub(crate) fn wrong_tree(node_id: NodeId, expected: TreeId, found: TreeId) -> CoreError {
    CoreError::new(
        ErrorCode::WrongTree,
        ErrorOrigin::Mutation,
        format!("node {node_id} belongs to tree {found}, expected {expected}"),
    )
    .with_node(node_id)
}
