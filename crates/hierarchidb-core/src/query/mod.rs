//! Read surface. Every operation runs against committed state outside any
//! write transaction; long scans honour a caller-supplied [`CancelToken`].

use crate::{
    error::{CoreError, ErrorCode, ErrorOrigin},
    model::{node::TreeNode, tree::Tree},
    mutation::nodes,
    schema,
    store::{KvBackend, Transaction, decode_row},
    types::{CancelToken, NodeId, TreeId},
};

///
/// ChildrenSort
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ChildrenSort {
    #[default]
    Name,
    CreatedAt,
    UpdatedAt,
}

///
/// ChildrenOptions
///

#[derive(Clone, Copy, Debug, Default)]
pub struct ChildrenOptions {
    pub sort: ChildrenSort,
    pub descending: bool,
    pub offset: usize,
    pub limit: Option<usize>,
}

fn aborted() -> CoreError {
    CoreError::new(ErrorCode::Aborted, ErrorOrigin::Query, "read cancelled by caller")
}

pub fn get_tree(backend: &dyn KvBackend, tree_id: TreeId) -> Result<Tree, CoreError> {
    let txn = Transaction::new(backend);
    nodes::read_tree(&txn, tree_id)
}

pub fn get_trash_root(backend: &dyn KvBackend, tree_id: TreeId) -> Result<NodeId, CoreError> {
    get_tree(backend, tree_id).map(|tree| tree.trash_root_id)
}

pub fn get_node(backend: &dyn KvBackend, node_id: NodeId) -> Result<Option<TreeNode>, CoreError> {
    let txn = Transaction::new(backend);
    nodes::read_node(&txn, node_id)
}

/// Direct children of a parent, sorted, windowed.
pub fn get_children(
    backend: &dyn KvBackend,
    parent_id: NodeId,
    options: ChildrenOptions,
) -> Result<Vec<TreeNode>, CoreError> {
    let txn = Transaction::new(backend);
    let parent = nodes::require_node(&txn, parent_id)?;

    let mut children: Vec<TreeNode> = nodes::children_of(&txn, parent.tree_id, parent.id)
        .into_iter()
        .map(|child_id| nodes::require_node(&txn, child_id))
        .collect::<Result<_, _>>()?;

    match options.sort {
        ChildrenSort::Name => {} // index order
        ChildrenSort::CreatedAt => children.sort_by_key(|node| node.created_at),
        ChildrenSort::UpdatedAt => children.sort_by_key(|node| node.updated_at),
    }
    if options.descending {
        children.reverse();
    }

    let windowed = children
        .into_iter()
        .skip(options.offset)
        .take(options.limit.unwrap_or(usize::MAX))
        .collect();

    Ok(windowed)
}

/// Root-to-node path, inclusive of both ends.
pub fn get_ancestors(backend: &dyn KvBackend, node_id: NodeId) -> Result<Vec<TreeNode>, CoreError> {
    let txn = Transaction::new(backend);
    let mut path = Vec::new();
    let mut cursor = Some(node_id);

    while let Some(current) = cursor {
        if path.len() > 10_000 {
            return Err(CoreError::internal(
                ErrorOrigin::Query,
                format!("ancestor chain of {node_id} does not terminate"),
            ));
        }

        let node = nodes::require_node(&txn, current)?;
        cursor = node.parent_id;
        path.push(node);
    }

    path.reverse();
    Ok(path)
}

/// Case-insensitive substring search over one tree's live nodes, in name
/// order. Single-tree by design; callers fan out across trees.
pub fn search_by_name(
    backend: &dyn KvBackend,
    tree_id: TreeId,
    pattern: &str,
    limit: Option<usize>,
    cancel: &CancelToken,
) -> Result<Vec<TreeNode>, CoreError> {
    let txn = Transaction::new(backend);
    let tree = nodes::read_tree(&txn, tree_id)?;
    let needle = pattern.to_lowercase();
    let limit = limit.unwrap_or(usize::MAX);

    let mut hits = Vec::new();
    for (_, bytes) in txn.scan_prefix(schema::NODES_TABLE, &[]) {
        if cancel.is_cancelled() {
            return Err(aborted());
        }
        if hits.len() >= limit {
            break;
        }

        let node: TreeNode = decode_row(&bytes)?;
        if node.tree_id != tree_id || tree.is_root(node.id) {
            continue;
        }
        if !node.name.to_lowercase().contains(&needle) {
            continue;
        }
        if nodes::is_in_live_tree(&txn, &tree, node.id)? {
            hits.push(node);
        }
    }

    hits.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(hits)
}

/// Number of nodes strictly below `node_id`.
pub fn count_descendants(
    backend: &dyn KvBackend,
    node_id: NodeId,
    cancel: &CancelToken,
) -> Result<u64, CoreError> {
    let txn = Transaction::new(backend);
    let root = nodes::require_node(&txn, node_id)?;

    let mut count: u64 = 0;
    let mut frontier = nodes::children_of(&txn, root.tree_id, root.id);
    while let Some(current) = frontier.pop() {
        if cancel.is_cancelled() {
            return Err(aborted());
        }

        count += 1;
        let node = nodes::require_node(&txn, current)?;
        frontier.extend(nodes::children_of(&txn, node.tree_id, node.id));
    }

    Ok(count)
}

/// Breadth-first subtree listing, optionally depth-capped, root included.
pub fn list_subtree(
    backend: &dyn KvBackend,
    root_id: NodeId,
    max_depth: Option<u32>,
    cancel: &CancelToken,
) -> Result<Vec<TreeNode>, CoreError> {
    let txn = Transaction::new(backend);
    let root = nodes::require_node(&txn, root_id)?;
    let tree_id = root.tree_id;

    let mut out = vec![root];
    let mut frontier: Vec<(NodeId, u32)> = vec![(root_id, 0)];

    while let Some((current, depth)) = frontier.pop() {
        if cancel.is_cancelled() {
            return Err(aborted());
        }
        if max_depth.is_some_and(|max| depth >= max) {
            continue;
        }

        for child_id in nodes::children_of(&txn, tree_id, current) {
            let child = nodes::require_node(&txn, child_id)?;
            out.push(child);
            frontier.push((child_id, depth + 1));
        }
    }

    Ok(out)
}
