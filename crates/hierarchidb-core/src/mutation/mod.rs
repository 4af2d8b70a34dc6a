// 1️⃣ Module declarations
pub(crate) mod naming;
pub(crate) mod nodes;

mod create;
mod delete;
mod duplicate;
mod move_nodes;
mod trash;
mod update;

// 2️⃣ Public re-exports
pub use create::create;
pub use delete::permanent_delete;
pub use duplicate::{duplicate_nodes, paste_nodes};
pub use move_nodes::move_nodes;
pub use naming::{NameResolution, NamingError, RenameSuffix};
pub use trash::{move_to_trash, recover_from_trash};
pub use update::update;

// 3️⃣ Internal imports
use crate::{
    error::{CoreError, ErrorCode, ErrorOrigin},
    model::{event::ChangeKind, node::TreeNode},
    store::Transaction,
    types::{NodeId, TreeId},
};

///
/// MutationOutcome
///
/// What one primitive mutation produced: the events to stamp and fan out
/// after commit, and the nodes a caller may want to inspect. All events of
/// one outcome belong to one tree.
///

#[derive(Clone, Debug)]
pub struct MutationOutcome {
    pub tree_id: TreeId,
    pub events: Vec<ChangeKind>,
    pub affected: Vec<NodeId>,
}

impl MutationOutcome {
    #[must_use]
    pub const fn new(tree_id: TreeId) -> Self {
        Self {
            tree_id,
            events: Vec::new(),
            affected: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, event: ChangeKind) {
        self.affected.push(event.node_id());
        self.events.push(event);
    }

    pub(crate) fn absorb(&mut self, events: Vec<ChangeKind>, affected: Vec<NodeId>) {
        self.events.extend(events);
        self.affected.extend(affected);
    }
}

// ---------------------------------------------------------------------
// Shared guards
// ---------------------------------------------------------------------

pub(crate) fn require_parent(
    txn: &Transaction<'_>,
    parent_id: NodeId,
) -> Result<TreeNode, CoreError> {
    nodes::read_node(txn, parent_id)?.ok_or_else(|| CoreError::parent_not_found(parent_id))
}

/// Roots are fixed topology; no mutation may move, rename, trash, or delete
/// them.
pub(crate) fn require_movable(node: &TreeNode) -> Result<(), CoreError> {
    if node.is_root() {
        return Err(CoreError::internal(
            ErrorOrigin::Mutation,
            format!("root node {} is immutable topology", node.id),
        )
        .with_node(node.id));
    }

    Ok(())
}

pub(crate) fn already_in_trash(node_id: NodeId, what: &str) -> CoreError {
    CoreError::new(
        ErrorCode::AlreadyInTrash,
        ErrorOrigin::Mutation,
        format!("{what} {node_id} is in the trash"),
    )
    .with_node(node_id)
}

/// A live-tree position: the node's chain must end at the live root.
pub(crate) fn require_live_position(
    txn: &Transaction<'_>,
    node: &TreeNode,
    what: &str,
) -> Result<(), CoreError> {
    let tree = nodes::read_tree(txn, node.tree_id)?;
    if nodes::is_in_live_tree(txn, &tree, node.id)? {
        Ok(())
    } else {
        Err(already_in_trash(node.id, what))
    }
}
