use crate::{
    error::{CoreError, ErrorCode, ErrorOrigin},
    model::{
        envelope::{MoveSpec, NameConflictPolicy},
        event::ChangeKind,
    },
    mutation::{
        MutationOutcome, already_in_trash, naming,
        naming::{NameResolution, RenameSuffix},
        nodes, require_live_position, require_movable, require_parent,
    },
    registry::NodeTypeRegistry,
    store::WriteCtx,
};

/// Re-parent a batch of live nodes, in input order, inside one transaction.
/// A failure anywhere rolls the whole batch back.
pub fn move_nodes(
    registry: &NodeTypeRegistry,
    ctx: &mut WriteCtx<'_>,
    spec: &MoveSpec,
    policy: NameConflictPolicy,
) -> Result<MutationOutcome, CoreError> {
    let target = require_parent(&ctx.txn, spec.to_parent_id)?;
    require_live_position(&ctx.txn, &target, "target parent")?;

    let mut outcome = MutationOutcome::new(target.tree_id);
    for &node_id in &spec.node_ids {
        let before = nodes::require_node(&ctx.txn, node_id)?;
        require_movable(&before)?;

        if before.tree_id != target.tree_id {
            return Err(nodes::wrong_tree(node_id, target.tree_id, before.tree_id));
        }
        if before.is_trashed() {
            return Err(already_in_trash(node_id, "node"));
        }
        // Moving a node under itself or any of its descendants would detach
        // the subtree into a cycle.
        if nodes::is_self_or_ancestor(&ctx.txn, node_id, target.id)? {
            return Err(CoreError::new(
                ErrorCode::CycleDetected,
                ErrorOrigin::Mutation,
                format!("node {node_id} is an ancestor of target parent {}", target.id),
            )
            .with_node(node_id));
        }

        let resolution = naming::resolve_name(
            &ctx.txn,
            target.tree_id,
            target.id,
            &before.name,
            policy,
            RenameSuffix::Numbered,
            Some(node_id),
        )?;
        if let NameResolution::Displace { displaced, .. } = &resolution {
            let purged = super::delete::purge_subtree(registry, ctx, *displaced)?;
            outcome.absorb(purged.events, purged.affected);
        }

        let from_parent = before.parent_id.unwrap_or(before.id);
        let mut node = before.clone();
        node.parent_id = Some(target.id);
        node.name = resolution.name().to_string();
        node.touch(ctx.now);
        nodes::write_node(&mut ctx.txn, Some(&before), &node)?;

        outcome.record(ChangeKind::NodeMoved {
            node_id,
            from_parent_id: from_parent,
            to_parent_id: target.id,
            removed_at: None,
        });
    }

    Ok(outcome)
}
