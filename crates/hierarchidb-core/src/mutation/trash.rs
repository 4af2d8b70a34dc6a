use crate::{
    error::{CoreError, ErrorCode, ErrorOrigin},
    model::{
        envelope::{NameConflictPolicy, NodeSetSpec, RecoverSpec},
        event::ChangeKind,
    },
    mutation::{
        MutationOutcome, already_in_trash, naming,
        naming::{NameResolution, RenameSuffix},
        nodes, require_movable,
    },
    registry::NodeTypeRegistry,
    store::WriteCtx,
    types::NodeId,
};

/// Re-parent nodes under their tree's trash root, stamping the removal
/// metadata. Descendants ride along untouched, keeping their relative
/// structure.
pub fn move_to_trash(
    _registry: &NodeTypeRegistry,
    ctx: &mut WriteCtx<'_>,
    spec: &NodeSetSpec,
) -> Result<MutationOutcome, CoreError> {
    let mut outcome: Option<MutationOutcome> = None;

    for &node_id in &spec.node_ids {
        let before = nodes::require_node(&ctx.txn, node_id)?;
        require_movable(&before)?;

        let tree = nodes::read_tree(&ctx.txn, before.tree_id)?;
        if !nodes::is_in_live_tree(&ctx.txn, &tree, node_id)? {
            return Err(already_in_trash(node_id, "node"));
        }

        if let Some(existing) = &outcome
            && existing.tree_id != before.tree_id
        {
            return Err(nodes::wrong_tree(node_id, existing.tree_id, before.tree_id));
        }
        let outcome = outcome.get_or_insert_with(|| MutationOutcome::new(before.tree_id));

        // Collisions under the trash root never abort a trashing; they
        // auto-rename regardless of the command policy.
        let resolution = naming::resolve_name(
            &ctx.txn,
            before.tree_id,
            tree.trash_root_id,
            &before.name,
            NameConflictPolicy::AutoRename,
            RenameSuffix::Numbered,
            Some(node_id),
        )?;

        let from_parent = before.parent_id.unwrap_or(before.id);
        let mut node = before.clone();
        node.original_parent_id = node.parent_id;
        node.parent_id = Some(tree.trash_root_id);
        node.name = resolution.name().to_string();
        node.removed_at = Some(ctx.now);
        node.touch(ctx.now);
        nodes::write_node(&mut ctx.txn, Some(&before), &node)?;

        outcome.record(ChangeKind::NodeMoved {
            node_id,
            from_parent_id: from_parent,
            to_parent_id: tree.trash_root_id,
            removed_at: Some(ctx.now),
        });
    }

    Ok(outcome.unwrap_or_else(|| MutationOutcome::new(crate::types::TreeId::nil())))
}

/// Bring trashed nodes back into the live tree: the explicit target, the
/// remembered original parent when it is still live, or the live root.
pub fn recover_from_trash(
    _registry: &NodeTypeRegistry,
    ctx: &mut WriteCtx<'_>,
    spec: &RecoverSpec,
    policy: NameConflictPolicy,
) -> Result<MutationOutcome, CoreError> {
    let mut outcome: Option<MutationOutcome> = None;

    for &node_id in &spec.node_ids {
        let before = nodes::require_node(&ctx.txn, node_id)?;
        if !before.is_trashed() {
            return Err(CoreError::new(
                ErrorCode::NotInTrash,
                ErrorOrigin::Mutation,
                format!("node {node_id} is not in the trash"),
            )
            .with_node(node_id));
        }

        let tree = nodes::read_tree(&ctx.txn, before.tree_id)?;
        let target_id = resolve_recovery_target(ctx, &tree, &before, spec.to_parent_id)?;

        if let Some(existing) = &outcome
            && existing.tree_id != before.tree_id
        {
            return Err(nodes::wrong_tree(node_id, existing.tree_id, before.tree_id));
        }
        let outcome = outcome.get_or_insert_with(|| MutationOutcome::new(before.tree_id));

        let resolution = naming::resolve_name(
            &ctx.txn,
            before.tree_id,
            target_id,
            &before.name,
            policy,
            RenameSuffix::Numbered,
            Some(node_id),
        )?;
        if let NameResolution::Displace { displaced, .. } = &resolution {
            let purged =
                super::delete::purge_subtree(_registry, ctx, *displaced)?;
            outcome.absorb(purged.events, purged.affected);
        }

        let from_parent = before.parent_id.unwrap_or(before.id);
        let mut node = before.clone();
        node.parent_id = Some(target_id);
        node.name = resolution.name().to_string();
        node.removed_at = None;
        node.original_parent_id = None;
        // relocation back to the live tree; the content version is unchanged
        if ctx.now.as_millis() > node.updated_at.as_millis() {
            node.updated_at = ctx.now;
        }
        nodes::write_node(&mut ctx.txn, Some(&before), &node)?;

        outcome.record(ChangeKind::NodeRestored {
            node_id,
            from_parent_id: from_parent,
            to_parent_id: target_id,
        });
    }

    Ok(outcome.unwrap_or_else(|| MutationOutcome::new(crate::types::TreeId::nil())))
}

fn resolve_recovery_target(
    ctx: &WriteCtx<'_>,
    tree: &crate::model::tree::Tree,
    node: &crate::model::node::TreeNode,
    explicit: Option<NodeId>,
) -> Result<NodeId, CoreError> {
    if let Some(target_id) = explicit {
        let target = nodes::read_node(&ctx.txn, target_id)?
            .ok_or_else(|| CoreError::parent_not_found(target_id))?;
        if target.tree_id != node.tree_id {
            return Err(nodes::wrong_tree(target_id, node.tree_id, target.tree_id));
        }
        if !nodes::is_in_live_tree(&ctx.txn, tree, target_id)? {
            return Err(CoreError::parent_not_found(target_id));
        }

        return Ok(target_id);
    }

    if let Some(original) = node.original_parent_id
        && nodes::read_node(&ctx.txn, original)?.is_some()
        && nodes::is_in_live_tree(&ctx.txn, tree, original)?
    {
        return Ok(original);
    }

    Ok(tree.live_root_id)
}
