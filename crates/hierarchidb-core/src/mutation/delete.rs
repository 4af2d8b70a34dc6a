use crate::{
    error::CoreError,
    model::{envelope::NodeSetSpec, event::ChangeKind},
    mutation::{MutationOutcome, nodes, require_movable},
    registry::NodeTypeRegistry,
    schema,
    store::WriteCtx,
    types::NodeId,
};

/// Purge one subtree: entities, working copies, node rows, in
/// children-before-parent order. Shared by permanent delete and the
/// overwrite collision policy.
pub(crate) fn purge_subtree(
    registry: &NodeTypeRegistry,
    ctx: &mut WriteCtx<'_>,
    root: NodeId,
) -> Result<MutationOutcome, CoreError> {
    let top = nodes::require_node(&ctx.txn, root)?;
    require_movable(&top)?;

    let mut outcome = MutationOutcome::new(top.tree_id);
    let subtree = nodes::collect_subtree(&ctx.txn, root)?;

    // depth-first collection, reversed: leaves go first
    for node in subtree.iter().rev() {
        let def = registry.resolve(&node.node_type)?;

        if let Some(hook) = def.hooks.before_delete {
            hook(ctx, node)?;
        }

        def.handler
            .cleanup(ctx, node.id)
            .map_err(|err| err.with_node(node.id))?;
        def.handler
            .delete_entity(ctx, node.id)
            .map_err(|err| err.with_node(node.id))?;
        discard_working_copies_of(ctx, node.id);
        nodes::delete_node_row(&mut ctx.txn, node);

        if let Some(hook) = def.hooks.after_delete {
            hook(ctx, node)?;
        }

        outcome.record(ChangeKind::NodeDeleted {
            node_id: node.id,
            parent_id: node.parent_id.unwrap_or(node.id),
        });
    }

    Ok(outcome)
}

/// Remove nodes and their subtrees permanently, cascading entities and
/// releasing shared references.
pub fn permanent_delete(
    registry: &NodeTypeRegistry,
    ctx: &mut WriteCtx<'_>,
    spec: &NodeSetSpec,
) -> Result<MutationOutcome, CoreError> {
    let mut outcome: Option<MutationOutcome> = None;

    for &node_id in &spec.node_ids {
        let purged = purge_subtree(registry, ctx, node_id)?;

        if let Some(existing) = &mut outcome {
            if existing.tree_id != purged.tree_id {
                return Err(nodes::wrong_tree(node_id, existing.tree_id, purged.tree_id));
            }
            existing.absorb(purged.events, purged.affected);
        } else {
            outcome = Some(purged);
        }
    }

    Ok(outcome.unwrap_or_else(|| MutationOutcome::new(crate::types::TreeId::nil())))
}

// Any working copy drafted from a deleted node dies with it.
fn discard_working_copies_of(ctx: &mut WriteCtx<'_>, node_id: NodeId) {
    let entries: Vec<(Vec<u8>, Vec<u8>)> = ctx.txn.scan_prefix(
        schema::WORKING_COPIES_BY_SOURCE,
        &node_id.to_bytes(),
    );

    for (index_key, wc_id_bytes) in entries {
        ctx.txn.delete(schema::WORKING_COPIES_TABLE, &wc_id_bytes);
        ctx.txn.delete(schema::WORKING_COPIES_BY_SOURCE, &index_key);
    }
}
