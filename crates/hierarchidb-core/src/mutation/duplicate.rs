use crate::{
    error::CoreError,
    model::{
        envelope::{DuplicateSpec, NameConflictPolicy},
        event::ChangeKind,
        node::TreeNode,
    },
    mutation::{
        MutationOutcome, naming,
        naming::{NameResolution, RenameSuffix},
        nodes, require_live_position, require_parent,
    },
    registry::NodeTypeRegistry,
    store::WriteCtx,
    types::NodeId,
};

/// Deep-copy subtrees under a new parent. New node ids throughout, relative
/// order preserved, relational references shared.
pub fn duplicate_nodes(
    registry: &NodeTypeRegistry,
    ctx: &mut WriteCtx<'_>,
    spec: &DuplicateSpec,
    policy: NameConflictPolicy,
) -> Result<MutationOutcome, CoreError> {
    copy_subtrees(registry, ctx, &spec.node_ids, spec.to_parent_id, policy, false)
}

/// Paste the view clipboard under a new parent. A cut clipboard deletes the
/// sources inside the same transaction, completing the move.
pub fn paste_nodes(
    registry: &NodeTypeRegistry,
    ctx: &mut WriteCtx<'_>,
    clipboard_nodes: &[NodeId],
    cut: bool,
    to_parent_id: NodeId,
    policy: NameConflictPolicy,
) -> Result<MutationOutcome, CoreError> {
    copy_subtrees(registry, ctx, clipboard_nodes, to_parent_id, policy, cut)
}

fn copy_subtrees(
    registry: &NodeTypeRegistry,
    ctx: &mut WriteCtx<'_>,
    sources: &[NodeId],
    to_parent_id: NodeId,
    policy: NameConflictPolicy,
    delete_sources: bool,
) -> Result<MutationOutcome, CoreError> {
    let target = require_parent(&ctx.txn, to_parent_id)?;
    require_live_position(&ctx.txn, &target, "target parent")?;

    let mut outcome = MutationOutcome::new(target.tree_id);
    for &source_id in sources {
        let source = nodes::require_node(&ctx.txn, source_id)?;
        if source.tree_id != target.tree_id {
            return Err(nodes::wrong_tree(source_id, target.tree_id, source.tree_id));
        }

        // Top-level copies resolve against the target's children with the
        // provenance suffix; descendants keep their names, unique within
        // the fresh subtree by construction.
        let resolution = naming::resolve_name(
            &ctx.txn,
            target.tree_id,
            target.id,
            &source.name,
            policy,
            RenameSuffix::Copy,
            None,
        )?;
        if let NameResolution::Displace { displaced, .. } = &resolution {
            let purged = super::delete::purge_subtree(registry, ctx, *displaced)?;
            outcome.absorb(purged.events, purged.affected);
        }

        copy_one_subtree(
            registry,
            ctx,
            &source,
            target.id,
            resolution.name().to_string(),
            &mut outcome,
        )?;
    }

    if delete_sources {
        for &source_id in sources {
            let purged = super::delete::purge_subtree(registry, ctx, source_id)?;
            outcome.absorb(purged.events, purged.affected);
        }
    }

    Ok(outcome)
}

fn copy_one_subtree(
    registry: &NodeTypeRegistry,
    ctx: &mut WriteCtx<'_>,
    source_root: &TreeNode,
    target_parent: NodeId,
    root_name: String,
    outcome: &mut MutationOutcome,
) -> Result<(), CoreError> {
    // Snapshot before writing: copies landing inside the source subtree
    // must not be re-discovered and copied again.
    let subtree = nodes::collect_subtree(&ctx.txn, source_root.id)?;
    let mut copied_parent: std::collections::BTreeMap<NodeId, NodeId> = std::collections::BTreeMap::new();

    for source in subtree {
        let def = registry.resolve(&source.node_type)?;
        let (parent_id, name) = if source.id == source_root.id {
            (target_parent, root_name.clone())
        } else {
            let source_parent = source.parent_id.unwrap_or(source.id);
            let mapped = *copied_parent.get(&source_parent).ok_or_else(|| {
                crate::error::CoreError::internal(
                    crate::error::ErrorOrigin::Mutation,
                    format!("subtree copy lost parent mapping for {source_parent}"),
                )
            })?;
            (mapped, source.name.clone())
        };

        let copy = TreeNode {
            id: NodeId::from_ulid(ctx.next_id()?),
            tree_id: source.tree_id,
            parent_id: Some(parent_id),
            node_type: source.node_type.clone(),
            name,
            description: source.description.clone(),
            created_at: ctx.now,
            updated_at: ctx.now,
            version: 1,
            removed_at: None,
            original_parent_id: None,
        };

        nodes::write_node(&mut ctx.txn, None, &copy)?;
        def.handler
            .duplicate(ctx, source.id, copy.id)
            .map_err(|err| err.with_node(copy.id))?;

        copied_parent.insert(source.id, copy.id);
        outcome.record(ChangeKind::NodeCreated {
            node_id: copy.id,
            parent_id,
        });
    }

    Ok(())
}
