use crate::{
    error::{CoreError, ErrorCode, ErrorOrigin},
    model::{
        envelope::{NameConflictPolicy, UpdateSpec},
        event::ChangeKind,
    },
    mutation::{
        MutationOutcome, naming,
        naming::{NameResolution, RenameSuffix},
        nodes,
    },
    registry::NodeTypeRegistry,
    store::WriteCtx,
};

/// Patch a node's fields and entity payload in place. A rename re-runs the
/// collision policy under the current parent.
pub fn update(
    registry: &NodeTypeRegistry,
    ctx: &mut WriteCtx<'_>,
    spec: &UpdateSpec,
    policy: NameConflictPolicy,
) -> Result<MutationOutcome, CoreError> {
    let before = nodes::require_node(&ctx.txn, spec.node_id)?;
    let def = registry.resolve(&before.node_type)?;

    if let Some(expected) = spec.expected_updated_at
        && before.updated_at != expected
    {
        return Err(CoreError::new(
            ErrorCode::VersionConflict,
            ErrorOrigin::Mutation,
            format!(
                "node {} was updated at {} (expected {expected})",
                before.id, before.updated_at
            ),
        )
        .with_node(before.id));
    }

    let mut outcome = MutationOutcome::new(before.tree_id);
    let mut node = before.clone();

    if let Some(name) = &spec.name
        && *name != node.name
    {
        if node.is_root() {
            return Err(CoreError::new(
                ErrorCode::NameValidationFailed,
                ErrorOrigin::Mutation,
                "root nodes cannot be renamed",
            )
            .with_node(node.id));
        }
        naming::validate_name(&def, name)?;

        let parent_id = node.parent_id.unwrap_or(node.id);
        let resolution = naming::resolve_name(
            &ctx.txn,
            node.tree_id,
            parent_id,
            name,
            policy,
            RenameSuffix::Numbered,
            Some(node.id),
        )?;
        if let NameResolution::Displace { displaced, .. } = &resolution {
            let purged = super::delete::purge_subtree(registry, ctx, *displaced)?;
            outcome.absorb(purged.events, purged.affected);
        }
        node.name = resolution.name().to_string();
    }

    if let Some(description) = &spec.description {
        node.description = if description.is_empty() {
            None
        } else {
            Some(description.clone())
        };
    }

    for validator in &def.validation.validators {
        validator(&node).map_err(|message| {
            CoreError::new(ErrorCode::NameValidationFailed, ErrorOrigin::Mutation, message)
                .with_node(node.id)
        })?;
    }

    if let Some(hook) = def.hooks.before_update {
        hook(ctx, &node)?;
    }

    if let Some(patch) = &spec.payload
        && def.handler.has_peer()
    {
        def.handler
            .update_entity(ctx, node.id, patch)
            .map_err(|err| err.with_node(node.id))?;
    }

    node.touch(ctx.now);
    nodes::write_node(&mut ctx.txn, Some(&before), &node)?;

    if let Some(hook) = def.hooks.after_update {
        hook(ctx, &node)?;
    }

    outcome.record(ChangeKind::NodeUpdated {
        node_id: node.id,
        parent_id: node.parent_id.unwrap_or(node.id),
    });

    Ok(outcome)
}
