use crate::{
    error::{CoreError, ErrorCode, ErrorOrigin},
    model::{envelope::{CreateSpec, NameConflictPolicy}, event::ChangeKind, node::TreeNode},
    mutation::{
        MutationOutcome, naming,
        naming::{NameResolution, RenameSuffix},
        nodes, require_live_position, require_parent,
    },
    registry::NodeTypeRegistry,
    store::WriteCtx,
    types::NodeId,
};

/// Create one node with its peer entity under a live parent.
pub fn create(
    registry: &NodeTypeRegistry,
    ctx: &mut WriteCtx<'_>,
    spec: &CreateSpec,
    policy: NameConflictPolicy,
) -> Result<(MutationOutcome, NodeId), CoreError> {
    let def = registry.resolve(&spec.node_type)?;
    let parent = require_parent(&ctx.txn, spec.parent_id)?;
    require_live_position(&ctx.txn, &parent, "parent")?;

    naming::validate_name(&def, &spec.name)?;

    // max_children is a rule of the parent's type
    let parent_def = registry.resolve(&parent.node_type)?;
    if let Some(max) = parent_def.validation.max_children {
        let count = nodes::child_count(&ctx.txn, parent.tree_id, parent.id);
        if count >= u64::from(max) {
            return Err(CoreError::new(
                ErrorCode::NameValidationFailed,
                ErrorOrigin::Mutation,
                format!("parent {} is full ({max} children max)", parent.id),
            )
            .with_node(parent.id));
        }
    }

    let mut outcome = MutationOutcome::new(parent.tree_id);
    let resolution = naming::resolve_name(
        &ctx.txn,
        parent.tree_id,
        parent.id,
        &spec.name,
        policy,
        RenameSuffix::Numbered,
        None,
    )?;
    if let NameResolution::Displace { displaced, .. } = &resolution {
        let purged = super::delete::purge_subtree(registry, ctx, *displaced)?;
        outcome.absorb(purged.events, purged.affected);
    }

    let node = TreeNode {
        id: NodeId::from_ulid(ctx.next_id()?),
        tree_id: parent.tree_id,
        parent_id: Some(parent.id),
        node_type: spec.node_type.clone(),
        name: resolution.name().to_string(),
        description: spec.description.clone(),
        created_at: ctx.now,
        updated_at: ctx.now,
        version: 1,
        removed_at: None,
        original_parent_id: None,
    };

    for validator in &def.validation.validators {
        validator(&node).map_err(|message| {
            CoreError::new(ErrorCode::NameValidationFailed, ErrorOrigin::Mutation, message)
                .with_node(node.id)
        })?;
    }

    if let Some(hook) = def.hooks.before_create {
        hook(ctx, &node)?;
    }

    nodes::write_node(&mut ctx.txn, None, &node)?;
    def.handler
        .create_entity(ctx, node.id, spec.payload.as_ref())
        .map_err(|err| err.with_node(node.id))?;

    if let Some(hook) = def.hooks.after_create {
        hook(ctx, &node)?;
    }

    outcome.record(ChangeKind::NodeCreated {
        node_id: node.id,
        parent_id: parent.id,
    });

    Ok((outcome, node.id))
}
