use crate::{
    error::{CoreError, ErrorCode, ErrorOrigin},
    model::{
        envelope::{
            CommitWorkingCopySpec, CreateDraftSpec, CreateSpec, CreateWorkingCopySpec,
            NameConflictPolicy, WorkingCopyRefSpec,
        },
        event::ChangeKind,
        working_copy::{WorkingCopy, WorkingCopyMode},
    },
    mutation::{self, MutationOutcome, NameResolution, RenameSuffix, naming, nodes},
    registry::NodeTypeRegistry,
    schema,
    store::{Transaction, WriteCtx, decode_row, encode_row},
    types::{NodeId, Timestamp, ViewId, WorkingCopyId},
    value::Value,
};
use thiserror::Error as ThisError;

///
/// WorkingCopyError
///

#[derive(Debug, ThisError)]
pub enum WorkingCopyError {
    #[error("working copy not found: {0}")]
    NotFound(WorkingCopyId),

    #[error("a working copy for node {node} already exists in view {view}")]
    Exists { node: NodeId, view: ViewId },

    #[error("working copy {id} is a {mode:?} draft; wrong commit flow")]
    WrongMode { id: WorkingCopyId, mode: WorkingCopyMode },

    #[error("working copy {id} is stale: source moved to {current}")]
    Stale { id: WorkingCopyId, current: Timestamp },
}

impl WorkingCopyError {
    const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NodeNotFound,
            Self::Exists { .. } => ErrorCode::WorkingCopyExists,
            Self::WrongMode { .. } => ErrorCode::Internal,
            Self::Stale { .. } => ErrorCode::VersionConflict,
        }
    }
}

impl From<WorkingCopyError> for CoreError {
    fn from(err: WorkingCopyError) -> Self {
        Self::new(err.code(), ErrorOrigin::WorkingCopy, err.to_string())
    }
}

// ---------------------------------------------------------------------
// Row access
// ---------------------------------------------------------------------

pub(crate) fn read_working_copy(
    txn: &Transaction<'_>,
    id: WorkingCopyId,
) -> Result<Option<WorkingCopy>, CoreError> {
    match txn.get(schema::WORKING_COPIES_TABLE, &id.to_bytes()) {
        Some(bytes) => Ok(Some(decode_row(&bytes)?)),
        None => Ok(None),
    }
}

fn require_working_copy(
    txn: &Transaction<'_>,
    id: WorkingCopyId,
) -> Result<WorkingCopy, CoreError> {
    read_working_copy(txn, id)?.ok_or_else(|| WorkingCopyError::NotFound(id).into())
}

fn write_working_copy(ctx: &mut WriteCtx<'_>, wc: &WorkingCopy) -> Result<(), CoreError> {
    let bytes = encode_row(wc)?;
    ctx.txn
        .put(schema::WORKING_COPIES_TABLE, &wc.id.to_bytes(), bytes);
    if let Some(source) = wc.source_node_id {
        ctx.txn.put(
            schema::WORKING_COPIES_BY_SOURCE,
            &schema::working_copy_source_key(source, wc.view_id),
            wc.id.to_bytes().to_vec(),
        );
    }

    Ok(())
}

fn delete_working_copy_row(ctx: &mut WriteCtx<'_>, wc: &WorkingCopy) {
    ctx.txn.delete(schema::WORKING_COPIES_TABLE, &wc.id.to_bytes());
    if let Some(source) = wc.source_node_id {
        ctx.txn.delete(
            schema::WORKING_COPIES_BY_SOURCE,
            &schema::working_copy_source_key(source, wc.view_id),
        );
    }
}

// ---------------------------------------------------------------------
// Edit-existing flow
// ---------------------------------------------------------------------

/// Snapshot a node and its peer entity into an isolated draft. The draft
/// never surfaces in live-tree queries; only commit does.
pub fn create_working_copy(
    registry: &NodeTypeRegistry,
    ctx: &mut WriteCtx<'_>,
    spec: &CreateWorkingCopySpec,
    view_id: ViewId,
) -> Result<WorkingCopy, CoreError> {
    let source = nodes::require_node(&ctx.txn, spec.source_node_id)?;
    let def = registry.resolve(&source.node_type)?;

    // (sourceNodeId, viewId) is unique: a second racing caller fails here.
    let slot = schema::working_copy_source_key(source.id, view_id);
    if ctx.txn.exists(schema::WORKING_COPIES_BY_SOURCE, &slot) {
        return Err(WorkingCopyError::Exists {
            node: source.id,
            view: view_id,
        }
        .into());
    }

    let draft_payload = def.handler.working_copy_payload(&ctx.txn, source.id)?;
    let wc = WorkingCopy {
        id: spec.working_copy_id,
        mode: WorkingCopyMode::Edit,
        tree_id: source.tree_id,
        node_type: source.node_type.clone(),
        view_id,
        source_node_id: Some(source.id),
        parent_node_id: None,
        expected_updated_at: Some(source.updated_at),
        draft_name: source.name.clone(),
        draft_description: source.description.clone(),
        draft_payload,
        dirty: false,
        created_at: ctx.now,
    };
    write_working_copy(ctx, &wc)?;

    Ok(wc)
}

/// Stage edits onto a draft. Pure working-copy-table mutation; the live
/// tree is untouched.
pub fn update_working_copy(
    ctx: &mut WriteCtx<'_>,
    id: WorkingCopyId,
    name: Option<String>,
    description: Option<String>,
    payload: Option<Value>,
) -> Result<WorkingCopy, CoreError> {
    let mut wc = require_working_copy(&ctx.txn, id)?;

    if let Some(name) = name {
        wc.draft_name = name;
    }
    if let Some(description) = description {
        wc.draft_description = if description.is_empty() {
            None
        } else {
            Some(description)
        };
    }
    if let Some(payload) = payload {
        let mut draft = wc.draft_payload.take().unwrap_or_else(Value::map);
        crate::value::merge_patch(&mut draft, &payload);
        wc.draft_payload = Some(draft);
    }
    wc.dirty = true;
    write_working_copy(ctx, &wc)?;

    Ok(wc)
}

/// Commit an edit draft back onto its source node and entity, atomically
/// with the draft's deletion. Emits exactly one `node-updated`.
pub fn commit_working_copy(
    registry: &NodeTypeRegistry,
    ctx: &mut WriteCtx<'_>,
    spec: &CommitWorkingCopySpec,
    policy: NameConflictPolicy,
) -> Result<MutationOutcome, CoreError> {
    let wc = require_working_copy(&ctx.txn, spec.working_copy_id)?;
    if !wc.is_edit() {
        return Err(WorkingCopyError::WrongMode {
            id: wc.id,
            mode: wc.mode,
        }
        .into());
    }

    let source_id = wc.source_node_id.ok_or_else(|| {
        CoreError::internal(ErrorOrigin::WorkingCopy, "edit draft without a source node")
    })?;
    let before = nodes::require_node(&ctx.txn, source_id)?;
    let def = registry.resolve(&before.node_type)?;

    // the envelope's expectation wins over the snapshot taken at draft time
    let expected = spec.expected_updated_at.or(wc.expected_updated_at);
    if let Some(expected) = expected
        && before.updated_at != expected
    {
        return Err(WorkingCopyError::Stale {
            id: wc.id,
            current: before.updated_at,
        }
        .into());
    }

    let mut outcome = MutationOutcome::new(before.tree_id);
    let mut node = before.clone();

    if wc.draft_name != node.name {
        naming::validate_name(&def, &wc.draft_name)?;
        let parent_id = node.parent_id.unwrap_or(node.id);
        let resolution = naming::resolve_name(
            &ctx.txn,
            node.tree_id,
            parent_id,
            &wc.draft_name,
            policy,
            RenameSuffix::Numbered,
            Some(node.id),
        )?;
        if let NameResolution::Displace { displaced, .. } = &resolution {
            let purged = mutation::permanent_delete(
                registry,
                ctx,
                &crate::model::envelope::NodeSetSpec {
                    node_ids: vec![*displaced],
                },
            )?;
            outcome.absorb(purged.events, purged.affected);
        }
        node.name = resolution.name().to_string();
    }
    node.description = wc.draft_description.clone();

    def.handler
        .apply_working_copy(ctx, node.id, wc.draft_payload.as_ref(), None)
        .map_err(|err| err.with_node(node.id))?;

    node.touch(ctx.now);
    nodes::write_node(&mut ctx.txn, Some(&before), &node)?;
    delete_working_copy_row(ctx, &wc);

    outcome.record(ChangeKind::NodeUpdated {
        node_id: node.id,
        parent_id: node.parent_id.unwrap_or(node.id),
    });

    Ok(outcome)
}

/// Drop a draft without touching the live tree. Covers both modes.
pub fn discard_working_copy(
    ctx: &mut WriteCtx<'_>,
    spec: &WorkingCopyRefSpec,
) -> Result<(), CoreError> {
    let wc = require_working_copy(&ctx.txn, spec.working_copy_id)?;
    delete_working_copy_row(ctx, &wc);

    Ok(())
}

// ---------------------------------------------------------------------
// Create-new flow
// ---------------------------------------------------------------------

/// Allocate a draft for a node that does not exist yet. Nothing
/// materialises under the parent until commit.
pub fn create_working_copy_for_create(
    registry: &NodeTypeRegistry,
    ctx: &mut WriteCtx<'_>,
    spec: &CreateDraftSpec,
    view_id: ViewId,
) -> Result<WorkingCopy, CoreError> {
    let def = registry.resolve(&spec.node_type)?;
    let parent = mutation::require_parent(&ctx.txn, spec.parent_node_id)?;
    naming::validate_name(&def, &spec.name)?;

    let wc = WorkingCopy {
        id: spec.working_copy_id,
        mode: WorkingCopyMode::Create,
        tree_id: parent.tree_id,
        node_type: spec.node_type.clone(),
        view_id,
        source_node_id: None,
        parent_node_id: Some(parent.id),
        expected_updated_at: None,
        draft_name: spec.name.clone(),
        draft_description: spec.description.clone(),
        draft_payload: spec.payload.clone(),
        dirty: false,
        created_at: ctx.now,
    };
    write_working_copy(ctx, &wc)?;

    Ok(wc)
}

/// Materialise a create draft through the mutation service, atomically
/// with the draft's deletion. Emits exactly one `node-created`.
pub fn commit_working_copy_for_create(
    registry: &NodeTypeRegistry,
    ctx: &mut WriteCtx<'_>,
    spec: &WorkingCopyRefSpec,
    policy: NameConflictPolicy,
) -> Result<(MutationOutcome, NodeId), CoreError> {
    let wc = require_working_copy(&ctx.txn, spec.working_copy_id)?;
    if wc.is_edit() {
        return Err(WorkingCopyError::WrongMode {
            id: wc.id,
            mode: wc.mode,
        }
        .into());
    }

    let parent_node_id = wc.parent_node_id.ok_or_else(|| {
        CoreError::internal(ErrorOrigin::WorkingCopy, "create draft without a parent node")
    })?;
    let create_spec = CreateSpec {
        parent_id: parent_node_id,
        node_type: wc.node_type.clone(),
        name: wc.draft_name.clone(),
        description: wc.draft_description.clone(),
        payload: wc.draft_payload.clone(),
    };

    let created = mutation::create(registry, ctx, &create_spec, policy)?;
    delete_working_copy_row(ctx, &wc);

    Ok(created)
}

// ---------------------------------------------------------------------
// TTL sweep
// ---------------------------------------------------------------------

/// Discard drafts older than the configured TTL. Runs at init so a crashed
/// process never leaks in-flight drafts forever.
pub fn sweep_expired(
    ctx: &mut WriteCtx<'_>,
    ttl_ms: u64,
) -> Result<Vec<WorkingCopyId>, CoreError> {
    let rows = ctx.txn.scan_prefix(schema::WORKING_COPIES_TABLE, &[]);
    let mut swept = Vec::new();

    for (_, bytes) in rows {
        let wc: WorkingCopy = decode_row(&bytes)?;
        if wc.age_ms(ctx.now) > ttl_ms {
            delete_working_copy_row(ctx, &wc);
            swept.push(wc.id);
        }
    }

    Ok(swept)
}
