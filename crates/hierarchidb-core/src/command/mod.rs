// 1️⃣ Module declarations
pub mod broadcast;
pub mod history;

// 2️⃣ Public re-exports
pub use broadcast::{BroadcastChannel, MemoryBroadcast, NoopBroadcast, PeerMessage};
pub use history::UndoGroup;

// 3️⃣ Internal imports
use crate::{
    error::{CoreError, ErrorCode, ErrorOrigin},
    model::{
        envelope::{Command, CommandEnvelope, NameConflictPolicy},
        event::{ChangeEvent, ChangeKind},
    },
    mutation::{self, MutationOutcome},
    obs::{ObsEvent, ObsSink},
    registry::NodeTypeRegistry,
    schema,
    store::{KvBackend, WriteCtx, read_meta_u64, write_meta_u64},
    types::{IdGenerator, NodeId, Timestamp, TreeId, ViewId},
    value::Value,
    working_copy,
};
use std::cell::RefCell;

///
/// PipelineDeps
///
/// Everything one dispatch needs, borrowed from the core context. A fresh
/// value is built per command so `now` is a single consistent reading.
///

pub struct PipelineDeps<'a> {
    pub backend: &'a dyn KvBackend,
    pub registry: &'a NodeTypeRegistry,
    pub ids: &'a RefCell<IdGenerator>,
    pub now: Timestamp,
    pub history_capacity: usize,
    pub obs: &'a dyn ObsSink,
}

///
/// ClipboardSnapshot
///
/// The per-view clipboard at dispatch time. `cut` pastes delete their
/// sources inside the paste transaction.
///

#[derive(Clone, Debug)]
pub struct ClipboardSnapshot {
    pub node_ids: Vec<NodeId>,
    pub cut: bool,
}

///
/// CommandResponse
///
/// The structured result every mutation returns across the RPC boundary.
/// Expected failures are codes, never exceptions.
///

#[derive(Clone, Debug)]
pub struct CommandResponse {
    pub success: bool,
    pub code: Option<ErrorCode>,
    pub message: Option<String>,
    pub affected_node_ids: Vec<NodeId>,
}

impl CommandResponse {
    #[must_use]
    pub const fn ok(affected_node_ids: Vec<NodeId>) -> Self {
        Self {
            success: true,
            code: None,
            message: None,
            affected_node_ids,
        }
    }

    #[must_use]
    pub fn failure(err: &CoreError) -> Self {
        Self {
            success: false,
            code: Some(err.code),
            message: Some(err.message.clone()),
            affected_node_ids: err.node_id.into_iter().collect(),
        }
    }
}

///
/// DispatchOutcome
///

#[derive(Clone, Debug)]
pub struct DispatchOutcome {
    pub response: CommandResponse,
    /// Committed, sequence-stamped events, ready for fan-out and broadcast.
    pub events: Vec<ChangeEvent>,
    /// Set by the create flows so callers can address the new node.
    pub created_node_id: Option<NodeId>,
    /// True when a cut clipboard was consumed by a paste.
    pub consumed_clipboard: bool,
}

/// Decode an envelope from a structured-clone value, separating "malformed"
/// from "well-formed but unknown kind".
pub fn decode_envelope(value: &Value) -> Result<CommandEnvelope, CoreError> {
    let bytes = value
        .canonical_bytes()
        .map_err(|err| CoreError::new(ErrorCode::InvalidEnvelope, ErrorOrigin::Command, err.to_string()))?;

    serde_cbor::from_slice(&bytes).map_err(|err| {
        let message = err.to_string();
        let code = if message.contains("unknown variant") {
            ErrorCode::UnknownCommandKind
        } else {
            ErrorCode::InvalidEnvelope
        };

        CoreError::new(code, ErrorOrigin::Command, message)
    })
}

fn validate_envelope(envelope: &CommandEnvelope) -> Result<(), CoreError> {
    if envelope.command_id.as_ulid().is_nil() || envelope.group_id.as_ulid().is_nil() {
        return Err(CoreError::new(
            ErrorCode::InvalidEnvelope,
            ErrorOrigin::Command,
            "command and group ids must be non-nil",
        ));
    }

    Ok(())
}

/// Run one envelope end-to-end: validate, dispatch, stamp sequences,
/// append the undo group, commit, and hand back the stamped events.
pub fn dispatch(
    deps: &PipelineDeps<'_>,
    envelope: &CommandEnvelope,
    policy: NameConflictPolicy,
    clipboard: Option<&ClipboardSnapshot>,
) -> DispatchOutcome {
    deps.obs.record(ObsEvent::CommandDispatched {
        kind: envelope.command.label(),
    });

    let result = if let Err(err) = validate_envelope(envelope) {
        Err(err)
    } else if envelope.command.is_history() {
        run_history(deps, envelope)
    } else {
        run_mutation(deps, envelope, policy, clipboard)
    };

    match result {
        Ok(outcome) => outcome,
        Err(err) => {
            deps.obs.record(ObsEvent::CommandFailed {
                kind: envelope.command.label(),
                code: err.code,
            });

            DispatchOutcome {
                response: CommandResponse::failure(&err),
                events: Vec::new(),
                created_node_id: None,
                consumed_clipboard: false,
            }
        }
    }
}

fn run_mutation(
    deps: &PipelineDeps<'_>,
    envelope: &CommandEnvelope,
    policy: NameConflictPolicy,
    clipboard: Option<&ClipboardSnapshot>,
) -> Result<DispatchOutcome, CoreError> {
    let mut ctx = WriteCtx::new(deps.backend, deps.now, deps.ids);
    let mut created_node_id = None;
    let mut consumed_clipboard = false;

    let outcome: Option<MutationOutcome> = match &envelope.command {
        Command::Create(spec) => {
            let (outcome, node_id) = mutation::create(deps.registry, &mut ctx, spec, policy)?;
            created_node_id = Some(node_id);
            Some(outcome)
        }
        Command::Update(spec) => Some(mutation::update(deps.registry, &mut ctx, spec, policy)?),
        Command::MoveNodes(spec) => {
            Some(mutation::move_nodes(deps.registry, &mut ctx, spec, policy)?)
        }
        Command::MoveToTrash(spec) => {
            Some(mutation::move_to_trash(deps.registry, &mut ctx, spec)?)
        }
        Command::RecoverFromTrash(spec) => Some(mutation::recover_from_trash(
            deps.registry,
            &mut ctx,
            spec,
            policy,
        )?),
        Command::PermanentDelete(spec) => {
            Some(mutation::permanent_delete(deps.registry, &mut ctx, spec)?)
        }
        Command::DuplicateNodes(spec) => Some(mutation::duplicate_nodes(
            deps.registry,
            &mut ctx,
            spec,
            policy,
        )?),
        Command::PasteNodes(spec) => {
            let clipboard = clipboard.ok_or_else(|| {
                CoreError::new(
                    ErrorCode::InvalidEnvelope,
                    ErrorOrigin::Command,
                    "paste with an empty clipboard",
                )
            })?;
            let outcome = mutation::paste_nodes(
                deps.registry,
                &mut ctx,
                &clipboard.node_ids,
                clipboard.cut,
                spec.to_parent_id,
                policy,
            )?;
            consumed_clipboard = clipboard.cut;
            Some(outcome)
        }
        Command::CreateWorkingCopy(spec) => {
            working_copy::create_working_copy(deps.registry, &mut ctx, spec, envelope.source_view_id)?;
            None
        }
        Command::CommitWorkingCopy(spec) => Some(working_copy::commit_working_copy(
            deps.registry,
            &mut ctx,
            spec,
            policy,
        )?),
        Command::DiscardWorkingCopy(spec) | Command::DiscardWorkingCopyForCreate(spec) => {
            working_copy::discard_working_copy(&mut ctx, spec)?;
            None
        }
        Command::CreateWorkingCopyForCreate(spec) => {
            working_copy::create_working_copy_for_create(
                deps.registry,
                &mut ctx,
                spec,
                envelope.source_view_id,
            )?;
            None
        }
        Command::CommitWorkingCopyForCreate(spec) => {
            let (outcome, node_id) = working_copy::commit_working_copy_for_create(
                deps.registry,
                &mut ctx,
                spec,
                policy,
            )?;
            created_node_id = Some(node_id);
            Some(outcome)
        }
        Command::Undo(_) | Command::Redo(_) | Command::ClearHistory(_) => unreachable!(),
    };

    let (events, affected) = match outcome {
        Some(outcome) if !outcome.events.is_empty() => {
            let events = stamp_events(&mut ctx, outcome.tree_id, outcome.events)?;
            let images = ctx.txn.row_images(schema::is_domain_table);
            history::append(
                &mut ctx.txn,
                outcome.tree_id,
                UndoGroup {
                    group_id: envelope.group_id,
                    label: envelope.command.label().to_string(),
                    images,
                    events: events.iter().map(|event| event.kind.clone()).collect(),
                    created_at: deps.now,
                },
                deps.history_capacity,
            )?;

            (events, outcome.affected)
        }
        Some(outcome) => (Vec::new(), outcome.affected),
        None => (Vec::new(), Vec::new()),
    };

    commit_ctx(deps, ctx)?;
    if !events.is_empty() {
        deps.obs.record(ObsEvent::EventsEmitted {
            tree_id: events[0].tree_id,
            count: events.len(),
        });
    }

    Ok(DispatchOutcome {
        response: CommandResponse::ok(affected),
        events,
        created_node_id,
        consumed_clipboard,
    })
}

fn run_history(
    deps: &PipelineDeps<'_>,
    envelope: &CommandEnvelope,
) -> Result<DispatchOutcome, CoreError> {
    let mut ctx = WriteCtx::new(deps.backend, deps.now, deps.ids);

    let (tree_id, replay): (TreeId, Vec<ChangeKind>) = match &envelope.command {
        Command::Undo(spec) => {
            let (_, replay) = history::undo(&mut ctx.txn, spec.tree_id)?;
            deps.obs.record(ObsEvent::UndoApplied { tree_id: spec.tree_id });
            (spec.tree_id, replay)
        }
        Command::Redo(spec) => {
            let (_, replay) = history::redo(&mut ctx.txn, spec.tree_id)?;
            deps.obs.record(ObsEvent::RedoApplied { tree_id: spec.tree_id });
            (spec.tree_id, replay)
        }
        Command::ClearHistory(spec) => {
            history::clear(&mut ctx.txn, spec.tree_id);
            (spec.tree_id, Vec::new())
        }
        _ => unreachable!(),
    };

    let events = stamp_events(&mut ctx, tree_id, replay)?;
    commit_ctx(deps, ctx)?;

    let affected = events.iter().map(|event| event.kind.node_id()).collect();

    Ok(DispatchOutcome {
        response: CommandResponse::ok(affected),
        events,
        created_node_id: None,
        consumed_clipboard: false,
    })
}

/// Assign the tree's next sequence numbers inside the open transaction so
/// the total order commits atomically with the mutation itself.
fn stamp_events(
    ctx: &mut WriteCtx<'_>,
    tree_id: TreeId,
    kinds: Vec<ChangeKind>,
) -> Result<Vec<ChangeEvent>, CoreError> {
    if kinds.is_empty() {
        return Ok(Vec::new());
    }

    let key = schema::tree_seq_key(tree_id);
    let mut seq = read_meta_u64(&ctx.txn, &key)?;
    let events: Vec<ChangeEvent> = kinds
        .into_iter()
        .map(|kind| {
            seq += 1;
            ChangeEvent { seq, tree_id, kind }
        })
        .collect();
    write_meta_u64(&mut ctx.txn, &key, seq)?;

    Ok(events)
}

fn commit_ctx(deps: &PipelineDeps<'_>, ctx: WriteCtx<'_>) -> Result<(), CoreError> {
    let receipt = ctx.txn.commit()?;
    deps.obs.record(ObsEvent::TxnCommitted {
        tables_touched: receipt.tables_touched,
        ops_applied: receipt.ops_applied,
    });

    Ok(())
}

/// Whether a tree's undo ring holds at least one step.
#[must_use]
pub fn can_undo(backend: &dyn KvBackend, tree_id: TreeId) -> bool {
    let txn = crate::store::Transaction::new(backend);
    history::can_undo(&txn, tree_id)
}

/// Whether a tree's redo ring holds at least one step.
#[must_use]
pub fn can_redo(backend: &dyn KvBackend, tree_id: TreeId) -> bool {
    let txn = crate::store::Transaction::new(backend);
    history::can_redo(&txn, tree_id)
}

/// Convenience for hosts: a minimal valid envelope around a command.
#[must_use]
pub fn envelope_for(
    ids: &RefCell<IdGenerator>,
    now: Timestamp,
    view_id: ViewId,
    command: Command,
) -> CommandEnvelope {
    let mut generator = ids.borrow_mut();
    let command_id = generator
        .generate(now.as_millis())
        .map(crate::types::CommandId::from_ulid)
        .unwrap_or_else(|_| crate::types::CommandId::from_ulid(crate::types::Ulid::MAX));
    let group_id = generator
        .generate(now.as_millis())
        .map(crate::types::GroupId::from_ulid)
        .unwrap_or_else(|_| crate::types::GroupId::from_ulid(crate::types::Ulid::MAX));

    CommandEnvelope {
        command_id,
        group_id,
        command,
        issued_at: now,
        source_view_id: view_id,
        on_name_conflict: None,
    }
}
