// 1️⃣ Module declarations
mod config;
mod context;

// 2️⃣ Public re-exports
pub use config::{InitConfig, TreeDefinition};
pub use context::{ClipboardState, CoreContext, ViewState};

// 3️⃣ Internal imports
use crate::{
    command::{
        self, BroadcastChannel, ClipboardSnapshot, CommandResponse, DispatchOutcome, NoopBroadcast,
        PeerMessage, PipelineDeps,
    },
    error::CoreError,
    model::{
        envelope::{Command, CommandEnvelope, NameConflictPolicy},
        node::{NodeTypeTag, TreeNode},
        tree::Tree,
        working_copy::WorkingCopy,
    },
    mutation::nodes,
    obs::{NoopObsSink, ObsEvent, ObsSink},
    query,
    registry::{NodeTypeDef, NodeTypeRegistry, PluginArgs, Registered},
    schema,
    store::{
        KvBackend, MemoryStore, Transaction, WriteCtx, decode_row, ensure_store_version,
        read_meta_u64,
    },
    subscription::{EventSink, SubscriptionEngine, SubscriptionOptions},
    types::{
        CancelToken, Clock, IdGenerator, NodeId, SubscriptionId, SystemClock, TreeId, ViewId,
        WorkingCopyId,
    },
    value::Value,
    working_copy,
};
use std::{cell::RefCell, rc::Rc};

///
/// TableReport
///

#[derive(Clone, Debug)]
pub struct TableReport {
    pub table: String,
    pub rows: u64,
    pub bytes: u64,
}

///
/// StorageReport
///

#[derive(Clone, Debug, Default)]
pub struct StorageReport {
    pub tables: Vec<TableReport>,
}

impl StorageReport {
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.tables.iter().map(|table| table.bytes).sum()
    }
}

///
/// HierarchiDb
///
/// The single worker-side surface aggregating mutations, queries, and
/// subscriptions. Every method is structured-clone-safe at the boundary:
/// commands go in as envelopes, expected failures come back as coded
/// results, and change events flow out through subscription sinks.
///

pub struct HierarchiDb {
    ctx: CoreContext,
}

impl HierarchiDb {
    // ------------------------------------------------------------------
    // Initialisation
    // ------------------------------------------------------------------

    /// Open an in-memory store with system clock and no telemetry.
    pub fn init(config: InitConfig) -> Result<Self, CoreError> {
        Self::init_with(
            config,
            Box::new(MemoryStore::new()),
            Rc::new(SystemClock),
            Rc::new(NoopObsSink),
            Rc::new(NoopBroadcast),
        )
    }

    /// Open against injected collaborators: backend, clock, telemetry
    /// sink, and cross-tab channel.
    pub fn init_with(
        config: InitConfig,
        backend: Box<dyn KvBackend>,
        clock: Rc<dyn Clock>,
        obs: Rc<dyn ObsSink>,
        broadcast: Rc<dyn BroadcastChannel>,
    ) -> Result<Self, CoreError> {
        ensure_store_version(&*backend)?;

        let ctx = CoreContext {
            backend,
            registry: NodeTypeRegistry::with_builtins(),
            subscriptions: SubscriptionEngine::new(),
            clock,
            ids: RefCell::new(IdGenerator::new(config.id_seed)),
            obs,
            broadcast,
            views: RefCell::new(std::collections::BTreeMap::new()),
            history_capacity: config.history_capacity,
            working_copy_ttl_ms: config.working_copy_ttl_ms,
            store_name: config.store_name,
        };
        let db = Self { ctx };

        db.ensure_trees(&config.tree_definitions)?;
        db.sweep_working_copies()?;
        db.prime_watermarks()?;

        Ok(db)
    }

    #[must_use]
    pub fn store_name(&self) -> &str {
        &self.ctx.store_name
    }

    fn ensure_trees(&self, definitions: &[TreeDefinition]) -> Result<(), CoreError> {
        let existing = self.trees()?;
        let mut ctx = WriteCtx::new(&*self.ctx.backend, self.ctx.now(), &self.ctx.ids);
        let mut wrote = false;

        for definition in definitions {
            if existing.iter().any(|tree| tree.name == definition.name) {
                continue;
            }

            let tree_id = TreeId::from_ulid(ctx.next_id()?);
            let live_root_id = NodeId::from_ulid(ctx.next_id()?);
            let trash_root_id = NodeId::from_ulid(ctx.next_id()?);
            let tree = Tree {
                id: tree_id,
                name: definition.name.clone(),
                live_root_id,
                trash_root_id,
                created_at: ctx.now,
                updated_at: ctx.now,
            };
            nodes::write_tree(&mut ctx.txn, &tree)?;

            for (root_id, root_name) in [
                (live_root_id, definition.name.as_str()),
                (trash_root_id, "Trash"),
            ] {
                let root = TreeNode {
                    id: root_id,
                    tree_id,
                    parent_id: None,
                    node_type: NodeTypeTag::root(),
                    name: root_name.to_string(),
                    description: None,
                    created_at: ctx.now,
                    updated_at: ctx.now,
                    version: 1,
                    removed_at: None,
                    original_parent_id: None,
                };
                nodes::write_node(&mut ctx.txn, None, &root)?;
            }
            wrote = true;
        }

        if wrote {
            ctx.txn.commit()?;
        }

        Ok(())
    }

    fn sweep_working_copies(&self) -> Result<(), CoreError> {
        let mut ctx = WriteCtx::new(&*self.ctx.backend, self.ctx.now(), &self.ctx.ids);
        let swept = working_copy::sweep_expired(&mut ctx, self.ctx.working_copy_ttl_ms)?;
        if !swept.is_empty() {
            ctx.txn.commit()?;
            self.ctx.obs.record(ObsEvent::WorkingCopiesSwept { count: swept.len() });
        }

        Ok(())
    }

    fn prime_watermarks(&self) -> Result<(), CoreError> {
        let txn = Transaction::new(&*self.ctx.backend);
        for tree in self.trees()? {
            let seq = read_meta_u64(&txn, &schema::tree_seq_key(tree.id))?;
            self.ctx.subscriptions.prime_watermark(tree.id, seq);
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Node types & plugin routing
    // ------------------------------------------------------------------

    pub fn register_node_type(&self, def: NodeTypeDef) -> Registered {
        self.ctx.registry.register(def)
    }

    /// Unregister a type; refused while live nodes of the type exist.
    pub fn unregister_node_type(&self, tag: &NodeTypeTag) -> Result<(), CoreError> {
        let txn = Transaction::new(&*self.ctx.backend);
        let live = nodes::count_nodes_of_type(&txn, tag)?;
        self.ctx.registry.unregister(tag, live)
    }

    /// Route a plugin operation to its registered handler. The core passes
    /// parameters through untouched.
    pub fn plugin_call(
        &self,
        tag: &NodeTypeTag,
        op: &str,
        node_id: Option<NodeId>,
        params: &Value,
    ) -> Result<Value, CoreError> {
        let (def, plugin_op) = self.ctx.registry.resolve_plugin_op(tag, op)?;
        let txn = Transaction::new(&*self.ctx.backend);
        let args = PluginArgs {
            txn: &txn,
            handler: &*def.handler,
            node_id,
            params,
        };

        plugin_op(&args)
    }

    // ------------------------------------------------------------------
    // Command dispatch
    // ------------------------------------------------------------------

    /// Wrap a command in a well-formed envelope for a view.
    #[must_use]
    pub fn envelope(&self, view_id: ViewId, command: Command) -> CommandEnvelope {
        command::envelope_for(&self.ctx.ids, self.ctx.now(), view_id, command)
    }

    /// Execute one envelope: the structured result of spec'd shape.
    pub fn dispatch(&self, envelope: &CommandEnvelope) -> CommandResponse {
        self.dispatch_detailed(envelope).response
    }

    /// Execute one envelope and keep the stamped events and created-node
    /// id visible, for hosts that need more than the response.
    pub fn dispatch_detailed(&self, envelope: &CommandEnvelope) -> DispatchOutcome {
        let view_id = envelope.source_view_id;
        let view_state = self.ctx.view_state(view_id);
        let policy = envelope.on_name_conflict.unwrap_or(view_state.default_policy);
        let clipboard = view_state.clipboard.as_ref().map(|clip| ClipboardSnapshot {
            node_ids: clip.node_ids.clone(),
            cut: clip.cut,
        });

        let deps = PipelineDeps {
            backend: &*self.ctx.backend,
            registry: &self.ctx.registry,
            ids: &self.ctx.ids,
            now: self.ctx.now(),
            history_capacity: self.ctx.history_capacity,
            obs: &*self.ctx.obs,
        };
        let outcome = command::dispatch(&deps, envelope, policy, clipboard.as_ref());

        if outcome.response.success && !outcome.events.is_empty() {
            self.fan_out(Some(envelope), &outcome.events);
        }
        if outcome.consumed_clipboard {
            self.ctx.update_view(view_id, |view| view.clipboard = None);
        }

        outcome
    }

    /// Decode a structured-clone envelope value, then dispatch.
    pub fn dispatch_value(&self, envelope: &Value) -> CommandResponse {
        match command::decode_envelope(envelope) {
            Ok(decoded) => self.dispatch(&decoded),
            Err(err) => CommandResponse::failure(&err),
        }
    }

    // Local-first ordering: events reach this tab's subscribers before the
    // peer broadcast leaves.
    fn fan_out(&self, envelope: Option<&CommandEnvelope>, events: &[crate::model::event::ChangeEvent]) {
        if let Err(err) = self.ctx.subscriptions.publish(&*self.ctx.backend, events) {
            self.ctx.obs.record(ObsEvent::CommandFailed {
                kind: "subscriptionPublish",
                code: err.code,
            });
        }
        let (subscriptions, delivered) = self.ctx.subscriptions.flush();
        self.ctx.obs.record(ObsEvent::SubscriptionFanout {
            subscriptions,
            delivered,
        });

        self.ctx
            .broadcast
            .post(&PeerMessage::for_events(envelope.cloned(), events.to_vec()));
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    #[must_use]
    pub fn can_undo(&self, tree_id: TreeId) -> bool {
        command::can_undo(&*self.ctx.backend, tree_id)
    }

    #[must_use]
    pub fn can_redo(&self, tree_id: TreeId) -> bool {
        command::can_redo(&*self.ctx.backend, tree_id)
    }

    // ------------------------------------------------------------------
    // Cross-tab coordination
    // ------------------------------------------------------------------

    /// Apply a peer tab's message: events feed the subscription engine
    /// only; the command is never re-executed here.
    pub fn apply_peer_message(&self, message: &PeerMessage) {
        if message.events.is_empty() {
            return;
        }
        let tree_id = message.events[0].tree_id;

        if let Err(err) = self.ctx.subscriptions.publish(&*self.ctx.backend, &message.events) {
            self.ctx.obs.record(ObsEvent::CommandFailed {
                kind: "peerMessage",
                code: err.code,
            });
            return;
        }
        self.ctx.subscriptions.flush();
        self.ctx.obs.record(ObsEvent::PeerMessageApplied {
            tree_id,
            events: message.events.len(),
        });
    }

    /// Trees whose event stream showed a sequence gap.
    #[must_use]
    pub fn trees_needing_resync(&self) -> Vec<TreeId> {
        self.ctx.subscriptions.trees_needing_resync()
    }

    /// Re-snapshot every subscription of a gapped tree from committed
    /// state and fast-forward the watermark.
    pub fn resync(&self, tree_id: TreeId) -> Result<usize, CoreError> {
        let txn = Transaction::new(&*self.ctx.backend);
        let watermark = read_meta_u64(&txn, &schema::tree_seq_key(tree_id))?;
        self.ctx.obs.record(ObsEvent::ResyncRequested { tree_id });

        self.ctx
            .subscriptions
            .resync_tree(&*self.ctx.backend, tree_id, watermark)
    }

    // ------------------------------------------------------------------
    // Queries (C9 surface)
    // ------------------------------------------------------------------

    pub fn trees(&self) -> Result<Vec<Tree>, CoreError> {
        let txn = Transaction::new(&*self.ctx.backend);
        txn.scan_prefix(schema::TREES_TABLE, &[])
            .iter()
            .map(|(_, bytes)| decode_row(bytes).map_err(CoreError::from))
            .collect()
    }

    pub fn tree_named(&self, name: &str) -> Result<Option<Tree>, CoreError> {
        Ok(self.trees()?.into_iter().find(|tree| tree.name == name))
    }

    pub fn get_node(&self, node_id: NodeId) -> Result<Option<TreeNode>, CoreError> {
        query::get_node(&*self.ctx.backend, node_id)
    }

    pub fn get_children(
        &self,
        parent_id: NodeId,
        options: query::ChildrenOptions,
    ) -> Result<Vec<TreeNode>, CoreError> {
        query::get_children(&*self.ctx.backend, parent_id, options)
    }

    pub fn get_ancestors(&self, node_id: NodeId) -> Result<Vec<TreeNode>, CoreError> {
        query::get_ancestors(&*self.ctx.backend, node_id)
    }

    pub fn search_by_name(
        &self,
        tree_id: TreeId,
        pattern: &str,
        limit: Option<usize>,
        cancel: &CancelToken,
    ) -> Result<Vec<TreeNode>, CoreError> {
        query::search_by_name(&*self.ctx.backend, tree_id, pattern, limit, cancel)
    }

    pub fn count_descendants(
        &self,
        node_id: NodeId,
        cancel: &CancelToken,
    ) -> Result<u64, CoreError> {
        query::count_descendants(&*self.ctx.backend, node_id, cancel)
    }

    pub fn get_trash_root(&self, tree_id: TreeId) -> Result<NodeId, CoreError> {
        query::get_trash_root(&*self.ctx.backend, tree_id)
    }

    /// Working copies never surface in tree queries; this is the explicit
    /// draft accessor used by edit dialogs.
    pub fn get_working_copy(&self, id: WorkingCopyId) -> Result<Option<WorkingCopy>, CoreError> {
        let txn = Transaction::new(&*self.ctx.backend);
        working_copy::read_working_copy(&txn, id)
    }

    /// Stage edits onto a draft outside the command pipeline. Emits no
    /// events; the live tree is untouched until commit.
    pub fn update_working_copy(
        &self,
        id: WorkingCopyId,
        name: Option<String>,
        description: Option<String>,
        payload: Option<Value>,
    ) -> Result<WorkingCopy, CoreError> {
        let mut ctx = WriteCtx::new(&*self.ctx.backend, self.ctx.now(), &self.ctx.ids);
        let wc = working_copy::update_working_copy(&mut ctx, id, name, description, payload)?;
        ctx.txn.commit()?;

        Ok(wc)
    }

    // ------------------------------------------------------------------
    // Subscriptions (C8 surface)
    // ------------------------------------------------------------------

    pub fn observe_node(
        &self,
        view_id: ViewId,
        node_id: NodeId,
        options: SubscriptionOptions,
        sink: Rc<dyn EventSink>,
    ) -> Result<SubscriptionId, CoreError> {
        self.ctx
            .subscriptions
            .observe_node(&*self.ctx.backend, view_id, node_id, options, sink)
    }

    pub fn observe_children(
        &self,
        view_id: ViewId,
        parent_id: NodeId,
        options: SubscriptionOptions,
        sink: Rc<dyn EventSink>,
    ) -> Result<SubscriptionId, CoreError> {
        self.ctx
            .subscriptions
            .observe_children(&*self.ctx.backend, view_id, parent_id, options, sink)
    }

    pub fn observe_subtree(
        &self,
        view_id: ViewId,
        root_id: NodeId,
        options: SubscriptionOptions,
        sink: Rc<dyn EventSink>,
    ) -> Result<SubscriptionId, CoreError> {
        self.ctx
            .subscriptions
            .observe_subtree(&*self.ctx.backend, view_id, root_id, options, sink)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.ctx.subscriptions.unsubscribe(id)
    }

    pub fn heartbeat(&self, view_id: ViewId) {
        self.ctx.subscriptions.heartbeat(view_id, self.ctx.now());
    }

    /// Explicit view teardown: subscriptions, clipboard, prefs.
    pub fn disconnect_view(&self, view_id: ViewId) -> usize {
        self.ctx.views.borrow_mut().remove(&view_id);
        self.ctx.subscriptions.release_view(view_id)
    }

    /// Drop views whose heartbeat went silent longer than `max_age_ms`.
    pub fn expire_views(&self, max_age_ms: u64) -> Vec<ViewId> {
        let stale = self.ctx.subscriptions.expire_views(self.ctx.now(), max_age_ms);
        let mut views = self.ctx.views.borrow_mut();
        for view in &stale {
            views.remove(view);
        }

        stale
    }

    // ------------------------------------------------------------------
    // Per-view state
    // ------------------------------------------------------------------

    pub fn set_default_conflict_policy(&self, view_id: ViewId, policy: NameConflictPolicy) {
        self.ctx
            .update_view(view_id, |view| view.default_policy = policy);
    }

    pub fn clipboard_copy(&self, view_id: ViewId, node_ids: Vec<NodeId>) {
        self.ctx.update_view(view_id, |view| {
            view.clipboard = Some(ClipboardState {
                node_ids,
                cut: false,
            });
        });
    }

    pub fn clipboard_cut(&self, view_id: ViewId, node_ids: Vec<NodeId>) {
        self.ctx.update_view(view_id, |view| {
            view.clipboard = Some(ClipboardState { node_ids, cut: true });
        });
    }

    pub fn clipboard_clear(&self, view_id: ViewId) {
        self.ctx.update_view(view_id, |view| view.clipboard = None);
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    #[cfg(test)]
    pub(crate) fn backend_for_tests(&self) -> &dyn KvBackend {
        &*self.ctx.backend
    }

    /// Row and byte footprint per table, for host tooling.
    #[must_use]
    pub fn storage_report(&self) -> StorageReport {
        let backend = &*self.ctx.backend;
        let tables = backend
            .table_names()
            .into_iter()
            .map(|table| TableReport {
                rows: backend.row_count(&table),
                bytes: backend.byte_size(&table),
                table,
            })
            .collect();

        StorageReport { tables }
    }
}