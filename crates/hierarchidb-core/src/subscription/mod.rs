//! Change-notification fan-out.
//!
//! Subscriptions are live filters over the per-tree event stream: a single
//! node, a parent's direct children, or a whole subtree with an optional
//! depth cap. Filtering happens here, never in callers. Delivery runs
//! through an injected sink per subscription; `flush` is the scheduler-turn
//! boundary, and bursts coalesce per subscription between flushes.

use crate::{
    error::CoreError,
    model::{
        event::{ChangeEvent, ChangeKind},
        node::TreeNode,
    },
    query,
    store::KvBackend,
    types::{NodeId, SubscriptionId, Timestamp, TreeId, ViewId},
};
use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};

///
/// SubscriptionEventKind
///

#[derive(Clone, Debug, PartialEq)]
pub enum SubscriptionEventKind {
    /// Requested snapshot, delivered once at subscribe (or resync) time.
    Initial { nodes: Vec<TreeNode> },
    /// An in-scope change.
    Changed(ChangeKind),
    /// A move carried the node into this subscription's scope.
    MovedIn(ChangeKind),
    /// A move carried the node out of this subscription's scope.
    MovedOut(ChangeKind),
}

///
/// SubscriptionEvent
///

#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionEvent {
    pub subscription_id: SubscriptionId,
    pub seq: u64,
    pub kind: SubscriptionEventKind,
    /// Current row of the affected node, when it still exists.
    pub node: Option<TreeNode>,
}

///
/// EventSink
///
/// Where one subscription's batches land. The transport (RPC stream,
/// channel, test buffer) lives behind this boundary.
///

pub trait EventSink {
    fn deliver(&self, events: &[SubscriptionEvent]);
}

///
/// VecSink
///
/// Buffering sink for tests and simple hosts.
///

#[derive(Debug, Default)]
pub struct VecSink {
    events: RefCell<Vec<SubscriptionEvent>>,
}

impl VecSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn drain(&self) -> Vec<SubscriptionEvent> {
        self.events.borrow_mut().drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }
}

impl EventSink for VecSink {
    fn deliver(&self, events: &[SubscriptionEvent]) {
        self.events.borrow_mut().extend_from_slice(events);
    }
}

///
/// SubscriptionOptions
///

#[derive(Clone, Copy, Debug, Default)]
pub struct SubscriptionOptions {
    pub include_initial: bool,
    /// Subtree subscriptions only: how deep below the root to watch.
    pub max_depth: Option<u32>,
}

#[derive(Clone, Debug)]
enum SubKind {
    Node(NodeId),
    Children(NodeId),
    Subtree {
        root: NodeId,
        max_depth: Option<u32>,
        /// Current scope membership with depth below the root. Maintained
        /// incrementally so deletions deep inside an already-gone subtree
        /// still route (post-commit state cannot answer for them).
        members: BTreeMap<NodeId, u32>,
    },
}

/// Depth-capped membership map of a subtree, root included at depth 0.
fn collect_members(
    backend: &dyn KvBackend,
    root: NodeId,
    max_depth: Option<u32>,
) -> Result<BTreeMap<NodeId, u32>, CoreError> {
    use crate::{mutation::nodes, store::Transaction};

    let txn = Transaction::new(backend);
    let mut members = BTreeMap::new();
    let Some(root_node) = nodes::read_node(&txn, root)? else {
        return Ok(members);
    };

    members.insert(root, 0);
    let mut frontier = vec![(root, 0u32)];
    while let Some((current, depth)) = frontier.pop() {
        if max_depth.is_some_and(|max| depth >= max) {
            continue;
        }
        for child in nodes::children_of(&txn, root_node.tree_id, current) {
            members.insert(child, depth + 1);
            frontier.push((child, depth + 1));
        }
    }

    Ok(members)
}

struct SubEntry {
    view_id: ViewId,
    kind: SubKind,
    sink: Rc<dyn EventSink>,
    pending: Vec<SubscriptionEvent>,
}

#[derive(Default)]
struct EngineState {
    subs: BTreeMap<SubscriptionId, SubEntry>,
    by_view: BTreeMap<ViewId, BTreeSet<SubscriptionId>>,
    view_heartbeat: BTreeMap<ViewId, Timestamp>,
    /// Highest sequence seen per tree; the at-least-once dedup watermark.
    last_seq: BTreeMap<TreeId, u64>,
    /// Trees where a sequence gap was observed; hosts resync through C9.
    pending_resync: BTreeSet<TreeId>,
}

///
/// SubscriptionEngine
///

#[derive(Default)]
pub struct SubscriptionEngine {
    state: RefCell<EngineState>,
    next_id: RefCell<u128>,
}

impl SubscriptionEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> SubscriptionId {
        let mut next = self.next_id.borrow_mut();
        *next += 1;
        SubscriptionId::from_ulid(crate::types::Ulid::from_parts(0, *next))
    }

    fn insert(
        &self,
        view_id: ViewId,
        kind: SubKind,
        sink: Rc<dyn EventSink>,
        initial: Option<Vec<TreeNode>>,
    ) -> SubscriptionId {
        let id = self.allocate_id();
        let mut state = self.state.borrow_mut();

        if let Some(nodes) = initial {
            sink.deliver(&[SubscriptionEvent {
                subscription_id: id,
                seq: 0,
                kind: SubscriptionEventKind::Initial { nodes },
                node: None,
            }]);
        }

        state.subs.insert(
            id,
            SubEntry {
                view_id,
                kind,
                sink,
                pending: Vec::new(),
            },
        );
        state.by_view.entry(view_id).or_default().insert(id);

        id
    }

    // ------------------------------------------------------------------
    // Subscribe surface
    // ------------------------------------------------------------------

    /// Watch one node: updates, moves, deletion, restoration.
    pub fn observe_node(
        &self,
        backend: &dyn KvBackend,
        view_id: ViewId,
        node_id: NodeId,
        options: SubscriptionOptions,
        sink: Rc<dyn EventSink>,
    ) -> Result<SubscriptionId, CoreError> {
        let initial = if options.include_initial {
            Some(query::get_node(backend, node_id)?.into_iter().collect())
        } else {
            None
        };

        Ok(self.insert(view_id, SubKind::Node(node_id), sink, initial))
    }

    /// Watch a parent's direct child list.
    pub fn observe_children(
        &self,
        backend: &dyn KvBackend,
        view_id: ViewId,
        parent_id: NodeId,
        options: SubscriptionOptions,
        sink: Rc<dyn EventSink>,
    ) -> Result<SubscriptionId, CoreError> {
        let initial = if options.include_initial {
            Some(query::get_children(
                backend,
                parent_id,
                query::ChildrenOptions::default(),
            )?)
        } else {
            None
        };

        Ok(self.insert(view_id, SubKind::Children(parent_id), sink, initial))
    }

    /// Watch everything below a root, optionally depth-capped.
    pub fn observe_subtree(
        &self,
        backend: &dyn KvBackend,
        view_id: ViewId,
        root_id: NodeId,
        options: SubscriptionOptions,
        sink: Rc<dyn EventSink>,
    ) -> Result<SubscriptionId, CoreError> {
        let initial = if options.include_initial {
            Some(query::list_subtree(
                backend,
                root_id,
                options.max_depth,
                &crate::types::CancelToken::new(),
            )?)
        } else {
            None
        };

        let members = collect_members(backend, root_id, options.max_depth)?;

        Ok(self.insert(
            view_id,
            SubKind::Subtree {
                root: root_id,
                max_depth: options.max_depth,
                members,
            },
            sink,
            initial,
        ))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(entry) = state.subs.remove(&id) else {
            return false;
        };
        if let Some(ids) = state.by_view.get_mut(&entry.view_id) {
            ids.remove(&id);
        }

        true
    }

    // ------------------------------------------------------------------
    // View lifecycle
    // ------------------------------------------------------------------

    pub fn heartbeat(&self, view_id: ViewId, now: Timestamp) {
        self.state.borrow_mut().view_heartbeat.insert(view_id, now);
    }

    /// Release every subscription a view owns.
    pub fn release_view(&self, view_id: ViewId) -> usize {
        let mut state = self.state.borrow_mut();
        let ids = state.by_view.remove(&view_id).unwrap_or_default();
        state.view_heartbeat.remove(&view_id);
        for id in &ids {
            state.subs.remove(id);
        }

        ids.len()
    }

    /// Drop views whose heartbeat went silent.
    pub fn expire_views(&self, now: Timestamp, max_age_ms: u64) -> Vec<ViewId> {
        let stale: Vec<ViewId> = {
            let state = self.state.borrow();
            state
                .view_heartbeat
                .iter()
                .filter(|(_, last)| now.saturating_sub(**last) > max_age_ms)
                .map(|(view, _)| *view)
                .collect()
        };

        for view in &stale {
            self.release_view(*view);
        }

        stale
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.state.borrow().subs.len()
    }

    // ------------------------------------------------------------------
    // Publication
    // ------------------------------------------------------------------

    /// Feed committed events into every matching subscription's pending
    /// buffer. Duplicates (cross-tab at-least-once) are dropped by the
    /// per-tree watermark; observed gaps mark the tree for resync.
    pub fn publish(&self, backend: &dyn KvBackend, events: &[ChangeEvent]) -> Result<(), CoreError> {
        for event in events {
            {
                let mut state = self.state.borrow_mut();
                let watermark = *state.last_seq.get(&event.tree_id).unwrap_or(&0);
                if event.seq <= watermark {
                    continue;
                }
                if event.seq > watermark + 1 {
                    state.pending_resync.insert(event.tree_id);
                }
                state.last_seq.insert(event.tree_id, event.seq);
            }

            self.route_event(backend, event)?;
        }

        Ok(())
    }

    fn route_event(&self, backend: &dyn KvBackend, event: &ChangeEvent) -> Result<(), CoreError> {
        let snapshot = query::get_node(backend, event.kind.node_id())?;
        let mut state = self.state.borrow_mut();

        let ids: Vec<SubscriptionId> = state.subs.keys().copied().collect();
        for id in ids {
            let Some(entry) = state.subs.get_mut(&id) else {
                continue;
            };
            let routed = match &mut entry.kind {
                SubKind::Node(node_id) => Self::route_node(*node_id, &event.kind),
                SubKind::Children(parent_id) => Self::route_children(*parent_id, &event.kind),
                SubKind::Subtree {
                    root,
                    max_depth,
                    members,
                } => Self::route_subtree(backend, *root, *max_depth, members, &event.kind)?,
            };

            if let Some(kind) = routed {
                coalesce_push(
                    &mut entry.pending,
                    SubscriptionEvent {
                        subscription_id: id,
                        seq: event.seq,
                        kind,
                        node: snapshot.clone(),
                    },
                );
            }
        }

        Ok(())
    }

    fn route_node(watched: NodeId, kind: &ChangeKind) -> Option<SubscriptionEventKind> {
        if kind.node_id() != watched {
            return None;
        }
        match kind {
            // creation precedes any observer of the node itself
            ChangeKind::NodeCreated { .. } => None,
            _ => Some(SubscriptionEventKind::Changed(kind.clone())),
        }
    }

    fn route_children(watched: NodeId, kind: &ChangeKind) -> Option<SubscriptionEventKind> {
        let (from, to) = kind.parents();
        let was = from == watched;
        let now = to == watched;

        match (was, now) {
            (true, true) => Some(SubscriptionEventKind::Changed(kind.clone())),
            (true, false) => Some(SubscriptionEventKind::MovedOut(kind.clone())),
            (false, true) => match kind {
                ChangeKind::NodeMoved { .. } | ChangeKind::NodeRestored { .. } => {
                    Some(SubscriptionEventKind::MovedIn(kind.clone()))
                }
                _ => Some(SubscriptionEventKind::Changed(kind.clone())),
            },
            (false, false) => None,
        }
    }

    // Subtree routing maintains the member map as it classifies: a parent
    // at the depth cap keeps its children out of scope, and a subtree
    // moving across the boundary takes its descendants with it.
    fn route_subtree(
        backend: &dyn KvBackend,
        root: NodeId,
        max_depth: Option<u32>,
        members: &mut BTreeMap<NodeId, u32>,
        kind: &ChangeKind,
    ) -> Result<Option<SubscriptionEventKind>, CoreError> {
        let node_id = kind.node_id();
        let (_, to) = kind.parents();

        if node_id == root {
            // the root itself: its changes are in scope, its own moves move
            // the whole subscription scope with it
            return Ok(Some(SubscriptionEventKind::Changed(kind.clone())));
        }

        let child_depth = |members: &BTreeMap<NodeId, u32>, parent: NodeId| -> Option<u32> {
            let depth = *members.get(&parent)?;
            max_depth.is_none_or(|max| depth < max).then_some(depth + 1)
        };

        let routed = match kind {
            ChangeKind::NodeCreated { .. } => {
                child_depth(members, to).map(|depth| {
                    members.insert(node_id, depth);
                    SubscriptionEventKind::Changed(kind.clone())
                })
            }
            ChangeKind::NodeUpdated { .. } => members
                .contains_key(&node_id)
                .then(|| SubscriptionEventKind::Changed(kind.clone())),
            ChangeKind::NodeDeleted { .. } => members.remove(&node_id).map(|_| {
                SubscriptionEventKind::Changed(kind.clone())
            }),
            ChangeKind::NodeMoved { .. } | ChangeKind::NodeRestored { .. } => {
                let was = members.contains_key(&node_id);
                let now_depth = child_depth(members, to);

                match (was, now_depth) {
                    (true, Some(depth)) => {
                        Self::reroot_member(backend, members, node_id, depth, max_depth)?;
                        Some(SubscriptionEventKind::Changed(kind.clone()))
                    }
                    (true, None) => {
                        Self::evict_member_subtree(backend, members, node_id)?;
                        Some(SubscriptionEventKind::MovedOut(kind.clone()))
                    }
                    (false, Some(depth)) => {
                        Self::reroot_member(backend, members, node_id, depth, max_depth)?;
                        Some(SubscriptionEventKind::MovedIn(kind.clone()))
                    }
                    (false, None) => None,
                }
            }
        };

        Ok(routed)
    }

    // A node entered scope (or moved within it): refresh it and its current
    // descendants at their new depths.
    fn reroot_member(
        backend: &dyn KvBackend,
        members: &mut BTreeMap<NodeId, u32>,
        node_id: NodeId,
        depth: u32,
        max_depth: Option<u32>,
    ) -> Result<(), CoreError> {
        Self::evict_member_subtree(backend, members, node_id)?;

        let relative_cap = max_depth.map(|max| max.saturating_sub(depth));
        for (descendant, relative) in collect_members(backend, node_id, relative_cap)? {
            members.insert(descendant, depth + relative);
        }
        members.insert(node_id, depth);

        Ok(())
    }

    // A node left scope: drop it and whatever descendants it still has.
    fn evict_member_subtree(
        backend: &dyn KvBackend,
        members: &mut BTreeMap<NodeId, u32>,
        node_id: NodeId,
    ) -> Result<(), CoreError> {
        members.remove(&node_id);
        for (descendant, _) in collect_members(backend, node_id, None)? {
            members.remove(&descendant);
        }

        Ok(())
    }

    /// Deliver every pending batch, one sink call per subscription, and
    /// clear the buffers. Returns `(subscriptions, events)` delivered.
    pub fn flush(&self) -> (usize, usize) {
        // sinks may reenter (e.g. unsubscribe); take batches out first
        let batches: Vec<(Rc<dyn EventSink>, Vec<SubscriptionEvent>)> = {
            let mut state = self.state.borrow_mut();
            state
                .subs
                .values_mut()
                .filter(|entry| !entry.pending.is_empty())
                .map(|entry| (Rc::clone(&entry.sink), std::mem::take(&mut entry.pending)))
                .collect()
        };

        let mut delivered = 0;
        for (sink, batch) in &batches {
            delivered += batch.len();
            sink.deliver(batch);
        }

        (batches.len(), delivered)
    }

    // ------------------------------------------------------------------
    // Cross-tab resync
    // ------------------------------------------------------------------

    /// Fast-forward a tree's watermark without delivering anything; run at
    /// init so pre-existing history is not mistaken for a gap.
    pub fn prime_watermark(&self, tree_id: TreeId, seq: u64) {
        let mut state = self.state.borrow_mut();
        let entry = state.last_seq.entry(tree_id).or_insert(0);
        if seq > *entry {
            *entry = seq;
        }
    }

    #[must_use]
    pub fn trees_needing_resync(&self) -> Vec<TreeId> {
        self.state.borrow().pending_resync.iter().copied().collect()
    }

    /// Re-deliver initial snapshots for every subscription and fast-forward
    /// the tree watermark. The host calls this after a detected gap.
    pub fn resync_tree(
        &self,
        backend: &dyn KvBackend,
        tree_id: TreeId,
        watermark: u64,
    ) -> Result<usize, CoreError> {
        let entries: Vec<(SubscriptionId, SubKind, Rc<dyn EventSink>)> = {
            let state = self.state.borrow();
            state
                .subs
                .iter()
                .map(|(id, entry)| (*id, entry.kind.clone(), Rc::clone(&entry.sink)))
                .collect()
        };

        let mut refreshed = 0;
        for (id, kind, sink) in entries {
            let nodes = match kind {
                SubKind::Node(node_id) => query::get_node(backend, node_id)?
                    .into_iter()
                    .collect(),
                SubKind::Children(parent_id) => {
                    match query::get_children(backend, parent_id, query::ChildrenOptions::default())
                    {
                        Ok(children) => children,
                        Err(err) if err.is_not_found() => Vec::new(),
                        Err(err) => return Err(err),
                    }
                }
                SubKind::Subtree { root, max_depth, .. } => {
                    match query::list_subtree(
                        backend,
                        root,
                        max_depth,
                        &crate::types::CancelToken::new(),
                    ) {
                        Ok(nodes) => nodes,
                        Err(err) if err.is_not_found() => Vec::new(),
                        Err(err) => return Err(err),
                    }
                }
            };

            sink.deliver(&[SubscriptionEvent {
                subscription_id: id,
                seq: watermark,
                kind: SubscriptionEventKind::Initial { nodes },
                node: None,
            }]);
            refreshed += 1;
        }

        let mut state = self.state.borrow_mut();
        for entry in state.subs.values_mut() {
            if let SubKind::Subtree {
                root,
                max_depth,
                members,
            } = &mut entry.kind
            {
                *members = collect_members(backend, *root, *max_depth)?;
            }
        }
        state.last_seq.insert(tree_id, watermark);
        state.pending_resync.remove(&tree_id);

        Ok(refreshed)
    }
}

/// Burst coalescing: a new update to a node supersedes an undelivered
/// update to the same node. The stale entry is dropped and the fresh one
/// appended, keeping batch sequence numbers increasing.
fn coalesce_push(pending: &mut Vec<SubscriptionEvent>, event: SubscriptionEvent) {
    if let SubscriptionEventKind::Changed(ChangeKind::NodeUpdated { node_id, .. }) = &event.kind {
        pending.retain(|existing| {
            !matches!(
                &existing.kind,
                SubscriptionEventKind::Changed(ChangeKind::NodeUpdated {
                    node_id: existing_node,
                    ..
                }) if existing_node == node_id
            )
        });
    }

    pending.push(event);
}
