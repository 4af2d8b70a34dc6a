use crate::{
    command::BroadcastChannel,
    model::envelope::NameConflictPolicy,
    obs::ObsSink,
    registry::NodeTypeRegistry,
    store::KvBackend,
    subscription::SubscriptionEngine,
    types::{Clock, IdGenerator, NodeId, Timestamp, ViewId},
};
use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

///
/// ClipboardState
///

#[derive(Clone, Debug)]
pub struct ClipboardState {
    pub node_ids: Vec<NodeId>,
    pub cut: bool,
}

///
/// ViewState
///
/// Per-view defaults and clipboard. Views are the unit of subscription
/// ownership and working-copy isolation.
///

#[derive(Clone, Debug, Default)]
pub struct ViewState {
    pub default_policy: NameConflictPolicy,
    pub clipboard: Option<ClipboardState>,
}

///
/// CoreContext
///
/// All engine state behind one explicit handle: the store, the registry,
/// the subscription table, clocks and generators, and per-view state.
/// Constructed once at init and threaded through every operation; tests
/// build a fresh context per case.
///

pub struct CoreContext {
    pub(crate) backend: Box<dyn KvBackend>,
    pub(crate) registry: NodeTypeRegistry,
    pub(crate) subscriptions: SubscriptionEngine,
    pub(crate) clock: Rc<dyn Clock>,
    pub(crate) ids: RefCell<IdGenerator>,
    pub(crate) obs: Rc<dyn ObsSink>,
    pub(crate) broadcast: Rc<dyn BroadcastChannel>,
    pub(crate) views: RefCell<BTreeMap<ViewId, ViewState>>,
    pub(crate) history_capacity: usize,
    pub(crate) working_copy_ttl_ms: u64,
    pub(crate) store_name: String,
}

impl CoreContext {
    pub(crate) fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.clock.now_ms())
    }

    pub(crate) fn view_state(&self, view_id: ViewId) -> ViewState {
        self.views.borrow().get(&view_id).cloned().unwrap_or_default()
    }

    pub(crate) fn update_view<R>(
        &self,
        view_id: ViewId,
        f: impl FnOnce(&mut ViewState) -> R,
    ) -> R {
        let mut views = self.views.borrow_mut();
        f(views.entry(view_id).or_default())
    }
}
