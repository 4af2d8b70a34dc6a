//! Observability sink boundary.
//!
//! Core logic never touches counters or host logging directly; every
//! instrumentation point flows through [`ObsEvent`] into the injected
//! [`ObsSink`]. Hosts bridge the sink to whatever telemetry they run.

use crate::{error::ErrorCode, types::TreeId};
use std::cell::RefCell;

///
/// ObsEvent
///

#[derive(Clone, Debug)]
pub enum ObsEvent {
    CommandDispatched {
        kind: &'static str,
    },
    CommandFailed {
        kind: &'static str,
        code: ErrorCode,
    },
    TxnCommitted {
        tables_touched: usize,
        ops_applied: usize,
    },
    EventsEmitted {
        tree_id: TreeId,
        count: usize,
    },
    SubscriptionFanout {
        subscriptions: usize,
        delivered: usize,
    },
    UndoApplied {
        tree_id: TreeId,
    },
    RedoApplied {
        tree_id: TreeId,
    },
    WorkingCopiesSwept {
        count: usize,
    },
    PeerMessageApplied {
        tree_id: TreeId,
        events: usize,
    },
    ResyncRequested {
        tree_id: TreeId,
    },
}

///
/// ObsSink
///

pub trait ObsSink {
    fn record(&self, event: ObsEvent);
}

///
/// NoopObsSink
///

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObsSink;

impl ObsSink for NoopObsSink {
    fn record(&self, _: ObsEvent) {}
}

///
/// MemoryObsSink
///
/// Buffering sink for tests and diagnostics snapshots.
///

#[derive(Debug, Default)]
pub struct MemoryObsSink {
    events: RefCell<Vec<ObsEvent>>,
}

impl MemoryObsSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn drain(&self) -> Vec<ObsEvent> {
        self.events.borrow_mut().drain(..).collect()
    }

    #[must_use]
    pub fn count_dispatched(&self) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|event| matches!(event, ObsEvent::CommandDispatched { .. }))
            .count()
    }
}

impl ObsSink for MemoryObsSink {
    fn record(&self, event: ObsEvent) {
        self.events.borrow_mut().push(event);
    }
}
