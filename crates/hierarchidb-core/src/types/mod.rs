pub(crate) mod generator;
mod id;
mod time;
mod ulid;

pub use generator::IdGenerator;
pub use id::{CommandId, EntityId, GroupId, NodeId, SubscriptionId, TreeId, ViewId, WorkingCopyId};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
pub use ulid::{Ulid, UlidDecodeError, UlidError};

///
/// CancelToken
///
/// Caller-supplied cancellation flag honoured by long-running reads.
/// Mutations ignore it; they are expected to be short.
///

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Readers abandon at their next suspension point.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
