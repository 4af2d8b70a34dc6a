use crate::model::{envelope::CommandEnvelope, event::ChangeEvent};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

///
/// PeerMessage
///
/// What one tab tells its peers after a commit: the envelope it executed
/// and the stamped events. Peers apply the events only; they never
/// re-execute the command. Unknown fields are ignored so the wire format
/// can grow additively.
///

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<CommandEnvelope>,
    pub events: Vec<ChangeEvent>,
    /// Highest sequence contained in `events`; the gap-detection watermark.
    pub sequence: u64,
}

impl PeerMessage {
    #[must_use]
    pub fn for_events(envelope: Option<CommandEnvelope>, events: Vec<ChangeEvent>) -> Self {
        let sequence = events.iter().map(|event| event.seq).max().unwrap_or(0);

        Self {
            envelope,
            events,
            sequence,
        }
    }
}

///
/// BroadcastChannel
///
/// Same-origin fan-out boundary (the browser's named channel, or any
/// equivalent). Delivery is at-least-once; receivers dedup by sequence.
///

pub trait BroadcastChannel {
    fn post(&self, message: &PeerMessage);
}

///
/// NoopBroadcast
///

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopBroadcast;

impl BroadcastChannel for NoopBroadcast {
    fn post(&self, _: &PeerMessage) {}
}

///
/// MemoryBroadcast
///
/// Buffering channel for tests: one side posts, the test shuttles the
/// buffer into a peer engine.
///

#[derive(Debug, Default)]
pub struct MemoryBroadcast {
    outbox: RefCell<Vec<PeerMessage>>,
}

impl MemoryBroadcast {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn drain(&self) -> Vec<PeerMessage> {
        self.outbox.borrow_mut().drain(..).collect()
    }
}

impl BroadcastChannel for MemoryBroadcast {
    fn post(&self, message: &PeerMessage) {
        self.outbox.borrow_mut().push(message.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_are_ignored_on_decode() {
        let raw = serde_json::json!({
            "events": [],
            "sequence": 7,
            "futureField": {"anything": true}
        });

        let message: PeerMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(message.sequence, 7);
        assert!(message.envelope.is_none());
    }

    #[test]
    fn watermark_is_the_highest_event_sequence() {
        use crate::{model::event::ChangeKind, types::{NodeId, TreeId}};

        let events = vec![
            ChangeEvent {
                seq: 3,
                tree_id: TreeId::nil(),
                kind: ChangeKind::NodeUpdated {
                    node_id: NodeId::nil(),
                    parent_id: NodeId::nil(),
                },
            },
            ChangeEvent {
                seq: 5,
                tree_id: TreeId::nil(),
                kind: ChangeKind::NodeUpdated {
                    node_id: NodeId::nil(),
                    parent_id: NodeId::nil(),
                },
            },
        ];

        assert_eq!(PeerMessage::for_events(None, events).sequence, 5);
    }
}
