use crate::types::{NodeId, Timestamp, TreeId};
use serde::{Deserialize, Serialize};

///
/// ChangeKind
///
/// The tagged union observed after every committed mutation. Move events
/// carry both parents so children/subtree observers can classify them as
/// move-in, move-out, or internal.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ChangeKind {
    NodeCreated {
        node_id: NodeId,
        parent_id: NodeId,
    },
    NodeUpdated {
        node_id: NodeId,
        parent_id: NodeId,
    },
    NodeMoved {
        node_id: NodeId,
        from_parent_id: NodeId,
        to_parent_id: NodeId,
        /// Set when the move carried the node into the trash.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        removed_at: Option<Timestamp>,
    },
    NodeDeleted {
        node_id: NodeId,
        parent_id: NodeId,
    },
    NodeRestored {
        node_id: NodeId,
        from_parent_id: NodeId,
        to_parent_id: NodeId,
    },
}

impl ChangeKind {
    #[must_use]
    pub const fn node_id(&self) -> NodeId {
        match self {
            Self::NodeCreated { node_id, .. }
            | Self::NodeUpdated { node_id, .. }
            | Self::NodeMoved { node_id, .. }
            | Self::NodeDeleted { node_id, .. }
            | Self::NodeRestored { node_id, .. } => *node_id,
        }
    }

    /// `(previous parent, new parent)`; equal for in-place events.
    #[must_use]
    pub const fn parents(&self) -> (NodeId, NodeId) {
        match self {
            Self::NodeCreated { parent_id, .. }
            | Self::NodeUpdated { parent_id, .. }
            | Self::NodeDeleted { parent_id, .. } => (*parent_id, *parent_id),
            Self::NodeMoved {
                from_parent_id,
                to_parent_id,
                ..
            }
            | Self::NodeRestored {
                from_parent_id,
                to_parent_id,
                ..
            } => (*from_parent_id, *to_parent_id),
        }
    }

    /// The observation an undo of this event produces. Undo replays emit
    /// these in reverse order with fresh sequence numbers.
    #[must_use]
    pub const fn inverted(&self) -> Self {
        match self {
            Self::NodeCreated { node_id, parent_id } => Self::NodeDeleted {
                node_id: *node_id,
                parent_id: *parent_id,
            },
            Self::NodeDeleted { node_id, parent_id } => Self::NodeCreated {
                node_id: *node_id,
                parent_id: *parent_id,
            },
            Self::NodeUpdated { node_id, parent_id } => Self::NodeUpdated {
                node_id: *node_id,
                parent_id: *parent_id,
            },
            Self::NodeMoved {
                node_id,
                from_parent_id,
                to_parent_id,
                ..
            } => Self::NodeMoved {
                node_id: *node_id,
                from_parent_id: *to_parent_id,
                to_parent_id: *from_parent_id,
                removed_at: None,
            },
            Self::NodeRestored {
                node_id,
                from_parent_id,
                to_parent_id,
            } => Self::NodeMoved {
                node_id: *node_id,
                from_parent_id: *to_parent_id,
                to_parent_id: *from_parent_id,
                removed_at: None,
            },
        }
    }
}

///
/// ChangeEvent
///
/// A `ChangeKind` stamped with its tree and the tree's strictly increasing
/// sequence number. The sequence is the cross-tab deduplication key.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub seq: u64,
    pub tree_id: TreeId,
    #[serde(flatten)]
    pub kind: ChangeKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_inversion_swaps_parents() {
        let from = NodeId::nil();
        let to = NodeId::from_ulid(crate::types::Ulid::from_parts(1, 1));
        let event = ChangeKind::NodeMoved {
            node_id: NodeId::nil(),
            from_parent_id: from,
            to_parent_id: to,
            removed_at: Some(Timestamp::from_millis(9)),
        };

        let ChangeKind::NodeMoved {
            from_parent_id,
            to_parent_id,
            removed_at,
            ..
        } = event.inverted()
        else {
            panic!("move inverts to move");
        };

        assert_eq!(from_parent_id, to);
        assert_eq!(to_parent_id, from);
        assert_eq!(removed_at, None);
    }

    #[test]
    fn create_inverts_to_delete() {
        let event = ChangeKind::NodeCreated {
            node_id: NodeId::nil(),
            parent_id: NodeId::nil(),
        };

        assert!(matches!(event.inverted(), ChangeKind::NodeDeleted { .. }));
    }
}
