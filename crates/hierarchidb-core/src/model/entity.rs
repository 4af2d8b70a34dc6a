use crate::{
    model::define_tag,
    types::{EntityId, NodeId, Timestamp},
    value::{ContentHash, Value},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

define_tag!(
    /// Key of a 1:N group-entity family under a node ("featureBuffer",
    /// "chunk", …).
    GroupTypeTag
);

define_tag!(
    /// Key of a shared relational-entity kind ("styleSheet", "tileSource", …).
    RelationalKindTag
);

///
/// PeerEntity
///
/// The payload owned 1:1 by a node. Identified by its own entity id but
/// keyed by `node_id`; deleting the node deletes the peer.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerEntity {
    pub entity_id: EntityId,
    pub node_id: NodeId,
    pub payload: Value,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub version: u64,
}

impl PeerEntity {
    pub const fn touch(&mut self, now: Timestamp) {
        if now.as_millis() > self.updated_at.as_millis() {
            self.updated_at = now;
        }
        self.version = self.version.saturating_add(1);
    }
}

///
/// GroupEntity
///
/// A 1:N child record of a node, ordered by `ordinal` within its group
/// type. Cascaded on node deletion.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupEntity {
    pub entity_id: EntityId,
    pub node_id: NodeId,
    pub group_type: GroupTypeTag,
    pub ordinal: u32,
    pub payload: Value,
    pub created_at: Timestamp,
}

///
/// RelationalEntity
///
/// Shared content addressed by the hash of its payload. Lives exactly as
/// long as its reference count is positive; the count mutates only inside
/// the transaction of the referencing peer.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationalEntity {
    pub hash: ContentHash,
    pub kind: RelationalKindTag,
    pub payload: Value,
    pub ref_count: u32,
    pub created_at: Timestamp,
}

///
/// EntityBackup
///
/// Atomic snapshot of a node's peer and group entities, used by restore,
/// duplication, and undo image capture.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityBackup {
    pub entity: PeerEntity,
    pub group_entities: BTreeMap<GroupTypeTag, Vec<GroupEntity>>,
    /// Shared rows referenced by the peer at snapshot time, so a restore
    /// can resurrect content whose last reference was dropped in between.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relational: Vec<RelationalEntity>,
    pub metadata: BackupMetadata,
}

///
/// BackupMetadata
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub backup_date: Timestamp,
}
