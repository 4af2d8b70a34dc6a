use crate::types::{NodeId, Timestamp, TreeId};
use serde::{Deserialize, Serialize};

///
/// Tree
///
/// A named root container. The live root and the trash root share one node
/// space; "trashed" is a location, not a separate store.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tree {
    pub id: TreeId,
    pub name: String,
    pub live_root_id: NodeId,
    pub trash_root_id: NodeId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Tree {
    #[must_use]
    pub fn is_root(&self, node_id: NodeId) -> bool {
        node_id == self.live_root_id || node_id == self.trash_root_id
    }
}
