//! Per-tree undo/redo rings, persisted next to the data they revert.
//!
//! Every command group is stored as the raw row images its transaction
//! produced. Undo replays `before` images in reverse, redo replays `after`
//! images in order; both emit fresh sequence numbers, never the originals.

use crate::{
    error::{CoreError, ErrorCode, ErrorOrigin},
    model::event::ChangeKind,
    schema,
    store::{RowImage, Transaction, decode_row, encode_row},
    types::{GroupId, Timestamp, TreeId},
};
use serde::{Deserialize, Serialize};

///
/// UndoGroup
///
/// One undo step: every row image of one command group plus the events the
/// group emitted, for synthesising the replay's observations.
///

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UndoGroup {
    pub group_id: GroupId,
    pub label: String,
    pub images: Vec<RowImage>,
    pub events: Vec<ChangeKind>,
    pub created_at: Timestamp,
}

fn last_entry(
    txn: &Transaction<'_>,
    table: &str,
) -> Result<Option<(u64, UndoGroup)>, CoreError> {
    let Some((key, bytes)) = txn.scan_prefix(table, &[]).into_iter().next_back() else {
        return Ok(None);
    };
    let seq = schema::decode_log_key(&key).ok_or_else(|| {
        CoreError::internal(ErrorOrigin::Command, "malformed history log key")
    })?;

    Ok(Some((seq, decode_row(&bytes)?)))
}

fn entry_count(txn: &Transaction<'_>, table: &str) -> u64 {
    txn.count_prefix(table, &[])
}

/// Append a command group to a tree's undo ring and truncate the redo
/// ring. Consecutive entries sharing a `group_id` collapse into one step.
/// The ring evicts oldest-first at capacity.
pub fn append(
    txn: &mut Transaction<'_>,
    tree_id: TreeId,
    group: UndoGroup,
    capacity: usize,
) -> Result<(), CoreError> {
    let undo_table = schema::undo_table(tree_id);

    match last_entry(txn, &undo_table)? {
        Some((seq, mut top)) if top.group_id == group.group_id => {
            top.images.extend(group.images);
            top.events.extend(group.events);
            let bytes = encode_row(&top)?;
            txn.put(&undo_table, &schema::log_key(seq), bytes);
        }
        Some((seq, _)) => {
            let bytes = encode_row(&group)?;
            txn.put(&undo_table, &schema::log_key(seq + 1), bytes);
        }
        None => {
            let bytes = encode_row(&group)?;
            txn.put(&undo_table, &schema::log_key(1), bytes);
        }
    }

    // oldest-first eviction
    let mut excess = entry_count(txn, &undo_table).saturating_sub(capacity as u64);
    if excess > 0 {
        for (key, _) in txn.scan_prefix(&undo_table, &[]) {
            if excess == 0 {
                break;
            }
            txn.delete(&undo_table, &key);
            excess -= 1;
        }
    }

    truncate(txn, &schema::redo_table(tree_id));

    Ok(())
}

fn truncate(txn: &mut Transaction<'_>, table: &str) {
    for (key, _) in txn.scan_prefix(table, &[]) {
        txn.delete(table, &key);
    }
}

fn nothing_to(action: &str) -> CoreError {
    CoreError::new(
        ErrorCode::Internal,
        ErrorOrigin::Command,
        format!("nothing to {action}"),
    )
}

/// Pop the top undo group, replay its `before` images in reverse, park it
/// on the redo ring, and return the inverted events in reverse order.
pub fn undo(txn: &mut Transaction<'_>, tree_id: TreeId) -> Result<(UndoGroup, Vec<ChangeKind>), CoreError> {
    let undo_table = schema::undo_table(tree_id);
    let (seq, group) = last_entry(txn, &undo_table)?.ok_or_else(|| nothing_to("undo"))?;

    for image in group.images.iter().rev() {
        match &image.before {
            Some(bytes) => txn.put(&image.table, &image.key, bytes.clone()),
            None => txn.delete(&image.table, &image.key),
        }
    }

    txn.delete(&undo_table, &schema::log_key(seq));

    let redo_table = schema::redo_table(tree_id);
    let next = last_entry(txn, &redo_table)?.map_or(1, |(seq, _)| seq + 1);
    let bytes = encode_row(&group)?;
    txn.put(&redo_table, &schema::log_key(next), bytes);

    let replay_events = group
        .events
        .iter()
        .rev()
        .map(ChangeKind::inverted)
        .collect();

    Ok((group, replay_events))
}

/// Pop the top redo group, replay its `after` images in order, park it
/// back on the undo ring, and return the original events for re-emission.
pub fn redo(txn: &mut Transaction<'_>, tree_id: TreeId) -> Result<(UndoGroup, Vec<ChangeKind>), CoreError> {
    let redo_table = schema::redo_table(tree_id);
    let (seq, group) = last_entry(txn, &redo_table)?.ok_or_else(|| nothing_to("redo"))?;

    for image in &group.images {
        match &image.after {
            Some(bytes) => txn.put(&image.table, &image.key, bytes.clone()),
            None => txn.delete(&image.table, &image.key),
        }
    }

    txn.delete(&redo_table, &schema::log_key(seq));

    let undo_table = schema::undo_table(tree_id);
    let next = last_entry(txn, &undo_table)?.map_or(1, |(seq, _)| seq + 1);
    let bytes = encode_row(&group)?;
    txn.put(&undo_table, &schema::log_key(next), bytes);

    let replay_events = group.events.clone();

    Ok((group, replay_events))
}

/// Drop both rings.
pub fn clear(txn: &mut Transaction<'_>, tree_id: TreeId) {
    truncate(txn, &schema::undo_table(tree_id));
    truncate(txn, &schema::redo_table(tree_id));
}

#[must_use]
pub fn can_undo(txn: &Transaction<'_>, tree_id: TreeId) -> bool {
    entry_count(txn, &schema::undo_table(tree_id)) > 0
}

#[must_use]
pub fn can_redo(txn: &Transaction<'_>, tree_id: TreeId) -> bool {
    entry_count(txn, &schema::redo_table(tree_id)) > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{store::MemoryStore, types::Ulid};

    fn group(n: u128, image: RowImage) -> UndoGroup {
        UndoGroup {
            group_id: GroupId::from_ulid(Ulid::from_parts(1, n)),
            label: "test".to_string(),
            images: vec![image],
            events: Vec::new(),
            created_at: Timestamp::from_millis(1),
        }
    }

    fn image(key: &[u8], before: Option<&[u8]>, after: Option<&[u8]>) -> RowImage {
        RowImage {
            table: "t".to_string(),
            key: key.to_vec(),
            before: before.map(<[u8]>::to_vec),
            after: after.map(<[u8]>::to_vec),
        }
    }

    #[test]
    fn consecutive_same_group_entries_collapse() {
        let store = MemoryStore::new();
        let tree = TreeId::nil();
        let mut txn = Transaction::new(&store);

        append(&mut txn, tree, group(1, image(b"a", None, Some(b"1"))), 10).unwrap();
        append(&mut txn, tree, group(1, image(b"b", None, Some(b"2"))), 10).unwrap();
        append(&mut txn, tree, group(2, image(b"c", None, Some(b"3"))), 10).unwrap();

        assert_eq!(entry_count(&txn, &schema::undo_table(tree)), 2);
        let (_, top) = last_entry(&txn, &schema::undo_table(tree)).unwrap().unwrap();
        assert_eq!(top.images.len(), 1);
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let store = MemoryStore::new();
        let tree = TreeId::nil();
        let mut txn = Transaction::new(&store);

        for n in 1..=4 {
            append(&mut txn, tree, group(n, image(b"k", None, Some(b"v"))), 3).unwrap();
        }

        let table = schema::undo_table(tree);
        assert_eq!(entry_count(&txn, &table), 3);
        let keys: Vec<u64> = txn
            .scan_prefix(&table, &[])
            .into_iter()
            .filter_map(|(key, _)| schema::decode_log_key(&key))
            .collect();
        assert_eq!(keys, vec![2, 3, 4]);
    }

    #[test]
    fn undo_replays_before_images_and_parks_on_redo() {
        let store = MemoryStore::new();
        let tree = TreeId::nil();
        let mut txn = Transaction::new(&store);

        txn.put("t", b"a", b"1".to_vec());
        append(
            &mut txn,
            tree,
            group(1, image(b"a", None, Some(b"1"))),
            10,
        )
        .unwrap();

        undo(&mut txn, tree).unwrap();
        assert_eq!(txn.get("t", b"a"), None);
        assert!(!can_undo(&txn, tree));
        assert!(can_redo(&txn, tree));

        redo(&mut txn, tree).unwrap();
        assert_eq!(txn.get("t", b"a"), Some(b"1".to_vec()));
        assert!(can_undo(&txn, tree));
        assert!(!can_redo(&txn, tree));
    }

    #[test]
    fn new_append_truncates_redo() {
        let store = MemoryStore::new();
        let tree = TreeId::nil();
        let mut txn = Transaction::new(&store);

        append(&mut txn, tree, group(1, image(b"a", None, Some(b"1"))), 10).unwrap();
        undo(&mut txn, tree).unwrap();
        assert!(can_redo(&txn, tree));

        append(&mut txn, tree, group(2, image(b"b", None, Some(b"2"))), 10).unwrap();
        assert!(!can_redo(&txn, tree));
    }

    #[test]
    fn undo_on_empty_ring_fails() {
        let store = MemoryStore::new();
        let mut txn = Transaction::new(&store);

        let err = undo(&mut txn, TreeId::nil()).unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
    }
}
