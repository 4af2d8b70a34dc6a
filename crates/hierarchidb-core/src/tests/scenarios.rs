//! The end-to-end flows a host actually runs, exercised through the facade.

use crate::{
    error::ErrorCode,
    model::{
        envelope::{
            Command, CommitWorkingCopySpec, CreateSpec, CreateWorkingCopySpec, HistorySpec,
            MoveSpec, NameConflictPolicy, NodeSetSpec, RecoverSpec, UpdateSpec, WorkingCopyRefSpec,
        },
        event::ChangeKind,
    },
    subscription::{SubscriptionEventKind, SubscriptionOptions, VecSink},
    test_support::test_db,
    types::{Ulid, WorkingCopyId},
};
use std::rc::Rc;

#[test]
fn create_rename_trash_recover_round_trip() {
    let t = test_db();
    let root = t.tree.live_root_id;

    let sink = Rc::new(VecSink::new());
    t.db.observe_children(
        t.view,
        root,
        SubscriptionOptions::default(),
        sink.clone(),
    )
    .unwrap();

    let n1 = t.create_folder(root, "A");

    t.clock.advance(10);
    t.dispatch_ok(Command::Update(UpdateSpec {
        node_id: n1,
        name: Some("B".to_string()),
        description: None,
        payload: None,
        expected_updated_at: None,
    }));

    t.clock.advance(10);
    t.dispatch_ok(Command::MoveToTrash(NodeSetSpec { node_ids: vec![n1] }));

    t.clock.advance(10);
    t.dispatch_ok(Command::RecoverFromTrash(RecoverSpec {
        node_ids: vec![n1],
        to_parent_id: None,
    }));

    // one live node under the root, renamed, version create+update+trash
    let children = t.db.get_children(root, crate::query::ChildrenOptions::default()).unwrap();
    assert_eq!(children.len(), 1);
    let node = &children[0];
    assert_eq!(node.id, n1);
    assert_eq!(node.name, "B");
    assert_eq!(node.version, 3);
    assert_eq!(node.removed_at, None);
    assert_eq!(node.original_parent_id, None);

    // subscribers observed exactly [+n1, ~n1, -n1, +n1]
    let observed = sink.drain();
    assert_eq!(observed.len(), 4);
    assert!(matches!(
        observed[0].kind,
        SubscriptionEventKind::Changed(ChangeKind::NodeCreated { node_id, .. }) if node_id == n1
    ));
    assert!(matches!(
        observed[1].kind,
        SubscriptionEventKind::Changed(ChangeKind::NodeUpdated { node_id, .. }) if node_id == n1
    ));
    assert!(matches!(
        observed[2].kind,
        SubscriptionEventKind::MovedOut(ChangeKind::NodeMoved {
            node_id,
            removed_at: Some(_),
            ..
        }) if node_id == n1
    ));
    assert!(matches!(
        observed[3].kind,
        SubscriptionEventKind::MovedIn(ChangeKind::NodeRestored { node_id, .. }) if node_id == n1
    ));

    // events arrived in strictly increasing sequence order
    for pair in observed.windows(2) {
        assert!(pair[0].seq < pair[1].seq);
    }
}

#[test]
fn auto_rename_counts_up_per_collision() {
    let t = test_db();
    let root = t.tree.live_root_id;

    t.create_folder(root, "A");
    let second = t.create_folder_with(root, "A", NameConflictPolicy::AutoRename);
    let third = t.create_folder_with(root, "A", NameConflictPolicy::AutoRename);

    assert_eq!(t.node(second).name, "A (2)");
    assert_eq!(t.node(third).name, "A (3)");
}

#[test]
fn stale_working_copy_commit_conflicts_and_discard_leaves_live_state() {
    let t = test_db();
    let root = t.tree.live_root_id;
    let n = t.create_folder(root, "Doc");
    let wc_id = WorkingCopyId::from_ulid(Ulid::from_parts(9, 9));

    t.dispatch_ok(Command::CreateWorkingCopy(CreateWorkingCopySpec {
        working_copy_id: wc_id,
        source_node_id: n,
    }));

    // an external update advances the node past the draft's snapshot
    t.clock.advance(500);
    t.dispatch_ok(Command::Update(UpdateSpec {
        node_id: n,
        name: None,
        description: Some("changed elsewhere".to_string()),
        payload: None,
        expected_updated_at: None,
    }));
    let updated_at = t.node(n).updated_at;

    let commit = t.envelope(Command::CommitWorkingCopy(CommitWorkingCopySpec {
        working_copy_id: wc_id,
        expected_updated_at: None,
    }));
    let response = t.db.dispatch(&commit);
    assert!(!response.success);
    assert_eq!(response.code, Some(ErrorCode::VersionConflict));

    t.dispatch_ok(Command::DiscardWorkingCopy(WorkingCopyRefSpec {
        working_copy_id: wc_id,
    }));

    // the live node still carries the external update
    assert_eq!(t.node(n).updated_at, updated_at);
    assert!(t.db.get_working_copy(wc_id).unwrap().is_none());
}

#[test]
fn moving_an_ancestor_under_its_descendant_is_rejected() {
    let t = test_db();
    let root = t.tree.live_root_id;
    let p = t.create_folder(root, "p");
    let c = t.create_folder(p, "c");

    let before = t.dump_domain();
    let envelope = t.envelope(Command::MoveNodes(MoveSpec {
        node_ids: vec![p],
        to_parent_id: c,
    }));
    let response = t.db.dispatch(&envelope);

    assert!(!response.success);
    assert_eq!(response.code, Some(ErrorCode::CycleDetected));
    // the whole transaction rolled back
    assert_eq!(t.dump_domain(), before);
}

#[test]
fn grouped_commands_undo_as_one_atomic_step() {
    let t = test_db();
    let root = t.tree.live_root_id;

    let sink = Rc::new(VecSink::new());
    t.db.observe_subtree(
        t.view,
        root,
        SubscriptionOptions::default(),
        sink.clone(),
    )
    .unwrap();

    // one user action, three commands, one shared group id
    let mut e1 = t.envelope(Command::Create(CreateSpec {
        parent_id: root,
        node_type: crate::model::node::NodeTypeTag::folder(),
        name: "n1".to_string(),
        description: None,
        payload: None,
    }));
    let group = e1.group_id;
    let n1 = {
        let outcome = t.db.dispatch_detailed(&e1);
        assert!(outcome.response.success);
        outcome.created_node_id.unwrap()
    };

    let mut e2 = t.envelope(Command::Create(CreateSpec {
        parent_id: n1,
        node_type: crate::model::node::NodeTypeTag::folder(),
        name: "n2".to_string(),
        description: None,
        payload: None,
    }));
    e2.group_id = group;
    let n2 = {
        let outcome = t.db.dispatch_detailed(&e2);
        assert!(outcome.response.success);
        outcome.created_node_id.unwrap()
    };

    let mut e3 = t.envelope(Command::Update(UpdateSpec {
        node_id: n1,
        name: Some("renamed".to_string()),
        description: None,
        payload: None,
        expected_updated_at: None,
    }));
    e3.group_id = group;
    assert!(t.db.dispatch(&e3).success);

    let max_seq_before_undo = sink.drain().into_iter().map(|event| event.seq).max().unwrap();

    assert!(t.db.can_undo(t.tree.id));
    t.dispatch_ok(Command::Undo(HistorySpec { tree_id: t.tree.id }));

    // both nodes are gone in one step
    assert!(t.db.get_node(n1).unwrap().is_none());
    assert!(t.db.get_node(n2).unwrap().is_none());
    assert!(!t.db.can_undo(t.tree.id));
    assert!(t.db.can_redo(t.tree.id));

    // replay observations arrive in reverse order with fresh sequences
    let replay = sink.drain();
    let kinds: Vec<_> = replay.iter().map(|event| &event.kind).collect();
    assert_eq!(replay.len(), 3);
    assert!(matches!(
        kinds[0],
        SubscriptionEventKind::Changed(ChangeKind::NodeUpdated { node_id, .. }) if *node_id == n1
    ));
    assert!(matches!(
        kinds[1],
        SubscriptionEventKind::Changed(ChangeKind::NodeDeleted { node_id, .. }) if *node_id == n2
    ));
    assert!(matches!(
        kinds[2],
        SubscriptionEventKind::Changed(ChangeKind::NodeDeleted { node_id, .. }) if *node_id == n1
    ));
    assert!(replay.iter().all(|event| event.seq > max_seq_before_undo));

    // redo returns to the post-apply state
    t.dispatch_ok(Command::Redo(HistorySpec { tree_id: t.tree.id }));
    assert_eq!(t.node(n1).name, "renamed");
    assert!(t.db.get_node(n2).unwrap().is_some());
}

#[test]
fn empty_and_oversized_names_are_rejected_at_the_boundary() {
    let t = test_db();
    let root = t.tree.live_root_id;

    for name in [String::new(), "x".repeat(crate::MAX_NODE_NAME_CHARS + 1)] {
        let envelope = t.envelope(Command::Create(CreateSpec {
            parent_id: root,
            node_type: crate::model::node::NodeTypeTag::folder(),
            name,
            description: None,
            payload: None,
        }));
        let response = t.db.dispatch(&envelope);
        assert!(!response.success);
        assert_eq!(response.code, Some(ErrorCode::NameValidationFailed));
    }
}

#[test]
fn ring_at_capacity_evicts_the_oldest_group() {
    let t = crate::test_support::test_db_with(crate::api::InitConfig {
        history_capacity: 2,
        id_seed: 7,
        ..crate::api::InitConfig::default()
    });
    let root = t.tree.live_root_id;

    let a = t.create_folder(root, "a");
    let b = t.create_folder(root, "b");
    let c = t.create_folder(root, "c");

    // two undo steps survive, the creation of `a` was evicted
    t.dispatch_ok(Command::Undo(HistorySpec { tree_id: t.tree.id }));
    t.dispatch_ok(Command::Undo(HistorySpec { tree_id: t.tree.id }));
    assert!(!t.db.can_undo(t.tree.id));

    assert!(t.db.get_node(a).unwrap().is_some());
    assert!(t.db.get_node(b).unwrap().is_none());
    assert!(t.db.get_node(c).unwrap().is_none());
}

#[test]
fn overwrite_policy_displaces_the_sibling_subtree_and_is_undoable() {
    let t = test_db();
    let root = t.tree.live_root_id;

    let old = t.create_folder(root, "Report");
    let old_child = t.create_folder(old, "chapter");
    let before_overwrite = t.dump_domain();

    let replacement = t.create_folder_with(root, "Report", NameConflictPolicy::Overwrite);
    assert!(t.db.get_node(old).unwrap().is_none());
    assert!(t.db.get_node(old_child).unwrap().is_none());
    assert_eq!(t.node(replacement).name, "Report");

    // the displaced subtree comes back with the overwriting create undone
    t.dispatch_ok(Command::Undo(HistorySpec { tree_id: t.tree.id }));
    assert_eq!(t.dump_domain(), before_overwrite);
}

#[test]
fn working_copy_for_create_materialises_only_on_commit() {
    let t = test_db();
    let root = t.tree.live_root_id;
    let wc_id = WorkingCopyId::from_ulid(Ulid::from_parts(4, 4));

    t.dispatch_ok(Command::CreateWorkingCopyForCreate(
        crate::model::envelope::CreateDraftSpec {
            working_copy_id: wc_id,
            parent_node_id: root,
            node_type: crate::model::node::NodeTypeTag::folder(),
            name: "Draft".to_string(),
            description: None,
            payload: None,
        },
    ));

    // nothing under the parent yet
    assert!(t.db.get_children(root, crate::query::ChildrenOptions::default())
        .unwrap()
        .is_empty());

    let outcome = t.dispatch_ok(Command::CommitWorkingCopyForCreate(WorkingCopyRefSpec {
        working_copy_id: wc_id,
    }));
    let node_id = outcome.created_node_id.unwrap();
    assert_eq!(outcome.events.len(), 1);
    assert!(matches!(
        outcome.events[0].kind,
        ChangeKind::NodeCreated { .. }
    ));

    assert_eq!(t.node(node_id).name, "Draft");
    assert!(t.db.get_working_copy(wc_id).unwrap().is_none());
}

#[test]
fn cut_paste_moves_subtrees_through_the_clipboard() {
    let t = test_db();
    let root = t.tree.live_root_id;
    let src = t.create_folder(root, "src");
    let doc = t.create_folder(src, "doc");
    let dst = t.create_folder(root, "dst");

    t.db.clipboard_cut(t.view, vec![doc]);
    t.dispatch_ok(Command::PasteNodes(crate::model::envelope::PasteSpec {
        to_parent_id: dst,
    }));

    // source gone, one copy under the destination
    assert!(t.db.get_node(doc).unwrap().is_none());
    let pasted = t.db.get_children(dst, crate::query::ChildrenOptions::default()).unwrap();
    assert_eq!(pasted.len(), 1);
    assert_eq!(pasted[0].name, "doc");

    // cut clipboard was consumed; a second paste fails
    let envelope = t.envelope(Command::PasteNodes(crate::model::envelope::PasteSpec {
        to_parent_id: dst,
    }));
    assert!(!t.db.dispatch(&envelope).success);
}
