//! Engine-wide invariants and round-trip laws checked against the public
//! surface, with proptest where generated inputs pull their weight.

use crate::{
    entity::{BaseEntityHandler, EntityHandler},
    model::{
        entity::RelationalKindTag,
        envelope::{
            Command, CreateSpec, CreateWorkingCopySpec, DuplicateSpec, HistorySpec, MoveSpec,
            NameConflictPolicy, NodeSetSpec, RecoverSpec, UpdateSpec, WorkingCopyRefSpec,
        },
        node::NodeTypeTag,
    },
    registry::NodeTypeDef,
    store::Transaction,
    subscription::{SubscriptionEventKind, SubscriptionOptions, VecSink},
    test_support::{TestDb, test_db},
    types::{CancelToken, NodeId, Ulid, WorkingCopyId},
    value::{ContentHash, Value},
};
use proptest::prelude::*;
use std::{collections::BTreeSet, rc::Rc};

const BASEMAP: &str = "basemap";

fn basemap_handler() -> BaseEntityHandler {
    BaseEntityHandler::new(NodeTypeTag::new(BASEMAP))
        .with_relational(RelationalKindTag::new("styleSheet"), "style")
}

fn register_basemap(t: &TestDb) {
    t.db.register_node_type(NodeTypeDef::with_handler(
        NodeTypeTag::new(BASEMAP),
        "Basemap",
        Rc::new(basemap_handler()),
    ));
}

fn style_payload() -> Value {
    let mut style = Value::map();
    style.set("theme", Value::from("dark")).unwrap();
    let mut payload = Value::map();
    payload.set("style", style).unwrap();
    payload
}

fn create_basemap(t: &TestDb, parent: NodeId, name: &str) -> NodeId {
    t.dispatch_ok(Command::Create(CreateSpec {
        parent_id: parent,
        node_type: NodeTypeTag::new(BASEMAP),
        name: name.to_string(),
        description: None,
        payload: Some(style_payload()),
    }))
    .created_node_id
    .unwrap()
}

fn style_hash_of(t: &TestDb, node: NodeId) -> ContentHash {
    let handler = basemap_handler();
    let txn = Transaction::new(t.db.backend_for_tests());
    let entity = handler.get_entity(&txn, node).unwrap().unwrap();

    ContentHash::from_hex(entity.payload.get("style").unwrap().as_text().unwrap())
}

fn ref_count_of(t: &TestDb, hash: &ContentHash) -> Option<u32> {
    let handler = basemap_handler();
    let txn = Transaction::new(t.db.backend_for_tests());
    handler
        .get_relational(&txn, hash)
        .unwrap()
        .map(|row| row.ref_count)
}

// ---------------------------------------------------------------------
// Invariants
// ---------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // no two live siblings share a name, whatever the collision storm
    #[test]
    fn sibling_names_stay_unique_under_auto_rename(
        names in prop::collection::vec("[abc]{1,2}", 1..12)
    ) {
        let t = test_db();
        let root = t.tree.live_root_id;

        for name in &names {
            t.create_folder_with(root, name, NameConflictPolicy::AutoRename);
        }

        let children = t.db.get_children(root, crate::query::ChildrenOptions::default()).unwrap();
        let unique: BTreeSet<&str> = children.iter().map(|node| node.name.as_str()).collect();
        prop_assert_eq!(children.len(), names.len());
        prop_assert_eq!(unique.len(), children.len());
    }

    // version and updatedAt never decrease along a node's lifetime
    #[test]
    fn version_and_stamp_are_monotonic(ops in prop::collection::vec(0u8..3, 1..10)) {
        let t = test_db();
        let root = t.tree.live_root_id;
        let node = t.create_folder(root, "n");

        let mut last = t.node(node);
        for (step, op) in ops.iter().enumerate() {
            t.clock.advance(7);
            let command = match op {
                0 => Command::Update(UpdateSpec {
                    node_id: node,
                    name: Some(format!("n{step}")),
                    description: None,
                    payload: None,
                    expected_updated_at: None,
                }),
                1 if !last.is_trashed() => Command::MoveToTrash(NodeSetSpec { node_ids: vec![node] }),
                _ if last.is_trashed() => Command::RecoverFromTrash(RecoverSpec {
                    node_ids: vec![node],
                    to_parent_id: None,
                }),
                _ => continue,
            };
            let envelope = t.envelope(command);
            prop_assert!(t.db.dispatch(&envelope).success);

            let current = t.node(node);
            prop_assert!(current.version >= last.version);
            prop_assert!(current.updated_at >= last.updated_at);
            last = current;
        }
    }
}

// every ancestor chain terminates at the live root or the trash root
#[test]
fn ancestor_chains_terminate_at_a_root() {
    let t = test_db();
    let root = t.tree.live_root_id;
    let a = t.create_folder(root, "a");
    let b = t.create_folder(a, "b");
    let c = t.create_folder(b, "c");
    t.dispatch_ok(Command::MoveToTrash(NodeSetSpec { node_ids: vec![b] }));

    for node in [a, b, c] {
        let path = t.db.get_ancestors(node).unwrap();
        let top = path.first().unwrap();
        assert!(
            top.id == t.tree.live_root_id || top.id == t.tree.trash_root_id,
            "chain of {node} ends at {}",
            top.id
        );
    }
}

// a node with a peer-owning type exists iff its peer entity exists
#[test]
fn peer_entity_lives_and_dies_with_its_node() {
    let t = test_db();
    register_basemap(&t);
    let root = t.tree.live_root_id;

    let node = create_basemap(&t, root, "map");
    let handler = basemap_handler();
    {
        let txn = Transaction::new(t.db.backend_for_tests());
        assert!(handler.get_entity(&txn, node).unwrap().is_some());
    }

    t.dispatch_ok(Command::PermanentDelete(NodeSetSpec {
        node_ids: vec![node],
    }));
    let txn = Transaction::new(t.db.backend_for_tests());
    assert!(handler.get_entity(&txn, node).unwrap().is_none());
    assert!(t.db.get_node(node).unwrap().is_none());
}

// two peers share one relational row; the row dies with its
// last reference, in the releasing transaction.
#[test]
fn relational_ref_count_tracks_live_referencing_peers() {
    let t = test_db();
    register_basemap(&t);
    let root = t.tree.live_root_id;

    let a = create_basemap(&t, root, "A");
    let b = create_basemap(&t, root, "B");
    let hash = style_hash_of(&t, a);
    assert_eq!(style_hash_of(&t, b), hash);
    assert_eq!(ref_count_of(&t, &hash), Some(2));

    t.dispatch_ok(Command::PermanentDelete(NodeSetSpec { node_ids: vec![a] }));
    assert_eq!(ref_count_of(&t, &hash), Some(1));

    t.dispatch_ok(Command::PermanentDelete(NodeSetSpec { node_ids: vec![b] }));
    assert_eq!(ref_count_of(&t, &hash), None);
}

// the per-tree stream is gapless and strictly increasing; a full-scope
// subtree observer witnesses it end to end.
#[test]
fn tree_event_stream_is_gapless_and_ordered() {
    let t = test_db();
    let root = t.tree.live_root_id;

    let sink = Rc::new(VecSink::new());
    t.db.observe_subtree(t.view, root, SubscriptionOptions::default(), sink.clone())
        .unwrap();

    let a = t.create_folder(root, "a");
    let b = t.create_folder(root, "b");
    t.dispatch_ok(Command::MoveNodes(MoveSpec {
        node_ids: vec![a, b],
        to_parent_id: root,
    }));
    t.dispatch_ok(Command::MoveToTrash(NodeSetSpec { node_ids: vec![a] }));

    let seqs: Vec<u64> = sink.drain().into_iter().map(|event| event.seq).collect();
    let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
    assert_eq!(seqs, expected);
}

// drafts never leak into live reads, and create-then-discard is
// bit-identical.
#[test]
fn working_copies_are_invisible_and_discard_restores_exactly() {
    let t = test_db();
    let root = t.tree.live_root_id;
    let node = t.create_folder(root, "Doc");
    let before = t.dump_domain();

    let wc_id = WorkingCopyId::from_ulid(Ulid::from_parts(2, 2));
    t.dispatch_ok(Command::CreateWorkingCopy(CreateWorkingCopySpec {
        working_copy_id: wc_id,
        source_node_id: node,
    }));
    t.db.update_working_copy(wc_id, Some("Draft name".to_string()), None, None)
        .unwrap();

    // live reads see the committed node only
    assert_eq!(t.node(node).name, "Doc");
    let hits = t
        .db
        .search_by_name(t.tree.id, "draft", None, &CancelToken::new())
        .unwrap();
    assert!(hits.is_empty());

    t.dispatch_ok(Command::DiscardWorkingCopy(WorkingCopyRefSpec {
        working_copy_id: wc_id,
    }));
    assert_eq!(t.dump_domain(), before);
}

// ---------------------------------------------------------------------
// Round-trip laws
// ---------------------------------------------------------------------

// apply;undo restores and redo re-applies, for every primitive mutation
#[test]
fn every_mutation_round_trips_through_undo_and_redo() {
    struct Case {
        label: &'static str,
        prepare: fn(&TestDb) -> Command,
    }

    let cases = [
        Case {
            label: "create",
            prepare: |t| {
                Command::Create(CreateSpec {
                    parent_id: t.tree.live_root_id,
                    node_type: NodeTypeTag::folder(),
                    name: "fresh".to_string(),
                    description: None,
                    payload: None,
                })
            },
        },
        Case {
            label: "update",
            prepare: |t| {
                let node = t.create_folder(t.tree.live_root_id, "subject");
                Command::Update(UpdateSpec {
                    node_id: node,
                    name: Some("renamed".to_string()),
                    description: Some("notes".to_string()),
                    payload: None,
                    expected_updated_at: None,
                })
            },
        },
        Case {
            label: "moveNodes",
            prepare: |t| {
                let a = t.create_folder(t.tree.live_root_id, "a");
                let b = t.create_folder(t.tree.live_root_id, "b");
                Command::MoveNodes(MoveSpec {
                    node_ids: vec![b],
                    to_parent_id: a,
                })
            },
        },
        Case {
            label: "moveToTrash",
            prepare: |t| {
                let node = t.create_folder(t.tree.live_root_id, "doomed");
                t.create_folder(node, "inner");
                Command::MoveToTrash(NodeSetSpec {
                    node_ids: vec![node],
                })
            },
        },
        Case {
            label: "recoverFromTrash",
            prepare: |t| {
                let node = t.create_folder(t.tree.live_root_id, "wanted");
                t.dispatch_ok(Command::MoveToTrash(NodeSetSpec {
                    node_ids: vec![node],
                }));
                Command::RecoverFromTrash(RecoverSpec {
                    node_ids: vec![node],
                    to_parent_id: None,
                })
            },
        },
        Case {
            label: "permanentDelete",
            prepare: |t| {
                let node = t.create_folder(t.tree.live_root_id, "gone");
                t.create_folder(node, "inner");
                Command::PermanentDelete(NodeSetSpec {
                    node_ids: vec![node],
                })
            },
        },
        Case {
            label: "duplicateNodes",
            prepare: |t| {
                let node = t.create_folder(t.tree.live_root_id, "original");
                t.create_folder(node, "inner");
                Command::DuplicateNodes(DuplicateSpec {
                    node_ids: vec![node],
                    to_parent_id: t.tree.live_root_id,
                })
            },
        },
    ];

    for case in cases {
        let t = test_db();
        let command = (case.prepare)(&t);

        let before = t.dump_domain();
        t.clock.advance(13);
        t.dispatch_ok(command);
        let after = t.dump_domain();

        t.dispatch_ok(Command::Undo(HistorySpec { tree_id: t.tree.id }));
        assert_eq!(t.dump_domain(), before, "undo of {} restores", case.label);

        t.dispatch_ok(Command::Redo(HistorySpec { tree_id: t.tree.id }));
        assert_eq!(t.dump_domain(), after, "redo of {} re-applies", case.label);
    }
}

// duplicate-then-delete-the-copy is invisible, ref counts included
#[test]
fn duplicate_then_delete_copy_is_bit_identical() {
    let t = test_db();
    register_basemap(&t);
    let root = t.tree.live_root_id;

    let folder = t.create_folder(root, "bundle");
    create_basemap(&t, folder, "map");
    let before = t.dump_domain();

    let outcome = t.dispatch_ok(Command::DuplicateNodes(DuplicateSpec {
        node_ids: vec![folder],
        to_parent_id: root,
    }));
    let copy_root = outcome.created_node_id.unwrap_or_else(|| {
        outcome
            .response
            .affected_node_ids
            .first()
            .copied()
            .expect("duplicate affected nodes")
    });

    t.dispatch_ok(Command::PermanentDelete(NodeSetSpec {
        node_ids: vec![copy_root],
    }));
    assert_eq!(t.dump_domain(), before);
}

// Subtree depth caps keep grandchildren out of scope.
#[test]
fn subtree_depth_cap_limits_observation() {
    let t = test_db();
    let root = t.tree.live_root_id;
    let child = t.create_folder(root, "child");

    let sink = Rc::new(VecSink::new());
    t.db.observe_subtree(
        t.view,
        root,
        SubscriptionOptions {
            include_initial: false,
            max_depth: Some(1),
        },
        sink.clone(),
    )
    .unwrap();

    t.create_folder(root, "sibling");
    t.create_folder(child, "grandchild");

    let observed = sink.drain();
    assert_eq!(observed.len(), 1);
    assert!(matches!(
        &observed[0].kind,
        SubscriptionEventKind::Changed(crate::model::event::ChangeKind::NodeCreated { .. })
    ));
}
