//! Shared fixtures for unit and scenario tests. Test-only.

use crate::{
    api::{HierarchiDb, InitConfig},
    command::{DispatchOutcome, NoopBroadcast},
    model::{
        envelope::{Command, CommandEnvelope, CreateSpec, NameConflictPolicy},
        node::{NodeTypeTag, TreeNode},
        tree::Tree,
    },
    obs::NoopObsSink,
    schema,
    store::{KvBackend, MemoryStore, WriteCtx},
    types::{IdGenerator, ManualClock, NodeId, Timestamp, Ulid, ViewId},
};
use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

pub(crate) fn test_ids() -> RefCell<IdGenerator> {
    RefCell::new(IdGenerator::new(0xDB))
}

pub(crate) fn write_ctx<'a>(
    backend: &'a dyn KvBackend,
    now_ms: u64,
    ids: &'a RefCell<IdGenerator>,
) -> WriteCtx<'a> {
    WriteCtx::new(backend, Timestamp::from_millis(now_ms), ids)
}

///
/// TestDb
///
/// A fresh engine per case: manual clock, deterministic ids, one tree.
///

pub(crate) struct TestDb {
    pub db: HierarchiDb,
    pub clock: ManualClock,
    pub tree: Tree,
    pub view: ViewId,
}

pub(crate) fn test_db() -> TestDb {
    test_db_with(InitConfig {
        id_seed: 7,
        ..InitConfig::default()
    })
}

pub(crate) fn test_db_with(config: InitConfig) -> TestDb {
    let clock = ManualClock::starting_at(1_000);
    let db = HierarchiDb::init_with(
        config,
        Box::new(MemoryStore::new()),
        Rc::new(clock.clone()),
        Rc::new(NoopObsSink),
        Rc::new(NoopBroadcast),
    )
    .expect("test engine init");
    let tree = db
        .tree_named("main")
        .expect("tree query")
        .expect("main tree");

    TestDb {
        db,
        clock,
        tree,
        view: ViewId::from_ulid(Ulid::from_parts(1, 0xBEEF)),
    }
}

impl TestDb {
    pub(crate) fn envelope(&self, command: Command) -> CommandEnvelope {
        self.db.envelope(self.view, command)
    }

    pub(crate) fn dispatch_ok(&self, command: Command) -> DispatchOutcome {
        let envelope = self.envelope(command);
        let outcome = self.db.dispatch_detailed(&envelope);
        assert!(
            outcome.response.success,
            "dispatch failed: {:?} {:?}",
            outcome.response.code, outcome.response.message
        );
        outcome
    }

    pub(crate) fn create_folder(&self, parent: NodeId, name: &str) -> NodeId {
        self.create_folder_with(parent, name, NameConflictPolicy::Error)
    }

    pub(crate) fn create_folder_with(
        &self,
        parent: NodeId,
        name: &str,
        policy: NameConflictPolicy,
    ) -> NodeId {
        let mut envelope = self.envelope(Command::Create(CreateSpec {
            parent_id: parent,
            node_type: NodeTypeTag::folder(),
            name: name.to_string(),
            description: None,
            payload: None,
        }));
        envelope.on_name_conflict = Some(policy);

        let outcome = self.db.dispatch_detailed(&envelope);
        assert!(
            outcome.response.success,
            "create '{name}' failed: {:?}",
            outcome.response.message
        );
        outcome.created_node_id.expect("created node id")
    }

    pub(crate) fn node(&self, node_id: NodeId) -> TreeNode {
        self.db
            .get_node(node_id)
            .expect("get_node")
            .expect("node exists")
    }

    /// Every domain-table row, for bit-identical state comparisons.
    /// Bookkeeping tables (meta, history logs) are excluded.
    pub(crate) fn dump_domain(&self) -> BTreeMap<(String, Vec<u8>), Vec<u8>> {
        let backend = self.db.backend_for_tests();
        let mut dump = BTreeMap::new();
        for table in backend.table_names() {
            if !schema::is_domain_table(&table) {
                continue;
            }
            for (key, value) in backend.range(&table, &[], None) {
                dump.insert((table.clone(), key), value);
            }
        }

        dump
    }
}
