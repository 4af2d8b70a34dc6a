use crate::{
    entity::{EntityError, EntityHandler},
    error::CoreError,
    model::{
        entity::{
            BackupMetadata, EntityBackup, GroupEntity, GroupTypeTag, PeerEntity, RelationalEntity,
            RelationalKindTag,
        },
        node::NodeTypeTag,
    },
    schema,
    store::{Transaction, WriteCtx, decode_row, encode_row},
    types::{EntityId, NodeId, Timestamp},
    value::{ContentHash, Value},
};
use std::collections::BTreeMap;

///
/// RelationalBinding
///
/// Declares which peer payload field holds shared content. The handler
/// stores the field as a content-hash reference and owns the count.
///

#[derive(Clone, Debug)]
pub struct RelationalBinding {
    pub kind: RelationalKindTag,
    pub ref_field: String,
}

///
/// BaseEntityHandler
///
/// Default entity ownership for a node type: peer CRUD, group families,
/// shared relational references, snapshots, and working-copy application.
/// Plugins with richer needs implement [`EntityHandler`] themselves.
///

pub struct BaseEntityHandler {
    node_type: NodeTypeTag,
    table: String,
    with_peer: bool,
    group_types: Vec<GroupTypeTag>,
    relational: Option<RelationalBinding>,
}

impl BaseEntityHandler {
    #[must_use]
    pub fn new(node_type: NodeTypeTag) -> Self {
        let table = schema::entity_table(&node_type);

        Self {
            node_type,
            table,
            with_peer: true,
            group_types: Vec::new(),
            relational: None,
        }
    }

    /// Handler for container types that own no peer entity.
    #[must_use]
    pub fn without_peer(node_type: NodeTypeTag) -> Self {
        let mut handler = Self::new(node_type);
        handler.with_peer = false;
        handler
    }

    #[must_use]
    pub fn with_groups(mut self, group_types: Vec<GroupTypeTag>) -> Self {
        self.group_types = group_types;
        self
    }

    #[must_use]
    pub fn with_relational(mut self, kind: RelationalKindTag, ref_field: impl Into<String>) -> Self {
        self.relational = Some(RelationalBinding {
            kind,
            ref_field: ref_field.into(),
        });
        self
    }

    #[must_use]
    pub fn group_types(&self) -> &[GroupTypeTag] {
        &self.group_types
    }

    // ------------------------------------------------------------------
    // Row access
    // ------------------------------------------------------------------

    fn read_peer(
        &self,
        txn: &Transaction<'_>,
        node_id: NodeId,
    ) -> Result<Option<PeerEntity>, CoreError> {
        match txn.get(&self.table, &schema::node_key(node_id)) {
            Some(bytes) => Ok(Some(decode_row(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_peer(&self, ctx: &mut WriteCtx<'_>, entity: &PeerEntity) -> Result<(), CoreError> {
        let bytes = encode_row(entity)?;
        ctx.txn
            .put(&self.table, &schema::node_key(entity.node_id), bytes);

        Ok(())
    }

    fn require_peer(
        &self,
        txn: &Transaction<'_>,
        node_id: NodeId,
    ) -> Result<PeerEntity, CoreError> {
        self.read_peer(txn, node_id)?
            .ok_or_else(|| EntityError::PeerNotFound { node_id }.into())
    }

    // ------------------------------------------------------------------
    // Relational reference counting
    // ------------------------------------------------------------------

    fn relational_row(
        &self,
        txn: &Transaction<'_>,
        kind: &RelationalKindTag,
        hash: &ContentHash,
    ) -> Result<Option<RelationalEntity>, CoreError> {
        let table = schema::relational_table(kind);
        match txn.get(&table, &schema::relational_key(hash)) {
            Some(bytes) => Ok(Some(decode_row(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_relational_row(
        ctx: &mut WriteCtx<'_>,
        row: &RelationalEntity,
    ) -> Result<(), CoreError> {
        let table = schema::relational_table(&row.kind);
        let bytes = encode_row(row)?;
        ctx.txn.put(&table, &schema::relational_key(&row.hash), bytes);

        Ok(())
    }

    /// Resolve the declared ref field of a payload into a counted hash
    /// reference. Inline content is hashed and interned; a hash that
    /// already names a row simply gains a reference.
    fn acquire_relational(
        &self,
        ctx: &mut WriteCtx<'_>,
        mut payload: Value,
    ) -> Result<Value, CoreError> {
        let Some(binding) = &self.relational else {
            return Ok(payload);
        };
        let Some(field_value) = payload.get(&binding.ref_field).cloned() else {
            return Ok(payload);
        };
        if field_value.is_null() {
            return Ok(payload);
        }

        // A text field naming an existing row is a reference; anything else
        // is inline content to intern.
        if let Some(text) = field_value.as_text() {
            let hash = ContentHash::from_hex(text);
            if let Some(mut row) = self.relational_row(&ctx.txn, &binding.kind, &hash)? {
                row.ref_count = row.ref_count.saturating_add(1);
                Self::write_relational_row(ctx, &row)?;

                return Ok(payload);
            }
        }

        let hash = field_value
            .content_hash()
            .map_err(|err| EntityError::BadRelationalRef {
                field: format!("{}: {err}", binding.ref_field),
            })?;
        match self.relational_row(&ctx.txn, &binding.kind, &hash)? {
            Some(mut row) => {
                row.ref_count = row.ref_count.saturating_add(1);
                Self::write_relational_row(ctx, &row)?;
            }
            None => {
                let row = RelationalEntity {
                    hash: hash.clone(),
                    kind: binding.kind.clone(),
                    payload: field_value,
                    ref_count: 1,
                    created_at: ctx.now,
                };
                Self::write_relational_row(ctx, &row)?;
            }
        }

        payload
            .set(binding.ref_field.clone(), Value::Text(hash.as_str().to_string()))
            .map_err(|err| EntityError::BadRelationalRef {
                field: format!("{}: {err}", binding.ref_field),
            })?;

        Ok(payload)
    }

    /// Drop one reference held by a stored payload; the row dies with its
    /// last reference, in this same transaction.
    fn release_relational(&self, ctx: &mut WriteCtx<'_>, payload: &Value) -> Result<(), CoreError> {
        let Some(binding) = &self.relational else {
            return Ok(());
        };
        let Some(text) = payload.get(&binding.ref_field).and_then(Value::as_text) else {
            return Ok(());
        };

        let hash = ContentHash::from_hex(text);
        let Some(mut row) = self.relational_row(&ctx.txn, &binding.kind, &hash)? else {
            return Ok(());
        };

        row.ref_count = row.ref_count.saturating_sub(1);
        if row.ref_count == 0 {
            let table = schema::relational_table(&binding.kind);
            ctx.txn.delete(&table, &schema::relational_key(&hash));
        } else {
            Self::write_relational_row(ctx, &row)?;
        }

        Ok(())
    }

    fn stored_ref_field<'p>(&self, payload: &'p Value) -> Option<&'p str> {
        let binding = self.relational.as_ref()?;
        payload.get(&binding.ref_field).and_then(Value::as_text)
    }
}

impl EntityHandler for BaseEntityHandler {
    fn node_type(&self) -> &NodeTypeTag {
        &self.node_type
    }

    fn has_peer(&self) -> bool {
        self.with_peer
    }

    fn create_entity(
        &self,
        ctx: &mut WriteCtx<'_>,
        node_id: NodeId,
        data: Option<&Value>,
    ) -> Result<Option<PeerEntity>, CoreError> {
        if !self.with_peer {
            return Ok(None);
        }
        if self.read_peer(&ctx.txn, node_id)?.is_some() {
            return Err(EntityError::DuplicatePeer { node_id }.into());
        }

        let payload = data.cloned().unwrap_or_else(Value::map);
        let payload = self.acquire_relational(ctx, payload)?;
        let entity = PeerEntity {
            entity_id: EntityId::from_ulid(ctx.next_id()?),
            node_id,
            payload,
            created_at: ctx.now,
            updated_at: ctx.now,
            version: 1,
        };
        self.write_peer(ctx, &entity)?;

        Ok(Some(entity))
    }

    fn get_entity(
        &self,
        txn: &Transaction<'_>,
        node_id: NodeId,
    ) -> Result<Option<PeerEntity>, CoreError> {
        self.read_peer(txn, node_id)
    }

    fn update_entity(
        &self,
        ctx: &mut WriteCtx<'_>,
        node_id: NodeId,
        patch: &Value,
    ) -> Result<PeerEntity, CoreError> {
        let mut entity = self.require_peer(&ctx.txn, node_id)?;

        let touches_ref = self
            .relational
            .as_ref()
            .is_some_and(|binding| patch.get(&binding.ref_field).is_some());
        if touches_ref {
            self.release_relational(ctx, &entity.payload)?;
        }

        crate::value::merge_patch(&mut entity.payload, patch);
        if touches_ref {
            entity.payload = self.acquire_relational(ctx, std::mem::take(&mut entity.payload))?;
        }

        entity.touch(ctx.now);
        self.write_peer(ctx, &entity)?;

        Ok(entity)
    }

    fn delete_entity(&self, ctx: &mut WriteCtx<'_>, node_id: NodeId) -> Result<(), CoreError> {
        if let Some(entity) = self.read_peer(&ctx.txn, node_id)? {
            self.release_relational(ctx, &entity.payload)?;
            ctx.txn.delete(&self.table, &schema::node_key(node_id));
        }

        for group_type in &self.group_types.clone() {
            self.delete_group_entities(ctx, node_id, group_type)?;
        }

        Ok(())
    }

    fn create_group_entity(
        &self,
        ctx: &mut WriteCtx<'_>,
        node_id: NodeId,
        group_type: &GroupTypeTag,
        data: Value,
    ) -> Result<GroupEntity, CoreError> {
        let table = schema::group_table(&self.node_type, group_type);
        let ordinal = ctx
            .txn
            .scan_prefix(&table, &schema::group_prefix(node_id))
            .last()
            .and_then(|(_, bytes)| decode_row::<GroupEntity>(bytes).ok())
            .map_or(0, |last| last.ordinal.saturating_add(1));

        let entity = GroupEntity {
            entity_id: EntityId::from_ulid(ctx.next_id()?),
            node_id,
            group_type: group_type.clone(),
            ordinal,
            payload: data,
            created_at: ctx.now,
        };
        let bytes = encode_row(&entity)?;
        ctx.txn.put(&table, &schema::group_key(node_id, ordinal), bytes);

        Ok(entity)
    }

    fn get_group_entities(
        &self,
        txn: &Transaction<'_>,
        node_id: NodeId,
        group_type: &GroupTypeTag,
    ) -> Result<Vec<GroupEntity>, CoreError> {
        let table = schema::group_table(&self.node_type, group_type);
        txn.scan_prefix(&table, &schema::group_prefix(node_id))
            .iter()
            .map(|(_, bytes)| decode_row(bytes).map_err(CoreError::from))
            .collect()
    }

    fn delete_group_entities(
        &self,
        ctx: &mut WriteCtx<'_>,
        node_id: NodeId,
        group_type: &GroupTypeTag,
    ) -> Result<u64, CoreError> {
        let table = schema::group_table(&self.node_type, group_type);
        let keys: Vec<Vec<u8>> = ctx
            .txn
            .scan_prefix(&table, &schema::group_prefix(node_id))
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        let removed = keys.len() as u64;
        for key in keys {
            ctx.txn.delete(&table, &key);
        }

        Ok(removed)
    }

    fn duplicate(
        &self,
        ctx: &mut WriteCtx<'_>,
        source_node_id: NodeId,
        target_node_id: NodeId,
    ) -> Result<(), CoreError> {
        if let Some(source) = self.read_peer(&ctx.txn, source_node_id)? {
            // The copied payload keeps the hash reference; sharing means one
            // more count, never a second relational row.
            let payload = if self.stored_ref_field(&source.payload).is_some() {
                self.acquire_relational(ctx, source.payload)?
            } else {
                source.payload
            };

            let copy = PeerEntity {
                entity_id: EntityId::from_ulid(ctx.next_id()?),
                node_id: target_node_id,
                payload,
                created_at: ctx.now,
                updated_at: ctx.now,
                version: 1,
            };
            self.write_peer(ctx, &copy)?;
        }

        for group_type in &self.group_types.clone() {
            let entities = self.get_group_entities(&ctx.txn, source_node_id, group_type)?;
            let table = schema::group_table(&self.node_type, group_type);
            for entity in entities {
                let copy = GroupEntity {
                    entity_id: EntityId::from_ulid(ctx.next_id()?),
                    node_id: target_node_id,
                    created_at: ctx.now,
                    ..entity
                };
                let bytes = encode_row(&copy)?;
                ctx.txn
                    .put(&table, &schema::group_key(target_node_id, copy.ordinal), bytes);
            }
        }

        Ok(())
    }

    fn backup(
        &self,
        txn: &Transaction<'_>,
        node_id: NodeId,
        now: Timestamp,
    ) -> Result<Option<EntityBackup>, CoreError> {
        let Some(entity) = self.read_peer(txn, node_id)? else {
            return Ok(None);
        };

        let mut group_entities = BTreeMap::new();
        for group_type in &self.group_types {
            let entities = self.get_group_entities(txn, node_id, group_type)?;
            if !entities.is_empty() {
                group_entities.insert(group_type.clone(), entities);
            }
        }

        let mut relational = Vec::new();
        if let (Some(binding), Some(text)) =
            (&self.relational, self.stored_ref_field(&entity.payload))
        {
            let hash = ContentHash::from_hex(text);
            if let Some(row) = self.relational_row(txn, &binding.kind, &hash)? {
                relational.push(row);
            }
        }

        Ok(Some(EntityBackup {
            entity,
            group_entities,
            relational,
            metadata: BackupMetadata { backup_date: now },
        }))
    }

    fn restore(
        &self,
        ctx: &mut WriteCtx<'_>,
        node_id: NodeId,
        backup: &EntityBackup,
    ) -> Result<(), CoreError> {
        // Drop whatever the node holds now, then re-seed any snapshot rows
        // whose last reference died since, so acquire finds them again.
        if let Some(current) = self.read_peer(&ctx.txn, node_id)? {
            self.release_relational(ctx, &current.payload)?;
        }
        for group_type in &self.group_types.clone() {
            self.delete_group_entities(ctx, node_id, group_type)?;
        }

        for row in &backup.relational {
            if self.relational_row(&ctx.txn, &row.kind, &row.hash)?.is_none() {
                let reseeded = RelationalEntity {
                    ref_count: 0,
                    ..row.clone()
                };
                Self::write_relational_row(ctx, &reseeded)?;
            }
        }

        let mut entity = backup.entity.clone();
        entity.node_id = node_id;
        entity.updated_at = ctx.now;
        entity.payload = self.acquire_relational(ctx, std::mem::take(&mut entity.payload))?;
        self.write_peer(ctx, &entity)?;

        for entities in backup.group_entities.values() {
            for group in entities {
                let table = schema::group_table(&self.node_type, &group.group_type);
                let mut restored = group.clone();
                restored.node_id = node_id;
                let bytes = encode_row(&restored)?;
                ctx.txn
                    .put(&table, &schema::group_key(node_id, restored.ordinal), bytes);
            }
        }

        Ok(())
    }

    fn cleanup(&self, ctx: &mut WriteCtx<'_>, node_id: NodeId) -> Result<(), CoreError> {
        for group_type in &self.group_types.clone() {
            self.delete_group_entities(ctx, node_id, group_type)?;
        }

        Ok(())
    }

    fn working_copy_payload(
        &self,
        txn: &Transaction<'_>,
        node_id: NodeId,
    ) -> Result<Option<Value>, CoreError> {
        Ok(self.read_peer(txn, node_id)?.map(|entity| entity.payload))
    }

    fn apply_working_copy(
        &self,
        ctx: &mut WriteCtx<'_>,
        node_id: NodeId,
        draft: Option<&Value>,
        expected_updated_at: Option<Timestamp>,
    ) -> Result<(), CoreError> {
        if !self.with_peer {
            return Ok(());
        }

        let mut entity = self.require_peer(&ctx.txn, node_id)?;
        if let Some(expected) = expected_updated_at
            && entity.updated_at != expected
        {
            return Err(EntityError::StaleWorkingCopy { node_id }.into());
        }

        if let Some(draft) = draft {
            let old_ref = self.stored_ref_field(&entity.payload).map(str::to_string);
            let new_ref = self
                .relational
                .as_ref()
                .and_then(|binding| draft.get(&binding.ref_field))
                .and_then(Value::as_text)
                .map(str::to_string);
            let ref_changed = old_ref != new_ref;

            if ref_changed {
                self.release_relational(ctx, &entity.payload)?;
            }
            entity.payload = draft.clone();
            if ref_changed {
                entity.payload =
                    self.acquire_relational(ctx, std::mem::take(&mut entity.payload))?;
            }
        }

        entity.touch(ctx.now);
        self.write_peer(ctx, &entity)?;

        Ok(())
    }

    fn get_relational(
        &self,
        txn: &Transaction<'_>,
        hash: &ContentHash,
    ) -> Result<Option<RelationalEntity>, CoreError> {
        let Some(binding) = &self.relational else {
            return Ok(None);
        };

        self.relational_row(txn, &binding.kind, hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::MemoryStore,
        test_support::{test_ids, write_ctx},
    };

    fn styled_handler() -> BaseEntityHandler {
        BaseEntityHandler::new(NodeTypeTag::new("basemap"))
            .with_groups(vec![GroupTypeTag::new("tileBuffer")])
            .with_relational(RelationalKindTag::new("styleSheet"), "style")
    }

    fn style_payload() -> Value {
        let mut style = Value::map();
        style.set("theme", Value::from("dark")).unwrap();
        let mut payload = Value::map();
        payload.set("style", style).unwrap();
        payload.set("zoom", Value::Int(3)).unwrap();
        payload
    }

    fn node_id(n: u128) -> NodeId {
        NodeId::from_ulid(crate::types::Ulid::from_parts(1, n))
    }

    #[test]
    fn second_peer_for_one_node_fails_duplicate() {
        let store = MemoryStore::new();
        let ids = test_ids();
        let handler = styled_handler();
        let mut ctx = write_ctx(&store, 10, &ids);

        handler.create_entity(&mut ctx, node_id(1), None).unwrap();
        let err = handler
            .create_entity(&mut ctx, node_id(1), None)
            .unwrap_err();

        assert_eq!(err.code, crate::error::ErrorCode::DuplicatePeer);
    }

    #[test]
    fn inline_content_is_interned_and_shared() {
        let store = MemoryStore::new();
        let ids = test_ids();
        let handler = styled_handler();
        let mut ctx = write_ctx(&store, 10, &ids);

        let a = handler
            .create_entity(&mut ctx, node_id(1), Some(&style_payload()))
            .unwrap()
            .unwrap();
        let b = handler
            .create_entity(&mut ctx, node_id(2), Some(&style_payload()))
            .unwrap()
            .unwrap();

        // both peers hold the same hash reference
        let hash_a = a.payload.get("style").unwrap().as_text().unwrap();
        let hash_b = b.payload.get("style").unwrap().as_text().unwrap();
        assert_eq!(hash_a, hash_b);

        let row = handler
            .get_relational(&ctx.txn, &ContentHash::from_hex(hash_a))
            .unwrap()
            .unwrap();
        assert_eq!(row.ref_count, 2);

        // releasing one keeps the row; releasing the last deletes it
        handler.delete_entity(&mut ctx, node_id(1)).unwrap();
        let row = handler
            .get_relational(&ctx.txn, &ContentHash::from_hex(hash_a))
            .unwrap()
            .unwrap();
        assert_eq!(row.ref_count, 1);

        handler.delete_entity(&mut ctx, node_id(2)).unwrap();
        assert!(
            handler
                .get_relational(&ctx.txn, &ContentHash::from_hex(hash_a))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn duplicate_shares_relational_and_restamps_identity() {
        let store = MemoryStore::new();
        let ids = test_ids();
        let handler = styled_handler();
        let mut ctx = write_ctx(&store, 10, &ids);

        let source = handler
            .create_entity(&mut ctx, node_id(1), Some(&style_payload()))
            .unwrap()
            .unwrap();
        handler
            .create_group_entity(
                &mut ctx,
                node_id(1),
                &GroupTypeTag::new("tileBuffer"),
                Value::Int(1),
            )
            .unwrap();

        handler.duplicate(&mut ctx, node_id(1), node_id(2)).unwrap();

        let copy = handler.get_entity(&ctx.txn, node_id(2)).unwrap().unwrap();
        assert_ne!(copy.entity_id, source.entity_id);
        assert_eq!(copy.payload, source.payload);

        let hash = copy.payload.get("style").unwrap().as_text().unwrap();
        let row = handler
            .get_relational(&ctx.txn, &ContentHash::from_hex(hash))
            .unwrap()
            .unwrap();
        assert_eq!(row.ref_count, 2);

        let groups = handler
            .get_group_entities(&ctx.txn, node_id(2), &GroupTypeTag::new("tileBuffer"))
            .unwrap();
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn backup_then_restore_round_trips_modulo_updated_at() {
        let store = MemoryStore::new();
        let ids = test_ids();
        let handler = styled_handler();
        let mut ctx = write_ctx(&store, 10, &ids);

        handler
            .create_entity(&mut ctx, node_id(1), Some(&style_payload()))
            .unwrap();
        handler
            .create_group_entity(
                &mut ctx,
                node_id(1),
                &GroupTypeTag::new("tileBuffer"),
                Value::Int(7),
            )
            .unwrap();
        let backup = handler
            .backup(&ctx.txn, node_id(1), Timestamp::from_millis(10))
            .unwrap()
            .unwrap();

        // mutate everything, including the shared reference
        let mut patch = Value::map();
        patch.set("style", Value::from("plain")).unwrap();
        handler.update_entity(&mut ctx, node_id(1), &patch).unwrap();
        handler
            .delete_group_entities(&mut ctx, node_id(1), &GroupTypeTag::new("tileBuffer"))
            .unwrap();

        handler.restore(&mut ctx, node_id(1), &backup).unwrap();

        let restored = handler.get_entity(&ctx.txn, node_id(1)).unwrap().unwrap();
        assert_eq!(restored.payload, backup.entity.payload);
        assert_eq!(restored.version, backup.entity.version);

        let hash = restored.payload.get("style").unwrap().as_text().unwrap();
        let row = handler
            .get_relational(&ctx.txn, &ContentHash::from_hex(hash))
            .unwrap()
            .unwrap();
        assert_eq!(row.ref_count, 1);

        let groups = handler
            .get_group_entities(&ctx.txn, node_id(1), &GroupTypeTag::new("tileBuffer"))
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].payload, Value::Int(7));
    }

    #[test]
    fn stale_working_copy_application_fails_version_conflict() {
        let store = MemoryStore::new();
        let ids = test_ids();
        let handler = styled_handler();
        let mut ctx = write_ctx(&store, 10, &ids);
        handler.create_entity(&mut ctx, node_id(1), None).unwrap();

        // an external update advances the stamp
        let mut ctx2 = {
            ctx.txn.commit().unwrap();
            write_ctx(&store, 20, &ids)
        };
        handler
            .update_entity(&mut ctx2, node_id(1), &Value::map())
            .unwrap();

        let err = handler
            .apply_working_copy(
                &mut ctx2,
                node_id(1),
                None,
                Some(Timestamp::from_millis(10)),
            )
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::VersionConflict);
    }

    #[test]
    fn group_ordinals_grow_monotonically() {
        let store = MemoryStore::new();
        let ids = test_ids();
        let handler = styled_handler();
        let mut ctx = write_ctx(&store, 10, &ids);
        let group = GroupTypeTag::new("tileBuffer");

        let a = handler
            .create_group_entity(&mut ctx, node_id(1), &group, Value::Int(0))
            .unwrap();
        let b = handler
            .create_group_entity(&mut ctx, node_id(1), &group, Value::Int(1))
            .unwrap();
        assert_eq!((a.ordinal, b.ordinal), (0, 1));

        handler
            .delete_group_entities(&mut ctx, node_id(1), &group)
            .unwrap();
        let c = handler
            .create_group_entity(&mut ctx, node_id(1), &group, Value::Int(2))
            .unwrap();
        assert_eq!(c.ordinal, 0);
    }
}
