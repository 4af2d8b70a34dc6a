use crate::{
    entity::{BaseEntityHandler, EntityHandler},
    error::{CoreError, ErrorCode, ErrorOrigin},
    model::node::{NodeTypeTag, TreeNode},
    store::{Transaction, WriteCtx},
    types::NodeId,
    value::Value,
};
use std::{cell::RefCell, collections::BTreeMap, rc::Rc};
use thiserror::Error as ThisError;

///
/// RegistryError
///

#[derive(Debug, ThisError)]
pub enum RegistryError {
    #[error("unknown node type '{0}'")]
    UnknownNodeType(NodeTypeTag),

    #[error("node type '{tag}' has {live_nodes} live nodes and cannot be unregistered")]
    TypeInUse { tag: NodeTypeTag, live_nodes: u64 },

    #[error("unknown plugin operation '{op}' for node type '{tag}'")]
    UnknownPluginOp { tag: NodeTypeTag, op: String },
}

impl RegistryError {
    const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownNodeType(_) | Self::UnknownPluginOp { .. } => ErrorCode::UnknownNodeType,
            Self::TypeInUse { .. } => ErrorCode::Internal,
        }
    }
}

impl From<RegistryError> for CoreError {
    fn from(err: RegistryError) -> Self {
        Self::new(err.code(), ErrorOrigin::Registry, err.to_string())
    }
}

/// Lifecycle callback invoked inside the mutation's transaction; a failing
/// hook rolls the whole command back.
pub type Hook = fn(&mut WriteCtx<'_>, &TreeNode) -> Result<(), CoreError>;

/// Extra per-type name admission on top of the built-in rules.
pub type NamePattern = fn(&str) -> bool;

/// Custom node validation; the message becomes a `NameValidationFailed`
/// detail.
pub type NodeValidator = fn(&TreeNode) -> Result<(), String>;

///
/// PluginArgs
///
/// Read context handed to a routed plugin operation.
///

pub struct PluginArgs<'a> {
    pub txn: &'a Transaction<'a>,
    pub handler: &'a dyn EntityHandler,
    pub node_id: Option<NodeId>,
    pub params: &'a Value,
}

pub type PluginOp = fn(&PluginArgs<'_>) -> Result<Value, CoreError>;

///
/// LifecycleHooks
///

#[derive(Clone, Copy, Default)]
pub struct LifecycleHooks {
    pub before_create: Option<Hook>,
    pub after_create: Option<Hook>,
    pub before_update: Option<Hook>,
    pub after_update: Option<Hook>,
    pub before_delete: Option<Hook>,
    pub after_delete: Option<Hook>,
}

///
/// NodeValidation
///

#[derive(Clone, Default)]
pub struct NodeValidation {
    pub name_pattern: Option<NamePattern>,
    pub max_children: Option<u32>,
    pub validators: Vec<NodeValidator>,
}

///
/// DisplayMeta
///

#[derive(Clone, Debug, Default)]
pub struct DisplayMeta {
    pub label: String,
    pub icon: Option<String>,
}

///
/// NodeTypeDef
///
/// Everything the core knows about one node type: its entity handler, the
/// lifecycle hook table, validation rules, display metadata, and routed
/// plugin operations.
///

pub struct NodeTypeDef {
    pub tag: NodeTypeTag,
    pub display: DisplayMeta,
    pub validation: NodeValidation,
    pub hooks: LifecycleHooks,
    pub handler: Rc<dyn EntityHandler>,
    pub plugin_ops: BTreeMap<String, PluginOp>,
}

impl std::fmt::Debug for NodeTypeDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeTypeDef")
            .field("tag", &self.tag)
            .field("display", &self.display)
            .field("plugin_ops", &self.plugin_ops)
            .finish_non_exhaustive()
    }
}

impl NodeTypeDef {
    /// Plain container type: no peer entity, default validation.
    #[must_use]
    pub fn container(tag: NodeTypeTag, label: impl Into<String>) -> Self {
        Self {
            display: DisplayMeta {
                label: label.into(),
                icon: None,
            },
            validation: NodeValidation::default(),
            hooks: LifecycleHooks::default(),
            handler: Rc::new(BaseEntityHandler::without_peer(tag.clone())),
            plugin_ops: BTreeMap::new(),
            tag,
        }
    }

    #[must_use]
    pub fn with_handler(tag: NodeTypeTag, label: impl Into<String>, handler: Rc<dyn EntityHandler>) -> Self {
        Self {
            display: DisplayMeta {
                label: label.into(),
                icon: None,
            },
            validation: NodeValidation::default(),
            hooks: LifecycleHooks::default(),
            handler,
            plugin_ops: BTreeMap::new(),
            tag,
        }
    }
}

///
/// Registered
///
/// Outcome of a registration attempt. Registration runs at every process
/// start, so hitting an existing tag is the normal idempotent path.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Registered {
    New,
    AlreadyRegistered,
}

///
/// NodeTypeRegistry
///

#[derive(Default)]
pub struct NodeTypeRegistry {
    types: RefCell<BTreeMap<NodeTypeTag, Rc<NodeTypeDef>>>,
}

impl NodeTypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-seeded with the built-in `root` and `folder` types.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        let _ = registry.register(NodeTypeDef::container(NodeTypeTag::root(), "Root"));
        let _ = registry.register(NodeTypeDef::container(NodeTypeTag::folder(), "Folder"));
        registry
    }

    /// Register a node type. Idempotent: an existing tag keeps its first
    /// definition and reports `AlreadyRegistered`.
    pub fn register(&self, def: NodeTypeDef) -> Registered {
        let mut types = self.types.borrow_mut();
        if types.contains_key(&def.tag) {
            return Registered::AlreadyRegistered;
        }

        types.insert(def.tag.clone(), Rc::new(def));
        Registered::New
    }

    /// Remove a type with no live nodes. The caller supplies the live count
    /// because only the store can answer it.
    pub fn unregister(&self, tag: &NodeTypeTag, live_nodes: u64) -> Result<(), CoreError> {
        if live_nodes > 0 {
            return Err(RegistryError::TypeInUse {
                tag: tag.clone(),
                live_nodes,
            }
            .into());
        }

        let mut types = self.types.borrow_mut();
        types
            .remove(tag)
            .map(|_| ())
            .ok_or_else(|| RegistryError::UnknownNodeType(tag.clone()).into())
    }

    pub fn resolve(&self, tag: &NodeTypeTag) -> Result<Rc<NodeTypeDef>, CoreError> {
        self.types
            .borrow()
            .get(tag)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownNodeType(tag.clone()).into())
    }

    #[must_use]
    pub fn is_registered(&self, tag: &NodeTypeTag) -> bool {
        self.types.borrow().contains_key(tag)
    }

    #[must_use]
    pub fn tags(&self) -> Vec<NodeTypeTag> {
        self.types.borrow().keys().cloned().collect()
    }

    /// Resolve one routed plugin operation.
    pub fn resolve_plugin_op(
        &self,
        tag: &NodeTypeTag,
        op: &str,
    ) -> Result<(Rc<NodeTypeDef>, PluginOp), CoreError> {
        let def = self.resolve(tag)?;
        let plugin_op = def.plugin_ops.get(op).copied().ok_or_else(|| {
            CoreError::from(RegistryError::UnknownPluginOp {
                tag: tag.clone(),
                op: op.to_string(),
            })
        })?;

        Ok((def, plugin_op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve_and_reregistration_is_a_no_op() {
        let registry = NodeTypeRegistry::with_builtins();

        assert!(registry.is_registered(&NodeTypeTag::folder()));
        assert_eq!(
            registry.register(NodeTypeDef::container(NodeTypeTag::folder(), "Other")),
            Registered::AlreadyRegistered
        );
        // first definition wins
        let def = registry.resolve(&NodeTypeTag::folder()).unwrap();
        assert_eq!(def.display.label, "Folder");
    }

    #[test]
    fn unknown_tag_resolution_fails() {
        let registry = NodeTypeRegistry::with_builtins();
        let err = registry.resolve(&NodeTypeTag::new("hologram")).unwrap_err();

        assert_eq!(err.code, ErrorCode::UnknownNodeType);
    }

    #[test]
    fn unregister_is_guarded_by_live_nodes() {
        let registry = NodeTypeRegistry::with_builtins();
        let tag = NodeTypeTag::new("basemap");
        registry.register(NodeTypeDef::container(tag.clone(), "Basemap"));

        let err = registry.unregister(&tag, 3).unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
        assert!(registry.is_registered(&tag));

        registry.unregister(&tag, 0).unwrap();
        assert!(!registry.is_registered(&tag));
    }
}
