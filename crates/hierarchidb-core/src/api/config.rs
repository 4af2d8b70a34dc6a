use crate::{DEFAULT_HISTORY_CAPACITY, DEFAULT_WORKING_COPY_TTL_MS};

///
/// TreeDefinition
///
/// One tree the host wants available. Trees are addressed by name at init
/// and by id afterwards; re-initialising against an existing store reuses
/// the stored tree.
///

#[derive(Clone, Debug)]
pub struct TreeDefinition {
    pub name: String,
}

impl TreeDefinition {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

///
/// InitConfig
///
/// The single configuration struct a host supplies when embedding the
/// engine.
///

#[derive(Clone, Debug)]
pub struct InitConfig {
    pub store_name: String,
    pub tree_definitions: Vec<TreeDefinition>,
    pub history_capacity: usize,
    pub working_copy_ttl_ms: u64,
    /// Seed of the deterministic id-generator randomness; hosts pass
    /// entropy, tests pass a constant.
    pub id_seed: u64,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            store_name: "hierarchidb".to_string(),
            tree_definitions: vec![TreeDefinition::named("main")],
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            working_copy_ttl_ms: DEFAULT_WORKING_COPY_TTL_MS,
            id_seed: 0,
        }
    }
}
