use crate::{
    MAX_NODE_NAME_CHARS,
    error::{CoreError, ErrorCode, ErrorOrigin},
    model::envelope::NameConflictPolicy,
    mutation::nodes::child_by_name,
    registry::NodeTypeDef,
    store::Transaction,
    types::{NodeId, TreeId},
};
use thiserror::Error as ThisError;

///
/// NamingError
///

#[derive(Debug, ThisError)]
pub enum NamingError {
    #[error("node name must not be empty")]
    Empty,

    #[error("node name exceeds {MAX_NODE_NAME_CHARS} characters ({len})")]
    TooLong { len: usize },

    #[error("node name '{name}' rejected by the '{node_type}' name pattern")]
    PatternRejected { name: String, node_type: String },

    #[error("sibling named '{name}' already exists")]
    Conflict { name: String },

    #[error("no free auto-rename slot for '{name}'")]
    Exhausted { name: String },
}

impl NamingError {
    const fn code(&self) -> ErrorCode {
        match self {
            Self::Conflict { .. } => ErrorCode::NameConflict,
            Self::Exhausted { .. } => ErrorCode::Internal,
            _ => ErrorCode::NameValidationFailed,
        }
    }
}

impl From<NamingError> for CoreError {
    fn from(err: NamingError) -> Self {
        Self::new(err.code(), ErrorOrigin::Mutation, err.to_string())
    }
}

///
/// RenameSuffix
///
/// Which suffix family auto-rename draws from. Plain collisions count up
/// `" (2)"`; duplicates and pastes mark provenance with `" (Copy)"`.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RenameSuffix {
    Numbered,
    Copy,
}

///
/// NameResolution
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NameResolution {
    /// The desired slot was free (or is the node's own).
    Free(String),
    /// Auto-rename found a free suffixed slot.
    Renamed(String),
    /// Overwrite policy: take the slot after the displaced sibling's
    /// subtree is purged in this same transaction.
    Displace { name: String, displaced: NodeId },
}

impl NameResolution {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Free(name) | Self::Renamed(name) | Self::Displace { name, .. } => name,
        }
    }
}

/// Built-in admission rules plus the node type's own pattern.
pub(crate) fn validate_name(def: &NodeTypeDef, name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(NamingError::Empty.into());
    }

    let len = name.chars().count();
    if len > MAX_NODE_NAME_CHARS {
        return Err(NamingError::TooLong { len }.into());
    }

    if let Some(pattern) = def.validation.name_pattern
        && !pattern(name)
    {
        return Err(NamingError::PatternRejected {
            name: name.to_string(),
            node_type: def.tag.to_string(),
        }
        .into());
    }

    Ok(())
}

// Practical ceiling on suffix probing; a parent with this many homonymous
// siblings is a runaway caller.
const MAX_RENAME_ATTEMPTS: u32 = 10_000;

/// Apply the collision policy to a desired name under `(tree, parent)`.
/// `exclude` is the node being renamed or moved, whose own slot never
/// counts as a conflict.
pub(crate) fn resolve_name(
    txn: &Transaction<'_>,
    tree_id: TreeId,
    parent_id: NodeId,
    desired: &str,
    policy: NameConflictPolicy,
    suffix: RenameSuffix,
    exclude: Option<NodeId>,
) -> Result<NameResolution, CoreError> {
    let occupant = |name: &str| {
        child_by_name(txn, tree_id, parent_id, name).filter(|owner| Some(*owner) != exclude)
    };

    let Some(displaced) = occupant(desired) else {
        return Ok(NameResolution::Free(desired.to_string()));
    };

    match policy {
        NameConflictPolicy::Error => Err(NamingError::Conflict {
            name: desired.to_string(),
        }
        .into()),
        NameConflictPolicy::Overwrite => Ok(NameResolution::Displace {
            name: desired.to_string(),
            displaced,
        }),
        NameConflictPolicy::AutoRename => {
            for attempt in 2..MAX_RENAME_ATTEMPTS {
                let candidate = match suffix {
                    RenameSuffix::Numbered => format!("{desired} ({attempt})"),
                    RenameSuffix::Copy if attempt == 2 => format!("{desired} (Copy)"),
                    RenameSuffix::Copy => format!("{desired} (Copy {})", attempt - 1),
                };
                if occupant(&candidate).is_none() {
                    return Ok(NameResolution::Renamed(candidate));
                }
            }

            Err(NamingError::Exhausted {
                name: desired.to_string(),
            }
            .into())
        }
    }
}
