use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error as ThisError;

///
/// ErrorCode
///
/// The closed taxonomy surfaced across the RPC boundary. `Internal` is the
/// single escape hatch for bugs and resource exhaustion; callers treat it as
/// a transport-level failure and retry or reload.
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ErrorCode {
    // validation
    InvalidEnvelope,
    UnknownCommandKind,
    UnknownNodeType,
    NameValidationFailed,
    // topology
    ParentNotFound,
    NodeNotFound,
    CycleDetected,
    WrongTree,
    // concurrency
    VersionConflict,
    NameConflict,
    WorkingCopyExists,
    StoreConflict,
    // state
    NotInTrash,
    AlreadyInTrash,
    DuplicatePeer,
    // resource
    UnsupportedStoreVersion,
    Aborted,
    // unexpected failures only; never a contract outcome
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::InvalidEnvelope => "invalid_envelope",
            Self::UnknownCommandKind => "unknown_command_kind",
            Self::UnknownNodeType => "unknown_node_type",
            Self::NameValidationFailed => "name_validation_failed",
            Self::ParentNotFound => "parent_not_found",
            Self::NodeNotFound => "node_not_found",
            Self::CycleDetected => "cycle_detected",
            Self::WrongTree => "wrong_tree",
            Self::VersionConflict => "version_conflict",
            Self::NameConflict => "name_conflict",
            Self::WorkingCopyExists => "working_copy_exists",
            Self::StoreConflict => "store_conflict",
            Self::NotInTrash => "not_in_trash",
            Self::AlreadyInTrash => "already_in_trash",
            Self::DuplicatePeer => "duplicate_peer",
            Self::UnsupportedStoreVersion => "unsupported_store_version",
            Self::Aborted => "aborted",
            Self::Internal => "internal",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
/// Internal origin taxonomy for runtime classification.
/// Not a stable API; may change without notice.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Store,
    Schema,
    Registry,
    Entity,
    Mutation,
    WorkingCopy,
    Command,
    Subscription,
    Query,
    Api,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Store => "store",
            Self::Schema => "schema",
            Self::Registry => "registry",
            Self::Entity => "entity",
            Self::Mutation => "mutation",
            Self::WorkingCopy => "working_copy",
            Self::Command => "command",
            Self::Subscription => "subscription",
            Self::Query => "query",
            Self::Api => "api",
        };
        write!(f, "{label}")
    }
}

///
/// CoreError
/// Structured runtime error carrying the RPC code, an internal origin, and
/// the affected node when a service layer knows it.
///

#[derive(Clone, Debug, ThisError)]
#[error("{message}")]
pub struct CoreError {
    pub code: ErrorCode,
    pub origin: ErrorOrigin,
    pub message: String,
    pub node_id: Option<NodeId>,
}

impl CoreError {
    pub fn new(code: ErrorCode, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            code,
            origin,
            message: message.into(),
            node_id: None,
        }
    }

    pub fn internal(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, origin, message)
    }

    /// Attach the affected node id; keeps the first one on repeated wrapping.
    #[must_use]
    pub fn with_node(mut self, node_id: NodeId) -> Self {
        self.node_id.get_or_insert(node_id);
        self
    }

    pub fn node_not_found(node_id: NodeId) -> Self {
        Self::new(
            ErrorCode::NodeNotFound,
            ErrorOrigin::Mutation,
            format!("node not found: {node_id}"),
        )
        .with_node(node_id)
    }

    pub fn parent_not_found(parent_id: NodeId) -> Self {
        Self::new(
            ErrorCode::ParentNotFound,
            ErrorOrigin::Mutation,
            format!("parent not found: {parent_id}"),
        )
        .with_node(parent_id)
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.code, ErrorCode::NodeNotFound | ErrorCode::ParentNotFound)
    }

    #[must_use]
    pub fn display_with_code(&self) -> String {
        format!("{}:{}: {}", self.origin, self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_node_keeps_first_attachment() {
        let a = NodeId::nil();
        let err = CoreError::node_not_found(a).with_node(NodeId::nil());

        assert_eq!(err.node_id, Some(a));
        assert!(err.is_not_found());
    }

    #[test]
    fn display_with_code_is_classified() {
        let err = CoreError::new(ErrorCode::CycleDetected, ErrorOrigin::Mutation, "cycle");

        assert_eq!(err.display_with_code(), "mutation:cycle_detected: cycle");
    }
}
