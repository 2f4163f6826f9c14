//! Service Layer Error Types
//!
//! This module defines the caller-facing error taxonomy of the tree engine. Every
//! variant except `DatabaseError` is raised before anything is written, so a returned
//! error always means the stored tree is unchanged.

use crate::db::DatabaseError;
use crate::models::{AttributeUpdateRejection, ValidationError};
use crate::services::invariants::InvariantViolation;
use thiserror::Error;

/// Tree operation errors
#[derive(Error, Debug)]
pub enum TreeServiceError {
    /// Node missing or soft-deleted
    #[error("Node not found: {id}")]
    NotFound { id: String },

    /// Parent missing, soft-deleted, or in another partition
    #[error("Invalid parent node {parent_id}: {reason}")]
    InvalidParent { parent_id: String, reason: String },

    /// Move target is the node itself or one of its descendants
    #[error("Cannot move node {node_id} under {new_parent_id}: target is inside its own subtree")]
    CyclicMove {
        node_id: String,
        new_parent_id: String,
    },

    /// Delete refused because live children exist
    #[error("Node {id} has {child_count} live children")]
    HasChildren { id: String, child_count: usize },

    /// Reorder list differs from the current live sibling set
    #[error("Sibling set mismatch under {parent:?} in '{tree_type}': {detail}")]
    SiblingSetMismatch {
        tree_type: String,
        parent: Option<String>,
        detail: String,
    },

    /// Code already used in the partition
    #[error("Code '{code}' already exists in tree type '{tree_type}'")]
    DuplicateCode { tree_type: String, code: String },

    /// Partition lock not acquired within the deadline
    #[error("Timed out after {waited_ms}ms waiting for the '{tree_type}' partition lock")]
    LockTimeout { tree_type: String, waited_ms: u64 },

    /// Partition changed under a structural mutation, typically by a writer in another
    /// process sharing the database; nothing was written
    #[error("Tree type '{tree_type}' changed concurrently: expected revision {expected_revision}, found {actual_revision}")]
    StaleState {
        tree_type: String,
        expected_revision: i64,
        actual_revision: i64,
    },

    /// Attribute update tried to set a structural field
    #[error("Field '{field}' is structural; use move or reorder instead")]
    StructuralFieldInUpdate { field: String },

    /// Purge refused because part of the subtree is still live
    #[error("Node {id} cannot be purged: {live_count} node(s) in its subtree are not deleted")]
    NotDeleted { id: String, live_count: usize },

    /// Candidate state failed the invariant check; nothing was written
    #[error("Tree invariant violated: {}", format_violations(.0))]
    InvariantViolation(Vec<InvariantViolation>),

    /// Caller input rejected
    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    /// Storage failure
    #[error("Database operation failed: {0}")]
    DatabaseError(DatabaseError),
}

fn format_violations(violations: &[InvariantViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl TreeServiceError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn invalid_parent(parent_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParent {
            parent_id: parent_id.into(),
            reason: reason.into(),
        }
    }

    pub fn cyclic_move(node_id: impl Into<String>, new_parent_id: impl Into<String>) -> Self {
        Self::CyclicMove {
            node_id: node_id.into(),
            new_parent_id: new_parent_id.into(),
        }
    }

    pub fn sibling_set_mismatch(
        tree_type: impl Into<String>,
        parent: Option<&str>,
        detail: impl Into<String>,
    ) -> Self {
        Self::SiblingSetMismatch {
            tree_type: tree_type.into(),
            parent: parent.map(str::to_string),
            detail: detail.into(),
        }
    }

    pub fn lock_timeout(tree_type: impl Into<String>, waited_ms: u64) -> Self {
        Self::LockTimeout {
            tree_type: tree_type.into(),
            waited_ms,
        }
    }

    pub fn structural_field(field: impl Into<String>) -> Self {
        Self::StructuralFieldInUpdate {
            field: field.into(),
        }
    }

    /// Lock contention and stale reads are transient; every other error is deterministic
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::StaleState { .. })
    }
}

impl From<DatabaseError> for TreeServiceError {
    fn from(error: DatabaseError) -> Self {
        match error {
            DatabaseError::NotFound { id } => Self::NotFound { id },
            DatabaseError::DuplicateCode { tree_type, code } => {
                Self::DuplicateCode { tree_type, code }
            }
            DatabaseError::LockTimeout {
                tree_type,
                waited_ms,
            } => Self::LockTimeout {
                tree_type,
                waited_ms,
            },
            DatabaseError::StaleRevision {
                tree_type,
                expected_revision,
                actual_revision,
            } => Self::StaleState {
                tree_type,
                expected_revision,
                actual_revision,
            },
            other => Self::DatabaseError(other),
        }
    }
}

impl From<AttributeUpdateRejection> for TreeServiceError {
    fn from(rejection: AttributeUpdateRejection) -> Self {
        match rejection {
            AttributeUpdateRejection::StructuralField(field) => Self::structural_field(field),
            AttributeUpdateRejection::Malformed(reason) => {
                Self::ValidationFailed(ValidationError::InvalidProperties(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_errors_map_onto_service_variants() {
        let mapped: TreeServiceError = DatabaseError::not_found("n1").into();
        assert!(matches!(mapped, TreeServiceError::NotFound { ref id } if id == "n1"));

        let mapped: TreeServiceError = DatabaseError::duplicate_code("site", "home").into();
        assert!(matches!(mapped, TreeServiceError::DuplicateCode { .. }));

        let mapped: TreeServiceError = DatabaseError::constraint_violation("x").into();
        assert!(matches!(mapped, TreeServiceError::DatabaseError(_)));

        let mapped: TreeServiceError = DatabaseError::lock_timeout("site", 20).into();
        assert!(matches!(mapped, TreeServiceError::LockTimeout { waited_ms: 20, .. }));

        let mapped: TreeServiceError = DatabaseError::stale_revision("site", 3, 4).into();
        assert!(matches!(
            mapped,
            TreeServiceError::StaleState {
                expected_revision: 3,
                actual_revision: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(TreeServiceError::lock_timeout("site", 50).is_retryable());
        assert!(TreeServiceError::from(DatabaseError::stale_revision("site", 1, 2)).is_retryable());
        assert!(!TreeServiceError::not_found("x").is_retryable());
        assert!(!TreeServiceError::cyclic_move("a", "b").is_retryable());
    }

    #[test]
    fn test_attribute_rejection_mapping() {
        let err: TreeServiceError =
            AttributeUpdateRejection::StructuralField("sortOrder".to_string()).into();
        assert!(matches!(
            err,
            TreeServiceError::StructuralFieldInUpdate { ref field } if field == "sortOrder"
        ));
    }
}
