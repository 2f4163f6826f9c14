//! Database Error Types
//!
//! This module defines error types for node store operations, providing
//! clear error handling for connection, initialization, constraint and query failures.

use std::path::PathBuf;
use thiserror::Error;

/// Node store errors
///
/// Covers connection and schema setup for the libsql backend as well as the
/// store contract failures shared by every backend (missing rows, duplicate keys,
/// sibling-order uniqueness). Tree-level failures are handled by the service layer.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Row does not exist
    #[error("Node not found: {id}")]
    NotFound { id: String },

    /// `code` already used in the partition
    #[error("Code '{code}' already exists in tree type '{tree_type}'")]
    DuplicateCode { tree_type: String, code: String },

    /// `id` already used
    #[error("Node ID already exists: {id}")]
    DuplicateId { id: String },

    /// Committed state would break a storage-level constraint
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Partition changed since the caller read it (optimistic concurrency control)
    #[error("Stale partition '{tree_type}': expected revision {expected_revision}, found {actual_revision}")]
    StaleRevision {
        tree_type: String,
        expected_revision: i64,
        actual_revision: i64,
    },

    /// Partition lock not acquired within the deadline
    #[error("Timed out after {waited_ms}ms waiting for the '{tree_type}' partition lock")]
    LockTimeout { tree_type: String, waited_ms: u64 },

    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to initialize database schema
    #[error("Failed to initialize database schema: {0}")]
    InitializationFailed(String),

    /// Permission denied when accessing database
    #[error("Permission denied for database path: {path}")]
    PermissionDenied { path: PathBuf },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecutionError { context: String },

    /// Stored JSON could not be read or written
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DatabaseError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn duplicate_code(tree_type: impl Into<String>, code: impl Into<String>) -> Self {
        Self::DuplicateCode {
            tree_type: tree_type.into(),
            code: code.into(),
        }
    }

    pub fn duplicate_id(id: impl Into<String>) -> Self {
        Self::DuplicateId { id: id.into() }
    }

    pub fn constraint_violation(msg: impl Into<String>) -> Self {
        Self::ConstraintViolation(msg.into())
    }

    pub fn stale_revision(
        tree_type: impl Into<String>,
        expected_revision: i64,
        actual_revision: i64,
    ) -> Self {
        Self::StaleRevision {
            tree_type: tree_type.into(),
            expected_revision,
            actual_revision,
        }
    }

    pub fn lock_timeout(tree_type: impl Into<String>, waited_ms: u64) -> Self {
        Self::LockTimeout {
            tree_type: tree_type.into(),
            waited_ms,
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create an initialization failed error
    pub fn initialization_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Create a permission denied error
    pub fn permission_denied(path: PathBuf) -> Self {
        Self::PermissionDenied { path }
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecutionError {
            context: context.into(),
        }
    }
}
