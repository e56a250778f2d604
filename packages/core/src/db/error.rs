//! Store Error Types
//!
//! This module defines error types for page storage operations: connection and
//! schema setup, SQL execution, and the constraint violations the hierarchy
//! engine reacts to (sibling position uniqueness, parent references).

use std::path::PathBuf;
use thiserror::Error;

/// Page store errors
///
/// Constraint violations are kept as separate variants so the service layer can
/// turn a position collision into a retryable conflict.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Two siblings would share the same position key
    #[error("Unique constraint violated: {context}")]
    UniqueViolation { context: String },

    /// A page with this id already exists
    #[error("Duplicate page id: {id}")]
    DuplicateId { id: String },

    /// A parent reference points at a missing page, or a delete would orphan children
    #[error("Foreign key constraint violated: {context}")]
    ForeignKeyViolation { context: String },

    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    Libsql(#[from] libsql::Error),

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecution { context: String },

    /// A stored row could not be decoded
    #[error("Corrupt row: {context}")]
    CorruptRow { context: String },

    /// The transaction was already committed or rolled back
    #[error("Transaction already finished")]
    TransactionClosed,
}

impl StoreError {
    pub fn unique_violation(context: impl Into<String>) -> Self {
        Self::UniqueViolation {
            context: context.into(),
        }
    }

    pub fn duplicate_id(id: impl Into<String>) -> Self {
        Self::DuplicateId { id: id.into() }
    }

    pub fn foreign_key_violation(context: impl Into<String>) -> Self {
        Self::ForeignKeyViolation {
            context: context.into(),
        }
    }

    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecution {
            context: context.into(),
        }
    }

    pub fn corrupt_row(context: impl Into<String>) -> Self {
        Self::CorruptRow {
            context: context.into(),
        }
    }

    /// Classify a libsql failure, separating constraint violations from the rest
    pub fn from_sql(context: &str, err: libsql::Error) -> Self {
        let message = err.to_string();
        if message.contains("UNIQUE constraint failed") {
            Self::unique_violation(format!("{}: {}", context, message))
        } else if message.contains("FOREIGN KEY constraint failed") {
            Self::foreign_key_violation(format!("{}: {}", context, message))
        } else {
            Self::sql_execution(format!("{}: {}", context, message))
        }
    }

    /// Classify a failed page insert; a primary key collision names the page
    pub fn from_insert(page_id: &str, err: libsql::Error) -> Self {
        match Self::from_sql(&format!("Failed to insert page {}", page_id), err) {
            Self::UniqueViolation { context } if context.contains("pages.id") => {
                Self::duplicate_id(page_id)
            }
            other => other,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
