//! Service Layer Error Types
//!
//! Errors raised by the hierarchy services. Validation variants carry the
//! offending id, and [`TreeError::kind`] folds everything into the small taxonomy
//! callers map to their own responses.

use crate::db::fractional_ordering::KeyError;
use crate::db::StoreError;
use thiserror::Error;

/// Error category exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Forbidden,
    /// Sibling position collision; retrying with a fresh key is expected to succeed
    Conflict,
    Internal,
}

/// Hierarchy operation errors
#[derive(Error, Debug)]
pub enum TreeError {
    /// Page not found by ID
    #[error("Page not found: {id}")]
    PageNotFound { id: String },

    /// Parent missing, soft-deleted, or in another space
    #[error("Parent page not found: {parent_id}")]
    ParentNotFound { parent_id: String },

    /// Caller-supplied position is malformed
    #[error("Invalid position '{position}': {reason}")]
    InvalidPosition { position: String, reason: String },

    /// Allocator bounds out of order
    #[error("Invalid key range: {lower} is not below {upper}")]
    InvalidRange { lower: String, upper: String },

    /// Caller-supplied id is not a UUID
    #[error("Invalid page id: {id}")]
    InvalidId { id: String },

    /// Caller-supplied id already belongs to another page
    #[error("Page id already exists: {id}")]
    DuplicateId { id: String },

    /// Placement would nest a page deeper than the configured bound
    #[error("Page {page_id} would reach depth {depth} (max {max_depth})")]
    DepthExceeded {
        page_id: String,
        depth: usize,
        max_depth: usize,
    },

    /// Moving a page under itself or one of its descendants
    #[error("Circular reference: page {page_id} cannot move under {parent_id}")]
    CircularReference { page_id: String, parent_id: String },

    #[error("Page {page_id} is already in space {space_id}")]
    AlreadyInSpace { page_id: String, space_id: String },

    /// Permanent delete would orphan children
    #[error("Page {page_id} still has children")]
    HasChildren { page_id: String },

    /// Delete of a page carrying a reserved title
    #[error("Page {page_id} is protected ('{title}')")]
    Protected { page_id: String, title: String },

    /// Sibling position collision reported by the store while placing `page_id`
    #[error("Position conflict for page {page_id}: {context}")]
    PositionConflict { page_id: String, context: String },

    /// Traversal revisited a page, i.e. the stored parent chain is cyclic
    #[error("Traversal limit reached at page {page_id} (depth {depth})")]
    TraversalLimit { page_id: String, depth: usize },

    /// Storage failure other than a placement collision
    #[error("Store operation failed: {0}")]
    Store(StoreError),

    /// Service constructed with an invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TreeError {
    pub fn page_not_found(id: impl Into<String>) -> Self {
        Self::PageNotFound { id: id.into() }
    }

    pub fn parent_not_found(parent_id: impl Into<String>) -> Self {
        Self::ParentNotFound {
            parent_id: parent_id.into(),
        }
    }

    pub fn invalid_position(position: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPosition {
            position: position.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_id(id: impl Into<String>) -> Self {
        Self::InvalidId { id: id.into() }
    }

    pub fn duplicate_id(id: impl Into<String>) -> Self {
        Self::DuplicateId { id: id.into() }
    }

    pub fn depth_exceeded(page_id: impl Into<String>, depth: usize, max_depth: usize) -> Self {
        Self::DepthExceeded {
            page_id: page_id.into(),
            depth,
            max_depth,
        }
    }

    pub fn position_conflict(page_id: impl Into<String>, context: impl Into<String>) -> Self {
        Self::PositionConflict {
            page_id: page_id.into(),
            context: context.into(),
        }
    }

    /// Map a store failure raised while writing the parent or position of `page_id`
    ///
    /// A unique violation there is a sibling position collision on that page.
    pub fn from_placement(page_id: &str, err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { context } => Self::position_conflict(page_id, context),
            other => other.into(),
        }
    }

    pub fn circular_reference(page_id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self::CircularReference {
            page_id: page_id.into(),
            parent_id: parent_id.into(),
        }
    }

    pub fn already_in_space(page_id: impl Into<String>, space_id: impl Into<String>) -> Self {
        Self::AlreadyInSpace {
            page_id: page_id.into(),
            space_id: space_id.into(),
        }
    }

    pub fn has_children(page_id: impl Into<String>) -> Self {
        Self::HasChildren {
            page_id: page_id.into(),
        }
    }

    pub fn protected(page_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self::Protected {
            page_id: page_id.into(),
            title: title.into(),
        }
    }

    pub fn traversal_limit(page_id: impl Into<String>, depth: usize) -> Self {
        Self::TraversalLimit {
            page_id: page_id.into(),
            depth,
        }
    }

    /// Map the error onto the caller-facing taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PageNotFound { .. } | Self::ParentNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidPosition { .. }
            | Self::InvalidRange { .. }
            | Self::InvalidId { .. }
            | Self::DuplicateId { .. }
            | Self::DepthExceeded { .. }
            | Self::CircularReference { .. }
            | Self::AlreadyInSpace { .. }
            | Self::HasChildren { .. } => ErrorKind::BadRequest,
            Self::Protected { .. } => ErrorKind::Forbidden,
            Self::PositionConflict { .. } => ErrorKind::Conflict,
            Self::TraversalLimit { .. } | Self::Store(_) | Self::InvalidConfig(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl From<StoreError> for TreeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateId { id } => Self::DuplicateId { id },
            other => Self::Store(other),
        }
    }
}

impl From<KeyError> for TreeError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::InvalidRange { lower, upper } => Self::InvalidRange { lower, upper },
            KeyError::InvalidKey { key, reason } => Self::InvalidPosition {
                position: key,
                reason,
            },
            KeyError::Exhausted { key } => Self::InvalidPosition {
                reason: "no key fits after this position".to_string(),
                position: key,
            },
        }
    }
}

/// Result alias for hierarchy operations
pub type TreeResult<T> = Result<T, TreeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_taxonomy() {
        assert_eq!(TreeError::page_not_found("p").kind(), ErrorKind::NotFound);
        assert_eq!(TreeError::parent_not_found("p").kind(), ErrorKind::NotFound);
        assert_eq!(
            TreeError::invalid_position("zz", "bad").kind(),
            ErrorKind::BadRequest
        );
        assert_eq!(
            TreeError::circular_reference("a", "b").kind(),
            ErrorKind::BadRequest
        );
        assert_eq!(TreeError::protected("p", "__system:x").kind(), ErrorKind::Forbidden);
        assert_eq!(
            TreeError::traversal_limit("p", 3).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_store_errors_map_to_conflict_or_internal() {
        let conflict =
            TreeError::from_placement("page-1", StoreError::unique_violation("pages.position"));
        assert!(conflict.is_conflict());
        match conflict {
            TreeError::PositionConflict { page_id, context } => {
                assert_eq!(page_id, "page-1");
                assert_eq!(context, "pages.position");
            }
            other => panic!("unexpected {:?}", other),
        }

        // Unattributed unique violations are not retryable placements
        let other: TreeError = StoreError::unique_violation("attachments.id").into();
        assert_eq!(other.kind(), ErrorKind::Internal);

        let fk: TreeError = StoreError::foreign_key_violation("parent").into();
        assert_eq!(fk.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_duplicate_id_is_bad_request() {
        let err: TreeError = StoreError::duplicate_id("page-1").into();
        assert!(matches!(err, TreeError::DuplicateId { ref id } if id == "page-1"));
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(!err.is_conflict());

        let err = TreeError::from_placement("page-2", StoreError::duplicate_id("page-2"));
        assert!(matches!(err, TreeError::DuplicateId { .. }));
        assert_eq!(TreeError::depth_exceeded("p", 4, 3).kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_key_errors_map_to_bad_request() {
        let err: TreeError = KeyError::InvalidRange {
            lower: "a1".to_string(),
            upper: "a0".to_string(),
        }
        .into();
        assert!(matches!(err, TreeError::InvalidRange { .. }));
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }
}
