//! Page Data Structures
//!
//! A `Page` is the only entity of the hierarchy engine. Pages live in a space,
//! optionally point at a parent page, and are ordered among their siblings by an
//! opaque `position` key (see [`crate::db::fractional_ordering`]).
//!
//! # Examples
//!
//! ```rust
//! use pagespace_core::models::NewPage;
//!
//! let params = NewPage::new("space-1")
//!     .with_title("Getting started")
//!     .with_creator("user-1");
//! assert!(params.parent_page_id.is_none());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A document page participating in the hierarchy
///
/// # Fields
///
/// - `id`: Stable identifier (UUID v4 when generated by the engine)
/// - `space_id`: Enclosing space; always equal to the parent's space
/// - `parent_page_id`: Back-reference to the parent (`None` = root level)
/// - `position`: Fractional sort key among siblings (byte-order comparison)
/// - `deleted_at` / `deleted_by_id`: Soft-delete markers (`None` = active)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,

    pub space_id: String,

    pub parent_page_id: Option<String>,

    pub position: String,

    /// Page title; also checked against protected prefixes before deletes
    pub title: Option<String>,

    pub icon: Option<String>,

    pub creator_id: Option<String>,

    pub last_updated_by_id: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub deleted_at: Option<DateTime<Utc>>,

    pub deleted_by_id: Option<String>,
}

impl Page {
    /// Whether the page is soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether the page sits at the root level of its space
    pub fn is_root(&self) -> bool {
        self.parent_page_id.is_none()
    }

    /// Apply a patch in memory, mirroring what the stores persist
    pub fn apply(&mut self, patch: &PagePatch, now: DateTime<Utc>) {
        if let Some(parent) = &patch.parent_page_id {
            self.parent_page_id = parent.clone();
        }
        if let Some(space_id) = &patch.space_id {
            self.space_id = space_id.clone();
        }
        if let Some(position) = &patch.position {
            self.position = position.clone();
        }
        if let Some(deleted_at) = patch.deleted_at {
            self.deleted_at = deleted_at;
        }
        if let Some(deleted_by) = &patch.deleted_by_id {
            self.deleted_by_id = deleted_by.clone();
        }
        if let Some(updated_by) = &patch.last_updated_by_id {
            self.last_updated_by_id = updated_by.clone();
        }
        self.updated_at = now;
    }
}

/// Parameters for creating a page
///
/// `id` is optional: callers that pre-generate ids for optimistic UI updates may
/// pass a UUID, otherwise one is generated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPage {
    pub id: Option<String>,
    pub space_id: String,
    pub parent_page_id: Option<String>,
    pub title: Option<String>,
    pub icon: Option<String>,
    pub creator_id: Option<String>,
}

impl NewPage {
    pub fn new(space_id: impl Into<String>) -> Self {
        Self {
            space_id: space_id.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_parent(mut self, parent_page_id: impl Into<String>) -> Self {
        self.parent_page_id = Some(parent_page_id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_creator(mut self, creator_id: impl Into<String>) -> Self {
        self.creator_id = Some(creator_id.into());
        self
    }

    /// Materialize the page row at `position`
    pub fn into_page(self, position: String, now: DateTime<Utc>) -> Page {
        Page {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            space_id: self.space_id,
            parent_page_id: self.parent_page_id,
            position,
            title: self.title,
            icon: self.icon,
            last_updated_by_id: self.creator_id.clone(),
            creator_id: self.creator_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by_id: None,
        }
    }
}

/// Sparse update applied by `update_one` / `update_many`
///
/// Uses the double-Option pattern for nullable columns:
/// - `None`: leave the column unchanged
/// - `Some(None)`: set the column to NULL
/// - `Some(Some(v))`: set the column to `v`
///
/// `updated_at` is always refreshed by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagePatch {
    pub parent_page_id: Option<Option<String>>,
    pub space_id: Option<String>,
    pub position: Option<String>,
    pub deleted_at: Option<Option<DateTime<Utc>>>,
    pub deleted_by_id: Option<Option<String>>,
    pub last_updated_by_id: Option<Option<String>>,
}

impl PagePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(mut self, parent_page_id: Option<String>) -> Self {
        self.parent_page_id = Some(parent_page_id);
        self
    }

    pub fn with_space(mut self, space_id: impl Into<String>) -> Self {
        self.space_id = Some(space_id.into());
        self
    }

    pub fn with_position(mut self, position: impl Into<String>) -> Self {
        self.position = Some(position.into());
        self
    }

    pub fn with_updated_by(mut self, actor_id: Option<String>) -> Self {
        self.last_updated_by_id = Some(actor_id);
        self
    }

    /// Mark soft-deleted at `at` by `actor_id`
    pub fn soft_deleted(mut self, at: DateTime<Utc>, actor_id: impl Into<String>) -> Self {
        self.deleted_at = Some(Some(at));
        self.deleted_by_id = Some(Some(actor_id.into()));
        self
    }

    /// Clear the soft-delete markers
    pub fn restored(mut self) -> Self {
        self.deleted_at = Some(None);
        self.deleted_by_id = Some(None);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A page annotated with whether it has active children
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    #[serde(flatten)]
    pub page: Page,
    pub has_children: bool,
}

/// File attached to a page; owned by the attachment collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub page_id: String,
    pub space_id: String,
    pub file_name: String,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    pub fn new(page_id: impl Into<String>, space_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            page_id: page_id.into(),
            space_id: space_id.into(),
            file_name: file_name.into(),
            created_at: Utc::now(),
        }
    }
}

/// Outcome of a subtree cascade (ids in capture order)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeResult {
    pub root_id: String,
    pub affected_ids: Vec<String>,
}

impl CascadeResult {
    pub fn new(root_id: impl Into<String>, affected_ids: Vec<String>) -> Self {
        Self {
            root_id: root_id.into(),
            affected_ids,
        }
    }

    pub fn affected_count(&self) -> usize {
        self.affected_ids.len()
    }
}
