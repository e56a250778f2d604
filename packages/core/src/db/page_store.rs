//! PageStore Trait - Storage Abstraction Layer
//!
//! This module defines the storage collaborator used by the hierarchy services.
//! Every read and write goes through a [`PageTransaction`], so a multi-step
//! operation (capture a subtree, then bulk-update it) sees one consistent snapshot
//! and commits or rolls back as a unit.
//!
//! # Architecture
//!
//! - **Abstraction Point**: Between the tree services and the database implementation
//! - **Multiple Backends**: `MemoryStore` (tests, embedding) and `SqliteStore` (libsql)
//! - **Transaction Handles**: Callers may open a transaction themselves and pass it
//!   to the `*_in` service methods to compose several operations atomically
//!
//! # Design Decisions
//!
//! 1. **Async-First**: All methods are async so network-backed stores fit the same trait
//! 2. **Constraint Parity**: Both stores enforce unique `(space, parent, position)` and
//!    parent references, reporting violations as [`StoreError`] variants
//! 3. **Bulk Primitives**: `update_many` / `delete_many` take a captured id list;
//!    traversal itself happens in the service layer over `find_by_space`
//!
//! # Examples
//!
//! ```rust,no_run
//! use pagespace_core::db::{MemoryStore, PageStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new();
//! let mut tx = store.begin().await?;
//! let page = tx.find_by_id("page-123").await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

use crate::db::error::StoreResult;
use crate::models::{Attachment, Page, PagePatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Factory for transactions against a page store
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so a single store can be shared behind
/// an `Arc` by every request handler.
#[async_trait]
pub trait PageStore: Send + Sync {
    /// Open a read-write transaction
    ///
    /// The returned handle isolates its reads and writes from concurrent
    /// transactions until `commit` or `rollback`. Dropping it without committing
    /// discards every write.
    async fn begin(&self) -> StoreResult<Box<dyn PageTransaction>>;
}

/// Transaction handle carrying every storage primitive the engine uses
#[async_trait]
pub trait PageTransaction: Send {
    //
    // CORE CRUD
    //

    /// Fetch a page by id, deleted or not
    async fn find_by_id(&mut self, id: &str) -> StoreResult<Option<Page>>;

    /// Insert a new page
    ///
    /// # Errors
    ///
    /// - `DuplicateId` if a page with the same id exists
    /// - `UniqueViolation` if a sibling already holds `position`
    /// - `ForeignKeyViolation` if `parent_page_id` does not exist
    async fn insert(&mut self, page: &Page) -> StoreResult<()>;

    /// Apply `patch` to one page, returning the number of rows changed (0 or 1)
    async fn update_one(&mut self, id: &str, patch: &PagePatch) -> StoreResult<u64>;

    /// Apply the same `patch` to every id in one statement
    async fn update_many(&mut self, ids: &[String], patch: &PagePatch) -> StoreResult<u64>;

    /// Permanently delete one page
    ///
    /// # Errors
    ///
    /// `ForeignKeyViolation` if other pages still reference it as parent
    async fn delete_one(&mut self, id: &str) -> StoreResult<u64>;

    /// Permanently delete ids in the given order
    ///
    /// Callers pass descendants before ancestors.
    async fn delete_many(&mut self, ids: &[String]) -> StoreResult<u64>;

    //
    // HIERARCHY QUERIES
    //

    /// Direct children under `parent_id` (root level when `None`), ordered by position then id
    async fn find_children(
        &mut self,
        space_id: &str,
        parent_id: Option<&str>,
        include_deleted: bool,
    ) -> StoreResult<Vec<Page>>;

    /// Greatest sibling position under `parent_id`, counting deleted rows
    async fn last_sibling_position(
        &mut self,
        space_id: &str,
        parent_id: Option<&str>,
    ) -> StoreResult<Option<String>>;

    /// Existence check for children of `parent_id`
    async fn has_children(&mut self, parent_id: &str, include_deleted: bool) -> StoreResult<bool>;

    /// Every page of a space in one bulk fetch (adjacency index source)
    async fn find_by_space(&mut self, space_id: &str) -> StoreResult<Vec<Page>>;

    /// Soft-deleted pages of a space, optionally only those deleted before `before`
    async fn find_deleted(
        &mut self,
        space_id: &str,
        before: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<Page>>;

    //
    // ATTACHMENTS
    //

    async fn insert_attachment(&mut self, attachment: &Attachment) -> StoreResult<()>;

    /// Attachments keyed by any of `page_ids`
    async fn find_attachments(&mut self, page_ids: &[String]) -> StoreResult<Vec<Attachment>>;

    /// Move attachments of `page_ids` to `space_id`, returning rows changed
    async fn reassign_attachments(&mut self, page_ids: &[String], space_id: &str) -> StoreResult<u64>;

    //
    // LIFECYCLE
    //

    /// Make every write of this transaction durable
    async fn commit(&mut self) -> StoreResult<()>;

    /// Discard every write of this transaction
    async fn rollback(&mut self) -> StoreResult<()>;
}
