//! TreeMutator - structural writes
//!
//! Creates pages, reorders/reparents a single page, and moves whole subtrees
//! between spaces. All validation happens before the first write, so a failed
//! call leaves the transaction untouched.
//!
//! # Position Assignment
//!
//! New placements always append: the key is drawn after the greatest sibling
//! position under the target parent, deleted siblings included since they keep
//! their slot. Caller-driven reorders supply their own key, which is only
//! validated here.
//!
//! # Depth Bound
//!
//! A create or reparent that would put any page below `max_depth` (root level is
//! depth 0) fails with `DepthExceeded` before the write, so every tree the engine
//! builds stays within the configured bound.

use crate::db::fractional_ordering::PositionKeyAllocator;
use crate::db::PageTransaction;
use crate::models::{CascadeResult, NewPage, Page, PagePatch};
use crate::services::attachments::AttachmentReassigner;
use crate::services::error::{TreeError, TreeResult};
use crate::services::tree_reader::TreeReader;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

pub struct TreeMutator {
    allocator: PositionKeyAllocator,
    reader: TreeReader,
    attachments: Arc<dyn AttachmentReassigner>,
}

impl TreeMutator {
    pub fn new(
        allocator: PositionKeyAllocator,
        reader: TreeReader,
        attachments: Arc<dyn AttachmentReassigner>,
    ) -> Self {
        Self {
            allocator,
            reader,
            attachments,
        }
    }

    /// Resolve a prospective parent: it must exist, be active, and live in `space_id`
    async fn resolve_parent(
        &self,
        tx: &mut dyn PageTransaction,
        parent_id: &str,
        space_id: &str,
    ) -> TreeResult<Page> {
        match tx.find_by_id(parent_id).await? {
            Some(parent) if !parent.is_deleted() && parent.space_id == space_id => Ok(parent),
            Some(parent) => {
                tracing::debug!(
                    "Rejecting parent {} (deleted={}, space={}, wanted space={})",
                    parent_id,
                    parent.is_deleted(),
                    parent.space_id,
                    space_id
                );
                Err(TreeError::parent_not_found(parent_id))
            }
            None => Err(TreeError::parent_not_found(parent_id)),
        }
    }

    /// Fail with `DepthExceeded` when `page_id` would land deeper than the bound
    fn check_depth(&self, page_id: &str, depth: usize) -> TreeResult<()> {
        let max_depth = self.reader.max_depth();
        if depth > max_depth {
            tracing::debug!("Rejecting placement of {} at depth {} (max {})", page_id, depth, max_depth);
            return Err(TreeError::depth_exceeded(page_id, depth, max_depth));
        }
        Ok(())
    }

    /// Fresh key after the last sibling under `parent_id` in `space_id`
    pub async fn append_position_in(
        &self,
        tx: &mut dyn PageTransaction,
        space_id: &str,
        parent_id: Option<&str>,
    ) -> TreeResult<String> {
        let last = tx.last_sibling_position(space_id, parent_id).await?;
        Ok(self.allocator.next_sibling_key(last.as_deref())?)
    }

    /// Create a page as the last child of its parent (or at the end of the root level)
    ///
    /// # Errors
    ///
    /// - `InvalidId` if a caller-supplied id is not a UUID
    /// - `ParentNotFound` if the parent is missing, deleted, or in another space
    /// - `DepthExceeded` if the parent already sits at the depth bound
    /// - `DuplicateId` if a caller-supplied id is taken
    /// - `PositionConflict` if a concurrent writer took the same key
    pub async fn create_in(&self, tx: &mut dyn PageTransaction, params: NewPage) -> TreeResult<Page> {
        if let Some(id) = &params.id {
            Uuid::parse_str(id).map_err(|_| TreeError::invalid_id(id))?;
        }
        let depth = match params.parent_page_id.as_deref() {
            Some(parent_id) => {
                self.resolve_parent(tx, parent_id, &params.space_id).await?;
                self.reader.depth_in(tx, parent_id).await? + 1
            }
            None => 0,
        };

        let position = self
            .append_position_in(tx, &params.space_id, params.parent_page_id.as_deref())
            .await?;
        let page = params.into_page(position, Utc::now());
        self.check_depth(&page.id, depth)?;
        tx.insert(&page)
            .await
            .map_err(|e| TreeError::from_placement(&page.id, e))?;

        tracing::info!(
            "Created page {} in space {} under {:?} at {}",
            page.id,
            page.space_id,
            page.parent_page_id,
            page.position
        );
        Ok(page)
    }

    /// Whether `candidate` is `page_id` or sits somewhere below it
    async fn is_within_subtree(
        &self,
        tx: &mut dyn PageTransaction,
        candidate: &str,
        page_id: &str,
    ) -> TreeResult<bool> {
        let mut visited = HashSet::new();
        let mut current = Some(candidate.to_string());

        while let Some(id) = current {
            if id == page_id {
                return Ok(true);
            }
            if !visited.insert(id.clone()) {
                return Err(TreeError::traversal_limit(id, visited.len()));
            }
            current = tx.find_by_id(&id).await?.and_then(|p| p.parent_page_id);
        }
        Ok(false)
    }

    /// Reorder and/or reparent a single page
    ///
    /// `parent_id = None` moves the page to the root level of its space. The
    /// position is caller-supplied, so a collision surfaces as `PositionConflict`
    /// for the caller to retry with a fresh key.
    ///
    /// # Errors
    ///
    /// - `InvalidPosition` if `position` is malformed
    /// - `PageNotFound` if the page is missing or soft-deleted
    /// - `ParentNotFound` if the new parent is missing, deleted, or in another space
    /// - `CircularReference` if the new parent is the page itself or one of its descendants
    /// - `DepthExceeded` if the deepest page of the moved subtree would pass the bound
    pub async fn move_page_in(
        &self,
        tx: &mut dyn PageTransaction,
        page_id: &str,
        position: &str,
        parent_id: Option<&str>,
    ) -> TreeResult<Page> {
        self.allocator
            .validate_position(position)
            .map_err(|e| TreeError::invalid_position(position, e.to_string()))?;

        let page = self.reader.get_page_in(tx, page_id).await?;
        if page.is_deleted() {
            return Err(TreeError::page_not_found(page_id));
        }

        let mut patch = PagePatch::new().with_position(position);
        if parent_id != page.parent_page_id.as_deref() {
            if let Some(new_parent) = parent_id {
                if new_parent == page_id {
                    return Err(TreeError::circular_reference(page_id, new_parent));
                }
                self.resolve_parent(tx, new_parent, &page.space_id).await?;
                if self.is_within_subtree(tx, new_parent, page_id).await? {
                    return Err(TreeError::circular_reference(page_id, new_parent));
                }
                let depth = self.reader.depth_in(tx, new_parent).await? + 1;
                let height = self.reader.subtree_height_in(tx, page_id).await?;
                self.check_depth(page_id, depth + height)?;
            }
            patch = patch.with_parent(parent_id.map(str::to_string));
        }

        tx.update_one(page_id, &patch)
            .await
            .map_err(|e| TreeError::from_placement(page_id, e))?;
        let moved = self.reader.get_page_in(tx, page_id).await?;

        tracing::info!(
            "Moved page {} to {:?} at {}",
            page_id,
            moved.parent_page_id,
            moved.position
        );
        Ok(moved)
    }

    /// Move a page and its whole subtree (deleted pages included) to another space
    ///
    /// The root lands at the end of the target root level; descendants keep their
    /// parents and positions. Attachments of every moved page follow.
    ///
    /// # Errors
    ///
    /// - `PageNotFound` if the root is missing
    /// - `AlreadyInSpace` if the root already lives in `target_space_id`
    pub async fn move_to_space_in(
        &self,
        tx: &mut dyn PageTransaction,
        root_id: &str,
        target_space_id: &str,
    ) -> TreeResult<CascadeResult> {
        let root = self.reader.get_page_in(tx, root_id).await?;
        if root.space_id == target_space_id {
            return Err(TreeError::already_in_space(root_id, target_space_id));
        }

        let captured: Vec<String> = self
            .reader
            .descendants_in(tx, root_id, true)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();

        let position = self.append_position_in(tx, target_space_id, None).await?;
        tx.update_one(
            root_id,
            &PagePatch::new()
                .with_space(target_space_id)
                .with_parent(None)
                .with_position(position),
        )
        .await
        .map_err(|e| TreeError::from_placement(root_id, e))?;

        if captured.len() > 1 {
            tx.update_many(&captured[1..], &PagePatch::new().with_space(target_space_id))
                .await?;
        }

        self.attachments
            .reassign_container(tx, &captured, target_space_id)
            .await?;

        tracing::info!(
            "Moved {} page(s) rooted at {} from space {} to {}",
            captured.len(),
            root_id,
            root.space_id,
            target_space_id
        );
        Ok(CascadeResult::new(root_id, captured))
    }
}

// Comprehensive tests in separate module
#[cfg(test)]
#[path = "tree_mutator_test.rs"]
mod tree_mutator_test;
