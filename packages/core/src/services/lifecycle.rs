//! LifecycleManager - soft delete, restore, permanent delete
//!
//! ```text
//! Active --soft_delete--> SoftDeleted --restore--> Active
//! Active | SoftDeleted --force_delete--> Gone
//! ```
//!
//! Every delete edge passes the protected-title guard before any write. Tree
//! operations capture the subtree id set first and then apply one bulk mutation
//! to exactly that set, inside the caller's transaction.
//!
//! Restoring a page whose parent is still deleted detaches it to the root level
//! of its space with a fresh position, so it never stays hidden under a deleted
//! ancestor.

use crate::db::fractional_ordering::PositionKeyAllocator;
use crate::db::PageTransaction;
use crate::models::{CascadeResult, Page, PagePatch};
use crate::services::error::{TreeError, TreeResult};
use crate::services::protected::ProtectedTitleGuard;
use crate::services::tree_reader::TreeReader;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

pub struct LifecycleManager {
    allocator: PositionKeyAllocator,
    reader: TreeReader,
    guard: ProtectedTitleGuard,
}

impl LifecycleManager {
    pub fn new(allocator: PositionKeyAllocator, reader: TreeReader, guard: ProtectedTitleGuard) -> Self {
        Self {
            allocator,
            reader,
            guard,
        }
    }

    pub fn guard(&self) -> &ProtectedTitleGuard {
        &self.guard
    }

    /// Fetch a page that is about to be deleted and run the guard on it
    async fn guarded_page(&self, tx: &mut dyn PageTransaction, page_id: &str) -> TreeResult<Page> {
        let page = self.reader.get_page_in(tx, page_id).await?;
        self.guard.check(&page)?;
        Ok(page)
    }

    async fn captured_ids(&self, tx: &mut dyn PageTransaction, root_id: &str) -> TreeResult<Vec<String>> {
        Ok(self
            .reader
            .descendants_in(tx, root_id, true)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect())
    }

    /// Whether `page` sits under a parent that is itself soft-deleted
    async fn has_deleted_parent(&self, tx: &mut dyn PageTransaction, page: &Page) -> TreeResult<bool> {
        match page.parent_page_id.as_deref() {
            Some(parent_id) => Ok(tx
                .find_by_id(parent_id)
                .await?
                .is_some_and(|parent| parent.is_deleted())),
            None => Ok(false),
        }
    }

    /// Patch that moves `page` to the end of its space's root level
    async fn detach_patch(&self, tx: &mut dyn PageTransaction, page: &Page) -> TreeResult<PagePatch> {
        let last = tx.last_sibling_position(&page.space_id, None).await?;
        let position = self.allocator.next_sibling_key(last.as_deref())?;
        tracing::debug!(
            "Detaching page {} from deleted parent {:?} to root position {}",
            page.id,
            page.parent_page_id,
            position
        );
        Ok(PagePatch::new().with_parent(None).with_position(position))
    }

    /// Soft-delete a single page; its children keep their own flags
    pub async fn soft_delete_in(
        &self,
        tx: &mut dyn PageTransaction,
        page_id: &str,
        actor_id: &str,
    ) -> TreeResult<Page> {
        self.guarded_page(tx, page_id).await?;
        tx.update_one(page_id, &PagePatch::new().soft_deleted(Utc::now(), actor_id))
            .await?;
        tracing::info!("Soft-deleted page {} (actor {})", page_id, actor_id);
        self.reader.get_page_in(tx, page_id).await
    }

    /// Soft-delete a page and every descendant existing at this moment
    pub async fn soft_delete_tree_in(
        &self,
        tx: &mut dyn PageTransaction,
        root_id: &str,
        actor_id: &str,
    ) -> TreeResult<CascadeResult> {
        self.guarded_page(tx, root_id).await?;
        let ids = self.captured_ids(tx, root_id).await?;
        tx.update_many(&ids, &PagePatch::new().soft_deleted(Utc::now(), actor_id))
            .await?;
        tracing::info!("Soft-deleted {} page(s) under {} (actor {})", ids.len(), root_id, actor_id);
        Ok(CascadeResult::new(root_id, ids))
    }

    /// Restore a single page, detaching it when its parent is still deleted
    ///
    /// An active page that is not under a deleted parent is returned unchanged
    /// without any write.
    pub async fn restore_single_in(
        &self,
        tx: &mut dyn PageTransaction,
        page_id: &str,
        actor_id: &str,
    ) -> TreeResult<Page> {
        let page = self.reader.get_page_in(tx, page_id).await?;
        let detach = self.has_deleted_parent(tx, &page).await?;
        if !page.is_deleted() && !detach {
            tracing::debug!("Page {} is already active, nothing to restore", page_id);
            return Ok(page);
        }

        let mut patch = if detach {
            self.detach_patch(tx, &page).await?
        } else {
            PagePatch::new()
        };
        patch = patch
            .restored()
            .with_updated_by(Some(actor_id.to_string()));
        tx.update_one(page_id, &patch)
            .await
            .map_err(|e| TreeError::from_placement(page_id, e))?;

        tracing::info!("Restored page {} (detached={}, actor {})", page_id, detach, actor_id);
        self.reader.get_page_in(tx, page_id).await
    }

    /// Restore a page and its whole captured subtree
    ///
    /// Descendants are restored regardless of when they were individually deleted.
    pub async fn restore_tree_in(
        &self,
        tx: &mut dyn PageTransaction,
        root_id: &str,
        actor_id: &str,
    ) -> TreeResult<CascadeResult> {
        let root = self.reader.get_page_in(tx, root_id).await?;
        let ids = self.captured_ids(tx, root_id).await?;

        if self.has_deleted_parent(tx, &root).await? {
            let patch = self.detach_patch(tx, &root).await?;
            tx.update_one(root_id, &patch)
                .await
                .map_err(|e| TreeError::from_placement(root_id, e))?;
        }
        tx.update_many(
            &ids,
            &PagePatch::new()
                .restored()
                .with_updated_by(Some(actor_id.to_string())),
        )
        .await?;

        tracing::info!("Restored {} page(s) under {} (actor {})", ids.len(), root_id, actor_id);
        Ok(CascadeResult::new(root_id, ids))
    }

    /// Permanently delete a single childless page
    ///
    /// # Errors
    ///
    /// - `Protected` if the title is reserved
    /// - `HasChildren` if any child (active or deleted) still references the page
    pub async fn force_delete_in(&self, tx: &mut dyn PageTransaction, page_id: &str) -> TreeResult<Page> {
        let page = self.guarded_page(tx, page_id).await?;
        if tx.has_children(page_id, true).await? {
            return Err(TreeError::has_children(page_id));
        }
        tx.delete_one(page_id).await?;
        tracing::info!("Permanently deleted page {}", page_id);
        Ok(page)
    }

    /// Permanently delete a page and every descendant, deepest pages first
    pub async fn force_delete_tree_in(
        &self,
        tx: &mut dyn PageTransaction,
        root_id: &str,
    ) -> TreeResult<CascadeResult> {
        self.guarded_page(tx, root_id).await?;
        let ids = self.captured_ids(tx, root_id).await?;
        let reversed: Vec<String> = ids.iter().rev().cloned().collect();
        tx.delete_many(&reversed).await?;
        tracing::info!("Permanently deleted {} page(s) under {}", ids.len(), root_id);
        Ok(CascadeResult::new(root_id, ids))
    }

    /// Tops of the soft-deleted subtrees of a space, newest deletion first
    pub async fn trash_in(&self, tx: &mut dyn PageTransaction, space_id: &str) -> TreeResult<Vec<Page>> {
        let deleted = tx.find_deleted(space_id, None).await?;
        let deleted_ids: HashSet<&str> = deleted.iter().map(|p| p.id.as_str()).collect();

        let mut tops: Vec<Page> = deleted
            .iter()
            .filter(|page| {
                page.parent_page_id
                    .as_deref()
                    .map_or(true, |parent| !deleted_ids.contains(parent))
            })
            .cloned()
            .collect();
        tops.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tops)
    }

    /// Permanently remove trash entries deleted before `cutoff`
    ///
    /// Only the deleted part of each entry's subtree is removed. Active pages found
    /// inside it are detached to the root level first; protected entries are skipped.
    /// Returns the removed ids.
    pub async fn purge_expired_in(
        &self,
        tx: &mut dyn PageTransaction,
        space_id: &str,
        cutoff: DateTime<Utc>,
    ) -> TreeResult<Vec<String>> {
        let expired: Vec<Page> = self
            .trash_in(tx, space_id)
            .await?
            .into_iter()
            .filter(|page| page.deleted_at.is_some_and(|at| at < cutoff))
            .collect();

        let mut removed = Vec::new();
        for entry in expired {
            if self.guard.check(&entry).is_err() {
                continue;
            }

            let subtree = self.reader.descendants_in(tx, &entry.id, true).await?;
            let mut purgeable: HashSet<String> = HashSet::new();
            let mut doomed = Vec::new();
            for page in &subtree {
                let parent_purged = page
                    .parent_page_id
                    .as_deref()
                    .is_some_and(|parent| purgeable.contains(parent));
                let reachable = page.id == entry.id || parent_purged;
                if reachable && page.is_deleted() {
                    purgeable.insert(page.id.clone());
                    doomed.push(page.id.clone());
                } else if parent_purged {
                    let patch = self.detach_patch(tx, page).await?;
                    tx.update_one(&page.id, &patch)
                        .await
                        .map_err(|e| TreeError::from_placement(&page.id, e))?;
                }
            }

            doomed.reverse();
            tx.delete_many(&doomed).await?;
            tracing::debug!("Purged {} page(s) of trash entry {}", doomed.len(), entry.id);
            removed.extend(doomed);
        }

        tracing::info!(
            "Purged {} expired page(s) from space {} (cutoff {})",
            removed.len(),
            space_id,
            cutoff
        );
        Ok(removed)
    }
}

// Comprehensive tests in separate module
#[cfg(test)]
#[path = "lifecycle_test.rs"]
mod lifecycle_test;
