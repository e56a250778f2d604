//! In-Memory Page Store
//!
//! A `PageStore` backed by a `HashMap`, used by unit tests and by embedders that
//! do not need durability. It enforces the same constraints as the libsql schema
//! so behavior observed in tests carries over to `SqliteStore`:
//!
//! - `(space_id, parent_page_id, position)` is unique across all rows, deleted or not
//! - `parent_page_id` must reference an existing page
//! - a page cannot be deleted while another page references it as parent
//!
//! Transactions are serialized: `begin` takes the store lock and holds it until
//! the handle is committed, rolled back, or dropped. Writes go to a private copy
//! of the state that replaces the shared one on commit. Opening a second
//! transaction from the same task while one is live therefore waits forever.

use crate::db::error::{StoreError, StoreResult};
use crate::db::page_store::{PageStore, PageTransaction};
use crate::models::{Attachment, Page, PagePatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default, Clone)]
struct MemoryState {
    pages: HashMap<String, Page>,
    attachments: Vec<Attachment>,
}

/// Shared in-memory page store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored pages, deleted ones included
    pub async fn len(&self) -> usize {
        self.state.lock().await.pages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PageStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn PageTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard: Some(guard),
            working,
        }))
    }
}

struct MemoryTransaction {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    working: MemoryState,
}

type SiblingKey<'a> = (&'a str, Option<&'a str>, &'a str);

fn sibling_key(page: &Page) -> SiblingKey<'_> {
    (
        page.space_id.as_str(),
        page.parent_page_id.as_deref(),
        page.position.as_str(),
    )
}

/// Check the sibling uniqueness and parent reference constraints over `pages`
fn check_constraints(pages: &HashMap<String, Page>, touched: &[&str]) -> StoreResult<()> {
    let mut seen: HashSet<SiblingKey<'_>> = HashSet::with_capacity(pages.len());
    for page in pages.values() {
        if !seen.insert(sibling_key(page)) {
            return Err(StoreError::unique_violation(format!(
                "pages.space_id, pages.parent_page_id, pages.position ({}, {:?}, {})",
                page.space_id, page.parent_page_id, page.position
            )));
        }
    }

    for id in touched {
        let Some(page) = pages.get(*id) else {
            continue;
        };
        if let Some(parent_id) = &page.parent_page_id {
            if !pages.contains_key(parent_id) {
                return Err(StoreError::foreign_key_violation(format!(
                    "page {} references missing parent {}",
                    page.id, parent_id
                )));
            }
        }
    }
    Ok(())
}

impl MemoryTransaction {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.guard.is_some() {
            Ok(())
        } else {
            Err(StoreError::TransactionClosed)
        }
    }

    fn apply_patch(&mut self, ids: &[String], patch: &PagePatch) -> StoreResult<u64> {
        self.ensure_open()?;
        let now = Utc::now();
        let mut next = self.working.pages.clone();
        let mut changed = 0u64;
        let mut touched = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(page) = next.get_mut(id) {
                page.apply(patch, now);
                changed += 1;
                touched.push(id.as_str());
            }
        }
        check_constraints(&next, &touched)?;
        self.working.pages = next;
        Ok(changed)
    }

    fn remove_pages(&mut self, ids: &[String]) -> StoreResult<u64> {
        self.ensure_open()?;
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        if let Some(orphan) = self.working.pages.values().find(|page| {
            !doomed.contains(page.id.as_str())
                && page
                    .parent_page_id
                    .as_deref()
                    .is_some_and(|parent| doomed.contains(parent))
        }) {
            return Err(StoreError::foreign_key_violation(format!(
                "page {} still references {:?}",
                orphan.id, orphan.parent_page_id
            )));
        }

        let mut removed = 0u64;
        for id in ids {
            if self.working.pages.remove(id).is_some() {
                removed += 1;
            }
        }
        self.working
            .attachments
            .retain(|attachment| !doomed.contains(attachment.page_id.as_str()));
        Ok(removed)
    }

    fn sorted(mut pages: Vec<Page>) -> Vec<Page> {
        pages.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
        pages
    }
}

#[async_trait]
impl PageTransaction for MemoryTransaction {
    async fn find_by_id(&mut self, id: &str) -> StoreResult<Option<Page>> {
        self.ensure_open()?;
        Ok(self.working.pages.get(id).cloned())
    }

    async fn insert(&mut self, page: &Page) -> StoreResult<()> {
        self.ensure_open()?;
        if self.working.pages.contains_key(&page.id) {
            return Err(StoreError::duplicate_id(&page.id));
        }
        let mut next = self.working.pages.clone();
        next.insert(page.id.clone(), page.clone());
        check_constraints(&next, &[page.id.as_str()])?;
        self.working.pages = next;
        Ok(())
    }

    async fn update_one(&mut self, id: &str, patch: &PagePatch) -> StoreResult<u64> {
        self.apply_patch(&[id.to_string()], patch)
    }

    async fn update_many(&mut self, ids: &[String], patch: &PagePatch) -> StoreResult<u64> {
        self.apply_patch(ids, patch)
    }

    async fn delete_one(&mut self, id: &str) -> StoreResult<u64> {
        self.remove_pages(&[id.to_string()])
    }

    async fn delete_many(&mut self, ids: &[String]) -> StoreResult<u64> {
        self.remove_pages(ids)
    }

    async fn find_children(
        &mut self,
        space_id: &str,
        parent_id: Option<&str>,
        include_deleted: bool,
    ) -> StoreResult<Vec<Page>> {
        self.ensure_open()?;
        let children = self
            .working
            .pages
            .values()
            .filter(|page| {
                page.space_id == space_id
                    && page.parent_page_id.as_deref() == parent_id
                    && (include_deleted || !page.is_deleted())
            })
            .cloned()
            .collect();
        Ok(Self::sorted(children))
    }

    async fn last_sibling_position(
        &mut self,
        space_id: &str,
        parent_id: Option<&str>,
    ) -> StoreResult<Option<String>> {
        self.ensure_open()?;
        Ok(self
            .working
            .pages
            .values()
            .filter(|page| page.space_id == space_id && page.parent_page_id.as_deref() == parent_id)
            .map(|page| page.position.clone())
            .max())
    }

    async fn has_children(&mut self, parent_id: &str, include_deleted: bool) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self.working.pages.values().any(|page| {
            page.parent_page_id.as_deref() == Some(parent_id)
                && (include_deleted || !page.is_deleted())
        }))
    }

    async fn find_by_space(&mut self, space_id: &str) -> StoreResult<Vec<Page>> {
        self.ensure_open()?;
        let pages = self
            .working
            .pages
            .values()
            .filter(|page| page.space_id == space_id)
            .cloned()
            .collect();
        Ok(Self::sorted(pages))
    }

    async fn find_deleted(
        &mut self,
        space_id: &str,
        before: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<Page>> {
        self.ensure_open()?;
        let pages = self
            .working
            .pages
            .values()
            .filter(|page| {
                page.space_id == space_id
                    && match (page.deleted_at, before) {
                        (Some(deleted_at), Some(cutoff)) => deleted_at < cutoff,
                        (Some(_), None) => true,
                        (None, _) => false,
                    }
            })
            .cloned()
            .collect();
        Ok(Self::sorted(pages))
    }

    async fn insert_attachment(&mut self, attachment: &Attachment) -> StoreResult<()> {
        self.ensure_open()?;
        if !self.working.pages.contains_key(&attachment.page_id) {
            return Err(StoreError::foreign_key_violation(format!(
                "attachment {} references missing page {}",
                attachment.id, attachment.page_id
            )));
        }
        if self.working.attachments.iter().any(|a| a.id == attachment.id) {
            return Err(StoreError::unique_violation(format!(
                "attachments.id ({})",
                attachment.id
            )));
        }
        self.working.attachments.push(attachment.clone());
        Ok(())
    }

    async fn find_attachments(&mut self, page_ids: &[String]) -> StoreResult<Vec<Attachment>> {
        self.ensure_open()?;
        let wanted: HashSet<&str> = page_ids.iter().map(String::as_str).collect();
        Ok(self
            .working
            .attachments
            .iter()
            .filter(|attachment| wanted.contains(attachment.page_id.as_str()))
            .cloned()
            .collect())
    }

    async fn reassign_attachments(&mut self, page_ids: &[String], space_id: &str) -> StoreResult<u64> {
        self.ensure_open()?;
        let wanted: HashSet<&str> = page_ids.iter().map(String::as_str).collect();
        let mut changed = 0u64;
        for attachment in self.working.attachments.iter_mut() {
            if wanted.contains(attachment.page_id.as_str()) {
                attachment.space_id = space_id.to_string();
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let mut guard = self.guard.take().ok_or(StoreError::TransactionClosed)?;
        *guard = std::mem::take(&mut self.working);
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        self.guard.take().ok_or(StoreError::TransactionClosed)?;
        self.working = MemoryState::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPage;

    fn page(id: &str, parent: Option<&str>, position: &str) -> Page {
        let mut params = NewPage::new("space-1").with_id(id);
        if let Some(parent) = parent {
            params = params.with_parent(parent);
        }
        params.into_page(position.to_string(), Utc::now())
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert(&page("a", None, "a0")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.find_by_id("a").await.unwrap().is_some());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_and_drop_discard_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert(&page("a", None, "a0")).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(matches!(tx.commit().await, Err(StoreError::TransactionClosed)));

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert(&page("b", None, "a1")).await.unwrap();
        }
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_sibling_position_is_unique() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert(&page("a", None, "a0")).await.unwrap();
        let err = tx.insert(&page("b", None, "a0")).await.unwrap_err();
        assert!(err.is_unique_violation());

        let err = tx.insert(&page("a", None, "a5")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { ref id } if id == "a"), "got {:?}", err);

        // Same key under a different parent is fine
        tx.insert(&page("c", Some("a"), "a0")).await.unwrap();

        let err = tx
            .update_one("c", &PagePatch::new().with_parent(None))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
        // Failed statement leaves no trace
        let c = tx.find_by_id("c").await.unwrap().unwrap();
        assert_eq!(c.parent_page_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_parent_references_enforced() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx.insert(&page("orphan", Some("missing"), "a0")).await.unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation { .. }));

        tx.insert(&page("root", None, "a0")).await.unwrap();
        tx.insert(&page("child", Some("root"), "a0")).await.unwrap();
        let err = tx.delete_one("root").await.unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation { .. }));

        let removed = tx
            .delete_many(&["child".to_string(), "root".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn test_children_ordering_and_last_position() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert(&page("p", None, "a0")).await.unwrap();
        tx.insert(&page("x", Some("p"), "a2")).await.unwrap();
        tx.insert(&page("y", Some("p"), "a1")).await.unwrap();
        tx.update_one("x", &PagePatch::new().soft_deleted(Utc::now(), "user-1"))
            .await
            .unwrap();

        let active = tx.find_children("space-1", Some("p"), false).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "y");

        let all = tx.find_children("space-1", Some("p"), true).await.unwrap();
        let ids: Vec<_> = all.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["y", "x"]);

        // Deleted siblings still occupy their slot
        let last = tx.last_sibling_position("space-1", Some("p")).await.unwrap();
        assert_eq!(last.as_deref(), Some("a2"));
        assert!(tx.has_children("p", true).await.unwrap());
        assert!(tx.has_children("p", false).await.unwrap());
        assert!(!tx.has_children("y", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_attachments_follow_pages() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert(&page("a", None, "a0")).await.unwrap();
        tx.insert_attachment(&Attachment::new("a", "space-1", "notes.pdf"))
            .await
            .unwrap();

        let moved = tx
            .reassign_attachments(&["a".to_string()], "space-2")
            .await
            .unwrap();
        assert_eq!(moved, 1);
        let found = tx.find_attachments(&["a".to_string()]).await.unwrap();
        assert_eq!(found[0].space_id, "space-2");

        tx.delete_one("a").await.unwrap();
        assert!(tx.find_attachments(&["a".to_string()]).await.unwrap().is_empty());
    }
}
