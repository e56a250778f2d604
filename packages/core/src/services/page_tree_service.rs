//! PageTreeService - transactional call surface of the hierarchy engine
//!
//! Each call opens one store transaction, runs the matching component operation
//! inside it, and commits on success or rolls back on any error. Placements whose
//! position the engine generates itself (create, restores, cross-space moves)
//! are retried on a sibling position conflict. Domain events go out only after
//! the commit.
//!
//! Callers that need several operations in one transaction can open it with
//! `store().begin()` and call the `*_in` methods of [`TreeReader`],
//! [`TreeMutator`] and [`LifecycleManager`] directly.

use crate::config::TreeConfig;
use crate::db::events::TreeEvent;
use crate::db::fractional_ordering::PositionKeyAllocator;
use crate::db::{PageStore, PageTransaction};
use crate::models::{CascadeResult, NewPage, Page, PageSummary};
use crate::operations::PlacementRetry;
use crate::services::attachments::{AttachmentReassigner, StoreAttachmentReassigner};
use crate::services::error::{TreeError, TreeResult};
use crate::services::lifecycle::LifecycleManager;
use crate::services::protected::ProtectedTitleGuard;
use crate::services::tree_mutator::TreeMutator;
use crate::services::tree_reader::TreeReader;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Hierarchy engine facade shared by every request handler
///
/// Cheap to clone; clones share the store and the event channel.
#[derive(Clone)]
pub struct PageTreeService {
    store: Arc<dyn PageStore>,
    config: Arc<TreeConfig>,
    reader: TreeReader,
    mutator: Arc<TreeMutator>,
    lifecycle: Arc<LifecycleManager>,
    retry: PlacementRetry,

    /// Broadcast channel for committed hierarchy changes
    event_tx: broadcast::Sender<TreeEvent>,
}

impl PageTreeService {
    /// Create a service whose attachments live in the same store as the pages
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use pagespace_core::config::TreeConfig;
    /// # use pagespace_core::db::SqliteStore;
    /// # use pagespace_core::services::PageTreeService;
    /// # use std::sync::Arc;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let store = Arc::new(SqliteStore::new("./data/pages.db".into()).await?);
    /// let service = PageTreeService::new(store, TreeConfig::default())?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(store: Arc<dyn PageStore>, config: TreeConfig) -> TreeResult<Self> {
        Self::with_attachment_reassigner(store, config, Arc::new(StoreAttachmentReassigner))
    }

    /// Create a service that notifies a custom attachment collaborator on space moves
    pub fn with_attachment_reassigner(
        store: Arc<dyn PageStore>,
        config: TreeConfig,
        attachments: Arc<dyn AttachmentReassigner>,
    ) -> TreeResult<Self> {
        config.validate().map_err(TreeError::InvalidConfig)?;

        let allocator = PositionKeyAllocator::new(config.jitter_rounds);
        let reader = TreeReader::new(config.max_tree_depth);
        let guard = ProtectedTitleGuard::new(config.protected_title_prefixes.as_slice())?;
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);

        Ok(Self {
            store,
            mutator: Arc::new(TreeMutator::new(allocator.clone(), reader.clone(), attachments)),
            lifecycle: Arc::new(LifecycleManager::new(allocator, reader.clone(), guard)),
            reader,
            retry: PlacementRetry::from_config(&config),
            config: Arc::new(config),
            event_tx,
        })
    }

    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.store
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn reader(&self) -> &TreeReader {
        &self.reader
    }

    pub fn mutator(&self) -> &TreeMutator {
        &self.mutator
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Subscribe to committed hierarchy changes
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use pagespace_core::config::TreeConfig;
    /// # use pagespace_core::db::MemoryStore;
    /// # use pagespace_core::services::PageTreeService;
    /// # use std::sync::Arc;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let service = PageTreeService::new(Arc::new(MemoryStore::new()), TreeConfig::default())?;
    /// let mut rx = service.subscribe_to_events();
    /// tokio::spawn(async move {
    ///     while let Ok(event) = rx.recv().await {
    ///         println!("Event: {}", event.event_type());
    ///     }
    /// });
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe_to_events(&self) -> broadcast::Receiver<TreeEvent> {
        self.event_tx.subscribe()
    }

    /// Committed hierarchy changes as a `Stream`
    ///
    /// Lagging consumers see a `Lagged` error item instead of the missed events.
    pub fn event_stream(&self) -> BroadcastStream<TreeEvent> {
        BroadcastStream::new(self.event_tx.subscribe())
    }

    /// Ignores send errors: having no subscribers is normal
    fn emit_event(&self, event: TreeEvent) {
        tracing::debug!("Emitting {} for {} page(s)", event.event_type(), event.page_ids().len());
        let _ = self.event_tx.send(event);
    }

    /// Commit on success, roll back on error
    async fn finish<T>(
        &self,
        operation: &str,
        mut tx: Box<dyn PageTransaction>,
        result: TreeResult<T>,
    ) -> TreeResult<T> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!("Rollback of {} failed: {}", operation, rollback_err);
                }
                tracing::debug!("{} rolled back: {}", operation, e);
                Err(e)
            }
        }
    }

    //
    // STRUCTURAL WRITES
    //

    /// Create a page at the end of its parent's children (or of the root level)
    pub async fn create(&self, params: NewPage) -> TreeResult<Page> {
        let label = params
            .parent_page_id
            .clone()
            .unwrap_or_else(|| params.space_id.clone());

        let page = self
            .retry
            .run("create", &label, || {
                let params = params.clone();
                async move {
                    let mut tx = self.store.begin().await?;
                    let result = self.mutator.create_in(tx.as_mut(), params).await;
                    self.finish("create", tx, result).await
                }
            })
            .await?;

        self.emit_event(TreeEvent::PageCreated { page: page.clone() });
        Ok(page)
    }

    /// Reorder and/or reparent a page at a caller-supplied position
    ///
    /// Not retried: a `PositionConflict` means the caller's key is taken and the
    /// caller must pick another.
    pub async fn move_page(
        &self,
        page_id: &str,
        position: &str,
        parent_id: Option<&str>,
    ) -> TreeResult<Page> {
        let mut tx = self.store.begin().await?;
        let result = self
            .mutator
            .move_page_in(tx.as_mut(), page_id, position, parent_id)
            .await;
        let page = self.finish("move_page", tx, result).await?;

        self.emit_event(TreeEvent::PageMoved {
            id: page.id.clone(),
            parent_page_id: page.parent_page_id.clone(),
            position: page.position.clone(),
        });
        Ok(page)
    }

    /// Move a subtree to another space as one atomic unit
    pub async fn move_to_space(&self, root_id: &str, target_space_id: &str) -> TreeResult<CascadeResult> {
        let result = self
            .retry
            .run("move_to_space", root_id, || async move {
                let mut tx = self.store.begin().await?;
                let result = self
                    .mutator
                    .move_to_space_in(tx.as_mut(), root_id, target_space_id)
                    .await;
                self.finish("move_to_space", tx, result).await
            })
            .await?;

        self.emit_event(TreeEvent::PagesMovedToSpace {
            ids: result.affected_ids.clone(),
            space_id: target_space_id.to_string(),
        });
        Ok(result)
    }

    //
    // LIFECYCLE
    //

    pub async fn soft_delete(&self, page_id: &str, actor_id: &str) -> TreeResult<Page> {
        let mut tx = self.store.begin().await?;
        let result = self.lifecycle.soft_delete_in(tx.as_mut(), page_id, actor_id).await;
        let page = self.finish("soft_delete", tx, result).await?;

        self.emit_event(TreeEvent::PagesSoftDeleted {
            ids: vec![page.id.clone()],
        });
        Ok(page)
    }

    pub async fn soft_delete_tree(&self, root_id: &str, actor_id: &str) -> TreeResult<CascadeResult> {
        let mut tx = self.store.begin().await?;
        let result = self
            .lifecycle
            .soft_delete_tree_in(tx.as_mut(), root_id, actor_id)
            .await;
        let cascade = self.finish("soft_delete_tree", tx, result).await?;

        self.emit_event(TreeEvent::PagesSoftDeleted {
            ids: cascade.affected_ids.clone(),
        });
        Ok(cascade)
    }

    pub async fn restore_single(&self, page_id: &str, actor_id: &str) -> TreeResult<Page> {
        let page = self
            .retry
            .run("restore_single", page_id, || async move {
                let mut tx = self.store.begin().await?;
                let result = self.lifecycle.restore_single_in(tx.as_mut(), page_id, actor_id).await;
                self.finish("restore_single", tx, result).await
            })
            .await?;

        self.emit_event(TreeEvent::PagesRestored {
            ids: vec![page.id.clone()],
        });
        Ok(page)
    }

    pub async fn restore_tree(&self, root_id: &str, actor_id: &str) -> TreeResult<CascadeResult> {
        let cascade = self
            .retry
            .run("restore_tree", root_id, || async move {
                let mut tx = self.store.begin().await?;
                let result = self.lifecycle.restore_tree_in(tx.as_mut(), root_id, actor_id).await;
                self.finish("restore_tree", tx, result).await
            })
            .await?;

        self.emit_event(TreeEvent::PagesRestored {
            ids: cascade.affected_ids.clone(),
        });
        Ok(cascade)
    }

    pub async fn force_delete(&self, page_id: &str) -> TreeResult<Page> {
        let mut tx = self.store.begin().await?;
        let result = self.lifecycle.force_delete_in(tx.as_mut(), page_id).await;
        let page = self.finish("force_delete", tx, result).await?;

        self.emit_event(TreeEvent::PagesPurged {
            ids: vec![page.id.clone()],
        });
        Ok(page)
    }

    pub async fn force_delete_tree(&self, root_id: &str) -> TreeResult<CascadeResult> {
        let mut tx = self.store.begin().await?;
        let result = self.lifecycle.force_delete_tree_in(tx.as_mut(), root_id).await;
        let cascade = self.finish("force_delete_tree", tx, result).await?;

        self.emit_event(TreeEvent::PagesPurged {
            ids: cascade.affected_ids.clone(),
        });
        Ok(cascade)
    }

    /// Tops of the soft-deleted subtrees of a space, newest deletion first
    pub async fn trash(&self, space_id: &str) -> TreeResult<Vec<Page>> {
        let mut tx = self.store.begin().await?;
        let result = self.lifecycle.trash_in(tx.as_mut(), space_id).await;
        self.finish("trash", tx, result).await
    }

    /// Permanently remove trash entries deleted before `cutoff`
    pub async fn purge_expired(&self, space_id: &str, cutoff: DateTime<Utc>) -> TreeResult<Vec<String>> {
        let mut tx = self.store.begin().await?;
        let result = self.lifecycle.purge_expired_in(tx.as_mut(), space_id, cutoff).await;
        let removed = self.finish("purge_expired", tx, result).await?;

        if !removed.is_empty() {
            self.emit_event(TreeEvent::PagesPurged {
                ids: removed.clone(),
            });
        }
        Ok(removed)
    }

    /// Purge trash entries older than the configured retention period
    pub async fn purge_expired_trash(&self, space_id: &str) -> TreeResult<Vec<String>> {
        let cutoff = Utc::now() - self.config.trash_retention();
        self.purge_expired(space_id, cutoff).await
    }

    //
    // READS
    //

    pub async fn get_page(&self, page_id: &str) -> TreeResult<Page> {
        let mut tx = self.store.begin().await?;
        let result = self.reader.get_page_in(tx.as_mut(), page_id).await;
        self.finish("get_page", tx, result).await
    }

    pub async fn children(
        &self,
        space_id: &str,
        parent_id: Option<&str>,
        include_deleted: bool,
    ) -> TreeResult<Vec<PageSummary>> {
        let mut tx = self.store.begin().await?;
        let result = self
            .reader
            .children_in(tx.as_mut(), space_id, parent_id, include_deleted)
            .await;
        self.finish("children", tx, result).await
    }

    pub async fn descendants(&self, root_id: &str, include_deleted: bool) -> TreeResult<Vec<Page>> {
        let mut tx = self.store.begin().await?;
        let result = self
            .reader
            .descendants_in(tx.as_mut(), root_id, include_deleted)
            .await;
        self.finish("descendants", tx, result).await
    }

    /// Breadcrumb chain from the root down to `page_id` (inclusive)
    pub async fn ancestors(&self, page_id: &str) -> TreeResult<Vec<PageSummary>> {
        let mut tx = self.store.begin().await?;
        let result = self.reader.ancestors_in(tx.as_mut(), page_id).await;
        self.finish("ancestors", tx, result).await
    }

    pub async fn has_children(&self, page_id: &str) -> TreeResult<bool> {
        let mut tx = self.store.begin().await?;
        let result = self.reader.has_children_in(tx.as_mut(), page_id).await;
        self.finish("has_children", tx, result).await
    }
}

// Comprehensive tests in separate module
#[cfg(test)]
#[path = "page_tree_service_test.rs"]
mod page_tree_service_test;
