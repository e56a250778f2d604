//! Attachment re-parenting collaborator
//!
//! Files attached to pages are keyed by page id and carry the space they belong
//! to. When a subtree moves to another space, their space reference has to move
//! with it, inside the same transaction as the page rows.

use crate::db::{PageTransaction, StoreResult};
use async_trait::async_trait;

/// Receives the ids of pages that changed space
#[async_trait]
pub trait AttachmentReassigner: Send + Sync {
    /// Point every attachment keyed by `page_ids` at `target_space_id`
    ///
    /// Called once per `move_to_space`, with the moved root first.
    async fn reassign_container(
        &self,
        tx: &mut dyn PageTransaction,
        page_ids: &[String],
        target_space_id: &str,
    ) -> StoreResult<u64>;
}

/// Default reassigner: updates the attachment rows in the page store itself
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreAttachmentReassigner;

#[async_trait]
impl AttachmentReassigner for StoreAttachmentReassigner {
    async fn reassign_container(
        &self,
        tx: &mut dyn PageTransaction,
        page_ids: &[String],
        target_space_id: &str,
    ) -> StoreResult<u64> {
        let changed = tx.reassign_attachments(page_ids, target_space_id).await?;
        tracing::debug!(
            "Reassigned {} attachment(s) of {} page(s) to space {}",
            changed,
            page_ids.len(),
            target_space_id
        );
        Ok(changed)
    }
}
