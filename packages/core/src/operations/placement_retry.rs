//! Placement retry with exponential backoff
//!
//! Position keys are jittered, so two writers appending under the same parent
//! almost always pick different keys. When they do not, the store's unique sibling
//! index rejects the second insert with a conflict. Operations that generated
//! their own position can simply run again: each attempt opens a fresh
//! transaction, re-reads the last sibling and draws a new key.
//!
//! # Example
//!
//! ```rust
//! use pagespace_core::operations::PlacementRetry;
//! use pagespace_core::services::TreeResult;
//!
//! # async fn example() -> TreeResult<()> {
//! // Retry up to 3 times with exponential backoff (10ms, 20ms, 40ms)
//! let retry = PlacementRetry::new(3, 10);
//! let key = retry.run("create", "page-1", || async { Ok("a0".to_string()) }).await?;
//! assert_eq!(key, "a0");
//! # Ok(())
//! # }
//! ```

use crate::config::TreeConfig;
use crate::services::error::{TreeError, TreeResult};
use std::future::Future;
use tokio::time::Duration;

/// Retry policy for engine-generated placements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementRetry {
    max_retries: usize,
    base_delay_ms: u64,
}

impl PlacementRetry {
    /// `max_retries` = 0 means a single attempt
    pub fn new(max_retries: usize, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
        }
    }

    pub fn from_config(config: &TreeConfig) -> Self {
        Self::new(config.max_placement_retries, config.retry_base_delay_ms)
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1u64 << attempt.min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Run `attempt_fn` until it succeeds, fails with a non-conflict error, or
    /// the retry budget is spent
    ///
    /// # Retry Behavior
    ///
    /// - **Retry on**: `TreeError::PositionConflict` only
    /// - **Backoff**: Exponential (base, 2x base, 4x base, ...)
    /// - **Other errors**: Returned immediately
    pub async fn run<T, F, Fut>(&self, operation: &str, page_id: &str, mut attempt_fn: F) -> TreeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TreeResult<T>>,
    {
        let mut attempt = 0;

        loop {
            match attempt_fn().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(
                            "{} succeeded after {} retry(ies) for page '{}'",
                            operation,
                            attempt,
                            page_id
                        );
                    }
                    return Ok(value);
                }

                Err(TreeError::PositionConflict { ref context, .. }) if attempt < self.max_retries => {
                    tracing::debug!(
                        "Position conflict on attempt {}/{} of {} for page '{}': {}. Retrying...",
                        attempt + 1,
                        self.max_retries + 1,
                        operation,
                        page_id,
                        context
                    );

                    tokio::time::sleep(self.backoff(attempt)).await;
                    attempt += 1;
                }

                Err(e) => {
                    if e.is_conflict() {
                        tracing::warn!(
                            "Max retries ({}) exceeded for {} of page '{}'",
                            self.max_retries,
                            operation,
                            page_id
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for PlacementRetry {
    fn default() -> Self {
        Self::from_config(&TreeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn conflict() -> TreeError {
        TreeError::position_conflict("page-1", "pages.position")
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = AtomicUsize::new(0);
        let retry = PlacementRetry::new(3, 1);
        let result = retry
            .run("create", "page-1", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, TreeError>(7) }
            })
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_conflicts_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let retry = PlacementRetry::new(3, 1);
        let result = retry
            .run("create", "page-1", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(conflict())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let calls = AtomicUsize::new(0);
        let retry = PlacementRetry::new(2, 1);
        let err = retry
            .run("restore", "page-1", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(conflict()) }
            })
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let retry = PlacementRetry::new(5, 1);
        let err = retry
            .run("create", "page-1", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TreeError::parent_not_found("missing")) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TreeError::ParentNotFound { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let retry = PlacementRetry::new(3, 10);
        assert_eq!(retry.backoff(0), Duration::from_millis(10));
        assert_eq!(retry.backoff(1), Duration::from_millis(20));
        assert_eq!(retry.backoff(2), Duration::from_millis(40));
    }
}
