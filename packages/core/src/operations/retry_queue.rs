//! Structural operation queue with retry on partition lock timeouts
//!
//! Structural mutations serialize per partition, so a burst of edits to the same menu
//! can make some callers miss the lock deadline. A writer in another process can also
//! move the partition between our read and our commit (`StaleState`). This wrapper
//! retries both with exponential backoff; each retry re-reads the partition. Every
//! other error is deterministic and returned immediately.
//!
//! # Example
//!
//! ```no_run
//! use menutree_core::config::EngineConfig;
//! use menutree_core::db::MemoryStore;
//! use menutree_core::operations::StructuralOperationQueue;
//! use menutree_core::services::TreeService;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = TreeService::new(Arc::new(MemoryStore::new()));
//! let queue = StructuralOperationQueue::new(service, &EngineConfig::default());
//!
//! // Up to 3 retries with backoff (10ms, 20ms, 40ms)
//! queue.move_with_retry("node-123", Some("node-456"), 0).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::EngineConfig;
use crate::db::NodeStore;
use crate::models::{CascadePolicy, Node};
use crate::operations::CreateNodeParams;
use crate::services::{TreeService, TreeServiceError};
use std::future::Future;
use tokio::time::Duration;

/// Retrying front for the structural operations of a `TreeService`
pub struct StructuralOperationQueue<S: NodeStore + ?Sized = dyn NodeStore> {
    service: TreeService<S>,

    /// Retries after the first attempt (0 = single attempt)
    max_retries: u32,

    /// Attempt `n` sleeps `base_delay * 2^n` before retrying
    base_delay: Duration,
}

impl<S: NodeStore + ?Sized> StructuralOperationQueue<S> {
    /// Create a queue using the retry policy from `config`
    pub fn new(service: TreeService<S>, config: &EngineConfig) -> Self {
        Self::with_policy(service, config.max_retries, config.retry_base_delay())
    }

    pub fn with_policy(service: TreeService<S>, max_retries: u32, base_delay: Duration) -> Self {
        Self {
            service,
            // Keeps 1 << attempt inside u32
            max_retries: max_retries.min(16),
            base_delay,
        }
    }

    pub fn service(&self) -> &TreeService<S> {
        &self.service
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent
    ///
    /// # Arguments
    ///
    /// * `label` - Operation name for log output
    /// * `operation` - Produces a fresh attempt each time it is called
    ///
    /// # Returns
    ///
    /// - `Ok(T)` - Operation succeeded (possibly after retries)
    /// - `Err(TreeServiceError::LockTimeout | StaleState)` - Max retries exceeded
    /// - `Err(TreeServiceError::*)` - Non-retryable error occurred
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, TreeServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TreeServiceError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(
                            "{} succeeded after {} retry(ies)",
                            label,
                            attempt
                        );
                    }
                    return Ok(value);
                }

                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    tracing::debug!(
                        "{} attempt {}/{} failed: {}. Retrying...",
                        label,
                        attempt + 1,
                        self.max_retries + 1,
                        e
                    );

                    tokio::time::sleep(self.base_delay * (1u32 << attempt)).await;
                    attempt += 1;
                }

                Err(e) => {
                    if e.is_retryable() {
                        tracing::warn!(
                            "Max retries ({}) exceeded for {}",
                            self.max_retries,
                            label
                        );
                    }
                    return Err(e);
                }
            }
        }
    }

    pub async fn create_with_retry(&self, params: CreateNodeParams) -> Result<Node, TreeServiceError> {
        self.run("create_node", || self.service.create_node(params.clone()))
            .await
    }

    pub async fn move_with_retry(
        &self,
        id: &str,
        new_parent_id: Option<&str>,
        target_index: usize,
    ) -> Result<(), TreeServiceError> {
        self.run("move_node", || {
            self.service.move_node(id, new_parent_id, target_index)
        })
        .await
    }

    pub async fn reorder_with_retry(
        &self,
        tree_type: &str,
        parent_id: Option<&str>,
        ordered_ids: &[String],
    ) -> Result<(), TreeServiceError> {
        self.run("reorder_siblings", || {
            self.service.reorder_siblings(tree_type, parent_id, ordered_ids)
        })
        .await
    }

    pub async fn delete_with_retry(
        &self,
        id: &str,
        policy: CascadePolicy,
    ) -> Result<(), TreeServiceError> {
        self.run("delete_node", || self.service.delete_node(id, policy))
            .await
    }

    pub async fn purge_with_retry(&self, id: &str) -> Result<usize, TreeServiceError> {
        self.run("purge_node", || self.service.purge_node(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Queue whose service gives up on the lock after 20ms
    fn setup_queue(max_retries: u32) -> StructuralOperationQueue<MemoryStore> {
        let service = TreeService::new(Arc::new(MemoryStore::new()))
            .with_lock_timeout(Duration::from_millis(20));
        StructuralOperationQueue::with_policy(service, max_retries, Duration::from_millis(10))
    }

    fn params(code: &str) -> CreateNodeParams {
        CreateNodeParams::new("site", None, code, code).with_id(code)
    }

    #[tokio::test]
    async fn test_create_with_retry_success_on_first_attempt() {
        let queue = setup_queue(3);

        let start = std::time::Instant::now();
        let node = queue.create_with_retry(params("home")).await.unwrap();

        assert_eq!(node.sort_order, 0);
        assert!(
            start.elapsed() < Duration::from_millis(500),
            "Operation without contention should be fast"
        );
    }

    #[tokio::test]
    async fn test_retries_until_lock_is_released() {
        let queue = setup_queue(5);
        queue.create_with_retry(params("a")).await.unwrap();
        queue.create_with_retry(params("b")).await.unwrap();

        let guard = queue.service().lock_partition("site").await.unwrap();
        let holder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        queue.move_with_retry("b", None, 0).await.unwrap();
        holder.await.unwrap();

        let roots: Vec<String> = queue
            .service()
            .get_flat_list("site", false)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.node.id)
            .collect();
        assert_eq!(roots, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_max_retries_exceeded() {
        let queue = setup_queue(1);
        queue.create_with_retry(params("a")).await.unwrap();

        let _guard = queue.service().lock_partition("site").await.unwrap();
        let result = queue.delete_with_retry("a", CascadePolicy::RejectIfChildren).await;

        assert!(matches!(result, Err(TreeServiceError::LockTimeout { .. })));
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let queue = setup_queue(5);
        let attempts = AtomicUsize::new(0);

        let result: Result<(), TreeServiceError> = queue
            .run("lookup", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(TreeServiceError::not_found("missing")) }
            })
            .await;

        assert!(matches!(result, Err(TreeServiceError::NotFound { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_each_attempt_is_counted() {
        let queue = setup_queue(3);
        let attempts = AtomicUsize::new(0);

        let result: Result<(), TreeServiceError> = queue
            .run("always_busy", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(TreeServiceError::lock_timeout("site", 20)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }
}
