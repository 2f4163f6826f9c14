//! Per-partition mutual exclusion for structural mutations
//!
//! Every structural operation on a `tree_type` holds that partition's guard from the
//! first read to the commit. Different partitions never contend.
//!
//! The registry is owned by the `NodeStore`, so every `TreeService` built over the same
//! store contends on the same locks. Writers in other processes are covered by the
//! partition revision check instead.

use crate::db::DatabaseError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of one async mutex per partition
#[derive(Debug, Default)]
pub struct PartitionLocks {
    // The registry map is only touched for a clone of the Arc, never across an await
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Held while a structural mutation runs; dropping it releases the partition
#[derive(Debug)]
pub struct PartitionGuard {
    tree_type: String,
    _guard: OwnedMutexGuard<()>,
}

impl PartitionGuard {
    pub fn tree_type(&self) -> &str {
        &self.tree_type
    }
}

impl PartitionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, tree_type: &str) -> Arc<Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            // A panic while cloning an Arc cannot leave the map inconsistent
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(tree_type.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the partition guard, giving up after `timeout`
    ///
    /// # Errors
    ///
    /// `DatabaseError::LockTimeout` when the deadline passes first.
    pub async fn acquire(
        &self,
        tree_type: &str,
        timeout: Duration,
    ) -> Result<PartitionGuard, DatabaseError> {
        let lock = self.lock_for(tree_type);
        let started = Instant::now();

        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => {
                tracing::debug!(
                    tree_type,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "partition lock acquired"
                );
                Ok(PartitionGuard {
                    tree_type: tree_type.to_string(),
                    _guard: guard,
                })
            }
            Err(_) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                tracing::warn!(tree_type, waited_ms, "partition lock timed out");
                Err(DatabaseError::lock_timeout(tree_type, waited_ms))
            }
        }
    }

    /// Whether the partition is currently locked
    pub fn is_locked(&self, tree_type: &str) -> bool {
        self.lock_for(tree_type).try_lock().is_err()
    }
}
