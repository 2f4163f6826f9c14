//! NodeStore Trait - Storage Abstraction Layer
//!
//! This module defines the `NodeStore` trait that abstracts durable node storage.
//! The store is keyed by node ID and knows nothing about trees beyond one storage-level
//! constraint: live siblings never share a `sort_order`.
//!
//! # Architecture
//!
//! - **Abstraction Point**: Between `TreeService` (tree semantics) and a storage backend
//! - **Multiple Backends**: `MemoryStore` (in-process) and `TursoStore` (embedded libsql)
//! - **Atomic Batches**: `bulk_update` and `bulk_delete` are all-or-nothing, which is what
//!   lets every structural mutation commit as one unit
//! - **Partition Revisions**: every structural write bumps a per-partition counter;
//!   `commit_partition` refuses to write if the counter moved since the caller read it
//! - **Shared Locks**: the store owns the `PartitionLocks` registry, so every service over
//!   one store serializes on the same partitions
//!
//! # Design Decisions
//!
//! 1. **Async-First**: All methods are async so a network backend fits the same seam
//! 2. **Ownership Semantics**: Methods take ownership of values to avoid unnecessary cloning
//! 3. **Typed Errors**: Methods return `DatabaseError` so the service layer can map
//!    missing rows and duplicate codes onto caller-facing errors
//!
//! # Examples
//!
//! ```rust,no_run
//! use menutree_core::db::{MemoryStore, NodeStore};
//! use menutree_core::models::Node;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store: Arc<dyn NodeStore> = Arc::new(MemoryStore::new());
//!
//!     let node = Node::new(
//!         "site".to_string(),
//!         None,
//!         "Home".to_string(),
//!         "home".to_string(),
//!         json!({}),
//!     );
//!     let created = store.insert_node(node).await?;
//!     let fetched = store.get_node(&created.id).await?;
//!     assert_eq!(fetched.code, "home");
//!
//!     Ok(())
//! }
//! ```

use crate::db::{DatabaseError, PartitionLocks};
use crate::models::{Node, NodePatch};
use async_trait::async_trait;

/// One structural write against a single partition, see [`NodeStore::commit_partition`]
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionWrite {
    /// Insert one fully formed node
    Insert(Node),
    /// Apply patches atomically, as `bulk_update`
    Update(Vec<(String, NodePatch)>),
    /// Remove rows atomically, as `bulk_delete`
    Purge(Vec<String>),
}

/// Abstraction layer for node persistence operations
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so one store can be shared across tasks.
///
/// # Consistency
///
/// Readers always observe a committed state: a concurrent `bulk_update` is either
/// entirely visible or not visible at all.
///
/// # Revisions
///
/// Inserts, deletes and patches for which [`NodePatch::is_structural`] holds bump the
/// revision of every partition they touch, in the same atomic write. Attribute-only
/// patches leave it alone.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Partition lock registry shared by every user of this store
    fn partition_locks(&self) -> &PartitionLocks;

    /// Current structural revision of a partition; 0 if it was never written
    async fn partition_revision(&self, tree_type: &str) -> Result<i64, DatabaseError>;

    /// Apply `write` only if `tree_type` is still at `expected_revision`
    ///
    /// The revision check and the write happen in one atomic step, so a writer that
    /// read stale state (for example another process on the same database file)
    /// cannot commit over a newer structure.
    ///
    /// # Returns
    ///
    /// The partition revision after the write.
    ///
    /// # Errors
    ///
    /// - `StaleRevision` (nothing written) if the revision moved
    /// - everything `insert_node`, `bulk_update` or `bulk_delete` return
    async fn commit_partition(
        &self,
        tree_type: &str,
        expected_revision: i64,
        write: PartitionWrite,
    ) -> Result<i64, DatabaseError>;

    /// Get node by ID
    ///
    /// Soft-deleted nodes are returned; callers decide whether they count.
    ///
    /// # Errors
    ///
    /// `DatabaseError::NotFound` if no row has this ID.
    async fn get_node(&self, id: &str) -> Result<Node, DatabaseError>;

    /// All nodes of a partition, ordered by parent then sort order
    ///
    /// # Arguments
    ///
    /// * `tree_type` - Partition key
    /// * `include_deleted` - Whether soft-deleted rows are returned
    async fn list_by_tree_type(
        &self,
        tree_type: &str,
        include_deleted: bool,
    ) -> Result<Vec<Node>, DatabaseError>;

    /// Insert a fully formed node
    ///
    /// The node is stored as given; structural fields must already be computed.
    ///
    /// # Errors
    ///
    /// - `DuplicateId` if the ID exists
    /// - `DuplicateCode` if the code exists in the same partition
    /// - `ConstraintViolation` if a live sibling already holds the sort order
    async fn insert_node(&self, node: Node) -> Result<Node, DatabaseError>;

    /// Apply a partial update to one node and return the stored result
    ///
    /// # Errors
    ///
    /// `NotFound` if absent, `ConstraintViolation` on a sibling-order collision.
    async fn update_fields(&self, id: &str, patch: NodePatch) -> Result<Node, DatabaseError>;

    /// Apply many partial updates atomically
    ///
    /// Patches for the same ID are applied in sequence. Uniqueness of live sibling
    /// orders is checked against the final state only, so a batch may freely swap
    /// positions between rows.
    ///
    /// # Returns
    ///
    /// The updated nodes, one per distinct ID, in first-seen order.
    ///
    /// # Errors
    ///
    /// Nothing is written if any ID is missing (`NotFound`) or the final state has
    /// two live siblings with the same order (`ConstraintViolation`).
    async fn bulk_update(
        &self,
        updates: Vec<(String, NodePatch)>,
    ) -> Result<Vec<Node>, DatabaseError>;

    /// Delete one node
    ///
    /// `hard = false` sets `is_deleted`; `hard = true` removes the row.
    async fn delete_node(&self, id: &str, hard: bool) -> Result<(), DatabaseError>;

    /// Remove many rows atomically
    ///
    /// # Returns
    ///
    /// Number of rows removed.
    ///
    /// # Errors
    ///
    /// `NotFound` (and nothing removed) if any ID is missing.
    async fn bulk_delete(&self, ids: Vec<String>) -> Result<usize, DatabaseError>;
}

/// Find two live nodes sharing `(tree_type, parent_id, sort_order)`
///
/// Returns a description of the first collision, if any.
pub(crate) fn find_sibling_order_conflict<'a>(
    nodes: impl IntoIterator<Item = &'a Node>,
) -> Option<String> {
    let mut seen: std::collections::HashMap<(&str, Option<&str>, i64), &str> =
        std::collections::HashMap::new();

    for node in nodes.into_iter().filter(|n| !n.is_deleted) {
        let key = (
            node.tree_type.as_str(),
            node.parent_id.as_deref(),
            node.sort_order,
        );
        if let Some(other) = seen.insert(key, node.id.as_str()) {
            return Some(format!(
                "nodes {} and {} share sort order {} under parent {:?} in '{}'",
                other, node.id, node.sort_order, node.parent_id, node.tree_type
            ));
        }
    }

    None
}
