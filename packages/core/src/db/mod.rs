//! Database Layer
//!
//! This module holds everything below the tree semantics:
//!
//! - `NodeStore` - async storage trait with atomic batch writes
//! - `MemoryStore` - in-process backend
//! - `TursoStore` - embedded libsql (SQLite-compatible) backend
//! - `PartitionLocks` - per-partition serialization shared by every user of a store
//! - `TreeEvent` - domain events broadcast after commits
//!
//! # Architecture
//!
//! The engine is storage agnostic: any backend that can apply a batch of row updates
//! atomically satisfies the `NodeStore` contract. Both shipped backends enforce the
//! same storage constraints (unique IDs, unique codes per partition, unique live
//! sibling orders) so contract tests run unchanged against either one.

mod error;
pub mod events;
mod memory_store;
mod node_store;
mod partition_lock;
mod turso_store;

pub use error::DatabaseError;
pub use events::TreeEvent;
pub use memory_store::MemoryStore;
pub use node_store::{NodeStore, PartitionWrite};
pub use partition_lock::{PartitionGuard, PartitionLocks};
pub use turso_store::TursoStore;
