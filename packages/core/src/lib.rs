//! MenuTree Core Tree Management Layer
//!
//! This crate stores, validates and structurally mutates ordered trees of named nodes,
//! partitioned by tree type (one tree per menu: site, user, admin, header and footer
//! utility menus, quick menu).
//!
//! # Architecture
//!
//! - **Adjacency list + materialized path**: every node stores `parent_id`, `sort_order`,
//!   `depth` and `path`; the engine keeps all four consistent
//! - **Validate then commit**: each mutation builds the candidate post-state, runs the
//!   invariant checker on it, and writes every touched row in one atomic batch
//! - **Per-partition locking**: structural edits to one tree type are serialized;
//!   different tree types never contend
//! - **Storage agnostic**: `MemoryStore` and the libsql-backed `TursoStore` satisfy the
//!   same `NodeStore` contract
//!
//! # Modules
//!
//! - [`models`] - Data structures (Node, NodePatch, MenuItem, etc.)
//! - [`services`] - Mutation engine, invariant checker, tree assembler
//! - [`db`] - Storage layer and domain events
//! - [`operations`] - Creation parameters and the retrying operation queue
//! - [`config`] - Engine configuration
//! - [`seed`] - Idempotent partition seeding from JSON

pub mod config;
pub mod db;
pub mod models;
pub mod operations;
pub mod seed;
pub mod services;

// Re-export commonly used types
pub use config::EngineConfig;
pub use db::{DatabaseError, MemoryStore, NodeStore, TreeEvent, TursoStore};
pub use models::*;
pub use operations::{CreateNodeParams, StructuralOperationQueue};
pub use services::{InvariantViolation, TreeService, TreeServiceError};
