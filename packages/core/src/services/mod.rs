//! Business Services
//!
//! This module contains the tree semantics:
//!
//! - `TreeService` - mutation engine and read views for one or more partitions
//! - `invariants` - pure structural checks shared by the engine and audits
//! - `tree_assembler` - nested and flat projections of a partition
//!
//! Services coordinate between the storage layer and callers, validating every
//! structural change before anything is written.

pub mod error;
pub mod invariants;
pub mod tree_assembler;
pub mod tree_service;

pub use error::TreeServiceError;
pub use invariants::{check_partition, InvariantViolation, PartitionIndex};
pub use tree_assembler::{to_flat_with_depth, to_nested};
pub use tree_service::TreeService;
