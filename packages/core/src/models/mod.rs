//! Data Models
//!
//! This module contains the core data structures used throughout MenuTree:
//!
//! - `Node` - Universal node model stored for every partition
//! - `NodePatch` / `AttributeUpdate` - Store-level and caller-level partial updates
//! - `NestedNode` / `FlatNode` - Read projections produced by the tree assembler
//! - `MenuItem` - Typed view over menu attributes, built on the Node foundation
//!
//! Display and behavior data is stored in the `properties` field and is opaque to the
//! engine.

mod menu_item;
mod node;

pub use menu_item::{LinkType, MenuItem, MenuItemBuilder, MenuType, PermissionType};
pub use node::{
    validate_tree_type, AttributeUpdate, AttributeUpdateRejection, CascadePolicy, FlatNode,
    NestedNode, Node, NodeFilter, NodeListItem, NodePatch, ValidationError, STRUCTURAL_FIELDS,
};
