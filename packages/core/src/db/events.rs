//! Domain Events for the Tree Engine
//!
//! This module defines the domain events emitted by `TreeService` after a mutation
//! commits. Events follow the observer pattern, allowing other parts of the system
//! (menu caches, admin UIs, audit logs) to react to changes without coupling to the
//! storage backend.
//!
//! # Architecture
//!
//! Events are emitted using tokio's broadcast channel, allowing multiple subscribers
//! to receive notifications asynchronously.
//!
//! # Event Flow
//!
//! 1. `TreeService` validates and commits a mutation through the `NodeStore`
//! 2. The matching `TreeEvent` is sent on the broadcast channel
//! 3. All subscribers receive the event asynchronously
//!
//! No event is ever sent for a rejected or rolled-back mutation.

use crate::models::Node;
use serde::{Deserialize, Serialize};

/// Domain events emitted after a successful commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TreeEvent {
    /// A new node was created
    #[serde(rename = "node:created")]
    NodeCreated { node: Node },

    /// Attributes of an existing node changed
    #[serde(rename = "node:updated")]
    NodeUpdated { node: Node },

    /// Nodes were soft-deleted (the target first, then its descendants)
    #[serde(rename = "nodes:deleted", rename_all = "camelCase")]
    NodesDeleted { tree_type: String, ids: Vec<String> },

    /// Parent, depth or path changed for these nodes
    #[serde(rename = "hierarchy:changed", rename_all = "camelCase")]
    HierarchyChanged {
        tree_type: String,
        moved_ids: Vec<String>,
    },

    /// One sibling group received a new order
    #[serde(rename = "siblings:reordered", rename_all = "camelCase")]
    SiblingsReordered {
        tree_type: String,
        parent_id: Option<String>,
        ordered_ids: Vec<String>,
    },

    /// Soft-deleted nodes were removed for good
    #[serde(rename = "nodes:purged", rename_all = "camelCase")]
    NodesPurged { tree_type: String, ids: Vec<String> },
}

impl TreeEvent {
    /// Get a string representation of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            TreeEvent::NodeCreated { .. } => "node:created",
            TreeEvent::NodeUpdated { .. } => "node:updated",
            TreeEvent::NodesDeleted { .. } => "nodes:deleted",
            TreeEvent::HierarchyChanged { .. } => "hierarchy:changed",
            TreeEvent::SiblingsReordered { .. } => "siblings:reordered",
            TreeEvent::NodesPurged { .. } => "nodes:purged",
        }
    }

    /// Partition the event belongs to
    pub fn tree_type(&self) -> &str {
        match self {
            TreeEvent::NodeCreated { node } | TreeEvent::NodeUpdated { node } => &node.tree_type,
            TreeEvent::NodesDeleted { tree_type, .. }
            | TreeEvent::HierarchyChanged { tree_type, .. }
            | TreeEvent::SiblingsReordered { tree_type, .. }
            | TreeEvent::NodesPurged { tree_type, .. } => tree_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Subscribers outside Rust parse the internally-tagged format, so the tag and
    /// the field names are part of the contract.
    #[test]
    fn test_tree_event_serialization_contract() {
        let event = TreeEvent::SiblingsReordered {
            tree_type: "site".to_string(),
            parent_id: None,
            ordered_ids: vec!["b".to_string(), "a".to_string()],
        };

        let parsed = serde_json::to_value(&event).unwrap();
        assert_eq!(parsed["type"], "siblings:reordered");
        assert_eq!(parsed["treeType"], "site");
        assert!(parsed["parentId"].is_null());
        assert_eq!(parsed["orderedIds"][0], "b");
        assert_eq!(event.event_type(), "siblings:reordered");

        let back: TreeEvent = serde_json::from_value(parsed).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_tree_type_accessor() {
        let event = TreeEvent::HierarchyChanged {
            tree_type: "admin".to_string(),
            moved_ids: vec!["x".to_string()],
        };
        assert_eq!(event.tree_type(), "admin");

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "hierarchy:changed");
        assert_eq!(value["movedIds"][0], "x");
    }
}
