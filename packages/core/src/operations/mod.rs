//! Node Operations Types
//!
//! Supporting types for `TreeService` callers:
//!
//! - `CreateNodeParams` - everything needed to create a node
//! - `StructuralOperationQueue` - retries structural operations that hit a partition
//!   lock timeout

pub mod retry_queue;

pub use retry_queue::StructuralOperationQueue;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameters for creating a node
///
/// # ID Generation
///
/// `id: None` lets the engine generate a UUID v4. A caller-provided ID (seed files,
/// imports that must keep stable references) is accepted as long as it is unique and
/// does not contain `/`, which is reserved for materialized paths.
///
/// # Examples
///
/// ```rust
/// # use menutree_core::operations::CreateNodeParams;
/// # use serde_json::json;
/// let params = CreateNodeParams {
///     id: None,
///     tree_type: "site".to_string(),
///     parent_id: None,
///     name: "Notices".to_string(),
///     code: "site-notices".to_string(),
///     properties: json!({"linkUrl": "/notices"}),
/// };
/// assert!(params.parent_id.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeParams {
    /// Optional ID for the node; generated when `None`
    #[serde(default)]
    pub id: Option<String>,
    /// Partition the node is created in
    pub tree_type: String,
    /// Parent in the same partition; `None` creates a root
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Display name
    pub name: String,
    /// Code, unique within the partition
    pub code: String,
    /// Display and behavior attributes
    #[serde(default = "empty_object")]
    pub properties: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl CreateNodeParams {
    pub fn new(
        tree_type: impl Into<String>,
        parent_id: Option<String>,
        name: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            tree_type: tree_type.into(),
            parent_id,
            name: name.into(),
            code: code.into(),
            properties: empty_object(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }
}
