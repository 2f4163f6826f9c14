//! Node Data Structures
//!
//! This module defines the core `Node` struct stored by every backend, together with
//! the partial-update types used by the store (`NodePatch`) and by callers
//! (`AttributeUpdate`).
//!
//! # Architecture
//!
//! - **Single Row Type**: One struct represents every node in every partition
//! - **Structural Fields**: `parent_id`, `sort_order`, `depth` and `path` are written only
//!   by the mutation engine
//! - **Opaque Attributes**: Display and behavior data lives in the `properties` JSON object
//!
//! # Examples
//!
//! ```rust
//! use menutree_core::models::Node;
//! use serde_json::json;
//!
//! let root = Node::new(
//!     "site".to_string(),
//!     None,
//!     "Home".to_string(),
//!     "home".to_string(),
//!     json!({ "icon": "Home", "linkUrl": "/" }),
//! );
//! assert!(root.is_root());
//! assert_eq!(root.depth, 0);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Validation errors for Node construction and caller input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid node ID: {0}")]
    InvalidId(String),

    #[error("Invalid tree type: {0}")]
    InvalidTreeType(String),

    #[error("Invalid parent reference: {0}")]
    InvalidParent(String),

    #[error("Properties validation failed: {0}")]
    InvalidProperties(String),
}

/// A single entry in an ordered hierarchy.
///
/// # Fields
///
/// - `id`: Unique identifier (UUID v4), immutable
/// - `tree_type`: Partition key; a node never changes partition
/// - `parent_id`: Parent within the same partition, `None` for roots
/// - `sort_order`: Position among live siblings, contiguous from 0
/// - `depth`: 0 for roots, otherwise parent depth + 1
/// - `path`: Materialized ancestor path, `/<root>/.../<id>`
/// - `name` / `code`: Display name and partition-unique code
/// - `properties`: Free-form attributes (icon, link target, visibility, permission tag)
/// - `is_deleted`: Soft-delete marker
/// - `created_at` / `updated_at`: Engine-managed timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier
    pub id: String,

    /// Partition key (e.g. "site", "user", "admin")
    pub tree_type: String,

    /// Parent node ID (None = root)
    pub parent_id: Option<String>,

    /// Position among live siblings
    pub sort_order: i64,

    /// Distance from the root of this node's tree
    pub depth: i64,

    /// Materialized path of ancestor IDs, ending with this node's ID
    pub path: String,

    /// Display name
    pub name: String,

    /// Code, unique within the partition
    pub code: String,

    /// Display and behavior attributes, never interpreted by the engine
    pub properties: serde_json::Value,

    /// Soft-delete marker
    #[serde(default)]
    pub is_deleted: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Create a new root-or-child node with an auto-generated UUID.
    ///
    /// Structural fields are placeholders (`sort_order = 0`, `depth = 0`, `path = /<id>`);
    /// the mutation engine assigns the real values before insertion.
    pub fn new(
        tree_type: String,
        parent_id: Option<String>,
        name: String,
        code: String,
        properties: serde_json::Value,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        Self::new_with_id(id, tree_type, parent_id, name, code, properties)
    }

    /// Create a new node with an explicit ID
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use menutree_core::models::Node;
    /// # use serde_json::json;
    /// let node = Node::new_with_id(
    ///     "menu-1".to_string(),
    ///     "admin".to_string(),
    ///     None,
    ///     "Dashboard".to_string(),
    ///     "dashboard".to_string(),
    ///     json!({}),
    /// );
    /// assert_eq!(node.path, "/menu-1");
    /// ```
    pub fn new_with_id(
        id: String,
        tree_type: String,
        parent_id: Option<String>,
        name: String,
        code: String,
        properties: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        let path = format!("/{}", id);

        Self {
            id,
            tree_type,
            parent_id,
            sort_order: 0,
            depth: 0,
            path,
            name,
            code,
            properties,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate required fields and self-references
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if:
    /// - `id`, `name` or `code` is empty
    /// - `id` contains `/` (the path separator)
    /// - `tree_type` is blank
    /// - `properties` is not a JSON object
    /// - the node names itself as parent
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingField("id".to_string()));
        }

        if self.id.contains('/') {
            return Err(ValidationError::InvalidId(format!(
                "'{}' contains the path separator '/'",
                self.id
            )));
        }

        validate_tree_type(&self.tree_type)?;

        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name".to_string()));
        }

        if self.code.trim().is_empty() {
            return Err(ValidationError::MissingField("code".to_string()));
        }

        if !self.properties.is_object() {
            return Err(ValidationError::InvalidProperties(
                "properties must be a JSON object".to_string(),
            ));
        }

        if self.parent_id.as_deref() == Some(self.id.as_str()) {
            return Err(ValidationError::InvalidParent(
                "Node cannot be its own parent".to_string(),
            ));
        }

        Ok(())
    }

    /// Check if this node is a root (no parent)
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether this node belongs to the sibling group `(tree_type, parent_id)`
    pub fn is_in_group(&self, tree_type: &str, parent_id: Option<&str>) -> bool {
        self.tree_type == tree_type && self.parent_id.as_deref() == parent_id
    }

    /// Merge properties with existing properties (shallow merge)
    ///
    /// A JSON `null` value removes the key.
    pub fn merge_properties(&mut self, updates: &serde_json::Value) {
        if let (Some(existing), Some(new)) = (self.properties.as_object_mut(), updates.as_object())
        {
            for (key, value) in new {
                if value.is_null() {
                    existing.remove(key);
                } else {
                    existing.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Apply a store-level patch in place. Does not touch `updated_at`.
    pub fn apply_patch(&mut self, patch: &NodePatch) {
        if let Some(parent_id) = &patch.parent_id {
            self.parent_id = parent_id.clone();
        }
        if let Some(sort_order) = patch.sort_order {
            self.sort_order = sort_order;
        }
        if let Some(depth) = patch.depth {
            self.depth = depth;
        }
        if let Some(path) = &patch.path {
            self.path = path.clone();
        }
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(properties) = &patch.properties {
            self.properties = properties.clone();
        }
        if let Some(updates) = &patch.merge_properties {
            self.merge_properties(updates);
        }
        if let Some(is_deleted) = patch.is_deleted {
            self.is_deleted = is_deleted;
        }
    }
}

/// Reject blank partition keys
pub fn validate_tree_type(tree_type: &str) -> Result<(), ValidationError> {
    if tree_type.trim().is_empty() {
        return Err(ValidationError::InvalidTreeType(
            "tree type cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Custom deserializer for optional fields that accepts both plain values and nested Options
///
/// Maps three input formats to the double-Option pattern:
/// - Missing field → None (don't update)
/// - null → Some(None) (set to NULL)
/// - "value" → Some(Some("value")) (set to value)
fn deserialize_optional_field<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Some(Option::<T>::deserialize(deserializer)?))
}

/// Partial row update used by the node store
///
/// Every field is optional; only provided fields are written. `parent_id` uses the
/// double-Option pattern:
///
/// - `None`: Don't change parent_id
/// - `Some(None)`: Set parent_id to NULL (node becomes a root)
/// - `Some(Some(id))`: Set parent_id to the specified ID
///
/// The store applies patches blindly against the row as it stands inside its own write,
/// so `merge_properties` never loses keys written concurrently by another caller. The
/// mutation engine is responsible for producing patches that keep the tree consistent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePatch {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub parent_id: Option<Option<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Full replacement of the properties object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,

    /// Shallow merge into the stored properties, applied after `properties`;
    /// `null` values remove keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_properties: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
}

impl NodePatch {
    /// Create a new empty NodePatch
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_sort_order(mut self, sort_order: i64) -> Self {
        self.sort_order = Some(sort_order);
        self
    }

    pub fn with_depth(mut self, depth: i64) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_path(mut self, path: String) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_merged_properties(mut self, updates: serde_json::Value) -> Self {
        self.merge_properties = Some(updates);
        self
    }

    /// Check if the patch contains any changes
    pub fn is_empty(&self) -> bool {
        self.parent_id.is_none()
            && self.sort_order.is_none()
            && self.depth.is_none()
            && self.path.is_none()
            && self.name.is_none()
            && self.properties.is_none()
            && self.merge_properties.is_none()
            && self.is_deleted.is_none()
    }

    /// Whether the patch touches tree shape or liveness
    ///
    /// Stores bump the partition revision for structural patches only, so attribute
    /// edits never invalidate a structural mutation in flight.
    pub fn is_structural(&self) -> bool {
        self.parent_id.is_some()
            || self.sort_order.is_some()
            || self.depth.is_some()
            || self.path.is_some()
            || self.is_deleted.is_some()
    }
}

/// Field names a caller may never set through an attribute update
pub const STRUCTURAL_FIELDS: &[&str] = &[
    "id",
    "treeType",
    "tree_type",
    "parentId",
    "parent_id",
    "sortOrder",
    "sort_order",
    "depth",
    "path",
    "code",
    "isDeleted",
    "is_deleted",
    "createdAt",
    "created_at",
    "updatedAt",
    "updated_at",
];

/// Attribute-only update accepted from callers
///
/// Structural fields cannot be expressed here; callers must use move or reorder.
/// `properties` is merged shallowly into the existing object and a JSON `null` value
/// removes the key.
///
/// # Examples
///
/// ```rust
/// # use menutree_core::models::AttributeUpdate;
/// # use serde_json::json;
/// let update = AttributeUpdate::new()
///     .with_name("Bookings".to_string())
///     .with_properties(json!({ "icon": "CalendarToday", "featureKey": null }));
/// assert!(!update.is_empty());
///
/// // Raw JSON patches naming structural fields are refused
/// assert!(AttributeUpdate::from_json(json!({ "parentId": "other" })).is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AttributeUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
}

impl AttributeUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: String) -> Self {
        self.name = Some(name);
        self
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.properties.is_none()
    }

    /// Parse a raw JSON patch from the application layer.
    ///
    /// # Errors
    ///
    /// Returns the offending field name in `Err` when the patch tries to set a
    /// structural or engine-managed field, or `Err("<reason>")` for any other
    /// malformed patch.
    pub fn from_json(value: serde_json::Value) -> Result<Self, AttributeUpdateRejection> {
        if let Some(object) = value.as_object() {
            if let Some(field) = object
                .keys()
                .find(|key| STRUCTURAL_FIELDS.contains(&key.as_str()))
            {
                return Err(AttributeUpdateRejection::StructuralField(field.clone()));
            }
        }

        let update: Self = serde_json::from_value(value)
            .map_err(|e| AttributeUpdateRejection::Malformed(e.to_string()))?;
        update.validate()?;
        Ok(update)
    }

    /// Validate field contents
    pub fn validate(&self) -> Result<(), AttributeUpdateRejection> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(AttributeUpdateRejection::Malformed(
                    "name cannot be empty".to_string(),
                ));
            }
        }
        if let Some(properties) = &self.properties {
            if !properties.is_object() {
                return Err(AttributeUpdateRejection::Malformed(
                    "properties must be a JSON object".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Why a raw attribute patch was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttributeUpdateRejection {
    #[error("structural field '{0}' cannot be changed by an attribute update")]
    StructuralField(String),

    #[error("malformed attribute update: {0}")]
    Malformed(String),
}

/// What happens to a deleted node's descendants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CascadePolicy {
    /// Refuse the delete while live children exist
    RejectIfChildren,
    /// Soft-delete the node and its whole subtree
    CascadeDelete,
    /// Hand the children to the deleted node's parent (or promote them to roots)
    ReparentChildrenToGrandparent,
}

impl std::fmt::Display for CascadePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RejectIfChildren => write!(f, "reject-if-children"),
            Self::CascadeDelete => write!(f, "cascade-delete"),
            Self::ReparentChildrenToGrandparent => write!(f, "reparent-children-to-grandparent"),
        }
    }
}

impl std::str::FromStr for CascadePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reject-if-children" | "reject_if_children" => Ok(Self::RejectIfChildren),
            "cascade-delete" | "cascade_delete" | "cascade" => Ok(Self::CascadeDelete),
            "reparent-children-to-grandparent" | "reparent_children_to_grandparent"
            | "reparent" => Ok(Self::ReparentChildrenToGrandparent),
            _ => Err(format!("Invalid cascade policy: {}", s)),
        }
    }
}

/// Filter for flat node listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFilter {
    /// Partition to list
    pub tree_type: String,

    /// Restrict to one sibling group:
    /// - `None`: every node in the partition
    /// - `Some(None)`: roots only
    /// - `Some(Some(id))`: children of `id`
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub parent_id: Option<Option<String>>,

    /// Include soft-deleted nodes
    #[serde(default)]
    pub include_deleted: bool,
}

impl NodeFilter {
    pub fn new(tree_type: impl Into<String>) -> Self {
        Self {
            tree_type: tree_type.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_deleted(mut self, include_deleted: bool) -> Self {
        self.include_deleted = include_deleted;
        self
    }
}

/// A node in a flat listing, annotated with its parent's display name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeListItem {
    #[serde(flatten)]
    pub node: Node,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
}

/// Nested projection of a node and its ordered children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedNode {
    #[serde(flatten)]
    pub node: Node,

    pub children: Vec<NestedNode>,
}

impl NestedNode {
    /// Total number of nodes in this subtree, including itself
    pub fn subtree_len(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(current) = stack.pop() {
            count += 1;
            stack.extend(current.children.iter());
        }
        count
    }
}

/// Pre-order flat projection entry used for indentation-based rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatNode {
    pub node: Node,
    pub depth: i64,
}
