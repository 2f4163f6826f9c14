//! Type-Safe MenuItem Wrapper
//!
//! Provides a typed view over the free-form `properties` object of a menu node while
//! the engine keeps storing a single `Node` row per entry.
//!
//! # Architecture
//!
//! - **Universal Storage**: The store and the mutation engine only know `Node`
//! - **Typed Accessors**: Link target, permission tag and visibility flags are read and
//!   written through enums instead of raw JSON
//! - **Lenient Reads**: Missing or unknown values fall back to defaults
//!
//! # Examples
//!
//! ```rust
//! use menutree_core::models::{LinkType, MenuItem, MenuType, PermissionType};
//!
//! let params = MenuItem::builder(MenuType::User, "My Bookings", "user-bookings")
//!     .with_icon("CalendarToday")
//!     .with_link(LinkType::Url, "/mypage/bookings")
//!     .with_permission(PermissionType::Member)
//!     .build_params();
//!
//! assert_eq!(params.tree_type, "user");
//! assert_eq!(params.properties["linkType"], "url");
//! ```

use crate::models::{Node, ValidationError};
use crate::operations::CreateNodeParams;
use serde_json::{json, Value};
use std::str::FromStr;

/// Known menu partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuType {
    Site,
    User,
    Admin,
    HeaderUtility,
    FooterUtility,
    QuickMenu,
}

impl MenuType {
    pub const ALL: [MenuType; 6] = [
        Self::Site,
        Self::User,
        Self::Admin,
        Self::HeaderUtility,
        Self::FooterUtility,
        Self::QuickMenu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Site => "site",
            Self::User => "user",
            Self::Admin => "admin",
            Self::HeaderUtility => "header_utility",
            Self::FooterUtility => "footer_utility",
            Self::QuickMenu => "quick_menu",
        }
    }
}

impl FromStr for MenuType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|menu_type| menu_type.as_str() == s)
            .ok_or_else(|| format!("Invalid menu type: {}", s))
    }
}

impl std::fmt::Display for MenuType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a menu entry opens its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkType {
    /// In-app navigation (default)
    #[default]
    Url,
    NewWindow,
    Modal,
    External,
    /// Grouping entry with no target
    None,
}

impl FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "url" => Ok(Self::Url),
            "new_window" => Ok(Self::NewWindow),
            "modal" => Ok(Self::Modal),
            "external" => Ok(Self::External),
            "none" => Ok(Self::None),
            _ => Err(format!("Invalid link type: {}", s)),
        }
    }
}

impl std::fmt::Display for LinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url => write!(f, "url"),
            Self::NewWindow => write!(f, "new_window"),
            Self::Modal => write!(f, "modal"),
            Self::External => write!(f, "external"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Audience tag attached to a menu entry.
///
/// The engine never evaluates it; the caller is already authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionType {
    Public,
    Member,
    Groups,
    Users,
    Roles,
    /// Default for new entries
    #[default]
    Admin,
}

impl FromStr for PermissionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "member" => Ok(Self::Member),
            "groups" => Ok(Self::Groups),
            "users" => Ok(Self::Users),
            "roles" => Ok(Self::Roles),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("Invalid permission type: {}", s)),
        }
    }
}

impl std::fmt::Display for PermissionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Member => write!(f, "member"),
            Self::Groups => write!(f, "groups"),
            Self::Users => write!(f, "users"),
            Self::Roles => write!(f, "roles"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// Typed wrapper for menu nodes
///
/// # Examples
///
/// ```rust
/// use menutree_core::models::{MenuItem, Node, PermissionType};
/// use serde_json::json;
///
/// let node = Node::new(
///     "admin".to_string(),
///     None,
///     "Members".to_string(),
///     "admin-members".to_string(),
///     json!({"permissionType": "roles", "isVisible": false}),
/// );
/// let item = MenuItem::from_node(node)?;
///
/// assert_eq!(item.permission_type(), PermissionType::Roles);
/// assert!(!item.is_visible());
/// # Ok::<(), menutree_core::models::ValidationError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MenuItem {
    node: Node,
}

impl MenuItem {
    /// Wrap a node whose `tree_type` is a known menu partition
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidTreeType` for any other partition and
    /// `ValidationError::InvalidProperties` if `properties` is not an object.
    pub fn from_node(node: Node) -> Result<Self, ValidationError> {
        node.tree_type
            .parse::<MenuType>()
            .map_err(ValidationError::InvalidTreeType)?;
        if !node.properties.is_object() {
            return Err(ValidationError::InvalidProperties(
                "menu properties must be a JSON object".to_string(),
            ));
        }
        Ok(Self { node })
    }

    pub fn as_node(&self) -> &Node {
        &self.node
    }

    pub fn into_node(self) -> Node {
        self.node
    }

    /// Start building creation parameters for a new menu entry
    pub fn builder(
        menu_type: MenuType,
        name: impl Into<String>,
        code: impl Into<String>,
    ) -> MenuItemBuilder {
        MenuItemBuilder::new(menu_type, name.into(), code.into())
    }

    pub fn menu_type(&self) -> MenuType {
        // from_node guarantees a known partition
        self.node.tree_type.parse().unwrap_or(MenuType::Admin)
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn code(&self) -> &str {
        &self.node.code
    }

    fn str_property(&self, key: &str) -> Option<&str> {
        self.node.properties.get(key).and_then(Value::as_str)
    }

    fn bool_property(&self, key: &str, default: bool) -> bool {
        self.node
            .properties
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    fn set_property(&mut self, key: &str, value: Value) {
        if let Some(map) = self.node.properties.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.str_property("description")
    }

    pub fn icon(&self) -> Option<&str> {
        self.str_property("icon")
    }

    /// Link behavior, `LinkType::Url` when missing or unrecognized
    pub fn link_type(&self) -> LinkType {
        self.str_property("linkType")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    pub fn set_link_type(&mut self, link_type: LinkType) {
        self.set_property("linkType", json!(link_type.to_string()));
    }

    pub fn link_url(&self) -> Option<&str> {
        self.str_property("linkUrl")
    }

    pub fn external_url(&self) -> Option<&str> {
        self.str_property("externalUrl")
    }

    /// Navigation target for the current link type
    ///
    /// External and new-window entries prefer `externalUrl`; grouping entries have none.
    pub fn target_url(&self) -> Option<&str> {
        match self.link_type() {
            LinkType::None => None,
            LinkType::External | LinkType::NewWindow => {
                self.external_url().or_else(|| self.link_url())
            }
            LinkType::Url | LinkType::Modal => self.link_url(),
        }
    }

    pub fn permission_type(&self) -> PermissionType {
        self.str_property("permissionType")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    pub fn set_permission_type(&mut self, permission_type: PermissionType) {
        self.set_property("permissionType", json!(permission_type.to_string()));
    }

    /// Feature flag the entry depends on, e.g. `feature.auth.login`
    pub fn feature_key(&self) -> Option<&str> {
        self.str_property("featureKey")
    }

    pub fn is_visible(&self) -> bool {
        self.bool_property("isVisible", true)
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.set_property("isVisible", json!(visible));
    }

    pub fn is_expandable(&self) -> bool {
        self.bool_property("isExpandable", true)
    }

    pub fn default_expanded(&self) -> bool {
        self.bool_property("defaultExpanded", false)
    }
}

/// Builder for menu entry creation parameters
#[derive(Debug, Clone)]
pub struct MenuItemBuilder {
    menu_type: MenuType,
    parent_id: Option<String>,
    name: String,
    code: String,
    properties: serde_json::Map<String, Value>,
}

impl MenuItemBuilder {
    fn new(menu_type: MenuType, name: String, code: String) -> Self {
        let mut properties = serde_json::Map::new();
        properties.insert("linkType".to_string(), json!(LinkType::default().to_string()));
        properties.insert(
            "permissionType".to_string(),
            json!(PermissionType::default().to_string()),
        );
        properties.insert("isVisible".to_string(), json!(true));
        properties.insert("isExpandable".to_string(), json!(true));
        properties.insert("defaultExpanded".to_string(), json!(false));

        Self {
            menu_type,
            parent_id: None,
            name,
            code,
            properties,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.properties
            .insert("description".to_string(), json!(description.into()));
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.properties.insert("icon".to_string(), json!(icon.into()));
        self
    }

    pub fn with_link(mut self, link_type: LinkType, url: impl Into<String>) -> Self {
        let key = match link_type {
            LinkType::External | LinkType::NewWindow => "externalUrl",
            _ => "linkUrl",
        };
        self.properties
            .insert("linkType".to_string(), json!(link_type.to_string()));
        self.properties.insert(key.to_string(), json!(url.into()));
        self
    }

    pub fn with_permission(mut self, permission_type: PermissionType) -> Self {
        self.properties.insert(
            "permissionType".to_string(),
            json!(permission_type.to_string()),
        );
        self
    }

    pub fn with_feature_key(mut self, feature_key: impl Into<String>) -> Self {
        self.properties
            .insert("featureKey".to_string(), json!(feature_key.into()));
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.properties.insert("isVisible".to_string(), json!(visible));
        self
    }

    pub fn build_params(self) -> CreateNodeParams {
        CreateNodeParams {
            id: None,
            tree_type: self.menu_type.to_string(),
            parent_id: self.parent_id,
            name: self.name,
            code: self.code,
            properties: Value::Object(self.properties),
        }
    }
}

// Comprehensive tests in separate module
#[cfg(test)]
#[path = "menu_item_test.rs"]
mod menu_item_test;
