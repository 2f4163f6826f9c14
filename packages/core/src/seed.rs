//! Seed Loading
//!
//! Populates partitions from a JSON document of nested items. Seeding is idempotent:
//! items whose code already exists in the partition are skipped, and their children
//! are attached to the existing node instead.
//!
//! # Format
//!
//! ```json
//! [
//!   {
//!     "treeType": "user",
//!     "items": [
//!       { "code": "home", "name": "Home", "properties": { "linkUrl": "/" } },
//!       {
//!         "code": "mypage",
//!         "name": "My Page",
//!         "children": [{ "code": "mypage-profile", "name": "Profile" }]
//!       }
//!     ]
//!   }
//! ]
//! ```

use crate::db::NodeStore;
use crate::models::NodeFilter;
use crate::operations::CreateNodeParams;
use crate::services::{TreeService, TreeServiceError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One item to create, with its children in display order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedItem {
    #[serde(default)]
    pub id: Option<String>,
    pub code: String,
    pub name: String,
    #[serde(default = "empty_object")]
    pub properties: Value,
    #[serde(default)]
    pub children: Vec<SeedItem>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Root items of one partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedPartition {
    pub tree_type: String,
    #[serde(default)]
    pub items: Vec<SeedItem>,
}

/// Outcome of seeding one partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedReport {
    pub created: usize,
    pub skipped: usize,
}

impl std::ops::AddAssign for SeedReport {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.skipped += other.skipped;
    }
}

/// Parse a seed document (a JSON array of partitions)
pub fn parse_seed(json: &str) -> Result<Vec<SeedPartition>, serde_json::Error> {
    serde_json::from_str(json)
}

/// Create every item of `partition` that does not exist yet
///
/// Items are created parent first and siblings in document order, so each sibling
/// group ends up ordered as written.
///
/// # Errors
///
/// Stops at the first failed creation; items created before it are kept.
pub async fn seed_partition<S: NodeStore + ?Sized>(
    service: &TreeService<S>,
    partition: &SeedPartition,
) -> Result<SeedReport, TreeServiceError> {
    // code -> (id, is_deleted) for everything already stored, deleted included
    let mut existing: HashMap<String, (String, bool)> = service
        .list_nodes(NodeFilter::new(partition.tree_type.clone()).with_deleted(true))
        .await?
        .into_iter()
        .map(|item| (item.node.code, (item.node.id, item.node.is_deleted)))
        .collect();

    let mut report = SeedReport::default();
    let mut stack: Vec<(&SeedItem, Option<String>)> =
        partition.items.iter().rev().map(|item| (item, None)).collect();

    while let Some((item, parent_id)) = stack.pop() {
        let id = match existing.get(&item.code) {
            Some((_, true)) => {
                tracing::debug!(code = %item.code, "seed item exists but is deleted; skipping subtree");
                report.skipped += 1;
                continue;
            }
            Some((id, false)) => {
                report.skipped += 1;
                id.clone()
            }
            None => {
                let mut params = CreateNodeParams::new(
                    partition.tree_type.clone(),
                    parent_id,
                    item.name.clone(),
                    item.code.clone(),
                )
                .with_properties(item.properties.clone());
                params.id = item.id.clone();

                let node = service.create_node(params).await?;
                existing.insert(node.code.clone(), (node.id.clone(), false));
                report.created += 1;
                node.id
            }
        };

        stack.extend(
            item.children
                .iter()
                .rev()
                .map(|child| (child, Some(id.clone()))),
        );
    }

    tracing::info!(
        tree_type = %partition.tree_type,
        created = report.created,
        skipped = report.skipped,
        "partition seeded"
    );
    Ok(report)
}

/// Seed several partitions in order
pub async fn seed_all<S: NodeStore + ?Sized>(
    service: &TreeService<S>,
    partitions: &[SeedPartition],
) -> Result<SeedReport, TreeServiceError> {
    let mut total = SeedReport::default();
    for partition in partitions {
        total += seed_partition(service, partition).await?;
    }
    Ok(total)
}
