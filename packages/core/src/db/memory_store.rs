//! In-Memory NodeStore
//!
//! `MemoryStore` keeps every node in a `HashMap` behind a `tokio::sync::RwLock`.
//! Writers validate a staged copy of the touched rows and swap it in under the write
//! lock, so readers holding the read lock always see a committed snapshot. Partition
//! revisions live under the same lock, so a revision check and the write it guards are
//! one step.

use crate::db::node_store::find_sibling_order_conflict;
use crate::db::{DatabaseError, NodeStore, PartitionLocks, PartitionWrite};
use crate::models::{Node, NodePatch};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MemoryState {
    nodes: HashMap<String, Node>,
    revisions: HashMap<String, i64>,
}

impl MemoryState {
    fn revision(&self, tree_type: &str) -> i64 {
        self.revisions.get(tree_type).copied().unwrap_or(0)
    }

    fn bump(&mut self, tree_type: &str) {
        *self.revisions.entry(tree_type.to_string()).or_insert(0) += 1;
    }

    fn insert(&mut self, node: Node) -> Result<Node, DatabaseError> {
        if self.nodes.contains_key(&node.id) {
            return Err(DatabaseError::duplicate_id(&node.id));
        }

        if self
            .nodes
            .values()
            .any(|n| n.tree_type == node.tree_type && n.code == node.code)
        {
            return Err(DatabaseError::duplicate_code(&node.tree_type, &node.code));
        }

        if !node.is_deleted
            && self.nodes.values().any(|n| {
                !n.is_deleted
                    && n.is_in_group(&node.tree_type, node.parent_id.as_deref())
                    && n.sort_order == node.sort_order
            })
        {
            return Err(DatabaseError::constraint_violation(format!(
                "sort order {} already taken under parent {:?} in '{}'",
                node.sort_order, node.parent_id, node.tree_type
            )));
        }

        self.bump(&node.tree_type);
        self.nodes.insert(node.id.clone(), node.clone());
        Ok(node)
    }

    fn update(&mut self, updates: &[(String, NodePatch)]) -> Result<Vec<Node>, DatabaseError> {
        let now = Utc::now();

        // Stage every touched row before anything is written
        let mut order: Vec<String> = Vec::new();
        let mut staged: HashMap<String, Node> = HashMap::new();
        let mut structural: HashSet<String> = HashSet::new();
        for (id, patch) in updates {
            if !staged.contains_key(id) {
                let current = self
                    .nodes
                    .get(id)
                    .cloned()
                    .ok_or_else(|| DatabaseError::not_found(id))?;
                staged.insert(id.clone(), current);
                order.push(id.clone());
            }
            if let Some(node) = staged.get_mut(id) {
                node.apply_patch(patch);
                node.updated_at = now;
                if patch.is_structural() {
                    structural.insert(node.tree_type.clone());
                }
            }
        }

        let touched_types: HashSet<&str> = staged.values().map(|n| n.tree_type.as_str()).collect();
        let candidate = self
            .nodes
            .values()
            .filter(|n| touched_types.contains(n.tree_type.as_str()) && !staged.contains_key(&n.id))
            .chain(staged.values());
        if let Some(conflict) = find_sibling_order_conflict(candidate) {
            return Err(DatabaseError::constraint_violation(conflict));
        }

        for tree_type in &structural {
            self.bump(tree_type);
        }

        let mut result = Vec::with_capacity(order.len());
        for id in order {
            if let Some(node) = staged.remove(&id) {
                self.nodes.insert(id, node.clone());
                result.push(node);
            }
        }
        Ok(result)
    }

    fn purge(&mut self, ids: Vec<String>) -> Result<usize, DatabaseError> {
        if let Some(missing) = ids.iter().find(|id| !self.nodes.contains_key(*id)) {
            return Err(DatabaseError::not_found(missing));
        }

        let unique: HashSet<String> = ids.into_iter().collect();
        let mut touched: HashSet<String> = HashSet::new();
        for id in &unique {
            if let Some(node) = self.nodes.remove(id) {
                touched.insert(node.tree_type);
            }
        }
        for tree_type in &touched {
            self.bump(tree_type);
        }
        Ok(unique.len())
    }
}

/// Process-local node store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    locks: PartitionLocks,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `nodes`, bypassing all checks.
    ///
    /// Intended for fixtures that need a specific (possibly corrupt) state.
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
                revisions: HashMap::new(),
            }),
            locks: PartitionLocks::new(),
        }
    }

    /// Number of stored rows, deleted included
    pub async fn len(&self) -> usize {
        self.state.read().await.nodes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.nodes.is_empty()
    }
}

/// Sort key shared with the libsql backend's `ORDER BY`
fn listing_order(a: &Node, b: &Node) -> std::cmp::Ordering {
    a.parent_id
        .as_deref()
        .unwrap_or("")
        .cmp(b.parent_id.as_deref().unwrap_or(""))
        .then(a.sort_order.cmp(&b.sort_order))
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

#[async_trait]
impl NodeStore for MemoryStore {
    fn partition_locks(&self) -> &PartitionLocks {
        &self.locks
    }

    async fn partition_revision(&self, tree_type: &str) -> Result<i64, DatabaseError> {
        Ok(self.state.read().await.revision(tree_type))
    }

    async fn commit_partition(
        &self,
        tree_type: &str,
        expected_revision: i64,
        write: PartitionWrite,
    ) -> Result<i64, DatabaseError> {
        let mut state = self.state.write().await;

        let actual = state.revision(tree_type);
        if actual != expected_revision {
            return Err(DatabaseError::stale_revision(tree_type, expected_revision, actual));
        }

        match write {
            PartitionWrite::Insert(node) => {
                state.insert(node)?;
            }
            PartitionWrite::Update(updates) => {
                state.update(&updates)?;
            }
            PartitionWrite::Purge(ids) => {
                state.purge(ids)?;
            }
        }
        Ok(state.revision(tree_type))
    }

    async fn get_node(&self, id: &str) -> Result<Node, DatabaseError> {
        self.state
            .read()
            .await
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| DatabaseError::not_found(id))
    }

    async fn list_by_tree_type(
        &self,
        tree_type: &str,
        include_deleted: bool,
    ) -> Result<Vec<Node>, DatabaseError> {
        let state = self.state.read().await;
        let mut result: Vec<Node> = state
            .nodes
            .values()
            .filter(|n| n.tree_type == tree_type && (include_deleted || !n.is_deleted))
            .cloned()
            .collect();
        result.sort_by(listing_order);
        Ok(result)
    }

    async fn insert_node(&self, node: Node) -> Result<Node, DatabaseError> {
        self.state.write().await.insert(node)
    }

    async fn update_fields(&self, id: &str, patch: NodePatch) -> Result<Node, DatabaseError> {
        let mut updated = self.bulk_update(vec![(id.to_string(), patch)]).await?;
        updated
            .pop()
            .ok_or_else(|| DatabaseError::not_found(id))
    }

    async fn bulk_update(
        &self,
        updates: Vec<(String, NodePatch)>,
    ) -> Result<Vec<Node>, DatabaseError> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }
        self.state.write().await.update(&updates)
    }

    async fn delete_node(&self, id: &str, hard: bool) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;

        if hard {
            return state.purge(vec![id.to_string()]).map(|_| ());
        }

        let node = state
            .nodes
            .get_mut(id)
            .ok_or_else(|| DatabaseError::not_found(id))?;
        node.is_deleted = true;
        node.updated_at = Utc::now();
        let tree_type = node.tree_type.clone();
        state.bump(&tree_type);
        Ok(())
    }

    async fn bulk_delete(&self, ids: Vec<String>) -> Result<usize, DatabaseError> {
        self.state.write().await.purge(ids)
    }
}
