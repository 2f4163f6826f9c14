//! Tree Invariant Checker
//!
//! Pure functions over one partition's nodes. Nothing here touches storage, so the
//! mutation engine can run the same checks against a candidate post-state before it
//! commits.
//!
//! Invariants checked by [`check_partition`]:
//!
//! 1. **Acyclicity**: no node is its own ancestor
//! 2. **Partition closure**: a parent always lives in the same partition
//! 3. **Sibling order**: live siblings hold exactly `0..count-1`
//! 4. **Depth and path consistency**: `depth = depth(parent) + 1`, `path = path(parent)/id`
//! 5. **Deletion consistency**: no live node sits under a deleted or missing parent

use crate::models::Node;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// A single broken invariant
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InvariantViolation {
    #[error("node {node_id} is its own ancestor")]
    #[serde(rename_all = "camelCase")]
    Cycle { node_id: String },

    #[error("node {node_id} references missing parent {parent_id}")]
    #[serde(rename_all = "camelCase")]
    MissingParent { node_id: String, parent_id: String },

    #[error("node {node_id} has parent {parent_id} in partition '{parent_tree_type}'")]
    #[serde(rename_all = "camelCase")]
    ParentOutsidePartition {
        node_id: String,
        parent_id: String,
        parent_tree_type: String,
    },

    #[error("live node {node_id} sits under deleted parent {parent_id}")]
    #[serde(rename_all = "camelCase")]
    LiveUnderDeleted { node_id: String, parent_id: String },

    #[error("siblings under {parent_id:?} have orders {orders:?}, expected 0..{}", .orders.len())]
    #[serde(rename_all = "camelCase")]
    SiblingOrder {
        parent_id: Option<String>,
        orders: Vec<i64>,
    },

    #[error("node {node_id} has depth {actual}, expected {expected}")]
    #[serde(rename_all = "camelCase")]
    DepthMismatch {
        node_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("node {node_id} has path {actual}, expected {expected}")]
    #[serde(rename_all = "camelCase")]
    PathMismatch {
        node_id: String,
        expected: String,
        actual: String,
    },
}

/// Ordering of siblings used everywhere a sibling list is materialized
///
/// `sort_order` first; ties (only possible when deleted rows are included) put live
/// nodes first, then older nodes, then lower IDs.
pub fn sibling_cmp(a: &Node, b: &Node) -> Ordering {
    a.sort_order
        .cmp(&b.sort_order)
        .then(a.is_deleted.cmp(&b.is_deleted))
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

/// Arena view of one partition with O(1) lookup by ID and ordered child lists
#[derive(Debug, Clone, Default)]
pub struct PartitionIndex {
    nodes: Vec<Node>,
    positions: HashMap<String, usize>,
    children: HashMap<Option<String>, Vec<usize>>,
}

impl PartitionIndex {
    pub fn new(nodes: Vec<Node>) -> Self {
        let positions: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        let mut children: HashMap<Option<String>, Vec<usize>> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            children.entry(node.parent_id.clone()).or_default().push(i);
        }
        for list in children.values_mut() {
            list.sort_by(|&a, &b| sibling_cmp(&nodes[a], &nodes[b]));
        }

        Self {
            nodes,
            positions,
            children,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.positions.get(id).map(|&i| &self.nodes[i])
    }

    /// Live node lookup; soft-deleted nodes count as absent
    pub fn get_live(&self, id: &str) -> Option<&Node> {
        self.get(id).filter(|n| !n.is_deleted)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All children of `parent` (roots for `None`), deleted included, in sibling order
    pub fn children(&self, parent: Option<&str>) -> impl Iterator<Item = &Node> + '_ {
        self.children
            .get(&parent.map(str::to_string))
            .into_iter()
            .flatten()
            .map(move |&i| &self.nodes[i])
    }

    /// The live sibling group under `parent`, in sibling order
    pub fn live_children(&self, parent: Option<&str>) -> Vec<&Node> {
        self.children(parent).filter(|n| !n.is_deleted).collect()
    }

    /// IDs of `id` and everything below it, pre-order
    ///
    /// Bounded by the partition size, so a corrupted cycle cannot loop forever.
    pub fn subtree_ids(&self, id: &str, include_deleted: bool) -> Vec<String> {
        let Some(root) = self.get(id) else {
            return Vec::new();
        };

        let mut result = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if result.len() >= self.nodes.len() {
                break;
            }
            result.push(node.id.clone());
            let kids: Vec<&Node> = self
                .children(Some(&node.id))
                .filter(|c| include_deleted || !c.is_deleted)
                .collect();
            stack.extend(kids.into_iter().rev());
        }
        result
    }
}

/// Whether `node_id` lies strictly below `ancestor_id`
///
/// Walks down from the candidate ancestor; the walk visits at most `index.len()` nodes
/// so it terminates even on a corrupted pre-existing cycle.
pub fn is_descendant(index: &PartitionIndex, ancestor_id: &str, node_id: &str) -> bool {
    let mut stack: Vec<&str> = index
        .children(Some(ancestor_id))
        .map(|c| c.id.as_str())
        .collect();
    let mut visited = 0;

    while let Some(current) = stack.pop() {
        if current == node_id {
            return true;
        }
        visited += 1;
        if visited > index.len() {
            tracing::warn!(ancestor_id, "descendant walk exceeded partition size");
            return false;
        }
        stack.extend(index.children(Some(current)).map(|c| c.id.as_str()));
    }

    false
}

pub fn compute_depth(parent_depth: Option<i64>) -> i64 {
    parent_depth.map_or(0, |d| d + 1)
}

pub fn compute_path(parent_path: Option<&str>, id: &str) -> String {
    match parent_path {
        Some(parent) => format!("{}/{}", parent, id),
        None => format!("/{}", id),
    }
}

/// Orders are exactly `0..n-1` in some permutation
pub fn validate_sibling_order(orders: &[i64]) -> bool {
    let mut sorted = orders.to_vec();
    sorted.sort_unstable();
    sorted
        .iter()
        .enumerate()
        .all(|(expected, &actual)| actual == expected as i64)
}

/// Check every invariant over one partition's nodes (deleted rows included)
///
/// # Errors
///
/// All violations found, in a stable order: parent references, cycles, sibling
/// orders, then depth and path.
pub fn check_partition(nodes: &[Node]) -> Result<(), Vec<InvariantViolation>> {
    let index = PartitionIndex::new(nodes.to_vec());
    let mut violations = Vec::new();

    check_parent_references(&index, &mut violations);
    check_cycles(&index, &mut violations);
    check_sibling_orders(&index, &mut violations);
    check_depth_and_path(&index, &mut violations);

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn check_parent_references(index: &PartitionIndex, violations: &mut Vec<InvariantViolation>) {
    for node in index.nodes() {
        let Some(parent_id) = node.parent_id.as_deref() else {
            continue;
        };

        match index.get(parent_id) {
            None => violations.push(InvariantViolation::MissingParent {
                node_id: node.id.clone(),
                parent_id: parent_id.to_string(),
            }),
            Some(parent) if parent.tree_type != node.tree_type => {
                violations.push(InvariantViolation::ParentOutsidePartition {
                    node_id: node.id.clone(),
                    parent_id: parent_id.to_string(),
                    parent_tree_type: parent.tree_type.clone(),
                })
            }
            Some(parent) if parent.is_deleted && !node.is_deleted => {
                violations.push(InvariantViolation::LiveUnderDeleted {
                    node_id: node.id.clone(),
                    parent_id: parent_id.to_string(),
                })
            }
            Some(_) => {}
        }
    }
}

fn check_cycles(index: &PartitionIndex, violations: &mut Vec<InvariantViolation>) {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; index.len()];

    for start in 0..index.len() {
        let mut chain: Vec<usize> = Vec::new();
        let mut current = Some(start);

        while let Some(i) = current {
            match marks[i] {
                Mark::Done => break,
                Mark::InProgress => {
                    // Report the node where the walk re-entered its own chain
                    violations.push(InvariantViolation::Cycle {
                        node_id: index.nodes[i].id.clone(),
                    });
                    break;
                }
                Mark::Unvisited => {
                    marks[i] = Mark::InProgress;
                    chain.push(i);
                    current = index.nodes[i]
                        .parent_id
                        .as_deref()
                        .and_then(|p| index.positions.get(p).copied());
                }
            }
        }

        for i in chain {
            marks[i] = Mark::Done;
        }
    }
}

fn check_sibling_orders(index: &PartitionIndex, violations: &mut Vec<InvariantViolation>) {
    let mut groups: Vec<(&Option<String>, Vec<i64>)> = index
        .children
        .iter()
        .map(|(parent, members)| {
            let orders = members
                .iter()
                .map(|&i| &index.nodes[i])
                .filter(|n| !n.is_deleted)
                .map(|n| n.sort_order)
                .collect();
            (parent, orders)
        })
        .collect();
    groups.sort_by(|a, b| a.0.cmp(b.0));

    for (parent, orders) in groups {
        if !validate_sibling_order(&orders) {
            violations.push(InvariantViolation::SiblingOrder {
                parent_id: parent.clone(),
                orders,
            });
        }
    }
}

fn check_depth_and_path(index: &PartitionIndex, violations: &mut Vec<InvariantViolation>) {
    // Breadth-first from the roots; nodes in cycles or under missing parents are never
    // reached and are reported by the other checks
    let mut queue: VecDeque<(&Node, Option<(i64, &str)>)> =
        index.children(None).map(|n| (n, None)).collect();
    let mut visited = 0;

    while let Some((node, parent)) = queue.pop_front() {
        visited += 1;
        if visited > index.len() {
            break;
        }

        let expected_depth = compute_depth(parent.map(|(d, _)| d));
        let expected_path = compute_path(parent.map(|(_, p)| p), &node.id);

        if node.depth != expected_depth {
            violations.push(InvariantViolation::DepthMismatch {
                node_id: node.id.clone(),
                expected: expected_depth,
                actual: node.depth,
            });
        }
        if node.path != expected_path {
            violations.push(InvariantViolation::PathMismatch {
                node_id: node.id.clone(),
                expected: expected_path,
                actual: node.path.clone(),
            });
        }

        // Children are validated against the stored values so one bad row reports once
        for child in index.children(Some(&node.id)) {
            if child.tree_type == node.tree_type {
                queue.push_back((child, Some((node.depth, node.path.as_str()))));
            }
        }
    }
}
