//! Tree Assembler
//!
//! Builds the nested and the flattened-with-depth projections of one partition from
//! its flat node list. Both projections use the same adjacency map and the same
//! sibling ordering, and both are built with explicit stacks instead of recursion.

use crate::models::{FlatNode, NestedNode, Node};
use crate::services::invariants::sibling_cmp;
use std::collections::{HashMap, HashSet};

/// parent_id → children, each list in sibling order
fn adjacency(nodes: &[Node], include_deleted: bool) -> HashMap<Option<&str>, Vec<&Node>> {
    let mut map: HashMap<Option<&str>, Vec<&Node>> = HashMap::new();
    for node in nodes.iter().filter(|n| include_deleted || !n.is_deleted) {
        map.entry(node.parent_id.as_deref()).or_default().push(node);
    }
    for children in map.values_mut() {
        children.sort_by(|a, b| sibling_cmp(a, b));
    }
    map
}

fn warn_unreachable(nodes: &[Node], include_deleted: bool, reached: &HashSet<&str>) {
    let unreachable: Vec<&str> = nodes
        .iter()
        .filter(|n| include_deleted || !n.is_deleted)
        .map(|n| n.id.as_str())
        .filter(|id| !reached.contains(id))
        .collect();

    if !unreachable.is_empty() {
        tracing::warn!(
            count = unreachable.len(),
            ids = ?unreachable,
            "skipping nodes not reachable from any root"
        );
    }
}

/// Pre-order walk shared by both projections: (node, depth) in display order
fn walk<'a>(nodes: &'a [Node], include_deleted: bool) -> Vec<(&'a Node, i64)> {
    let children = adjacency(nodes, include_deleted);
    let mut reached: HashSet<&str> = HashSet::new();
    let mut order = Vec::new();

    let mut stack: Vec<(&Node, i64)> = children
        .get(&None)
        .map(|roots| roots.iter().rev().map(|n| (*n, 0)).collect())
        .unwrap_or_default();

    while let Some((node, depth)) = stack.pop() {
        if !reached.insert(node.id.as_str()) {
            continue;
        }
        order.push((node, depth));
        if let Some(kids) = children.get(&Some(node.id.as_str())) {
            stack.extend(kids.iter().rev().map(|k| (*k, depth + 1)));
        }
    }

    warn_unreachable(nodes, include_deleted, &reached);
    order
}

/// Nested projection: roots in sibling order, each with its ordered children
///
/// Soft-deleted nodes (and therefore their subtrees) are skipped unless
/// `include_deleted` is set.
pub fn to_nested(nodes: &[Node], include_deleted: bool) -> Vec<NestedNode> {
    let order = walk(nodes, include_deleted);

    // Pre-order means every parent precedes its children; building back to front
    // lets each node collect its finished children before being attached itself.
    let mut finished: HashMap<&str, Vec<NestedNode>> = HashMap::new();
    let mut roots = Vec::new();

    for (node, depth) in order.into_iter().rev() {
        let mut kids = finished.remove(node.id.as_str()).unwrap_or_default();
        kids.reverse();
        let nested = NestedNode {
            node: node.clone(),
            children: kids,
        };

        match node.parent_id.as_deref() {
            Some(parent) if depth > 0 => finished.entry(parent).or_default().push(nested),
            _ => roots.push(nested),
        }
    }

    roots.reverse();
    roots
}

/// Flat pre-order projection with the display depth of each node
pub fn to_flat_with_depth(nodes: &[Node], include_deleted: bool) -> Vec<FlatNode> {
    walk(nodes, include_deleted)
        .into_iter()
        .map(|(node, depth)| FlatNode {
            node: node.clone(),
            depth,
        })
        .collect()
}
