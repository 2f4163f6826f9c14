//! Tree Service - Mutation Engine
//!
//! `TreeService` is the only component that changes tree structure. Every operation
//! follows the same shape:
//!
//! 1. Take the partition lock (structural operations only)
//! 2. Read the partition revision, then load the partition into a `PartitionIndex`
//! 3. Validate the request and compute every touched row as a `NodePatch`
//! 4. Run the invariant checker on the candidate post-state
//! 5. Commit all patches in one atomic `commit_partition`, guarded by the revision
//! 6. Emit a `TreeEvent`
//!
//! The lock lives in the store, so services sharing a store serialize. The revision
//! guard covers writers the lock cannot see (another process on the same database):
//! if the partition moved since step 2, step 5 fails with `StaleState` and nothing is
//! written. An error at any step leaves storage untouched.

use crate::config::EngineConfig;
use crate::db::{DatabaseError, NodeStore, PartitionGuard, PartitionWrite, TreeEvent};
use crate::models::{
    validate_tree_type, AttributeUpdate, CascadePolicy, FlatNode, NestedNode, Node, NodeFilter,
    NodeListItem, NodePatch,
};
use crate::operations::CreateNodeParams;
use crate::services::invariants::{
    check_partition, compute_depth, compute_path, is_descendant, InvariantViolation,
    PartitionIndex,
};
use crate::services::tree_assembler::{to_flat_with_depth, to_nested};
use crate::services::TreeServiceError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Default broadcast capacity when no `EngineConfig` is given
const DOMAIN_EVENT_CHANNEL_CAPACITY: usize = 128;

/// Default partition lock deadline when no `EngineConfig` is given
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Patches keyed by node ID, merged per node, in first-touched order
#[derive(Debug, Default)]
struct PatchSet {
    order: Vec<String>,
    patches: HashMap<String, NodePatch>,
}

impl PatchSet {
    fn entry(&mut self, id: &str) -> &mut NodePatch {
        if !self.patches.contains_key(id) {
            self.order.push(id.to_string());
        }
        self.patches.entry(id.to_string()).or_default()
    }

    fn into_updates(mut self) -> Vec<(String, NodePatch)> {
        self.order
            .into_iter()
            .filter_map(|id| {
                let patch = self.patches.remove(&id)?;
                (!patch.is_empty()).then_some((id, patch))
            })
            .collect()
    }
}

/// Give `siblings` the orders `0..n-1` in slice order, patching only what changes
fn assign_orders(set: &mut PatchSet, siblings: &[&Node]) {
    for (position, node) in siblings.iter().enumerate() {
        let position = position as i64;
        if node.sort_order != position {
            set.entry(&node.id).sort_order = Some(position);
        }
    }
}

/// Re-home `root` under `new_parent` and recompute depth and path for its whole
/// subtree, deleted descendants included
fn relocate_subtree(
    set: &mut PatchSet,
    index: &PartitionIndex,
    root: &Node,
    new_parent: Option<&Node>,
) {
    let new_parent_id = new_parent.map(|p| p.id.clone());
    if root.parent_id != new_parent_id {
        set.entry(&root.id).parent_id = Some(new_parent_id);
    }

    let mut stack: Vec<(&Node, i64, String)> = vec![(
        root,
        compute_depth(new_parent.map(|p| p.depth)),
        compute_path(new_parent.map(|p| p.path.as_str()), &root.id),
    )];
    let mut visited = 0;

    while let Some((node, depth, path)) = stack.pop() {
        visited += 1;
        if visited > index.len() {
            break;
        }

        for child in index.children(Some(&node.id)) {
            stack.push((child, depth + 1, compute_path(Some(&path), &child.id)));
        }
        if node.depth != depth {
            set.entry(&node.id).depth = Some(depth);
        }
        if node.path != path {
            set.entry(&node.id).path = Some(path);
        }
    }
}

/// The partition as it would look after `updates`
fn candidate_state(nodes: &[Node], updates: &[(String, NodePatch)]) -> Vec<Node> {
    let patches: HashMap<&str, &NodePatch> =
        updates.iter().map(|(id, p)| (id.as_str(), p)).collect();
    nodes
        .iter()
        .cloned()
        .map(|mut node| {
            if let Some(patch) = patches.get(node.id.as_str()) {
                node.apply_patch(patch);
            }
            node
        })
        .collect()
}

fn live_without<'a>(siblings: Vec<&'a Node>, id: &str) -> Vec<&'a Node> {
    siblings.into_iter().filter(|n| n.id != id).collect()
}

fn ids_of(nodes: &[&Node]) -> Vec<String> {
    nodes.iter().map(|n| n.id.clone()).collect()
}

/// Hierarchical tree management service
///
/// Generic over the storage backend; `TreeService<dyn NodeStore>` works as well as a
/// concrete store type. Cloning is cheap and clones share the store and the event
/// channel. Partition locks belong to the store, so separately constructed services
/// over one store still exclude each other.
///
/// # Examples
///
/// ```no_run
/// # use menutree_core::db::MemoryStore;
/// # use menutree_core::models::CascadePolicy;
/// # use menutree_core::operations::CreateNodeParams;
/// # use menutree_core::services::TreeService;
/// # use std::sync::Arc;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let service = TreeService::new(Arc::new(MemoryStore::new()));
///
/// let home = service
///     .create_node(CreateNodeParams::new("site", None, "Home", "home"))
///     .await?;
/// let about = service
///     .create_node(CreateNodeParams::new("site", Some(home.id.clone()), "About", "about"))
///     .await?;
///
/// service.move_node(&about.id, None, 0).await?;
/// service.delete_node(&home.id, CascadePolicy::RejectIfChildren).await?;
///
/// for entry in service.get_flat_list("site", false).await? {
///     println!("{}{}", "  ".repeat(entry.depth as usize), entry.node.name);
/// }
/// # Ok(())
/// # }
/// ```
pub struct TreeService<S: NodeStore + ?Sized = dyn NodeStore> {
    store: Arc<S>,

    lock_timeout: Duration,

    /// Broadcast channel for domain events
    event_tx: broadcast::Sender<TreeEvent>,
}

// Manual Clone implementation because S doesn't need to be Clone
impl<S: NodeStore + ?Sized> Clone for TreeService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            lock_timeout: self.lock_timeout,
            event_tx: self.event_tx.clone(),
        }
    }
}

impl<S: NodeStore + ?Sized> TreeService<S> {
    /// Create a service with default lock timeout and event capacity
    pub fn new(store: Arc<S>) -> Self {
        let (event_tx, _) = broadcast::channel(DOMAIN_EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            event_tx,
        }
    }

    /// Create a service from an already validated configuration
    pub fn with_config(store: Arc<S>, config: &EngineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            store,
            lock_timeout: config.lock_timeout(),
            event_tx,
        }
    }

    /// Clone of this service with a different partition lock deadline
    ///
    /// The clone still shares the store and events with the original.
    pub fn with_lock_timeout(&self, timeout: Duration) -> Self {
        let mut cloned = self.clone();
        cloned.lock_timeout = timeout;
        cloned
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Get access to the underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Subscribe to domain events
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use menutree_core::db::MemoryStore;
    /// # use menutree_core::services::TreeService;
    /// # use std::sync::Arc;
    /// # #[tokio::main]
    /// # async fn main() {
    /// let service = TreeService::new(Arc::new(MemoryStore::new()));
    /// let mut rx = service.subscribe_to_events();
    /// tokio::spawn(async move {
    ///     while let Ok(event) = rx.recv().await {
    ///         println!("{}: {:?}", event.event_type(), event);
    ///     }
    /// });
    /// # }
    /// ```
    pub fn subscribe_to_events(&self) -> broadcast::Receiver<TreeEvent> {
        self.event_tx.subscribe()
    }

    /// Ignores send errors; having no subscribers is normal
    fn emit_event(&self, event: TreeEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Hold a partition exclusively, e.g. for a consistent export
    ///
    /// Structural operations on the partition wait (and eventually time out) until the
    /// returned guard is dropped.
    pub async fn lock_partition(&self, tree_type: &str) -> Result<PartitionGuard, TreeServiceError> {
        validate_tree_type(tree_type)?;
        self.acquire(tree_type).await
    }

    async fn acquire(&self, tree_type: &str) -> Result<PartitionGuard, TreeServiceError> {
        Ok(self
            .store
            .partition_locks()
            .acquire(tree_type, self.lock_timeout)
            .await?)
    }

    /// Revision first: a write landing between the two reads makes the commit stale
    /// rather than letting it pass on mixed state
    async fn load_index(&self, tree_type: &str) -> Result<(i64, PartitionIndex), TreeServiceError> {
        let revision = self.store.partition_revision(tree_type).await?;
        let nodes = self.store.list_by_tree_type(tree_type, true).await?;
        Ok((revision, PartitionIndex::new(nodes)))
    }

    /// Partition of a live node, read before the lock is taken
    async fn live_tree_type(&self, id: &str) -> Result<String, TreeServiceError> {
        let node = self.store.get_node(id).await?;
        if node.is_deleted {
            return Err(TreeServiceError::not_found(id));
        }
        Ok(node.tree_type)
    }

    async fn resolve_parent<'a>(
        &self,
        index: &'a PartitionIndex,
        tree_type: &str,
        parent_id: &str,
    ) -> Result<&'a Node, TreeServiceError> {
        match index.get(parent_id) {
            Some(parent) if parent.is_deleted => Err(TreeServiceError::invalid_parent(
                parent_id,
                "parent is deleted",
            )),
            Some(parent) => Ok(parent),
            None => match self.store.get_node(parent_id).await {
                Ok(other) => Err(TreeServiceError::invalid_parent(
                    parent_id,
                    format!(
                        "parent belongs to tree type '{}', not '{}'",
                        other.tree_type, tree_type
                    ),
                )),
                Err(DatabaseError::NotFound { .. }) => Err(TreeServiceError::invalid_parent(
                    parent_id,
                    "parent does not exist",
                )),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Refuse a candidate state that introduces new invariant violations
    ///
    /// Violations already present before the mutation are tolerated so a damaged
    /// partition can still be repaired through normal operations.
    fn check_candidate(&self, before: &[Node], after: &[Node]) -> Result<(), TreeServiceError> {
        let after_violations = match check_partition(after) {
            Ok(()) => return Ok(()),
            Err(violations) => violations,
        };
        let before_violations = check_partition(before).err().unwrap_or_default();

        let introduced: Vec<InvariantViolation> = after_violations
            .into_iter()
            .filter(|v| !before_violations.contains(v))
            .collect();

        if introduced.is_empty() {
            tracing::warn!(
                count = before_violations.len(),
                "partition has pre-existing invariant violations"
            );
            return Ok(());
        }

        tracing::warn!(violations = ?introduced, "mutation rejected by invariant check");
        Err(TreeServiceError::InvariantViolation(introduced))
    }

    async fn commit(
        &self,
        tree_type: &str,
        revision: i64,
        index: &PartitionIndex,
        updates: Vec<(String, NodePatch)>,
    ) -> Result<(), TreeServiceError> {
        let candidate = candidate_state(index.nodes(), &updates);
        self.check_candidate(index.nodes(), &candidate)?;
        self.write(tree_type, revision, PartitionWrite::Update(updates))
            .await
    }

    async fn write(
        &self,
        tree_type: &str,
        revision: i64,
        write: PartitionWrite,
    ) -> Result<(), TreeServiceError> {
        match self.store.commit_partition(tree_type, revision, write).await {
            Ok(_) => Ok(()),
            Err(e @ DatabaseError::StaleRevision { .. }) => {
                tracing::warn!(tree_type, error = %e, "partition changed under a structural mutation");
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    //
    // MUTATIONS
    //

    /// Create a node at the end of its sibling group
    ///
    /// # Errors
    ///
    /// - `ValidationFailed`: blank tree type, name or code, non-object properties,
    ///   or an ID containing `/`
    /// - `InvalidParent`: parent missing, deleted, or in another partition
    /// - `DuplicateCode`: code already used in the partition (deleted nodes included)
    /// - `LockTimeout`, `StaleState`
    pub async fn create_node(&self, params: CreateNodeParams) -> Result<Node, TreeServiceError> {
        validate_tree_type(&params.tree_type)?;

        let mut node = match params.id {
            Some(id) => Node::new_with_id(
                id,
                params.tree_type,
                params.parent_id,
                params.name,
                params.code,
                params.properties,
            ),
            None => Node::new(
                params.tree_type,
                params.parent_id,
                params.name,
                params.code,
                params.properties,
            ),
        };
        node.validate()?;

        let _guard = self.acquire(&node.tree_type).await?;
        let (revision, index) = self.load_index(&node.tree_type).await?;

        if index.nodes().iter().any(|n| n.code == node.code) {
            return Err(TreeServiceError::DuplicateCode {
                tree_type: node.tree_type.clone(),
                code: node.code.clone(),
            });
        }

        let parent = match node.parent_id.as_deref() {
            Some(parent_id) => Some(
                self.resolve_parent(&index, &node.tree_type, parent_id)
                    .await?,
            ),
            None => None,
        };

        node.depth = compute_depth(parent.map(|p| p.depth));
        node.path = compute_path(parent.map(|p| p.path.as_str()), &node.id);
        node.sort_order = index
            .live_children(node.parent_id.as_deref())
            .iter()
            .map(|n| n.sort_order)
            .max()
            .map_or(0, |max| max + 1);

        let mut candidate = index.nodes().to_vec();
        candidate.push(node.clone());
        self.check_candidate(index.nodes(), &candidate)?;

        self.write(&node.tree_type, revision, PartitionWrite::Insert(node.clone()))
            .await?;
        let created = node;
        tracing::debug!(
            id = %created.id,
            tree_type = %created.tree_type,
            parent_id = ?created.parent_id,
            sort_order = created.sort_order,
            "node created"
        );

        self.emit_event(TreeEvent::NodeCreated {
            node: created.clone(),
        });
        Ok(created)
    }

    /// Change display attributes; structure is never touched
    ///
    /// `properties` is merged shallowly into the stored object and `null` values
    /// remove keys. The merge runs inside the store's write against the current row,
    /// so concurrent updates of different keys all survive. Takes no partition lock.
    ///
    /// # Errors
    ///
    /// `NotFound` for missing or soft-deleted nodes, `ValidationFailed` for a blank
    /// name or non-object properties.
    pub async fn update_attributes(
        &self,
        id: &str,
        update: AttributeUpdate,
    ) -> Result<Node, TreeServiceError> {
        update.validate()?;

        let current = self.store.get_node(id).await?;
        if current.is_deleted {
            return Err(TreeServiceError::not_found(id));
        }
        if update.is_empty() {
            return Ok(current);
        }

        let patch = NodePatch {
            name: update.name,
            merge_properties: update.properties,
            ..NodePatch::default()
        };

        let updated = self.store.update_fields(id, patch).await?;
        tracing::debug!(id, "node attributes updated");

        self.emit_event(TreeEvent::NodeUpdated {
            node: updated.clone(),
        });
        Ok(updated)
    }

    /// Parse a raw JSON patch and apply it as an attribute update
    ///
    /// # Errors
    ///
    /// `StructuralFieldInUpdate` if the patch names a structural or engine-managed
    /// field, plus everything [`TreeService::update_attributes`] returns.
    pub async fn update_attributes_json(
        &self,
        id: &str,
        patch: serde_json::Value,
    ) -> Result<Node, TreeServiceError> {
        let update = AttributeUpdate::from_json(patch)?;
        self.update_attributes(id, update).await
    }

    /// Soft-delete a node, handling its children according to `policy`
    ///
    /// The old sibling group is renumbered to close the gap in every policy.
    ///
    /// # Errors
    ///
    /// - `NotFound`: missing or already deleted
    /// - `HasChildren`: `RejectIfChildren` with live children
    /// - `LockTimeout`, `StaleState`
    pub async fn delete_node(
        &self,
        id: &str,
        policy: CascadePolicy,
    ) -> Result<(), TreeServiceError> {
        let tree_type = self.live_tree_type(id).await?;
        let _guard = self.acquire(&tree_type).await?;
        let (revision, index) = self.load_index(&tree_type).await?;

        let node = index
            .get_live(id)
            .ok_or_else(|| TreeServiceError::not_found(id))?;
        let parent_id = node.parent_id.as_deref();
        let children = index.live_children(Some(id));
        let siblings = index.live_children(parent_id);
        let slot = siblings
            .iter()
            .position(|n| n.id == id)
            .unwrap_or(siblings.len());
        let mut remaining = live_without(siblings, id);

        let mut set = PatchSet::default();
        let mut deleted_ids = vec![id.to_string()];
        let mut moved_ids = Vec::new();

        match policy {
            CascadePolicy::RejectIfChildren => {
                if !children.is_empty() {
                    return Err(TreeServiceError::HasChildren {
                        id: id.to_string(),
                        child_count: children.len(),
                    });
                }
                set.entry(id).is_deleted = Some(true);
                assign_orders(&mut set, &remaining);
            }
            CascadePolicy::CascadeDelete => {
                deleted_ids = index.subtree_ids(id, false);
                for deleted in &deleted_ids {
                    set.entry(deleted).is_deleted = Some(true);
                }
                assign_orders(&mut set, &remaining);
            }
            CascadePolicy::ReparentChildrenToGrandparent => {
                set.entry(id).is_deleted = Some(true);

                let tail = remaining.split_off(slot.min(remaining.len()));
                remaining.extend(children.iter().copied());
                remaining.extend(tail);
                assign_orders(&mut set, &remaining);

                let grandparent = parent_id.and_then(|p| index.get(p));
                for child in &children {
                    relocate_subtree(&mut set, &index, child, grandparent);
                    moved_ids.extend(index.subtree_ids(&child.id, true));
                }
            }
        }

        self.commit(&tree_type, revision, &index, set.into_updates())
            .await?;
        tracing::debug!(id, %tree_type, %policy, deleted = deleted_ids.len(), "node deleted");

        self.emit_event(TreeEvent::NodesDeleted {
            tree_type: tree_type.clone(),
            ids: deleted_ids,
        });
        if !moved_ids.is_empty() {
            self.emit_event(TreeEvent::HierarchyChanged {
                tree_type,
                moved_ids,
            });
        }
        Ok(())
    }

    /// Move a node (with its subtree) under `new_parent_id` at `target_index`
    ///
    /// `target_index` is a position in the destination sibling list *after* the node
    /// has been removed from its old place, clamped to `[0, sibling_count]`.
    ///
    /// # Errors
    ///
    /// - `NotFound`: node missing or deleted
    /// - `InvalidParent`: new parent missing, deleted, or in another partition
    /// - `CyclicMove`: new parent is the node itself or one of its descendants
    /// - `LockTimeout`, `StaleState`
    pub async fn move_node(
        &self,
        id: &str,
        new_parent_id: Option<&str>,
        target_index: usize,
    ) -> Result<(), TreeServiceError> {
        let tree_type = self.live_tree_type(id).await?;
        let _guard = self.acquire(&tree_type).await?;
        let (revision, index) = self.load_index(&tree_type).await?;

        let node = index
            .get_live(id)
            .ok_or_else(|| TreeServiceError::not_found(id))?;

        if new_parent_id == Some(id) {
            return Err(TreeServiceError::cyclic_move(id, id));
        }

        let new_parent = match new_parent_id {
            Some(parent_id) => Some(self.resolve_parent(&index, &tree_type, parent_id).await?),
            None => None,
        };

        // Checked against the pre-move state
        if let Some(parent) = new_parent {
            if is_descendant(&index, id, &parent.id) {
                return Err(TreeServiceError::cyclic_move(id, &parent.id));
            }
        }

        let old_parent_id = node.parent_id.as_deref();
        let same_parent = old_parent_id == new_parent_id;

        let mut destination = live_without(index.live_children(new_parent_id), id);
        let target = target_index.min(destination.len());
        destination.insert(target, node);

        let mut set = PatchSet::default();
        if !same_parent {
            let origin = live_without(index.live_children(old_parent_id), id);
            assign_orders(&mut set, &origin);
            relocate_subtree(&mut set, &index, node, new_parent);
        }
        assign_orders(&mut set, &destination);

        let updates = set.into_updates();
        if updates.is_empty() {
            tracing::debug!(id, "move is a no-op");
            return Ok(());
        }

        self.commit(&tree_type, revision, &index, updates).await?;
        tracing::debug!(id, %tree_type, new_parent_id = ?new_parent_id, target, "node moved");

        if same_parent {
            self.emit_event(TreeEvent::SiblingsReordered {
                tree_type,
                parent_id: new_parent_id.map(str::to_string),
                ordered_ids: ids_of(&destination),
            });
        } else {
            self.emit_event(TreeEvent::HierarchyChanged {
                tree_type,
                moved_ids: index.subtree_ids(id, true),
            });
        }
        Ok(())
    }

    /// Renumber one sibling group to exactly the given order
    ///
    /// # Errors
    ///
    /// `SiblingSetMismatch` unless `ordered_ids` is a permutation of the current live
    /// children of `parent_id` in `tree_type`; `LockTimeout`, `StaleState`.
    pub async fn reorder_siblings(
        &self,
        tree_type: &str,
        parent_id: Option<&str>,
        ordered_ids: &[String],
    ) -> Result<(), TreeServiceError> {
        validate_tree_type(tree_type)?;
        let _guard = self.acquire(tree_type).await?;
        let (revision, index) = self.load_index(tree_type).await?;

        let current = index.live_children(parent_id);
        let current_ids: HashSet<&str> = current.iter().map(|n| n.id.as_str()).collect();

        let mut seen: HashSet<&str> = HashSet::new();
        let duplicates: Vec<&str> = ordered_ids
            .iter()
            .map(String::as_str)
            .filter(|id| !seen.insert(*id))
            .collect();
        let extra: Vec<&str> = seen
            .iter()
            .copied()
            .filter(|id| !current_ids.contains(id))
            .collect();
        let missing: Vec<&str> = current_ids
            .iter()
            .copied()
            .filter(|id| !seen.contains(id))
            .collect();

        if !duplicates.is_empty() || !extra.is_empty() || !missing.is_empty() {
            return Err(TreeServiceError::sibling_set_mismatch(
                tree_type,
                parent_id,
                format!(
                    "missing {:?}, unexpected {:?}, duplicated {:?}",
                    missing, extra, duplicates
                ),
            ));
        }

        let by_id: HashMap<&str, &Node> = current.iter().map(|n| (n.id.as_str(), *n)).collect();
        let ordered: Vec<&Node> = ordered_ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).copied())
            .collect();

        let mut set = PatchSet::default();
        assign_orders(&mut set, &ordered);
        let updates = set.into_updates();
        if updates.is_empty() {
            return Ok(());
        }

        self.commit(tree_type, revision, &index, updates).await?;
        tracing::debug!(tree_type, parent_id = ?parent_id, count = ordered.len(), "siblings reordered");

        self.emit_event(TreeEvent::SiblingsReordered {
            tree_type: tree_type.to_string(),
            parent_id: parent_id.map(str::to_string),
            ordered_ids: ordered_ids.to_vec(),
        });
        Ok(())
    }

    /// Permanently remove a soft-deleted node and its whole subtree
    ///
    /// # Returns
    ///
    /// Number of rows removed.
    ///
    /// # Errors
    ///
    /// `NotFound` if the node does not exist, `NotDeleted` if the node or any of its
    /// descendants is still live, `LockTimeout`, `StaleState`.
    pub async fn purge_node(&self, id: &str) -> Result<usize, TreeServiceError> {
        let tree_type = self.store.get_node(id).await?.tree_type;
        let _guard = self.acquire(&tree_type).await?;
        let (revision, index) = self.load_index(&tree_type).await?;

        if index.get(id).is_none() {
            return Err(TreeServiceError::not_found(id));
        }

        let subtree = index.subtree_ids(id, true);
        let live_count = subtree
            .iter()
            .filter_map(|sid| index.get(sid))
            .filter(|n| !n.is_deleted)
            .count();
        if live_count > 0 {
            return Err(TreeServiceError::NotDeleted {
                id: id.to_string(),
                live_count,
            });
        }

        let doomed: HashSet<&str> = subtree.iter().map(String::as_str).collect();
        let candidate: Vec<Node> = index
            .nodes()
            .iter()
            .filter(|n| !doomed.contains(n.id.as_str()))
            .cloned()
            .collect();
        self.check_candidate(index.nodes(), &candidate)?;

        self.write(&tree_type, revision, PartitionWrite::Purge(subtree.clone()))
            .await?;
        let removed = subtree.len();
        tracing::debug!(id, %tree_type, removed, "subtree purged");

        self.emit_event(TreeEvent::NodesPurged {
            tree_type,
            ids: subtree,
        });
        Ok(removed)
    }

    //
    // READS
    //

    /// Get a live node by ID
    ///
    /// # Errors
    ///
    /// `NotFound` for missing or soft-deleted nodes.
    pub async fn get_node(&self, id: &str) -> Result<Node, TreeServiceError> {
        let node = self.store.get_node(id).await?;
        if node.is_deleted {
            return Err(TreeServiceError::not_found(id));
        }
        Ok(node)
    }

    /// Flat listing ordered by parent then sort order, with parent names resolved
    pub async fn list_nodes(&self, filter: NodeFilter) -> Result<Vec<NodeListItem>, TreeServiceError> {
        validate_tree_type(&filter.tree_type)?;

        let nodes = self.store.list_by_tree_type(&filter.tree_type, true).await?;
        let names: HashMap<&str, &str> = nodes
            .iter()
            .map(|n| (n.id.as_str(), n.name.as_str()))
            .collect();

        Ok(nodes
            .iter()
            .filter(|n| filter.include_deleted || !n.is_deleted)
            .filter(|n| match &filter.parent_id {
                None => true,
                Some(parent) => n.parent_id == *parent,
            })
            .map(|n| NodeListItem {
                node: n.clone(),
                parent_name: n
                    .parent_id
                    .as_deref()
                    .and_then(|p| names.get(p))
                    .map(|name| name.to_string()),
            })
            .collect())
    }

    /// Nested view of a partition
    pub async fn get_tree(
        &self,
        tree_type: &str,
        include_deleted: bool,
    ) -> Result<Vec<NestedNode>, TreeServiceError> {
        validate_tree_type(tree_type)?;
        let nodes = self
            .store
            .list_by_tree_type(tree_type, include_deleted)
            .await?;
        Ok(to_nested(&nodes, include_deleted))
    }

    /// Pre-order flat view of a partition with display depths
    pub async fn get_flat_list(
        &self,
        tree_type: &str,
        include_deleted: bool,
    ) -> Result<Vec<FlatNode>, TreeServiceError> {
        validate_tree_type(tree_type)?;
        let nodes = self
            .store
            .list_by_tree_type(tree_type, include_deleted)
            .await?;
        Ok(to_flat_with_depth(&nodes, include_deleted))
    }

    /// Full invariant audit of a partition; an empty list means healthy
    pub async fn verify_partition(
        &self,
        tree_type: &str,
    ) -> Result<Vec<InvariantViolation>, TreeServiceError> {
        validate_tree_type(tree_type)?;
        let nodes = self.store.list_by_tree_type(tree_type, true).await?;
        let violations = check_partition(&nodes).err().unwrap_or_default();
        if !violations.is_empty() {
            tracing::warn!(tree_type, count = violations.len(), "partition failed verification");
        }
        Ok(violations)
    }
}

// Comprehensive tests in separate module
#[cfg(test)]
#[path = "tree_service_test.rs"]
mod tree_service_test;
