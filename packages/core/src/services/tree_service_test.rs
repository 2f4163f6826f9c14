//! Tests for the mutation engine
//!
//! Every test runs against `MemoryStore`; the libsql backend gets the same scenarios in
//! the crate-level integration tests.

#[cfg(test)]
mod tests {
    use crate::db::{MemoryStore, NodeStore, TreeEvent};
    use crate::models::{AttributeUpdate, CascadePolicy, Node, NodeFilter};
    use crate::operations::CreateNodeParams;
    use crate::services::{InvariantViolation, TreeService, TreeServiceError};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    /// Helper to create a service over an empty in-memory store
    fn create_test_service() -> (TreeService<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (TreeService::new(store.clone()), store)
    }

    /// Create a node whose ID, name and code are all `code`
    async fn add(
        service: &TreeService<MemoryStore>,
        tree_type: &str,
        parent: Option<&str>,
        code: &str,
    ) -> Node {
        service
            .create_node(
                CreateNodeParams::new(tree_type, parent.map(str::to_string), code, code)
                    .with_id(code),
            )
            .await
            .unwrap()
    }

    /// Live children of `parent` in sibling order
    async fn children(
        service: &TreeService<MemoryStore>,
        tree_type: &str,
        parent: Option<&str>,
    ) -> Vec<String> {
        service
            .list_nodes(NodeFilter::new(tree_type).with_parent(parent.map(str::to_string)))
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.node.id)
            .collect()
    }

    async fn assert_healthy(service: &TreeService<MemoryStore>, tree_type: &str) {
        let violations = service.verify_partition(tree_type).await.unwrap();
        assert!(violations.is_empty(), "violations: {:?}", violations);
    }

    /// site: r -> [a, x -> [x1, x2], b]
    async fn build_sample(service: &TreeService<MemoryStore>) {
        add(service, "site", None, "r").await;
        add(service, "site", Some("r"), "a").await;
        add(service, "site", Some("r"), "x").await;
        add(service, "site", Some("r"), "b").await;
        add(service, "site", Some("x"), "x1").await;
        add(service, "site", Some("x"), "x2").await;
    }

    // ========================================================================
    // create_node
    // ========================================================================

    #[tokio::test]
    async fn test_create_appends_to_sibling_group() {
        let (service, _store) = create_test_service();

        let first = add(&service, "site", None, "home").await;
        let second = add(&service, "site", None, "about").await;
        let child = add(&service, "site", Some("home"), "news").await;

        assert_eq!(first.sort_order, 0);
        assert_eq!(second.sort_order, 1);
        assert_eq!(child.sort_order, 0);
        assert_eq!(child.depth, 1);
        assert_eq!(child.path, "/home/news");
        assert_eq!(first.path, "/home");
        assert_healthy(&service, "site").await;
    }

    #[tokio::test]
    async fn test_create_generates_uuid_when_no_id_given() {
        let (service, _store) = create_test_service();
        let node = service
            .create_node(CreateNodeParams::new("admin", None, "Dashboard", "dashboard"))
            .await
            .unwrap();

        assert!(uuid::Uuid::parse_str(&node.id).is_ok());
        assert_eq!(node.path, format!("/{}", node.id));
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_code_even_when_deleted() {
        let (service, _store) = create_test_service();
        add(&service, "site", None, "home").await;

        let dup = service
            .create_node(CreateNodeParams::new("site", None, "Home 2", "home"))
            .await;
        assert!(matches!(dup, Err(TreeServiceError::DuplicateCode { .. })));

        service
            .delete_node("home", CascadePolicy::RejectIfChildren)
            .await
            .unwrap();
        let dup = service
            .create_node(CreateNodeParams::new("site", None, "Home 3", "home"))
            .await;
        assert!(matches!(dup, Err(TreeServiceError::DuplicateCode { .. })));

        // Same code in another partition is fine
        let other = service
            .create_node(CreateNodeParams::new("admin", None, "Home", "home"))
            .await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_parents() {
        let (service, _store) = create_test_service();
        add(&service, "site", None, "home").await;
        add(&service, "admin", None, "settings").await;

        let missing = service
            .create_node(CreateNodeParams::new(
                "site",
                Some("nope".to_string()),
                "Child",
                "child",
            ))
            .await;
        assert!(matches!(missing, Err(TreeServiceError::InvalidParent { .. })));

        let foreign = service
            .create_node(CreateNodeParams::new(
                "site",
                Some("settings".to_string()),
                "Child",
                "child",
            ))
            .await;
        match foreign {
            Err(TreeServiceError::InvalidParent { reason, .. }) => {
                assert!(reason.contains("admin"), "reason: {}", reason)
            }
            other => panic!("expected InvalidParent, got {:?}", other),
        }

        service
            .delete_node("home", CascadePolicy::RejectIfChildren)
            .await
            .unwrap();
        let deleted = service
            .create_node(CreateNodeParams::new(
                "site",
                Some("home".to_string()),
                "Child",
                "child",
            ))
            .await;
        assert!(matches!(deleted, Err(TreeServiceError::InvalidParent { .. })));
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let (service, store) = create_test_service();

        let blank = service
            .create_node(CreateNodeParams::new("site", None, "  ", "code"))
            .await;
        assert!(matches!(blank, Err(TreeServiceError::ValidationFailed(_))));

        let slash = service
            .create_node(CreateNodeParams::new("site", None, "Name", "code").with_id("a/b"))
            .await;
        assert!(matches!(slash, Err(TreeServiceError::ValidationFailed(_))));

        let props = service
            .create_node(
                CreateNodeParams::new("site", None, "Name", "code").with_properties(json!([1])),
            )
            .await;
        assert!(matches!(props, Err(TreeServiceError::ValidationFailed(_))));

        assert!(store.is_empty().await);
    }

    // ========================================================================
    // update_attributes
    // ========================================================================

    #[tokio::test]
    async fn test_update_attributes_merges_properties() {
        let (service, _store) = create_test_service();
        service
            .create_node(
                CreateNodeParams::new("site", None, "Home", "home")
                    .with_id("home")
                    .with_properties(json!({"icon": "house", "linkUrl": "/"})),
            )
            .await
            .unwrap();

        let updated = service
            .update_attributes(
                "home",
                AttributeUpdate::new()
                    .with_name("Start".to_string())
                    .with_properties(json!({"icon": null, "isVisible": false})),
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "Start");
        assert_eq!(updated.properties, json!({"linkUrl": "/", "isVisible": false}));
        assert_eq!(updated.sort_order, 0);
        assert_eq!(updated.code, "home");
    }

    #[tokio::test]
    async fn test_update_attributes_json_rejects_structural_fields() {
        let (service, _store) = create_test_service();
        add(&service, "site", None, "home").await;

        for field in ["parentId", "sortOrder", "depth", "path", "treeType", "code"] {
            let mut patch = serde_json::Map::new();
            patch.insert(field.to_string(), json!("x"));
            let result = service
                .update_attributes_json("home", serde_json::Value::Object(patch))
                .await;
            assert!(
                matches!(result, Err(TreeServiceError::StructuralFieldInUpdate { .. })),
                "field {} was accepted",
                field
            );
        }

        let ok = service
            .update_attributes_json("home", json!({"name": "Start"}))
            .await
            .unwrap();
        assert_eq!(ok.name, "Start");
    }

    #[tokio::test]
    async fn test_update_attributes_on_deleted_node_is_not_found() {
        let (service, _store) = create_test_service();
        add(&service, "site", None, "home").await;
        service
            .delete_node("home", CascadePolicy::RejectIfChildren)
            .await
            .unwrap();

        let result = service
            .update_attributes("home", AttributeUpdate::new().with_name("X".to_string()))
            .await;
        assert!(matches!(result, Err(TreeServiceError::NotFound { .. })));
    }

    // ========================================================================
    // move_node
    // ========================================================================

    #[tokio::test]
    async fn test_move_within_parent_reorders() {
        let (service, _store) = create_test_service();
        build_sample(&service).await;

        service.move_node("b", Some("r"), 0).await.unwrap();
        assert_eq!(children(&service, "site", Some("r")).await, vec!["b", "a", "x"]);

        service.move_node("b", Some("r"), 99).await.unwrap();
        assert_eq!(children(&service, "site", Some("r")).await, vec!["a", "x", "b"]);
        assert_healthy(&service, "site").await;
    }

    #[tokio::test]
    async fn test_move_to_same_position_is_noop() {
        let (service, store) = create_test_service();
        build_sample(&service).await;
        let before = store.get_node("a").await.unwrap();
        let mut rx = service.subscribe_to_events();

        service.move_node("a", Some("r"), 0).await.unwrap();

        assert_eq!(store.get_node("a").await.unwrap(), before);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_move_across_parents_updates_subtree() {
        let (service, store) = create_test_service();
        build_sample(&service).await;

        // x (with x1, x2) becomes the second root
        service.move_node("x", None, 1).await.unwrap();

        assert_eq!(children(&service, "site", None).await, vec!["r", "x"]);
        assert_eq!(children(&service, "site", Some("r")).await, vec!["a", "b"]);

        let x1 = store.get_node("x1").await.unwrap();
        assert_eq!(x1.depth, 1);
        assert_eq!(x1.path, "/x/x1");
        assert_eq!(store.get_node("b").await.unwrap().sort_order, 1);
        assert_healthy(&service, "site").await;

        // And back under a, at the front
        service.move_node("x", Some("a"), 0).await.unwrap();
        let x2 = store.get_node("x2").await.unwrap();
        assert_eq!(x2.depth, 3);
        assert_eq!(x2.path, "/r/a/x/x2");
        assert_healthy(&service, "site").await;
    }

    #[tokio::test]
    async fn test_move_into_own_subtree_is_cyclic() {
        let (service, store) = create_test_service();
        build_sample(&service).await;
        let before = store.list_by_tree_type("site", true).await.unwrap();

        let into_self = service.move_node("x", Some("x"), 0).await;
        assert!(matches!(into_self, Err(TreeServiceError::CyclicMove { .. })));

        let into_child = service.move_node("r", Some("x1"), 0).await;
        assert!(matches!(into_child, Err(TreeServiceError::CyclicMove { .. })));

        assert_eq!(store.list_by_tree_type("site", true).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_move_rejects_missing_node_and_foreign_parent() {
        let (service, _store) = create_test_service();
        build_sample(&service).await;
        add(&service, "admin", None, "settings").await;

        let missing = service.move_node("ghost", None, 0).await;
        assert!(matches!(missing, Err(TreeServiceError::NotFound { .. })));

        let foreign = service.move_node("a", Some("settings"), 0).await;
        assert!(matches!(foreign, Err(TreeServiceError::InvalidParent { .. })));
    }

    // ========================================================================
    // delete_node
    // ========================================================================

    #[tokio::test]
    async fn test_delete_reject_if_children() {
        let (service, store) = create_test_service();
        build_sample(&service).await;

        match service.delete_node("x", CascadePolicy::RejectIfChildren).await {
            Err(TreeServiceError::HasChildren { child_count, .. }) => assert_eq!(child_count, 2),
            other => panic!("expected HasChildren, got {:?}", other),
        }
        assert!(!store.get_node("x").await.unwrap().is_deleted);

        service
            .delete_node("a", CascadePolicy::RejectIfChildren)
            .await
            .unwrap();
        assert_eq!(children(&service, "site", Some("r")).await, vec!["x", "b"]);
        assert_eq!(store.get_node("b").await.unwrap().sort_order, 1);
        assert_healthy(&service, "site").await;
    }

    #[tokio::test]
    async fn test_delete_cascade_marks_subtree() {
        let (service, store) = create_test_service();
        build_sample(&service).await;

        service
            .delete_node("x", CascadePolicy::CascadeDelete)
            .await
            .unwrap();

        for id in ["x", "x1", "x2"] {
            assert!(store.get_node(id).await.unwrap().is_deleted, "{} live", id);
        }
        assert_eq!(children(&service, "site", Some("r")).await, vec!["a", "b"]);
        assert!(matches!(
            service.get_node("x1").await,
            Err(TreeServiceError::NotFound { .. })
        ));
        assert_healthy(&service, "site").await;
    }

    #[tokio::test]
    async fn test_delete_reparent_splices_children_into_slot() {
        let (service, store) = create_test_service();
        build_sample(&service).await;
        add(&service, "site", Some("x1"), "x1a").await;

        service
            .delete_node("x", CascadePolicy::ReparentChildrenToGrandparent)
            .await
            .unwrap();

        assert_eq!(
            children(&service, "site", Some("r")).await,
            vec!["a", "x1", "x2", "b"]
        );
        let x1 = store.get_node("x1").await.unwrap();
        assert_eq!(x1.depth, 1);
        assert_eq!(x1.path, "/r/x1");
        let x1a = store.get_node("x1a").await.unwrap();
        assert_eq!(x1a.depth, 2);
        assert_eq!(x1a.path, "/r/x1/x1a");
        assert_healthy(&service, "site").await;
    }

    #[tokio::test]
    async fn test_delete_twice_is_not_found() {
        let (service, _store) = create_test_service();
        add(&service, "site", None, "home").await;
        service
            .delete_node("home", CascadePolicy::RejectIfChildren)
            .await
            .unwrap();

        let again = service
            .delete_node("home", CascadePolicy::RejectIfChildren)
            .await;
        assert!(matches!(again, Err(TreeServiceError::NotFound { .. })));
    }

    // ========================================================================
    // reorder_siblings
    // ========================================================================

    #[tokio::test]
    async fn test_reorder_siblings() {
        let (service, _store) = create_test_service();
        build_sample(&service).await;

        let order = vec!["b".to_string(), "x".to_string(), "a".to_string()];
        service
            .reorder_siblings("site", Some("r"), &order)
            .await
            .unwrap();
        assert_eq!(children(&service, "site", Some("r")).await, order);
        assert_healthy(&service, "site").await;
    }

    #[tokio::test]
    async fn test_reorder_requires_exact_sibling_set() {
        let (service, _store) = create_test_service();
        build_sample(&service).await;

        let cases = [
            vec!["a", "x"],
            vec!["a", "x", "b", "x1"],
            vec!["a", "x", "x"],
            vec!["a", "a", "x", "b"],
        ];
        for ids in cases {
            let ids: Vec<String> = ids.into_iter().map(str::to_string).collect();
            let result = service.reorder_siblings("site", Some("r"), &ids).await;
            assert!(
                matches!(result, Err(TreeServiceError::SiblingSetMismatch { .. })),
                "accepted {:?}",
                ids
            );
        }
        assert_eq!(children(&service, "site", Some("r")).await, vec!["a", "x", "b"]);
    }

    #[tokio::test]
    async fn test_reorder_empty_group_is_noop() {
        let (service, _store) = create_test_service();
        build_sample(&service).await;

        assert!(service.reorder_siblings("site", Some("a"), &[]).await.is_ok());
        let result = service
            .reorder_siblings("site", Some("a"), &["b".to_string()])
            .await;
        assert!(matches!(result, Err(TreeServiceError::SiblingSetMismatch { .. })));
    }

    #[tokio::test]
    async fn test_reorder_repairs_corrupted_sibling_orders() {
        let mut first = Node::new_with_id(
            "first".to_string(),
            "site".to_string(),
            None,
            "First".to_string(),
            "first".to_string(),
            json!({}),
        );
        first.sort_order = 0;
        let mut second = first.clone();
        second.id = "second".to_string();
        second.code = "second".to_string();
        second.path = "/second".to_string();
        second.sort_order = 5;

        let store = Arc::new(MemoryStore::from_nodes(vec![first, second]));
        let service = TreeService::new(store.clone());
        assert!(matches!(
            service.verify_partition("site").await.unwrap().as_slice(),
            [InvariantViolation::SiblingOrder { .. }]
        ));

        service
            .reorder_siblings("site", None, &["second".to_string(), "first".to_string()])
            .await
            .unwrap();

        assert_eq!(store.get_node("second").await.unwrap().sort_order, 0);
        assert_eq!(store.get_node("first").await.unwrap().sort_order, 1);
        assert!(service.verify_partition("site").await.unwrap().is_empty());
    }

    // ========================================================================
    // purge_node
    // ========================================================================

    #[tokio::test]
    async fn test_purge_requires_deleted_subtree() {
        let (service, store) = create_test_service();
        build_sample(&service).await;

        match service.purge_node("x").await {
            Err(TreeServiceError::NotDeleted { live_count, .. }) => assert_eq!(live_count, 3),
            other => panic!("expected NotDeleted, got {:?}", other),
        }

        service
            .delete_node("x", CascadePolicy::CascadeDelete)
            .await
            .unwrap();
        assert_eq!(service.purge_node("x").await.unwrap(), 3);

        assert_eq!(store.len().await, 3);
        assert!(matches!(
            service.purge_node("x").await,
            Err(TreeServiceError::NotFound { .. })
        ));
        assert_healthy(&service, "site").await;
    }

    // ========================================================================
    // Reads
    // ========================================================================

    #[tokio::test]
    async fn test_list_nodes_resolves_parent_names() {
        let (service, _store) = create_test_service();
        build_sample(&service).await;

        let items = service.list_nodes(NodeFilter::new("site")).await.unwrap();
        assert_eq!(items.len(), 6);
        let x1 = items.iter().find(|i| i.node.id == "x1").unwrap();
        assert_eq!(x1.parent_name.as_deref(), Some("x"));
        let r = items.iter().find(|i| i.node.id == "r").unwrap();
        assert_eq!(r.parent_name, None);

        service
            .delete_node("a", CascadePolicy::RejectIfChildren)
            .await
            .unwrap();
        let live = service.list_nodes(NodeFilter::new("site")).await.unwrap();
        assert_eq!(live.len(), 5);
        let all = service
            .list_nodes(NodeFilter::new("site").with_deleted(true))
            .await
            .unwrap();
        assert_eq!(all.len(), 6);
    }

    #[tokio::test]
    async fn test_tree_and_flat_views_agree() {
        let (service, _store) = create_test_service();
        build_sample(&service).await;

        let tree = service.get_tree("site", false).await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].subtree_len(), 6);

        let flat: Vec<(String, i64)> = service
            .get_flat_list("site", false)
            .await
            .unwrap()
            .into_iter()
            .map(|f| (f.node.id, f.depth))
            .collect();
        let expected: Vec<(String, i64)> = [
            ("r", 0),
            ("a", 1),
            ("x", 1),
            ("x1", 2),
            ("x2", 2),
            ("b", 1),
        ]
        .into_iter()
        .map(|(id, depth)| (id.to_string(), depth))
        .collect();
        assert_eq!(flat, expected);
    }

    // ========================================================================
    // Locking and events
    // ========================================================================

    #[tokio::test]
    async fn test_structural_operations_time_out_on_held_partition() {
        let (service, _store) = create_test_service();
        build_sample(&service).await;
        let impatient = service.with_lock_timeout(Duration::from_millis(20));

        let guard = service.lock_partition("site").await.unwrap();

        let result = impatient.move_node("b", Some("r"), 0).await;
        assert!(matches!(result, Err(TreeServiceError::LockTimeout { .. })));
        assert!(result.unwrap_err().is_retryable());

        // Attribute updates and other partitions are unaffected
        assert!(impatient
            .update_attributes("a", AttributeUpdate::new().with_name("A".to_string()))
            .await
            .is_ok());
        assert!(impatient
            .create_node(CreateNodeParams::new("admin", None, "Settings", "settings"))
            .await
            .is_ok());

        drop(guard);
        assert!(impatient.move_node("b", Some("r"), 0).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_creates_get_distinct_orders() {
        let (service, _store) = create_test_service();

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .create_node(CreateNodeParams::new(
                            "site",
                            None,
                            format!("Item {}", i),
                            format!("item-{}", i),
                        ))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut orders: Vec<i64> = service
            .list_nodes(NodeFilter::new("site"))
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.node.sort_order)
            .collect();
        orders.sort_unstable();
        assert_eq!(orders, (0..10).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_events_emitted_after_commit() {
        let (service, _store) = create_test_service();
        let mut rx = service.subscribe_to_events();

        let root = add(&service, "site", None, "r").await;
        add(&service, "site", Some("r"), "a").await;
        add(&service, "site", Some("r"), "b").await;
        service.move_node("b", Some("r"), 0).await.unwrap();
        service.move_node("a", None, 1).await.unwrap();
        service
            .delete_node("a", CascadePolicy::RejectIfChildren)
            .await
            .unwrap();
        service.purge_node("a").await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let kinds: Vec<&str> = events.iter().map(TreeEvent::event_type).collect();
        assert_eq!(
            kinds,
            vec![
                "node:created",
                "node:created",
                "node:created",
                "siblings:reordered",
                "hierarchy:changed",
                "nodes:deleted",
                "nodes:purged",
            ]
        );
        assert!(matches!(&events[0], TreeEvent::NodeCreated { node } if node == &root));
        assert!(matches!(
            &events[3],
            TreeEvent::SiblingsReordered { ordered_ids, .. } if ordered_ids == &["b", "a"]
        ));
    }

    #[tokio::test]
    async fn test_failed_operation_emits_nothing() {
        let (service, _store) = create_test_service();
        build_sample(&service).await;
        let mut rx = service.subscribe_to_events();

        let _ = service.move_node("r", Some("x1"), 0).await;
        let _ = service.delete_node("x", CascadePolicy::RejectIfChildren).await;
        let _ = service.reorder_siblings("site", Some("r"), &[]).await;

        assert!(rx.try_recv().is_err());
    }
}
