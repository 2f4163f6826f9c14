//! NodeStore Contract Tests
//!
//! The same scenarios run against `MemoryStore` and `TursoStore`; both backends must
//! behave identically for everything the mutation engine relies on.

#[cfg(test)]
mod store_contract_tests {
    use anyhow::Result;
    use menutree_core::db::{DatabaseError, MemoryStore, NodeStore, PartitionWrite, TursoStore};
    use menutree_core::models::{Node, NodePatch};
    use serde_json::json;
    use tempfile::TempDir;

    /// Helper to create a libsql store in a fresh directory
    async fn create_turso_store() -> Result<(TursoStore, TempDir)> {
        let temp_dir = TempDir::new()?;
        let store = TursoStore::new(temp_dir.path().join("contract.db")).await?;
        Ok((store, temp_dir))
    }

    fn node(id: &str, parent: Option<&str>, order: i64) -> Node {
        let mut node = Node::new_with_id(
            id.to_string(),
            "site".to_string(),
            parent.map(str::to_string),
            format!("Entry {}", id),
            id.to_string(),
            json!({"linkUrl": format!("/{}", id)}),
        );
        node.sort_order = order;
        if let Some(parent) = parent {
            node.depth = 1;
            node.path = format!("/{}/{}", parent, id);
        }
        node
    }

    async fn insert_and_list(store: &dyn NodeStore) -> Result<()> {
        store.insert_node(node("r", None, 0)).await?;
        store.insert_node(node("b", Some("r"), 1)).await?;
        store.insert_node(node("a", Some("r"), 0)).await?;
        store.insert_node(node("s", None, 1)).await?;

        let fetched = store.get_node("a").await?;
        assert_eq!(fetched.path, "/r/a");
        assert_eq!(fetched.properties, json!({"linkUrl": "/a"}));

        // Roots first, then by parent and sort order
        let ids: Vec<String> = store
            .list_by_tree_type("site", false)
            .await?
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec!["r", "s", "a", "b"]);

        assert!(store.list_by_tree_type("admin", true).await?.is_empty());
        assert!(matches!(
            store.get_node("missing").await,
            Err(DatabaseError::NotFound { .. })
        ));
        Ok(())
    }

    async fn uniqueness(store: &dyn NodeStore) -> Result<()> {
        store.insert_node(node("r", None, 0)).await?;

        let same_id = store.insert_node(node("r", None, 1)).await;
        assert!(matches!(same_id, Err(DatabaseError::DuplicateId { .. })));

        let mut same_code = node("r2", None, 1);
        same_code.code = "r".to_string();
        assert!(matches!(
            store.insert_node(same_code).await,
            Err(DatabaseError::DuplicateCode { .. })
        ));

        let same_order = store.insert_node(node("t", None, 0)).await;
        assert!(matches!(
            same_order,
            Err(DatabaseError::ConstraintViolation(_))
        ));

        // A deleted row no longer holds its sort order
        store.delete_node("r", false).await?;
        store.insert_node(node("t", None, 0)).await?;
        Ok(())
    }

    async fn atomic_bulk_update(store: &dyn NodeStore) -> Result<()> {
        store.insert_node(node("a", None, 0)).await?;
        store.insert_node(node("b", None, 1)).await?;
        store.insert_node(node("c", None, 2)).await?;

        // A full rotation only works if uniqueness is checked on the final state
        let updated = store
            .bulk_update(vec![
                ("a".to_string(), NodePatch::new().with_sort_order(2)),
                ("b".to_string(), NodePatch::new().with_sort_order(0)),
                ("c".to_string(), NodePatch::new().with_sort_order(1)),
            ])
            .await?;
        assert_eq!(
            updated.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );

        // Collision in the final state: nothing is written
        let result = store
            .bulk_update(vec![
                ("a".to_string(), NodePatch::new().with_sort_order(0)),
                ("c".to_string(), NodePatch::new().with_path("/moved".to_string())),
            ])
            .await;
        assert!(matches!(result, Err(DatabaseError::ConstraintViolation(_))));
        assert_eq!(store.get_node("a").await?.sort_order, 2);
        assert_eq!(store.get_node("c").await?.path, "/c");

        // Missing ID: nothing is written
        let result = store
            .bulk_update(vec![
                ("c".to_string(), NodePatch::new().with_path("/moved".to_string())),
                ("ghost".to_string(), NodePatch::new().with_sort_order(9)),
            ])
            .await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
        assert_eq!(store.get_node("c").await?.path, "/c");

        assert!(store.bulk_update(Vec::new()).await?.is_empty());
        Ok(())
    }

    async fn patches_and_timestamps(store: &dyn NodeStore) -> Result<()> {
        let created = store.insert_node(node("a", None, 0)).await?;
        store.insert_node(node("p", None, 1)).await?;

        let moved = store
            .update_fields(
                "a",
                NodePatch::new()
                    .with_parent(Some("p".to_string()))
                    .with_sort_order(0)
                    .with_depth(1)
                    .with_path("/p/a".to_string()),
            )
            .await?;
        assert_eq!(moved.parent_id.as_deref(), Some("p"));
        assert!(moved.updated_at >= created.updated_at);
        assert_eq!(moved.created_at, store.get_node("a").await?.created_at);

        let root_again = store
            .update_fields("a", NodePatch::new().with_parent(None).with_sort_order(2))
            .await?;
        assert_eq!(root_again.parent_id, None);
        assert_eq!(root_again.depth, 1, "fields absent from the patch are kept");
        Ok(())
    }

    async fn deletes(store: &dyn NodeStore) -> Result<()> {
        store.insert_node(node("a", None, 0)).await?;
        store.insert_node(node("b", None, 1)).await?;
        store.insert_node(node("c", None, 2)).await?;

        store.delete_node("a", false).await?;
        assert!(store.get_node("a").await?.is_deleted);
        assert_eq!(store.list_by_tree_type("site", false).await?.len(), 2);
        assert_eq!(store.list_by_tree_type("site", true).await?.len(), 3);

        let result = store
            .bulk_delete(vec!["a".to_string(), "ghost".to_string()])
            .await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
        assert_eq!(store.list_by_tree_type("site", true).await?.len(), 3);

        let removed = store
            .bulk_delete(vec!["a".to_string(), "b".to_string(), "a".to_string()])
            .await?;
        assert_eq!(removed, 2);

        store.delete_node("c", true).await?;
        assert!(store.list_by_tree_type("site", true).await?.is_empty());
        assert!(matches!(
            store.delete_node("c", true).await,
            Err(DatabaseError::NotFound { .. })
        ));
        Ok(())
    }

    async fn revisions(store: &dyn NodeStore) -> Result<()> {
        store.insert_node(node("r", None, 0)).await?;
        store.insert_node(node("a", Some("r"), 0)).await?;
        let revision = store.partition_revision("site").await?;
        assert_eq!(revision, 2);

        // Attribute-only patches merge against the stored row and leave the revision
        let merged = store
            .update_fields(
                "a",
                NodePatch::new().with_merged_properties(json!({"icon": "Star"})),
            )
            .await?;
        assert_eq!(merged.properties, json!({"linkUrl": "/a", "icon": "Star"}));
        assert_eq!(store.partition_revision("site").await?, revision);

        let revision = store
            .commit_partition(
                "site",
                revision,
                PartitionWrite::Update(vec![(
                    "a".to_string(),
                    NodePatch::new().with_parent(None).with_sort_order(1).with_depth(0),
                )]),
            )
            .await?;
        assert_eq!(revision, 3);

        // A writer holding the old revision is refused and writes nothing
        let stale = store
            .commit_partition("site", 2, PartitionWrite::Purge(vec!["a".to_string()]))
            .await;
        assert!(matches!(
            stale,
            Err(DatabaseError::StaleRevision {
                expected_revision: 2,
                actual_revision: 3,
                ..
            })
        ));
        assert_eq!(store.get_node("a").await?.parent_id, None);

        store.delete_node("r", false).await?;
        assert_eq!(store.partition_revision("site").await?, 4);
        assert_eq!(store.partition_revision("admin").await?, 0);
        Ok(())
    }

    macro_rules! contract_tests {
        ($($name:ident => $scenario:ident),* $(,)?) => {
            mod memory {
                use super::*;
                $(
                    #[tokio::test]
                    async fn $name() -> Result<()> {
                        $scenario(&MemoryStore::new()).await
                    }
                )*
            }

            mod turso {
                use super::*;
                $(
                    #[tokio::test]
                    async fn $name() -> Result<()> {
                        let (store, _temp_dir) = create_turso_store().await?;
                        $scenario(&store).await
                    }
                )*
            }
        };
    }

    contract_tests! {
        test_insert_and_list => insert_and_list,
        test_uniqueness_constraints => uniqueness,
        test_bulk_update_is_atomic => atomic_bulk_update,
        test_patches_and_timestamps => patches_and_timestamps,
        test_soft_and_hard_deletes => deletes,
        test_partition_revisions => revisions,
    }
}
