//! TursoStore - libsql NodeStore Implementation
//!
//! Embedded SQLite-compatible backend for `NodeStore`.
//!
//! # Architecture
//!
//! - **Single Table**: Every partition lives in the `nodes` table, keyed by `id`
//! - **Storage Constraints**: `UNIQUE(tree_type, code)` and a partial unique index on live
//!   sibling orders back up the engine's own checks
//! - **Serialized Access**: One connection guarded by a `tokio::sync::Mutex`, so each
//!   transaction runs start to finish without interleaving (this also keeps
//!   `:memory:` databases on a single connection)
//! - **Partition Revisions**: `partition_revisions` counts structural writes per tree type.
//!   `commit_partition` compares and writes under `BEGIN IMMEDIATE`, which holds the
//!   database write lock, so stores in other processes cannot slip in between
//!
//! # Examples
//!
//! ```rust,no_run
//! use menutree_core::db::{NodeStore, TursoStore};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = TursoStore::new(PathBuf::from("./data/menutree.db")).await?;
//!     let site = store.list_by_tree_type("site", false).await?;
//!     println!("{} live site entries", site.len());
//!     Ok(())
//! }
//! ```

use crate::db::{DatabaseError, NodeStore, PartitionLocks, PartitionWrite};
use crate::models::{Node, NodePatch};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use libsql::params::Params;
use libsql::{Builder, Connection, Database, Row, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const NODE_COLUMNS: &str = "id, tree_type, parent_id, sort_order, depth, path, name, code, \
                            properties, is_deleted, created_at, updated_at";

/// libsql-backed node store
pub struct TursoStore {
    _db: Database,
    conn: Mutex<Connection>,
    db_path: PathBuf,
    locks: PartitionLocks,
}

impl TursoStore {
    /// Open (or create) a database file and initialize the schema
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Enable WAL mode and a 5 second busy timeout
    /// 4. Create the `nodes` table and its indexes (idempotent)
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if:
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - Schema initialization fails
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        Self::open(db, db_path).await
    }

    /// Open a private in-memory database
    pub async fn new_in_memory() -> Result<Self, DatabaseError> {
        let db_path = PathBuf::from(":memory:");
        let db = Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        Self::open(db, db_path).await
    }

    async fn open(db: Database, db_path: PathBuf) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        initialize_schema(&conn).await?;
        tracing::info!(path = %db_path.display(), "node store initialized");

        Ok(Self {
            _db: db,
            conn: Mutex::new(conn),
            db_path,
            locks: PartitionLocks::new(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

/// Execute a PRAGMA statement
///
/// PRAGMA statements return rows, so they go through query() instead of execute().
async fn execute_pragma(conn: &Connection, pragma: &str) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare(pragma).await.map_err(|e| {
        DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
    })?;
    let _ = stmt.query(()).await.map_err(|e| {
        DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
    })?;
    Ok(())
}

/// Create tables and indexes with IF NOT EXISTS, safe to call on every open
async fn initialize_schema(conn: &Connection) -> Result<(), DatabaseError> {
    execute_pragma(conn, "PRAGMA journal_mode = WAL").await?;
    execute_pragma(conn, "PRAGMA busy_timeout = 5000").await?;

    // No foreign key on parent_id: soft-deleted parents stay referenced and the
    // service layer owns referential checks
    conn.execute(
        "CREATE TABLE IF NOT EXISTS nodes (
            id TEXT PRIMARY KEY,
            tree_type TEXT NOT NULL,
            parent_id TEXT,
            sort_order INTEGER NOT NULL DEFAULT 0,
            depth INTEGER NOT NULL DEFAULT 0,
            path TEXT NOT NULL,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            properties JSON NOT NULL DEFAULT '{}',
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (tree_type, code)
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::initialization_failed(format!("nodes table: {}", e)))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS partition_revisions (
            tree_type TEXT PRIMARY KEY,
            revision INTEGER NOT NULL DEFAULT 0
        )",
        (),
    )
    .await
    .map_err(|e| {
        DatabaseError::initialization_failed(format!("partition_revisions table: {}", e))
    })?;

    let indexes = [
        (
            "idx_nodes_tree_parent",
            "CREATE INDEX IF NOT EXISTS idx_nodes_tree_parent ON nodes(tree_type, parent_id)",
        ),
        (
            "idx_nodes_live_sibling_order",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_live_sibling_order
             ON nodes(tree_type, COALESCE(parent_id, ''), sort_order)
             WHERE is_deleted = 0",
        ),
    ];
    for (name, sql) in indexes {
        conn.execute(sql, ())
            .await
            .map_err(|e| DatabaseError::initialization_failed(format!("{}: {}", name, e)))?;
    }

    Ok(())
}

/// Fixed-width RFC3339 so stored timestamps sort lexicographically
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse timestamp from database - handles both RFC3339 and SQLite formats
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite CURRENT_TIMESTAMP: "YYYY-MM-DD HH:MM:SS"
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }

    Err(DatabaseError::sql_execution(format!(
        "Unable to parse timestamp '{}' as RFC3339 or SQLite format",
        s
    )))
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn opt_text(value: Option<&str>) -> Value {
    value.map(text).unwrap_or(Value::Null)
}

fn flag(value: bool) -> Value {
    Value::Integer(i64::from(value))
}

/// Convert libsql::Row to Node
///
/// Expects the columns in `NODE_COLUMNS` order.
fn row_to_node(row: &Row) -> Result<Node, DatabaseError> {
    let properties_json: String = row.get(8)?;
    let is_deleted: i64 = row.get(9)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(Node {
        id: row.get(0)?,
        tree_type: row.get(1)?,
        parent_id: row.get(2)?,
        sort_order: row.get(3)?,
        depth: row.get(4)?,
        path: row.get(5)?,
        name: row.get(6)?,
        code: row.get(7)?,
        properties: serde_json::from_str(&properties_json)?,
        is_deleted: is_deleted != 0,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

async fn query_nodes(
    conn: &Connection,
    sql: &str,
    params: Params,
) -> Result<Vec<Node>, DatabaseError> {
    let mut rows = conn
        .query(sql, params)
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to query nodes: {}", e)))?;

    let mut nodes = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
    {
        nodes.push(row_to_node(&row)?);
    }
    Ok(nodes)
}

async fn fetch_node(conn: &Connection, id: &str) -> Result<Option<Node>, DatabaseError> {
    let sql = format!("SELECT {} FROM nodes WHERE id = ?", NODE_COLUMNS);
    let mut nodes = query_nodes(conn, &sql, Params::Positional(vec![text(id)])).await?;
    Ok(nodes.pop())
}

async fn exists(conn: &Connection, sql: &str, params: Params) -> Result<bool, DatabaseError> {
    let mut rows = conn
        .query(sql, params)
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to run lookup: {}", e)))?;
    Ok(rows
        .next()
        .await
        .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        .is_some())
}

/// Unique-index failures become `ConstraintViolation`, everything else keeps its context
fn map_write_error(e: libsql::Error, context: &str) -> DatabaseError {
    let message = e.to_string();
    if message.contains("UNIQUE constraint failed") {
        DatabaseError::constraint_violation(format!("{}: {}", context, message))
    } else {
        DatabaseError::sql_execution(format!("{}: {}", context, message))
    }
}

async fn read_revision(conn: &Connection, tree_type: &str) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT revision FROM partition_revisions WHERE tree_type = ?",
            Params::Positional(vec![text(tree_type)]),
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to read revision: {}", e)))?;

    match rows
        .next()
        .await
        .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
    {
        Some(row) => Ok(row.get(0)?),
        None => Ok(0),
    }
}

async fn bump_revision(conn: &Connection, tree_type: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO partition_revisions (tree_type, revision) VALUES (?, 1)
         ON CONFLICT(tree_type) DO UPDATE SET revision = revision + 1",
        Params::Positional(vec![text(tree_type)]),
    )
    .await
    .map_err(|e| {
        DatabaseError::sql_execution(format!("Failed to bump revision of '{}': {}", tree_type, e))
    })?;
    Ok(())
}

async fn begin_immediate(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute("BEGIN IMMEDIATE", ()).await.map_err(|e| {
        DatabaseError::sql_execution(format!("Failed to begin transaction: {}", e))
    })?;
    Ok(())
}

/// Commit on success, roll back on any error
async fn finish_transaction<T>(
    conn: &Connection,
    result: Result<T, DatabaseError>,
) -> Result<T, DatabaseError> {
    match result {
        Ok(value) => {
            if let Err(e) = conn.execute("COMMIT", ()).await {
                let _rollback = conn.execute("ROLLBACK", ()).await;
                return Err(DatabaseError::sql_execution(format!(
                    "Failed to commit transaction: {}",
                    e
                )));
            }
            Ok(value)
        }
        Err(e) => {
            let _rollback = conn.execute("ROLLBACK", ()).await;
            Err(e)
        }
    }
}

async fn insert_in_transaction(conn: &Connection, node: &Node) -> Result<(), DatabaseError> {
    if exists(
        conn,
        "SELECT 1 FROM nodes WHERE id = ?",
        Params::Positional(vec![text(&node.id)]),
    )
    .await?
    {
        return Err(DatabaseError::duplicate_id(&node.id));
    }

    if exists(
        conn,
        "SELECT 1 FROM nodes WHERE tree_type = ? AND code = ?",
        Params::Positional(vec![text(&node.tree_type), text(&node.code)]),
    )
    .await?
    {
        return Err(DatabaseError::duplicate_code(&node.tree_type, &node.code));
    }

    let properties = serde_json::to_string(&node.properties)?;
    let sql = format!(
        "INSERT INTO nodes ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        NODE_COLUMNS
    );
    conn.execute(
        &sql,
        Params::Positional(vec![
            text(&node.id),
            text(&node.tree_type),
            opt_text(node.parent_id.as_deref()),
            Value::Integer(node.sort_order),
            Value::Integer(node.depth),
            text(&node.path),
            text(&node.name),
            text(&node.code),
            Value::Text(properties),
            flag(node.is_deleted),
            Value::Text(format_timestamp(&node.created_at)),
            Value::Text(format_timestamp(&node.updated_at)),
        ]),
    )
    .await
    .map_err(|e| map_write_error(e, &format!("Failed to insert node {}", node.id)))?;

    bump_revision(conn, &node.tree_type).await
}

async fn bulk_update_in_transaction(
    conn: &Connection,
    updates: &[(String, NodePatch)],
) -> Result<Vec<Node>, DatabaseError> {
    let now = Utc::now();
    let mut order: Vec<String> = Vec::new();
    let mut staged: HashMap<String, Node> = HashMap::new();
    let mut structural: HashSet<String> = HashSet::new();

    // Rows are read inside the transaction, so merges apply to the current values
    for (id, patch) in updates {
        if !staged.contains_key(id) {
            let current = fetch_node(conn, id)
                .await?
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

    // Park every touched row at a distinct negative order first, so intermediate
    // states never collide on the live sibling index
    for (index, id) in order.iter().enumerate() {
        let placeholder = -(index as i64) - 1;
        conn.execute(
            "UPDATE nodes SET sort_order = ? WHERE id = ?",
            Params::Positional(vec![Value::Integer(placeholder), text(id)]),
        )
        .await
        .map_err(|e| map_write_error(e, &format!("Failed to park node {}", id)))?;
    }

    let mut result = Vec::with_capacity(order.len());
    for id in order {
        let Some(node) = staged.remove(&id) else {
            continue;
        };
        let properties = serde_json::to_string(&node.properties)?;
        conn.execute(
            "UPDATE nodes SET parent_id = ?, sort_order = ?, depth = ?, path = ?, name = ?, \
             properties = ?, is_deleted = ?, updated_at = ? WHERE id = ?",
            Params::Positional(vec![
                opt_text(node.parent_id.as_deref()),
                Value::Integer(node.sort_order),
                Value::Integer(node.depth),
                text(&node.path),
                text(&node.name),
                Value::Text(properties),
                flag(node.is_deleted),
                Value::Text(format_timestamp(&node.updated_at)),
                text(&node.id),
            ]),
        )
        .await
        .map_err(|e| map_write_error(e, &format!("Failed to update node {}", node.id)))?;
        result.push(node);
    }

    for tree_type in &structural {
        bump_revision(conn, tree_type).await?;
    }

    Ok(result)
}

async fn bulk_delete_in_transaction(
    conn: &Connection,
    ids: &HashSet<String>,
) -> Result<usize, DatabaseError> {
    let mut touched: HashSet<String> = HashSet::new();
    for id in ids {
        let node = fetch_node(conn, id)
            .await?
            .ok_or_else(|| DatabaseError::not_found(id))?;
        touched.insert(node.tree_type);

        let removed = conn
            .execute(
                "DELETE FROM nodes WHERE id = ?",
                Params::Positional(vec![text(id)]),
            )
            .await
            .map_err(|e| map_write_error(e, &format!("Failed to delete node {}", id)))?;
        if removed == 0 {
            return Err(DatabaseError::not_found(id));
        }
    }

    for tree_type in &touched {
        bump_revision(conn, tree_type).await?;
    }
    Ok(ids.len())
}

async fn soft_delete_in_transaction(conn: &Connection, id: &str) -> Result<(), DatabaseError> {
    let node = fetch_node(conn, id)
        .await?
        .ok_or_else(|| DatabaseError::not_found(id))?;

    conn.execute(
        "UPDATE nodes SET is_deleted = 1, updated_at = ? WHERE id = ?",
        Params::Positional(vec![Value::Text(format_timestamp(&Utc::now())), text(id)]),
    )
    .await
    .map_err(|e| map_write_error(e, &format!("Failed to delete node {}", id)))?;

    bump_revision(conn, &node.tree_type).await
}

/// Run one structural write inside an open transaction
async fn write_in_transaction(conn: &Connection, write: &PartitionWrite) -> Result<(), DatabaseError> {
    match write {
        PartitionWrite::Insert(node) => insert_in_transaction(conn, node).await,
        PartitionWrite::Update(updates) => {
            bulk_update_in_transaction(conn, updates).await?;
            Ok(())
        }
        PartitionWrite::Purge(ids) => {
            let unique: HashSet<String> = ids.iter().cloned().collect();
            bulk_delete_in_transaction(conn, &unique).await?;
            Ok(())
        }
    }
}

#[async_trait]
impl NodeStore for TursoStore {
    fn partition_locks(&self) -> &PartitionLocks {
        &self.locks
    }

    async fn partition_revision(&self, tree_type: &str) -> Result<i64, DatabaseError> {
        let conn = self.conn.lock().await;
        read_revision(&conn, tree_type).await
    }

    async fn commit_partition(
        &self,
        tree_type: &str,
        expected_revision: i64,
        write: PartitionWrite,
    ) -> Result<i64, DatabaseError> {
        let conn = self.conn.lock().await;
        begin_immediate(&conn).await?;

        let result = async {
            let actual = read_revision(&conn, tree_type).await?;
            if actual != expected_revision {
                return Err(DatabaseError::stale_revision(
                    tree_type,
                    expected_revision,
                    actual,
                ));
            }
            write_in_transaction(&conn, &write).await?;
            read_revision(&conn, tree_type).await
        }
        .await;

        finish_transaction(&conn, result).await
    }

    async fn get_node(&self, id: &str) -> Result<Node, DatabaseError> {
        let conn = self.conn.lock().await;
        fetch_node(&conn, id)
            .await?
            .ok_or_else(|| DatabaseError::not_found(id))
    }

    async fn list_by_tree_type(
        &self,
        tree_type: &str,
        include_deleted: bool,
    ) -> Result<Vec<Node>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE tree_type = ?{} \
             ORDER BY COALESCE(parent_id, ''), sort_order, created_at, id",
            NODE_COLUMNS,
            if include_deleted {
                ""
            } else {
                " AND is_deleted = 0"
            }
        );

        let conn = self.conn.lock().await;
        query_nodes(&conn, &sql, Params::Positional(vec![text(tree_type)])).await
    }

    async fn insert_node(&self, node: Node) -> Result<Node, DatabaseError> {
        let conn = self.conn.lock().await;
        begin_immediate(&conn).await?;
        let result = insert_in_transaction(&conn, &node).await;
        finish_transaction(&conn, result).await?;
        Ok(node)
    }

    async fn update_fields(&self, id: &str, patch: NodePatch) -> Result<Node, DatabaseError> {
        let mut updated = self.bulk_update(vec![(id.to_string(), patch)]).await?;
        updated.pop().ok_or_else(|| DatabaseError::not_found(id))
    }

    async fn bulk_update(
        &self,
        updates: Vec<(String, NodePatch)>,
    ) -> Result<Vec<Node>, DatabaseError> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().await;
        begin_immediate(&conn).await?;
        let result = bulk_update_in_transaction(&conn, &updates).await;
        finish_transaction(&conn, result).await
    }

    async fn delete_node(&self, id: &str, hard: bool) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        begin_immediate(&conn).await?;

        let result = if hard {
            let ids = HashSet::from([id.to_string()]);
            bulk_delete_in_transaction(&conn, &ids).await.map(|_| ())
        } else {
            soft_delete_in_transaction(&conn, id).await
        };
        finish_transaction(&conn, result).await
    }

    async fn bulk_delete(&self, ids: Vec<String>) -> Result<usize, DatabaseError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let unique: HashSet<String> = ids.into_iter().collect();
        let conn = self.conn.lock().await;
        begin_immediate(&conn).await?;
        let result = bulk_delete_in_transaction(&conn, &unique).await;
        finish_transaction(&conn, result).await
    }
}
