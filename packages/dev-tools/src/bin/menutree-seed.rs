//! Menu Seeding Binary
//!
//! Loads a seed document into a menu database and prints the resulting trees.
//! Re-running with the same document is safe: existing codes are skipped.
//!
//! # Usage
//!
//! ```bash
//! # Seed an in-memory store (dry run) and print the menus
//! cargo run --bin menutree-seed -- packages/dev-tools/seeds/menus.json
//!
//! # Seed a database file
//! MENUTREE_DB_PATH=./data/menutree.db cargo run --bin menutree-seed -- seeds/menus.json
//! ```
//!
//! # Environment Variables
//!
//! - `MENUTREE_DB_PATH`: libsql database file (default: in-memory store)
//! - `MENUTREE_LOCK_TIMEOUT_MS`, `MENUTREE_EVENT_CAPACITY`: see `EngineConfig`
//! - `RUST_LOG`: Logging level (e.g., "info", "debug", "trace")

use std::env;
use std::sync::Arc;

use anyhow::Context;
use menutree_core::config::EngineConfig;
use menutree_core::db::{MemoryStore, NodeStore, TursoStore};
use menutree_core::seed::{parse_seed, seed_all};
use menutree_core::services::TreeService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let seed_path = env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: menutree-seed <seed.json>"))?;

    let config = EngineConfig::from_env().map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let store: Arc<dyn NodeStore> = match &config.db_path {
        Some(db_path) => {
            tracing::info!("Database: {}", db_path.display());
            Arc::new(TursoStore::new(db_path.clone()).await?)
        }
        None => {
            tracing::info!("No MENUTREE_DB_PATH set; seeding an in-memory store");
            Arc::new(MemoryStore::new())
        }
    };
    let service = TreeService::with_config(store, &config);

    let document = tokio::fs::read_to_string(&seed_path)
        .await
        .with_context(|| format!("Failed to read seed file {}", seed_path))?;
    let partitions = parse_seed(&document)
        .with_context(|| format!("Failed to parse seed file {}", seed_path))?;

    let report = seed_all(&service, &partitions).await?;
    tracing::info!(
        "Seeded {} partition(s): {} created, {} skipped",
        partitions.len(),
        report.created,
        report.skipped
    );

    for partition in &partitions {
        let violations = service.verify_partition(&partition.tree_type).await?;
        if !violations.is_empty() {
            tracing::warn!(
                "{} has {} invariant violation(s)",
                partition.tree_type,
                violations.len()
            );
        }

        println!("[{}]", partition.tree_type);
        for entry in service.get_flat_list(&partition.tree_type, false).await? {
            println!(
                "{}{} ({})",
                "  ".repeat(entry.depth as usize + 1),
                entry.node.name,
                entry.node.code
            );
        }
    }

    Ok(())
}
