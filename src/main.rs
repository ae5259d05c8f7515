//! Simple Bank service entry point
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌─────────────┐    ┌────────────┐
//! │  Config  │───▶│ Logging  │───▶│ PostgreSQL  │───▶│ Coordinator│
//! │  (YAML)  │    │(tracing) │    │(pool+schema)│    │ (transfer) │
//! └──────────┘    └──────────┘    └─────────────┘    └────────────┘
//! ```
//!
//! Usage: `simple_bank [--env dev] [--transfer <from> <to> <amount>]`

use std::sync::Arc;

use anyhow::Context;

use simple_bank::config::AppConfig;
use simple_bank::db::Database;
use simple_bank::logging::init_logging;
use simple_bank::{PgStore, TransferCoordinator, TransferRequest};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Parse `--transfer <from> <to> <amount>` if present
fn get_transfer_request() -> anyhow::Result<Option<TransferRequest>> {
    let args: Vec<String> = std::env::args().collect();
    let Some(i) = args.iter().position(|a| a == "--transfer") else {
        return Ok(None);
    };
    let values = args
        .get(i + 1..i + 4)
        .context("--transfer expects <from> <to> <amount>")?;
    let from = values[0].parse::<i64>().context("invalid <from> account id")?;
    let to = values[1].parse::<i64>().context("invalid <to> account id")?;
    let amount = values[2].parse::<i64>().context("invalid <amount>")?;
    Ok(Some(TransferRequest::new(from, to, amount)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&app_config);

    tracing::info!(
        "Starting simple_bank {} ({}) in {} mode",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env
    );

    let request = get_transfer_request()?;

    let db = Database::connect(&app_config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;
    db.ensure_schema()
        .await
        .context("Failed to bootstrap schema")?;
    db.health_check().await.context("Health check failed")?;

    let store = Arc::new(PgStore::new(db.pool().clone()));
    let mut coordinator = TransferCoordinator::new(store);
    if let Some(timeout) = app_config.transfer.timeout() {
        coordinator = coordinator.with_timeout(timeout);
    }

    match request {
        Some(req) => {
            let outcome = coordinator.transfer(req).await.map_err(|e| {
                tracing::error!(code = e.code(), error = %e, "Transfer failed");
                e
            })?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        None => tracing::info!("Record store ready, no transfer requested"),
    }

    Ok(())
}
