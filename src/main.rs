use std::sync::Arc;

use siscom_sessions::clock::SystemClock;
use siscom_sessions::config::AppConfig;
use siscom_sessions::db::{self, store::SqliteSessionStore};
use siscom_sessions::ingest;
use siscom_sessions::processor::tracker::SessionTracker;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting Siscom Sessions tracker...");

    // Init DB
    let pool = db::init_pool(&config).await?;
    info!("Opened session database at {}", config.database_path);

    // Rebuild tracker state from storage
    let store = Arc::new(SqliteSessionStore::new(pool));
    let tracker = SessionTracker::recover(store, Arc::new(SystemClock::new())).await?;
    info!("Tracker state: {:?}", tracker.state().await);

    // Consume fix-source events
    ingest::start_stdin_consumer(&config, &tracker).await?;

    Ok(())
}
