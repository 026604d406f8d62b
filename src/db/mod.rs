use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};

use crate::config::AppConfig;
use crate::error::StorageError;

pub mod queries;
pub mod store;

pub type DbPool = Pool<Sqlite>;

/// Opens (creating if missing) the database file and applies the schema.
pub async fn init_pool(config: &AppConfig) -> Result<DbPool, StorageError> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.database_path))
        .map_err(|e| StorageError::IoFailure(format!("invalid database path: {}", e)))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(config.db_busy_timeout_ms))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_acquire_timeout_secs))
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database; every connection to `:memory:` is
/// a separate database, so the pool must never open a second one.
pub async fn init_memory_pool() -> Result<DbPool, StorageError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| StorageError::IoFailure(format!("invalid database path: {}", e)))?
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), StorageError> {
    for statement in [
        queries::CREATE_SESSIONS_TABLE,
        queries::CREATE_FIXES_TABLE,
        queries::CREATE_FIXES_SESSION_INDEX,
        queries::CREATE_SESSIONS_START_INDEX,
    ] {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
