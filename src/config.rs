use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database_path: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub db_busy_timeout_ms: u64,
    pub ingest_max_retries: u32,
    pub ingest_retry_delay_ms: u64,
    pub ingest_circuit_breaker_cooldown: u64,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "sessions.db".to_string(),
            db_max_connections: 4,
            db_acquire_timeout_secs: 5,
            db_busy_timeout_ms: 2000,
            ingest_max_retries: 5,
            ingest_retry_delay_ms: 500,
            ingest_circuit_breaker_cooldown: 30,
            log_level: "info".to_string(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let defaults = Self::default();

        let database_path = env::var("DATABASE_PATH").unwrap_or(defaults.database_path);
        let db_max_connections = env_or("DB_MAX_CONNECTIONS", defaults.db_max_connections).max(1);
        let db_acquire_timeout_secs =
            env_or("DB_ACQUIRE_TIMEOUT_SECS", defaults.db_acquire_timeout_secs);
        let db_busy_timeout_ms = env_or("DB_BUSY_TIMEOUT_MS", defaults.db_busy_timeout_ms);
        let ingest_max_retries = env_or("INGEST_MAX_RETRIES", defaults.ingest_max_retries).max(1);
        let ingest_retry_delay_ms = env_or("INGEST_RETRY_DELAY_MS", defaults.ingest_retry_delay_ms);
        let ingest_circuit_breaker_cooldown = env_or(
            "INGEST_CIRCUIT_BREAKER_COOLDOWN",
            defaults.ingest_circuit_breaker_cooldown,
        );

        let log_level = env::var("LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Self {
            database_path,
            db_max_connections,
            db_acquire_timeout_secs,
            db_busy_timeout_ms,
            ingest_max_retries,
            ingest_retry_delay_ms,
            ingest_circuit_breaker_cooldown,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        env::set_var("SISCOM_SESSIONS_TEST_NUMBER", "not-a-number");
        assert_eq!(env_or("SISCOM_SESSIONS_TEST_NUMBER", 7u32), 7);
        env::set_var("SISCOM_SESSIONS_TEST_NUMBER", " 12 ");
        assert_eq!(env_or("SISCOM_SESSIONS_TEST_NUMBER", 7u32), 12);
        env::remove_var("SISCOM_SESSIONS_TEST_NUMBER");
        assert_eq!(env_or("SISCOM_SESSIONS_TEST_NUMBER", 7u32), 7);
    }
}
