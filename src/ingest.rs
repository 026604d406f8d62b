use crate::config::AppConfig;
use crate::processor::message_processor;
use crate::processor::tracker::SessionTracker;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub processed: u64,
    pub failed: u64,
}

/// Consumes fix-source events from stdin until EOF.
pub async fn start_stdin_consumer(
    config: &AppConfig,
    tracker: &SessionTracker,
) -> anyhow::Result<IngestStats> {
    info!("Reading fix-source events from stdin");
    consume_lines(config, tracker, BufReader::new(tokio::io::stdin())).await
}

/// Applies one JSON event per line, strictly in order. Retryable storage
/// failures are retried after a delay, and a circuit breaker pauses the
/// consumer when failures keep piling up.
pub async fn consume_lines<R>(
    config: &AppConfig,
    tracker: &SessionTracker,
    reader: R,
) -> anyhow::Result<IngestStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = IngestStats::default();
    let mut consecutive_failures = 0;
    // Zero would trip the breaker before every line.
    let max_retries = config.ingest_max_retries.max(1);
    let retry_delay = Duration::from_millis(config.ingest_retry_delay_ms);
    let cooldown_duration = Duration::from_secs(config.ingest_circuit_breaker_cooldown);

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let mut attempts = 0;
        loop {
            // Circuit Breaker Check
            if consecutive_failures >= max_retries {
                warn!(
                    "Circuit breaker tripped ({} consecutive failures)! Sleeping for {} seconds...",
                    consecutive_failures, config.ingest_circuit_breaker_cooldown
                );
                tokio::time::sleep(cooldown_duration).await;
                consecutive_failures = 0;
                info!("Circuit breaker reset. Resuming ingestion.");
            }

            match message_processor::process_message(tracker, line.as_bytes()).await {
                Ok(()) => {
                    consecutive_failures = 0;
                    stats.processed += 1;
                    break;
                }
                Err(e) if message_processor::is_retryable(&e) => {
                    consecutive_failures += 1;
                    attempts += 1;
                    if attempts > max_retries {
                        error!("Giving up on message after {} attempts: {}", attempts, e);
                        stats.failed += 1;
                        break;
                    }
                    warn!(
                        "Storage unavailable: {}. Retrying ({} / {})",
                        e, attempts, max_retries
                    );
                    tokio::time::sleep(retry_delay).await;
                }
                Err(e) => {
                    error!("Error processing message: {}", e);
                    stats.failed += 1;
                    break;
                }
            }
        }
    }

    info!(
        "Fix source closed: {} processed, {} failed",
        stats.processed, stats.failed
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::init_memory_pool;
    use crate::db::store::{SessionStore, SqliteSessionStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_consume_lines_in_order() {
        let store = Arc::new(SqliteSessionStore::new(init_memory_pool().await.unwrap()));
        let tracker = SessionTracker::recover(store.clone(), Arc::new(ManualClock::new(1000)))
            .await
            .unwrap();

        let input = concat!(
            "{\"event\":\"fix\",\"data\":{\"latitude\":0,\"longitude\":0,\"timestamp\":900}}\n",
            "{\"event\":\"start\"}\n",
            "\n",
            "{\"event\":\"fix\",\"data\":{\"latitude\":0,\"longitude\":0,\"timestamp\":1000}}\n",
            "{\"event\":\"fix\",\"data\":{\"latitude\":0,\"longitude\":0.001,\"timestamp\":900}}\n",
            "{\"event\":\"fix\",\"data\":{\"latitude\":0,\"longitude\":0.001,\"timestamp\":2000}}\n",
            "{\"event\":\"start\"}\n",
            "{\"event\":\"stop\"}\n",
        );

        let stats = consume_lines(&AppConfig::default(), &tracker, input.as_bytes())
            .await
            .unwrap();

        // The stale fix and the second start are rejected, nothing is retried.
        assert_eq!(stats, IngestStats { processed: 5, failed: 2 });

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].fix_count(), 2);
        assert!(store.get_active_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_retries_does_not_stall_healthy_input() {
        let store = Arc::new(SqliteSessionStore::new(init_memory_pool().await.unwrap()));
        let tracker = SessionTracker::recover(store.clone(), Arc::new(ManualClock::new(1000)))
            .await
            .unwrap();
        let config = AppConfig {
            ingest_max_retries: 0,
            ingest_circuit_breaker_cooldown: 3600,
            ..AppConfig::default()
        };

        let input = concat!(
            "{\"event\":\"start\"}\n",
            "{\"event\":\"fix\",\"data\":{\"latitude\":0,\"longitude\":0,\"timestamp\":1000}}\n",
            "{\"event\":\"stop\"}\n",
        );

        let stats = tokio::time::timeout(
            Duration::from_secs(5),
            consume_lines(&config, &tracker, input.as_bytes()),
        )
        .await
        .expect("consumer slept in the circuit breaker")
        .unwrap();
        assert_eq!(stats, IngestStats { processed: 3, failed: 0 });
        assert_eq!(store.list_sessions().await.unwrap()[0].fix_count(), 1);
    }
}
