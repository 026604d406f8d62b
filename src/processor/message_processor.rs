use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::{StorageError, TrackerError};
use crate::export;
use crate::geo::{format_distance, format_speed};
use crate::models::message::{FixSourceEvent, FixSourceMessage};
use crate::processor::tracker::{FixOutcome, SessionTracker};

/// Applies one fix-source line to the tracker.
///
/// Malformed payloads are logged and skipped. Tracker and storage failures
/// are returned so the caller can decide whether to retry.
pub async fn process_message(tracker: &SessionTracker, payload: &[u8]) -> anyhow::Result<()> {
    // 1. Parse JSON
    let message: FixSourceMessage = match serde_json::from_slice(payload) {
        Ok(m) => m,
        Err(e) => {
            warn!("Failed to parse message: {}", e);
            return Ok(());
        }
    };
    let uuid = message
        .uuid
        .map(|u| u.to_string())
        .unwrap_or_else(|| "-".to_string());

    // 2. Dispatch
    match message.event {
        FixSourceEvent::Start => {
            let session_id = tracker.start().await.map_err(|e| {
                if let TrackerError::AlreadyTracking(active) = e {
                    error!(
                        "Start ignored: session {} is still active [{}]",
                        active, uuid
                    );
                }
                e
            })?;
            info!("Tracking session {} [{}]", session_id, uuid);
        }
        FixSourceEvent::Fix { data } => {
            let fix = match data.to_fix() {
                Some(f) => f,
                None => {
                    warn!("Fix without position or time, skipping [{}]", uuid);
                    return Ok(());
                }
            };
            match tracker.on_fix(fix).await? {
                FixOutcome::Recorded { session_id } => {
                    debug!("Recorded fix for session {} [{}]", session_id, uuid);
                }
                FixOutcome::Dropped => {
                    info!("Dropped fix: no active session [{}]", uuid);
                }
            }
        }
        FixSourceEvent::Stop => {
            let stopped = tracker.stop().await?;
            // The stop is committed; the summary is only for the log.
            match tracker.store().get_session_by_id(stopped.session_id).await {
                Ok(Some(session)) => info!(
                    "Session {} finished: {} fixes, {} in {}s, avg {} [{}]",
                    stopped.session_id,
                    session.fix_count(),
                    format_distance(session.total_distance()),
                    stopped.duration_millis() / 1000,
                    session
                        .average_speed()
                        .map(format_speed)
                        .unwrap_or_else(|| "n/a".to_string()),
                    uuid
                ),
                Ok(None) => info!(
                    "Session {} finished in {}s [{}]",
                    stopped.session_id,
                    stopped.duration_millis() / 1000,
                    uuid
                ),
                Err(e) => warn!(
                    "Session {} finished, summary unavailable: {} [{}]",
                    stopped.session_id, e, uuid
                ),
            }
        }
        FixSourceEvent::Failure { reason } => {
            // Surfaced to the operator; the tracker state is left alone.
            warn!("Location source failure: {} [{}]", reason, uuid);
        }
        FixSourceEvent::Export { format, path } => {
            let sessions = tracker.store().list_sessions().await?;
            let bytes = export::export(format, &sessions, Utc::now());
            tokio::fs::write(&path, &bytes).await?;
            info!(
                "Exported {} sessions as {} to {} ({} bytes) [{}]",
                sessions.len(),
                format.file_extension(),
                path,
                bytes.len(),
                uuid
            );
        }
        FixSourceEvent::Delete { session_id } => {
            tracker.delete_session(session_id).await?;
            info!("Deleted session {} [{}]", session_id, uuid);
        }
        FixSourceEvent::Clear => {
            tracker.delete_all_sessions().await?;
            info!("Deleted all sessions [{}]", uuid);
        }
    }

    Ok(())
}

/// True when the failure came from a storage medium that may recover.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    if let Some(storage) = err.downcast_ref::<StorageError>() {
        return storage.is_retryable();
    }
    matches!(
        err.downcast_ref::<TrackerError>(),
        Some(TrackerError::Storage(storage)) if storage.is_retryable()
    )
}
