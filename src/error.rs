use serde::Deserialize;
use thiserror::Error;

/// Failures reported by a [`crate::db::store::SessionStore`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("session {0} not found")]
    NotFound(i64),

    #[error("storage is corrupt: {0}")]
    Corrupt(String),

    #[error("storage unavailable: {0}")]
    IoFailure(String),

    #[error("unknown storage error: {0}")]
    Unknown(String),
}

impl StorageError {
    /// Only medium failures (locked, full, pool exhausted) are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::IoFailure(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::Unknown("row not found".to_string()),
            sqlx::Error::Io(e) => StorageError::IoFailure(e.to_string()),
            sqlx::Error::PoolTimedOut => {
                StorageError::IoFailure("timed out waiting for a connection".to_string())
            }
            sqlx::Error::PoolClosed => StorageError::IoFailure("pool closed".to_string()),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::TypeNotFound { .. } => StorageError::Corrupt(err.to_string()),
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation()
                    || db_err.is_foreign_key_violation()
                    || db_err.is_check_violation()
                {
                    return StorageError::Corrupt(db_err.message().to_string());
                }
                // Primary result codes: 5 busy, 6 locked, 10 ioerr, 13 full, 14 cantopen,
                // 11 corrupt, 19 constraint.
                let primary = db_err
                    .code()
                    .and_then(|c| c.parse::<i32>().ok())
                    .map(|c| c & 0xff);
                match primary {
                    Some(5) | Some(6) | Some(10) | Some(13) | Some(14) => {
                        StorageError::IoFailure(db_err.message().to_string())
                    }
                    Some(11) | Some(19) => StorageError::Corrupt(db_err.message().to_string()),
                    _ => StorageError::Unknown(db_err.message().to_string()),
                }
            }
            other => StorageError::Unknown(other.to_string()),
        }
    }
}

/// Rejections from the session tracker state machine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("a session is already being tracked (session {0})")]
    AlreadyTracking(i64),

    #[error("fix at {timestamp} is older than the last fix at {last}")]
    OutOfOrderFix { timestamp: i64, last: i64 },

    #[error("no active session")]
    NoActiveSession,

    #[error("coordinate out of range: lat={latitude}, lon={longitude}")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("timestamp {0} is outside the representable date range")]
    InvalidTimestamp(i64),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failure signals emitted by the platform location provider.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixSourceError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("no location provider enabled")]
    ProvidersDisabled,
}
