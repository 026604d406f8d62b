use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use sqlx::{FromRow, SqliteConnection};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use super::{queries, DbPool};
use crate::error::StorageError;
use crate::models::fix::LocationFix;
use crate::models::session::LocationSession;

pub type SessionListStream = BoxStream<'static, Result<Vec<LocationSession>, StorageError>>;

/// Durable home of sessions and their fixes. Everything handed out is a
/// snapshot; only the write operations below change stored state, and each
/// of them is all-or-nothing.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns `candidate` unless an existing id is already at or past it,
    /// in which case the next free id is returned.
    async fn allocate_session_id(&self, candidate: i64) -> Result<i64, StorageError>;

    /// Persists the header and any fixes in one transaction.
    async fn create_session(&self, session: &LocationSession) -> Result<(), StorageError>;

    /// Persists one fix and refreshes the session's cached fix count.
    async fn append_fix(&self, session_id: i64, fix: &LocationFix) -> Result<(), StorageError>;

    /// Replaces header fields only; fixes are untouched.
    async fn update_session(&self, session: &LocationSession) -> Result<(), StorageError>;

    async fn get_session_by_id(
        &self,
        session_id: i64,
    ) -> Result<Option<LocationSession>, StorageError>;

    /// Emits the full list now and again after every committed mutation,
    /// most recently started first.
    fn get_all_sessions(&self) -> SessionListStream;

    async fn list_sessions(&self) -> Result<Vec<LocationSession>, StorageError>;

    async fn get_recent_sessions(&self, limit: u32) -> Result<Vec<LocationSession>, StorageError>;

    /// The single open session, if any. Two open sessions is `Corrupt`.
    async fn get_active_session(&self) -> Result<Option<LocationSession>, StorageError>;

    /// Cascades to fixes. Unknown ids are a no-op.
    async fn delete_session(&self, session_id: i64) -> Result<(), StorageError>;

    async fn delete_all_sessions(&self) -> Result<(), StorageError>;
}

#[derive(Debug, FromRow)]
struct SessionRow {
    session_id: i64,
    start_time: i64,
    end_time: Option<i64>,
    fix_count: i64,
}

#[derive(Debug, FromRow)]
struct FixRow {
    latitude: f64,
    longitude: f64,
    timestamp: i64,
    accuracy: Option<f64>,
    altitude: Option<f64>,
    speed: Option<f64>,
    bearing: Option<f64>,
    address: Option<String>,
}

impl From<FixRow> for LocationFix {
    fn from(row: FixRow) -> Self {
        LocationFix {
            latitude: row.latitude,
            longitude: row.longitude,
            timestamp_millis: row.timestamp,
            accuracy_meters: row.accuracy.map(|v| v as f32),
            altitude_meters: row.altitude,
            speed_mps: row.speed.map(|v| v as f32),
            bearing_degrees: row.bearing.map(|v| v as f32),
            address: row.address,
        }
    }
}

pub struct SqliteSessionStore {
    pool: DbPool,
    // Serializes writers so SQLite never has to upgrade competing read locks.
    write_gate: Mutex<()>,
    changes: watch::Sender<u64>,
}

impl SqliteSessionStore {
    pub fn new(pool: DbPool) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            pool,
            write_gate: Mutex::new(()),
            changes,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn notify_changed(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }
}

fn validate_header(session: &LocationSession) -> Result<(), StorageError> {
    match session.end_time {
        Some(end) if end < session.start_time => Err(StorageError::Corrupt(format!(
            "session {} ends at {} before it starts at {}",
            session.session_id, end, session.start_time
        ))),
        _ => Ok(()),
    }
}

fn validate_fix(session_id: i64, fix: &LocationFix) -> Result<(), StorageError> {
    if !fix.has_valid_coordinate() {
        return Err(StorageError::Corrupt(format!(
            "fix for session {} has out of range coordinate ({}, {})",
            session_id, fix.latitude, fix.longitude
        )));
    }
    if !fix.has_valid_timestamp() {
        return Err(StorageError::Corrupt(format!(
            "fix for session {} has out of range timestamp {}",
            session_id, fix.timestamp_millis
        )));
    }
    Ok(())
}

async fn insert_fix(
    conn: &mut SqliteConnection,
    session_id: i64,
    fix: &LocationFix,
) -> Result<(), StorageError> {
    sqlx::query(queries::INSERT_FIX)
        .bind(session_id)
        .bind(fix.latitude)
        .bind(fix.longitude)
        .bind(fix.timestamp_millis)
        .bind(fix.accuracy_meters.map(f64::from))
        .bind(fix.altitude_meters)
        .bind(fix.speed_mps.map(f64::from))
        .bind(fix.bearing_degrees.map(f64::from))
        .bind(fix.address.as_deref())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn hydrate(
    conn: &mut SqliteConnection,
    row: SessionRow,
) -> Result<LocationSession, StorageError> {
    let fixes: Vec<FixRow> = sqlx::query_as(queries::SELECT_FIXES_FOR_SESSION)
        .bind(row.session_id)
        .fetch_all(&mut *conn)
        .await?;

    if fixes.len() as i64 != row.fix_count {
        return Err(StorageError::Corrupt(format!(
            "session {} caches {} fixes but has {}",
            row.session_id,
            row.fix_count,
            fixes.len()
        )));
    }

    Ok(LocationSession {
        session_id: row.session_id,
        start_time: row.start_time,
        end_time: row.end_time,
        fixes: fixes.into_iter().map(LocationFix::from).collect(),
    })
}

async fn hydrate_all(
    conn: &mut SqliteConnection,
    rows: Vec<SessionRow>,
) -> Result<Vec<LocationSession>, StorageError> {
    let mut sessions = Vec::with_capacity(rows.len());
    for row in rows {
        sessions.push(hydrate(conn, row).await?);
    }
    Ok(sessions)
}

/// Reads headers and fixes inside one transaction so a concurrent writer
/// can never produce a torn list.
async fn load_all_sessions(pool: &DbPool) -> Result<Vec<LocationSession>, StorageError> {
    let mut tx = pool.begin().await?;
    let rows: Vec<SessionRow> = sqlx::query_as(queries::SELECT_ALL_SESSIONS)
        .fetch_all(&mut *tx)
        .await?;
    let sessions = hydrate_all(&mut tx, rows).await?;
    tx.commit().await?;
    Ok(sessions)
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn allocate_session_id(&self, candidate: i64) -> Result<i64, StorageError> {
        let max_id: Option<i64> = sqlx::query_scalar(queries::SELECT_MAX_SESSION_ID)
            .fetch_one(&self.pool)
            .await?;
        Ok(match max_id {
            Some(max_id) if max_id >= candidate => max_id.saturating_add(1),
            _ => candidate,
        })
    }

    async fn create_session(&self, session: &LocationSession) -> Result<(), StorageError> {
        validate_header(session)?;
        for fix in &session.fixes {
            validate_fix(session.session_id, fix)?;
        }

        let _guard = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query(queries::INSERT_SESSION)
            .bind(session.session_id)
            .bind(session.start_time)
            .bind(session.end_time)
            .bind(session.fixes.len() as i64)
            .execute(&mut *tx)
            .await?;

        for fix in &session.fixes {
            insert_fix(&mut tx, session.session_id, fix).await?;
        }

        tx.commit().await?;
        self.notify_changed();

        info!(
            "Created session {} with {} fixes",
            session.session_id,
            session.fixes.len()
        );
        Ok(())
    }

    async fn append_fix(&self, session_id: i64, fix: &LocationFix) -> Result<(), StorageError> {
        validate_fix(session_id, fix)?;

        let _guard = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        let exists: i64 = sqlx::query_scalar(queries::SELECT_SESSION_EXISTS)
            .bind(session_id)
            .fetch_one(&mut *tx)
            .await?;
        if exists == 0 {
            return Err(StorageError::NotFound(session_id));
        }

        insert_fix(&mut tx, session_id, fix).await?;
        sqlx::query(queries::REFRESH_FIX_COUNT)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        self.notify_changed();

        debug!(
            "Appended fix ({}, {}) at {} to session {}",
            fix.latitude, fix.longitude, fix.timestamp_millis, session_id
        );
        Ok(())
    }

    async fn update_session(&self, session: &LocationSession) -> Result<(), StorageError> {
        validate_header(session)?;

        let _guard = self.write_gate.lock().await;
        let result = sqlx::query(queries::UPDATE_SESSION_HEADER)
            .bind(session.session_id)
            .bind(session.start_time)
            .bind(session.end_time)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(session.session_id));
        }

        self.notify_changed();
        Ok(())
    }

    async fn get_session_by_id(
        &self,
        session_id: i64,
    ) -> Result<Option<LocationSession>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let row: Option<SessionRow> = sqlx::query_as(queries::SELECT_SESSION_BY_ID)
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?;

        let session = match row {
            Some(row) => Some(hydrate(&mut tx, row).await?),
            None => None,
        };
        tx.commit().await?;
        Ok(session)
    }

    fn get_all_sessions(&self) -> SessionListStream {
        let pool = self.pool.clone();
        let changes = self.changes.subscribe();

        stream::unfold(
            (pool, changes, true),
            |(pool, mut changes, first)| async move {
                // Sender gone means the store was dropped: end the stream.
                if !first && changes.changed().await.is_err() {
                    return None;
                }
                let snapshot = load_all_sessions(&pool).await;
                Some((snapshot, (pool, changes, false)))
            },
        )
        .boxed()
    }

    async fn list_sessions(&self) -> Result<Vec<LocationSession>, StorageError> {
        load_all_sessions(&self.pool).await
    }

    async fn get_recent_sessions(&self, limit: u32) -> Result<Vec<LocationSession>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<SessionRow> = sqlx::query_as(queries::SELECT_RECENT_SESSIONS)
            .bind(i64::from(limit))
            .fetch_all(&mut *tx)
            .await?;
        let sessions = hydrate_all(&mut tx, rows).await?;
        tx.commit().await?;
        Ok(sessions)
    }

    async fn get_active_session(&self) -> Result<Option<LocationSession>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut rows: Vec<SessionRow> = sqlx::query_as(queries::SELECT_ACTIVE_SESSIONS)
            .fetch_all(&mut *tx)
            .await?;

        if rows.len() > 1 {
            let ids: Vec<i64> = rows.iter().map(|r| r.session_id).collect();
            return Err(StorageError::Corrupt(format!(
                "more than one active session: {:?}",
                ids
            )));
        }

        let session = match rows.pop() {
            Some(row) => Some(hydrate(&mut tx, row).await?),
            None => None,
        };
        tx.commit().await?;
        Ok(session)
    }

    async fn delete_session(&self, session_id: i64) -> Result<(), StorageError> {
        let _guard = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query(queries::DELETE_FIXES_FOR_SESSION)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query(queries::DELETE_SESSION)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        if result.rows_affected() > 0 {
            self.notify_changed();
            info!("Deleted session {}", session_id);
        } else {
            debug!("Delete of unknown session {} ignored", session_id);
        }
        Ok(())
    }

    async fn delete_all_sessions(&self) -> Result<(), StorageError> {
        let _guard = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query(queries::DELETE_ALL_FIXES)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query(queries::DELETE_ALL_SESSIONS)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        self.notify_changed();

        info!("Deleted all sessions ({} removed)", result.rows_affected());
        Ok(())
    }
}
