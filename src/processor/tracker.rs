use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::db::store::SessionStore;
use crate::error::{StorageError, TrackerError};
use crate::models::fix::LocationFix;
use crate::models::session::LocationSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Tracking {
        session_id: i64,
        start_time: i64,
        /// Timestamp of the newest persisted fix, used to reject stale fixes.
        last_timestamp: Option<i64>,
    },
}

impl TrackerState {
    pub fn session_id(&self) -> Option<i64> {
        match self {
            TrackerState::Idle => None,
            TrackerState::Tracking { session_id, .. } => Some(*session_id),
        }
    }

    fn tracking(session: &LocationSession) -> Self {
        TrackerState::Tracking {
            session_id: session.session_id,
            start_time: session.start_time,
            last_timestamp: session.last_fix().map(|f| f.timestamp_millis),
        }
    }
}

/// Header of a session the tracker just closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoppedSession {
    pub session_id: i64,
    pub start_time: i64,
    pub end_time: i64,
}

impl StoppedSession {
    pub fn duration_millis(&self) -> i64 {
        self.end_time - self.start_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixOutcome {
    Recorded { session_id: i64 },
    /// No session is active; the fix was not stored.
    Dropped,
}

/// Gatekeeper for the one-active-session invariant. Every transition holds
/// the state lock for its whole duration, so fixes are applied one at a time.
pub struct SessionTracker {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<TrackerState>,
}

impl SessionTracker {
    /// Rebuilds the state from storage so an open session survives a restart.
    ///
    /// Corrupt storage leaves the tracker `Idle`; `start()` keeps reporting
    /// the corruption until the offending sessions are deleted.
    pub async fn recover(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        let state = match store.get_active_session().await {
            Ok(Some(session)) => {
                info!(
                    "Recovered active session {} ({} fixes)",
                    session.session_id,
                    session.fix_count()
                );
                TrackerState::tracking(&session)
            }
            Ok(None) => TrackerState::Idle,
            Err(StorageError::Corrupt(reason)) => {
                error!("Cannot recover active session, starting idle: {}", reason);
                TrackerState::Idle
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            store,
            clock,
            state: Mutex::new(state),
        })
    }

    pub async fn state(&self) -> TrackerState {
        *self.state.lock().await
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn active_session(&self) -> Result<Option<LocationSession>, StorageError> {
        let session_id = match self.state().await.session_id() {
            Some(id) => id,
            None => return Ok(None),
        };
        self.store.get_session_by_id(session_id).await
    }

    pub async fn start(&self) -> Result<i64, TrackerError> {
        let mut state = self.state.lock().await;

        if let Some(session_id) = state.session_id() {
            warn!("Start requested while session {} is active", session_id);
            return Err(TrackerError::AlreadyTracking(session_id));
        }

        // Another process may have opened a session behind our back.
        if let Some(active) = self.store.get_active_session().await? {
            warn!(
                "Start rejected: store already holds active session {}",
                active.session_id
            );
            *state = TrackerState::tracking(&active);
            return Err(TrackerError::AlreadyTracking(active.session_id));
        }

        let now = self.clock.now_millis();
        let session_id = self.store.allocate_session_id(now).await?;
        let session = LocationSession::new(session_id, now);
        self.store.create_session(&session).await?;

        *state = TrackerState::Tracking {
            session_id,
            start_time: now,
            last_timestamp: None,
        };
        info!("Started session {} at {}", session_id, now);
        Ok(session_id)
    }

    pub async fn on_fix(&self, fix: LocationFix) -> Result<FixOutcome, TrackerError> {
        let mut state = self.state.lock().await;

        let (session_id, start_time, last_timestamp) = match *state {
            TrackerState::Idle => {
                debug!(
                    "Dropping fix at {} with no active session",
                    fix.timestamp_millis
                );
                return Ok(FixOutcome::Dropped);
            }
            TrackerState::Tracking {
                session_id,
                start_time,
                last_timestamp,
            } => (session_id, start_time, last_timestamp),
        };

        if !fix.has_valid_coordinate() {
            return Err(TrackerError::InvalidCoordinate {
                latitude: fix.latitude,
                longitude: fix.longitude,
            });
        }
        if !fix.has_valid_timestamp() {
            return Err(TrackerError::InvalidTimestamp(fix.timestamp_millis));
        }

        if let Some(last) = last_timestamp {
            if fix.timestamp_millis < last {
                warn!(
                    "Rejected out of order fix at {} for session {} (last {})",
                    fix.timestamp_millis, session_id, last
                );
                return Err(TrackerError::OutOfOrderFix {
                    timestamp: fix.timestamp_millis,
                    last,
                });
            }
        }

        match self.store.append_fix(session_id, &fix).await {
            Ok(()) => {
                *state = TrackerState::Tracking {
                    session_id,
                    start_time,
                    last_timestamp: Some(fix.timestamp_millis),
                };
                Ok(FixOutcome::Recorded { session_id })
            }
            Err(StorageError::NotFound(id)) => {
                warn!("Active session {} vanished from storage, going idle", id);
                *state = TrackerState::Idle;
                Err(StorageError::NotFound(id).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Closes the active session. Once the end time is committed the stop
    /// has succeeded; callers wanting fixes read the session back themselves.
    pub async fn stop(&self) -> Result<StoppedSession, TrackerError> {
        let mut state = self.state.lock().await;

        let (session_id, start_time) = match *state {
            TrackerState::Idle => return Err(TrackerError::NoActiveSession),
            TrackerState::Tracking {
                session_id,
                start_time,
                ..
            } => (session_id, start_time),
        };

        let end_time = self.clock.now_millis().max(start_time);
        let header = LocationSession {
            session_id,
            start_time,
            end_time: Some(end_time),
            fixes: Vec::new(),
        };

        match self.store.update_session(&header).await {
            Ok(()) => {}
            Err(StorageError::NotFound(id)) => {
                warn!("Active session {} vanished from storage, going idle", id);
                *state = TrackerState::Idle;
                return Err(StorageError::NotFound(id).into());
            }
            Err(e) => return Err(e.into()),
        }

        *state = TrackerState::Idle;
        info!("Stopped session {} at {}", session_id, end_time);

        Ok(StoppedSession {
            session_id,
            start_time,
            end_time,
        })
    }

    /// Deletes one session, going idle first if it is the tracked one.
    pub async fn delete_session(&self, session_id: i64) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        self.store.delete_session(session_id).await?;
        if state.session_id() == Some(session_id) {
            info!("Deleted the active session {}, going idle", session_id);
            *state = TrackerState::Idle;
        }
        Ok(())
    }

    /// Wipes every session and fix. Also the way out of corrupt storage.
    pub async fn delete_all_sessions(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        self.store.delete_all_sessions().await?;
        *state = TrackerState::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::init_memory_pool;
    use crate::db::store::{SessionListStream, SqliteSessionStore};
    use async_trait::async_trait;

    /// Delegates to SQLite but cannot read single sessions back.
    struct UnreadableStore {
        inner: Arc<SqliteSessionStore>,
    }

    #[async_trait]
    impl SessionStore for UnreadableStore {
        async fn allocate_session_id(&self, candidate: i64) -> Result<i64, StorageError> {
            self.inner.allocate_session_id(candidate).await
        }

        async fn create_session(&self, session: &LocationSession) -> Result<(), StorageError> {
            self.inner.create_session(session).await
        }

        async fn append_fix(&self, session_id: i64, fix: &LocationFix) -> Result<(), StorageError> {
            self.inner.append_fix(session_id, fix).await
        }

        async fn update_session(&self, session: &LocationSession) -> Result<(), StorageError> {
            self.inner.update_session(session).await
        }

        async fn get_session_by_id(
            &self,
            _session_id: i64,
        ) -> Result<Option<LocationSession>, StorageError> {
            Err(StorageError::IoFailure("database is locked".to_string()))
        }

        fn get_all_sessions(&self) -> SessionListStream {
            self.inner.get_all_sessions()
        }

        async fn list_sessions(&self) -> Result<Vec<LocationSession>, StorageError> {
            self.inner.list_sessions().await
        }

        async fn get_recent_sessions(
            &self,
            limit: u32,
        ) -> Result<Vec<LocationSession>, StorageError> {
            self.inner.get_recent_sessions(limit).await
        }

        async fn get_active_session(&self) -> Result<Option<LocationSession>, StorageError> {
            self.inner.get_active_session().await
        }

        async fn delete_session(&self, session_id: i64) -> Result<(), StorageError> {
            self.inner.delete_session(session_id).await
        }

        async fn delete_all_sessions(&self) -> Result<(), StorageError> {
            self.inner.delete_all_sessions().await
        }
    }

    async fn setup(now: i64) -> (SessionTracker, Arc<SqliteSessionStore>, Arc<ManualClock>) {
        let store = Arc::new(SqliteSessionStore::new(init_memory_pool().await.unwrap()));
        let clock = Arc::new(ManualClock::new(now));
        let tracker = SessionTracker::recover(store.clone(), clock.clone())
            .await
            .unwrap();
        (tracker, store, clock)
    }

    #[tokio::test]
    async fn test_scenario_a_full_session() {
        let (tracker, store, clock) = setup(1000).await;

        let id = tracker.start().await.unwrap();
        tracker
            .on_fix(LocationFix::new(0.0, 0.0, 1000))
            .await
            .unwrap();
        tracker
            .on_fix(LocationFix::new(0.0, 0.001, 2000))
            .await
            .unwrap();
        clock.set(3000);
        let stopped = tracker.stop().await.unwrap();
        assert_eq!(
            stopped,
            StoppedSession {
                session_id: id,
                start_time: 1000,
                end_time: 3000
            }
        );
        assert_eq!(stopped.duration_millis(), 2000);

        let session = store.get_session_by_id(id).await.unwrap().unwrap();
        assert_eq!(session.end_time, Some(3000));
        assert_eq!(session.fix_count(), 2);
        assert_eq!(session.formatted_duration(clock.as_ref()), "00:02");
        assert!((session.total_distance() - 111.2).abs() < 0.1);
        assert_eq!(tracker.state().await, TrackerState::Idle);
        assert!(store.get_active_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scenario_b_fix_while_idle_is_dropped() {
        let (tracker, store, _clock) = setup(1000).await;

        let outcome = tracker
            .on_fix(LocationFix::new(10.0, 10.0, 1000))
            .await
            .unwrap();
        assert_eq!(outcome, FixOutcome::Dropped);
        assert!(store.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scenario_c_out_of_order_fix() {
        let (tracker, store, _clock) = setup(1000).await;
        let id = tracker.start().await.unwrap();
        tracker
            .on_fix(LocationFix::new(0.0, 0.0, 5000))
            .await
            .unwrap();

        let err = tracker
            .on_fix(LocationFix::new(0.0, 0.1, 4000))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TrackerError::OutOfOrderFix {
                timestamp: 4000,
                last: 5000
            }
        );

        let session = store.get_session_by_id(id).await.unwrap().unwrap();
        assert_eq!(session.fix_count(), 1);

        // Equal timestamps are non-decreasing and therefore accepted.
        tracker
            .on_fix(LocationFix::new(0.0, 0.2, 5000))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_coordinate_is_rejected() {
        let (tracker, store, _clock) = setup(1000).await;
        let id = tracker.start().await.unwrap();

        let err = tracker
            .on_fix(LocationFix::new(0.0, 181.0, 1000))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidCoordinate { .. }));
        assert_eq!(
            store.get_session_by_id(id).await.unwrap().unwrap().fix_count(),
            0
        );
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let (tracker, _store, _clock) = setup(1000).await;
        let id = tracker.start().await.unwrap();
        assert_eq!(
            tracker.start().await.unwrap_err(),
            TrackerError::AlreadyTracking(id)
        );
    }

    #[tokio::test]
    async fn test_concurrent_starts_open_one_session() {
        let (tracker, store, _clock) = setup(1000).await;
        let (a, b) = tokio::join!(tracker.start(), tracker.start());

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert!(store.get_active_session().await.unwrap().is_some());
        assert_eq!(store.list_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_rejected_when_store_has_active_session() {
        let (tracker, store, _clock) = setup(1000).await;
        store
            .create_session(&LocationSession::new(77, 500))
            .await
            .unwrap();

        assert_eq!(
            tracker.start().await.unwrap_err(),
            TrackerError::AlreadyTracking(77)
        );
        assert_eq!(tracker.state().await.session_id(), Some(77));
    }

    #[tokio::test]
    async fn test_stop_while_idle() {
        let (tracker, _store, _clock) = setup(1000).await;
        assert_eq!(
            tracker.stop().await.unwrap_err(),
            TrackerError::NoActiveSession
        );
    }

    #[tokio::test]
    async fn test_stop_with_clock_behind_start_keeps_end_after_start() {
        let (tracker, _store, clock) = setup(10_000).await;
        tracker.start().await.unwrap();
        clock.set(4_000);
        let stopped = tracker.stop().await.unwrap();
        assert_eq!(stopped.end_time, stopped.start_time);
    }

    #[tokio::test]
    async fn test_sessions_started_in_same_millisecond_get_distinct_ids() {
        let (tracker, store, _clock) = setup(1000).await;
        let first = tracker.start().await.unwrap();
        tracker.stop().await.unwrap();
        let second = tracker.start().await.unwrap();
        tracker.stop().await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.list_sessions().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_recover_resumes_tracking() {
        let (tracker, store, clock) = setup(1000).await;
        let id = tracker.start().await.unwrap();
        tracker
            .on_fix(LocationFix::new(1.0, 1.0, 1500))
            .await
            .unwrap();
        drop(tracker);

        let revived = SessionTracker::recover(store.clone(), clock.clone())
            .await
            .unwrap();
        assert_eq!(
            revived.state().await,
            TrackerState::Tracking {
                session_id: id,
                start_time: 1000,
                last_timestamp: Some(1500)
            }
        );

        let err = revived
            .on_fix(LocationFix::new(1.0, 1.0, 1400))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::OutOfOrderFix { .. }));
    }

    #[tokio::test]
    async fn test_deleted_session_sends_tracker_idle() {
        let (tracker, store, _clock) = setup(1000).await;
        let id = tracker.start().await.unwrap();
        store.delete_session(id).await.unwrap();

        let err = tracker
            .on_fix(LocationFix::new(1.0, 1.0, 1500))
            .await
            .unwrap_err();
        assert_eq!(err, TrackerError::Storage(StorageError::NotFound(id)));
        assert_eq!(tracker.state().await, TrackerState::Idle);
        assert!(tracker.start().await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_succeeds_when_read_back_fails() {
        let inner = Arc::new(SqliteSessionStore::new(init_memory_pool().await.unwrap()));
        let store = Arc::new(UnreadableStore {
            inner: inner.clone(),
        });
        let clock = Arc::new(ManualClock::new(1000));
        let tracker = SessionTracker::recover(store, clock.clone()).await.unwrap();

        let id = tracker.start().await.unwrap();
        clock.set(4000);
        let stopped = tracker.stop().await.unwrap();

        assert_eq!(stopped.session_id, id);
        assert_eq!(stopped.end_time, 4000);
        assert_eq!(tracker.state().await, TrackerState::Idle);
        assert!(inner.get_active_session().await.unwrap().is_none());
        assert_eq!(
            tracker.stop().await.unwrap_err(),
            TrackerError::NoActiveSession
        );
    }

    #[tokio::test]
    async fn test_recover_with_two_open_sessions_starts_idle() {
        let store = Arc::new(SqliteSessionStore::new(init_memory_pool().await.unwrap()));
        store
            .create_session(&LocationSession::new(1, 100))
            .await
            .unwrap();
        store
            .create_session(&LocationSession::new(2, 200))
            .await
            .unwrap();

        let tracker = SessionTracker::recover(store.clone(), Arc::new(ManualClock::new(1000)))
            .await
            .unwrap();
        assert_eq!(tracker.state().await, TrackerState::Idle);

        // Fixes are still dropped, and start keeps reporting the corruption.
        assert_eq!(
            tracker
                .on_fix(LocationFix::new(1.0, 1.0, 1000))
                .await
                .unwrap(),
            FixOutcome::Dropped
        );
        assert!(matches!(
            tracker.start().await.unwrap_err(),
            TrackerError::Storage(StorageError::Corrupt(_))
        ));

        tracker.delete_session(1).await.unwrap();
        assert_eq!(
            tracker.start().await.unwrap_err(),
            TrackerError::AlreadyTracking(2)
        );
        tracker.stop().await.unwrap();
        assert!(tracker.start().await.is_ok());
    }

    #[tokio::test]
    async fn test_out_of_range_timestamp_is_rejected() {
        let (tracker, store, _clock) = setup(1000).await;
        let id = tracker.start().await.unwrap();

        let err = tracker
            .on_fix(LocationFix::new(0.0, 0.0, i64::MAX))
            .await
            .unwrap_err();
        assert_eq!(err, TrackerError::InvalidTimestamp(i64::MAX));

        // The bad fix must not become the ordering watermark.
        tracker
            .on_fix(LocationFix::new(0.0, 0.0, 2000))
            .await
            .unwrap();
        assert_eq!(
            store.get_session_by_id(id).await.unwrap().unwrap().fix_count(),
            1
        );
    }

    #[tokio::test]
    async fn test_deleting_tracked_session_goes_idle() {
        let (tracker, store, _clock) = setup(1000).await;
        let first = tracker.start().await.unwrap();
        tracker.stop().await.unwrap();
        let second = tracker.start().await.unwrap();

        tracker.delete_session(first).await.unwrap();
        assert_eq!(tracker.state().await.session_id(), Some(second));

        tracker.delete_session(second).await.unwrap();
        assert_eq!(tracker.state().await, TrackerState::Idle);
        assert!(store.list_sessions().await.unwrap().is_empty());

        tracker.start().await.unwrap();
        tracker.delete_all_sessions().await.unwrap();
        assert_eq!(tracker.state().await, TrackerState::Idle);
        assert!(store.get_active_session().await.unwrap().is_none());
    }
}
