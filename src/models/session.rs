use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::geo;
use crate::models::fix::LocationFix;

/// Snapshot of one tracking session. Mutating a snapshot never touches storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSession {
    pub session_id: i64,
    pub start_time: i64,
    /// `None` while the session is active.
    pub end_time: Option<i64>,
    /// Chronological, which is also insertion order.
    pub fixes: Vec<LocationFix>,
}

impl LocationSession {
    pub fn new(session_id: i64, start_time: i64) -> Self {
        Self {
            session_id,
            start_time,
            end_time: None,
            fixes: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn fix_count(&self) -> usize {
        self.fixes.len()
    }

    pub fn first_fix(&self) -> Option<&LocationFix> {
        self.fixes.first()
    }

    pub fn last_fix(&self) -> Option<&LocationFix> {
        self.fixes.last()
    }

    /// Elapsed time measured against `now` for active sessions and the frozen
    /// end time otherwise. Never negative.
    pub fn duration_millis_at(&self, now_millis: i64) -> i64 {
        let end = self.end_time.unwrap_or(now_millis);
        end.saturating_sub(self.start_time).max(0)
    }

    pub fn duration_seconds(&self, clock: &dyn Clock) -> i64 {
        self.duration_millis_at(clock.now_millis()) / 1000
    }

    /// `MM:SS`, or `HH:MM:SS` once the session passes an hour.
    pub fn formatted_duration(&self, clock: &dyn Clock) -> String {
        format_duration_seconds(self.duration_seconds(clock))
    }

    pub fn total_distance(&self) -> f64 {
        geo::total_distance(&self.fixes)
    }

    pub fn average_speed(&self) -> Option<f64> {
        geo::average_speed(&self.fixes)
    }
}

pub fn format_duration_seconds(total_seconds: i64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}
