use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::{compass_bucket, CompassDirection, Coordinate};

/// One location reading. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_millis: i64,
    pub accuracy_meters: Option<f32>,
    pub altitude_meters: Option<f64>,
    pub speed_mps: Option<f32>,
    /// 0-360, absent when stationary.
    pub bearing_degrees: Option<f32>,
    pub address: Option<String>,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, timestamp_millis: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_millis,
            accuracy_meters: None,
            altitude_meters: None,
            speed_mps: None,
            bearing_degrees: None,
            address: None,
        }
    }

    pub fn with_accuracy(mut self, meters: f32) -> Self {
        self.accuracy_meters = Some(meters);
        self
    }

    pub fn with_altitude(mut self, meters: f64) -> Self {
        self.altitude_meters = Some(meters);
        self
    }

    pub fn with_speed(mut self, mps: f32) -> Self {
        self.speed_mps = Some(mps);
        self
    }

    pub fn with_bearing(mut self, degrees: f32) -> Self {
        self.bearing_degrees = Some(degrees);
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    pub fn has_valid_coordinate(&self) -> bool {
        self.coordinate().is_valid()
    }

    /// Whether the timestamp maps to a calendar date exports can print.
    pub fn has_valid_timestamp(&self) -> bool {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp_millis).is_some()
    }

    pub fn compass(&self) -> Option<CompassDirection> {
        compass_bucket(self.bearing_degrees)
    }
}
