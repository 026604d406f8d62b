use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer};
use uuid::Uuid;

use crate::error::FixSourceError;
use crate::export::ExportFormat;
use crate::models::fix::LocationFix;

/// One line pushed by the fix-source integration.
#[derive(Debug, Deserialize)]
pub struct FixSourceMessage {
    #[serde(flatten)]
    pub event: FixSourceEvent,
    #[serde(default)]
    pub uuid: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FixSourceEvent {
    Start,
    Stop,
    Fix { data: FixData },
    Failure { reason: FixSourceError },
    Export { format: ExportFormat, path: String },
    /// Removes one session and its fixes.
    Delete { session_id: i64 },
    /// Removes every session.
    Clear,
}

#[derive(Debug, Deserialize)]
pub struct FixData {
    #[serde(alias = "LATITUD", default, deserialize_with = "parse_f64_option")]
    pub latitude: Option<f64>,
    #[serde(alias = "LONGITUD", default, deserialize_with = "parse_f64_option")]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "parse_i64_option")]
    pub timestamp: Option<i64>,
    #[serde(alias = "GPS_DATETIME")]
    pub gps_datetime: Option<String>,
    #[serde(alias = "ACCURACY", default, deserialize_with = "parse_f64_option")]
    pub accuracy: Option<f64>,
    #[serde(alias = "ALTITUDE", default, deserialize_with = "parse_f64_option")]
    pub altitude: Option<f64>,
    #[serde(alias = "SPEED", default, deserialize_with = "parse_f64_option")]
    pub speed: Option<f64>,
    #[serde(alias = "COURSE", default, deserialize_with = "parse_f64_option")]
    pub bearing: Option<f64>,
    #[serde(alias = "ADDRESS")]
    pub address: Option<String>,
}

impl FixData {
    /// Epoch millis from `timestamp`, falling back to a UTC `gps_datetime`.
    pub fn timestamp_millis(&self) -> Option<i64> {
        if let Some(ts) = self.timestamp {
            return Some(ts);
        }
        let raw = self.gps_datetime.as_deref()?;
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
            .ok()
            .map(|t| t.and_utc().timestamp_millis())
    }

    /// `None` when the reading lacks a position or a time.
    pub fn to_fix(&self) -> Option<LocationFix> {
        let latitude = self.latitude?;
        let longitude = self.longitude?;
        let timestamp_millis = self.timestamp_millis()?;

        Some(LocationFix {
            latitude,
            longitude,
            timestamp_millis,
            accuracy_meters: self.accuracy.map(|v| v as f32),
            altitude_meters: self.altitude,
            speed_mps: self.speed.map(|v| v as f32),
            bearing_degrees: self.bearing.map(|v| v as f32),
            address: self.address.clone().filter(|a| !a.trim().is_empty()),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Int(i64),
    Float(f64),
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<StringOrNumber> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrNumber::Float(f)) => Ok(Some(f)),
        Some(StringOrNumber::Int(i)) => Ok(Some(i as f64)),
        Some(StringOrNumber::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim().parse::<f64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}

fn parse_i64_option<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<StringOrNumber> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrNumber::Int(i)) => Ok(Some(i)),
        Some(StringOrNumber::Float(f)) => Ok(Some(f as i64)),
        Some(StringOrNumber::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim().parse::<i64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}
