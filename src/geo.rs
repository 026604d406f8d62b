//! Spherical-earth helpers over location fixes.

use crate::models::fix::LocationFix;
use serde::{Deserialize, Serialize};

/// Mean earth radius used by the haversine formula.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompassDirection {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl CompassDirection {
    const ALL: [CompassDirection; 8] = [
        CompassDirection::N,
        CompassDirection::NE,
        CompassDirection::E,
        CompassDirection::SE,
        CompassDirection::S,
        CompassDirection::SW,
        CompassDirection::W,
        CompassDirection::NW,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompassDirection::N => "N",
            CompassDirection::NE => "NE",
            CompassDirection::E => "E",
            CompassDirection::SE => "SE",
            CompassDirection::S => "S",
            CompassDirection::SW => "SW",
            CompassDirection::W => "W",
            CompassDirection::NW => "NW",
        }
    }
}

/// Great-circle distance in meters.
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points.
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_METERS * c
}

pub fn total_distance(fixes: &[LocationFix]) -> f64 {
    fixes
        .windows(2)
        .map(|pair| distance_meters(pair[0].coordinate(), pair[1].coordinate()))
        .sum()
}

/// Meters per second between the first and last fix, `None` without elapsed time.
pub fn average_speed(fixes: &[LocationFix]) -> Option<f64> {
    let (first, last) = match (fixes.first(), fixes.last()) {
        (Some(first), Some(last)) if fixes.len() >= 2 => (first, last),
        _ => return None,
    };

    let elapsed_seconds = (last.timestamp_millis - first.timestamp_millis) as f64 / 1000.0;
    if elapsed_seconds <= 0.0 {
        return None;
    }
    Some(total_distance(fixes) / elapsed_seconds)
}

pub fn compass_bucket(bearing: Option<f32>) -> Option<CompassDirection> {
    let bearing = bearing.filter(|b| b.is_finite())?;
    let index = (bearing / 45.0).round() as i64;
    Some(CompassDirection::ALL[index.rem_euclid(8) as usize])
}

pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{:.0} m", meters)
    } else {
        format!("{:.2} km", meters / 1000.0)
    }
}

pub fn format_speed(meters_per_second: f64) -> String {
    format!("{:.1} km/h", meters_per_second * 3.6)
}
