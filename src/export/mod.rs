//! Byte-level exports of session lists for external tools.

pub mod csv;
pub mod gpx;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::models::session::LocationSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Gpx,
    #[serde(alias = "tsv")]
    Csv,
}

impl ExportFormat {
    pub fn file_extension(&self) -> &'static str {
        match self {
            ExportFormat::Gpx => "gpx",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Gpx => "application/gpx+xml",
            ExportFormat::Csv => "text/tab-separated-values",
        }
    }
}

/// `generated_at` only feeds the GPX metadata block.
pub fn export(
    format: ExportFormat,
    sessions: &[LocationSession],
    generated_at: DateTime<Utc>,
) -> Vec<u8> {
    match format {
        ExportFormat::Gpx => gpx::to_gpx(sessions, generated_at),
        ExportFormat::Csv => csv::to_tsv(sessions),
    }
}

/// UTC ISO-8601 with millisecond precision, e.g. `2024-01-01T00:00:01.500Z`.
pub(crate) fn iso8601_millis(timestamp_millis: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(timestamp_millis) {
        Some(t) => t.to_rfc3339_opts(SecondsFormat::Millis, true),
        // Unreachable for stored fixes, which are range-checked on write.
        None => DateTime::<Utc>::default().to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}
