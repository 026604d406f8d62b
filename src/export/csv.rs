use std::fmt::Write;

use super::iso8601_millis;
use crate::models::session::LocationSession;

pub const HEADER: &str = "latitude\tlongitude\ttimestamp";

/// Tab-separated rows for every fix, sessions concatenated in input order.
pub fn to_tsv(sessions: &[LocationSession]) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(HEADER);
    out.push('\n');
    for fix in sessions.iter().flat_map(|s| s.fixes.iter()) {
        let _ = writeln!(
            out,
            "{}\t{}\t{}",
            fix.latitude,
            fix.longitude,
            iso8601_millis(fix.timestamp_millis)
        );
    }
    out.into_bytes()
}
