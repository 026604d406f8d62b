use std::fmt::Write;

use chrono::{DateTime, SecondsFormat, Utc};

use super::iso8601_millis;
use crate::models::fix::LocationFix;
use crate::models::session::LocationSession;

const CREATOR: &str = "siscom-sessions";
const EXTENSIONS_NS: &str = "urn:siscom:gpx:extensions:v1";

/// GPX 1.1 document with one `<trk>` per session, in input order.
pub fn to_gpx(sessions: &[LocationSession], generated_at: DateTime<Utc>) -> Vec<u8> {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        out,
        "<gpx version=\"1.1\" creator=\"{}\" xmlns=\"http://www.topografix.com/GPX/1/1\" xmlns:siscom=\"{}\">",
        CREATOR, EXTENSIONS_NS
    );
    let _ = writeln!(
        out,
        "  <metadata>\n    <time>{}</time>\n  </metadata>",
        generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );

    for session in sessions {
        write_track(&mut out, session);
    }

    out.push_str("</gpx>\n");
    out.into_bytes()
}

fn write_track(out: &mut String, session: &LocationSession) {
    out.push_str("  <trk>\n");
    let _ = writeln!(out, "    <name>Session {}</name>", session.session_id);
    out.push_str("    <trkseg>\n");
    for fix in &session.fixes {
        write_point(out, fix);
    }
    out.push_str("    </trkseg>\n");
    out.push_str("  </trk>\n");
}

fn write_point(out: &mut String, fix: &LocationFix) {
    let _ = writeln!(
        out,
        "      <trkpt lat=\"{}\" lon=\"{}\">",
        fix.latitude, fix.longitude
    );
    if let Some(ele) = fix.altitude_meters {
        let _ = writeln!(out, "        <ele>{}</ele>", ele);
    }
    let _ = writeln!(
        out,
        "        <time>{}</time>",
        iso8601_millis(fix.timestamp_millis)
    );
    if let Some(address) = fix.address.as_deref() {
        let _ = writeln!(out, "        <desc>{}</desc>", escape_xml(address));
    }

    if fix.accuracy_meters.is_some() || fix.speed_mps.is_some() || fix.bearing_degrees.is_some()
    {
        out.push_str("        <extensions>\n");
        if let Some(accuracy) = fix.accuracy_meters {
            let _ = writeln!(out, "          <siscom:accuracy>{}</siscom:accuracy>", accuracy);
        }
        if let Some(speed) = fix.speed_mps {
            let _ = writeln!(out, "          <siscom:speed>{}</siscom:speed>", speed);
        }
        if let Some(bearing) = fix.bearing_degrees {
            let _ = writeln!(out, "          <siscom:bearing>{}</siscom:bearing>", bearing);
        }
        out.push_str("        </extensions>\n");
    }

    out.push_str("      </trkpt>\n");
}

fn escape_xml(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
