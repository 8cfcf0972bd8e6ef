//! Combined/forwarded-style access log parser (§4.3).
//!
//! Fields are addressed positionally — no regex, the server's log format
//! is fixed. `"[dd/Mon/yyyy:HH:MM:SS"` and its trailing `"+zzzz]"` land in
//! two separate whitespace-split fields; only the first is consumed here.

use crate::anonymize::anonymize;
use crate::model::{Event, Protocol};

use super::{ParseOutcome, month_number, normalize_hms};

const FIELD_HOST: usize = 0;
const FIELD_IP: usize = 1;
const FIELD_TIMESTAMP: usize = 4;
const FIELD_URI_PATH: usize = 7;
const FIELD_STATUS: usize = 9;
const MIN_FIELDS: usize = 10;

/// Parse one combined/forwarded access-log line.
///
/// Returns a [`ParseOutcome`] carrying the normalized event, or signaling
/// `stop` once the parsed date drops at or below `watermark_web` — the
/// caller's `LogSource` then finishes the current file and opens no older
/// one (§4.2, §8 Scenario F).
pub fn parse_web_line(fields: &[String], watermark_web: u32) -> ParseOutcome {
    if fields.len() < MIN_FIELDS {
        return ParseOutcome::none();
    }

    let Some((date, time)) = parse_timestamp(&fields[FIELD_TIMESTAMP]) else {
        return ParseOutcome::none();
    };

    if date <= watermark_web {
        return ParseOutcome::stop();
    }

    let host = fields[FIELD_HOST].clone();
    let uri_path = fields[FIELD_URI_PATH].clone();
    let status = fields[FIELD_STATUS].clone();

    let penultimate = &fields[fields.len() - 2];
    let ip = if penultimate == "-" {
        &fields[FIELD_IP]
    } else {
        penultimate
    };
    let (ip_hash, ip_family) = anonymize(ip);

    ParseOutcome::event(Event {
        protocol: Protocol::Web,
        host,
        ip_hash,
        ip_family,
        date,
        time,
        uri_path,
        status,
    })
}

/// Parse `"[dd/Mon/yyyy:HH:MM:SS` (leading bracket, no trailing bracket)
/// into `(YYYYMMDD, HHMMSS)`.
fn parse_timestamp(field: &str) -> Option<(u32, String)> {
    let trimmed = field.strip_prefix('[')?;
    let (date_part, time_part) = trimmed.split_once(':')?;
    let mut date_fields = date_part.splitn(3, '/');
    let day: u32 = date_fields.next()?.parse().ok()?;
    let month = month_number(date_fields.next()?)?;
    let year: u32 = date_fields.next()?.parse().ok()?;
    if day == 0 || day > 31 {
        return None;
    }
    let time = normalize_hms(time_part)?;
    Some((year * 10_000 + month * 100 + day, time))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn parses_a_well_formed_line() {
        let line = r#"example.org 203.0.113.7 - - [25/Dec/1995:10:00:00 +0000] "GET /index.html HTTP/1.0" 200 1234 "-" "-" "-""#;
        let outcome = parse_web_line(&fields(line), 0);
        let event = outcome.event.expect("event");
        assert_eq!(event.host, "example.org");
        assert_eq!(event.date, 19951225);
        assert_eq!(event.time, "100000");
        assert_eq!(event.uri_path, "/index.html");
        assert_eq!(event.status, "200");
        assert_eq!(event.ip_family.as_str(), "v4");
        assert!(!outcome.stop);
    }

    #[test]
    fn uses_xff_override_when_penultimate_field_is_not_dash() {
        let line = r#"example.org 203.0.113.7 - - [25/Dec/1995:10:00:00 +0000] "GET /index.html HTTP/1.0" 200 1234 "-" "-" 198.51.100.9"#;
        let fields_direct = fields(line);
        let outcome = parse_web_line(&fields_direct, 0);
        let event = outcome.event.expect("event");
        let (expected_hash, _) = anonymize("198.51.100.9");
        assert_eq!(event.ip_hash, expected_hash);
    }

    #[test]
    fn falls_back_to_field_one_when_penultimate_is_dash() {
        let line = r#"example.org 203.0.113.7 - - [25/Dec/1995:10:00:00 +0000] "GET /index.html HTTP/1.0" 200 1234 "-" "-" -"#;
        let outcome = parse_web_line(&fields(line), 0);
        let event = outcome.event.expect("event");
        let (expected_hash, _) = anonymize("203.0.113.7");
        assert_eq!(event.ip_hash, expected_hash);
    }

    #[test]
    fn stops_at_or_before_watermark() {
        let line = r#"example.org 203.0.113.7 - - [15/Jan/2025:10:00:00 +0000] "GET / HTTP/1.0" 200 1 "-" "-" "-""#;
        let outcome = parse_web_line(&fields(line), 20250115);
        assert!(outcome.stop);
        assert!(outcome.event.is_none());
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let outcome = parse_web_line(&fields("short line here"), 0);
        assert!(!outcome.stop);
        assert!(outcome.event.is_none());
    }
}
