//! Gemini request/connection log pairing (§4.4).
//!
//! Gemini events arrive as two independent syslog lines: a `vger` line
//! (the request, including the served host/path/status) and a `relayd`
//! line (the TLS relay, carrying the peer IP). `GeminiParser` keeps one
//! pending half of each kind and emits a merged `Event` the moment both
//! sides are present with string-equal timestamps — a small two-slot state
//! machine, as the design notes call for.

use crate::anonymize::anonymize;
use crate::model::{Event, Protocol};

use super::{ParseOutcome, month_number, normalize_hms};

#[derive(Debug, Clone)]
struct VgerHalf {
    host: String,
    uri_path: String,
    status: String,
    date: u32,
    time: String,
}

#[derive(Debug, Clone)]
struct RelaydHalf {
    ip: String,
    date: u32,
    time: String,
}

/// Stateful pairing parser: holds at most one pending `vger` half and one
/// pending `relayd` half, overwriting whichever is stale if a new line of
/// the same kind arrives before its pair does. Unpaired halves left at
/// end-of-file are simply dropped (best-effort, per §4.4).
#[derive(Debug, Default)]
pub struct GeminiParser {
    pending_vger: Option<VgerHalf>,
    pending_relayd: Option<RelaydHalf>,
}

impl GeminiParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line's fields to the pairing state machine.
    ///
    /// A new half completes the pending half of the *other* kind if their
    /// times are string-equal, in which case only the consumed pending
    /// half is cleared — the new half is never itself stored, since it
    /// was immediately consumed. Otherwise the new half becomes (replaces)
    /// the pending half of its own kind, per "a single in-flight pair is
    /// kept" (§4.4, §9).
    pub fn accept(&mut self, file_year: i32, fields: &[String], watermark_gemini: u32) -> ParseOutcome {
        if is_vger_line(fields) {
            match parse_vger(file_year, fields) {
                Some(vger) => self.accept_vger(vger),
                None => ParseOutcome::none(),
            }
        } else if is_relayd_line(fields) {
            match parse_relayd(file_year, fields) {
                Some(relayd) => {
                    if relayd.date <= watermark_gemini {
                        return ParseOutcome::stop();
                    }
                    self.accept_relayd(relayd)
                }
                None => ParseOutcome::none(),
            }
        } else {
            ParseOutcome::none()
        }
    }

    fn accept_vger(&mut self, vger: VgerHalf) -> ParseOutcome {
        let pairs = self
            .pending_relayd
            .as_ref()
            .is_some_and(|relayd| relayd.time == vger.time);
        if pairs {
            let relayd = self.pending_relayd.take().expect("checked above");
            ParseOutcome::event(merge(vger, relayd))
        } else {
            self.pending_vger = Some(vger);
            ParseOutcome::none()
        }
    }

    fn accept_relayd(&mut self, relayd: RelaydHalf) -> ParseOutcome {
        let pairs = self
            .pending_vger
            .as_ref()
            .is_some_and(|vger| vger.time == relayd.time);
        if pairs {
            let vger = self.pending_vger.take().expect("checked above");
            ParseOutcome::event(merge(vger, relayd))
        } else {
            self.pending_relayd = Some(relayd);
            ParseOutcome::none()
        }
    }
}

fn merge(vger: VgerHalf, relayd: RelaydHalf) -> Event {
    let (ip_hash, ip_family) = anonymize(&relayd.ip);
    Event {
        protocol: Protocol::Gemini,
        host: vger.host,
        ip_hash,
        ip_family,
        date: vger.date,
        time: vger.time,
        uri_path: vger.uri_path,
        status: vger.status,
    }
}

fn is_vger_line(fields: &[String]) -> bool {
    fields.len() > 4 && fields[4] == "vger:"
}

fn is_relayd_line(fields: &[String]) -> bool {
    fields.len() > 6 && fields[5] == "relay" && fields[6].starts_with("gemini")
}

fn parse_vger(file_year: i32, fields: &[String]) -> Option<VgerHalf> {
    let date = parse_month_day(file_year, &fields[0], &fields[1])?;
    let time = normalize_hms(&fields[2])?;

    let quoted_idx = fields
        .iter()
        .skip(5)
        .position(|field| field.starts_with('"') && field.contains('/'))
        .map(|idx| idx + 5)?;
    let quoted = fields[quoted_idx].trim_matches('"');
    let mut parts = quoted.splitn(3, '/');
    let _scheme = parts.next()?;
    let host = parts.next()?.to_string();
    let path_rest = parts.next().unwrap_or("");
    let uri_path = format!("/{path_rest}");

    let status = fields.get(quoted_idx + 1)?.trim_matches('"').to_string();

    Some(VgerHalf {
        host,
        uri_path,
        status,
        date,
        time,
    })
}

fn parse_relayd(file_year: i32, fields: &[String]) -> Option<RelaydHalf> {
    let date = parse_month_day(file_year, &fields[0], &fields[1])?;
    let time = normalize_hms(&fields[2])?;
    let ip = fields.get(12)?.clone();
    Some(RelaydHalf { ip, date, time })
}

fn parse_month_day(file_year: i32, month: &str, day: &str) -> Option<u32> {
    let month = month_number(month)?;
    let day: u32 = day.parse().ok()?;
    if day == 0 || day > 31 || file_year < 0 {
        return None;
    }
    Some(file_year as u32 * 10_000 + month * 100 + day)
}
