//! Request filter (§4.5): sticky per-IP block, odd-pattern blocklist, and a
//! per-second rate cap, in that decision order. Owns an append-only filter
//! log that records the first decision for each distinct subject and is
//! silent on repeats, so a large run doesn't produce a line per request.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use thiserror::Error;

use crate::model::Event;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("failed to read patterns file `{path}`: {source}")]
    PatternsRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write filter log `{path}`: {source}")]
    LogWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Why an Event was accepted or blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    StickyBlocked,
    OddPattern,
    ExcessiveRate,
}

impl Decision {
    fn is_blocked(self) -> bool {
        !matches!(self, Decision::Accepted)
    }

    fn severity(self) -> &'static str {
        match self {
            Decision::Accepted => "OK",
            _ => "WARN",
        }
    }

    fn reason(self) -> &'static str {
        match self {
            Decision::Accepted => "accepted",
            Decision::StickyBlocked => "sticky block",
            Decision::OddPattern => "odd pattern match",
            Decision::ExcessiveRate => "excessive rate",
        }
    }
}

/// Per-Event allow/block decision, a sticky block set, an odd-pattern
/// blocklist, and a per-second rate cap (§4.5). Owns the filter log.
pub struct Filter {
    patterns: Vec<String>,
    blocked: HashSet<String>,
    last_time: Option<String>,
    counts: HashMap<String, u32>,
    log: FilterLog,
}

impl Filter {
    /// Load the odd-pattern list from `patterns_path` (one substring per
    /// line; blank lines and lines starting with `#` are ignored) and open
    /// `log_path` for append-only, subject-deduplicated decision logging.
    pub fn open(patterns_path: &Path, log_path: &Path) -> Result<Self, FilterError> {
        let patterns = load_patterns(patterns_path)?;
        let log = FilterLog::open(log_path)?;
        Ok(Filter {
            patterns,
            blocked: HashSet::new(),
            last_time: None,
            counts: HashMap::new(),
            log,
        })
    }

    /// Decide an Event and log the decision if its subject hasn't been
    /// logged yet this run. Returns `true` if the Event is accepted.
    pub fn accept(&mut self, event: &Event) -> Result<bool, FilterError> {
        let decision = self.decide(event);
        if decision.is_blocked() {
            self.blocked.insert(event.ip_hash.clone());
        }
        let subject = if decision == Decision::OddPattern {
            &event.uri_path
        } else {
            &event.ip_hash
        };
        self.log.record(subject, decision)?;
        Ok(!decision.is_blocked())
    }

    fn decide(&mut self, event: &Event) -> Decision {
        if self.blocked.contains(&event.ip_hash) {
            return Decision::StickyBlocked;
        }
        if self
            .patterns
            .iter()
            .any(|pattern| event.uri_path.contains(pattern.as_str()))
        {
            return Decision::OddPattern;
        }
        self.rate_gate(event)
    }

    fn rate_gate(&mut self, event: &Event) -> Decision {
        if self.last_time.as_deref() != Some(event.time.as_str()) {
            self.last_time = Some(event.time.clone());
            self.counts.clear();
        }
        let count = self.counts.entry(event.ip_hash.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            Decision::ExcessiveRate
        } else {
            Decision::Accepted
        }
    }
}

fn load_patterns(path: &Path) -> Result<Vec<String>, FilterError> {
    let text = fs::read_to_string(path).map_err(|source| FilterError::PatternsRead {
        path: path.display().to_string(),
        source,
    })?;
    Ok(text
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(|line| line.trim_end().to_string())
        .collect())
}

/// Append-only filter decision log, deduplicated by subject within a run.
struct FilterLog {
    path: std::path::PathBuf,
    seen: HashSet<String>,
}

impl FilterLog {
    fn open(path: &Path) -> Result<Self, FilterError> {
        Ok(FilterLog {
            path: path.to_path_buf(),
            seen: HashSet::new(),
        })
    }

    fn record(&mut self, subject: &str, decision: Decision) -> Result<(), FilterError> {
        if !self.seen.insert(subject.to_string()) {
            return Ok(());
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| FilterError::LogWrite {
                path: self.path.display().to_string(),
                source,
            })?;
        writeln!(file, "{}: {} {}", decision.severity(), subject, decision.reason()).map_err(
            |source| FilterError::LogWrite {
                path: self.path.display().to_string(),
                source,
            },
        )?;
        Ok(())
    }
}
