//! Peer snapshot replication (§4.8 / §6 Replication URL): best-effort HTTPS
//! fetch over a 31-day sliding window, forcing refresh of the newest 3 days
//! and fetching older days only if locally absent. Failures are logged and
//! skipped — they never abort the phase (§5, §7).

pub mod error;

use std::path::PathBuf;
use std::time::Duration;

use time::Date;
use tracing::warn;

pub use error::ReplicateError;

use crate::model::Protocol;

const WINDOW_DAYS: i64 = 31;
const FORCE_REFRESH_DAYS: i64 = 3;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One file this replication run should consider fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanItem {
    pub protocol: Protocol,
    pub date: u32,
    /// Fetch even if the file already exists locally.
    pub force: bool,
}

/// Outcome of one replication run.
#[derive(Debug, Clone, Default)]
pub struct ReplicationSummary {
    pub fetched: u32,
    pub skipped_present: u32,
    pub failed: u32,
}

pub struct Replicator {
    client: reqwest::blocking::Client,
    peer: String,
    stats_dir: PathBuf,
}

impl Replicator {
    pub fn new(peer: impl Into<String>, stats_dir: impl Into<PathBuf>) -> Result<Self, ReplicateError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Replicator {
            client,
            peer: peer.into(),
            stats_dir: stats_dir.into(),
        })
    }

    /// The 31-day window plan for `today`, newest day first, both protocols.
    /// Pure and deterministic so the freshness policy (§6, Scenario E) can
    /// be tested without a network.
    pub fn plan(&self, today: Date) -> Vec<PlanItem> {
        let mut items = Vec::with_capacity((WINDOW_DAYS as usize) * 2);
        for protocol in [Protocol::Web, Protocol::Gemini] {
            for offset in 0..WINDOW_DAYS {
                let Some(day) = today.previous_day_n(offset) else {
                    continue;
                };
                items.push(PlanItem {
                    protocol,
                    date: day.year() as u32 * 10_000 + u32::from(day.month() as u8) * 100 + day.day() as u32,
                    force: offset < FORCE_REFRESH_DAYS,
                });
            }
        }
        items
    }

    /// Execute the plan for `today`: force-refresh items always fetch;
    /// others fetch only if the local file is absent. Every failure is
    /// logged and counted, never returned as an error.
    pub fn run(&self, today: Date) -> ReplicationSummary {
        let mut summary = ReplicationSummary::default();
        for item in self.plan(today) {
            let name = format!("{}_{:08}.{}.json.gz", item.protocol, item.date, self.peer);
            let dest = self.stats_dir.join(&name);
            if !item.force && dest.exists() {
                summary.skipped_present += 1;
                continue;
            }
            match self.fetch(&name) {
                Ok(body) => match write_atomic(&dest, &body) {
                    Ok(()) => summary.fetched += 1,
                    Err(err) => {
                        warn!(file = %name, error = %err, "failed to store replicated snapshot");
                        summary.failed += 1;
                    }
                },
                Err(err) => {
                    warn!(file = %name, peer = %self.peer, error = %err, "replication fetch failed");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    fn fetch(&self, basename: &str) -> Result<Vec<u8>, ReplicateError> {
        let url = format!("https://{}/foostats/{basename}", self.peer);
        let response = self.client.get(&url).send()?.error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }
}

fn write_atomic(dest: &std::path::Path, body: &[u8]) -> Result<(), ReplicateError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = dest.with_extension("gz.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, dest)?;
    Ok(())
}


trait DateExt {
    fn previous_day_n(self, n: i64) -> Option<Date>;
}

impl DateExt for Date {
    fn previous_day_n(self, n: i64) -> Option<Date> {
        self.checked_sub(time::Duration::days(n))
    }
}
