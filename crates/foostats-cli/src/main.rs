//! foostats command-line interface.
//!
//! This binary selects one of the pipeline's phases and runs it against a
//! shared stats directory, as defined by the core library's phase
//! contract (ingest / replicate / merge / all). It is a thin wrapper over
//! `foostats-core`; the report renderer, HTML linkification, and index
//! page generation are external collaborators and out of scope here.
//!
//! Typical usage:
//! - `foostats ingest --stats-dir ./stats --web-log ./access.log* --host nodeA`
//! - `foostats replicate --stats-dir ./stats --peer node-b.example --host nodeA`
//! - `foostats merge --stats-dir ./stats --out ./merged.json --host nodeA`
//! - `foostats all --stats-dir ./stats --web-log ./access.log* --peer node-b.example --host nodeA`
//!
//! Errors are reported to stderr; a non-zero exit code indicates a fatal
//! error in any selected phase (§6).
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing_subscriber::EnvFilter;

use foostats_core::{Aggregator, Filter, GeminiParser, LineOutcome, LogSource, Merger, Replicator, SnapshotStore};

#[derive(Parser, Debug)]
#[command(name = "foostats")]
#[command(
    version = concat!(
        env!("CARGO_PKG_VERSION"),
        " (commit ",
        env!("FOOSTATS_BUILD_COMMIT"),
        ", built ",
        env!("FOOSTATS_BUILD_DATE"),
        ")"
    )
)]
#[command(
    about = "Privacy-preserving analytics pipeline for a site served over HTTP(S) and Gemini.",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read server logs, filter, aggregate, and persist today's snapshots.
    Ingest {
        #[command(flatten)]
        common: CommonArgs,
        /// Glob pattern for the combined/forwarded web access log.
        #[arg(long)]
        web_log: Option<String>,
        /// Glob pattern for the Gemini (`vger`/`relayd`) syslog.
        #[arg(long)]
        gemini_log: Option<String>,
        /// Odd-pattern blocklist file (one substring per line).
        #[arg(long)]
        patterns_file: PathBuf,
        /// Append-only filter decision log.
        #[arg(long)]
        filter_log: PathBuf,
    },
    /// Pull peer snapshots over HTTPS under the 31-day freshness policy.
    Replicate {
        #[command(flatten)]
        common: CommonArgs,
        /// Peer hostname to replicate from.
        #[arg(long)]
        peer: String,
    },
    /// Merge snapshots across hosts and protocols into a daily view.
    Merge {
        #[command(flatten)]
        common: CommonArgs,
        /// Where to write the `{date -> MergedDay}` JSON report.
        #[arg(long)]
        out: PathBuf,
    },
    /// Run ingest, then replicate (if `--peer` given), then merge.
    All {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long)]
        web_log: Option<String>,
        #[arg(long)]
        gemini_log: Option<String>,
        #[arg(long)]
        patterns_file: PathBuf,
        #[arg(long)]
        filter_log: PathBuf,
        #[arg(long)]
        peer: Option<String>,
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(clap::Args, Debug, Clone)]
struct CommonArgs {
    /// Directory holding `<protocol>_<date>.<host>.json.gz` snapshots.
    #[arg(long)]
    stats_dir: PathBuf,
    /// This node's short hostname, used in snapshot filenames. Falls back
    /// to the `HOSTNAME` environment variable if omitted.
    #[arg(long)]
    host: Option<String>,
    /// Override "today" (`YYYY-MM-DD`) for the replication/merge window.
    /// Defaults to the current UTC date; mainly useful for backfills and
    /// for deterministic tests.
    #[arg(long)]
    today: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Ingest {
            common,
            web_log,
            gemini_log,
            patterns_file,
            filter_log,
        } => cmd_ingest(common, web_log, gemini_log, &patterns_file, &filter_log),
        Commands::Replicate { common, peer } => cmd_replicate(common, peer),
        Commands::Merge { common, out } => cmd_merge(common, &out),
        Commands::All {
            common,
            web_log,
            gemini_log,
            patterns_file,
            filter_log,
            peer,
            out,
        } => cmd_ingest(common.clone(), web_log, gemini_log, &patterns_file, &filter_log)
            .and_then(|()| match peer {
                Some(peer) => cmd_replicate(common.clone(), peer),
                None => Ok(()),
            })
            .and_then(|()| cmd_merge(common, &out)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message);
            if let Some(hint) = err.hint {
                eprintln!("hint: {}", hint);
            }
            ExitCode::from(2)
        }
    }
}

#[derive(Debug)]
struct CliError {
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(message: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            message: message.into(),
            hint,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::new(err.to_string(), None)
    }
}

fn resolve_host(common: &CommonArgs) -> Result<String, CliError> {
    if let Some(host) = &common.host {
        return Ok(host.clone());
    }
    std::env::var("HOSTNAME").map_err(|_| {
        CliError::new(
            "missing local hostname",
            Some("pass --host <NAME> or set the HOSTNAME environment variable".to_string()),
        )
    })
}

const TODAY_FORMAT: &[time::format_description::FormatItem<'_>] =
    format_description!("[year]-[month]-[day]");

fn resolve_today(common: &CommonArgs) -> Result<Date, CliError> {
    match &common.today {
        Some(text) => Date::parse(text, TODAY_FORMAT).map_err(|err| {
            CliError::new(
                format!("invalid --today `{text}`: {err}"),
                Some("use YYYY-MM-DD".to_string()),
            )
        }),
        None => Ok(OffsetDateTime::now_utc().date()),
    }
}

fn cmd_ingest(
    common: CommonArgs,
    web_log: Option<String>,
    gemini_log: Option<String>,
    patterns_file: &std::path::Path,
    filter_log: &std::path::Path,
) -> Result<(), CliError> {
    let host = resolve_host(&common)?;
    let store = SnapshotStore::new(&common.stats_dir, &host);
    let filter = Filter::open(patterns_file, filter_log).map_err(|err| CliError::new(err.to_string(), None))?;
    let mut aggregator = Aggregator::new(filter);

    if let Some(pattern) = web_log {
        let watermark_web = store
            .watermark(foostats_core::Protocol::Web)
            .map_err(|err| CliError::new(err.to_string(), None))?;
        let source = LogSource::open(&pattern).map_err(|err| CliError::new(err.to_string(), None))?;
        let mut ingest_err: Option<CliError> = None;
        source
            .for_each_line(|_year, fields| {
                let outcome = foostats_core::parse_web_line(fields, watermark_web);
                if let Some(event) = outcome.event {
                    if let Err(err) = aggregator.add(event) {
                        ingest_err = Some(CliError::new(err.to_string(), None));
                        return LineOutcome::Stop;
                    }
                }
                if outcome.stop {
                    LineOutcome::Stop
                } else {
                    LineOutcome::Continue
                }
            })
            .map_err(|err| CliError::new(err.to_string(), None))?;
        if let Some(err) = ingest_err {
            return Err(err);
        }
    }

    if let Some(pattern) = gemini_log {
        let watermark_gemini = store
            .watermark(foostats_core::Protocol::Gemini)
            .map_err(|err| CliError::new(err.to_string(), None))?;
        let source = LogSource::open(&pattern).map_err(|err| CliError::new(err.to_string(), None))?;
        let mut parser = GeminiParser::new();
        let mut ingest_err: Option<CliError> = None;
        source
            .for_each_line(|file_year, fields| {
                let outcome = parser.accept(file_year, fields, watermark_gemini);
                if let Some(event) = outcome.event {
                    if let Err(err) = aggregator.add(event) {
                        ingest_err = Some(CliError::new(err.to_string(), None));
                        return LineOutcome::Stop;
                    }
                }
                if outcome.stop {
                    LineOutcome::Stop
                } else {
                    LineOutcome::Continue
                }
            })
            .map_err(|err| CliError::new(err.to_string(), None))?;
        if let Some(err) = ingest_err {
            return Err(err);
        }
    }

    let days = aggregator.into_days();
    store
        .write_all(&days)
        .map_err(|err| CliError::new(err.to_string(), None))?;
    tracing::info!(days = days.len(), host = %host, "ingest complete");
    Ok(())
}

fn cmd_replicate(common: CommonArgs, peer: String) -> Result<(), CliError> {
    let today = resolve_today(&common)?;
    let replicator = Replicator::new(peer.clone(), &common.stats_dir).map_err(|err| CliError::new(err.to_string(), None))?;
    let summary = replicator.run(today);
    tracing::info!(
        peer = %peer,
        fetched = summary.fetched,
        skipped_present = summary.skipped_present,
        failed = summary.failed,
        "replication complete"
    );
    Ok(())
}

fn cmd_merge(common: CommonArgs, out: &std::path::Path) -> Result<(), CliError> {
    let host = resolve_host(&common)?;
    let today = resolve_today(&common)?;
    let store = SnapshotStore::new(&common.stats_dir, &host);
    let merger = Merger::new(store);
    let window = merger
        .merge_window(today)
        .map_err(|err| CliError::new(err.to_string(), None))?;

    let json = serde_json::to_string_pretty(&window)
        .context("failed to serialize merged report")
        .map_err(CliError::from)?;
    write_atomic(out, &json)?;
    tracing::info!(days = window.len(), out = %out.display(), "merge complete");
    Ok(())
}

fn write_atomic(path: &std::path::Path, contents: &str) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {}", parent.display()))
                .map_err(CliError::from)?;
        }
    }

    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);

    fs::write(&tmp_path, contents)
        .with_context(|| format!("Failed to write report: {}", tmp_path.display()))
        .map_err(CliError::from)?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("Failed to replace report: {}", path.display()))
                .map_err(CliError::from)?;
            fs::rename(&tmp_path, path)
                .with_context(|| format!("Failed to replace report: {}", path.display()))
                .map_err(CliError::from)?;
        } else {
            return Err(CliError::new(
                format!("Failed to move report into place: {err}"),
                Some("check write permissions".to_string()),
            ));
        }
    }

    Ok(())
}
