//! Log file sources.
//!
//! A `LogSource` abstracts the on-disk layout of rotated log files: it
//! expands a glob pattern, orders matches newest-first by modification
//! time, and streams lines through transparent gzip decompression. I/O is
//! kept out of the parsers entirely, the way the teacher keeps pcap file
//! handling out of protocol decoding.

pub mod error;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use flate2::read::MultiGzDecoder;
use time::OffsetDateTime;

pub use error::LogSourceError;

/// What the line consumer tells the source to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// Keep reading.
    Continue,
    /// Finish the current file, then stop opening any further (older)
    /// file. Implements the watermark cutoff (§4.2).
    Stop,
}

/// A glob-backed, newest-file-first log source.
pub struct LogSource {
    files: Vec<PathBuf>,
}

const ROTATION_MARKER: &str = "logfile turned over";

impl LogSource {
    /// Expand `pattern` into files ordered by most-recent modification time
    /// first. Log rotation appends new data to the unnumbered file while
    /// older data lives in `.N` / `.N.gz` siblings, so this ordering lets
    /// ingest process the newest data first and stop once it reaches
    /// already-processed days.
    pub fn open(pattern: &str) -> Result<Self, LogSourceError> {
        let mut files: Vec<PathBuf> = Vec::new();
        for entry in glob::glob(pattern).map_err(|err| LogSourceError::Pattern {
            pattern: pattern.to_string(),
            message: err.msg.to_string(),
        })? {
            let path = entry?;
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort_by_key(|path| {
            std::cmp::Reverse(
                std::fs::metadata(path)
                    .and_then(|meta| meta.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            )
        });
        Ok(Self { files })
    }

    /// Stream every surviving line across every matched file, newest file
    /// first, invoking `on_line` with `(file_year, fields)` where `fields`
    /// is the line split on runs of whitespace. Any I/O error on a single
    /// file aborts the whole run (§7: ingest partial failure is not
    /// allowed).
    pub fn for_each_line<F>(&self, mut on_line: F) -> Result<(), LogSourceError>
    where
        F: FnMut(i32, &[String]) -> LineOutcome,
    {
        for path in &self.files {
            let file_year = modified_year(path)?;
            let reader = open_reader(path)?;
            let mut stop = false;
            for line in reader.lines() {
                let line = line?;
                if line.contains(ROTATION_MARKER) {
                    continue;
                }
                let fields: Vec<String> = line.split_whitespace().map(String::from).collect();
                if fields.is_empty() {
                    continue;
                }
                if on_line(file_year, &fields) == LineOutcome::Stop {
                    stop = true;
                    break;
                }
            }
            if stop {
                break;
            }
        }
        Ok(())
    }
}

fn modified_year(path: &std::path::Path) -> Result<i32, LogSourceError> {
    let modified = std::fs::metadata(path)?.modified()?;
    let dt = OffsetDateTime::from(modified);
    Ok(dt.year())
}

fn open_reader(path: &std::path::Path) -> Result<BufReader<Box<dyn std::io::Read>>, LogSourceError> {
    let file = File::open(path)?;
    let is_gz = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    let inner: Box<dyn std::io::Read> = if is_gz {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(BufReader::new(inner))
}
