//! Log-file analysis for the monitoring report
//!
//! Scans every `*.log` file in a directory and summarizes the lines written
//! within a time window. Lines must start with a timestamp, either RFC 3339
//! (`2026-01-01T12:00:00.123Z`, as written by the hub's file layers) or the
//! `2026-01-01 12:00:00,123` form common to other loggers. Lines without a
//! parseable timestamp are skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::{
    clock::{SharedClock, system_clock},
    collector::window_start,
    error::{MonitoringError, MonitoringResult},
};

const ERROR_SUMMARY_LEN: usize = 50;

const SECURITY_EVENT_LEN: usize = 100;

const SECURITY_KEYWORDS: [&str; 4] = ["auth", "login", "security", "breach"];

const TIMESTAMP_PATTERN: &str =
    r"^(\d{4}-\d{2}-\d{2})[T ](\d{2}:\d{2}:\d{2})(?:[.,](\d+))?(Z|[+-]\d{2}:\d{2})?";

/// Compiled line matchers
struct LinePatterns {
    timestamp: Regex,
    error: Regex,
    warning: Regex,
}

impl LinePatterns {
    fn new() -> MonitoringResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| MonitoringError::InvalidConfig(format!("log pattern {pattern}: {e}")))
        };

        Ok(Self {
            timestamp: compile(TIMESTAMP_PATTERN)?,
            error: compile(r"\bERROR\b")?,
            warning: compile(r"\bWARN(?:ING)?\b")?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFileStats {
    pub errors: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: String,
    pub event: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogAnalysis {
    pub time_range: String,
    pub log_files_analyzed: Vec<String>,
    /// Per-file counts, keyed by file stem
    pub files: BTreeMap<String, LogFileStats>,
    pub total_errors: usize,
    pub total_warnings: usize,
    /// Error message tail -> occurrences
    pub error_summary: BTreeMap<String, usize>,
    pub security_events: Vec<SecurityEvent>,
}

pub struct LogAnalyzer {
    log_dir: PathBuf,
    clock: SharedClock,
}

impl LogAnalyzer {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Summarize log lines written within `window`
    ///
    /// A missing directory yields an empty analysis. Unreadable files are
    /// logged and skipped.
    #[instrument(skip(self), fields(log_dir = %self.log_dir.display()))]
    pub async fn analyze(&self, window: Duration) -> MonitoringResult<LogAnalysis> {
        let mut analysis = LogAnalysis {
            time_range: format!("Last {} hours", window.as_secs() / 3600),
            ..LogAnalysis::default()
        };

        let mut files = match self.log_files().await {
            Ok(files) => files,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("log directory does not exist");
                return Ok(analysis);
            }
            Err(e) => return Err(MonitoringError::export(&self.log_dir, e)),
        };
        files.sort();

        let patterns = LinePatterns::new()?;
        let cutoff = window_start(self.clock.now(), window);

        for path in files {
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    error!("error analyzing log file {}: {e}", path.display());
                    continue;
                }
            };

            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let stem = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();

            let stats = analyze_lines(&patterns, &content, &file_name, cutoff, &mut analysis);

            analysis.total_errors += stats.errors;
            analysis.total_warnings += stats.warnings;
            analysis.log_files_analyzed.push(file_name);
            analysis.files.insert(stem, stats);
        }

        Ok(analysis)
    }

    async fn log_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.log_dir).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "log") && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }

        Ok(files)
    }
}

fn analyze_lines(
    patterns: &LinePatterns,
    content: &str,
    file_name: &str,
    cutoff: DateTime<Utc>,
    analysis: &mut LogAnalysis,
) -> LogFileStats {
    let security_file = file_name.to_lowercase().contains("security");
    let mut stats = LogFileStats::default();

    for line in content.lines() {
        let Some((raw_timestamp, timestamp)) = parse_timestamp(&patterns.timestamp, line) else {
            continue;
        };
        if timestamp < cutoff {
            continue;
        }

        if patterns.error.is_match(line) {
            stats.errors += 1;

            if let Some((_, tail)) = line.rsplit_once(':') {
                let summary: String = tail.trim().chars().take(ERROR_SUMMARY_LEN).collect();
                *analysis.error_summary.entry(summary).or_default() += 1;
            }
        }

        if patterns.warning.is_match(line) {
            stats.warnings += 1;
        }

        let lower = line.to_lowercase();
        if security_file || SECURITY_KEYWORDS.iter().any(|keyword| lower.contains(keyword)) {
            analysis.security_events.push(SecurityEvent {
                timestamp: raw_timestamp.to_string(),
                event: line.trim().chars().take(SECURITY_EVENT_LEN).collect(),
            });
        }
    }

    stats
}

/// Leading timestamp of a log line; naive timestamps are taken as UTC
fn parse_timestamp<'a>(pattern: &Regex, line: &'a str) -> Option<(&'a str, DateTime<Utc>)> {
    let captures = pattern.captures(line)?;
    let raw = captures.get(0)?.as_str();

    let fraction = captures.get(3).map_or("0", |m| m.as_str());
    let naive = NaiveDateTime::parse_from_str(
        &format!("{}T{}.{fraction}", &captures[1], &captures[2]),
        "%Y-%m-%dT%H:%M:%S%.f",
    )
    .ok()?;

    let timestamp = match captures.get(4).map(|m| m.as_str()) {
        None | Some("Z") => naive.and_utc(),
        Some(_) => DateTime::parse_from_rfc3339(raw).ok()?.with_timezone(&Utc),
    };

    Some((raw, timestamp))
}
