//! Per-job audit log: one JSON object per line under
//! `logs/<listingId>/<jobId>.log`.

use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub ts: DateTime<Utc>,
    pub stage: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub fields: Value,
}

/// Append-only writer. Logging failures are reported through `tracing`
/// and never fail the job.
#[derive(Debug, Clone)]
pub struct JobLog {
    path: PathBuf,
}

impl JobLog {
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stage(&self, stage: &str, message: &str) {
        self.record(stage, message, Value::Null);
    }

    pub fn record(&self, stage: &str, message: &str, fields: Value) {
        debug!(event = "job.log", stage = %stage, message = %message);
        let entry = LogEntry {
            ts: Utc::now(),
            stage: stage.to_string(),
            message: message.to_string(),
            fields,
        };
        if let Err(e) = self.append(&entry) {
            warn!(event = "job.log_write_failed", path = %self.path.display(), error = %e);
        }
    }

    fn append(&self, entry: &LogEntry) -> io::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }

    /// Parse a log back; unparsable lines are skipped.
    pub fn read(path: &Path) -> io::Result<Vec<LogEntry>> {
        let file = std::fs::File::open(path)?;
        let mut entries = Vec::new();
        for line in io::BufReader::new(file).lines() {
            let line = line?;
            if let Ok(entry) = serde_json::from_str(&line) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}
