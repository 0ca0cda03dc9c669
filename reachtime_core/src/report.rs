use crate::search::{SearchResult, TargetReport};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::info;

/// Discoverer/time cell used when there is nothing to report.
pub const SENTINEL_NONE: &str = "-";
/// Discoverer cell for targets whose oracle invocation failed.
pub const SENTINEL_ERROR: &str = "error";
/// Discoverer cell for targets whose search was cancelled.
pub const SENTINEL_ABORTED: &str = "aborted";
/// Time cell for a discoverer missing from the timestamp ledger.
pub const SENTINEL_UNKNOWN_TIME: &str = "unknown";

const CSV_HEADER: [&str; 3] = ["line", "id", "time"];

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Report I/O error: {0}")]
    Io(String),

    #[error("Existing report {path:?} cannot be appended to: {reason}")]
    Format { path: PathBuf, reason: String },
}

impl From<std::io::Error> for ReportError {
    fn from(err: std::io::Error) -> Self {
        ReportError::Io(err.to_string())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReportFormat {
    #[default]
    Csv,
    Json,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WriteMode {
    #[default]
    Overwrite,
    Append,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RowStatus {
    Found,
    NotFound,
    Inconclusive,
    Aborted,
}

/// One report line: target, discovering entry (or sentinel), elapsed time (or sentinel).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub line: String,
    pub id: String,
    pub time: String,
    pub status: RowStatus,
}

impl From<&TargetReport> for ReportRow {
    fn from(report: &TargetReport) -> Self {
        let line = report.target.to_string();
        let (id, time, status) = match &report.result {
            SearchResult::Found { entry, elapsed, .. } => (
                entry.clone(),
                elapsed
                    .as_ref()
                    .map_or_else(|| SENTINEL_UNKNOWN_TIME.to_string(), |t| t.to_string()),
                RowStatus::Found,
            ),
            SearchResult::NotFound => (
                SENTINEL_NONE.to_string(),
                SENTINEL_NONE.to_string(),
                RowStatus::NotFound,
            ),
            SearchResult::Inconclusive { .. } => (
                SENTINEL_ERROR.to_string(),
                SENTINEL_NONE.to_string(),
                RowStatus::Inconclusive,
            ),
            SearchResult::Aborted => (
                SENTINEL_ABORTED.to_string(),
                SENTINEL_NONE.to_string(),
                RowStatus::Aborted,
            ),
        };
        ReportRow {
            line,
            id,
            time,
            status,
        }
    }
}

/// Writes search results to disk in one atomic step.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    path: PathBuf,
    format: ReportFormat,
    mode: WriteMode,
}

impl ReportWriter {
    pub fn new(path: PathBuf, format: ReportFormat, mode: WriteMode) -> Self {
        Self { path, format, mode }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renders every row in memory, writes them to a temporary file next to the
    /// destination and renames it into place, so readers never observe a partial
    /// report. Returns the number of rows written by this call.
    pub fn write(&self, reports: &[TargetReport]) -> Result<usize, ReportError> {
        let rows: Vec<ReportRow> = reports.iter().map(ReportRow::from).collect();
        let existing = match self.mode {
            WriteMode::Overwrite => String::new(),
            WriteMode::Append => self.read_existing()?,
        };

        let content = match self.format {
            ReportFormat::Csv => render_csv(&existing, &rows),
            ReportFormat::Json => self.render_json(&existing, rows.clone())?,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| {
            ReportError::Io(format!("Failed to create temp file in {:?}: {}", dir, e))
        })?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| {
            ReportError::Io(format!("Failed to persist report {:?}: {}", self.path, e.error))
        })?;

        info!(rows = rows.len(), path = ?self.path, "report written");
        Ok(rows.len())
    }

    fn read_existing(&self) -> Result<String, ReportError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(ReportError::Io(format!(
                "Failed to read existing report {:?}: {}",
                self.path, e
            ))),
        }
    }

    fn render_json(&self, existing: &str, rows: Vec<ReportRow>) -> Result<String, ReportError> {
        let mut all: Vec<ReportRow> = if existing.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(existing).map_err(|e| ReportError::Format {
                path: self.path.clone(),
                reason: e.to_string(),
            })?
        };
        all.extend(rows);
        let mut out = serde_json::to_string_pretty(&all).map_err(|e| ReportError::Format {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        out.push('\n');
        Ok(out)
    }
}

fn render_csv(existing: &str, rows: &[ReportRow]) -> String {
    let mut out = String::from(existing);
    if out.is_empty() {
        push_csv_record(&mut out, &CSV_HEADER);
    } else if !out.ends_with('\n') {
        out.push('\n');
    }
    for row in rows {
        push_csv_record(&mut out, &[row.line.as_str(), row.id.as_str(), row.time.as_str()]);
    }
    out
}

fn push_csv_record(out: &mut String, fields: &[&str]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}
