//! Machine-readable reports for scans and pipeline runs.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SmellwrightError};
use crate::core::file_utils::FileWriter;
use crate::core::smell::{Smell, SmellKind};
use crate::detectors::engine::{ConflictRecord, ScanOutcome, ScanWarning};

/// Serialization format of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Yaml,
}

impl ReportFormat {
    /// Format implied by a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

/// Result of `analyze`: the ranked worklist without any rewriting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    /// When the scan finished
    pub generated_at: DateTime<Utc>,
    /// Version of the smell kind list the report was written with
    pub taxonomy_version: u32,
    /// Files that parsed and were analyzed
    pub files_scanned: usize,
    /// Smells in refactor order
    pub smells: Vec<Smell>,
    /// Files or analyzers that could not be processed
    pub warnings: Vec<ScanWarning>,
    /// Smells dropped during deduplication
    pub conflicts: Vec<ConflictRecord>,
}

impl ScanReport {
    /// Report for a finished scan
    pub fn from_outcome(outcome: &ScanOutcome) -> Self {
        Self {
            generated_at: Utc::now(),
            taxonomy_version: SmellKind::TAXONOMY_VERSION,
            files_scanned: outcome.files_scanned,
            smells: outcome.worklist.clone(),
            warnings: outcome.warnings.clone(),
            conflicts: outcome.conflicts.clone(),
        }
    }

    /// Number of smells of each kind, in taxonomy order
    pub fn counts_by_kind(&self) -> Vec<(SmellKind, usize)> {
        SmellKind::ALL
            .into_iter()
            .map(|kind| (kind, self.smells.iter().filter(|s| s.kind == kind).count()))
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}

/// Serialize `value` in `format`
pub fn render<T: Serialize>(value: &T, format: ReportFormat) -> Result<String> {
    Ok(match format {
        ReportFormat::Json => serde_json::to_string_pretty(value)?,
        ReportFormat::Yaml => serde_yaml::to_string(value)?,
    })
}

/// Write `value` to `path`; the format defaults to the file extension
pub fn write_report<T: Serialize>(
    value: &T,
    path: &Path,
    format: Option<ReportFormat>,
) -> Result<()> {
    let format = format
        .or_else(|| ReportFormat::from_path(path))
        .ok_or_else(|| {
            SmellwrightError::validation(format!(
                "Cannot infer report format from {}; use .json, .yaml or .yml",
                path.display()
            ))
        })?;
    FileWriter::write_atomic(path, &render(value, format)?)
}
