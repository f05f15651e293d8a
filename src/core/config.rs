//! Configuration types and management for smellwright-rs.
//!
//! Configuration is plain serde data loaded from YAML. Every section has
//! defaults, so a partial file only needs to name what it changes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use globset::Glob;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SmellwrightError};
use crate::core::smell::{Severity, SmellKind};

/// Main configuration for a smellwright run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SmellwrightConfig {
    /// Detector thresholds and enabled smell kinds
    pub detection: DetectionConfig,

    /// Orchestrator limits and write-back behaviour
    pub pipeline: PipelineConfig,

    /// Verification oracle settings (syntax gate + test harness)
    pub verification: VerificationConfig,

    /// File discovery settings
    pub io: IoConfig,

    /// Performance and resource limits
    pub performance: PerformanceConfig,
}

impl SmellwrightConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            SmellwrightError::io(format!("Failed to read config file: {}", path.display()), e)
        })?;

        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn to_yaml_file(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content).map_err(|e| {
            SmellwrightError::io(
                format!("Failed to write config file: {}", path.display()),
                e,
            )
        })
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<()> {
        self.detection.validate()?;
        self.pipeline.validate()?;
        self.verification.validate()?;
        self.io.validate()?;
        self.performance.validate()?;
        Ok(())
    }
}

/// Detector configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    /// Loop nesting depth allowed per function; deeper nesting is flagged
    pub loop_nesting_threshold: usize,

    /// Consecutive attribute/subscript accesses allowed in one chain
    pub chain_length_threshold: usize,

    /// Minimum estimated executions before a loop-invariant call is flagged
    pub repetition_threshold: usize,

    /// Smell kinds to detect and refactor
    pub enabled_smell_kinds: BTreeSet<SmellKind>,

    /// Severity overrides per kind
    pub severity_overrides: BTreeMap<SmellKind, Severity>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            loop_nesting_threshold: 5,
            chain_length_threshold: 5,
            repetition_threshold: 2,
            enabled_smell_kinds: SmellKind::ALL.into_iter().collect(),
            severity_overrides: BTreeMap::new(),
        }
    }
}

impl DetectionConfig {
    /// Whether `kind` is enabled
    pub fn is_enabled(&self, kind: SmellKind) -> bool {
        self.enabled_smell_kinds.contains(&kind)
    }

    /// Effective severity for `kind`, falling back to `computed`
    pub fn severity_for(&self, kind: SmellKind, computed: Severity) -> Severity {
        self.severity_overrides
            .get(&kind)
            .copied()
            .unwrap_or(computed)
    }

    /// Validate detector configuration
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("loop_nesting_threshold", self.loop_nesting_threshold),
            ("chain_length_threshold", self.chain_length_threshold),
            ("repetition_threshold", self.repetition_threshold),
        ] {
            if value == 0 {
                return Err(SmellwrightError::config_field(
                    format!("{field} must be at least 1"),
                    format!("detection.{field}"),
                ));
            }
        }

        if self.enabled_smell_kinds.is_empty() {
            return Err(SmellwrightError::config_field(
                "At least one smell kind must be enabled",
                "detection.enabled_smell_kinds",
            ));
        }

        Ok(())
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of committed edits per run
    pub max_edits_per_run: usize,

    /// Write committed snapshots back to the source tree
    pub write_back: bool,

    /// Run everything in memory and never touch the source tree
    pub dry_run: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_edits_per_run: 100,
            write_back: true,
            dry_run: false,
        }
    }
}

impl PipelineConfig {
    /// True when commits should be persisted
    pub fn persists(&self) -> bool {
        self.write_back && !self.dry_run
    }

    /// Validate pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_edits_per_run == 0 {
            return Err(SmellwrightError::config_field(
                "max_edits_per_run must be at least 1",
                "pipeline.max_edits_per_run",
            ));
        }
        Ok(())
    }
}

/// Verification oracle configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerificationConfig {
    /// Test command argv, run from the root of a scratch copy of the project
    pub test_command: Option<Vec<String>>,

    /// JUnit XML report written by the test command, relative to the project root
    pub junit_report: Option<PathBuf>,

    /// Timeout for one test-harness invocation
    pub test_timeout_secs: u64,

    /// Timeout for one parse call
    pub parse_timeout_ms: u64,

    /// Refuse to commit edits when no test command is configured
    pub require_tests: bool,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            test_command: None,
            junit_report: None,
            test_timeout_secs: 300,
            parse_timeout_ms: 5_000,
            require_tests: true,
        }
    }
}

impl VerificationConfig {
    /// Test harness timeout as a `Duration`
    pub fn test_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.test_timeout_secs)
    }

    /// Parse timeout as a `Duration`
    pub fn parse_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.parse_timeout_ms)
    }

    /// Validate verification configuration
    pub fn validate(&self) -> Result<()> {
        if self.test_timeout_secs == 0 {
            return Err(SmellwrightError::config_field(
                "test_timeout_secs must be at least 1",
                "verification.test_timeout_secs",
            ));
        }
        if self.parse_timeout_ms == 0 {
            return Err(SmellwrightError::config_field(
                "parse_timeout_ms must be at least 1",
                "verification.parse_timeout_ms",
            ));
        }
        if let Some(command) = &self.test_command {
            if command.is_empty() || command[0].trim().is_empty() {
                return Err(SmellwrightError::config_field(
                    "test_command must name a program",
                    "verification.test_command",
                ));
            }
        }
        Ok(())
    }
}

/// File discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IoConfig {
    /// Glob patterns of files to include, relative to the project root
    pub include_patterns: Vec<String>,

    /// Glob patterns of files to exclude
    pub exclude_patterns: Vec<String>,

    /// Files larger than this are skipped
    pub max_file_size_bytes: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            include_patterns: vec!["**/*.py".to_string()],
            exclude_patterns: vec![
                "**/.git/**".to_string(),
                "**/__pycache__/**".to_string(),
                "**/.venv/**".to_string(),
                "**/venv/**".to_string(),
                "**/.tox/**".to_string(),
                "**/build/**".to_string(),
                "**/dist/**".to_string(),
                "**/node_modules/**".to_string(),
            ],
            max_file_size_bytes: 2 * 1024 * 1024,
        }
    }
}

impl IoConfig {
    /// Validate discovery configuration
    pub fn validate(&self) -> Result<()> {
        if self.include_patterns.is_empty() {
            return Err(SmellwrightError::config_field(
                "At least one include pattern is required",
                "io.include_patterns",
            ));
        }
        for (field, patterns) in [
            ("io.include_patterns", &self.include_patterns),
            ("io.exclude_patterns", &self.exclude_patterns),
        ] {
            for pattern in patterns {
                Glob::new(pattern).map_err(|e| {
                    SmellwrightError::config_field(
                        format!("Invalid glob pattern '{pattern}': {e}"),
                        field,
                    )
                })?;
            }
        }
        Ok(())
    }
}

/// Performance configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Worker threads for the scanning phase (defaults to the rayon global pool)
    pub max_threads: Option<usize>,
}

impl PerformanceConfig {
    /// Validate performance configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_threads == Some(0) {
            return Err(SmellwrightError::config_field(
                "max_threads must be at least 1",
                "performance.max_threads",
            ));
        }
        Ok(())
    }
}
