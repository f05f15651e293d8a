//! Error types for the smellwright-rs library.
//!
//! Every stage of the analyze → refactor → verify pipeline reports failures
//! through [`SmellwrightError`]. Per-file and per-smell failures are degraded
//! into report entries by the orchestrator; only a failure to read the project
//! tree is fatal to a run.

use std::io;
use std::str::Utf8Error;

use thiserror::Error;

/// Main result type for smellwright operations.
pub type Result<T> = std::result::Result<T, SmellwrightError>;

/// Error type for all smellwright operations.
#[derive(Error, Debug)]
pub enum SmellwrightError {
    /// I/O related errors (file operations, subprocess pipes, etc.)
    #[error("I/O error: {message}")]
    Io {
        /// Human-readable error message
        message: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        /// Error description
        message: String,
        /// Configuration field that caused the error
        field: Option<String>,
    },

    /// A code unit could not be parsed
    #[error("Parse error in {language}: {message}")]
    Parse {
        /// Language being parsed
        language: String,
        /// Error description
        message: String,
        /// File path where error occurred
        file_path: Option<String>,
        /// Line number (if available)
        line: Option<usize>,
        /// Column number (if available)
        column: Option<usize>,
    },

    /// An analyzer failed internally on a single unit
    #[error("Detection error in analyzer '{analyzer}': {message}")]
    Detection {
        /// Analyzer name
        analyzer: String,
        /// Error description
        message: String,
        /// File the analyzer was working on
        file_path: Option<String>,
    },

    /// A smell violates the span/file-bounds contract
    #[error("Invalid smell {smell_id}: {reason}")]
    InvalidSmell {
        /// Identifier of the offending smell
        smell_id: String,
        /// Which invariant failed
        reason: String,
    },

    /// A refactorer could not produce a candidate
    #[error("Refactor error: {message}")]
    Refactor {
        /// Error description
        message: String,
    },

    /// Verification oracle errors (not rejections)
    #[error("Verification error: {message}")]
    Verification {
        /// Error description
        message: String,
    },

    /// The external test harness could not be run or its output not read
    #[error("Test harness error: {message}")]
    Harness {
        /// Error description
        message: String,
        /// Command line that was executed
        command: Option<String>,
    },

    /// A blocking collaborator exceeded its configured timeout
    #[error("Timed out after {seconds:.1}s during {operation}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Configured timeout in seconds
        seconds: f64,
    },

    /// Pipeline errors
    #[error("Pipeline error at stage '{stage}': {message}")]
    Pipeline {
        /// Pipeline stage where error occurred
        stage: String,
        /// Error description
        message: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error description
        message: String,
        /// Data type being serialized
        data_type: Option<String>,
        /// Underlying serialization error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation errors for input data
    #[error("Validation error: {message}")]
    Validation {
        /// Error description
        message: String,
        /// Field or input that failed validation
        field: Option<String>,
        /// Expected value or format
        expected: Option<String>,
        /// Actual value received
        actual: Option<String>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        /// Error description
        message: String,
        /// Additional context
        context: Option<String>,
    },
}

impl SmellwrightError {
    /// Create a new I/O error with context
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new configuration error with field context
    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new parse error
    pub fn parse(language: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            language: language.into(),
            message: message.into(),
            file_path: None,
            line: None,
            column: None,
        }
    }

    /// Create a new detection error
    pub fn detection(analyzer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Detection {
            analyzer: analyzer.into(),
            message: message.into(),
            file_path: None,
        }
    }

    /// Create a new invalid-smell error
    pub fn invalid_smell(smell_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSmell {
            smell_id: smell_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a new refactor error
    pub fn refactor(message: impl Into<String>) -> Self {
        Self::Refactor {
            message: message.into(),
        }
    }

    /// Create a new verification error
    pub fn verification(message: impl Into<String>) -> Self {
        Self::Verification {
            message: message.into(),
        }
    }

    /// Create a new harness error
    pub fn harness(message: impl Into<String>) -> Self {
        Self::Harness {
            message: message.into(),
            command: None,
        }
    }

    /// Create a new harness error that records the command line
    pub fn harness_with_command(message: impl Into<String>, command: impl Into<String>) -> Self {
        Self::Harness {
            message: message.into(),
            command: Some(command.into()),
        }
    }

    /// Create a new timeout error
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds: timeout.as_secs_f64(),
        }
    }

    /// Create a new pipeline error
    pub fn pipeline(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Pipeline {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
            expected: None,
            actual: None,
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: None,
        }
    }

    /// Attach the file being processed to errors that carry one
    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        match &mut self {
            Self::Parse { file_path, .. } | Self::Detection { file_path, .. } => {
                *file_path = Some(path.into());
            }
            _ => {}
        }
        self
    }

    /// Add context to an existing error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        match &mut self {
            Self::Internal { context: ctx, .. } => {
                *ctx = Some(context.into());
            }
            Self::Io { message, .. } => {
                *message = format!("{}: {}", context.into(), message);
            }
            _ => {}
        }
        self
    }
}

impl From<io::Error> for SmellwrightError {
    fn from(err: io::Error) -> Self {
        Self::io("I/O operation failed", err)
    }
}

impl From<serde_json::Error> for SmellwrightError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON serialization failed: {err}"),
            data_type: Some("JSON".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_yaml::Error> for SmellwrightError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: format!("YAML serialization failed: {err}"),
            data_type: Some("YAML".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

impl From<Utf8Error> for SmellwrightError {
    fn from(err: Utf8Error) -> Self {
        Self::parse("unknown", format!("UTF-8 encoding error: {err}"))
    }
}

/// Result extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Add static context to an error result
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<SmellwrightError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }

    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| e.into().with_context(msg))
    }
}
