//! CLI argument structures.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use smellwright_rs::SmellKind;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Detect code smells in Python projects and remove them safely
#[derive(Parser)]
#[command(name = "smellwright")]
#[command(version = VERSION)]
#[command(about = "Smellwright - detect code smells and remove them behind a test-suite check")]
#[command(long_about = "
Scan a Python project for deeply nested loops, long attribute chains, repeated
calls and string concatenation inside loops, and unused class members. The
fix command rewrites them one at a time and keeps an edit only when the file
still parses and no previously passing test fails.

Common Usage:

  # List smells in ranked order
  smellwright analyze ./src

  # Fix what can be fixed, verifying each edit with pytest
  smellwright fix ./src --test-command \"pytest -q\"

  # Preview without touching files
  smellwright fix ./src --test-command \"pytest -q\" --dry-run

  # Machine-readable output
  smellwright analyze ./src --format json --out smells.json
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a project and print the ranked smell worklist
    Analyze(AnalyzeArgs),

    /// Rewrite smells, verifying every edit before it is kept
    Fix(Box<FixArgs>),

    /// Print default configuration in YAML format
    #[command(name = "print-default-config")]
    PrintDefaultConfig,

    /// Validate a smellwright configuration file
    #[command(name = "validate-config")]
    ValidateConfig(ValidateConfigArgs),
}

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables
    Pretty,
    Json,
    Yaml,
}

/// Smell kinds as accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SmellKindArg {
    ExcessiveNesting,
    LongAttributeChain,
    RepeatedCallInLoop,
    StringConcatInLoop,
    UnusedMember,
}

impl From<SmellKindArg> for SmellKind {
    fn from(arg: SmellKindArg) -> Self {
        match arg {
            SmellKindArg::ExcessiveNesting => SmellKind::ExcessiveNesting,
            SmellKindArg::LongAttributeChain => SmellKind::LongAttributeChain,
            SmellKindArg::RepeatedCallInLoop => SmellKind::RepeatedCallInLoop,
            SmellKindArg::StringConcatInLoop => SmellKind::StringConcatInLoop,
            SmellKindArg::UnusedMember => SmellKind::UnusedMember,
        }
    }
}

/// Detection settings shared by `analyze` and `fix`
#[derive(Args, Debug, Clone, Default)]
pub struct DetectionArgs {
    /// Configuration file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Only look for these smell kinds (comma separated)
    #[arg(long, value_enum, value_delimiter = ',')]
    pub kinds: Vec<SmellKindArg>,

    /// Loop nesting depth above which a function is flagged
    #[arg(long)]
    pub loop_nesting_threshold: Option<usize>,

    /// Access-chain length above which a chain is flagged
    #[arg(long)]
    pub chain_length_threshold: Option<usize>,

    /// Minimum estimated executions before a loop-invariant call is flagged
    #[arg(long)]
    pub repetition_threshold: Option<usize>,

    /// Worker threads for scanning
    #[arg(long)]
    pub threads: Option<usize>,
}

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Project directory or single file
    #[arg(default_value = ".")]
    pub path: PathBuf,

    #[command(flatten)]
    pub detection: DetectionArgs,

    /// Output format on stdout
    #[arg(long, value_enum, default_value = "pretty")]
    pub format: OutputFormat,

    /// Also write the report to this file (.json, .yaml or .yml)
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Args)]
pub struct FixArgs {
    /// Project directory or single file
    #[arg(default_value = ".")]
    pub path: PathBuf,

    #[command(flatten)]
    pub detection: DetectionArgs,

    /// Test command run from a scratch copy of the project, split on whitespace
    #[arg(long)]
    pub test_command: Option<String>,

    /// JUnit XML report the test command writes, relative to the project root
    #[arg(long)]
    pub junit_report: Option<PathBuf>,

    /// Seconds before a test run counts as a regression
    #[arg(long)]
    pub test_timeout: Option<u64>,

    /// Accept edits on the syntax check alone when no test command is given
    #[arg(long)]
    pub no_tests: bool,

    /// Run everything in memory and leave the files untouched
    #[arg(long)]
    pub dry_run: bool,

    /// Stop after this many committed edits
    #[arg(long)]
    pub max_edits: Option<usize>,

    /// Output format on stdout
    #[arg(long, value_enum, default_value = "pretty")]
    pub format: OutputFormat,

    /// Also write the run report to this file (.json, .yaml or .yml)
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Args)]
pub struct ValidateConfigArgs {
    /// Configuration file to validate
    pub config: PathBuf,

    /// Show every setting
    #[arg(long)]
    pub detailed: bool,
}
