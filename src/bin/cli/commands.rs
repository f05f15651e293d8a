//! Command execution.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tracing::{info, warn};

use smellwright_rs::core::ast_service::AstService;
use smellwright_rs::io::reports::{render, write_report, ReportFormat, ScanReport};
use smellwright_rs::{
    CommandTestHarness, DetectorEngine, Pipeline, SmellKind, SmellwrightConfig, SourceTree,
};

use super::args::{AnalyzeArgs, DetectionArgs, FixArgs, OutputFormat, ValidateConfigArgs};
use super::output::{display_config_summary, display_pipeline_report, display_scan_report};

/// Load configuration from file or defaults, then validate it
pub fn load_configuration(path: Option<&Path>) -> anyhow::Result<SmellwrightConfig> {
    let config = match path {
        Some(path) => SmellwrightConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => SmellwrightConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Configuration file plus command-line overrides
fn build_config(args: &DetectionArgs) -> anyhow::Result<SmellwrightConfig> {
    let mut config = load_configuration(args.config.as_deref())?;
    let detection = &mut config.detection;
    if !args.kinds.is_empty() {
        detection.enabled_smell_kinds = args
            .kinds
            .iter()
            .map(|kind| SmellKind::from(*kind))
            .collect();
    }
    if let Some(threshold) = args.loop_nesting_threshold {
        detection.loop_nesting_threshold = threshold;
    }
    if let Some(threshold) = args.chain_length_threshold {
        detection.chain_length_threshold = threshold;
    }
    if let Some(threshold) = args.repetition_threshold {
        detection.repetition_threshold = threshold;
    }
    if args.threads.is_some() {
        config.performance.max_threads = args.threads;
    }
    Ok(config)
}

fn report_format(format: OutputFormat) -> Option<ReportFormat> {
    match format {
        OutputFormat::Pretty => None,
        OutputFormat::Json => Some(ReportFormat::Json),
        OutputFormat::Yaml => Some(ReportFormat::Yaml),
    }
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Scan a project and print the ranked worklist
pub async fn analyze_command(args: AnalyzeArgs) -> anyhow::Result<()> {
    let config = build_config(&args.detection)?;
    config.validate()?;
    let tree = SourceTree::open(&args.path, &config.io)?;
    let loaded = tree.load()?;
    info!("Loaded {} files from {}", loaded.snapshot.len(), tree.root().display());

    let progress = (args.format == OutputFormat::Pretty).then(|| spinner("Scanning"));
    let engine = DetectorEngine::new(&config, AstService::shared());
    let outcome = engine.scan(&loaded.snapshot).await;
    if let Some(progress) = progress {
        progress.finish_and_clear();
    }

    let mut report = ScanReport::from_outcome(&outcome);
    report.warnings.splice(0..0, loaded.warnings);

    match report_format(args.format) {
        Some(format) => println!("{}", render(&report, format)?),
        None => display_scan_report(&report, tree.root()),
    }
    if let Some(out) = &args.out {
        write_report(&report, out, None)?;
        info!("Report written to {}", out.display());
    }
    Ok(())
}

/// Rewrite smells and print the run report
pub async fn fix_command(args: FixArgs) -> anyhow::Result<()> {
    let mut config = build_config(&args.detection)?;
    if let Some(command) = &args.test_command {
        config.verification.test_command =
            Some(command.split_whitespace().map(str::to_string).collect());
    }
    if args.junit_report.is_some() {
        config.verification.junit_report = args.junit_report.clone();
    }
    if let Some(seconds) = args.test_timeout {
        config.verification.test_timeout_secs = seconds;
    }
    if args.no_tests {
        config.verification.require_tests = false;
    }
    if args.dry_run {
        config.pipeline.dry_run = true;
    }
    if let Some(max_edits) = args.max_edits {
        config.pipeline.max_edits_per_run = max_edits;
    }
    config.validate()?;

    let tree = SourceTree::open(&args.path, &config.io)?;
    let loaded = tree.load()?;
    let harness = CommandTestHarness::from_config(tree.root(), &config.verification);
    if harness.is_none() && config.verification.require_tests {
        bail!("No test command configured; pass --test-command, or --no-tests to rely on the syntax check alone");
    }
    if harness.is_none() {
        warn!("Running without a test command: edits are only checked for syntax");
    }

    let mut pipeline = Pipeline::new(config.clone()).with_source_tree(tree.clone());
    if let Some(harness) = harness {
        pipeline = pipeline.with_harness(Arc::new(harness));
    }

    let token = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current smell");
            token.cancel();
        }
    });

    let progress = (args.format == OutputFormat::Pretty).then(|| spinner("Refactoring"));
    let outcome = pipeline.run(loaded.snapshot).await;
    if let Some(progress) = progress {
        progress.finish_and_clear();
    }

    let mut report = outcome.report;
    report.warnings.splice(0..0, loaded.warnings);

    match report_format(args.format) {
        Some(format) => println!("{}", render(&report, format)?),
        None => display_pipeline_report(&report, tree.root()),
    }
    if let Some(out) = &args.out {
        write_report(&report, out, None)?;
        info!("Report written to {}", out.display());
    }
    Ok(())
}

/// Print default configuration
pub fn print_default_config() -> anyhow::Result<()> {
    println!("{}", "# Default smellwright configuration".dimmed());
    println!("{}", "# Save this to a file and customize as needed".dimmed());
    println!("{}", "# Usage: smellwright fix --config your-config.yml <path>".dimmed());
    println!();
    println!("{}", serde_yaml::to_string(&SmellwrightConfig::default())?);
    Ok(())
}

/// Validate a configuration file and summarize it
pub fn validate_config(args: ValidateConfigArgs) -> anyhow::Result<()> {
    println!(
        "{} {}",
        "Validating configuration:".bright_blue().bold(),
        args.config.display().to_string().cyan()
    );

    let config = match load_configuration(Some(&args.config)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} {err:#}", "Configuration validation failed:".red());
            eprintln!(
                "{}",
                "Tip: use 'smellwright print-default-config' to see the valid format".dimmed()
            );
            bail!("invalid configuration");
        }
    };

    println!("{}", "Configuration file is valid".bright_green().bold());
    println!();
    display_config_summary(&config, args.detailed);
    Ok(())
}
