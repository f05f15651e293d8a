//! Console rendering of scan and pipeline reports.

use std::path::Path;

use owo_colors::OwoColorize;
use tabled::{settings::Style as TableStyle, Table, Tabled};

use smellwright_rs::core::pipeline::SmellOutcome;
use smellwright_rs::io::reports::ScanReport;
use smellwright_rs::{PipelineReport, Severity, SmellwrightConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Rows shown per table before truncating
const MAX_ROWS: usize = 40;

#[derive(Tabled)]
struct SmellRow {
    #[tabled(rename = "severity")]
    severity: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "location")]
    location: String,
    #[tabled(rename = "message")]
    message: String,
}

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "location")]
    location: String,
    #[tabled(rename = "reason")]
    reason: String,
}

fn severity_label(severity: Severity) -> String {
    match severity {
        Severity::Critical => severity.to_string().red().bold().to_string(),
        Severity::High => severity.to_string().red().to_string(),
        Severity::Medium => severity.to_string().yellow().to_string(),
        Severity::Low => severity.to_string().dimmed().to_string(),
    }
}

fn location(root: &Path, file: &Path, line: usize) -> String {
    format!("{}:{line}", root.join(file).display())
}

fn print_table<T: Tabled>(rows: Vec<T>, total: usize) {
    if rows.is_empty() {
        return;
    }
    let mut table = Table::new(rows);
    table.with(TableStyle::rounded());
    println!("{table}");
    if total > MAX_ROWS {
        println!("  {}", format!("… and {} more", total - MAX_ROWS).dimmed());
    }
}

fn outcome_rows(root: &Path, outcomes: &[SmellOutcome]) -> Vec<OutcomeRow> {
    outcomes
        .iter()
        .take(MAX_ROWS)
        .map(|outcome| OutcomeRow {
            kind: outcome.kind.to_string(),
            location: location(root, &outcome.file_path, outcome.line),
            reason: outcome.reason.clone(),
        })
        .collect()
}

/// Print the ranked worklist of an `analyze` run
pub fn display_scan_report(report: &ScanReport, root: &Path) {
    println!("Smellwright v{VERSION}");
    println!(
        "  files {} | smells {} | warnings {}",
        report.files_scanned,
        report.smells.len(),
        report.warnings.len()
    );
    for (kind, count) in report.counts_by_kind() {
        println!("    {kind}: {count}");
    }
    println!();

    if report.smells.is_empty() {
        println!("{}", "No smells found".bright_green().bold());
    } else {
        let rows = report
            .smells
            .iter()
            .take(MAX_ROWS)
            .map(|smell| SmellRow {
                severity: severity_label(smell.severity),
                kind: smell.kind.to_string(),
                location: location(root, &smell.file_path, smell.primary_line()),
                message: smell.message.clone(),
            })
            .collect();
        print_table(rows, report.smells.len());
    }

    for warning in &report.warnings {
        println!("  {} {}: {}", "warning".yellow(), warning.file_path.display(), warning.message);
    }
}

/// Print the outcome of a `fix` run
pub fn display_pipeline_report(report: &PipelineReport, root: &Path) {
    println!("Smellwright v{VERSION}");
    let mode = if report.dry_run { " (dry run)" } else { "" };
    println!(
        "  files {} | smells {} | committed {} | skipped {} | failed {} | obsolete {}{mode}",
        report.files_scanned,
        report.smells_detected,
        report.committed.len().to_string().bright_green(),
        report.skipped.len(),
        report.failed.len().to_string().red(),
        report.obsolete.len()
    );
    println!(
        "  scan {}ms | refactor {}ms | verify {}ms | total {}ms",
        report.timings.scan_ms,
        report.timings.refactor_ms,
        report.timings.verify_ms,
        report.timings.total_ms
    );
    if report.cancelled {
        println!("  {}", "run was cancelled".yellow());
    }
    println!();

    if !report.committed.is_empty() {
        println!("{}", "Committed".bright_green().bold());
        let rows = report
            .committed
            .iter()
            .take(MAX_ROWS)
            .map(|fix| SmellRow {
                severity: severity_label(fix.severity),
                kind: fix.kind.to_string(),
                location: location(root, &fix.file_path, fix.line),
                message: fix.message.clone(),
            })
            .collect();
        print_table(rows, report.committed.len());
    }
    if !report.failed.is_empty() {
        println!("{}", "Rejected".red().bold());
        print_table(outcome_rows(root, &report.failed), report.failed.len());
    }
    if !report.skipped.is_empty() {
        println!("{}", "Skipped".yellow().bold());
        print_table(outcome_rows(root, &report.skipped), report.skipped.len());
    }
    for warning in &report.warnings {
        println!("  {} {}: {}", "warning".yellow(), warning.file_path.display(), warning.message);
    }
}

/// Summarize a validated configuration
pub fn display_config_summary(config: &SmellwrightConfig, detailed: bool) {
    #[derive(Tabled)]
    struct SettingRow {
        setting: String,
        value: String,
    }

    let detection = &config.detection;
    let kinds: Vec<String> = detection
        .enabled_smell_kinds
        .iter()
        .map(ToString::to_string)
        .collect();
    let mut rows = vec![
        SettingRow {
            setting: "detection.loop_nesting_threshold".to_string(),
            value: detection.loop_nesting_threshold.to_string(),
        },
        SettingRow {
            setting: "detection.chain_length_threshold".to_string(),
            value: detection.chain_length_threshold.to_string(),
        },
        SettingRow {
            setting: "detection.repetition_threshold".to_string(),
            value: detection.repetition_threshold.to_string(),
        },
        SettingRow {
            setting: "detection.enabled_smell_kinds".to_string(),
            value: kinds.join(", "),
        },
        SettingRow {
            setting: "pipeline.max_edits_per_run".to_string(),
            value: config.pipeline.max_edits_per_run.to_string(),
        },
        SettingRow {
            setting: "verification.test_command".to_string(),
            value: config
                .verification
                .test_command
                .as_ref()
                .map_or_else(|| "(none)".to_string(), |argv| argv.join(" ")),
        },
    ];

    if detailed {
        rows.extend([
            SettingRow {
                setting: "pipeline.write_back".to_string(),
                value: config.pipeline.write_back.to_string(),
            },
            SettingRow {
                setting: "pipeline.dry_run".to_string(),
                value: config.pipeline.dry_run.to_string(),
            },
            SettingRow {
                setting: "verification.test_timeout_secs".to_string(),
                value: config.verification.test_timeout_secs.to_string(),
            },
            SettingRow {
                setting: "verification.parse_timeout_ms".to_string(),
                value: config.verification.parse_timeout_ms.to_string(),
            },
            SettingRow {
                setting: "verification.require_tests".to_string(),
                value: config.verification.require_tests.to_string(),
            },
            SettingRow {
                setting: "io.include_patterns".to_string(),
                value: config.io.include_patterns.join(", "),
            },
            SettingRow {
                setting: "io.exclude_patterns".to_string(),
                value: config.io.exclude_patterns.join(", "),
            },
            SettingRow {
                setting: "performance.max_threads".to_string(),
                value: config
                    .performance
                    .max_threads
                    .map_or_else(|| "auto".to_string(), |n| n.to_string()),
            },
        ]);
    }

    let mut table = Table::new(rows);
    table.with(TableStyle::rounded());
    println!("{table}");
}
