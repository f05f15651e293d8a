//! External test harness.
//!
//! [`CommandTestHarness`] runs a user-supplied test command inside a scratch
//! copy of the project, so candidate snapshots are exercised without touching
//! the real source tree. The scratch copy is created once per run and only the
//! files whose content changed since the previous invocation are rewritten.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::config::VerificationConfig;
use crate::core::errors::{Result, SmellwrightError};
use crate::core::snapshot::ProjectSnapshot;
use crate::verify::{TestOutcome, TestReport};

/// Test id used when the command gives no per-test report
pub const SUITE_TEST_ID: &str = "<suite>";

/// Directories never mirrored into the scratch workspace
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    "target",
    "__pycache__",
    ".venv",
    "venv",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    "node_modules",
];

/// Bytes of output kept in debug logs for a failing command
const OUTPUT_TAIL_BYTES: usize = 2_000;

/// Black-box test runner: `run(snapshot) -> {test id: outcome}`
#[async_trait]
pub trait TestHarness: Send + Sync {
    /// Run the tests against `snapshot`
    async fn run(&self, snapshot: &ProjectSnapshot) -> Result<TestReport>;

    /// Human-readable description for logs and reports
    fn describe(&self) -> String;
}

/// Subprocess harness with optional JUnit XML parsing
pub struct CommandTestHarness {
    command: Vec<String>,
    project_root: PathBuf,
    junit_report: Option<PathBuf>,
    workspace: Mutex<Option<ScratchWorkspace>>,
}

impl CommandTestHarness {
    /// Harness running `command` (argv) against copies of `project_root`
    pub fn new(project_root: impl Into<PathBuf>, command: Vec<String>) -> Self {
        Self {
            command,
            project_root: project_root.into(),
            junit_report: None,
            workspace: Mutex::new(None),
        }
    }

    /// Read per-test outcomes from a JUnit XML file the command writes,
    /// relative to the project root
    pub fn with_junit_report(mut self, path: impl Into<PathBuf>) -> Self {
        self.junit_report = Some(path.into());
        self
    }

    /// Harness described by the verification config, if it names a command
    pub fn from_config(project_root: &Path, config: &VerificationConfig) -> Option<Self> {
        let command = config.test_command.clone().filter(|argv| !argv.is_empty())?;
        let harness = Self::new(project_root, command);
        Some(match &config.junit_report {
            Some(report) => harness.with_junit_report(report),
            None => harness,
        })
    }

    fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

#[async_trait]
impl TestHarness for CommandTestHarness {
    async fn run(&self, snapshot: &ProjectSnapshot) -> Result<TestReport> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| SmellwrightError::harness("Empty test command"))?;

        let mut guard = self.workspace.lock().await;
        if guard.is_none() {
            *guard = Some(ScratchWorkspace::create(&self.project_root)?);
        }
        let workspace = guard
            .as_mut()
            .ok_or_else(|| SmellwrightError::internal("Scratch workspace missing"))?;
        workspace.sync(snapshot)?;

        let root = workspace.path().to_path_buf();
        let report_path = self.junit_report.as_ref().map(|path| root.join(path));
        if let Some(path) = &report_path {
            if path.exists() {
                fs::remove_file(path).map_err(|e| {
                    let message = format!("Failed to remove stale report {}", path.display());
                    SmellwrightError::io(message, e)
                })?;
            }
        }

        debug!("Running `{}` in {}", self.command_line(), root.display());
        let output = Command::new(program)
            .args(args)
            .current_dir(&root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                SmellwrightError::harness_with_command(
                    format!("Failed to start test command: {e}"),
                    self.command_line(),
                )
            })?;

        if !output.status.success() {
            debug!(
                "Test command exited with {}; stderr tail: {}",
                output.status,
                tail(&output.stderr)
            );
        }

        if let Some(path) = report_path.filter(|path| path.exists()) {
            let bytes = fs::read(&path).map_err(|e| {
                SmellwrightError::io(format!("Failed to read {}", path.display()), e)
            })?;
            let report = parse_junit(&bytes)?;
            if !report.is_empty() {
                return Ok(report);
            }
            warn!("JUnit report {} lists no tests; using the exit status", path.display());
        } else if self.junit_report.is_some() {
            warn!("Test command did not write its JUnit report; using the exit status");
        }

        let mut report = TestReport::new();
        report.record(
            SUITE_TEST_ID,
            if output.status.success() {
                TestOutcome::Passed
            } else {
                TestOutcome::Failed
            },
        );
        Ok(report)
    }

    fn describe(&self) -> String {
        format!("`{}`", self.command_line())
    }
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let start = text.len().saturating_sub(OUTPUT_TAIL_BYTES);
    let start = (start..text.len()).find(|i| text.is_char_boundary(*i)).unwrap_or(text.len());
    text[start..].to_string()
}

/// Private mirror of the project the test command runs in
struct ScratchWorkspace {
    dir: TempDir,
    written: HashMap<PathBuf, blake3::Hash>,
}

impl ScratchWorkspace {
    fn create(project_root: &Path) -> Result<Self> {
        let dir = TempDir::new()
            .map_err(|e| SmellwrightError::io("Failed to create scratch workspace", e))?;
        let mut copied = 0usize;

        let walker = WalkDir::new(project_root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !SKIPPED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref())
            });
        for entry in walker {
            let entry = entry.map_err(|e| {
                SmellwrightError::harness(format!("Failed to walk {}: {e}", project_root.display()))
            })?;
            let Ok(relative) = entry.path().strip_prefix(project_root) else {
                continue;
            };
            let target = dir.path().join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target).map_err(|e| {
                    SmellwrightError::io(format!("Failed to create {}", target.display()), e)
                })?;
            } else if entry.file_type().is_file() {
                fs::copy(entry.path(), &target).map_err(|e| {
                    SmellwrightError::io(format!("Failed to copy {}", entry.path().display()), e)
                })?;
                copied += 1;
            }
        }

        info!("Mirrored {copied} files into scratch workspace {}", dir.path().display());
        Ok(Self {
            dir,
            written: HashMap::new(),
        })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Bring the mirror in line with `snapshot`
    fn sync(&mut self, snapshot: &ProjectSnapshot) -> Result<()> {
        let mut rewritten = 0usize;
        for (path, source) in snapshot.iter() {
            let hash = blake3::hash(source.as_bytes());
            if self.written.get(path) == Some(&hash) {
                continue;
            }
            let target = self.dir.path().join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    SmellwrightError::io(format!("Failed to create {}", parent.display()), e)
                })?;
            }
            fs::write(&target, source).map_err(|e| {
                SmellwrightError::io(format!("Failed to write {}", target.display()), e)
            })?;
            self.written.insert(path.clone(), hash);
            rewritten += 1;
        }
        debug!("Synchronized {rewritten} files into the scratch workspace");
        Ok(())
    }
}

/// Per-test outcomes from a JUnit XML document (pytest, nose2, unittest-xml).
/// Test ids are `classname::name`.
pub fn parse_junit(bytes: &[u8]) -> Result<TestReport> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut report = TestReport::new();
    let mut current: Option<(String, TestOutcome)> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(tag)) => match tag.name().as_ref() {
                b"testcase" => current = Some((test_id(&tag), TestOutcome::Passed)),
                name => mark_current(&mut current, name),
            },
            Ok(Event::Empty(tag)) => match tag.name().as_ref() {
                b"testcase" => report.record(test_id(&tag), TestOutcome::Passed),
                name => mark_current(&mut current, name),
            },
            Ok(Event::End(tag)) => {
                if tag.name().as_ref() == b"testcase" {
                    if let Some((id, outcome)) = current.take() {
                        report.record(id, outcome);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(SmellwrightError::parse(
                    "xml",
                    format!("Failed to parse JUnit report: {err}"),
                ));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(report)
}

fn mark_current(current: &mut Option<(String, TestOutcome)>, element: &[u8]) {
    let Some((_, outcome)) = current.as_mut() else {
        return;
    };
    match element {
        b"failure" | b"error" => *outcome = TestOutcome::Failed,
        b"skipped" if *outcome == TestOutcome::Passed => *outcome = TestOutcome::Skipped,
        _ => {}
    }
}

fn test_id(tag: &BytesStart<'_>) -> String {
    let name = attribute_value(tag, b"name").unwrap_or_default();
    match attribute_value(tag, b"classname").filter(|c| !c.is_empty()) {
        Some(classname) => format!("{classname}::{name}"),
        None => name,
    }
}

fn attribute_value(tag: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    tag.attributes()
        .with_checks(false)
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .and_then(|attr| String::from_utf8(attr.value.into_owned()).ok())
}
