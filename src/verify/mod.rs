//! Verification oracle.
//!
//! Every candidate rewrite passes two gates before the orchestrator may commit
//! it: every touched file must parse cleanly, and the external test harness
//! must not report a regression against the baseline run of the snapshot the
//! candidate was derived from. The baseline is cached by snapshot fingerprint
//! and replaced after each commit.

pub mod harness;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::ast_service::{first_syntax_error, AstService};
use crate::core::config::VerificationConfig;
use crate::core::errors::{Result, SmellwrightError};
use crate::core::snapshot::ProjectSnapshot;

pub use harness::{CommandTestHarness, TestHarness};

/// Outcome of a single test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    /// The test passed
    Passed,
    /// The test failed or errored
    Failed,
    /// The test was skipped
    Skipped,
}

impl TestOutcome {
    /// Rank used when a test id is reported more than once
    fn weight(self) -> u8 {
        match self {
            Self::Passed => 0,
            Self::Skipped => 1,
            Self::Failed => 2,
        }
    }
}

/// Per-test results of one harness run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    /// Outcome per test id
    pub outcomes: BTreeMap<String, TestOutcome>,
}

impl TestReport {
    /// Create an empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome; a repeated id keeps the worst outcome seen
    pub fn record(&mut self, test_id: impl Into<String>, outcome: TestOutcome) {
        let entry = self.outcomes.entry(test_id.into()).or_insert(outcome);
        if outcome.weight() > entry.weight() {
            *entry = outcome;
        }
    }

    /// Outcome of one test
    pub fn outcome(&self, test_id: &str) -> Option<TestOutcome> {
        self.outcomes.get(test_id).copied()
    }

    /// Number of passing tests
    pub fn passed(&self) -> usize {
        self.count(TestOutcome::Passed)
    }

    /// Number of failing tests
    pub fn failed(&self) -> usize {
        self.count(TestOutcome::Failed)
    }

    fn count(&self, outcome: TestOutcome) -> usize {
        self.outcomes.values().filter(|o| **o == outcome).count()
    }

    /// Number of tests
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// True when no test was reported
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Tests that passed in `baseline` but did not pass here, including tests
    /// that disappeared from the run.
    pub fn regressions(&self, baseline: &TestReport) -> Vec<String> {
        baseline
            .outcomes
            .iter()
            .filter(|(_, outcome)| **outcome == TestOutcome::Passed)
            .filter(|(id, _)| self.outcome(id) != Some(TestOutcome::Passed))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Why a candidate was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    /// A touched file does not parse
    SyntaxError {
        /// Touched file
        path: PathBuf,
        /// 1-based line of the first error
        line: usize,
        /// 1-based byte column of the first error
        column: usize,
        /// Error node description
        kind: String,
    },
    /// A touched file is missing from the candidate
    MissingFile {
        /// Touched file
        path: PathBuf,
    },
    /// The parser failed or gave up on a touched file
    Unparsable {
        /// Touched file
        path: PathBuf,
        /// Parser error
        message: String,
    },
    /// Tests that passed at baseline and no longer pass
    Regression {
        /// Regressed test ids, sorted
        tests: Vec<String>,
    },
    /// The harness could not be run on the candidate
    HarnessError {
        /// Harness error
        message: String,
    },
    /// The harness did not finish in time; treated as a regression
    HarnessTimeout {
        /// Configured limit
        seconds: u64,
    },
    /// The baseline run failed, so no comparison is possible
    BaselineUnavailable {
        /// Harness error from the baseline run
        message: String,
    },
    /// No harness is configured and tests are required
    TestsRequired,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SyntaxError {
                path,
                line,
                column,
                kind,
            } => write!(f, "syntax error in {} at {line}:{column} ({kind})", path.display()),
            Self::MissingFile { path } => {
                write!(f, "{} is missing from the candidate", path.display())
            }
            Self::Unparsable { path, message } => {
                write!(f, "{} could not be parsed: {message}", path.display())
            }
            Self::Regression { tests } => {
                write!(f, "{} test(s) regressed: {}", tests.len(), tests.join(", "))
            }
            Self::HarnessError { message } => write!(f, "test harness failed: {message}"),
            Self::HarnessTimeout { seconds } => {
                write!(f, "test harness timed out after {seconds}s")
            }
            Self::BaselineUnavailable { message } => {
                write!(f, "baseline test run failed: {message}")
            }
            Self::TestsRequired => write!(f, "no test command configured"),
        }
    }
}

/// Result of verifying one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Both gates passed. `report` is the candidate's test run, absent when no
    /// harness is configured.
    Accepted { report: Option<TestReport> },
    Rejected(RejectionReason),
}

impl Verdict {
    /// True for [`Verdict::Accepted`]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Two-gate verification of candidate snapshots
pub struct VerificationOracle {
    ast_service: Arc<AstService>,
    harness: Option<Arc<dyn TestHarness>>,
    config: VerificationConfig,
    baseline: Mutex<Option<(String, TestReport)>>,
    harness_runs: AtomicUsize,
}

impl VerificationOracle {
    /// Create an oracle without a test harness
    pub fn new(config: VerificationConfig, ast_service: Arc<AstService>) -> Self {
        Self {
            ast_service,
            harness: None,
            config,
            baseline: Mutex::new(None),
            harness_runs: AtomicUsize::new(0),
        }
    }

    /// Attach the behavioral oracle
    pub fn with_harness(mut self, harness: Arc<dyn TestHarness>) -> Self {
        self.harness = Some(harness);
        self
    }

    /// True when a harness is attached
    pub fn has_harness(&self) -> bool {
        self.harness.is_some()
    }

    /// Harness invocations so far, baseline runs included
    pub fn harness_runs(&self) -> usize {
        self.harness_runs.load(Ordering::Relaxed)
    }

    /// Check `after` against `before` for the files in `touched`
    pub async fn verify(
        &self,
        before: &ProjectSnapshot,
        after: &ProjectSnapshot,
        touched: &[PathBuf],
    ) -> Verdict {
        if let Some(reason) = self.syntactic_gate(after, touched).await {
            info!("Candidate rejected by syntactic gate: {reason}");
            return Verdict::Rejected(reason);
        }
        let verdict = self.behavioral_gate(before, after).await;
        if let Verdict::Rejected(reason) = &verdict {
            info!("Candidate rejected by behavioral gate: {reason}");
        }
        verdict
    }

    async fn syntactic_gate(
        &self,
        after: &ProjectSnapshot,
        touched: &[PathBuf],
    ) -> Option<RejectionReason> {
        for path in touched {
            let Some(source) = after.get_shared(path) else {
                return Some(RejectionReason::MissingFile { path: path.clone() });
            };
            let parsed = self
                .ast_service
                .parse_with_timeout(source, self.config.parse_timeout(), false)
                .await;
            match parsed {
                Ok(tree) => {
                    if let Some(location) = first_syntax_error(tree.root_node()) {
                        return Some(RejectionReason::SyntaxError {
                            path: path.clone(),
                            line: location.line,
                            column: location.column,
                            kind: location.kind,
                        });
                    }
                }
                Err(error) => {
                    return Some(RejectionReason::Unparsable {
                        path: path.clone(),
                        message: error.to_string(),
                    });
                }
            }
        }
        None
    }

    async fn behavioral_gate(&self, before: &ProjectSnapshot, after: &ProjectSnapshot) -> Verdict {
        let Some(harness) = &self.harness else {
            if self.config.require_tests {
                return Verdict::Rejected(RejectionReason::TestsRequired);
            }
            debug!("No test harness configured; accepting on the syntactic gate alone");
            return Verdict::Accepted { report: None };
        };

        let baseline = match self.baseline(before).await {
            Ok(report) => report,
            Err(error) => {
                return Verdict::Rejected(RejectionReason::BaselineUnavailable {
                    message: error.to_string(),
                })
            }
        };

        let report = match self.run_harness(harness.as_ref(), after).await {
            Ok(report) => report,
            Err(SmellwrightError::Timeout { .. }) => {
                return Verdict::Rejected(RejectionReason::HarnessTimeout {
                    seconds: self.config.test_timeout_secs,
                })
            }
            Err(error) => {
                return Verdict::Rejected(RejectionReason::HarnessError {
                    message: error.to_string(),
                })
            }
        };

        let regressions = report.regressions(&baseline);
        if regressions.is_empty() {
            Verdict::Accepted {
                report: Some(report),
            }
        } else {
            Verdict::Rejected(RejectionReason::Regression { tests: regressions })
        }
    }

    /// Baseline report for `snapshot`, running the harness only when the
    /// cached baseline belongs to a different snapshot
    pub async fn baseline(&self, snapshot: &ProjectSnapshot) -> Result<TestReport> {
        let harness = self
            .harness
            .as_ref()
            .ok_or_else(|| SmellwrightError::verification("No test harness configured"))?;
        let fingerprint = snapshot.fingerprint();

        let mut cached = self.baseline.lock().await;
        if let Some((key, report)) = cached.as_ref() {
            if *key == fingerprint {
                return Ok(report.clone());
            }
        }

        info!("Running baseline tests with {}", harness.describe());
        let report = self.run_harness(harness.as_ref(), snapshot).await?;
        info!(
            "Baseline: {} passed, {} failed of {} tests",
            report.passed(),
            report.failed(),
            report.len()
        );
        *cached = Some((fingerprint, report.clone()));
        Ok(report)
    }

    /// Make the committed snapshot the new baseline. The candidate's own run
    /// is reused when there is one; otherwise the next verification reruns
    /// the baseline.
    pub async fn promote_baseline(&self, snapshot: &ProjectSnapshot, report: Option<TestReport>) {
        let mut cached = self.baseline.lock().await;
        *cached = report.map(|report| (snapshot.fingerprint(), report));
    }

    async fn run_harness(
        &self,
        harness: &dyn TestHarness,
        snapshot: &ProjectSnapshot,
    ) -> Result<TestReport> {
        self.harness_runs.fetch_add(1, Ordering::Relaxed);
        let timeout = self.config.test_timeout();
        match tokio::time::timeout(timeout, harness.run(snapshot)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Test harness exceeded {}s", timeout.as_secs());
                Err(SmellwrightError::timeout("test harness", timeout))
            }
        }
    }
}

impl fmt::Debug for VerificationOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationOracle")
            .field("harness", &self.harness.as_ref().map(|h| h.describe()))
            .field("config", &self.config)
            .field("harness_runs", &self.harness_runs())
            .finish()
    }
}
