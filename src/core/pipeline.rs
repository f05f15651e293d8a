//! Pipeline orchestrator.
//!
//! Drives the scan → rank → refactor → verify → commit/rollback cycle:
//!
//! ```text
//! Scanning → Ranking → Refactoring → Verifying → Committing  ─┐
//!                          ▲                   └→ RollingBack ─┤
//!                          └───────────────────────────────────┘
//!                      (empty worklist, budget, cancel) → Done
//! ```
//!
//! Smells are worked on one at a time in worklist order, so at most one edit
//! is ever in flight. A smell whose file changed since the scan is refreshed
//! by re-running its analyzer on the current text before it is refactored.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::ast_service::AstService;
use crate::core::config::SmellwrightConfig;
use crate::core::errors::{Result, SmellwrightError};
use crate::core::smell::{Severity, Smell, SmellKind};
use crate::core::snapshot::ProjectSnapshot;
use crate::detectors::engine::{ConflictRecord, DetectorEngine, ScanWarning};
use crate::detectors::SymbolTrace;
use crate::io::source_tree::SourceTree;
use crate::refactor::{check_idempotence, RefactorContext, RefactorResult, RefactorerRegistry};
use crate::verify::{RejectionReason, TestHarness, Verdict, VerificationOracle};

/// Orchestrator states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Scanning,
    Ranking,
    Refactoring,
    Verifying,
    Committing,
    RollingBack,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Ranking => "ranking",
            Self::Refactoring => "refactoring",
            Self::Verifying => "verifying",
            Self::Committing => "committing",
            Self::RollingBack => "rolling-back",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// An edit that passed verification and became the new baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedFix {
    /// Id of the fixed smell
    pub smell_id: String,
    /// Kind of the fixed smell
    pub kind: SmellKind,
    /// File the smell was reported in
    pub file_path: PathBuf,
    /// Primary line of the smell before the rewrite
    pub line: usize,
    /// Severity of the fixed smell
    pub severity: Severity,
    /// Detector message of the fixed smell
    pub message: String,
    /// Every file the edit rewrote
    pub touched_files: Vec<PathBuf>,
    /// Tests run against the candidate, when a harness is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_run: Option<usize>,
}

/// A smell that was not fixed, with the reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmellOutcome {
    /// Id of the smell
    pub smell_id: String,
    /// Kind of the smell
    pub kind: SmellKind,
    /// File the smell was reported in
    pub file_path: PathBuf,
    /// Primary line of the smell
    pub line: usize,
    /// Why the smell was not fixed
    pub reason: String,
    /// Verification verdict for smells rejected by the oracle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<RejectionReason>,
}

impl SmellOutcome {
    fn new(smell: &Smell, reason: impl Into<String>) -> Self {
        Self {
            smell_id: smell.id.clone(),
            kind: smell.kind,
            file_path: smell.file_path.clone(),
            line: smell.primary_line(),
            reason: reason.into(),
            rejection: None,
        }
    }

    fn rejected(smell: &Smell, rejection: RejectionReason) -> Self {
        Self {
            rejection: Some(rejection.clone()),
            ..Self::new(smell, rejection.to_string())
        }
    }
}

/// Wall-clock time per phase, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    /// Detection and ranking
    pub scan_ms: u64,
    /// Strategy runs, including stale-smell refreshes
    pub refactor_ms: u64,
    /// Syntactic and behavioral gates
    pub verify_ms: u64,
    /// Writes to disk and baseline promotion
    pub commit_ms: u64,
    /// Whole run
    pub total_ms: u64,
}

/// Final account of a run. Every detected smell ends up in exactly one of
/// `committed`, `skipped`, `failed` or `obsolete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Unique id of this run
    pub run_id: String,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Set when nothing was written to disk
    pub dry_run: bool,
    /// Files that parsed and were analyzed
    pub files_scanned: usize,
    /// Worklist length after deduplication
    pub smells_detected: usize,
    /// Fixes that passed verification
    pub committed: Vec<CommittedFix>,
    /// Smells no strategy could rewrite safely, or left over by the budget or cancellation
    pub skipped: Vec<SmellOutcome>,
    /// Smells whose candidate was rejected or could not be applied
    pub failed: Vec<SmellOutcome>,
    /// Smells no longer present once earlier edits were committed
    pub obsolete: Vec<SmellOutcome>,
    /// Files or analyzers that could not be processed
    pub warnings: Vec<ScanWarning>,
    /// Smells dropped during deduplication or moved by earlier edits
    pub conflicts: Vec<ConflictRecord>,
    /// Set when the run was cancelled before the worklist was drained
    pub cancelled: bool,
    /// Time spent per phase
    pub timings: StageTimings,
}

impl PipelineReport {
    fn new(dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            dry_run,
            files_scanned: 0,
            smells_detected: 0,
            committed: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            obsolete: Vec::new(),
            warnings: Vec::new(),
            conflicts: Vec::new(),
            cancelled: false,
            timings: StageTimings::default(),
        }
    }

    /// Smells accounted for in one of the outcome lists
    pub fn accounted(&self) -> usize {
        self.committed.len() + self.skipped.len() + self.failed.len() + self.obsolete.len()
    }
}

/// Final snapshot together with the report
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Project state after the last committed fix
    pub snapshot: ProjectSnapshot,
    /// Account of every detected smell
    pub report: PipelineReport,
}

/// Where a refreshed smell stands against the current snapshot
enum Refresh {
    Current(Smell),
    Gone,
    Unavailable,
}

/// Scan, refactor and verify a project
pub struct Pipeline {
    config: SmellwrightConfig,
    ast_service: Arc<AstService>,
    engine: DetectorEngine,
    refactorers: RefactorerRegistry,
    oracle: VerificationOracle,
    source_tree: Option<SourceTree>,
    cancel: CancellationToken,
    state: PipelineState,
}

impl Pipeline {
    /// Pipeline with the default analyzers and refactorers and no test harness
    pub fn new(config: SmellwrightConfig) -> Self {
        let ast_service = AstService::shared();
        let engine = DetectorEngine::new(&config, Arc::clone(&ast_service));
        let oracle = VerificationOracle::new(config.verification.clone(), Arc::clone(&ast_service));
        Self {
            config,
            ast_service,
            engine,
            refactorers: RefactorerRegistry::with_defaults(),
            oracle,
            source_tree: None,
            cancel: CancellationToken::new(),
            state: PipelineState::Idle,
        }
    }

    /// Attach the behavioral oracle
    pub fn with_harness(mut self, harness: Arc<dyn TestHarness>) -> Self {
        self.oracle = VerificationOracle::new(
            self.config.verification.clone(),
            Arc::clone(&self.ast_service),
        )
        .with_harness(harness);
        self
    }

    /// Persist commits to this tree (unless the run is dry)
    pub fn with_source_tree(mut self, tree: SourceTree) -> Self {
        self.source_tree = Some(tree);
        self
    }

    /// Replace the refactorer table
    pub fn with_refactorers(mut self, refactorers: RefactorerRegistry) -> Self {
        self.refactorers = refactorers;
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that aborts the run between smells
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current state of the state machine
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Detector engine used for scans and refreshes
    pub fn engine(&self) -> &DetectorEngine {
        &self.engine
    }

    /// Verification oracle, with its harness run counter
    pub fn oracle(&self) -> &VerificationOracle {
        &self.oracle
    }

    fn transition(&mut self, next: PipelineState) {
        debug!("Pipeline: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Run the full cycle on `snapshot`
    pub async fn run(&mut self, snapshot: ProjectSnapshot) -> PipelineOutcome {
        let run_started = Instant::now();
        let mut report = PipelineReport::new(self.config.pipeline.dry_run);
        info!("Pipeline run {} started on {} files", report.run_id, snapshot.len());

        self.transition(PipelineState::Scanning);
        let scan_started = Instant::now();
        let scan = self.engine.scan(&snapshot).await;
        report.timings.scan_ms = elapsed_ms(scan_started);
        report.files_scanned = scan.files_scanned;
        report.smells_detected = scan.worklist.len();
        report.warnings = scan.warnings;
        report.conflicts = scan.conflicts;

        self.transition(PipelineState::Ranking);
        let mut worklist: VecDeque<Smell> = scan.worklist.into();
        let mut symbols = scan.symbols;
        let scanned = snapshot.clone();
        let mut current = snapshot;

        while let Some(smell) = worklist.pop_front() {
            if self.cancel.is_cancelled() {
                info!("Pipeline cancelled with {} smells pending", worklist.len() + 1);
                report.cancelled = true;
                report.skipped.push(SmellOutcome::new(&smell, "pipeline cancelled"));
                report
                    .skipped
                    .extend(
                        worklist
                            .drain(..)
                            .map(|rest| SmellOutcome::new(&rest, "pipeline cancelled")),
                    );
                break;
            }
            if report.committed.len() >= self.config.pipeline.max_edits_per_run {
                info!(
                    "Edit budget of {} reached with {} smells pending",
                    self.config.pipeline.max_edits_per_run,
                    worklist.len() + 1
                );
                report.skipped.push(SmellOutcome::new(&smell, "edit budget exhausted"));
                report
                    .skipped
                    .extend(
                        worklist
                            .drain(..)
                            .map(|rest| SmellOutcome::new(&rest, "edit budget exhausted")),
                    );
                break;
            }

            self.transition(PipelineState::Refactoring);
            let refactor_started = Instant::now();
            let smell = match self.refresh(smell, &scanned, &current, &symbols, &mut report).await {
                Refresh::Current(smell) => smell,
                Refresh::Gone => continue,
                Refresh::Unavailable => {
                    report.timings.refactor_ms += elapsed_ms(refactor_started);
                    continue;
                }
            };

            let result = self.refactor(&smell, &current, &symbols);
            report.timings.refactor_ms += elapsed_ms(refactor_started);
            let edits = match result {
                RefactorResult::Applied { edits } => edits,
                RefactorResult::Skipped { reason } => {
                    info!(
                        "Skipped {} at {}:{}: {reason}",
                        smell.kind,
                        smell.file_path.display(),
                        smell.primary_line()
                    );
                    report.skipped.push(SmellOutcome::new(&smell, reason));
                    continue;
                }
                RefactorResult::Failed { reason } => {
                    warn!("Refactor of {} failed: {reason}", smell.id);
                    report.failed.push(SmellOutcome::new(&smell, reason));
                    continue;
                }
            };

            self.transition(PipelineState::Verifying);
            let verify_started = Instant::now();
            let candidate = match current.apply(&edits) {
                Ok(candidate) => candidate,
                Err(err) => {
                    report.timings.verify_ms += elapsed_ms(verify_started);
                    self.transition(PipelineState::RollingBack);
                    report.failed.push(SmellOutcome::new(&smell, err.to_string()));
                    continue;
                }
            };
            let touched: Vec<PathBuf> = edits.iter().map(|edit| edit.path.clone()).collect();
            let verdict = self.oracle.verify(&current, &candidate, &touched).await;
            report.timings.verify_ms += elapsed_ms(verify_started);

            let tests = match verdict {
                Verdict::Accepted { report: tests } => tests,
                Verdict::Rejected(rejection) => {
                    self.transition(PipelineState::RollingBack);
                    report.failed.push(SmellOutcome::rejected(&smell, rejection));
                    continue;
                }
            };

            self.transition(PipelineState::Committing);
            let commit_started = Instant::now();
            if let Err(err) = self.persist(&current, &candidate) {
                warn!("{err}");
                report.timings.commit_ms += elapsed_ms(commit_started);
                self.transition(PipelineState::RollingBack);
                report.failed.push(SmellOutcome::new(&smell, err.to_string()));
                continue;
            }
            for path in &touched {
                self.update_symbols(&mut symbols, &candidate, path);
            }
            let tests_run = tests.as_ref().map(|tests| tests.len());
            self.oracle.promote_baseline(&candidate, tests).await;
            current = candidate;
            report.timings.commit_ms += elapsed_ms(commit_started);

            info!(
                "Committed {} at {}:{}",
                smell.kind,
                smell.file_path.display(),
                smell.primary_line()
            );
            report.committed.push(CommittedFix {
                smell_id: smell.id.clone(),
                kind: smell.kind,
                file_path: smell.file_path.clone(),
                line: smell.primary_line(),
                severity: smell.severity,
                message: smell.message.clone(),
                touched_files: touched,
                tests_run,
            });
        }

        self.transition(PipelineState::Done);
        report.timings.total_ms = elapsed_ms(run_started);
        info!(
            "Pipeline run {} done: {} committed, {} skipped, {} failed, {} obsolete",
            report.run_id,
            report.committed.len(),
            report.skipped.len(),
            report.failed.len(),
            report.obsolete.len()
        );
        PipelineOutcome {
            snapshot: current,
            report,
        }
    }

    /// Confirm `smell` against the current snapshot, re-running its analyzer
    /// when earlier commits may have shifted or removed it
    async fn refresh(
        &self,
        smell: Smell,
        scanned: &ProjectSnapshot,
        current: &ProjectSnapshot,
        symbols: &SymbolTrace,
        report: &mut PipelineReport,
    ) -> Refresh {
        let file_changed = scanned.get(&smell.file_path) != current.get(&smell.file_path);
        // unused members depend on references anywhere in the project
        let project_changed =
            smell.kind == SmellKind::UnusedMember && current.generation() != scanned.generation();
        if !file_changed && !project_changed {
            return Refresh::Current(smell);
        }

        debug!("Refreshing {} after earlier edits", smell.id);
        let found = match self.engine.parse_file(current, &smell.file_path).await {
            Ok(unit) => self.engine.analyze_file(smell.kind, &unit, symbols),
            Err(err) => Err(err),
        };
        let found = match found {
            Ok(found) => found,
            Err(err) => {
                let reason = format!("could not refresh stale smell: {err}");
                warn!("{}: {reason}", smell.id);
                report.skipped.push(SmellOutcome::new(&smell, reason));
                return Refresh::Unavailable;
            }
        };

        let key = smell.logical_key();
        let line = smell.primary_line();
        let Some(fresh) = found
            .into_iter()
            .filter(|candidate| candidate.logical_key() == key)
            .min_by_key(|candidate| candidate.primary_line().abs_diff(line))
        else {
            info!("{} is gone after earlier edits", smell.id);
            report
                .obsolete
                .push(SmellOutcome::new(&smell, "no longer present after earlier edits"));
            return Refresh::Gone;
        };

        if fresh.id != smell.id {
            report.conflicts.push(ConflictRecord {
                file_path: smell.file_path.clone(),
                kind: smell.kind,
                line,
                kept: fresh.id.clone(),
                dropped: smell.id.clone(),
                reason: format!("span moved to line {} by an earlier edit", fresh.primary_line()),
            });
        }
        Refresh::Current(fresh)
    }

    fn refactor(
        &self,
        smell: &Smell,
        current: &ProjectSnapshot,
        symbols: &SymbolTrace,
    ) -> RefactorResult {
        let Some(refactorer) = self.refactorers.get(smell.kind) else {
            return RefactorResult::skipped(format!("no refactorer registered for {}", smell.kind));
        };
        let context = RefactorContext::new(current, &self.ast_service, &self.config.detection);
        debug!("Applying {} to {}", refactorer.name(), smell.id);
        let result = refactorer.refactor(smell, &context);
        match self.engine.registry().get(smell.kind) {
            Some(analyzer) => {
                check_idempotence(smell, result, &context, analyzer.as_ref(), symbols)
            }
            None => result,
        }
    }

    fn persist(&self, current: &ProjectSnapshot, candidate: &ProjectSnapshot) -> Result<()> {
        if !self.config.pipeline.persists() {
            return Ok(());
        }
        let Some(tree) = &self.source_tree else {
            return Ok(());
        };
        let written = tree.commit(current, candidate).map_err(|err| {
            SmellwrightError::pipeline(
                PipelineState::Committing.to_string(),
                format!("could not write the edit: {err}"),
            )
        })?;
        debug!("Wrote {} files", written.len());
        Ok(())
    }

    fn update_symbols(
        &self,
        symbols: &mut SymbolTrace,
        snapshot: &ProjectSnapshot,
        path: &std::path::Path,
    ) {
        let Some(source) = snapshot.get(path) else {
            return;
        };
        match self.ast_service.parse(source) {
            Ok(tree) => symbols.insert_file(path, source, &tree),
            Err(err) => warn!("Could not refresh symbols of {}: {err}", path.display()),
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state)
            .field("engine", &self.engine)
            .field("refactorers", &self.refactorers)
            .field("oracle", &self.oracle)
            .finish_non_exhaustive()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
