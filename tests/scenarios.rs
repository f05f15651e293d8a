//! End-to-end scenarios: detection, refactoring and verification over
//! in-memory projects.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use smellwright_rs::core::ast_service::AstService;
use smellwright_rs::core::config::VerificationConfig;
use smellwright_rs::core::smell::{ChainOrigin, Confidence};
use smellwright_rs::refactor::{RefactorContext, Refactorer, RefactorerRegistry};
use smellwright_rs::verify::{RejectionReason, TestOutcome, TestReport};
use smellwright_rs::{
    AdditionalInfo, DetectorEngine, FileEdit, Pipeline, PipelineState, ProjectSnapshot,
    RefactorResult, Smell,
    SmellKind, SmellwrightConfig, TestHarness,
};

fn syntax_only_config() -> SmellwrightConfig {
    SmellwrightConfig {
        verification: VerificationConfig {
            require_tests: false,
            ..VerificationConfig::default()
        },
        ..SmellwrightConfig::default()
    }
}

fn nested_loops(depth: usize) -> String {
    let mut source = String::from("def deep(n):\n");
    for level in 0..depth {
        source.push_str(&"    ".repeat(level + 1));
        source.push_str(&format!("for i{level} in range(n):\n"));
    }
    source.push_str(&"    ".repeat(depth + 1));
    source.push_str("print(i0)\n");
    source
}

const HOISTABLE: &str = "\
def total(x, y):
    acc = 0
    for i in range(100):
        acc += f(x, y)
    return acc
";

const CONCAT: &str = "\
def join_rows(rows):
    out = ''
    for row in rows:
        out += row
    return out
";

#[tokio::test]
async fn six_nested_loops_report_depth_six() {
    let config = SmellwrightConfig::default();
    let engine = DetectorEngine::new(&config, AstService::shared());
    let snapshot = ProjectSnapshot::from_files([("deep.py", nested_loops(6))]);

    let outcome = engine.scan(&snapshot).await;
    let nesting: Vec<&Smell> = outcome
        .worklist
        .iter()
        .filter(|smell| smell.kind == SmellKind::ExcessiveNesting)
        .collect();

    assert_eq!(nesting.len(), 1);
    match &nesting[0].additional_info {
        AdditionalInfo::ExcessiveNesting { depth, .. } => assert_eq!(*depth, 6),
        other => panic!("unexpected info {other:?}"),
    }
}

#[tokio::test]
async fn hoisted_call_is_gone_on_rescan() {
    let mut pipeline = Pipeline::new(syntax_only_config());
    let outcome = pipeline
        .run(ProjectSnapshot::from_files([("calls.py", HOISTABLE)]))
        .await;

    let report = &outcome.report;
    assert_eq!(pipeline.state(), PipelineState::Done);
    assert_eq!(report.committed.len(), 1, "report: {report:#?}");
    assert_eq!(report.committed[0].kind, SmellKind::RepeatedCallInLoop);

    let source = outcome.snapshot.get(Path::new("calls.py")).unwrap();
    assert!(source.contains("f_result = f(x, y)\n    for i in range(100):"));

    let rescan = pipeline.engine().scan(&outcome.snapshot).await;
    assert!(rescan
        .worklist
        .iter()
        .all(|smell| smell.kind != SmellKind::RepeatedCallInLoop));
}

#[tokio::test]
async fn cross_file_chain_is_low_confidence_and_skipped() {
    let input = ProjectSnapshot::from_files([
        ("project/config.py", "root = build_tree()\n"),
        (
            "project/consumer.py",
            "from project.config import root\n\ndef read():\n    return root.level1.level2.level3.level4.level5.level6.level7\n",
        ),
    ]);

    let config = syntax_only_config();
    let scan = DetectorEngine::new(&config, AstService::shared()).scan(&input).await;
    let chain = scan
        .worklist
        .iter()
        .find(|smell| smell.kind == SmellKind::LongAttributeChain)
        .expect("chain smell");
    assert!(chain.is_low_confidence());
    match &chain.additional_info {
        AdditionalInfo::LongAttributeChain {
            chain_length,
            origin,
            confidence,
            ..
        } => {
            assert_eq!(*chain_length, 7);
            assert!(matches!(origin, ChainOrigin::CrossFile { .. }));
            assert_eq!(*confidence, Confidence::Low);
        }
        other => panic!("unexpected info {other:?}"),
    }

    let mut pipeline = Pipeline::new(config);
    let outcome = pipeline.run(input.clone()).await;
    assert!(outcome.report.committed.is_empty());
    assert!(outcome
        .report
        .skipped
        .iter()
        .any(|skipped| skipped.kind == SmellKind::LongAttributeChain));
    assert_eq!(outcome.snapshot, input);
}

/// Scripted suite: `test_join` fails once the loop is rewritten with a
/// parts list, `test_smoke` always passes
struct CountingHarness {
    runs: AtomicUsize,
}

impl CountingHarness {
    fn new() -> Self {
        Self { runs: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl TestHarness for CountingHarness {
    async fn run(&self, snapshot: &ProjectSnapshot) -> smellwright_rs::Result<TestReport> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let source = snapshot.get(Path::new("rows.py")).unwrap_or_default();
        let mut report = TestReport::new();
        report.record("test_smoke", TestOutcome::Passed);
        let join = if source.contains("_parts") {
            TestOutcome::Failed
        } else {
            TestOutcome::Passed
        };
        report.record("test_join", join);
        Ok(report)
    }

    fn describe(&self) -> String {
        "counting".to_string()
    }
}

/// Emits a candidate that does not parse
struct BrokenRewrite;

impl Refactorer for BrokenRewrite {
    fn name(&self) -> &str {
        "broken-rewrite"
    }

    fn kind(&self) -> SmellKind {
        SmellKind::StringConcatInLoop
    }

    fn refactor(&self, smell: &Smell, _context: &RefactorContext<'_>) -> RefactorResult {
        RefactorResult::Applied {
            edits: vec![FileEdit {
                path: smell.file_path.clone(),
                new_source: "def join_rows(rows:\n    return ''\n".to_string(),
            }],
        }
    }
}

#[tokio::test]
async fn syntax_error_is_rejected_before_tests_run() {
    let harness = Arc::new(CountingHarness::new());
    let mut registry = RefactorerRegistry::with_defaults();
    registry.register(Arc::new(BrokenRewrite));

    let input = ProjectSnapshot::from_files([("rows.py", CONCAT)]);
    let mut pipeline = Pipeline::new(SmellwrightConfig::default())
        .with_refactorers(registry)
        .with_harness(harness.clone());
    let outcome = pipeline.run(input.clone()).await;

    assert_eq!(outcome.report.failed.len(), 1);
    assert!(matches!(
        outcome.report.failed[0].rejection,
        Some(RejectionReason::SyntaxError { .. })
    ));
    assert_eq!(harness.runs.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.oracle().harness_runs(), 0);
    assert_eq!(outcome.snapshot, input);
}

#[tokio::test]
async fn regressing_rewrite_is_rolled_back() {
    let harness = Arc::new(CountingHarness::new());
    let input = ProjectSnapshot::from_files([("rows.py", CONCAT)]);
    let mut pipeline = Pipeline::new(SmellwrightConfig::default()).with_harness(harness.clone());
    let outcome = pipeline.run(input.clone()).await;

    assert!(outcome.report.committed.is_empty());
    assert_eq!(outcome.report.failed.len(), 1);
    match &outcome.report.failed[0].rejection {
        Some(RejectionReason::Regression { tests }) => {
            assert_eq!(tests, &vec!["test_join".to_string()])
        }
        other => panic!("unexpected rejection {other:?}"),
    }
    // one baseline run plus one candidate run
    assert_eq!(harness.runs.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.snapshot, input);
}

/// Passes the untouched project quickly and stalls on any rewrite of rows.py
struct StallingHarness;

#[async_trait]
impl TestHarness for StallingHarness {
    async fn run(&self, snapshot: &ProjectSnapshot) -> smellwright_rs::Result<TestReport> {
        let source = snapshot.get(Path::new("rows.py")).unwrap_or_default();
        if source.contains("_parts") {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
        let mut report = TestReport::new();
        report.record("test_join", TestOutcome::Passed);
        Ok(report)
    }

    fn describe(&self) -> String {
        "stalling".to_string()
    }
}

#[tokio::test]
async fn candidate_timeout_is_rejected_and_rolled_back() {
    let mut config = SmellwrightConfig::default();
    config.verification.test_timeout_secs = 1;
    let input = ProjectSnapshot::from_files([("rows.py", CONCAT)]);
    let mut pipeline = Pipeline::new(config).with_harness(Arc::new(StallingHarness));
    let outcome = pipeline.run(input.clone()).await;

    assert!(outcome.report.committed.is_empty());
    assert_eq!(outcome.report.failed.len(), 1);
    assert_eq!(
        outcome.report.failed[0].rejection,
        Some(RejectionReason::HarnessTimeout { seconds: 1 })
    );
    assert_eq!(outcome.snapshot, input);
}

/// Rewrites the smell's file correctly but breaks a second file
struct TwoFileRewrite;

impl Refactorer for TwoFileRewrite {
    fn name(&self) -> &str {
        "two-file-rewrite"
    }

    fn kind(&self) -> SmellKind {
        SmellKind::StringConcatInLoop
    }

    fn refactor(&self, smell: &Smell, _context: &RefactorContext<'_>) -> RefactorResult {
        RefactorResult::Applied {
            edits: vec![
                FileEdit {
                    path: smell.file_path.clone(),
                    new_source: "def join_rows(rows):\n    return ''.join(rows)\n".to_string(),
                },
                FileEdit {
                    path: "helpers.py".into(),
                    new_source: "def helper(:\n".to_string(),
                },
            ],
        }
    }
}

#[tokio::test]
async fn multi_file_candidate_is_rejected_as_a_unit() {
    let mut registry = RefactorerRegistry::with_defaults();
    registry.register(Arc::new(TwoFileRewrite));

    let input = ProjectSnapshot::from_files([
        ("rows.py", CONCAT),
        ("helpers.py", "def helper():\n    return 1\n"),
    ]);
    let mut pipeline = Pipeline::new(syntax_only_config()).with_refactorers(registry);
    let outcome = pipeline.run(input.clone()).await;

    assert_eq!(outcome.report.failed.len(), 1);
    match &outcome.report.failed[0].rejection {
        Some(RejectionReason::SyntaxError { path, .. }) => {
            assert_eq!(path, Path::new("helpers.py"))
        }
        other => panic!("unexpected rejection {other:?}"),
    }
    assert_eq!(outcome.snapshot.get(Path::new("rows.py")), Some(CONCAT));
    assert_eq!(outcome.snapshot, input);
}

#[tokio::test]
async fn every_detected_smell_is_accounted_for() {
    let source = format!("{CONCAT}\n\n{HOISTABLE}\n\n{}", nested_loops(6));
    let mut pipeline = Pipeline::new(syntax_only_config());
    let outcome = pipeline.run(ProjectSnapshot::from_files([("mixed.py", source)])).await;

    let report = &outcome.report;
    assert!(report.smells_detected >= 3, "report: {report:#?}");
    assert_eq!(report.accounted(), report.smells_detected);
}
