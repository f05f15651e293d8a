//! Property tests for detector thresholds and reported spans.

use proptest::prelude::*;

use smellwright_rs::core::ast_service::AstService;
use smellwright_rs::core::smell::validate;
use smellwright_rs::{AdditionalInfo, DetectorEngine, ProjectSnapshot, SmellKind, SmellwrightConfig};

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

fn nesting_depths(source: &str, threshold: usize) -> Vec<usize> {
    let mut config = SmellwrightConfig::default();
    config.detection.loop_nesting_threshold = threshold;
    let engine = DetectorEngine::new(&config, AstService::shared());
    let snapshot = ProjectSnapshot::from_files([("deep.py", source)]);
    let outcome = tokio_test::block_on(engine.scan(&snapshot));

    outcome
        .worklist
        .iter()
        .filter(|smell| smell.kind == SmellKind::ExcessiveNesting)
        .map(|smell| {
            validate(smell, source).expect("span inside source");
            match &smell.additional_info {
                AdditionalInfo::ExcessiveNesting { depth, .. } => *depth,
                other => panic!("unexpected info {other:?}"),
            }
        })
        .collect()
}

/// Python's `len(range(start, stop, step))`
fn python_range_len(start: i64, stop: i64, step: i64) -> u128 {
    let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
    let span = if step > 0 { stop - start } else { start - stop };
    if span <= 0 {
        0
    } else {
        ((span - 1) / step.abs() + 1) as u128
    }
}

fn repeated_call_repetitions(source: &str) -> Vec<Option<usize>> {
    let config = SmellwrightConfig::default();
    let engine = DetectorEngine::new(&config, AstService::shared());
    let snapshot = ProjectSnapshot::from_files([("loop.py", source)]);
    let outcome = tokio_test::block_on(engine.scan(&snapshot));
    assert!(outcome.warnings.is_empty(), "warnings: {:?}", outcome.warnings);

    outcome
        .worklist
        .iter()
        .filter_map(|smell| match &smell.additional_info {
            AdditionalInfo::RepeatedCallInLoop { repetitions, .. } => Some(*repetitions),
            _ => None,
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn nesting_is_flagged_only_above_threshold(depth in 1usize..9, threshold in 1usize..8) {
        let source = nested_loops(depth);
        let depths = nesting_depths(&source, threshold);
        if depth > threshold {
            prop_assert_eq!(depths, vec![depth]);
        } else {
            prop_assert!(depths.is_empty());
        }
    }

    #[test]
    fn reported_spans_stay_inside_the_file(depth in 1usize..8, padding in 0usize..4) {
        let source = format!("{}{}", "\n".repeat(padding), nested_loops(depth));
        let config = SmellwrightConfig::default();
        let engine = DetectorEngine::new(&config, AstService::shared());
        let snapshot = ProjectSnapshot::from_files([("deep.py", source.as_str())]);
        let outcome = tokio_test::block_on(engine.scan(&snapshot));
        let line_count = source.lines().count();

        for smell in &outcome.worklist {
            prop_assert!(validate(smell, &source).is_ok());
            for occurrence in &smell.occurrences {
                prop_assert!(occurrence.line >= 1);
                prop_assert!(occurrence.line <= occurrence.end_line);
                prop_assert!(occurrence.end_line <= line_count);
            }
        }
    }

    #[test]
    fn range_trip_counts_never_overflow(
        start in any::<i64>(),
        stop in any::<i64>(),
        step in any::<i64>().prop_filter("zero step", |step| *step != 0),
    ) {
        let source = format!("for i in range({start}, {stop}, {step}):\n    v = f(2)\n");
        let found = repeated_call_repetitions(&source);

        // `-9223372036854775808` is not an i64 literal once the sign is split off
        if [start, stop, step].contains(&i64::MIN) {
            prop_assert_eq!(found, vec![None]);
            return Ok(());
        }
        let expected = python_range_len(start, stop, step);
        match usize::try_from(expected) {
            Ok(len) if len < SmellwrightConfig::default().detection.repetition_threshold => {
                prop_assert!(found.is_empty());
            }
            Ok(len) => {
                prop_assert_eq!(found, vec![Some(len)]);
            }
            Err(_) => {
                prop_assert_eq!(found, vec![None]);
            }
        }
    }
}
