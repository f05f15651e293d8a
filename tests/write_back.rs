//! Pipeline runs against projects on disk.

use std::fs;

use tempfile::TempDir;

use smellwright_rs::core::config::VerificationConfig;
use smellwright_rs::{Pipeline, SmellwrightConfig, SourceTree};

const CONCAT: &str = "\
def join_rows(rows):
    out = ''
    for row in rows:
        out += row
    return out
";

fn project() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join("pkg")).unwrap();
    fs::write(dir.path().join("pkg/rows.py"), CONCAT).unwrap();
    fs::write(dir.path().join("pkg/clean.py"), "VALUE = 1\n").unwrap();
    fs::write(dir.path().join("README.md"), "# not python\n").unwrap();
    dir
}

fn config(dry_run: bool) -> SmellwrightConfig {
    let mut config = SmellwrightConfig {
        verification: VerificationConfig {
            require_tests: false,
            ..VerificationConfig::default()
        },
        ..SmellwrightConfig::default()
    };
    config.pipeline.dry_run = dry_run;
    config
}

#[tokio::test]
async fn committed_fix_is_written_to_disk() {
    let dir = project();
    let config = config(false);
    let tree = SourceTree::open(dir.path(), &config.io).unwrap();
    let loaded = tree.load().unwrap();
    assert_eq!(loaded.snapshot.len(), 2);

    let mut pipeline = Pipeline::new(config).with_source_tree(tree);
    let outcome = pipeline.run(loaded.snapshot).await;
    assert_eq!(outcome.report.committed.len(), 1, "report: {:#?}", outcome.report);

    let on_disk = fs::read_to_string(dir.path().join("pkg/rows.py")).unwrap();
    assert!(on_disk.contains("\"\".join(out_parts)"));
    assert_eq!(fs::read_to_string(dir.path().join("pkg/clean.py")).unwrap(), "VALUE = 1\n");
}

#[tokio::test]
async fn dry_run_leaves_files_untouched() {
    let dir = project();
    let config = config(true);
    let tree = SourceTree::open(dir.path(), &config.io).unwrap();
    let loaded = tree.load().unwrap();

    let mut pipeline = Pipeline::new(config).with_source_tree(tree);
    let outcome = pipeline.run(loaded.snapshot).await;

    assert!(outcome.report.dry_run);
    assert_eq!(outcome.report.committed.len(), 1);
    assert_eq!(fs::read_to_string(dir.path().join("pkg/rows.py")).unwrap(), CONCAT);
}
