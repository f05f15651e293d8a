//! Detector engine: parse every file, run the registered analyzers, merge
//! and rank the results into a worklist.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::ast_service::AstService;
use crate::core::config::{DetectionConfig, SmellwrightConfig};
use crate::core::errors::{Result, SmellwrightError};
use crate::core::smell::{validate, Smell, SmellKind};
use crate::core::snapshot::ProjectSnapshot;
use crate::detectors::{AnalysisContext, AnalyzerRegistry, CodeUnit, SymbolTrace};

/// A per-file problem that did not stop the scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    /// File the warning refers to
    pub file_path: PathBuf,
    /// Analyzer that failed; `None` when the file could not be parsed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    /// Human-readable description
    pub message: String,
}

/// Two smells that claimed the same location; the loser is not worked on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// File holding both smells
    pub file_path: PathBuf,
    /// Kind of the dropped smell
    pub kind: SmellKind,
    /// Primary line of the dropped smell
    pub line: usize,
    /// Id of the smell that stays in the worklist
    pub kept: String,
    /// Id of the smell that was dropped
    pub dropped: String,
    /// Why the two smells collided
    pub reason: String,
}

/// Everything one scan produced
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Deduplicated smells in refactor order
    pub worklist: Vec<Smell>,
    /// Files or analyzers that could not be processed
    pub warnings: Vec<ScanWarning>,
    /// Smells dropped during deduplication
    pub conflicts: Vec<ConflictRecord>,
    /// Files that parsed and were analyzed
    pub files_scanned: usize,
    /// Symbol table built for this scan
    pub symbols: SymbolTrace,
}

/// Runs the analyzer registry over a project snapshot
#[derive(Debug)]
pub struct DetectorEngine {
    registry: AnalyzerRegistry,
    ast_service: Arc<AstService>,
    detection: DetectionConfig,
    parse_timeout: Duration,
    max_threads: Option<usize>,
}

impl DetectorEngine {
    /// Engine with one analyzer per enabled smell kind
    pub fn new(config: &SmellwrightConfig, ast_service: Arc<AstService>) -> Self {
        Self {
            registry: AnalyzerRegistry::for_config(&config.detection),
            ast_service,
            detection: config.detection.clone(),
            parse_timeout: config.verification.parse_timeout(),
            max_threads: config.performance.max_threads,
        }
    }

    /// Replace the analyzer table
    pub fn with_registry(mut self, registry: AnalyzerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Analyzer table in registration order
    pub fn registry(&self) -> &AnalyzerRegistry {
        &self.registry
    }

    /// Parser shared with the oracle
    pub fn ast_service(&self) -> &Arc<AstService> {
        &self.ast_service
    }

    /// Thresholds the analyzers run with
    pub fn detection_config(&self) -> &DetectionConfig {
        &self.detection
    }

    /// Scan every file of `snapshot`. Per-file failures become warnings; the
    /// scan itself never fails.
    pub async fn scan(&self, snapshot: &ProjectSnapshot) -> ScanOutcome {
        info!("Scanning {} files with {} analyzers", snapshot.len(), self.registry.len());

        let (units, mut warnings) = self.parse_units(snapshot).await;
        let symbols = build_symbols(snapshot, &units);
        let (tagged, analyzer_warnings) = self.analyze_units(&units, &symbols);
        warnings.extend(analyzer_warnings);

        let (worklist, conflicts) = rank(tagged);
        info!(
            "Scan finished: {} smells, {} warnings, {} conflicts",
            worklist.len(),
            warnings.len(),
            conflicts.len()
        );

        ScanOutcome {
            worklist,
            warnings,
            conflicts,
            files_scanned: units.len(),
            symbols,
        }
    }

    /// Parse every file on the blocking pool. Files that fail to parse or
    /// time out are reported and left out.
    pub async fn parse_units(
        &self,
        snapshot: &ProjectSnapshot,
    ) -> (Vec<CodeUnit>, Vec<ScanWarning>) {
        let parse_futures = snapshot.paths().filter_map(|path| {
            let source = snapshot.get_shared(path)?;
            let service = Arc::clone(&self.ast_service);
            let timeout = self.parse_timeout;
            let path = path.clone();
            Some(async move {
                let result = service
                    .parse_with_timeout(Arc::clone(&source), timeout, true)
                    .await;
                (path, source, result)
            })
        });

        let mut units = Vec::new();
        let mut warnings = Vec::new();
        for (path, source, result) in future::join_all(parse_futures).await {
            match result {
                Ok(tree) => units.push(CodeUnit::new(path, source, tree)),
                Err(err) => {
                    let err = err.with_file(path.display().to_string());
                    warn!("Skipping {}: {}", path.display(), err);
                    warnings.push(ScanWarning {
                        file_path: path,
                        analyzer: None,
                        message: parse_warning_message(&err),
                    });
                }
            }
        }
        units.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        (units, warnings)
    }

    /// Run every analyzer over every unit, in parallel across units. The
    /// returned smells are tagged with the registration index of the
    /// analyzer that produced them.
    pub fn analyze_units(
        &self,
        units: &[CodeUnit],
        symbols: &SymbolTrace,
    ) -> (Vec<(usize, Smell)>, Vec<ScanWarning>) {
        let run = || -> Vec<(Vec<(usize, Smell)>, Vec<ScanWarning>)> {
            units
                .par_iter()
                .map(|unit| self.analyze_unit(unit, symbols))
                .collect()
        };

        let per_unit = match self.max_threads {
            Some(threads) => match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => pool.install(run),
                Err(err) => {
                    warn!("Falling back to the global thread pool: {}", err);
                    run()
                }
            },
            None => run(),
        };

        let mut smells = Vec::new();
        let mut warnings = Vec::new();
        for (unit_smells, unit_warnings) in per_unit {
            smells.extend(unit_smells);
            warnings.extend(unit_warnings);
        }
        (smells, warnings)
    }

    fn analyze_unit(
        &self,
        unit: &CodeUnit,
        symbols: &SymbolTrace,
    ) -> (Vec<(usize, Smell)>, Vec<ScanWarning>) {
        let context = AnalysisContext::new(&self.detection, symbols);
        let mut smells = Vec::new();
        let mut warnings = Vec::new();

        for (index, analyzer) in self.registry.iter().enumerate() {
            let result = analyzer
                .analyze(unit, &context)
                .and_then(|found| check_smells(found, unit.source()));
            match result {
                Ok(found) => {
                    debug!(
                        "{} found {} smells in {}",
                        analyzer.name(),
                        found.len(),
                        unit.path().display()
                    );
                    smells.extend(found.into_iter().map(|smell| (index, smell)));
                }
                Err(err) => {
                    let err = match err {
                        SmellwrightError::Detection { .. } => err,
                        other => SmellwrightError::detection(analyzer.name(), other.to_string()),
                    }
                    .with_file(unit.path().display().to_string());
                    warn!("{}", err);
                    warnings.push(ScanWarning {
                        file_path: unit.file_path.clone(),
                        analyzer: Some(analyzer.name().to_string()),
                        message: err.to_string(),
                    });
                }
            }
        }
        (smells, warnings)
    }

    /// Re-run the analyzer for `kind` on one unit, used to refresh a smell
    /// whose file changed since the scan
    pub fn analyze_file(
        &self,
        kind: SmellKind,
        unit: &CodeUnit,
        symbols: &SymbolTrace,
    ) -> Result<Vec<Smell>> {
        let analyzer = self.registry.get(kind).ok_or_else(|| {
            SmellwrightError::detection(kind.as_str(), "no analyzer registered for this kind")
        })?;
        let context = AnalysisContext::new(&self.detection, symbols);
        let found = analyzer.analyze(unit, &context)?;
        check_smells(found, unit.source())
    }

    /// Parse the current text of `path` into a code unit
    pub async fn parse_file(&self, snapshot: &ProjectSnapshot, path: &Path) -> Result<CodeUnit> {
        let source = snapshot.get_shared(path).ok_or_else(|| {
            SmellwrightError::validation(format!("{} is not part of the snapshot", path.display()))
        })?;
        let tree = self
            .ast_service
            .parse_with_timeout(Arc::clone(&source), self.parse_timeout, true)
            .await
            .map_err(|err| err.with_file(path.display().to_string()))?;
        Ok(CodeUnit::new(path, source, tree))
    }
}

/// Symbol table covering every snapshot path, with symbols for parsed units
pub fn build_symbols(snapshot: &ProjectSnapshot, units: &[CodeUnit]) -> SymbolTrace {
    let mut symbols = SymbolTrace::for_paths(snapshot.paths());
    for unit in units {
        symbols.insert_file(unit.path(), unit.source(), &unit.tree);
    }
    symbols
}

fn check_smells(smells: Vec<Smell>, source: &str) -> Result<Vec<Smell>> {
    for smell in &smells {
        validate(smell, source)?;
    }
    Ok(smells)
}

fn parse_warning_message(err: &SmellwrightError) -> String {
    match err {
        SmellwrightError::Parse {
            message,
            line: Some(line),
            column,
            ..
        } => format!(
            "parse error at {line}:{}: {message}",
            column.unwrap_or(1)
        ),
        other => other.to_string(),
    }
}

/// Deduplicate on `(file, kind, primary line)` and order the survivors by
/// severity (descending), then file, line and column.
///
/// Input is expected in scan order (file, then analyzer registration, then
/// emission order); within a key the smell from the earliest-registered
/// analyzer wins, and among smells of one analyzer the first emitted wins.
pub fn rank(tagged: Vec<(usize, Smell)>) -> (Vec<Smell>, Vec<ConflictRecord>) {
    let mut tagged = tagged;
    tagged.sort_by(|(a_index, a), (b_index, b)| {
        a.file_path
            .cmp(&b.file_path)
            .then(a_index.cmp(b_index))
    });

    let mut winners: HashMap<(PathBuf, SmellKind, usize), usize> = HashMap::new();
    let mut kept: Vec<Smell> = Vec::new();
    let mut conflicts = Vec::new();

    for (_, smell) in tagged {
        let key = (smell.file_path.clone(), smell.kind, smell.primary_line());
        match winners.get(&key) {
            Some(&position) => {
                let winner = &kept[position];
                let record = ConflictRecord {
                    file_path: smell.file_path.clone(),
                    kind: smell.kind,
                    line: smell.primary_line(),
                    kept: winner.id.clone(),
                    dropped: smell.id.clone(),
                    reason: "duplicate location".to_string(),
                };
                warn!(
                    "Conflict at {}:{} ({}): keeping {}, dropping {}",
                    record.file_path.display(),
                    record.line,
                    record.kind,
                    record.kept,
                    record.dropped
                );
                conflicts.push(record);
            }
            None => {
                winners.insert(key, kept.len());
                kept.push(smell);
            }
        }
    }

    kept.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.file_path.cmp(&b.file_path))
            .then_with(|| a.primary_line().cmp(&b.primary_line()))
            .then_with(|| {
                let column = |s: &Smell| s.primary().and_then(|o| o.column).unwrap_or(0);
                column(a).cmp(&column(b))
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    (kept, conflicts)
}
