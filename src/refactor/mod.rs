//! Refactorers: one rewrite strategy per smell kind.
//!
//! A refactorer reads the *current* text of the smell's file from the
//! snapshot it is handed and returns a candidate as whole-file
//! [`FileEdit`]s. It never writes to disk and never assumes another pending
//! smell has been fixed. When the rewrite cannot be derived safely it returns
//! [`RefactorResult::Skipped`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use tree_sitter::Node;

use crate::core::ast_service::AstService;
use crate::core::config::DetectionConfig;
use crate::core::smell::{Smell, SmellKind};
use crate::core::snapshot::{FileEdit, ProjectSnapshot};
use crate::detectors::{Analyzer, AnalysisContext, CodeUnit, SymbolTrace};

pub mod attribute_chain;
pub mod edit;
pub mod nesting;
pub mod repeated_call;
pub mod string_concat;
pub mod unused_member;

use edit::{apply_edits, TextEdit};

/// Outcome of one refactor attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefactorResult {
    /// New content for every touched file
    Applied {
        /// Full new contents of every rewritten file
        edits: Vec<FileEdit>,
    },
    /// The rewrite could not be derived safely; nothing was changed
    Skipped {
        /// Why no safe rewrite exists
        reason: String,
    },
    /// The strategy hit an unexpected error
    Failed {
        /// What went wrong
        reason: String,
    },
}

impl RefactorResult {
    /// Skip with `reason`
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    /// Fail with `reason`
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// True for a rewrite that is ready for verification
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    /// Files named by an applied result
    pub fn touched_files(&self) -> Vec<PathBuf> {
        match self {
            Self::Applied { edits } => edits.iter().map(|edit| edit.path.clone()).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for RefactorResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied { edits } => write!(f, "applied to {} file(s)", edits.len()),
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// What a refactorer may look at
#[derive(Debug, Clone, Copy)]
pub struct RefactorContext<'a> {
    /// Project state the rewrite is derived from
    pub snapshot: &'a ProjectSnapshot,
    /// Parser shared with the detectors
    pub ast_service: &'a AstService,
    /// Detection thresholds the rewrite has to satisfy
    pub config: &'a DetectionConfig,
}

impl<'a> RefactorContext<'a> {
    /// Bundle the inputs of one refactor call
    pub fn new(
        snapshot: &'a ProjectSnapshot,
        ast_service: &'a AstService,
        config: &'a DetectionConfig,
    ) -> Self {
        Self {
            snapshot,
            ast_service,
            config,
        }
    }

    /// Current text of `path`
    pub fn source(&self, path: &Path) -> Option<&'a str> {
        self.snapshot.get(path)
    }
}

/// Rewrite strategy for one smell kind
pub trait Refactorer: Send + Sync {
    /// Strategy name, used in logs
    fn name(&self) -> &str;

    /// Smell kind this strategy fixes
    fn kind(&self) -> SmellKind;

    /// Produce a candidate rewrite for `smell` against the current snapshot
    fn refactor(&self, smell: &Smell, context: &RefactorContext<'_>) -> RefactorResult;
}

/// Default refactorer for a smell kind
pub fn refactorer_for(kind: SmellKind) -> Arc<dyn Refactorer> {
    match kind {
        SmellKind::ExcessiveNesting => Arc::new(nesting::NestingRefactorer),
        SmellKind::LongAttributeChain => Arc::new(attribute_chain::AttributeChainRefactorer),
        SmellKind::RepeatedCallInLoop => Arc::new(repeated_call::RepeatedCallRefactorer),
        SmellKind::StringConcatInLoop => Arc::new(string_concat::StringConcatRefactorer),
        SmellKind::UnusedMember => Arc::new(unused_member::UnusedMemberRefactorer),
    }
}

/// Strategy table keyed by smell kind, read-only once built
#[derive(Clone, Default)]
pub struct RefactorerRegistry {
    refactorers: HashMap<SmellKind, Arc<dyn Refactorer>>,
}

impl RefactorerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// One refactorer for every kind in the taxonomy
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in SmellKind::ALL {
            registry.register(refactorer_for(kind));
        }
        registry
    }

    /// Register (or replace) the strategy for its kind
    pub fn register(&mut self, refactorer: Arc<dyn Refactorer>) {
        self.refactorers.insert(refactorer.kind(), refactorer);
    }

    /// Strategy registered for `kind`
    pub fn get(&self, kind: SmellKind) -> Option<&Arc<dyn Refactorer>> {
        self.refactorers.get(&kind)
    }

    /// Number of registered strategies
    pub fn len(&self) -> usize {
        self.refactorers.len()
    }

    /// True when no strategy is registered
    pub fn is_empty(&self) -> bool {
        self.refactorers.is_empty()
    }
}

impl fmt::Debug for RefactorerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.refactorers.values().map(|r| r.name()).collect();
        names.sort_unstable();
        f.debug_list().entries(names).finish()
    }
}

/// Why a strategy declined; turned into [`RefactorResult::Skipped`]
pub(crate) type Plan = std::result::Result<Vec<TextEdit>, String>;

/// Parse the smell's file, let `plan` compute byte edits against it and turn
/// them into a single-file result
pub(crate) fn rewrite_file<F>(
    smell: &Smell,
    context: &RefactorContext<'_>,
    plan: F,
) -> RefactorResult
where
    F: for<'t> FnOnce(Node<'t>, &str) -> Plan,
{
    let Some(source) = context.source(&smell.file_path) else {
        return RefactorResult::skipped(format!(
            "{} is no longer part of the project",
            smell.file_path.display()
        ));
    };
    let tree = match context.ast_service.parse_strict(source) {
        Ok(tree) => tree,
        Err(err) => return RefactorResult::skipped(format!("current source does not parse: {err}")),
    };

    let edits = match plan(tree.root_node(), source) {
        Ok(edits) if edits.is_empty() => return RefactorResult::skipped("nothing to rewrite"),
        Ok(edits) => edits,
        Err(reason) => return RefactorResult::Skipped { reason },
    };
    match apply_edits(source, &edits) {
        Ok(new_source) => RefactorResult::Applied {
            edits: vec![FileEdit {
                path: smell.file_path.clone(),
                new_source,
            }],
        },
        Err(err) => RefactorResult::failed(err.to_string()),
    }
}

/// Byte range of an occurrence in `source`, when it carries columns
pub(crate) fn occurrence_range(
    smell: &Smell,
    index: usize,
    source: &str,
) -> Option<(usize, usize)> {
    let occurrence = smell.occurrences.get(index)?;
    Some((occurrence.start_byte(source)?, occurrence.end_byte(source)?))
}

/// Re-run `analyzer` on the candidate and turn the result into `Skipped`
/// when the same logical smell is still reported
pub fn check_idempotence(
    smell: &Smell,
    result: RefactorResult,
    context: &RefactorContext<'_>,
    analyzer: &dyn Analyzer,
    symbols: &SymbolTrace,
) -> RefactorResult {
    let RefactorResult::Applied { edits } = &result else {
        return result;
    };
    let Some(edit) = edits.iter().find(|edit| edit.path == smell.file_path) else {
        return result;
    };
    // the syntactic gate rejects unparsable candidates later
    let Ok(tree) = context.ast_service.parse_strict(&edit.new_source) else {
        return result;
    };

    let mut candidate_symbols = symbols.clone();
    for other in edits {
        if let Ok(other_tree) = context.ast_service.parse(&other.new_source) {
            candidate_symbols.insert_file(&other.path, &other.new_source, &other_tree);
        }
    }
    let unit = CodeUnit::new(&edit.path, Arc::from(edit.new_source.as_str()), tree);

    let analysis = AnalysisContext::new(context.config, &candidate_symbols);
    let key = smell.logical_key();
    match analyzer.analyze(&unit, &analysis) {
        Ok(found) if found.iter().any(|again| again.logical_key() == key) => {
            debug!("{} would still be reported after the rewrite", key);
            RefactorResult::skipped("rewrite does not remove the smell")
        }
        _ => result,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::core::ast_service::AstService;
    use crate::detectors::test_support::analyze_source;
    use crate::detectors::analyzer_for;

    /// Detect `kind` in `source` and refactor the first smell found
    pub fn detect_and_refactor(
        kind: SmellKind,
        source: &str,
        config: &DetectionConfig,
    ) -> (Smell, RefactorResult) {
        let analyzer = analyzer_for(kind);
        let smells = analyze_source(analyzer.as_ref(), "target.py", source, config);
        let smell = smells.into_iter().next().expect("a smell to refactor");
        let snapshot = ProjectSnapshot::from_files([("target.py", source)]);
        let service = AstService::new();
        let context = RefactorContext::new(&snapshot, &service, config);
        let result = refactorer_for(kind).refactor(&smell, &context);
        (smell, result)
    }

    /// New text of the single edited file
    pub fn rewritten(result: &RefactorResult) -> &str {
        match result {
            RefactorResult::Applied { edits } => &edits[0].new_source,
            other => panic!("expected an applied result, got {other:?}"),
        }
    }

    /// Smells of `kind` still reported in `source`
    pub fn remaining(kind: SmellKind, source: &str, config: &DetectionConfig) -> Vec<Smell> {
        AstService::new().parse_strict(source).expect("rewrite parses");
        analyze_source(analyzer_for(kind).as_ref(), "target.py", source, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::smell::{AdditionalInfo, Occurrence, Severity};
    use crate::detectors::analyzer_for;

    #[test]
    fn test_registry_has_a_strategy_per_kind() {
        let registry = RefactorerRegistry::with_defaults();
        assert_eq!(registry.len(), SmellKind::ALL.len());
        for kind in SmellKind::ALL {
            assert_eq!(registry.get(kind).map(|r| r.kind()), Some(kind));
        }
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let snapshot = ProjectSnapshot::new();
        let service = AstService::new();
        let config = DetectionConfig::default();
        let context = RefactorContext::new(&snapshot, &service, &config);
        let smell = Smell::new(
            SmellKind::UnusedMember,
            "gone.py",
            vec![Occurrence::line(1)],
            AdditionalInfo::Empty,
            Severity::Low,
            "gone",
        );
        let result = rewrite_file(&smell, &context, |_, _| Ok(Vec::new()));
        assert!(matches!(result, RefactorResult::Skipped { .. }));
    }

    #[test]
    fn test_idempotence_check_rejects_noop_rewrite() {
        let source = "def f(obj):\n    return obj.a.b.c.d.e.f\n";
        let config = DetectionConfig::default();
        let (smell, _) =
            test_support::detect_and_refactor(SmellKind::LongAttributeChain, source, &config);

        let snapshot = ProjectSnapshot::from_files([("target.py", source)]);
        let service = AstService::new();
        let context = RefactorContext::new(&snapshot, &service, &config);
        // a candidate that only adds a comment still carries the chain
        let unchanged = RefactorResult::Applied {
            edits: vec![FileEdit {
                path: PathBuf::from("target.py"),
                new_source: format!("# touched\n{source}"),
            }],
        };
        let paths = vec![PathBuf::from("target.py")];
        let symbols = SymbolTrace::for_paths(&paths);
        let analyzer = analyzer_for(SmellKind::LongAttributeChain);
        let checked = check_idempotence(&smell, unchanged, &context, analyzer.as_ref(), &symbols);
        assert_eq!(checked, RefactorResult::skipped("rewrite does not remove the smell"));
    }

    #[test]
    fn test_touched_files() {
        let result = RefactorResult::Applied {
            edits: vec![
                FileEdit {
                    path: PathBuf::from("a.py"),
                    new_source: String::new(),
                },
                FileEdit {
                    path: PathBuf::from("b.py"),
                    new_source: String::new(),
                },
            ],
        };
        assert_eq!(result.touched_files().len(), 2);
        assert!(RefactorResult::skipped("x").touched_files().is_empty());
    }
}
