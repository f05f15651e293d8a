//! Smell analyzers and the detector engine that runs them.
//!
//! Every smell kind has exactly one [`Analyzer`]. Analyzers are pure: they
//! read a parsed [`CodeUnit`] plus the run-wide [`SymbolTrace`] and return
//! smells, never touching the file system.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tree_sitter::{Node, Tree};

use crate::core::config::DetectionConfig;
use crate::core::errors::Result;
use crate::core::smell::{Severity, Smell, SmellKind};

pub mod attribute_chain;
pub mod engine;
pub mod nesting;
pub mod repeated_call;
pub mod string_concat;
pub mod symbol_trace;
pub mod unused_member;

pub use engine::{ConflictRecord, DetectorEngine, ScanOutcome, ScanWarning};
pub use symbol_trace::SymbolTrace;

/// One parsed file handed to the analyzers
#[derive(Debug, Clone)]
pub struct CodeUnit {
    /// Project-relative path
    pub file_path: PathBuf,
    /// File contents the tree was parsed from
    pub source: Arc<str>,
    /// Syntax tree of `source`
    pub tree: Tree,
}

impl CodeUnit {
    /// Bundle a parsed file
    pub fn new(file_path: impl Into<PathBuf>, source: Arc<str>, tree: Tree) -> Self {
        Self {
            file_path: file_path.into(),
            source,
            tree,
        }
    }

    /// Root node of the tree
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// Source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Project-relative path
    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

/// Read-only state shared by all analyzers during one run
#[derive(Debug, Clone, Copy)]
pub struct AnalysisContext<'a> {
    /// Thresholds and enabled kinds
    pub config: &'a DetectionConfig,
    /// Cross-file symbol table for this run
    pub symbols: &'a SymbolTrace,
}

impl<'a> AnalysisContext<'a> {
    /// Context for one scan
    pub fn new(config: &'a DetectionConfig, symbols: &'a SymbolTrace) -> Self {
        Self { config, symbols }
    }

    /// Final severity after configured overrides
    pub fn severity(&self, kind: SmellKind, computed: Severity) -> Severity {
        self.config.severity_for(kind, computed)
    }
}

/// Detection strategy for one smell kind
pub trait Analyzer: Send + Sync {
    /// Analyzer name, used in logs and warnings
    fn name(&self) -> &str;

    /// Smell kind this analyzer emits
    fn kind(&self) -> SmellKind;

    /// Detect smells in one unit. Must be deterministic for a fixed unit,
    /// configuration and symbol trace.
    fn analyze(&self, unit: &CodeUnit, context: &AnalysisContext<'_>) -> Result<Vec<Smell>>;
}

/// Default analyzer for a smell kind
pub fn analyzer_for(kind: SmellKind) -> Arc<dyn Analyzer> {
    match kind {
        SmellKind::ExcessiveNesting => Arc::new(nesting::NestingAnalyzer),
        SmellKind::LongAttributeChain => Arc::new(attribute_chain::AttributeChainAnalyzer),
        SmellKind::RepeatedCallInLoop => Arc::new(repeated_call::RepeatedCallAnalyzer),
        SmellKind::StringConcatInLoop => Arc::new(string_concat::StringConcatAnalyzer),
        SmellKind::UnusedMember => Arc::new(unused_member::UnusedMemberAnalyzer),
    }
}

/// Ordered analyzer table, built once per run and read-only afterwards.
/// Registration order decides which analyzer wins a dedupe conflict.
#[derive(Clone, Default)]
pub struct AnalyzerRegistry {
    analyzers: Vec<Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// One analyzer for every kind in the taxonomy
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in SmellKind::ALL {
            registry.register(analyzer_for(kind));
        }
        registry
    }

    /// Analyzers for the kinds enabled in `config`
    pub fn for_config(config: &DetectionConfig) -> Self {
        let mut registry = Self::new();
        for kind in SmellKind::ALL {
            if config.is_enabled(kind) {
                registry.register(analyzer_for(kind));
            }
        }
        registry
    }

    /// Append an analyzer
    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) {
        self.analyzers.push(analyzer);
    }

    /// First registered analyzer for `kind`
    pub fn get(&self, kind: SmellKind) -> Option<&Arc<dyn Analyzer>> {
        self.analyzers.iter().find(|analyzer| analyzer.kind() == kind)
    }

    /// Analyzers in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Analyzer>> {
        self.analyzers.iter()
    }

    /// Number of registered analyzers
    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    /// True when no analyzer is registered
    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }
}

impl std::fmt::Debug for AnalyzerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.analyzers.iter().map(|analyzer| analyzer.name()))
            .finish()
    }
}

/// Text of a loop header (`for x in xs:`), used as a stable loop identity
pub(crate) fn loop_header(loop_node: Node<'_>, source: &str) -> String {
    let end = loop_node
        .child_by_field_name("body")
        .map_or(loop_node.end_byte(), |body| body.start_byte());
    let header = source.get(loop_node.start_byte()..end).unwrap_or_default();
    header
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ast_service::AstService;

    #[test]
    fn test_registry_covers_taxonomy_in_order() {
        let registry = AnalyzerRegistry::with_defaults();
        let kinds: Vec<SmellKind> = registry.iter().map(|a| a.kind()).collect();
        assert_eq!(kinds, SmellKind::ALL.to_vec());
        assert!(registry.get(SmellKind::UnusedMember).is_some());
    }

    #[test]
    fn test_registry_respects_enabled_kinds() {
        let mut config = DetectionConfig::default();
        config.enabled_smell_kinds = [SmellKind::ExcessiveNesting].into_iter().collect();
        let registry = AnalyzerRegistry::for_config(&config);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(SmellKind::LongAttributeChain).is_none());
    }

    #[test]
    fn test_loop_header_normalizes_whitespace() {
        let source = "for  i in   range(3):\n    pass\n";
        let tree = AstService::new().parse(source).unwrap();
        let loop_node = tree.root_node().named_child(0).unwrap();
        assert_eq!(loop_header(loop_node, source), "for i in range(3):");
    }
}
