//! Central parsing service shared by analyzers and the verification oracle.
//!
//! Parsed trees are cached by content hash, so re-parsing an unchanged file
//! (for example when the orchestrator refreshes a stale smell) is free.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;
use tree_sitter::{Language, Node, Parser, Tree};

use crate::core::errors::{Result, SmellwrightError};

const LANGUAGE_NAME: &str = "python";

/// Location of the first syntax error found in a tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxErrorLocation {
    /// 1-based line
    pub line: usize,
    /// 1-based byte column
    pub column: usize,
    /// `unexpected input` or `missing <node kind>`
    pub kind: String,
}

/// Central parsing service with a content-addressed tree cache
#[derive(Debug, Default)]
pub struct AstService {
    tree_cache: DashMap<[u8; 32], Tree>,
}

impl AstService {
    /// Create a new AST service
    pub fn new() -> Self {
        Self {
            tree_cache: DashMap::new(),
        }
    }

    /// Shared handle, convenient for wiring into analyzers and the oracle
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn language() -> Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn create_parser() -> Result<Parser> {
        let mut parser = Parser::new();
        parser.set_language(&Self::language()).map_err(|e| {
            SmellwrightError::parse(
                LANGUAGE_NAME,
                format!("Failed to set parser language: {e}"),
            )
        })?;
        Ok(parser)
    }

    /// Parse `source` into a concrete syntax tree.
    ///
    /// Trees may contain `ERROR`/`MISSING` nodes; use [`AstService::check_syntax`]
    /// to reject them.
    pub fn parse(&self, source: &str) -> Result<Tree> {
        let key = *blake3::hash(source.as_bytes()).as_bytes();
        if let Some(tree) = self.tree_cache.get(&key) {
            return Ok(tree.clone());
        }

        let mut parser = Self::create_parser()?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| SmellwrightError::parse(LANGUAGE_NAME, "Parser returned no tree"))?;

        self.tree_cache.insert(key, tree.clone());
        Ok(tree)
    }

    /// Parse and require a tree free of syntax errors
    pub fn parse_strict(&self, source: &str) -> Result<Tree> {
        let tree = self.parse(source)?;
        if let Some(location) = first_syntax_error(tree.root_node()) {
            return Err(SmellwrightError::Parse {
                language: LANGUAGE_NAME.to_string(),
                message: format!("syntax error ({})", location.kind),
                file_path: None,
                line: Some(location.line),
                column: Some(location.column),
            });
        }
        Ok(tree)
    }

    /// Parse on the blocking pool, giving up after `timeout`
    pub async fn parse_with_timeout(
        self: &Arc<Self>,
        source: Arc<str>,
        timeout: Duration,
        strict: bool,
    ) -> Result<Tree> {
        let service = Arc::clone(self);
        let task = tokio::task::spawn_blocking(move || {
            if strict {
                service.parse_strict(&source)
            } else {
                service.parse(&source)
            }
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(SmellwrightError::internal(format!(
                "Parse task failed: {join_err}"
            ))),
            Err(_) => Err(SmellwrightError::timeout("parse", timeout)),
        }
    }

    /// First syntax error in `source`, if any
    pub fn check_syntax(&self, source: &str) -> Result<Option<SyntaxErrorLocation>> {
        let tree = self.parse(source)?;
        Ok(first_syntax_error(tree.root_node()))
    }

    /// Drop every cached tree
    pub fn clear_cache(&self) {
        debug!("Clearing {} cached trees", self.tree_cache.len());
        self.tree_cache.clear();
    }

    /// Number of cached trees
    pub fn cached_trees(&self) -> usize {
        self.tree_cache.len()
    }
}

/// Depth-first search for the first `ERROR` or `MISSING` node
pub fn first_syntax_error(root: Node<'_>) -> Option<SyntaxErrorLocation> {
    if !root.has_error() {
        return None;
    }

    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let position = node.start_position();
            return Some(SyntaxErrorLocation {
                line: position.row + 1,
                column: position.column + 1,
                kind: if node.is_missing() {
                    format!("missing {}", node.kind())
                } else {
                    "unexpected input".to_string()
                },
            });
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }

    // has_error without a located node; report the root
    Some(SyntaxErrorLocation {
        line: 1,
        column: 1,
        kind: "unexpected input".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_python() {
        let service = AstService::new();
        let tree = service.parse("def f(x):\n    return x\n").unwrap();
        assert_eq!(tree.root_node().kind(), "module");
        assert!(!tree.root_node().has_error());
    }

    #[test]
    fn test_parse_is_cached_by_content() {
        let service = AstService::new();
        service.parse("x = 1\n").unwrap();
        service.parse("x = 1\n").unwrap();
        assert_eq!(service.cached_trees(), 1);
        service.parse("x = 2\n").unwrap();
        assert_eq!(service.cached_trees(), 2);
    }

    #[test]
    fn test_check_syntax_reports_location() {
        let service = AstService::new();
        assert!(service.check_syntax("x = (1,\n").unwrap().is_some());
        let location = service
            .check_syntax("def ok():\n    pass\ndef broken(:\n    pass\n")
            .unwrap()
            .expect("syntax error");
        assert_eq!(location.line, 3);
        assert!(service.check_syntax("x = 1\n").unwrap().is_none());
    }

    #[test]
    fn test_parse_strict_rejects_errors() {
        let service = AstService::new();
        let err = service.parse_strict("for x in :\n    pass\n").unwrap_err();
        assert!(matches!(err, SmellwrightError::Parse { line: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_parse_with_timeout() {
        let service = AstService::shared();
        let tree = service
            .parse_with_timeout(Arc::from("y = [1, 2]\n"), Duration::from_secs(5), true)
            .await
            .unwrap();
        assert!(!tree.root_node().has_error());
    }
}
