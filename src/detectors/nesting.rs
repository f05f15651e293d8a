//! Excessive loop nesting.
//!
//! Depth counts `for`/`while` statements along one path from a scope's body
//! down to the innermost loop. Nested functions, classes and lambdas are
//! separate scopes and are measured on their own.

use tree_sitter::Node;

use crate::core::ast_utils::{is_loop, is_scope_boundary, named_children, node_text, walk_all};
use crate::core::errors::Result;
use crate::core::smell::{AdditionalInfo, Occurrence, Smell, SmellKind};
use crate::detectors::{AnalysisContext, Analyzer, CodeUnit};

/// Depth above the threshold at which severity is escalated
const ESCALATION_MARGIN: usize = 3;

/// Flags functions (and module-level code) whose loop nesting exceeds
/// `loop_nesting_threshold`
#[derive(Debug, Default, Clone, Copy)]
pub struct NestingAnalyzer;

impl Analyzer for NestingAnalyzer {
    fn name(&self) -> &str {
        "excessive-nesting"
    }

    fn kind(&self) -> SmellKind {
        SmellKind::ExcessiveNesting
    }

    fn analyze(&self, unit: &CodeUnit, context: &AnalysisContext<'_>) -> Result<Vec<Smell>> {
        let threshold = context.config.loop_nesting_threshold;
        let source = unit.source();
        let mut smells = Vec::new();

        for scope in nesting_scopes(unit.root()) {
            let path = deepest_loop_path(scope.body);
            let depth = path.len();
            if depth <= threshold {
                continue;
            }
            let (Some(outermost), Some(innermost)) = (path.first(), path.last()) else {
                continue;
            };

            let mut severity = SmellKind::ExcessiveNesting.default_severity();
            if depth >= threshold + ESCALATION_MARGIN {
                severity = severity.escalate();
            }
            let function_name = scope
                .function
                .and_then(|function| function.child_by_field_name("name"))
                .map(|name| node_text(name, source).to_string());
            let location = function_name
                .as_deref()
                .map_or_else(
                    || "module-level code".to_string(),
                    |name| format!("function `{name}`"),
                );

            smells.push(Smell::new(
                SmellKind::ExcessiveNesting,
                unit.path(),
                vec![Occurrence::from_node(outermost), Occurrence::from_node(innermost)],
                AdditionalInfo::ExcessiveNesting {
                    depth,
                    function_name,
                    function_span: scope.span,
                },
                context.severity(SmellKind::ExcessiveNesting, severity),
                format!("Loop nesting depth {depth} in {location} exceeds threshold {threshold}"),
            ));
        }

        Ok(smells)
    }
}

/// A region whose loop depth is measured independently
#[derive(Debug, Clone, Copy)]
pub(crate) struct NestingScope<'t> {
    /// `None` for module-level code
    pub function: Option<Node<'t>>,
    pub body: Node<'t>,
    pub span: Occurrence,
}

/// The module plus every function definition, in document order
pub(crate) fn nesting_scopes(root: Node<'_>) -> Vec<NestingScope<'_>> {
    let statements = named_children(root);
    let module_span = match (statements.first(), statements.last()) {
        (Some(first), Some(last)) => {
            let start = first.start_position();
            let end = last.end_position();
            Occurrence::span(start.row + 1, start.column + 1, end.row + 1, end.column + 1)
        }
        _ => Occurrence::line(1),
    };

    let mut scopes = vec![NestingScope {
        function: None,
        body: root,
        span: module_span,
    }];
    walk_all(root, &mut |node| {
        if node.kind() != "function_definition" {
            return;
        }
        if let Some(body) = node.child_by_field_name("body") {
            scopes.push(NestingScope {
                function: Some(node),
                body,
                span: Occurrence::from_node(&node),
            });
        }
    });
    scopes
}

/// Loops along the first deepest path below `node`, outermost first
pub(crate) fn deepest_loop_path(node: Node<'_>) -> Vec<Node<'_>> {
    let mut best = Vec::new();
    let mut current = Vec::new();
    collect_deepest(node, &mut current, &mut best);
    best
}

fn collect_deepest<'t>(node: Node<'t>, current: &mut Vec<Node<'t>>, best: &mut Vec<Node<'t>>) {
    for child in named_children(node) {
        if is_scope_boundary(child) {
            continue;
        }
        let entered = is_loop(child);
        if entered {
            current.push(child);
            if current.len() > best.len() {
                best.clone_from(current);
            }
        }
        collect_deepest(child, current, best);
        if entered {
            current.pop();
        }
    }
}
