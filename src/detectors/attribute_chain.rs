//! Long attribute/subscript access chains.

use std::collections::HashMap;

use tree_sitter::Node;

use crate::core::ast_utils::{enclosing_function, enclosing_loop, node_text, walk_all};
use crate::core::errors::Result;
use crate::core::smell::{AdditionalInfo, ChainOrigin, Confidence, Occurrence, Smell, SmellKind};
use crate::detectors::symbol_trace::LocalScope;
use crate::detectors::{AnalysisContext, Analyzer, CodeUnit};

/// Flags access chains longer than `chain_length_threshold`. The chain's root
/// is traced through the symbol table; roots imported from another project
/// file or not resolvable at all are reported with low confidence.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttributeChainAnalyzer;

impl Analyzer for AttributeChainAnalyzer {
    fn name(&self) -> &str {
        "long-attribute-chain"
    }

    fn kind(&self) -> SmellKind {
        SmellKind::LongAttributeChain
    }

    fn analyze(&self, unit: &CodeUnit, context: &AnalysisContext<'_>) -> Result<Vec<Smell>> {
        let threshold = context.config.chain_length_threshold;
        let source = unit.source();
        let mut scopes: HashMap<usize, LocalScope> = HashMap::new();
        let mut smells = Vec::new();

        let mut tops = Vec::new();
        walk_all(unit.root(), &mut |node| {
            if is_chain_top(node) {
                tops.push(node);
            }
        });

        for top in tops {
            let chain = AccessChain::of(top);
            let length = chain.len();
            if length <= threshold {
                continue;
            }

            let root_name = (chain.root.kind() == "identifier")
                .then(|| node_text(chain.root, source).to_string());
            let origin = match &root_name {
                Some(name) => {
                    let scope = match enclosing_function(top) {
                        Some(function) => Some(
                            &*scopes
                                .entry(function.id())
                                .or_insert_with(|| LocalScope::of_function(function, source)),
                        ),
                        None => None,
                    };
                    context.symbols.resolve_name(unit.path(), name, scope)
                }
                // calls, literals and other expressions are evaluated in place
                None => ChainOrigin::Local,
            };
            let confidence = match origin {
                ChainOrigin::Local => Confidence::High,
                ChainOrigin::CrossFile { .. } | ChainOrigin::Unresolved => Confidence::Low,
            };

            let mut severity = SmellKind::LongAttributeChain.default_severity();
            if length >= threshold * 2 {
                severity = severity.escalate();
            }
            let chain_text = node_text(top, source).to_string();
            let mut message = format!(
                "Access chain of length {length} exceeds threshold {threshold}: {}",
                chain_text.split_whitespace().collect::<Vec<_>>().join(" ")
            );
            if confidence == Confidence::Low {
                message.push_str(match origin {
                    ChainOrigin::CrossFile { .. } => " (root imported from another module)",
                    _ => " (root could not be resolved)",
                });
            }

            smells.push(Smell::new(
                SmellKind::LongAttributeChain,
                unit.path(),
                vec![Occurrence::from_node(&top)],
                AdditionalInfo::LongAttributeChain {
                    chain_length: length,
                    chain_text,
                    root_name,
                    enclosing_loop_line: enclosing_loop(top)
                        .map(|loop_node| loop_node.start_position().row + 1),
                    origin,
                    confidence,
                },
                context.severity(SmellKind::LongAttributeChain, severity),
                message,
            ));
        }

        Ok(smells)
    }
}

/// An access chain decomposed from its outermost node
#[derive(Debug, Clone)]
pub(crate) struct AccessChain<'t> {
    /// Expression the chain starts from
    pub root: Node<'t>,
    /// Access nodes from the innermost (`root.a`) to the outermost
    pub steps: Vec<Node<'t>>,
}

impl<'t> AccessChain<'t> {
    pub fn of(top: Node<'t>) -> Self {
        let mut steps = Vec::new();
        let mut current = top;
        loop {
            let next = match current.kind() {
                "attribute" => current.child_by_field_name("object"),
                "subscript" => current.child_by_field_name("value"),
                _ => None,
            };
            match next {
                Some(inner) => {
                    steps.push(current);
                    current = inner;
                }
                None => break,
            }
        }
        steps.reverse();
        Self {
            root: current,
            steps,
        }
    }

    /// Number of access steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

/// True for an attribute/subscript node that is not itself continued by an
/// enclosing access. A call ends a chain.
pub(crate) fn is_chain_top(node: Node<'_>) -> bool {
    if !matches!(node.kind(), "attribute" | "subscript") {
        return false;
    }
    let Some(parent) = node.parent() else {
        return true;
    };
    let continued_by = match parent.kind() {
        "attribute" => parent.child_by_field_name("object"),
        "subscript" => parent.child_by_field_name("value"),
        _ => None,
    };
    continued_by.map_or(true, |inner| inner.id() != node.id())
}
