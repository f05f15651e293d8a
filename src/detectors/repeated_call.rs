//! Loop-invariant calls evaluated on every iteration.
//!
//! A call qualifies when it sits unconditionally in the body of a `for`
//! loop, its value is used, its callee is a plain function (or a function of
//! an imported module) that the loop does not rebind, and every argument is
//! a literal or a name the loop never assigns.

use std::collections::{HashMap, HashSet};

use tree_sitter::Node;

use crate::core::ast_utils::{
    assigned_attribute_targets, assigned_names, enclosing_loop, is_literal, named_children,
    node_text, walk_all, walk_scope, ImportBinding, CONDITIONAL_KINDS,
};
use crate::core::errors::Result;
use crate::core::smell::{AdditionalInfo, Occurrence, Smell, SmellKind};
use crate::detectors::symbol_trace::module_imports;
use crate::detectors::{loop_header, AnalysisContext, Analyzer, CodeUnit};

/// Builtins whose result depends on hidden state, has side effects, or is a
/// fresh mutable object or iterator on every call
const STATEFUL_BUILTINS: &[&str] = &[
    "print", "input", "open", "next", "iter", "exec", "eval", "compile", "setattr", "delattr",
    "vars", "locals", "globals", "super", "breakpoint", "id", "list", "dict", "set", "bytearray",
    "object", "zip", "map", "filter", "enumerate", "reversed",
];

/// Modules whose functions are not referentially transparent
const STATEFUL_MODULES: &[&str] = &[
    "random", "time", "os", "sys", "uuid", "secrets", "datetime", "logging", "subprocess",
    "socket", "shutil", "threading", "asyncio", "io", "tempfile",
];

/// Statements that leave the loop body early
const JUMP_KINDS: &[&str] = &[
    "break_statement",
    "continue_statement",
    "return_statement",
    "raise_statement",
];

/// Repetitions at which the severity is escalated
const HIGH_REPETITIONS: usize = 100;

/// Flags loop-invariant calls inside `for` loops
#[derive(Debug, Default, Clone, Copy)]
pub struct RepeatedCallAnalyzer;

impl Analyzer for RepeatedCallAnalyzer {
    fn name(&self) -> &str {
        "repeated-call-in-loop"
    }

    fn kind(&self) -> SmellKind {
        SmellKind::RepeatedCallInLoop
    }

    fn analyze(&self, unit: &CodeUnit, context: &AnalysisContext<'_>) -> Result<Vec<Smell>> {
        let threshold = context.config.repetition_threshold;
        let source = unit.source();
        let fallback_imports;
        let imports = match context.symbols.file(unit.path()) {
            Some(symbols) => &symbols.imports,
            None => {
                fallback_imports = module_imports(unit.root(), source);
                &fallback_imports
            }
        };

        let mut loops = Vec::new();
        walk_all(unit.root(), &mut |node| {
            if node.kind() == "for_statement" {
                loops.push(node);
            }
        });

        let mut smells = Vec::new();
        for loop_node in loops {
            let mut groups: Vec<(String, Vec<Node<'_>>)> = Vec::new();
            for call in hoist_candidates(loop_node, source, imports) {
                let text = node_text(call, source).to_string();
                match groups.iter_mut().find(|(existing, _)| *existing == text) {
                    Some((_, calls)) => calls.push(call),
                    None => groups.push((text, vec![call])),
                }
            }
            if groups.is_empty() {
                continue;
            }

            let trips = trip_count(loop_node, source);
            let header = loop_header(loop_node, source);
            for (call_text, calls) in groups {
                let per_iteration = calls.len();
                let repetitions = trips.map(|trips| trips.saturating_mul(per_iteration));
                if repetitions.is_some_and(|total| total < threshold) {
                    continue;
                }

                let mut severity = SmellKind::RepeatedCallInLoop.default_severity();
                if repetitions.is_some_and(|total| total >= HIGH_REPETITIONS) {
                    severity = severity.escalate();
                }
                let times = repetitions.map_or_else(
                    || "on every iteration".to_string(),
                    |total| format!("{total} times"),
                );

                smells.push(Smell::new(
                    SmellKind::RepeatedCallInLoop,
                    unit.path(),
                    calls.iter().map(Occurrence::from_node).collect(),
                    AdditionalInfo::RepeatedCallInLoop {
                        call_text: call_text.clone(),
                        repetitions,
                        occurrences_per_iteration: per_iteration,
                        loop_line: loop_node.start_position().row + 1,
                        loop_header: header.clone(),
                    },
                    context.severity(SmellKind::RepeatedCallInLoop, severity),
                    format!(
                        "`{call_text}` has loop-invariant arguments but is evaluated {times} in `{header}`"
                    ),
                ));
            }
        }

        Ok(smells)
    }
}

/// Names and attribute targets written anywhere in a loop (targets included)
#[derive(Debug, Clone)]
pub(crate) struct LoopWrites {
    names: HashSet<String>,
    attributes: HashSet<String>,
}

impl LoopWrites {
    pub fn of(loop_node: Node<'_>, source: &str) -> Self {
        Self {
            names: assigned_names(loop_node, source),
            attributes: assigned_attribute_targets(loop_node, source),
        }
    }
}

/// Calls in the body of `loop_node` that can be evaluated once before it,
/// in document order
pub(crate) fn hoist_candidates<'t>(
    loop_node: Node<'t>,
    source: &str,
    imports: &HashMap<String, ImportBinding>,
) -> Vec<Node<'t>> {
    let Some(body) = loop_node.child_by_field_name("body") else {
        return Vec::new();
    };
    let writes = LoopWrites::of(loop_node, source);
    let mut calls = Vec::new();
    walk_scope(body, &mut |node| {
        if node.kind() == "call" && is_hoistable(node, loop_node, &writes, source, imports) {
            calls.push(node);
        }
    });
    calls
}

/// True when `call` is evaluated unconditionally, with the same value, on
/// every iteration of `loop_node`
pub(crate) fn is_hoistable(
    call: Node<'_>,
    loop_node: Node<'_>,
    writes: &LoopWrites,
    source: &str,
    imports: &HashMap<String, ImportBinding>,
) -> bool {
    if loop_node.kind() != "for_statement"
        || enclosing_loop(call).map(|node| node.id()) != Some(loop_node.id())
    {
        return false;
    }
    let Some(body) = loop_node.child_by_field_name("body") else {
        return false;
    };
    if call.start_byte() < body.start_byte() || call.end_byte() > body.end_byte() {
        return false;
    }

    // value must be used, and not awaited
    match call.parent() {
        Some(parent) if matches!(parent.kind(), "expression_statement" | "await") => return false,
        None => return false,
        _ => {}
    }

    // no conditional evaluation between the call and the loop body
    let mut statement = call;
    loop {
        let Some(parent) = statement.parent() else {
            return false;
        };
        if parent.id() == body.id() {
            break;
        }
        if CONDITIONAL_KINDS.contains(&parent.kind()) {
            return false;
        }
        statement = parent;
    }

    // no early exit before the statement holding the call
    for earlier in named_children(body) {
        if earlier.id() == statement.id() {
            break;
        }
        let mut jumps = false;
        walk_scope(earlier, &mut |node| jumps |= JUMP_KINDS.contains(&node.kind()));
        if jumps {
            return false;
        }
    }

    callee_is_invariant(call, writes, source, imports)
        && arguments_are_invariant(call, writes, source)
}

fn callee_is_invariant(
    call: Node<'_>,
    writes: &LoopWrites,
    source: &str,
    imports: &HashMap<String, ImportBinding>,
) -> bool {
    let Some(function) = call.child_by_field_name("function") else {
        return false;
    };
    match function.kind() {
        "identifier" => {
            let name = node_text(function, source);
            !STATEFUL_BUILTINS.contains(&name)
                && !name.starts_with(|c: char| c.is_uppercase())
                && !writes.names.contains(name)
        }
        "attribute" => {
            let Some(object) = function.child_by_field_name("object") else {
                return false;
            };
            if object.kind() != "identifier" {
                return false;
            }
            let module_name = node_text(object, source);
            let Some(binding) = imports.get(module_name) else {
                return false;
            };
            let root_module = binding.module.split('.').next().unwrap_or_default();
            !STATEFUL_MODULES.contains(&root_module)
                && !binding
                    .member
                    .as_deref()
                    .is_some_and(|member| STATEFUL_MODULES.contains(&member))
                && !writes.names.contains(module_name)
        }
        _ => false,
    }
}

fn arguments_are_invariant(call: Node<'_>, writes: &LoopWrites, source: &str) -> bool {
    let Some(arguments) = call.child_by_field_name("arguments") else {
        return false;
    };
    if arguments.kind() != "argument_list" {
        return false;
    }
    named_children(arguments).into_iter().all(|argument| match argument.kind() {
        "comment" => true,
        "keyword_argument" => argument
            .child_by_field_name("value")
            .is_some_and(|value| is_invariant_value(value, writes, source)),
        _ => is_invariant_value(argument, writes, source),
    })
}

fn is_invariant_value(node: Node<'_>, writes: &LoopWrites, source: &str) -> bool {
    if is_literal(node) {
        return true;
    }
    match node.kind() {
        "identifier" => !writes.names.contains(node_text(node, source)),
        "attribute" => {
            !writes.attributes.contains(node_text(node, source))
                && node
                    .child_by_field_name("object")
                    .is_some_and(|object| {
                        matches!(object.kind(), "identifier" | "attribute")
                            && is_invariant_value(object, writes, source)
                    })
        }
        _ => false,
    }
}

/// Statically known iteration count of a `for` loop: `range` with literal
/// bounds or a literal list/tuple
pub(crate) fn trip_count(loop_node: Node<'_>, source: &str) -> Option<usize> {
    let iterable = loop_node.child_by_field_name("right")?;
    match iterable.kind() {
        "call" => {
            let function = iterable.child_by_field_name("function")?;
            if function.kind() != "identifier" || node_text(function, source) != "range" {
                return None;
            }
            let arguments = iterable.child_by_field_name("arguments")?;
            let values = named_children(arguments)
                .into_iter()
                .map(|arg| integer_literal(arg, source))
                .collect::<Option<Vec<i64>>>()?;
            let (start, stop, step) = match values.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return None,
            };
            range_len(start, stop, step)
        }
        "list" | "tuple" => {
            let elements = named_children(iterable);
            if elements
                .iter()
                .any(|element| matches!(element.kind(), "list_splat" | "parenthesized_list_splat"))
            {
                return None;
            }
            Some(elements.iter().filter(|element| element.kind() != "comment").count())
        }
        _ => None,
    }
}

fn integer_literal(node: Node<'_>, source: &str) -> Option<i64> {
    match node.kind() {
        "integer" => node_text(node, source).replace('_', "").parse().ok(),
        "unary_operator" => {
            let operand = integer_literal(node.child_by_field_name("argument")?, source)?;
            let operator = node.child_by_field_name("operator")?;
            match node_text(operator, source) {
                "-" => operand.checked_neg(),
                "+" => Some(operand),
                _ => None,
            }
        }
        _ => None,
    }
}

fn range_len(start: i64, stop: i64, step: i64) -> Option<usize> {
    if step == 0 {
        return None;
    }
    let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
    let span = if step > 0 { stop - start } else { start - stop };
    if span <= 0 {
        return Some(0);
    }
    let step = step.abs();
    usize::try_from((span - 1) / step + 1).ok()
}
