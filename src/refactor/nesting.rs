//! Flatten perfectly nested `for` loops into one `itertools.product` loop.

use std::collections::HashSet;

use tree_sitter::Node;

use crate::core::ast_utils::{
    ancestor_of_kind, assigned_names, collect_target_names, enclosing_loop, identifier_texts,
    import_bindings, is_literal, line_start, named_children, node_spanning, node_text,
    references_name, starts_line, walk_all, walk_scope,
};
use crate::core::smell::{AdditionalInfo, Occurrence, Smell, SmellKind};
use crate::detectors::nesting::deepest_loop_path;
use crate::refactor::edit::{dedent, ensure_module_import, shadows_module, TextEdit};
use crate::refactor::{rewrite_file, Plan, RefactorContext, RefactorResult, Refactorer};

/// Merges a chain of `for` loops where each body is exactly the next loop.
///
/// Inner iterables must be `range(...)` over literals/unchanged names or
/// literal sequences, so evaluating them once up front is indistinguishable
/// from re-evaluating them per outer iteration.
#[derive(Debug, Default, Clone, Copy)]
pub struct NestingRefactorer;

impl Refactorer for NestingRefactorer {
    fn name(&self) -> &str {
        "flatten-nested-loops"
    }

    fn kind(&self) -> SmellKind {
        SmellKind::ExcessiveNesting
    }

    fn refactor(&self, smell: &Smell, context: &RefactorContext<'_>) -> RefactorResult {
        let AdditionalInfo::ExcessiveNesting {
            function_name,
            function_span,
            ..
        } = &smell.additional_info
        else {
            return RefactorResult::skipped("smell carries no nesting details");
        };
        let threshold = context.config.loop_nesting_threshold;

        rewrite_file(smell, context, |root, source| {
            let body = scope_body(root, source, function_name.as_deref(), function_span)?;
            let path = deepest_loop_path(body);
            plan_flatten(root, source, &path, threshold)
        })
    }
}

fn scope_body<'t>(
    root: Node<'t>,
    source: &str,
    function_name: Option<&str>,
    span: &Occurrence,
) -> std::result::Result<Node<'t>, String> {
    let Some(name) = function_name else {
        return Ok(root);
    };
    let stale = || format!("function `{name}` no longer matches its recorded span");
    let (Some(start), Some(end)) = (span.start_byte(source), span.end_byte(source)) else {
        return Err(stale());
    };
    let function = node_spanning(root, start, end, &["function_definition"]).ok_or_else(stale)?;
    let matches_name = function
        .child_by_field_name("name")
        .is_some_and(|n| node_text(n, source) == name);
    if !matches_name {
        return Err(stale());
    }
    function.child_by_field_name("body").ok_or_else(stale)
}

fn plan_flatten(root: Node<'_>, source: &str, path: &[Node<'_>], threshold: usize) -> Plan {
    let depth = path.len();
    if depth <= threshold {
        return Err(format!("nesting depth {depth} is already within threshold {threshold}"));
    }
    let needed = depth - threshold + 1;
    let run = longest_flattenable_run(path, source)
        .ok_or_else(|| "no perfectly nested for-loop chain to flatten".to_string())?;
    if run.len() < needed {
        return Err(format!(
            "flattening {} loops cannot bring depth {depth} down to {threshold}",
            run.len()
        ));
    }

    let (Some(&outermost), Some(&innermost)) = (run.first(), run.last()) else {
        return Err("no perfectly nested for-loop chain to flatten".to_string());
    };
    let body = innermost
        .child_by_field_name("body")
        .ok_or_else(|| "innermost loop has no body".to_string())?;

    if breaks_out_of(innermost, body) {
        return Err("innermost loop uses `break`".to_string());
    }
    if source
        .get(outermost.start_byte()..body.start_byte())
        .is_some_and(|headers| headers.contains('#'))
    {
        return Err("loop headers carry comments".to_string());
    }
    if !starts_line(source, body.start_byte()) {
        return Err("loop body shares a line with its header".to_string());
    }
    if has_multiline_string(body) {
        return Err("loop body contains a multi-line string".to_string());
    }
    if shadows_module(root, source, "itertools") {
        return Err("`itertools` is rebound in this module".to_string());
    }
    let uses_range = run.iter().any(|loop_node| {
        loop_node
            .child_by_field_name("right")
            .is_some_and(|iterable| iterable.kind() == "call")
    });
    if uses_range && shadows_module(root, source, "range") {
        return Err("`range` is rebound in this module".to_string());
    }

    let mut targets = Vec::new();
    let mut iterables = Vec::new();
    for loop_node in &run {
        let (Some(left), Some(right)) = (
            loop_node.child_by_field_name("left"),
            loop_node.child_by_field_name("right"),
        ) else {
            return Err("loop without target or iterable".to_string());
        };
        targets.push(parenthesize_if(left, source, "pattern_list"));
        iterables.push(parenthesize_if(right, source, "expression_list"));
    }
    let header = format!(
        "for {} in itertools.product({}):",
        targets.join(", "),
        iterables.join(", ")
    );

    let second = run[1];
    let amount = body
        .start_position()
        .column
        .checked_sub(second.start_position().column)
        .ok_or_else(|| "unexpected body indentation".to_string())?;
    let body_text = source
        .get(line_start(source, body.start_byte())..innermost.end_byte())
        .unwrap_or_default();
    let dedented =
        dedent(body_text, amount).ok_or_else(|| "loop body cannot be re-indented".to_string())?;

    let mut edits = vec![TextEdit::replace(
        outermost.start_byte(),
        innermost.end_byte(),
        format!("{header}\n{dedented}"),
    )];
    edits.extend(ensure_module_import(root, source, "itertools"));
    Ok(edits)
}

/// Longest contiguous run (at least two loops) of `path` that can be merged
fn longest_flattenable_run<'t>(path: &[Node<'t>], source: &str) -> Option<Vec<Node<'t>>> {
    let mut best: Option<Vec<Node<'t>>> = None;
    for start in 0..path.len() {
        let first = path[start];
        let outer_ok = first
            .child_by_field_name("right")
            .is_some_and(|it| outer_iterable_ok(first, it, source));
        if !is_plain_for(first) || !outer_ok {
            continue;
        }
        let bound = assigned_names(first, source);
        let mut run = vec![first];
        for pair in path[start..].windows(2) {
            let (outer, inner) = (pair[0], pair[1]);
            let iterable_ok = inner
                .child_by_field_name("right")
                .is_some_and(|it| inner_iterable_ok(it, &bound, source));
            if !is_plain_for(inner) || !directly_nests(outer, inner) || !iterable_ok {
                break;
            }
            run.push(inner);
        }
        if run.len() >= 2 && best.as_ref().map_or(true, |b| run.len() > b.len()) {
            best = Some(run);
        }
    }
    best
}

/// Synchronous `for` without an `else` clause
fn is_plain_for(node: Node<'_>) -> bool {
    node.kind() == "for_statement"
        && node.child_by_field_name("alternative").is_none()
        && node.child(0).is_some_and(|first| first.kind() != "async")
}

/// True when the body of `outer` consists of `inner` alone
fn directly_nests(outer: Node<'_>, inner: Node<'_>) -> bool {
    let Some(body) = outer.child_by_field_name("body") else {
        return false;
    };
    let children = named_children(body);
    children.len() == 1 && children[0].id() == inner.id()
}

/// `itertools.product` drains every input before its first yield, so the
/// outer iterable must be a static one or a name bound only by a literal
/// sequence assigned earlier in the same block and left untouched by the loop.
fn outer_iterable_ok(loop_node: Node<'_>, iterable: Node<'_>, source: &str) -> bool {
    if is_static_iterable(iterable, source) {
        return true;
    }
    if iterable.kind() != "identifier" {
        return false;
    }
    let name = node_text(iterable, source);
    if loop_node
        .child_by_field_name("body")
        .map_or(true, |body| references_name(body, source, name))
    {
        return false;
    }
    let scopes = ["function_definition", "class_definition", "module"];
    let Some(scope) = ancestor_of_kind(loop_node, &scopes) else {
        return false;
    };
    let is_parameter = scope
        .child_by_field_name("parameters")
        .is_some_and(|params| identifier_texts(params, source).contains(name));
    if is_parameter || defines_name(scope, source, name) {
        return false;
    }

    let mut bindings = Vec::new();
    walk_scope(scope, &mut |node| {
        if binds_name(node, source, name) {
            bindings.push(node);
        }
    });
    let [binding] = bindings.as_slice() else {
        return false;
    };
    let literal_value = binding.kind() == "assignment"
        && binding
            .child_by_field_name("left")
            .is_some_and(|left| left.kind() == "identifier")
        && binding.child_by_field_name("right").is_some_and(|right| {
            matches!(right.kind(), "list" | "tuple") || is_static_iterable(right, source)
        });
    let same_block_before = binding
        .parent()
        .filter(|statement| statement.kind() == "expression_statement")
        .and_then(|statement| statement.parent())
        .zip(loop_node.parent())
        .is_some_and(|(block, loop_block)| block.id() == loop_block.id())
        && binding.end_byte() <= loop_node.start_byte();
    literal_value && same_block_before
}

/// True when `node` itself binds `name` in its scope
fn binds_name(node: Node<'_>, source: &str, name: &str) -> bool {
    let mut names = HashSet::new();
    match node.kind() {
        "assignment" | "augmented_assignment" | "for_statement" | "for_in_clause" => {
            if let Some(left) = node.child_by_field_name("left") {
                collect_target_names(left, source, &mut names);
            }
        }
        "named_expression" => {
            if let Some(target) = node.child_by_field_name("name") {
                names.insert(node_text(target, source).to_string());
            }
        }
        "as_pattern" => {
            if let Some(alias) = node.child_by_field_name("alias") {
                collect_target_names(alias, source, &mut names);
            }
        }
        "delete_statement" | "global_statement" | "nonlocal_statement" => {
            for child in named_children(node) {
                collect_target_names(child, source, &mut names);
            }
        }
        "import_statement" | "import_from_statement" => {
            names.extend(import_bindings(node, source).into_iter().map(|b| b.local_name));
        }
        _ => {}
    }
    names.contains(name)
}

/// Any nested function or class named `name` below `scope`
fn defines_name(scope: Node<'_>, source: &str, name: &str) -> bool {
    let mut found = false;
    walk_all(scope, &mut |node| {
        if node.id() != scope.id()
            && matches!(node.kind(), "function_definition" | "class_definition")
            && node
                .child_by_field_name("name")
                .is_some_and(|n| node_text(n, source) == name)
        {
            found = true;
        }
    });
    found
}

fn inner_iterable_ok(iterable: Node<'_>, bound: &HashSet<String>, source: &str) -> bool {
    is_static_iterable(iterable, source)
        && identifier_texts(iterable, source)
            .iter()
            .all(|name| !bound.contains(name))
}

/// `range(...)` over literals and names, or a literal sequence
fn is_static_iterable(node: Node<'_>, source: &str) -> bool {
    match node.kind() {
        "call" => {
            let is_range = node
                .child_by_field_name("function")
                .is_some_and(|f| f.kind() == "identifier" && node_text(f, source) == "range");
            let Some(arguments) = node.child_by_field_name("arguments") else {
                return false;
            };
            let arguments = named_children(arguments);
            is_range
                && (1..=3).contains(&arguments.len())
                && arguments
                    .iter()
                    .all(|arg| arg.kind() == "identifier" || is_literal(*arg))
        }
        "list" | "tuple" | "expression_list" => named_children(node).into_iter().all(is_literal),
        "string" => is_literal(node),
        "parenthesized_expression" => node
            .named_child(0)
            .is_some_and(|inner| is_static_iterable(inner, source)),
        _ => false,
    }
}

fn breaks_out_of(loop_node: Node<'_>, body: Node<'_>) -> bool {
    let mut found = false;
    walk_scope(body, &mut |node| {
        if node.kind() == "break_statement"
            && enclosing_loop(node).is_some_and(|owner| owner.id() == loop_node.id())
        {
            found = true;
        }
    });
    found
}

fn has_multiline_string(body: Node<'_>) -> bool {
    let mut found = false;
    walk_all(body, &mut |node| {
        if node.kind() == "string" && node.start_position().row != node.end_position().row {
            found = true;
        }
    });
    found
}

fn parenthesize_if(node: Node<'_>, source: &str, kind: &str) -> String {
    let text = node_text(node, source);
    if node.kind() == kind {
        format!("({text})")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DetectionConfig;
    use crate::refactor::test_support::{detect_and_refactor, remaining, rewritten};

    fn config(threshold: usize) -> DetectionConfig {
        let mut config = DetectionConfig::default();
        config.loop_nesting_threshold = threshold;
        config
    }

    #[test]
    fn test_flattens_two_range_loops() {
        let source = "\
def grid(rows, cols):
    for r in range(rows):
        for c in range(cols):
            cell(r, c)
            total = r + c
";
        let (_, result) = detect_and_refactor(SmellKind::ExcessiveNesting, source, &config(1));
        assert_eq!(
            rewritten(&result),
            "\
import itertools
def grid(rows, cols):
    for r, c in itertools.product(range(rows), range(cols)):
        cell(r, c)
        total = r + c
"
        );
        assert!(remaining(SmellKind::ExcessiveNesting, rewritten(&result), &config(1)).is_empty());
    }

    #[test]
    fn test_six_levels_reach_threshold() {
        let mut source = String::from("import itertools\n\ndef deep(n):\n");
        for level in 0..6 {
            source.push_str(&"    ".repeat(level + 1));
            source.push_str(&format!("for i{level} in range(n):\n"));
        }
        source.push_str(&"    ".repeat(7));
        source.push_str("emit(i0, i5)\n");

        let (_, result) = detect_and_refactor(SmellKind::ExcessiveNesting, &source, &config(5));
        let output = rewritten(&result);
        assert!(output.starts_with("import itertools\n\ndef deep(n):\n"));
        assert_eq!(output.matches("import itertools").count(), 1);
        assert!(output.contains("    for i0, i1, i2, i3, i4, i5 in itertools.product("));
        assert!(output.contains("\n        emit(i0, i5)\n"));
        assert!(remaining(SmellKind::ExcessiveNesting, output, &config(5)).is_empty());
    }

    #[test]
    fn test_tuple_targets_are_parenthesized() {
        let source = "\
pairs = [(1, 2), (3, 4)]
for a, b in pairs:
    for k in (1, 2, 3):
        use(a, b, k)
";
        let (_, result) = detect_and_refactor(SmellKind::ExcessiveNesting, source, &config(1));
        assert!(rewritten(&result)
            .contains("for (a, b), k in itertools.product(pairs, (1, 2, 3)):\n    use(a, b, k)\n"));
    }

    #[test]
    fn test_generator_outer_iterable_is_skipped() {
        let source = "\
def drain(stream):
    for chunk in stream:
        for k in range(3):
            emit(chunk, k)
";
        let (_, result) = detect_and_refactor(SmellKind::ExcessiveNesting, source, &config(1));
        assert!(matches!(result, RefactorResult::Skipped { .. }), "result: {result:?}");

        let source = "\
def drain(log):
    lines = log.readlines()
    for line in lines:
        for k in range(3):
            emit(line, k)
";
        let (_, result) = detect_and_refactor(SmellKind::ExcessiveNesting, source, &config(1));
        assert!(matches!(result, RefactorResult::Skipped { .. }), "result: {result:?}");
    }

    #[test]
    fn test_outer_list_mutated_in_body_is_skipped() {
        let source = "\
def grow():
    todo = [1, 2]
    for item in todo:
        for k in range(2):
            todo.append(item + k)
";
        let (_, result) = detect_and_refactor(SmellKind::ExcessiveNesting, source, &config(1));
        assert!(matches!(result, RefactorResult::Skipped { .. }), "result: {result:?}");
    }

    #[test]
    fn test_outer_list_literal_in_same_function_is_flattened() {
        let source = "\
def grid():
    rows = [1, 2, 3]
    for r in rows:
        for c in range(2):
            cell(r, c)
";
        let (_, result) = detect_and_refactor(SmellKind::ExcessiveNesting, source, &config(1));
        assert!(rewritten(&result)
            .contains("    for r, c in itertools.product(rows, range(2)):\n        cell(r, c)\n"));
    }

    #[test]
    fn test_dependent_inner_iterable_is_skipped() {
        let source = "for row in grid:\n    for cell in row:\n        show(cell)\n";
        let (_, result) = detect_and_refactor(SmellKind::ExcessiveNesting, source, &config(1));
        assert!(matches!(result, RefactorResult::Skipped { .. }));
    }

    #[test]
    fn test_break_in_innermost_loop_is_skipped() {
        let source = "\
for i in range(3):
    for j in range(3):
        if j == i:
            break
";
        let (_, result) = detect_and_refactor(SmellKind::ExcessiveNesting, source, &config(1));
        assert_eq!(result, RefactorResult::skipped("innermost loop uses `break`"));
    }

    #[test]
    fn test_imperfect_nesting_is_skipped() {
        let source = "\
for i in range(3):
    setup(i)
    for j in range(3):
        work(i, j)
";
        let (_, result) = detect_and_refactor(SmellKind::ExcessiveNesting, source, &config(1));
        assert!(matches!(result, RefactorResult::Skipped { .. }));
    }
}
