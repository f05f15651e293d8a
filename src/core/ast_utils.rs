//! Helper utilities for working with tree-sitter Python trees.
//!
//! Analyzers and refactorers share these so that "what counts as a loop",
//! "what a scope boundary is" and "which names a block binds" are answered the
//! same way on both sides of a rewrite.

use std::collections::HashSet;

use tree_sitter::Node;

/// Loop statements
pub const LOOP_KINDS: &[&str] = &["for_statement", "while_statement"];

/// Nodes that open a new scope; walks that stay within one function stop here
pub const SCOPE_KINDS: &[&str] = &["function_definition", "class_definition", "lambda"];

/// Expressions that evaluate their operands conditionally or lazily
pub const CONDITIONAL_KINDS: &[&str] = &[
    "if_statement",
    "elif_clause",
    "else_clause",
    "try_statement",
    "except_clause",
    "finally_clause",
    "match_statement",
    "case_clause",
    "conditional_expression",
    "boolean_operator",
    "lambda",
    "list_comprehension",
    "set_comprehension",
    "dictionary_comprehension",
    "generator_expression",
];

/// Literal expression kinds without side effects
const LITERAL_KINDS: &[&str] = &["integer", "float", "true", "false", "none", "ellipsis"];

/// Source text of a node
pub fn node_text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.byte_range()).unwrap_or("")
}

/// True for `for`/`while` statements
pub fn is_loop(node: Node<'_>) -> bool {
    LOOP_KINDS.contains(&node.kind())
}

/// True for nodes that open a nested scope
pub fn is_scope_boundary(node: Node<'_>) -> bool {
    SCOPE_KINDS.contains(&node.kind())
}

/// Named children of a node
pub fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Statements of a block, ignoring comments
pub fn block_statements<'t>(block: Node<'t>) -> Vec<Node<'t>> {
    named_children(block)
        .into_iter()
        .filter(|child| child.kind() != "comment")
        .collect()
}

/// Visit `root` and its descendants in document order without entering nested
/// scopes. `root` itself is always visited, even when it is a scope.
pub fn walk_scope<'t>(root: Node<'t>, visit: &mut dyn FnMut(Node<'t>)) {
    visit(root);
    let mut cursor = root.walk();
    let children: Vec<Node<'t>> = root.named_children(&mut cursor).collect();
    for child in children {
        if is_scope_boundary(child) {
            continue;
        }
        walk_scope(child, visit);
    }
}

/// Visit every descendant of `root` (including nested scopes)
pub fn walk_all<'t>(root: Node<'t>, visit: &mut dyn FnMut(Node<'t>)) {
    visit(root);
    let mut cursor = root.walk();
    let children: Vec<Node<'t>> = root.named_children(&mut cursor).collect();
    for child in children {
        walk_all(child, visit);
    }
}

/// Nearest ancestor (excluding `node`) whose kind is in `kinds`
pub fn ancestor_of_kind<'t>(node: Node<'t>, kinds: &[&str]) -> Option<Node<'t>> {
    let mut current = node.parent();
    while let Some(parent) = current {
        if kinds.contains(&parent.kind()) {
            return Some(parent);
        }
        current = parent.parent();
    }
    None
}

/// Nearest enclosing loop that belongs to the same scope as `node`
pub fn enclosing_loop<'t>(node: Node<'t>) -> Option<Node<'t>> {
    let mut current = node.parent();
    while let Some(parent) = current {
        if is_scope_boundary(parent) {
            return None;
        }
        if is_loop(parent) {
            return Some(parent);
        }
        current = parent.parent();
    }
    None
}

/// Nearest enclosing function definition
pub fn enclosing_function<'t>(node: Node<'t>) -> Option<Node<'t>> {
    ancestor_of_kind(node, &["function_definition"])
}

/// Statement that directly contains `node` (the ancestor whose parent is a
/// `block` or the `module`).
pub fn enclosing_statement<'t>(node: Node<'t>) -> Option<Node<'t>> {
    let mut current = node;
    loop {
        let parent = current.parent()?;
        if matches!(parent.kind(), "block" | "module") {
            return Some(current);
        }
        current = parent;
    }
}

/// Find the smallest named node of `kind` that starts exactly at `byte`
pub fn node_at<'t>(root: Node<'t>, byte: usize, kind: &str) -> Option<Node<'t>> {
    let mut found = None;
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.start_byte() > byte || node.end_byte() < byte {
            continue;
        }
        if node.start_byte() == byte && node.kind() == kind {
            // keep the innermost match
            found = Some(node);
        }
        let mut cursor = node.walk();
        stack.extend(node.named_children(&mut cursor));
    }
    found
}

/// Outermost named node covering exactly `start..end` whose kind is in `kinds`
pub fn node_spanning<'t>(
    root: Node<'t>,
    start: usize,
    end: usize,
    kinds: &[&str],
) -> Option<Node<'t>> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.start_byte() > start || node.end_byte() < end {
            continue;
        }
        if node.start_byte() == start && node.end_byte() == end && kinds.contains(&node.kind())
        {
            return Some(node);
        }
        let mut cursor = node.walk();
        stack.extend(node.named_children(&mut cursor));
    }
    None
}

/// Identifiers bound anywhere within `node`, without entering nested scopes.
/// Names of nested functions and classes count as bound.
pub fn assigned_names(node: Node<'_>, source: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    walk_scope(node, &mut |current| match current.kind() {
        "assignment" | "augmented_assignment" => {
            if let Some(left) = current.child_by_field_name("left") {
                collect_target_names(left, source, &mut names);
            }
        }
        "for_statement" | "for_in_clause" => {
            if let Some(left) = current.child_by_field_name("left") {
                collect_target_names(left, source, &mut names);
            }
        }
        "named_expression" => {
            if let Some(name) = current.child_by_field_name("name") {
                names.insert(node_text(name, source).to_string());
            }
        }
        "as_pattern" => {
            if let Some(alias) = current.child_by_field_name("alias") {
                collect_target_names(alias, source, &mut names);
            }
        }
        "delete_statement" | "global_statement" | "nonlocal_statement" => {
            let mut cursor = current.walk();
            for child in current.named_children(&mut cursor) {
                collect_target_names(child, source, &mut names);
            }
        }
        "import_statement" | "import_from_statement" => {
            for binding in import_bindings(current, source) {
                names.insert(binding.local_name);
            }
        }
        _ => {}
    });

    // nested definitions bind their own names in this scope
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_definition_names(child, source, &mut names);
    }
    names
}

fn collect_definition_names(node: Node<'_>, source: &str, names: &mut HashSet<String>) {
    match node.kind() {
        "function_definition" | "class_definition" => {
            if let Some(name) = node.child_by_field_name("name") {
                names.insert(node_text(name, source).to_string());
            }
        }
        "lambda" => {}
        _ => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                collect_definition_names(child, source, names);
            }
        }
    }
}

/// Identifier names inside an assignment target pattern
pub fn collect_target_names(target: Node<'_>, source: &str, names: &mut HashSet<String>) {
    match target.kind() {
        "identifier" => {
            names.insert(node_text(target, source).to_string());
        }
        // `obj.attr = ...` and `obj[i] = ...` rebind no local name
        "attribute" | "subscript" => {}
        _ => {
            let mut cursor = target.walk();
            for child in target.named_children(&mut cursor) {
                collect_target_names(child, source, names);
            }
        }
    }
}

/// Text of attribute/subscript targets written within `node` (e.g. `self.x`)
pub fn assigned_attribute_targets(node: Node<'_>, source: &str) -> HashSet<String> {
    let mut targets = HashSet::new();
    walk_scope(node, &mut |current| {
        if matches!(current.kind(), "assignment" | "augmented_assignment") {
            if let Some(left) = current.child_by_field_name("left") {
                collect_attribute_targets(left, source, &mut targets);
            }
        }
    });
    targets
}

fn collect_attribute_targets(target: Node<'_>, source: &str, targets: &mut HashSet<String>) {
    match target.kind() {
        "attribute" | "subscript" => {
            targets.insert(node_text(target, source).to_string());
        }
        "identifier" => {}
        _ => {
            let mut cursor = target.walk();
            for child in target.named_children(&mut cursor) {
                collect_attribute_targets(child, source, targets);
            }
        }
    }
}

/// Every identifier text in `node` (including nested scopes)
pub fn identifier_texts(node: Node<'_>, source: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    walk_all(node, &mut |current| {
        if current.kind() == "identifier" {
            names.insert(node_text(current, source).to_string());
        }
    });
    names
}

/// Identifiers read (not only written) within `node`
pub fn references_name(node: Node<'_>, source: &str, name: &str) -> bool {
    let mut found = false;
    walk_all(node, &mut |current| {
        if !found && current.kind() == "identifier" && node_text(current, source) == name {
            found = true;
        }
    });
    found
}

/// Side-effect free literal (numbers, plain strings, booleans, `None`)
pub fn is_literal(node: Node<'_>) -> bool {
    match node.kind() {
        kind if LITERAL_KINDS.contains(&kind) => true,
        "string" => !has_interpolation(node),
        "concatenated_string" => named_children(node).into_iter().all(is_literal),
        "unary_operator" => node
            .child_by_field_name("argument")
            .is_some_and(is_literal),
        "parenthesized_expression" => named_children(node).into_iter().all(is_literal),
        _ => false,
    }
}

/// True when a string node is an f-string with `{...}` interpolations
pub fn has_interpolation(node: Node<'_>) -> bool {
    named_children(node)
        .into_iter()
        .any(|child| child.kind() == "interpolation")
}

/// Literal containers whose elements are all side-effect free
pub fn is_pure_expression(node: Node<'_>) -> bool {
    match node.kind() {
        "identifier" => true,
        "attribute" => node
            .child_by_field_name("object")
            .is_some_and(is_pure_expression),
        "list" | "tuple" | "set" | "dictionary" | "pair" | "expression_list" => {
            named_children(node).into_iter().all(is_pure_expression)
        }
        _ => is_literal(node),
    }
}

/// A binding introduced by an import statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    /// Name bound in the importing module
    pub local_name: String,
    /// Dotted module path (`pkg.mod`), with leading dots for relative imports
    pub module: String,
    /// Imported member for `from m import x`; `None` for `import m`
    pub member: Option<String>,
}

/// Bindings introduced by an `import` / `from ... import` statement
pub fn import_bindings(node: Node<'_>, source: &str) -> Vec<ImportBinding> {
    let mut bindings = Vec::new();
    match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                match name.kind() {
                    "dotted_name" => {
                        let module = node_text(name, source).to_string();
                        let local_name = module.split('.').next().unwrap_or_default().to_string();
                        bindings.push(ImportBinding {
                            local_name,
                            module,
                            member: None,
                        });
                    }
                    "aliased_import" => {
                        let module = name
                            .child_by_field_name("name")
                            .map(|n| node_text(n, source).to_string())
                            .unwrap_or_default();
                        let alias = name
                            .child_by_field_name("alias")
                            .map(|n| node_text(n, source).to_string())
                            .unwrap_or_else(|| module.clone());
                        bindings.push(ImportBinding {
                            local_name: alias,
                            module,
                            member: None,
                        });
                    }
                    _ => {}
                }
            }
        }
        "import_from_statement" => {
            let module = node
                .child_by_field_name("module_name")
                .map(|n| node_text(n, source).to_string())
                .unwrap_or_default();
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                let (member, local) = match name.kind() {
                    "aliased_import" => {
                        let member = name
                            .child_by_field_name("name")
                            .map(|n| node_text(n, source).to_string())
                            .unwrap_or_default();
                        let alias = name
                            .child_by_field_name("alias")
                            .map(|n| node_text(n, source).to_string())
                            .unwrap_or_else(|| member.clone());
                        (member, alias)
                    }
                    _ => {
                        let member = node_text(name, source).to_string();
                        (member.clone(), member)
                    }
                };
                bindings.push(ImportBinding {
                    local_name: local,
                    module: module.clone(),
                    member: Some(member),
                });
            }
        }
        _ => {}
    }
    bindings
}

/// Byte offset of the start of the line containing `byte`
pub fn line_start(source: &str, byte: usize) -> usize {
    source[..byte.min(source.len())]
        .rfind('\n')
        .map_or(0, |idx| idx + 1)
}

/// Byte offset just past the newline ending the line containing `byte`
/// (or the end of the source for the last line)
pub fn line_end_inclusive(source: &str, byte: usize) -> usize {
    let byte = byte.min(source.len());
    source[byte..]
        .find('\n')
        .map_or(source.len(), |offset| byte + offset + 1)
}

/// Leading whitespace of the line containing `byte`
pub fn line_indent(source: &str, byte: usize) -> &str {
    let start = line_start(source, byte);
    let line = &source[start..];
    let width = line
        .char_indices()
        .find(|(_, c)| *c != ' ' && *c != '\t')
        .map_or(line.len(), |(idx, _)| idx);
    &line[..width]
}

/// True when only whitespace precedes `byte` on its line
pub fn starts_line(source: &str, byte: usize) -> bool {
    let start = line_start(source, byte);
    source[start..byte].chars().all(|c| c == ' ' || c == '\t')
}

/// True when nothing but whitespace or a comment follows `byte` on its line
pub fn ends_line(source: &str, byte: usize) -> bool {
    let rest = &source[byte.min(source.len())..];
    let line = rest.split('\n').next().unwrap_or_default().trim_start();
    line.is_empty() || line.starts_with('#')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ast_service::AstService;

    #[test]
    fn test_assigned_names_skips_nested_scopes() {
        let source = "\
for i in range(3):
    total = i
    a, (b, c) = 1, (2, 3)
    obj.attr = 5
    def helper():
        hidden = 1
    import os.path as osp
";
        let tree = AstService::new().parse(source).unwrap();
        let names = assigned_names(tree.root_node(), source);
        for expected in ["i", "total", "a", "b", "c", "helper", "osp"] {
            assert!(names.contains(expected), "missing {expected}: {names:?}");
        }
        assert!(!names.contains("hidden"));
        assert!(!names.contains("obj"));

        let targets = assigned_attribute_targets(tree.root_node(), source);
        assert!(targets.contains("obj.attr"));
    }

    #[test]
    fn test_import_bindings() {
        let source = "import os.path\nimport numpy as np\nfrom .models import Config as Cfg, load\n";
        let tree = AstService::new().parse(source).unwrap();
        let bindings: Vec<ImportBinding> = named_children(tree.root_node())
            .into_iter()
            .flat_map(|stmt| import_bindings(stmt, source))
            .collect();

        assert_eq!(bindings[0].local_name, "os");
        assert_eq!(bindings[0].module, "os.path");
        assert_eq!(bindings[1].local_name, "np");
        assert_eq!(bindings[2].local_name, "Cfg");
        assert_eq!(bindings[2].member.as_deref(), Some("Config"));
        assert_eq!(bindings[2].module, ".models");
        assert_eq!(bindings[3].local_name, "load");
    }

    #[test]
    fn test_literal_classification() {
        let source = "a = 1\nb = 'x'\nc = f'{a}'\nd = -2\ne = [a, 1, 'k']\nf = g()\n";
        let tree = AstService::new().parse(source).unwrap();
        let values: Vec<Node<'_>> = named_children(tree.root_node())
            .into_iter()
            .filter_map(|stmt| stmt.named_child(0))
            .filter_map(|assign| assign.child_by_field_name("right"))
            .collect();

        assert!(is_literal(values[0]));
        assert!(is_literal(values[1]));
        assert!(!is_literal(values[2]));
        assert!(is_literal(values[3]));
        assert!(is_pure_expression(values[4]));
        assert!(!is_pure_expression(values[5]));
    }

    #[test]
    fn test_line_helpers() {
        let source = "def f():\n    x = 1  # note\n";
        let byte = source.find("x = 1").unwrap();
        assert_eq!(line_indent(source, byte), "    ");
        assert!(starts_line(source, byte));
        assert!(!starts_line(source, byte + 2));
        assert!(ends_line(source, source.find("  # note").unwrap()));
        assert_eq!(line_start(source, byte), 9);
        assert_eq!(line_end_inclusive(source, byte), source.len());
    }

    #[test]
    fn test_enclosing_statement_and_loop() {
        let source = "def f(xs):\n    for x in xs:\n        y = x.a.b\n";
        let tree = AstService::new().parse(source).unwrap();
        let byte = source.find("x.a.b").unwrap();
        let attribute = node_at(tree.root_node(), byte, "attribute").unwrap();
        assert_eq!(node_text(attribute, source), "x.a");

        let statement = enclosing_statement(attribute).unwrap();
        assert_eq!(statement.kind(), "expression_statement");
        let loop_node = enclosing_loop(attribute).unwrap();
        assert_eq!(loop_node.kind(), "for_statement");
    }
}
