//! Byte-range text edits and the small source-manipulation helpers the
//! refactorers share.

use std::collections::HashSet;

use tree_sitter::Node;

use crate::core::ast_utils::{import_bindings, named_children, node_text};
use crate::core::errors::{Result, SmellwrightError};

/// Replace `start..end` with `replacement` (an insertion when `start == end`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    /// Byte offset where the replaced range begins
    pub start: usize,
    /// Byte offset one past the replaced range
    pub end: usize,
    /// Text written in place of the range
    pub replacement: String,
}

impl TextEdit {
    /// Replace a byte range
    pub fn replace(start: usize, end: usize, replacement: impl Into<String>) -> Self {
        Self {
            start,
            end,
            replacement: replacement.into(),
        }
    }

    /// Insert text at a byte offset
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self::replace(at, at, text)
    }

    /// Delete a byte range
    pub fn delete(start: usize, end: usize) -> Self {
        Self::replace(start, end, String::new())
    }

    /// Replace the full text of a node
    pub fn replace_node(node: Node<'_>, replacement: impl Into<String>) -> Self {
        Self::replace(node.start_byte(), node.end_byte(), replacement)
    }
}

/// Apply non-overlapping edits to `source`. Insertions at the same offset are
/// applied in the order given.
pub fn apply_edits(source: &str, edits: &[TextEdit]) -> Result<String> {
    let mut ordered: Vec<(usize, &TextEdit)> = edits.iter().enumerate().collect();
    ordered.sort_by(|(ia, a), (ib, b)| {
        a.start
            .cmp(&b.start)
            .then(a.end.cmp(&b.end))
            .then(ia.cmp(ib))
    });

    let mut output = String::with_capacity(source.len() + 64);
    let mut cursor = 0usize;
    for (_, edit) in ordered {
        if edit.start > edit.end || edit.end > source.len() {
            return Err(SmellwrightError::refactor(format!(
                "Edit range {}..{} is outside the source ({} bytes)",
                edit.start,
                edit.end,
                source.len()
            )));
        }
        if edit.start < cursor {
            return Err(SmellwrightError::refactor(format!(
                "Edit at {}..{} overlaps a previous edit ending at {cursor}",
                edit.start, edit.end
            )));
        }
        if !source.is_char_boundary(edit.start) || !source.is_char_boundary(edit.end) {
            return Err(SmellwrightError::refactor(
                "Edit range does not fall on character boundaries",
            ));
        }
        output.push_str(&source[cursor..edit.start]);
        output.push_str(&edit.replacement);
        cursor = edit.end;
    }
    output.push_str(&source[cursor..]);
    Ok(output)
}

/// Pick an identifier derived from `base` that does not collide with `taken`
pub fn unique_name(base: &str, taken: &HashSet<String>) -> String {
    let mut sanitized: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if sanitized.is_empty() || sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }

    if !taken.contains(&sanitized) && !is_python_keyword(&sanitized) {
        return sanitized;
    }
    (2..)
        .map(|n| format!("{sanitized}_{n}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or(sanitized)
}

fn is_python_keyword(name: &str) -> bool {
    matches!(
        name,
        "False" | "None" | "True" | "and" | "as" | "assert" | "async" | "await" | "break"
            | "class" | "continue" | "def" | "del" | "elif" | "else" | "except" | "finally"
            | "for" | "from" | "global" | "if" | "import" | "in" | "is" | "lambda"
            | "nonlocal" | "not" | "or" | "pass" | "raise" | "return" | "try" | "while"
            | "with" | "yield"
    )
}

/// Remove `amount` leading spaces from every non-blank line of `text`.
/// Returns `None` when a non-blank line is indented less than `amount` or
/// uses tabs, since the block structure could not be preserved.
pub fn dedent(text: &str, amount: usize) -> Option<String> {
    let prefix = " ".repeat(amount);
    let mut lines = Vec::new();
    for line in text.split('\n') {
        if line.trim().is_empty() {
            lines.push(String::new());
            continue;
        }
        if line.starts_with('\t') || !line.starts_with(&prefix) {
            return None;
        }
        lines.push(line[amount..].to_string());
    }
    Some(lines.join("\n"))
}

/// Edit that makes `import <module>` available at module level, or `None` when
/// the module is already imported under its own name.
pub fn ensure_module_import(root: Node<'_>, source: &str, module: &str) -> Option<TextEdit> {
    let statements = named_children(root);
    let already_imported = statements.iter().any(|stmt| {
        stmt.kind() == "import_statement"
            && import_bindings(*stmt, source)
                .iter()
                .any(|binding| binding.module == module && binding.local_name == module)
    });
    if already_imported {
        return None;
    }

    // after the module docstring and any `from __future__` imports
    let mut insert_at = 0;
    for (index, stmt) in statements.iter().enumerate() {
        let is_docstring = index == 0
            && stmt.kind() == "expression_statement"
            && stmt.named_child(0).is_some_and(|child| child.kind() == "string");
        let is_future = stmt.kind() == "future_import_statement";
        if stmt.kind() == "comment" && insert_at == stmt.start_byte() {
            // keep leading comments (shebang, encoding) above the import
            insert_at = crate::core::ast_utils::line_end_inclusive(source, stmt.end_byte());
            continue;
        }
        if is_docstring || is_future {
            insert_at = crate::core::ast_utils::line_end_inclusive(source, stmt.end_byte());
        } else {
            break;
        }
    }

    let mut text = format!("import {module}\n");
    if insert_at == source.len() && !source.is_empty() && !source.ends_with('\n') {
        text.insert(0, '\n');
    }
    Some(TextEdit::insert(insert_at, text))
}

/// True when `name` is bound to something other than the `module` import
/// anywhere in the file (assignments, parameters, definitions, other imports)
pub fn shadows_module(root: Node<'_>, source: &str, name: &str) -> bool {
    let mut shadowed = false;
    crate::core::ast_utils::walk_all(root, &mut |node| {
        if shadowed {
            return;
        }
        match node.kind() {
            "import_statement" | "import_from_statement" => {
                shadowed = import_bindings(node, source)
                    .iter()
                    .any(|binding| binding.local_name == name && binding.module != name);
            }
            "identifier" => {
                let is_binding = node.parent().is_some_and(|parent| {
                    matches!(
                        parent.kind(),
                        "parameters"
                            | "default_parameter"
                            | "typed_parameter"
                            | "function_definition"
                            | "class_definition"
                    ) || (matches!(parent.kind(), "assignment" | "for_statement")
                        && parent
                            .child_by_field_name("left")
                            .is_some_and(|left| left.id() == node.id()))
                });
                if is_binding && node_text(node, source) == name {
                    shadowed = true;
                }
            }
            _ => {}
        }
    });
    shadowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ast_service::AstService;

    #[test]
    fn test_apply_edits_in_any_order() {
        let source = "abcdef";
        let edits = vec![
            TextEdit::replace(4, 6, "XY"),
            TextEdit::insert(0, ">"),
            TextEdit::delete(1, 2),
        ];
        assert_eq!(apply_edits(source, &edits).unwrap(), ">acdXY");
    }

    #[test]
    fn test_apply_edits_rejects_overlap() {
        let edits = vec![TextEdit::replace(0, 3, "x"), TextEdit::replace(2, 4, "y")];
        assert!(apply_edits("abcdef", &edits).is_err());
        assert!(apply_edits("abc", &[TextEdit::delete(1, 9)]).is_err());
    }

    #[test]
    fn test_unique_name_avoids_collisions() {
        let taken: HashSet<String> = ["value".to_string(), "value_2".to_string()].into();
        assert_eq!(unique_name("value", &taken), "value_3");
        assert_eq!(unique_name("fresh", &taken), "fresh");
        assert_eq!(unique_name("9lives", &taken), "_9lives");
        assert_eq!(unique_name("class", &taken), "class_2");
    }

    #[test]
    fn test_dedent() {
        assert_eq!(
            dedent("        a = 1\n\n        b = 2", 4).unwrap(),
            "    a = 1\n\n    b = 2"
        );
        assert!(dedent("  a = 1", 4).is_none());
        assert!(dedent("\ta = 1", 0).is_none());
    }

    #[test]
    fn test_ensure_module_import_after_docstring() {
        let source = "\"\"\"Doc.\"\"\"\nfrom __future__ import annotations\nx = 1\n";
        let tree = AstService::new().parse(source).unwrap();
        let edit = ensure_module_import(tree.root_node(), source, "itertools").unwrap();
        let updated = apply_edits(source, &[edit]).unwrap();
        assert_eq!(
            updated,
            "\"\"\"Doc.\"\"\"\nfrom __future__ import annotations\nimport itertools\nx = 1\n"
        );

        let tree = AstService::new().parse(&updated).unwrap();
        assert!(ensure_module_import(tree.root_node(), &updated, "itertools").is_none());
    }

    #[test]
    fn test_shadows_module() {
        let source = "def f(itertools):\n    return itertools\n";
        let tree = AstService::new().parse(source).unwrap();
        assert!(shadows_module(tree.root_node(), source, "itertools"));

        let source = "import itertools\nx = 1\n";
        let tree = AstService::new().parse(source).unwrap();
        assert!(!shadows_module(tree.root_node(), source, "itertools"));
    }
}
