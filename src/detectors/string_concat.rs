//! Repeated string concatenation inside loops.

use tree_sitter::Node;

use crate::core::ast_utils::{enclosing_function, enclosing_loop, node_text, walk_all, walk_scope};
use crate::core::errors::Result;
use crate::core::smell::{AdditionalInfo, Occurrence, Smell, SmellKind};
use crate::detectors::{loop_header, AnalysisContext, Analyzer, CodeUnit};

/// Flags `s += <str>` / `s = s + <str>` in a loop body when `s` is known to
/// hold a string
#[derive(Debug, Default, Clone, Copy)]
pub struct StringConcatAnalyzer;

impl Analyzer for StringConcatAnalyzer {
    fn name(&self) -> &str {
        "string-concat-in-loop"
    }

    fn kind(&self) -> SmellKind {
        SmellKind::StringConcatInLoop
    }

    fn analyze(&self, unit: &CodeUnit, context: &AnalysisContext<'_>) -> Result<Vec<Smell>> {
        let source = unit.source();
        let mut groups: Vec<(Node<'_>, String, Vec<Concatenation<'_>>)> = Vec::new();

        let mut candidates = Vec::new();
        walk_all(unit.root(), &mut |node| {
            if let Some(concat) = Concatenation::match_node(node, source) {
                candidates.push(concat);
            }
        });

        for concat in candidates {
            let Some(loop_node) = concat.loop_node() else {
                continue;
            };
            match groups
                .iter_mut()
                .find(|(existing, var, _)| {
                    existing.id() == loop_node.id() && *var == concat.variable
                })
            {
                Some((_, _, members)) => members.push(concat),
                None => groups.push((loop_node, concat.variable.to_string(), vec![concat])),
            }
        }

        let mut smells = Vec::new();
        for (loop_node, variable, members) in groups {
            let evidence = members.iter().any(|concat| concat.appends_string(source))
                || has_string_initializer(loop_node, &variable, source);
            if !evidence {
                continue;
            }

            let mut severity = SmellKind::StringConcatInLoop.default_severity();
            if enclosing_loop(loop_node).is_some() {
                severity = severity.escalate();
            }
            let header = loop_header(loop_node, source);
            smells.push(Smell::new(
                SmellKind::StringConcatInLoop,
                unit.path(),
                members
                    .iter()
                    .map(|concat| Occurrence::from_node(&concat.statement))
                    .collect(),
                AdditionalInfo::StringConcatInLoop {
                    variable: variable.clone(),
                    concat_count: members.len(),
                    loop_line: loop_node.start_position().row + 1,
                    loop_header: header.clone(),
                },
                context.severity(SmellKind::StringConcatInLoop, severity),
                format!(
                    "String `{variable}` is rebuilt by concatenation on every iteration of `{header}`"
                ),
            ));
        }

        Ok(smells)
    }
}

/// One `s += e` or `s = s + e` statement
#[derive(Debug, Clone)]
pub(crate) struct Concatenation<'t> {
    /// Enclosing `expression_statement`
    pub statement: Node<'t>,
    pub variable: &'t str,
    /// Byte range of the appended expression
    pub appended: (usize, usize),
    /// Appended operand nodes
    operands: Vec<Node<'t>>,
    augmented: bool,
}

impl<'t> Concatenation<'t> {
    /// Recognize a concatenation statement rooted at `node`
    pub fn match_node(node: Node<'t>, source: &'t str) -> Option<Self> {
        let statement = node.parent().filter(|p| p.kind() == "expression_statement")?;
        if statement.named_child_count() != 1 {
            return None;
        }
        let left = node.child_by_field_name("left")?;
        let right = node.child_by_field_name("right")?;
        if left.kind() != "identifier" {
            return None;
        }
        let variable = node_text(left, source);

        match node.kind() {
            "augmented_assignment" => {
                let operator = node.child_by_field_name("operator")?;
                if node_text(operator, source) != "+=" {
                    return None;
                }
                Some(Self {
                    statement,
                    variable,
                    appended: (right.start_byte(), right.end_byte()),
                    operands: vec![right],
                    augmented: true,
                })
            }
            "assignment" => {
                // descend the left spine of `+` operators to `variable + ...`
                let mut current = right;
                let mut operands = Vec::new();
                loop {
                    if current.kind() != "binary_operator" || !is_plus(current, source) {
                        return None;
                    }
                    operands.push(current.child_by_field_name("right")?);
                    let lhs = current.child_by_field_name("left")?;
                    if lhs.kind() == "identifier" && node_text(lhs, source) == variable {
                        break;
                    }
                    current = lhs;
                }
                let first = current.child_by_field_name("right")?;
                Some(Self {
                    statement,
                    variable,
                    appended: (first.start_byte(), right.end_byte()),
                    operands,
                    augmented: false,
                })
            }
            _ => None,
        }
    }

    /// Innermost loop whose body holds the statement
    pub fn loop_node(&self) -> Option<Node<'t>> {
        let loop_node = enclosing_loop(self.statement)?;
        let body = loop_node.child_by_field_name("body")?;
        (body.start_byte() <= self.statement.start_byte()
            && self.statement.end_byte() <= body.end_byte())
        .then_some(loop_node)
    }

    /// Source text of the appended expression
    pub fn appended_text<'s>(&self, source: &'s str) -> &'s str {
        source.get(self.appended.0..self.appended.1).unwrap_or_default()
    }

    /// Number of identifier nodes naming the variable inside the statement
    pub fn variable_mentions(&self) -> usize {
        if self.augmented {
            1
        } else {
            2
        }
    }

    fn appends_string(&self, source: &str) -> bool {
        self.operands
            .iter()
            .any(|operand| is_string_expression(*operand, source))
    }
}

fn is_plus(node: Node<'_>, source: &str) -> bool {
    node.child_by_field_name("operator")
        .is_some_and(|op| node_text(op, source) == "+")
}

/// Expressions that evidently evaluate to `str`
fn is_string_expression(node: Node<'_>, source: &str) -> bool {
    match node.kind() {
        "string" | "concatenated_string" => true,
        "parenthesized_expression" => node
            .named_child(0)
            .is_some_and(|inner| is_string_expression(inner, source)),
        "binary_operator" => {
            let left = node.child_by_field_name("left");
            let right = node.child_by_field_name("right");
            match node.child_by_field_name("operator").map(|op| node_text(op, source)) {
                Some("+") => {
                    left.is_some_and(|l| is_string_expression(l, source))
                        || right.is_some_and(|r| is_string_expression(r, source))
                }
                // printf-style formatting
                Some("%") => {
                    left.is_some_and(|l| matches!(l.kind(), "string" | "concatenated_string"))
                }
                _ => false,
            }
        }
        "call" => is_str_call(node, source),
        _ => false,
    }
}

/// `str(...)`, `"...".format(...)` and `"...".join(...)`
fn is_str_call(call: Node<'_>, source: &str) -> bool {
    let Some(function) = call.child_by_field_name("function") else {
        return false;
    };
    match function.kind() {
        "identifier" => node_text(function, source) == "str",
        "attribute" => function
            .child_by_field_name("object")
            .is_some_and(|object| matches!(object.kind(), "string" | "concatenated_string")),
        _ => false,
    }
}

/// A plain string assigned to `variable` in the same scope before the loop
fn has_string_initializer(loop_node: Node<'_>, variable: &str, source: &str) -> bool {
    let scope_body = match enclosing_function(loop_node) {
        Some(function) => match function.child_by_field_name("body") {
            Some(body) => body,
            None => return false,
        },
        None => {
            let mut root = loop_node;
            while let Some(parent) = root.parent() {
                root = parent;
            }
            root
        }
    };

    let mut found = false;
    walk_scope(scope_body, &mut |node| {
        if found || node.kind() != "assignment" || node.end_byte() > loop_node.start_byte() {
            return;
        }
        let (Some(left), Some(right)) = (
            node.child_by_field_name("left"),
            node.child_by_field_name("right"),
        ) else {
            return;
        };
        if left.kind() == "identifier"
            && node_text(left, source) == variable
            && (matches!(right.kind(), "string" | "concatenated_string")
                || (right.kind() == "call" && is_str_call(right, source)))
        {
            found = true;
        }
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DetectionConfig;
    use crate::core::smell::Severity;
    use crate::detectors::test_support::analyze_source;

    fn analyze(source: &str) -> Vec<Smell> {
        analyze_source(&StringConcatAnalyzer, "concat.py", source, &DetectionConfig::default())
    }

    #[test]
    fn test_augmented_concat_with_initializer() {
        let source = "\
def render(rows):
    out = ''
    for row in rows:
        out += row.name
        out += \"\\n\"
    return out
";
        let smells = analyze(source);
        assert_eq!(smells.len(), 1);
        match &smells[0].additional_info {
            AdditionalInfo::StringConcatInLoop {
                variable,
                concat_count,
                loop_line,
                loop_header,
            } => {
                assert_eq!(variable, "out");
                assert_eq!(*concat_count, 2);
                assert_eq!(*loop_line, 3);
                assert_eq!(loop_header, "for row in rows:");
            }
            other => panic!("unexpected info {other:?}"),
        }
        assert_eq!(smells[0].occurrences.len(), 2);
        assert_eq!(smells[0].severity, Severity::Medium);
    }

    #[test]
    fn test_binary_concat_with_string_operand() {
        let source = "\
text = load()
while more():
    text = text + \", \" + next_item()
";
        let smells = analyze(source);
        assert_eq!(smells.len(), 1);
    }

    #[test]
    fn test_numeric_accumulation_is_ignored() {
        let source = "\
total = 0
for n in numbers:
    total += n
    total = total + 1
";
        assert!(analyze(source).is_empty());
    }

    #[test]
    fn test_nested_loop_escalates() {
        let source = "\
for row in grid:
    line = ''
    for cell in row:
        line += str(cell)
";
        let smells = analyze(source);
        assert_eq!(smells.len(), 1);
        assert_eq!(smells[0].severity, Severity::High);
    }

    #[test]
    fn test_appended_text() {
        let source = "s = s + a + b\n";
        let tree = crate::core::ast_service::AstService::new().parse(source).unwrap();
        let assignment = tree.root_node().named_child(0).unwrap().named_child(0).unwrap();
        let concat = Concatenation::match_node(assignment, source).unwrap();
        assert_eq!(concat.appended_text(source), "a + b");
        assert_eq!(concat.variable, "s");
        assert_eq!(concat.variable_mentions(), 2);
    }
}
