//! Replace repeated string concatenation in a loop with a list and one join.

use tree_sitter::Node;

use crate::core::ast_utils::{
    identifier_texts, line_end_inclusive, line_indent, line_start, node_spanning, node_text,
    starts_line, walk_all, walk_scope,
};
use crate::core::smell::{AdditionalInfo, Smell, SmellKind};
use crate::detectors::loop_header;
use crate::detectors::string_concat::Concatenation;
use crate::refactor::edit::{unique_name, TextEdit};
use crate::refactor::{
    occurrence_range, rewrite_file, Plan, RefactorContext, RefactorResult, Refactorer,
};

/// Statements that leave the loop without reaching the code after it
const EXIT_KINDS: &[&str] = &["return_statement", "raise_statement", "yield"];

/// `parts = [s]` before the loop, `parts.append(e)` for every concatenation,
/// `s = "".join(parts)` after it
#[derive(Debug, Default, Clone, Copy)]
pub struct StringConcatRefactorer;

impl Refactorer for StringConcatRefactorer {
    fn name(&self) -> &str {
        "join-string-parts"
    }

    fn kind(&self) -> SmellKind {
        SmellKind::StringConcatInLoop
    }

    fn refactor(&self, smell: &Smell, context: &RefactorContext<'_>) -> RefactorResult {
        let AdditionalInfo::StringConcatInLoop {
            variable,
            loop_header: header,
            ..
        } = &smell.additional_info
        else {
            return RefactorResult::skipped("smell carries no concatenation details");
        };

        rewrite_file(smell, context, |root, source| {
            let mut concatenations = Vec::new();
            for index in 0..smell.occurrences.len() {
                let concat = occurrence_range(smell, index, source)
                    .and_then(|(start, end)| {
                        node_spanning(root, start, end, &["expression_statement"])
                    })
                    .and_then(|statement| statement.named_child(0))
                    .and_then(|node| Concatenation::match_node(node, source))
                    .filter(|concat| concat.variable == variable)
                    .ok_or_else(|| {
                        format!(
                            "concatenation to `{variable}` is no longer at its recorded position"
                        )
                    })?;
                concatenations.push(concat);
            }
            plan_join(root, source, &concatenations, variable, header)
        })
    }
}

fn plan_join(
    root: Node<'_>,
    source: &str,
    concatenations: &[Concatenation<'_>],
    variable: &str,
    header: &str,
) -> Plan {
    let loop_node = concatenations
        .first()
        .and_then(Concatenation::loop_node)
        .ok_or_else(|| "concatenation is no longer inside a loop".to_string())?;
    if concatenations
        .iter()
        .any(|concat| concat.loop_node().map(|node| node.id()) != Some(loop_node.id()))
    {
        return Err("concatenations belong to different loops".to_string());
    }
    if loop_header(loop_node, source) != header {
        return Err("enclosing loop header changed".to_string());
    }
    if !starts_line(source, loop_node.start_byte()) {
        return Err("loop shares its line with another statement".to_string());
    }

    // every mention of the variable in the loop must be one of the rewritten ones
    let mut mentions = 0;
    walk_all(loop_node, &mut |node| {
        if node.kind() == "identifier" && node_text(node, source) == variable {
            mentions += 1;
        }
    });
    let expected: usize = concatenations.iter().map(Concatenation::variable_mentions).sum();
    if mentions != expected {
        return Err(format!("`{variable}` is read or rebound elsewhere in the loop"));
    }

    let mut exits = false;
    walk_scope(loop_node, &mut |node| exits |= EXIT_KINDS.contains(&node.kind()));
    if exits {
        return Err("loop can exit without reaching the join".to_string());
    }

    let parts = unique_name(&format!("{variable}_parts"), &identifier_texts(root, source));
    let indent = line_indent(source, loop_node.start_byte());

    let mut edits = vec![TextEdit::insert(
        line_start(source, loop_node.start_byte()),
        format!("{indent}{parts} = [{variable}]\n"),
    )];
    for concat in concatenations {
        edits.push(TextEdit::replace_node(
            concat.statement,
            format!("{parts}.append({})", concat.appended_text(source)),
        ));
    }
    let after = line_end_inclusive(source, loop_node.end_byte());
    let mut join = format!("{indent}{variable} = \"\".join({parts})\n");
    if after == source.len() && !source.ends_with('\n') {
        join.insert(0, '\n');
    }
    edits.push(TextEdit::insert(after, join));
    Ok(edits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DetectionConfig;
    use crate::refactor::test_support::{detect_and_refactor, remaining, rewritten};

    #[test]
    fn test_collects_parts_and_joins_once() {
        let source = "\
def render(rows):
    out = ''
    for row in rows:
        out += row.name
        out += \"\\n\"
    return out
";
        let config = DetectionConfig::default();
        let (_, result) = detect_and_refactor(SmellKind::StringConcatInLoop, source, &config);
        let output = rewritten(&result);
        assert_eq!(
            output,
            "\
def render(rows):
    out = ''
    out_parts = [out]
    for row in rows:
        out_parts.append(row.name)
        out_parts.append(\"\\n\")
    out = \"\".join(out_parts)
    return out
"
        );
        assert!(remaining(SmellKind::StringConcatInLoop, output, &config).is_empty());
    }

    #[test]
    fn test_binary_form_and_missing_trailing_newline() {
        let source = "text = ''\nwhile more():\n    text = text + \", \" + item()";
        let (_, result) =
            detect_and_refactor(SmellKind::StringConcatInLoop, source, &DetectionConfig::default());
        assert_eq!(
            rewritten(&result),
            "text = ''\ntext_parts = [text]\nwhile more():\n    text_parts.append(\", \" + item())\ntext = \"\".join(text_parts)\n"
        );
    }

    #[test]
    fn test_variable_read_in_loop_is_skipped() {
        let source = "\
out = ''
for row in rows:
    out += row
    log(out)
";
        let (_, result) =
            detect_and_refactor(SmellKind::StringConcatInLoop, source, &DetectionConfig::default());
        assert!(matches!(result, RefactorResult::Skipped { .. }));
    }

    #[test]
    fn test_early_return_is_skipped() {
        let source = "\
def first(rows):
    out = ''
    for row in rows:
        out += row
        if row == 'x':
            return out
    return out
";
        let (_, result) =
            detect_and_refactor(SmellKind::StringConcatInLoop, source, &DetectionConfig::default());
        assert!(matches!(result, RefactorResult::Skipped { .. }));
    }
}
