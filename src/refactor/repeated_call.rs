//! Hoist loop-invariant calls above their loop.

use tree_sitter::Node;

use crate::core::ast_utils::{
    enclosing_loop, identifier_texts, line_indent, line_start, node_spanning, node_text,
    starts_line,
};
use crate::core::smell::{AdditionalInfo, Smell, SmellKind};
use crate::detectors::loop_header;
use crate::detectors::repeated_call::{is_hoistable, LoopWrites};
use crate::detectors::symbol_trace::module_imports;
use crate::refactor::edit::{unique_name, TextEdit};
use crate::refactor::{
    occurrence_range, rewrite_file, Plan, RefactorContext, RefactorResult, Refactorer,
};

/// Evaluates the call once into `<callee>_result` right before the loop and
/// reads the variable in its place
#[derive(Debug, Default, Clone, Copy)]
pub struct RepeatedCallRefactorer;

impl Refactorer for RepeatedCallRefactorer {
    fn name(&self) -> &str {
        "hoist-invariant-call"
    }

    fn kind(&self) -> SmellKind {
        SmellKind::RepeatedCallInLoop
    }

    fn refactor(&self, smell: &Smell, context: &RefactorContext<'_>) -> RefactorResult {
        let AdditionalInfo::RepeatedCallInLoop {
            call_text,
            loop_header: header,
            ..
        } = &smell.additional_info
        else {
            return RefactorResult::skipped("smell carries no call details");
        };

        rewrite_file(smell, context, |root, source| {
            let mut calls = Vec::new();
            for index in 0..smell.occurrences.len() {
                let call = occurrence_range(smell, index, source)
                    .and_then(|(start, end)| node_spanning(root, start, end, &["call"]))
                    .filter(|call| node_text(*call, source) == call_text)
                    .ok_or_else(|| format!("`{call_text}` is no longer at its recorded position"))?;
                calls.push(call);
            }
            plan_hoist(root, source, &calls, call_text, header)
        })
    }
}

fn plan_hoist(
    root: Node<'_>,
    source: &str,
    calls: &[Node<'_>],
    call_text: &str,
    header: &str,
) -> Plan {
    let first = calls.first().ok_or_else(|| "no call to hoist".to_string())?;
    let loop_node = enclosing_loop(*first)
        .filter(|loop_node| loop_node.kind() == "for_statement")
        .ok_or_else(|| "call is no longer inside a for loop".to_string())?;
    if loop_header(loop_node, source) != header {
        return Err("enclosing loop header changed".to_string());
    }
    if !starts_line(source, loop_node.start_byte()) {
        return Err("loop shares its line with another statement".to_string());
    }

    let imports = module_imports(root, source);
    let writes = LoopWrites::of(loop_node, source);
    for call in calls {
        if !is_hoistable(*call, loop_node, &writes, source, &imports) {
            return Err(format!("`{call_text}` is no longer loop-invariant"));
        }
    }

    let base = first
        .child_by_field_name("function")
        .map(|function| match function.kind() {
            "attribute" => function
                .child_by_field_name("attribute")
                .map_or("call", |attribute| node_text(attribute, source)),
            _ => node_text(function, source),
        })
        .unwrap_or("call");
    let name = unique_name(&format!("{base}_result"), &identifier_texts(root, source));
    let indent = line_indent(source, loop_node.start_byte());

    let mut edits = vec![TextEdit::insert(
        line_start(source, loop_node.start_byte()),
        format!("{indent}{name} = {call_text}\n"),
    )];
    edits.extend(calls.iter().map(|call| TextEdit::replace_node(*call, name.clone())));
    Ok(edits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DetectionConfig;
    use crate::refactor::test_support::{detect_and_refactor, remaining, rewritten};

    #[test]
    fn test_hoists_call_out_of_hundred_iteration_loop() {
        let source = "\
def total(x, y):
    acc = 0
    for i in range(100):
        acc += f(x, y)
    return acc
";
        let config = DetectionConfig::default();
        let (_, result) = detect_and_refactor(SmellKind::RepeatedCallInLoop, source, &config);
        let output = rewritten(&result);
        assert_eq!(
            output,
            "\
def total(x, y):
    acc = 0
    f_result = f(x, y)
    for i in range(100):
        acc += f_result
    return acc
"
        );
        assert!(remaining(SmellKind::RepeatedCallInLoop, output, &config).is_empty());
    }

    #[test]
    fn test_replaces_every_occurrence_and_avoids_name_clash() {
        let source = "\
import math
f_sqrt = None
sqrt_result = 0
for row in rows:
    t = math.sqrt(2) + math.sqrt(2)
";
        let (_, result) =
            detect_and_refactor(SmellKind::RepeatedCallInLoop, source, &DetectionConfig::default());
        let output = rewritten(&result);
        assert!(output.contains("sqrt_result_2 = math.sqrt(2)\nfor row in rows:\n"));
        assert!(output.contains("    t = sqrt_result_2 + sqrt_result_2\n"));
    }

    #[test]
    fn test_changed_loop_header_is_skipped() {
        let source = "for i in range(10):\n    v = f(2)\n";
        let config = DetectionConfig::default();
        let (smell, _) = detect_and_refactor(SmellKind::RepeatedCallInLoop, source, &config);

        let edited = "for i in range(20):\n    v = f(2)\n";
        let snapshot = crate::core::snapshot::ProjectSnapshot::from_files([("target.py", edited)]);
        let service = crate::core::ast_service::AstService::new();
        let context = RefactorContext::new(&snapshot, &service, &config);
        let result = RepeatedCallRefactorer.refactor(&smell, &context);
        assert_eq!(result, RefactorResult::skipped("enclosing loop header changed"));
    }
}
