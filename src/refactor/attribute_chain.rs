//! Split long access chains with alias assignments.

use tree_sitter::Node;

use crate::core::ast_utils::{
    enclosing_statement, identifier_texts, is_literal, line_indent, line_start, node_spanning,
    node_text, starts_line, walk_scope, CONDITIONAL_KINDS, SCOPE_KINDS,
};
use crate::core::smell::{AdditionalInfo, Confidence, Smell, SmellKind};
use crate::detectors::attribute_chain::AccessChain;
use crate::refactor::edit::{unique_name, TextEdit};
use crate::refactor::{
    occurrence_range, rewrite_file, Plan, RefactorContext, RefactorResult, Refactorer,
};

/// Hoists the prefix of a locally rooted chain into `<attr>_ref` aliases
/// assigned right before the statement, so that no remaining chain is longer
/// than the threshold.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttributeChainRefactorer;

impl Refactorer for AttributeChainRefactorer {
    fn name(&self) -> &str {
        "split-attribute-chain"
    }

    fn kind(&self) -> SmellKind {
        SmellKind::LongAttributeChain
    }

    fn refactor(&self, smell: &Smell, context: &RefactorContext<'_>) -> RefactorResult {
        let AdditionalInfo::LongAttributeChain {
            chain_text,
            confidence,
            ..
        } = &smell.additional_info
        else {
            return RefactorResult::skipped("smell carries no chain details");
        };
        if *confidence == Confidence::Low {
            return RefactorResult::skipped(
                "chain root is defined outside this module; no safe local rewrite",
            );
        }
        let threshold = context.config.chain_length_threshold;

        rewrite_file(smell, context, |root, source| {
            let (start, end) = occurrence_range(smell, 0, source)
                .ok_or_else(|| "chain span is outside the current source".to_string())?;
            let top = node_spanning(root, start, end, &["attribute", "subscript"])
                .filter(|node| node_text(*node, source) == chain_text)
                .ok_or_else(|| "chain no longer matches the current source".to_string())?;
            plan_split(root, top, source, threshold)
        })
    }
}

fn plan_split(root: Node<'_>, top: Node<'_>, source: &str, threshold: usize) -> Plan {
    if threshold == 0 {
        return Err("chain length threshold must be at least 1".to_string());
    }
    let chain = AccessChain::of(top);
    let length = chain.len();
    if length <= threshold {
        return Err(format!("chain length {length} is within threshold {threshold}"));
    }
    if chain.root.kind() != "identifier" {
        return Err("chain does not start from a plain name".to_string());
    }
    if top.start_position().row != top.end_position().row {
        return Err("chain spans several lines".to_string());
    }

    let statement =
        enclosing_statement(top).ok_or_else(|| "chain is not inside a statement".to_string())?;
    if !matches!(statement.kind(), "expression_statement" | "return_statement") {
        return Err(format!("cannot insert aliases before a {}", statement.kind()));
    }
    if !starts_line(source, statement.start_byte()) {
        return Err("statement shares its line with another statement".to_string());
    }
    check_evaluation_context(top, statement)?;
    if has_earlier_call(statement, top) {
        return Err("a call evaluated before the chain could change what it reads".to_string());
    }

    // aliases cover `threshold` steps each; at least one step stays in place
    let alias_count = (length + threshold - 1) / threshold - 1;
    let aliased = &chain.steps[..alias_count * threshold];
    if let Some(step) = aliased.iter().find(|step| !is_plain_step(**step)) {
        return Err(format!(
            "`{}` has a computed subscript",
            node_text(*step, source)
        ));
    }

    let indent = line_indent(source, statement.start_byte());
    let mut taken = identifier_texts(root, source);
    let mut lines = String::new();
    let mut previous: Option<(String, usize)> = None;
    for segment in 0..alias_count {
        let last_step = aliased[(segment + 1) * threshold - 1];
        let expression = match &previous {
            None => source
                .get(chain.root.start_byte()..last_step.end_byte())
                .unwrap_or_default()
                .to_string(),
            Some((alias, end)) => format!(
                "{alias}{}",
                source.get(*end..last_step.end_byte()).unwrap_or_default()
            ),
        };
        let alias = unique_name(&format!("{}_ref", step_name(last_step, source)), &taken);
        taken.insert(alias.clone());
        lines.push_str(&format!("{indent}{alias} = {expression}\n"));
        previous = Some((alias, last_step.end_byte()));
    }

    let Some((alias, replaced_end)) = previous else {
        return Err("nothing to alias".to_string());
    };
    Ok(vec![
        TextEdit::insert(line_start(source, statement.start_byte()), lines),
        TextEdit::replace(top.start_byte(), replaced_end, alias),
    ])
}

/// The chain must be evaluated unconditionally, in the statement's own scope,
/// and must not be an assignment target
fn check_evaluation_context(top: Node<'_>, statement: Node<'_>) -> std::result::Result<(), String> {
    let mut child = top;
    while let Some(parent) = child.parent() {
        if parent.id() == statement.id() {
            break;
        }
        let kind = parent.kind();
        if CONDITIONAL_KINDS.contains(&kind) || SCOPE_KINDS.contains(&kind) {
            return Err(format!("chain is evaluated conditionally ({kind})"));
        }
        if matches!(kind, "assignment" | "augmented_assignment")
            && parent
                .child_by_field_name("left")
                .is_some_and(|left| {
                    left.start_byte() <= child.start_byte() && child.end_byte() <= left.end_byte()
                })
        {
            return Err("chain is an assignment target".to_string());
        }
        child = parent;
    }
    Ok(())
}

fn has_earlier_call(statement: Node<'_>, top: Node<'_>) -> bool {
    let mut found = false;
    walk_scope(statement, &mut |node| {
        if node.kind() == "call" && node.end_byte() <= top.start_byte() {
            found = true;
        }
    });
    found
}

/// Attribute access or subscript with a literal index
fn is_plain_step(step: Node<'_>) -> bool {
    match step.kind() {
        "attribute" => true,
        "subscript" => {
            let mut cursor = step.walk();
            let indices: Vec<Node<'_>> =
                step.children_by_field_name("subscript", &mut cursor).collect();
            !indices.is_empty() && indices.into_iter().all(is_literal)
        }
        _ => false,
    }
}

fn step_name<'s>(step: Node<'_>, source: &'s str) -> &'s str {
    match step.kind() {
        "attribute" => step
            .child_by_field_name("attribute")
            .map_or("value", |attribute| node_text(attribute, source)),
        _ => "item",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DetectionConfig;
    use crate::core::snapshot::ProjectSnapshot;
    use crate::core::ast_service::AstService;
    use crate::detectors::attribute_chain::AttributeChainAnalyzer;
    use crate::detectors::test_support::analyze_project;
    use crate::refactor::test_support::{detect_and_refactor, remaining, rewritten};

    #[test]
    fn test_splits_local_chain() {
        let source = "\
def read(config):
    return config.service.database.primary.settings.pool.size
";
        let config = DetectionConfig::default();
        let (_, result) = detect_and_refactor(SmellKind::LongAttributeChain, source, &config);
        assert_eq!(
            rewritten(&result),
            "\
def read(config):
    pool_ref = config.service.database.primary.settings.pool
    return pool_ref.size
"
        );
        assert!(remaining(SmellKind::LongAttributeChain, rewritten(&result), &config).is_empty());
    }

    #[test]
    fn test_long_chain_gets_several_aliases() {
        let source = "root = load()\nvalue = root.a.b[0].c.d.e.f.g.h.i.j\n";
        let mut config = DetectionConfig::default();
        config.chain_length_threshold = 4;
        let (_, result) = detect_and_refactor(SmellKind::LongAttributeChain, source, &config);
        assert_eq!(
            rewritten(&result),
            "root = load()\nc_ref = root.a.b[0].c\ng_ref = c_ref.d.e.f.g\nvalue = g_ref.h.i.j\n"
        );
        assert!(remaining(SmellKind::LongAttributeChain, rewritten(&result), &config).is_empty());
    }

    #[test]
    fn test_zero_threshold_is_skipped() {
        let mut config = DetectionConfig::default();
        config.chain_length_threshold = 0;
        let source = "def f(o):\n    return o.a.b\n";
        let (_, result) = detect_and_refactor(SmellKind::LongAttributeChain, source, &config);
        assert_eq!(
            result,
            RefactorResult::skipped("chain length threshold must be at least 1")
        );
    }

    #[test]
    fn test_cross_file_chain_is_skipped() {
        let files = [
            ("project/config.py", "root = build_tree()\n"),
            (
                "project/consumer.py",
                "from project.config import root\n\ndef read():\n    return root.level1.level2.level3.level4.level5.level6.level7\n",
            ),
        ];
        let config = DetectionConfig::default();
        let smells =
            analyze_project(&AttributeChainAnalyzer, &files, "project/consumer.py", &config);
        let snapshot = ProjectSnapshot::from_files(files);
        let service = AstService::new();
        let context = RefactorContext::new(&snapshot, &service, &config);
        let result = AttributeChainRefactorer.refactor(&smells[0], &context);
        assert!(matches!(result, RefactorResult::Skipped { .. }));
    }

    #[test]
    fn test_conditional_and_target_chains_are_skipped() {
        let config = DetectionConfig::default();
        let source = "def f(o, flag):\n    return flag and o.a.b.c.d.e.f\n";
        let (_, result) = detect_and_refactor(SmellKind::LongAttributeChain, source, &config);
        assert!(matches!(result, RefactorResult::Skipped { .. }));

        let source = "def f(o):\n    o.a.b.c.d.e.f = 1\n";
        let (_, result) = detect_and_refactor(SmellKind::LongAttributeChain, source, &config);
        assert_eq!(result, RefactorResult::skipped("chain is an assignment target"));
    }

    #[test]
    fn test_earlier_call_blocks_hoisting() {
        let source = "def f(o):\n    total = refresh(o) + o.a.b.c.d.e.f\n";
        let (_, result) =
            detect_and_refactor(SmellKind::LongAttributeChain, source, &DetectionConfig::default());
        assert!(matches!(result, RefactorResult::Skipped { .. }));
    }
}
