//! Delete members nothing reads.

use std::collections::HashMap;

use tree_sitter::Node;

use crate::core::ast_utils::{
    block_statements, ends_line, is_pure_expression, line_end_inclusive, line_indent, line_start,
    node_text, starts_line, walk_all,
};
use crate::core::smell::{AdditionalInfo, MemberKind, Smell, SmellKind};
use crate::detectors::unused_member::{class_members, is_analyzable_class, ClassMember};
use crate::refactor::edit::TextEdit;
use crate::refactor::{rewrite_file, Plan, RefactorContext, RefactorResult, Refactorer};

/// Removes every defining statement of the member. Attribute assignments are
/// only removed when their value has no side effects.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnusedMemberRefactorer;

impl Refactorer for UnusedMemberRefactorer {
    fn name(&self) -> &str {
        "remove-unused-member"
    }

    fn kind(&self) -> SmellKind {
        SmellKind::UnusedMember
    }

    fn refactor(&self, smell: &Smell, context: &RefactorContext<'_>) -> RefactorResult {
        let AdditionalInfo::UnusedMember {
            class_name,
            member_name,
            member_kind,
        } = &smell.additional_info
        else {
            return RefactorResult::skipped("smell carries no member details");
        };

        rewrite_file(smell, context, |root, source| {
            let class = find_class(root, source, class_name, smell.primary_line())
                .ok_or_else(|| {
                    format!("class `{class_name}` is no longer at its recorded position")
                })?;
            let member = class_members(class, source)
                .into_iter()
                .find(|member| member.name == *member_name && member.kind == *member_kind)
                .ok_or_else(|| format!("`{class_name}.{member_name}` is no longer defined"))?;
            let recorded: Vec<usize> = smell.occurrences.iter().map(|occ| occ.line).collect();
            let current: Vec<usize> = member
                .definitions
                .iter()
                .map(|definition| definition.start_position().row + 1)
                .collect();
            if recorded != current {
                return Err(format!("definitions of `{member_name}` moved since detection"));
            }
            plan_removal(source, &member)
        })
    }
}

/// Analyzable class named `name` whose body holds `line`
fn find_class<'t>(root: Node<'t>, source: &str, name: &str, line: usize) -> Option<Node<'t>> {
    let mut found = None;
    walk_all(root, &mut |node| {
        if node.kind() != "class_definition" {
            return;
        }
        let named = node
            .child_by_field_name("name")
            .is_some_and(|n| node_text(n, source) == name);
        let row = line.saturating_sub(1);
        let holds = node.start_position().row <= row && row <= node.end_position().row;
        if named && holds && is_analyzable_class(node, source) {
            // innermost wins
            found = Some(node);
        }
    });
    found
}

fn plan_removal(source: &str, member: &ClassMember<'_>) -> Plan {
    let mut removed_per_block: HashMap<usize, (Node<'_>, usize)> = HashMap::new();
    let mut edits = Vec::new();

    for definition in &member.definitions {
        if member.kind != MemberKind::Method && !is_removable_assignment(*definition) {
            return Err(format!(
                "`{}` has side effects",
                node_text(*definition, source).trim()
            ));
        }
        if !starts_line(source, definition.start_byte())
            || !ends_line(source, definition.end_byte())
        {
            return Err("definition shares its lines with other code".to_string());
        }
        let block = definition
            .parent()
            .ok_or_else(|| "definition has no enclosing block".to_string())?;
        removed_per_block
            .entry(block.id())
            .or_insert((block, 0))
            .1 += 1;
    }

    for definition in &member.definitions {
        let start = line_start(source, definition.start_byte());
        let end = line_end_inclusive(source, definition.end_byte());
        let emptied = definition.parent().is_some_and(|block| {
            removed_per_block
                .get(&block.id())
                .is_some_and(|(block, removed)| *removed == block_statements(*block).len())
        });
        let is_first_in_block = definition.prev_named_sibling().map_or(true, |previous| {
            !member.definitions.iter().any(|d| d.id() == previous.id())
        });
        if emptied && is_first_in_block {
            let indent = line_indent(source, definition.start_byte());
            edits.push(TextEdit::replace(start, end, format!("{indent}pass\n")));
        } else {
            edits.push(TextEdit::delete(start, end));
        }
    }
    Ok(edits)
}

/// Single-target assignment whose value can be dropped without observable
/// effect
fn is_removable_assignment(statement: Node<'_>) -> bool {
    let Some(assignment) = statement.named_child(0) else {
        return false;
    };
    if statement.kind() != "expression_statement"
        || statement.named_child_count() != 1
        || assignment.kind() != "assignment"
    {
        return false;
    }
    let single_target = assignment
        .child_by_field_name("left")
        .is_some_and(|left| matches!(left.kind(), "identifier" | "attribute"));
    let pure_value = assignment
        .child_by_field_name("right")
        .map_or(true, is_pure_expression);
    single_target && pure_value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DetectionConfig;
    use crate::refactor::test_support::{remaining, rewritten};
    use crate::core::ast_service::AstService;
    use crate::core::snapshot::ProjectSnapshot;
    use crate::detectors::test_support::analyze_source;
    use crate::detectors::unused_member::UnusedMemberAnalyzer;

    fn refactor_member(source: &str, member: &str) -> RefactorResult {
        let config = DetectionConfig::default();
        let smells = analyze_source(&UnusedMemberAnalyzer, "target.py", source, &config);
        let smell = smells
            .iter()
            .find(|smell| {
                matches!(
                    &smell.additional_info,
                    AdditionalInfo::UnusedMember { member_name, .. } if member_name == member
                )
            })
            .expect("member reported");
        let snapshot = ProjectSnapshot::from_files([("target.py", source)]);
        let service = AstService::new();
        let context = RefactorContext::new(&snapshot, &service, &config);
        UnusedMemberRefactorer.refactor(smell, &context)
    }

    const SOURCE: &str = "\
class Cache:
    limit = 10
    legacy = compute_default()

    def __init__(self):
        self.store = {}
        self.hits = 0

    def get(self, key):
        self.hits += 1
        return self.store.get(key)

    def _unused(self):
        return 1

c = Cache()
c.get('k')
print(c.limit)
";

    #[test]
    fn test_removes_unused_method() {
        let result = refactor_member(SOURCE, "_unused");
        let output = rewritten(&result);
        assert!(!output.contains("_unused"));
        assert!(output.contains("        return self.store.get(key)\n\n\nc = Cache()"));
        let left = remaining(SmellKind::UnusedMember, output, &DetectionConfig::default());
        assert!(left.iter().all(|smell| !smell.message.contains("_unused")));
    }

    #[test]
    fn test_side_effecting_attribute_is_skipped() {
        let result = refactor_member(SOURCE, "legacy");
        assert!(matches!(result, RefactorResult::Skipped { .. }));
    }

    #[test]
    fn test_emptied_block_gets_pass() {
        let source = "\
class Box:
    def __init__(self):
        self.size = 3

Box()
";
        let result = refactor_member(source, "size");
        assert_eq!(
            rewritten(&result),
            "\
class Box:
    def __init__(self):
        pass

Box()
"
        );
    }
}
