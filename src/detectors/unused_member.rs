//! Class members that nothing in the project reads.
//!
//! References come from the project-wide read index in the symbol trace, so
//! a member used from any file counts as used. Dynamic dispatch through
//! computed names (`getattr(obj, name)`) cannot be seen and may produce
//! false positives; identifier-like string literals are counted as reads to
//! cover the common `getattr(obj, "name")` case.

use tree_sitter::Node;

use crate::core::ast_utils::{
    block_statements, enclosing_statement, named_children, node_text, walk_all, walk_scope,
};
use crate::core::errors::Result;
use crate::core::smell::{AdditionalInfo, MemberKind, Occurrence, Smell, SmellKind};
use crate::detectors::symbol_trace::FileSymbols;
use crate::detectors::{AnalysisContext, Analyzer, CodeUnit};

/// Framework hooks that are called by name from outside the project
const HOOK_NAMES: &[&str] = &[
    "setUp",
    "tearDown",
    "setUpClass",
    "tearDownClass",
    "asyncSetUp",
    "asyncTearDown",
    "setup_method",
    "teardown_method",
];

/// Decorators that keep a method a plain callable member
const TRANSPARENT_DECORATORS: &[&str] = &["staticmethod", "classmethod"];

/// Flags methods and attributes that are defined but never read
#[derive(Debug, Default, Clone, Copy)]
pub struct UnusedMemberAnalyzer;

impl Analyzer for UnusedMemberAnalyzer {
    fn name(&self) -> &str {
        "unused-member"
    }

    fn kind(&self) -> SmellKind {
        SmellKind::UnusedMember
    }

    fn analyze(&self, unit: &CodeUnit, context: &AnalysisContext<'_>) -> Result<Vec<Smell>> {
        let source = unit.source();
        // a unit outside the trace only sees its own reads
        let local_reads = match context.symbols.file(unit.path()) {
            Some(_) => None,
            None => Some(FileSymbols::collect(unit.root(), source).reads),
        };
        let reference_count = |name: &str| match &local_reads {
            Some(reads) => reads.get(name).copied().unwrap_or(0),
            None => context.symbols.reference_count(name),
        };

        let mut classes = Vec::new();
        walk_all(unit.root(), &mut |node| {
            if node.kind() == "class_definition" {
                classes.push(node);
            }
        });

        let mut smells = Vec::new();
        for class in classes {
            if !is_analyzable_class(class, source) {
                continue;
            }
            let class_name = class
                .child_by_field_name("name")
                .map(|name| node_text(name, source).to_string())
                .unwrap_or_default();

            for member in class_members(class, source) {
                if reference_count(&member.name) > 0 {
                    continue;
                }
                let what = match member.kind {
                    MemberKind::Method => "Method",
                    MemberKind::InstanceAttribute => "Instance attribute",
                    MemberKind::ClassAttribute => "Class attribute",
                };
                smells.push(Smell::new(
                    SmellKind::UnusedMember,
                    unit.path(),
                    member.definitions.iter().map(Occurrence::from_node).collect(),
                    AdditionalInfo::UnusedMember {
                        class_name: class_name.clone(),
                        member_name: member.name.clone(),
                        member_kind: member.kind,
                    },
                    context.severity(
                        SmellKind::UnusedMember,
                        SmellKind::UnusedMember.default_severity(),
                    ),
                    format!(
                        "{what} `{class_name}.{}` is never referenced in the project",
                        member.name
                    ),
                ));
            }
        }

        Ok(smells)
    }
}

/// A candidate member and the statements that define it
#[derive(Debug, Clone)]
pub(crate) struct ClassMember<'t> {
    pub name: String,
    pub kind: MemberKind,
    /// Defining statements in document order
    pub definitions: Vec<Node<'t>>,
}

/// Classes with base classes, metaclasses or decorators may have their
/// members reached through code we cannot see
pub(crate) fn is_analyzable_class(class: Node<'_>, source: &str) -> bool {
    if class
        .parent()
        .is_some_and(|parent| parent.kind() == "decorated_definition")
    {
        return false;
    }
    match class.child_by_field_name("superclasses") {
        None => true,
        Some(bases) => named_children(bases)
            .into_iter()
            .all(|base| base.kind() == "identifier" && node_text(base, source) == "object"),
    }
}

fn is_exempt(name: &str) -> bool {
    (name.starts_with("__") && name.ends_with("__"))
        || name.starts_with("test")
        || HOOK_NAMES.contains(&name)
}

/// Members of `class` eligible for the unused check
pub(crate) fn class_members<'t>(class: Node<'t>, source: &str) -> Vec<ClassMember<'t>> {
    let Some(body) = class.child_by_field_name("body") else {
        return Vec::new();
    };

    let mut members: Vec<PendingMember<'t>> = Vec::new();
    let mut blocked: Vec<String> = Vec::new();
    let mut methods = Vec::new();

    for statement in block_statements(body) {
        match statement.kind() {
            "function_definition" => {
                methods.push((statement, true));
                if let Some(name) = definition_name(statement, source) {
                    add_definition(&mut members, name, MemberKind::Method, statement);
                }
            }
            "decorated_definition" => {
                let Some(definition) = statement.child_by_field_name("definition") else {
                    continue;
                };
                let Some(name) = definition_name(definition, source) else {
                    continue;
                };
                if definition.kind() != "function_definition" {
                    blocked.push(name);
                    continue;
                }
                let decorators: Vec<String> = named_children(statement)
                    .into_iter()
                    .filter(|child| child.kind() == "decorator")
                    .map(|decorator| {
                        node_text(decorator, source)
                            .trim_start_matches('@')
                            .trim()
                            .to_string()
                    })
                    .collect();
                let is_static = decorators.iter().any(|d| d == "staticmethod");
                methods.push((definition, !is_static));
                if decorators
                    .iter()
                    .all(|decorator| TRANSPARENT_DECORATORS.contains(&decorator.as_str()))
                {
                    add_definition(&mut members, name, MemberKind::Method, statement);
                } else {
                    blocked.push(name);
                }
            }
            "expression_statement" => {
                let Some(assignment) = statement.named_child(0) else {
                    continue;
                };
                if assignment.kind() != "assignment" {
                    continue;
                }
                if let Some(left) = assignment.child_by_field_name("left") {
                    if left.kind() == "identifier" {
                        let name = node_text(left, source).to_string();
                        add_definition(&mut members, name, MemberKind::ClassAttribute, statement);
                    }
                }
            }
            _ => {}
        }
    }

    for (method, binds_self) in methods {
        if !binds_self {
            continue;
        }
        let Some(receiver) = first_parameter(method, source) else {
            continue;
        };
        let Some(method_body) = method.child_by_field_name("body") else {
            continue;
        };
        let mut writes = Vec::new();
        walk_scope(method_body, &mut |node| {
            if node.kind() != "assignment" {
                return;
            }
            let Some(left) = node.child_by_field_name("left") else {
                return;
            };
            let mut targets = vec![left];
            if matches!(left.kind(), "pattern_list" | "tuple_pattern" | "list_pattern") {
                targets = named_children(left);
            }
            for target in targets {
                if target.kind() != "attribute" {
                    continue;
                }
                let is_receiver = target
                    .child_by_field_name("object")
                    .is_some_and(|object| node_text(object, source) == receiver);
                if let (true, Some(attribute), Some(statement)) = (
                    is_receiver,
                    target.child_by_field_name("attribute"),
                    enclosing_statement(node),
                ) {
                    writes.push((node_text(attribute, source).to_string(), statement));
                }
            }
        });
        for (name, statement) in writes {
            add_definition(&mut members, name, MemberKind::InstanceAttribute, statement);
        }
    }

    members
        .into_iter()
        .filter(|member| {
            !member.mixed && !is_exempt(&member.name) && !blocked.contains(&member.name)
        })
        .map(|member| ClassMember {
            name: member.name,
            kind: member.kind,
            definitions: member.definitions,
        })
        .collect()
}

struct PendingMember<'t> {
    name: String,
    kind: MemberKind,
    definitions: Vec<Node<'t>>,
    /// defined both as a method and as an attribute (or class and instance)
    mixed: bool,
}

fn add_definition<'t>(
    members: &mut Vec<PendingMember<'t>>,
    name: String,
    kind: MemberKind,
    statement: Node<'t>,
) {
    match members.iter_mut().find(|member| member.name == name) {
        Some(member) => {
            member.mixed |= member.kind != kind;
            if !member.definitions.iter().any(|d| d.id() == statement.id()) {
                member.definitions.push(statement);
            }
        }
        None => members.push(PendingMember {
            name,
            kind,
            definitions: vec![statement],
            mixed: false,
        }),
    }
}

fn definition_name(definition: Node<'_>, source: &str) -> Option<String> {
    definition
        .child_by_field_name("name")
        .map(|name| node_text(name, source).to_string())
}

fn first_parameter<'s>(method: Node<'_>, source: &'s str) -> Option<&'s str> {
    let parameters = method.child_by_field_name("parameters")?;
    let first = named_children(parameters).into_iter().next()?;
    (first.kind() == "identifier").then(|| node_text(first, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DetectionConfig;
    use crate::core::smell::Severity;
    use crate::detectors::test_support::{analyze_project, analyze_source};

    fn members(smells: &[Smell]) -> Vec<(String, MemberKind)> {
        smells
            .iter()
            .map(|smell| match &smell.additional_info {
                AdditionalInfo::UnusedMember {
                    member_name,
                    member_kind,
                    ..
                } => (member_name.clone(), *member_kind),
                other => panic!("unexpected info {other:?}"),
            })
            .collect()
    }

    const ACCOUNT: &str = "\
class Account:
    rate = 0.1
    legacy_flag = True

    def __init__(self, owner):
        self.owner = owner
        self.cache = {}

    def describe(self):
        return self.owner + str(self.rate)

    def _old_helper(self):
        return 1

    @staticmethod
    def build():
        return Account('x')

    @property
    def label(self):
        return 'a'

    def test_something(self):
        pass
";

    #[test]
    fn test_reports_unread_members() {
        let usage = "from account import Account\nAccount.build().describe()\n";
        let smells = analyze_project(
            &UnusedMemberAnalyzer,
            &[("account.py", ACCOUNT), ("main.py", usage)],
            "account.py",
            &DetectionConfig::default(),
        );
        let found = members(&smells);
        assert!(found.contains(&("legacy_flag".to_string(), MemberKind::ClassAttribute)));
        assert!(found.contains(&("cache".to_string(), MemberKind::InstanceAttribute)));
        assert!(found.contains(&("_old_helper".to_string(), MemberKind::Method)));
        // read somewhere, dunder, decorated or framework hooks
        for name in ["rate", "owner", "describe", "build", "__init__", "label", "test_something"] {
            assert!(!found.iter().any(|(n, _)| n == name), "{name} should not be reported");
        }
        assert!(smells.iter().all(|smell| smell.severity == Severity::Low));
    }

    #[test]
    fn test_without_cross_file_usage_build_is_unused() {
        let smells = analyze_source(
            &UnusedMemberAnalyzer,
            "account.py",
            ACCOUNT,
            &DetectionConfig::default(),
        );
        let found = members(&smells);
        assert!(found.iter().any(|(n, _)| n == "describe"));
        // `Account('x')` inside build reads nothing named build
        assert!(found.iter().any(|(n, _)| n == "build"));
    }

    #[test]
    fn test_subclasses_are_skipped() {
        let source = "class Child(Base):\n    def hook(self):\n        return 1\n";
        let smells =
            analyze_source(&UnusedMemberAnalyzer, "c.py", source, &DetectionConfig::default());
        assert!(smells.is_empty());
        let source = "class Plain(object):\n    def hook(self):\n        return 1\n";
        let smells =
            analyze_source(&UnusedMemberAnalyzer, "c.py", source, &DetectionConfig::default());
        assert_eq!(smells.len(), 1);
    }

    #[test]
    fn test_getattr_string_counts_as_use() {
        let source = "class Plugin:\n    def run(self):\n        pass\n\ngetattr(Plugin(), 'run')()\n";
        let smells =
            analyze_source(&UnusedMemberAnalyzer, "p.py", source, &DetectionConfig::default());
        assert!(smells.is_empty());
    }
}
