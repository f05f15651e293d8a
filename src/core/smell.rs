//! Smell data model shared by analyzers, refactorers and the pipeline.
//!
//! A [`Smell`] is an immutable record of one detected defect. Its
//! [`Occurrence`]s are positions in the exact source text it was computed
//! from; once that text changes the occurrences must be refreshed before use.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SmellwrightError};

/// Closed taxonomy of detectable smells.
///
/// Adding a kind means adding a variant here; the analyzer and refactorer
/// registries match on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SmellKind {
    ExcessiveNesting,
    LongAttributeChain,
    RepeatedCallInLoop,
    StringConcatInLoop,
    UnusedMember,
}

impl SmellKind {
    /// Version of the taxonomy; bump when a kind is added or removed.
    pub const TAXONOMY_VERSION: u32 = 1;

    /// Every kind, in registration order.
    pub const ALL: [SmellKind; 5] = [
        SmellKind::ExcessiveNesting,
        SmellKind::LongAttributeChain,
        SmellKind::RepeatedCallInLoop,
        SmellKind::StringConcatInLoop,
        SmellKind::UnusedMember,
    ];

    /// Stable kebab-case identifier
    pub fn as_str(self) -> &'static str {
        match self {
            SmellKind::ExcessiveNesting => "excessive-nesting",
            SmellKind::LongAttributeChain => "long-attribute-chain",
            SmellKind::RepeatedCallInLoop => "repeated-call-in-loop",
            SmellKind::StringConcatInLoop => "string-concat-in-loop",
            SmellKind::UnusedMember => "unused-member",
        }
    }

    /// Severity used when configuration does not override it
    pub fn default_severity(self) -> Severity {
        match self {
            SmellKind::ExcessiveNesting => Severity::High,
            SmellKind::RepeatedCallInLoop | SmellKind::StringConcatInLoop => Severity::Medium,
            SmellKind::LongAttributeChain => Severity::Medium,
            SmellKind::UnusedMember => Severity::Low,
        }
    }
}

impl fmt::Display for SmellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SmellKind {
    type Err = SmellwrightError;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        SmellKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| SmellwrightError::Validation {
                message: format!("Unknown smell kind: {value}"),
                field: Some("enabled_smell_kinds".to_string()),
                expected: Some(
                    SmellKind::ALL
                        .iter()
                        .map(|k| k.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
                actual: Some(value.to_string()),
            })
    }
}

/// Ordinal used for refactor ordering; higher is fixed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Severity {
    /// Next severity up, saturating at `Critical`
    pub fn escalate(self) -> Self {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// A half-open source span. Lines and columns are 1-based; columns are byte
/// offsets within the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Occurrence {
    /// First line of the span
    pub line: usize,
    /// Last line of the span
    pub end_line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_column: Option<usize>,
}

impl Occurrence {
    /// Single-line occurrence without column information
    pub fn line(line: usize) -> Self {
        Self {
            line,
            end_line: line,
            column: None,
            end_column: None,
        }
    }

    /// Fully specified span
    pub fn span(line: usize, column: usize, end_line: usize, end_column: usize) -> Self {
        Self {
            line,
            end_line,
            column: Some(column),
            end_column: Some(end_column),
        }
    }

    /// Span of a tree-sitter node
    pub fn from_node(node: &tree_sitter::Node<'_>) -> Self {
        let start = node.start_position();
        let end = node.end_position();
        Self::span(start.row + 1, start.column + 1, end.row + 1, end.column + 1)
    }

    /// Check the ordering invariant of the span itself
    pub fn check_ordering(&self) -> std::result::Result<(), String> {
        if self.line == 0 {
            return Err("line numbers are 1-based".to_string());
        }
        if self.end_line < self.line {
            return Err(format!(
                "end line {} precedes start line {}",
                self.end_line, self.line
            ));
        }
        if let (Some(column), Some(end_column)) = (self.column, self.end_column) {
            if column == 0 || end_column == 0 {
                return Err("columns are 1-based".to_string());
            }
            if self.end_line == self.line && end_column < column {
                return Err(format!(
                    "end column {end_column} precedes start column {column} on line {}",
                    self.line
                ));
            }
        }
        Ok(())
    }

    /// Byte offset of the span start inside `source`, if representable
    pub fn start_byte(&self, source: &str) -> Option<usize> {
        line_column_to_byte(source, self.line, self.column.unwrap_or(1))
    }

    /// Byte offset of the span end inside `source`, if representable
    pub fn end_byte(&self, source: &str) -> Option<usize> {
        match self.end_column {
            Some(column) => line_column_to_byte(source, self.end_line, column),
            None => line_end_byte(source, self.end_line),
        }
    }

    /// Text covered by the span in `source`
    pub fn text<'s>(&self, source: &'s str) -> Option<&'s str> {
        let start = self.start_byte(source)?;
        let end = self.end_byte(source)?;
        source.get(start..end)
    }

    /// True when `line` falls inside this span
    pub fn contains_line(&self, line: usize) -> bool {
        self.line <= line && line <= self.end_line
    }
}

fn line_column_to_byte(source: &str, line: usize, column: usize) -> Option<usize> {
    let line_start = line_start_byte(source, line)?;
    let line_len = source[line_start..]
        .find('\n')
        .unwrap_or(source.len() - line_start);
    // column may point one past the last byte (exclusive end)
    if column == 0 || column - 1 > line_len {
        return None;
    }
    Some(line_start + column - 1)
}

fn line_start_byte(source: &str, line: usize) -> Option<usize> {
    if line == 0 {
        return None;
    }
    if line == 1 {
        return Some(0);
    }
    source
        .match_indices('\n')
        .nth(line - 2)
        .map(|(idx, _)| idx + 1)
        .filter(|&start| start <= source.len())
}

fn line_end_byte(source: &str, line: usize) -> Option<usize> {
    let start = line_start_byte(source, line)?;
    Some(
        source[start..]
            .find('\n')
            .map_or(source.len(), |offset| start + offset),
    )
}

/// How an attribute chain's root value was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum ChainOrigin {
    /// Bound in the same file (local, parameter, module global, or an expression)
    Local,
    /// Imported from another module of the project
    CrossFile { module_file: PathBuf },
    /// Could not be resolved (builtin, third-party import, or unknown name)
    Unresolved,
}

/// Confidence attached to a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
}

/// Which kind of class member an unused-member smell refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Method,
    InstanceAttribute,
    ClassAttribute,
}

/// Kind-specific measurements needed to decide how to refactor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AdditionalInfo {
    /// Details of an excessive-nesting smell
    ExcessiveNesting {
        /// Deepest loop nesting in the scope
        depth: usize,
        /// `None` for module-level code
        function_name: Option<String>,
        /// Span of the measured scope
        function_span: Occurrence,
    },
    /// Details of a long-attribute-chain smell
    LongAttributeChain {
        /// Number of access steps after the root
        chain_length: usize,
        /// Source text of the whole chain
        chain_text: String,
        /// Identifier the chain starts from, when it starts from one
        root_name: Option<String>,
        /// Header line of the loop the chain sits in
        enclosing_loop_line: Option<usize>,
        /// Where the root is bound
        origin: ChainOrigin,
        /// `Low` when the root is bound outside this file or not at all
        confidence: Confidence,
    },
    /// Details of a repeated-call-in-loop smell
    RepeatedCallInLoop {
        /// Source text of the call
        call_text: String,
        /// Estimated total executions; `None` when the trip count is unknown
        repetitions: Option<usize>,
        /// Unconditional occurrences per loop iteration
        occurrences_per_iteration: usize,
        /// Line of the loop header
        loop_line: usize,
        /// Loop header with whitespace collapsed
        loop_header: String,
    },
    /// Details of a string-concat-in-loop smell
    StringConcatInLoop {
        /// Variable rebuilt by concatenation
        variable: String,
        /// Concatenations per iteration
        concat_count: usize,
        /// Line of the loop header
        loop_line: usize,
        /// Loop header with whitespace collapsed
        loop_header: String,
    },
    /// Details of an unused-member smell
    UnusedMember {
        /// Class that defines the member
        class_name: String,
        /// Unreferenced member name
        member_name: String,
        /// Method or attribute
        member_kind: MemberKind,
    },
    /// No details
    Empty,
}

impl AdditionalInfo {
    /// Smell kind this payload belongs to; `None` for the empty variant
    pub fn kind(&self) -> Option<SmellKind> {
        match self {
            AdditionalInfo::ExcessiveNesting { .. } => Some(SmellKind::ExcessiveNesting),
            AdditionalInfo::LongAttributeChain { .. } => Some(SmellKind::LongAttributeChain),
            AdditionalInfo::RepeatedCallInLoop { .. } => Some(SmellKind::RepeatedCallInLoop),
            AdditionalInfo::StringConcatInLoop { .. } => Some(SmellKind::StringConcatInLoop),
            AdditionalInfo::UnusedMember { .. } => Some(SmellKind::UnusedMember),
            AdditionalInfo::Empty => None,
        }
    }
}

/// One detected defect instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Smell {
    /// blake3 digest of kind, file and primary span
    pub id: String,
    /// Smell taxonomy entry
    pub kind: SmellKind,
    /// Project-relative path of the file
    pub file_path: PathBuf,
    /// Primary occurrence first
    pub occurrences: Vec<Occurrence>,
    /// Kind-specific details
    pub additional_info: AdditionalInfo,
    /// Severity after configured overrides
    pub severity: Severity,
    /// Human-readable description
    pub message: String,
}

impl Smell {
    /// Build a smell; the id is derived from kind, file and primary span so
    /// that identical inputs always produce identical ids.
    pub fn new(
        kind: SmellKind,
        file_path: impl Into<PathBuf>,
        occurrences: Vec<Occurrence>,
        additional_info: AdditionalInfo,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        let file_path = file_path.into();
        let id = smell_id(kind, &file_path, occurrences.first());
        Self {
            id,
            kind,
            file_path,
            occurrences,
            additional_info,
            severity,
            message: message.into(),
        }
    }

    /// Primary occurrence. Smells built through [`Smell::new`] and checked by
    /// [`validate`] always have one.
    pub fn primary(&self) -> Option<&Occurrence> {
        self.occurrences.first()
    }

    /// Line of the primary occurrence (0 when missing)
    pub fn primary_line(&self) -> usize {
        self.primary().map_or(0, |occ| occ.line)
    }

    /// Kind-specific logical location, stable across edits that only shift
    /// line numbers. Two smells with the same key describe the same defect.
    pub fn logical_key(&self) -> String {
        let detail = match &self.additional_info {
            AdditionalInfo::ExcessiveNesting { function_name, .. } => function_name
                .clone()
                .unwrap_or_else(|| "<module>".to_string()),
            AdditionalInfo::LongAttributeChain { chain_text, .. } => chain_text.clone(),
            AdditionalInfo::RepeatedCallInLoop {
                call_text,
                loop_header,
                ..
            } => format!("{call_text}@{loop_header}"),
            AdditionalInfo::StringConcatInLoop {
                variable,
                loop_header,
                ..
            } => format!("{variable}@{loop_header}"),
            AdditionalInfo::UnusedMember {
                class_name,
                member_name,
                ..
            } => format!("{class_name}.{member_name}"),
            AdditionalInfo::Empty => format!("line:{}", self.primary_line()),
        };
        format!("{}|{}|{}", self.file_path.display(), self.kind, detail)
    }

    /// True when the detection is flagged as low confidence
    pub fn is_low_confidence(&self) -> bool {
        matches!(
            self.additional_info,
            AdditionalInfo::LongAttributeChain {
                confidence: Confidence::Low,
                ..
            }
        )
    }
}

fn smell_id(kind: SmellKind, file_path: &std::path::Path, primary: Option<&Occurrence>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(file_path.to_string_lossy().as_bytes());
    if let Some(occ) = primary {
        hasher.update(&occ.line.to_le_bytes());
        hasher.update(&occ.column.unwrap_or(0).to_le_bytes());
        hasher.update(&occ.end_line.to_le_bytes());
        hasher.update(&occ.end_column.unwrap_or(0).to_le_bytes());
    }
    let hex = hasher.finalize().to_hex();
    format!("{}-{}", kind.as_str(), &hex.as_str()[..12])
}

/// Check a smell against the span invariants and the bounds of the source it
/// refers to.
pub fn validate(smell: &Smell, source: &str) -> Result<()> {
    let invalid = |reason: String| SmellwrightError::invalid_smell(&smell.id, reason);

    if smell.occurrences.is_empty() {
        return Err(invalid("smell has no occurrences".to_string()));
    }
    if let Some(kind) = smell.additional_info.kind() {
        if kind != smell.kind {
            return Err(invalid(format!(
                "additional info is for {kind}, smell is {}",
                smell.kind
            )));
        }
    }

    let line_count = source.lines().count().max(1);
    for occurrence in &smell.occurrences {
        occurrence.check_ordering().map_err(invalid)?;
        if occurrence.end_line > line_count {
            return Err(invalid(format!(
                "line {} is past the end of the file ({line_count} lines)",
                occurrence.end_line
            )));
        }
        if occurrence.column.is_some() && occurrence.start_byte(source).is_none() {
            return Err(invalid(format!(
                "column {:?} is outside line {}",
                occurrence.column, occurrence.line
            )));
        }
        if occurrence.end_column.is_some() && occurrence.end_byte(source).is_none() {
            return Err(invalid(format!(
                "end column {:?} is outside line {}",
                occurrence.end_column, occurrence.end_line
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_smell(occurrences: Vec<Occurrence>) -> Smell {
        Smell::new(
            SmellKind::UnusedMember,
            "pkg/a.py",
            occurrences,
            AdditionalInfo::UnusedMember {
                class_name: "A".to_string(),
                member_name: "m".to_string(),
                member_kind: MemberKind::Method,
            },
            Severity::Low,
            "unused",
        )
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in SmellKind::ALL {
            assert_eq!(kind.as_str().parse::<SmellKind>().unwrap(), kind);
        }
        assert_eq!(
            "repeated_call_in_loop".parse::<SmellKind>().unwrap(),
            SmellKind::RepeatedCallInLoop
        );
        assert!("god-object".parse::<SmellKind>().is_err());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low < Severity::Medium);
        assert_eq!(Severity::High.escalate(), Severity::Critical);
        assert_eq!(Severity::Critical.escalate(), Severity::Critical);
    }

    #[test]
    fn test_occurrence_text_extraction() {
        let source = "a = 1\nvalue = obj.x.y\n";
        let occ = Occurrence::span(2, 9, 2, 16);
        assert_eq!(occ.text(source), Some("obj.x.y"));
        assert_eq!(Occurrence::line(1).text(source), Some("a = 1"));
    }

    #[test]
    fn test_validate_accepts_in_bounds_smell() {
        let source = "class A:\n    def m(self):\n        pass\n";
        let smell = sample_smell(vec![Occurrence::span(2, 5, 3, 13)]);
        assert!(validate(&smell, source).is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_bounds_line() {
        let source = "x = 1\n";
        let smell = sample_smell(vec![Occurrence::line(4)]);
        let err = validate(&smell, source).unwrap_err();
        assert!(matches!(err, SmellwrightError::InvalidSmell { .. }));
    }

    #[test]
    fn test_validate_rejects_reversed_span() {
        let source = "x = 1\ny = 2\n";
        let smell = sample_smell(vec![Occurrence::span(2, 1, 1, 1)]);
        assert!(validate(&smell, source).is_err());

        let smell = sample_smell(vec![Occurrence::span(1, 4, 1, 2)]);
        assert!(validate(&smell, source).is_err());
    }

    #[test]
    fn test_validate_rejects_column_past_line_end() {
        let source = "x = 1\n";
        let smell = sample_smell(vec![Occurrence::span(1, 1, 1, 30)]);
        assert!(validate(&smell, source).is_err());
    }

    #[test]
    fn test_validate_rejects_mismatched_payload() {
        let source = "x = 1\n";
        let mut smell = sample_smell(vec![Occurrence::line(1)]);
        smell.kind = SmellKind::ExcessiveNesting;
        assert!(validate(&smell, source).is_err());
    }

    #[test]
    fn test_ids_are_deterministic_and_distinct() {
        let a = sample_smell(vec![Occurrence::line(2)]);
        let b = sample_smell(vec![Occurrence::line(2)]);
        let c = sample_smell(vec![Occurrence::line(3)]);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert!(a.id.starts_with("unused-member-"));
    }

    #[test]
    fn test_logical_key_ignores_line_numbers() {
        let a = sample_smell(vec![Occurrence::line(2)]);
        let b = sample_smell(vec![Occurrence::line(9)]);
        assert_eq!(a.logical_key(), b.logical_key());
    }

    proptest! {
        #[test]
        fn prop_ordered_spans_pass_ordering_check(
            line in 1usize..500,
            extra in 0usize..50,
            col in 1usize..120,
            end_col in 1usize..120,
        ) {
            let end_line = line + extra;
            let occ = Occurrence::span(line, col, end_line, end_col);
            let ok = occ.check_ordering().is_ok();
            let expected = extra > 0 || end_col >= col;
            prop_assert_eq!(ok, expected);
        }
    }
}
