//! Lightweight cross-file symbol trace.
//!
//! One table per detector run. It maps module-level names of every file to
//! their origin (an import, a local binding, or an alias of another name),
//! maps dotted module paths to project files, and counts how often each name
//! is read anywhere in the project. It is not type inference: a name either
//! resolves through imports and simple aliases or it is reported unresolved.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tree_sitter::{Node, Tree};

use crate::core::ast_utils::{
    assigned_names, import_bindings, named_children, node_text, walk_all, walk_scope,
    ImportBinding,
};
use crate::core::smell::ChainOrigin;

/// Maximum number of alias hops followed when resolving a name
const MAX_ALIAS_HOPS: usize = 8;

/// Receivers that always refer to the enclosing object
const SELF_NAMES: &[&str] = &["self", "cls"];

/// Module-level symbols of one file
#[derive(Debug, Clone, Default)]
pub struct FileSymbols {
    /// Names bound by imports, keyed by local name
    pub imports: HashMap<String, ImportBinding>,
    /// Names bound by assignments, definitions, loops, ... (imports excluded)
    pub bindings: HashSet<String>,
    /// `name = other...` assignments; `None` when the name is bound in more
    /// than one way
    pub aliases: HashMap<String, Option<String>>,
    /// Read counts of identifiers, attribute names and identifier-like strings
    pub reads: HashMap<String, usize>,
}

impl FileSymbols {
    /// Collect the module-level symbols of a parsed file
    pub fn collect(root: Node<'_>, source: &str) -> Self {
        let imports = module_imports(root, source);
        let bindings = assigned_names(root, source)
            .into_iter()
            .filter(|name| !imports.contains_key(name))
            .collect();
        Self {
            imports,
            bindings,
            aliases: alias_roots(root, source),
            reads: collect_reads(root, source),
        }
    }
}

/// Names bound inside one function: parameters, locals and local aliases
#[derive(Debug, Clone, Default)]
pub struct LocalScope {
    /// Parameter names of the function
    pub parameters: HashSet<String>,
    /// Names assigned anywhere in the body
    pub bound: HashSet<String>,
    /// Identifier each simple assignment is rooted at; `None` when the
    /// assignments of a name disagree or have no identifier root
    pub aliases: HashMap<String, Option<String>>,
}

impl LocalScope {
    /// Scope of a `function_definition` node
    pub fn of_function(function: Node<'_>, source: &str) -> Self {
        let mut parameters = HashSet::new();
        if let Some(params) = function.child_by_field_name("parameters") {
            for param in named_children(params) {
                if let Some(name) = parameter_name(param, source) {
                    parameters.insert(name);
                }
            }
        }
        let (bound, aliases) = match function.child_by_field_name("body") {
            Some(body) => (assigned_names(body, source), alias_roots(body, source)),
            None => Default::default(),
        };
        Self {
            parameters,
            bound,
            aliases,
        }
    }

    fn is_parameter(&self, name: &str) -> bool {
        self.parameters.contains(name) || SELF_NAMES.contains(&name)
    }
}

fn parameter_name(param: Node<'_>, source: &str) -> Option<String> {
    match param.kind() {
        "identifier" => Some(node_text(param, source).to_string()),
        "default_parameter" | "typed_default_parameter" => param
            .child_by_field_name("name")
            .map(|n| node_text(n, source).to_string()),
        "typed_parameter" | "list_splat_pattern" | "dictionary_splat_pattern" => param
            .named_child(0)
            .filter(|child| child.kind() == "identifier")
            .map(|n| node_text(n, source).to_string()),
        _ => None,
    }
}

/// Explicit per-run lookup table for cross-file resolution and project-wide
/// reference counting
#[derive(Debug, Clone, Default)]
pub struct SymbolTrace {
    modules: HashMap<String, PathBuf>,
    ambiguous_modules: HashSet<String>,
    files: HashMap<PathBuf, FileSymbols>,
}

impl SymbolTrace {
    /// Build the module index for a project; file symbols are added with
    /// [`SymbolTrace::insert_file`].
    pub fn for_paths<'p>(paths: impl IntoIterator<Item = &'p PathBuf>) -> Self {
        let mut trace = Self::default();
        for path in paths {
            for name in module_names(path) {
                if trace.ambiguous_modules.contains(&name) {
                    continue;
                }
                if let Some(existing) = trace.modules.get(&name) {
                    if existing != path {
                        trace.modules.remove(&name);
                        trace.ambiguous_modules.insert(name);
                    }
                    continue;
                }
                trace.modules.insert(name, path.clone());
            }
        }
        trace
    }

    /// Add or replace the symbols of one file
    pub fn insert_file(&mut self, path: &Path, source: &str, tree: &Tree) {
        self.files
            .insert(path.to_path_buf(), FileSymbols::collect(tree.root_node(), source));
    }

    /// Symbols of a file, if it was inserted
    pub fn file(&self, path: &Path) -> Option<&FileSymbols> {
        self.files.get(path)
    }

    /// Number of files with symbols
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Project file that defines the dotted module `module`, as seen from
    /// `importer` (relative imports are resolved against its package)
    pub fn resolve_module(&self, importer: &Path, module: &str) -> Option<&PathBuf> {
        let absolute = absolutize_module(importer, module)?;
        self.modules.get(&absolute)
    }

    /// Project file an import binding points at. `from pkg import sub` may
    /// name a submodule rather than a member.
    pub fn resolve_import(&self, importer: &Path, binding: &ImportBinding) -> Option<&PathBuf> {
        if let Some(member) = &binding.member {
            let base = binding.module.trim_end_matches('.');
            let submodule = if base.is_empty() {
                format!("{}{member}", binding.module)
            } else {
                format!("{}.{member}", binding.module)
            };
            if let Some(path) = self.resolve_module(importer, &submodule) {
                return Some(path);
            }
            return self.resolve_module(importer, &binding.module);
        }
        // `import a.b` binds `a`; prefer the package, fall back to the leaf
        let head = binding.module.split('.').next().unwrap_or_default();
        if binding.local_name == head {
            self.resolve_module(importer, head)
                .or_else(|| self.resolve_module(importer, &binding.module))
        } else {
            self.resolve_module(importer, &binding.module)
        }
    }

    /// Where the value named `name` in `file` comes from. `scope` is the
    /// enclosing function, if any.
    pub fn resolve_name(&self, file: &Path, name: &str, scope: Option<&LocalScope>) -> ChainOrigin {
        let mut current = name.to_string();
        let mut scope = scope;
        let mut seen = HashSet::new();

        for _ in 0..MAX_ALIAS_HOPS {
            if !seen.insert(current.clone()) {
                return ChainOrigin::Local;
            }
            if let Some(local) = scope {
                if local.is_parameter(&current) {
                    return ChainOrigin::Local;
                }
                match local.aliases.get(&current) {
                    Some(Some(next)) => {
                        current = next.clone();
                        continue;
                    }
                    Some(None) => return ChainOrigin::Local,
                    None if local.bound.contains(&current) => return ChainOrigin::Local,
                    None => {}
                }
            }
            scope = None;

            let Some(symbols) = self.files.get(file) else {
                return ChainOrigin::Unresolved;
            };
            if let Some(binding) = symbols.imports.get(&current) {
                return match self.resolve_import(file, binding) {
                    Some(path) if path.as_path() != file => ChainOrigin::CrossFile {
                        module_file: path.clone(),
                    },
                    Some(_) => ChainOrigin::Local,
                    None => ChainOrigin::Unresolved,
                };
            }
            match symbols.aliases.get(&current) {
                Some(Some(next)) => {
                    current = next.clone();
                    continue;
                }
                Some(None) => return ChainOrigin::Local,
                None => {}
            }
            return if symbols.bindings.contains(&current) {
                ChainOrigin::Local
            } else {
                ChainOrigin::Unresolved
            };
        }
        ChainOrigin::Local
    }

    /// How often `name` is read anywhere in the project
    pub fn reference_count(&self, name: &str) -> usize {
        self.files
            .values()
            .map(|symbols| symbols.reads.get(name).copied().unwrap_or(0))
            .sum()
    }
}

/// Module-level import bindings of a file, keyed by local name
pub fn module_imports(root: Node<'_>, source: &str) -> HashMap<String, ImportBinding> {
    let mut imports = HashMap::new();
    walk_scope(root, &mut |node| {
        if matches!(node.kind(), "import_statement" | "import_from_statement") {
            for binding in import_bindings(node, source) {
                imports.insert(binding.local_name.clone(), binding);
            }
        }
    });
    imports
}

/// For every simple `name = expr` in the scope, the identifier `expr` is
/// rooted at (through attribute, subscript and call chains)
fn alias_roots(scope: Node<'_>, source: &str) -> HashMap<String, Option<String>> {
    let mut aliases: HashMap<String, Option<String>> = HashMap::new();
    walk_scope(scope, &mut |node| {
        if node.kind() != "assignment" {
            return;
        }
        let (Some(left), Some(right)) = (
            node.child_by_field_name("left"),
            node.child_by_field_name("right"),
        ) else {
            return;
        };
        if left.kind() != "identifier" {
            return;
        }
        let name = node_text(left, source).to_string();
        let root = expression_root(right).map(|root| node_text(root, source).to_string());
        aliases
            .entry(name)
            .and_modify(|existing| {
                if *existing != root {
                    *existing = None;
                }
            })
            .or_insert(root);
    });
    aliases
}

/// Identifier at the bottom of an attribute/subscript/call chain
pub fn expression_root(mut node: Node<'_>) -> Option<Node<'_>> {
    loop {
        node = match node.kind() {
            "identifier" => return Some(node),
            "attribute" => node.child_by_field_name("object")?,
            "subscript" => node.child_by_field_name("value")?,
            "call" => node.child_by_field_name("function")?,
            "parenthesized_expression" => node.named_child(0)?,
            _ => return None,
        };
    }
}

fn collect_reads(root: Node<'_>, source: &str) -> HashMap<String, usize> {
    let mut reads: HashMap<String, usize> = HashMap::new();
    walk_all(root, &mut |node| match node.kind() {
        "identifier" if !is_write_position(node) => {
            *reads.entry(node_text(node, source).to_string()).or_default() += 1;
        }
        "string_content" => {
            let text = node_text(node, source);
            if is_identifier_like(text) {
                *reads.entry(text.to_string()).or_default() += 1;
            }
        }
        _ => {}
    });
    reads
}

fn is_identifier_like(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Definition names and plain assignment targets are writes, not reads.
/// Augmented assignments read their target.
fn is_write_position(identifier: Node<'_>) -> bool {
    let Some(parent) = identifier.parent() else {
        return false;
    };
    if matches!(parent.kind(), "function_definition" | "class_definition")
        && parent
            .child_by_field_name("name")
            .is_some_and(|name| name.id() == identifier.id())
    {
        return true;
    }

    // `obj.name = ...` writes `name`; walk up to the assignment target
    let mut target = identifier;
    if parent.kind() == "attribute" {
        let is_attr_name = parent
            .child_by_field_name("attribute")
            .is_some_and(|attr| attr.id() == identifier.id());
        if !is_attr_name {
            return false;
        }
        target = parent;
    }
    let mut current = target;
    while let Some(up) = current.parent() {
        match up.kind() {
            "pattern_list" | "tuple_pattern" | "list_pattern" => current = up,
            "assignment" => {
                return up
                    .child_by_field_name("left")
                    .is_some_and(|left| left.id() == current.id());
            }
            _ => return false,
        }
    }
    false
}

/// Dotted module names a project file can be imported as. The full
/// path-derived name comes first, followed by its suffixes so that scripts
/// importing siblings (`import helpers`) resolve too.
fn module_names(path: &Path) -> Vec<String> {
    let Some(full) = path_module_name(path) else {
        return Vec::new();
    };
    let parts: Vec<&str> = full.split('.').collect();
    (0..parts.len()).map(|start| parts[start..].join(".")).collect()
}

fn path_module_name(path: &Path) -> Option<String> {
    if path.extension().and_then(|ext| ext.to_str()) != Some("py") {
        return None;
    }
    let mut parts: Vec<String> = path
        .with_extension("")
        .components()
        .filter_map(|component| match component {
            std::path::Component::Normal(part) => part.to_str().map(str::to_string),
            _ => None,
        })
        .collect();
    if parts.last().is_some_and(|last| last == "__init__") {
        parts.pop();
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("."))
    }
}

/// Turn `..models` (relative to `importer`) into an absolute dotted name
fn absolutize_module(importer: &Path, module: &str) -> Option<String> {
    let dots = module.chars().take_while(|c| *c == '.').count();
    if dots == 0 {
        return Some(module.to_string());
    }
    let mut package: Vec<String> = importer
        .parent()
        .map(|parent| {
            parent
                .components()
                .filter_map(|c| match c {
                    std::path::Component::Normal(part) => part.to_str().map(str::to_string),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    for _ in 1..dots {
        package.pop()?;
    }
    let rest = &module[dots..];
    if !rest.is_empty() {
        package.push(rest.to_string());
    }
    if package.is_empty() {
        None
    } else {
        Some(package.join("."))
    }
}
