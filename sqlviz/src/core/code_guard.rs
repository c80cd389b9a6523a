//! Structural safety checks for model-generated Python rendering snippets.
//!
//! The snippet is parsed with tree-sitter and walked in document order. Each
//! node is matched against the import allow-list, the call deny-list and the
//! forbidden method table. Anything the walker cannot prove safe is rejected
//! and the first violation wins.

use tree_sitter::{Language, Node, Parser, Tree};

use crate::core::types::ValidationVerdict;

/// Name of the function the rendering host calls.
pub const ENTRY_POINT: &str = "render_visualization";
/// Exact parameter order of the entry point.
pub const ENTRY_POINT_PARAMS: [&str; 3] = ["viz_type", "columns", "rows"];

/// Top-level modules a snippet may import (libraries and their usual aliases).
pub const ALLOWED_IMPORTS: &[&str] = &["pandas", "pd", "streamlit", "st", "plotly", "px"];

/// Builtins that evaluate code, import modules, touch files or read input.
pub const DENIED_CALLS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "__import__",
    "open",
    "file",
    "input",
    "raw_input",
    "getattr",
    "setattr",
    "delattr",
    "globals",
    "locals",
    "vars",
    "breakpoint",
    "__builtins__",
];

/// Methods rejected on any receiver: they write files or evaluate strings.
const DENIED_ANY_RECEIVER: &[&str] = &[
    "to_csv",
    "to_excel",
    "to_parquet",
    "to_pickle",
    "to_hdf",
    "to_sql",
    "to_feather",
    "to_orc",
    "to_stata",
    "to_clipboard",
    "write_html",
    "write_image",
    "write_json",
    "eval",
];

const PANDAS_IO: &[&str] = &[
    "read_csv",
    "read_table",
    "read_fwf",
    "read_json",
    "read_html",
    "read_xml",
    "read_excel",
    "read_parquet",
    "read_feather",
    "read_orc",
    "read_pickle",
    "read_hdf",
    "read_sql",
    "read_sql_query",
    "read_sql_table",
    "read_stata",
    "read_sas",
    "read_spss",
    "read_clipboard",
    "read_gbq",
    "to_pickle",
    "eval",
];

#[derive(Debug, Clone, Copy)]
enum MethodRule {
    /// The module's entire surface is denied.
    AnyMethod,
    /// Only the listed methods are denied.
    Only(&'static [&'static str]),
}

impl MethodRule {
    fn forbids(self, method: &str) -> bool {
        match self {
            MethodRule::AnyMethod => true,
            MethodRule::Only(methods) => methods.contains(&method),
        }
    }
}

const FORBIDDEN_METHODS: &[(&str, MethodRule)] = &[
    ("os", MethodRule::AnyMethod),
    ("subprocess", MethodRule::AnyMethod),
    ("shutil", MethodRule::AnyMethod),
    ("socket", MethodRule::AnyMethod),
    ("pty", MethodRule::AnyMethod),
    ("signal", MethodRule::AnyMethod),
    ("ctypes", MethodRule::AnyMethod),
    ("importlib", MethodRule::AnyMethod),
    ("builtins", MethodRule::AnyMethod),
    ("pickle", MethodRule::AnyMethod),
    ("marshal", MethodRule::AnyMethod),
    ("multiprocessing", MethodRule::AnyMethod),
    ("requests", MethodRule::AnyMethod),
    ("urllib", MethodRule::AnyMethod),
    ("http", MethodRule::AnyMethod),
    (
        "sys",
        MethodRule::Only(&[
            "exit",
            "settrace",
            "setprofile",
            "addaudithook",
            "setrecursionlimit",
            "_getframe",
        ]),
    ),
    ("pandas", MethodRule::Only(PANDAS_IO)),
    ("pd", MethodRule::Only(PANDAS_IO)),
];

fn method_rule(module: &str) -> Option<MethodRule> {
    FORBIDDEN_METHODS
        .iter()
        .find(|(name, _)| *name == module)
        .map(|(_, rule)| *rule)
}

/// Validate a rendering snippet.
///
/// Rules, in order: the snippet parses cleanly, every node passes the
/// structural checks, and exactly one top-level entry point exists with the
/// expected signature.
pub fn validate_code(candidate: &str) -> ValidationVerdict {
    let tree = match parse_python(candidate) {
        Ok(tree) => tree,
        Err(reason) => return ValidationVerdict::invalid(reason),
    };
    let source = candidate.as_bytes();
    let root = tree.root_node();

    if let Some(node) = find_syntax_error(root) {
        return ValidationVerdict::invalid(describe_syntax_error(node, source));
    }
    if let Err(reason) = check_structure(root, source) {
        return ValidationVerdict::invalid(reason);
    }
    if !has_entry_point(root, source) {
        return ValidationVerdict::invalid("missing or incorrect entry-point signature");
    }
    ValidationVerdict::valid()
}

fn parse_python(source: &str) -> Result<Tree, String> {
    let language: Language = tree_sitter_python::LANGUAGE.into();
    let mut parser = Parser::new();
    parser
        .set_language(&language)
        .map_err(|err| format!("syntax error: python grammar unavailable: {err}"))?;
    parser
        .parse(source, None)
        .ok_or_else(|| "syntax error: parser produced no tree".to_string())
}

fn text<'s>(node: Node<'_>, source: &'s [u8]) -> &'s str {
    node.utf8_text(source).unwrap_or_default()
}

fn children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

fn find_syntax_error(root: Node<'_>) -> Option<Node<'_>> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        if node.has_error() {
            stack.extend(children(node).into_iter().rev());
        }
    }
    None
}

fn describe_syntax_error(node: Node<'_>, source: &[u8]) -> String {
    let position = node.start_position();
    let detail = if node.is_missing() {
        format!("missing `{}`", node.kind())
    } else {
        let snippet: String = text(node, source).chars().take(40).collect();
        format!("unexpected `{}`", snippet.trim())
    };
    format!(
        "syntax error at line {}, column {}: {detail}",
        position.row + 1,
        position.column + 1
    )
}

/// Pre-order walk over the whole tree.
fn check_structure(root: Node<'_>, source: &[u8]) -> Result<(), String> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        check_node(node, source)?;
        stack.extend(children(node).into_iter().rev());
    }
    Ok(())
}

fn check_node(node: Node<'_>, source: &[u8]) -> Result<(), String> {
    match node.kind() {
        "import_statement" => check_import(node, source),
        "import_from_statement" => check_import_from(node, source),
        "future_import_statement" => Err("forbidden import: __future__".to_string()),
        "exec_statement" => Err("forbidden call: exec".to_string()),
        "call" => check_call(node, source),
        "attribute" => check_attribute(node, source),
        "identifier" => check_identifier(node, source),
        _ => Ok(()),
    }
}

fn ensure_allowed_module(module: &str) -> Result<(), String> {
    let top = module.split('.').next().unwrap_or_default();
    if ALLOWED_IMPORTS.contains(&top) {
        Ok(())
    } else {
        Err(format!("forbidden import: {module}"))
    }
}

fn imported_name<'s>(node: Node<'_>, source: &'s [u8]) -> &'s str {
    match node.kind() {
        "aliased_import" => node
            .child_by_field_name("name")
            .map_or("", |name| text(name, source)),
        _ => text(node, source),
    }
}

fn check_import(node: Node<'_>, source: &[u8]) -> Result<(), String> {
    let mut cursor = node.walk();
    let names: Vec<_> = node.children_by_field_name("name", &mut cursor).collect();
    if names.is_empty() {
        return Err("forbidden import: <unknown>".to_string());
    }
    for name in names {
        ensure_allowed_module(imported_name(name, source))?;
    }
    Ok(())
}

fn check_import_from(node: Node<'_>, source: &[u8]) -> Result<(), String> {
    let module_node = node
        .child_by_field_name("module_name")
        .ok_or_else(|| "forbidden import: <unknown>".to_string())?;
    let module = text(module_node, source);
    if module_node.kind() == "relative_import" {
        return Err(format!("forbidden import: {module}"));
    }
    ensure_allowed_module(module)?;

    if children(node)
        .iter()
        .any(|child| child.kind() == "wildcard_import")
    {
        return Err(format!("forbidden import: from {module} import *"));
    }

    let top = module.split('.').next().unwrap_or_default();
    let mut cursor = node.walk();
    let names: Vec<_> = node.children_by_field_name("name", &mut cursor).collect();
    for name in names {
        let name = imported_name(name, source);
        let denied = DENIED_ANY_RECEIVER.contains(&name)
            || method_rule(top).is_some_and(|rule| rule.forbids(name));
        if denied {
            return Err(format!("forbidden import: {module}.{name}"));
        }
    }
    Ok(())
}

/// Dotted path for a chain of names (`os.path`), `None` for anything else.
fn dotted_path(node: Node<'_>, source: &[u8]) -> Option<String> {
    match node.kind() {
        "identifier" => Some(text(node, source).to_string()),
        "attribute" => {
            let object = dotted_path(node.child_by_field_name("object")?, source)?;
            let attribute = text(node.child_by_field_name("attribute")?, source);
            Some(format!("{object}.{attribute}"))
        }
        _ => None,
    }
}

fn check_call(node: Node<'_>, source: &[u8]) -> Result<(), String> {
    let function = node
        .child_by_field_name("function")
        .ok_or_else(|| "unsupported call target".to_string())?;
    match function.kind() {
        "identifier" => {
            let name = text(function, source);
            if DENIED_CALLS.contains(&name) {
                return Err(format!("forbidden call: {name}"));
            }
            Ok(())
        }
        "attribute" => check_method_call(function, source),
        other => Err(format!("unsupported call target: {other}")),
    }
}

/// Names along an attribute chain, innermost first (`a.b.c` gives `[a, b, c]`).
/// A chain rooted in a call or subscript starts at its first attribute.
fn chain_names<'s>(node: Node<'_>, source: &'s [u8]) -> Vec<&'s str> {
    let mut names = Vec::new();
    let mut current = Some(node);
    while let Some(node) = current {
        current = None;
        match node.kind() {
            "identifier" => names.push(text(node, source)),
            "attribute" => {
                if let Some(attribute) = node.child_by_field_name("attribute") {
                    names.push(text(attribute, source));
                }
                current = node.child_by_field_name("object");
            }
            _ => {}
        }
    }
    names.reverse();
    names
}

/// True when any adjacent `module.method` pair in the chain is denied, so
/// `pd.io.common.os.system` fails on `os.system`.
fn chain_is_denied(names: &[&str]) -> bool {
    names
        .windows(2)
        .any(|pair| method_rule(pair[0]).is_some_and(|rule| rule.forbids(pair[1])))
}

fn display_path(node: Node<'_>, source: &[u8]) -> String {
    let attribute = node
        .child_by_field_name("attribute")
        .map_or("", |attr| text(attr, source));
    let receiver = node
        .child_by_field_name("object")
        .and_then(|object| dotted_path(object, source));
    format!("{}.{attribute}", receiver.as_deref().unwrap_or("<expr>"))
}

fn check_method_call(function: Node<'_>, source: &[u8]) -> Result<(), String> {
    let names = chain_names(function, source);
    let method = names.last().copied().unwrap_or_default();
    if chain_is_denied(&names) || DENIED_ANY_RECEIVER.contains(&method) {
        return Err(format!(
            "forbidden method call: {}",
            display_path(function, source)
        ));
    }
    Ok(())
}

/// Attribute references, called or not. Calls are checked first by
/// [`check_method_call`], so this only reports what a call did not.
fn check_attribute(node: Node<'_>, source: &[u8]) -> Result<(), String> {
    let names = chain_names(node, source);
    let attribute = names.last().copied().unwrap_or_default();
    if attribute.len() > 4 && attribute.starts_with("__") && attribute.ends_with("__") {
        return Err(format!("forbidden attribute access: {attribute}"));
    }
    if chain_is_denied(&names) || DENIED_ANY_RECEIVER.contains(&attribute) {
        return Err(format!(
            "forbidden reference: {}",
            display_path(node, source)
        ));
    }
    if matches!(method_rule(attribute), Some(MethodRule::AnyMethod)) {
        return Err(format!("forbidden attribute access: {attribute}"));
    }
    Ok(())
}

/// Reject references to denied builtins outside a direct call (`f = eval`).
fn check_identifier(node: Node<'_>, source: &[u8]) -> Result<(), String> {
    let name = text(node, source);
    if !DENIED_CALLS.contains(&name) {
        return Ok(());
    }
    if let Some(parent) = node.parent() {
        let field = match parent.kind() {
            "attribute" => Some("attribute"),
            "keyword_argument" => Some("name"),
            _ => None,
        };
        if field.is_some_and(|field| parent.child_by_field_name(field) == Some(node)) {
            return Ok(());
        }
    }
    Err(format!("forbidden name: {name}"))
}

fn has_entry_point(root: Node<'_>, source: &[u8]) -> bool {
    let definitions: Vec<Node<'_>> = children(root)
        .into_iter()
        .filter_map(|child| match child.kind() {
            "function_definition" => Some(child),
            "decorated_definition" => child
                .child_by_field_name("definition")
                .filter(|definition| definition.kind() == "function_definition"),
            _ => None,
        })
        .filter(|definition| {
            definition
                .child_by_field_name("name")
                .is_some_and(|name| text(name, source) == ENTRY_POINT)
        })
        .collect();

    let [definition] = definitions.as_slice() else {
        return false;
    };
    if children(*definition)
        .iter()
        .any(|child| child.kind() == "async")
    {
        return false;
    }
    parameter_names(*definition, source).is_some_and(|names| names == ENTRY_POINT_PARAMS)
}

fn parameter_names<'s>(definition: Node<'_>, source: &'s [u8]) -> Option<Vec<&'s str>> {
    let parameters = definition.child_by_field_name("parameters")?;
    let mut cursor = parameters.walk();
    let params: Vec<_> = parameters
        .named_children(&mut cursor)
        .filter(|param| param.kind() != "comment")
        .collect();
    params
        .into_iter()
        .map(|param| match param.kind() {
            "identifier" => Some(text(param, source)),
            "typed_parameter" => {
                let mut cursor = param.walk();
                let first = param.named_children(&mut cursor).next()?;
                (first.kind() == "identifier").then(|| text(first, source))
            }
            "default_parameter" | "typed_default_parameter" => param
                .child_by_field_name("name")
                .map(|name| text(name, source)),
            _ => None,
        })
        .collect()
}
