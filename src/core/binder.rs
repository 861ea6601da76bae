//! Name binding: symbol table construction and reference resolution.
//!
//! Two passes over the entry tree. The first collects every top-level
//! declaration into an order-preserving symbol table, ignoring declaration
//! order, so the second pass can resolve forward references. The second pass
//! resolves every identifier, records the reference graph, and runs a
//! depth-first cycle check reporting the first node of each detected cycle.

use super::parser::{Decl, Expr, SyntaxTree};
use super::types::{codes, Diagnostic, Span};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Parameter,
    Variable,
    Resource,
    Output,
    Module,
    NamespaceImport,
}

/// A declared name. Holds a back-reference (index) into the entry tree's
/// declaration list, not ownership of the node.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub decl_index: usize,
}

/// Per-program symbol table; uniqueness enforced within the top-level scope,
/// iteration order is declaration order.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: IndexMap<String, Symbol>,
}

impl SymbolTable {
    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Result of binding one program.
#[derive(Debug, Clone, Default)]
pub struct BindResult {
    pub table: SymbolTable,
    /// Reference edges: declared name → names it references, in source order.
    pub references: IndexMap<String, Vec<String>>,
    pub diagnostics: Vec<Diagnostic>,
}

impl BindResult {
    /// Dependency edges for the emitter and deploy planner: for each resource
    /// symbol, the other resource symbols it reaches through any chain of
    /// references (variables expand transitively). Sorted for determinism.
    pub fn resource_dependencies(&self) -> IndexMap<String, Vec<String>> {
        let mut out = IndexMap::new();
        for symbol in self.table.iter() {
            if symbol.kind != SymbolKind::Resource {
                continue;
            }
            let mut reached = Vec::new();
            let mut visited: Vec<&str> = vec![&symbol.name];
            let mut stack: Vec<&str> = self
                .references
                .get(&symbol.name)
                .map(|refs| refs.iter().map(String::as_str).collect())
                .unwrap_or_default();
            while let Some(name) = stack.pop() {
                if visited.contains(&name) {
                    continue;
                }
                visited.push(name);
                match self.table.get(name).map(|s| s.kind) {
                    Some(SymbolKind::Resource) => reached.push(name.to_string()),
                    Some(SymbolKind::Variable) | Some(SymbolKind::Output) => {
                        if let Some(refs) = self.references.get(name) {
                            stack.extend(refs.iter().map(String::as_str));
                        }
                    }
                    _ => {}
                }
            }
            reached.sort();
            reached.dedup();
            out.insert(symbol.name.clone(), reached);
        }
        out
    }
}

/// Bind a syntax tree. Never fails; problems accumulate as diagnostics.
pub fn bind(tree: &SyntaxTree) -> BindResult {
    let mut result = BindResult::default();

    // Pass 1: collect declarations, order-insensitive
    for (index, decl) in tree.decls.iter().enumerate() {
        let Some(name) = decl.name() else { continue };
        let kind = match decl {
            Decl::Param { .. } => SymbolKind::Parameter,
            Decl::Var { .. } => SymbolKind::Variable,
            Decl::Resource { .. } => SymbolKind::Resource,
            Decl::Output { .. } => SymbolKind::Output,
            Decl::Module { .. } => SymbolKind::Module,
            Decl::Import { .. } => SymbolKind::NamespaceImport,
            Decl::TargetScope { .. } | Decl::Error { .. } => continue,
        };
        if result.table.contains(name) {
            result.diagnostics.push(Diagnostic::error(
                codes::DUPLICATE_DECLARATION,
                decl.span(),
                format!("'{}' is declared more than once in this scope", name),
            ));
            continue;
        }
        result.table.symbols.insert(
            name.to_string(),
            Symbol {
                name: name.to_string(),
                kind,
                decl_index: index,
            },
        );
    }

    // Pass 2: resolve references against the full table
    for decl in &tree.decls {
        let mut referenced = Vec::new();
        for_each_expr(decl, &mut |expr| {
            if let Expr::Identifier { name, span } = expr {
                record_reference(&mut result, name, *span, &mut referenced);
            }
            if let Expr::Member { base, .. } = expr {
                if let Expr::Identifier { name, span } = &**base {
                    record_reference(&mut result, name, *span, &mut referenced);
                }
            }
        });
        if let Some(name) = decl.name() {
            result.references.insert(name.to_string(), referenced);
        }
    }

    check_cycles(tree, &mut result);
    result
}

fn record_reference(
    result: &mut BindResult,
    name: &str,
    span: Span,
    referenced: &mut Vec<String>,
) {
    if result.table.contains(name) {
        if !referenced.iter().any(|r| r == name) {
            referenced.push(name.to_string());
        }
    } else {
        result.diagnostics.push(Diagnostic::error(
            codes::UNRESOLVED_IDENTIFIER,
            span,
            format!("'{}' does not refer to any declaration", name),
        ));
    }
}

/// Depth-first cycle check over the reference graph. Reports the first node
/// of each detected cycle (the node the back edge returns to), once.
fn check_cycles(tree: &SyntaxTree, result: &mut BindResult) {
    const WHITE: u8 = 0;
    const GRAY: u8 = 1;
    const BLACK: u8 = 2;

    fn visit(
        node: &str,
        references: &IndexMap<String, Vec<String>>,
        table: &SymbolTable,
        color: &mut FxHashMap<String, u8>,
        reported: &mut Vec<String>,
    ) {
        color.insert(node.to_string(), GRAY);
        if let Some(refs) = references.get(node) {
            for target in refs {
                if !table.contains(target) {
                    continue;
                }
                match color.get(target.as_str()).copied().unwrap_or(WHITE) {
                    WHITE => visit(target, references, table, color, reported),
                    GRAY => {
                        if !reported.iter().any(|r| r == target) {
                            reported.push(target.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
        color.insert(node.to_string(), BLACK);
    }

    let mut color: FxHashMap<String, u8> = FxHashMap::default();
    let mut reported: Vec<String> = Vec::new();
    let names: Vec<String> = result.table.iter().map(|s| s.name.clone()).collect();
    for name in &names {
        if color.get(name.as_str()).copied().unwrap_or(WHITE) == WHITE {
            visit(
                name,
                &result.references,
                &result.table,
                &mut color,
                &mut reported,
            );
        }
    }

    for name in reported {
        let span = result
            .table
            .get(&name)
            .and_then(|s| tree.decls.get(s.decl_index))
            .map(|d| d.span())
            .unwrap_or_default();
        result.diagnostics.push(Diagnostic::error(
            codes::CYCLIC_REFERENCE,
            span,
            format!("cyclic reference detected starting at '{}'", name),
        ));
    }
}

/// Walk every expression in a declaration, including nested ones.
fn for_each_expr(decl: &Decl, f: &mut impl FnMut(&Expr)) {
    let root = match decl {
        Decl::TargetScope { value, .. }
        | Decl::Var { value, .. }
        | Decl::Output { value, .. } => Some(value),
        Decl::Param { default, .. } => default.as_ref(),
        Decl::Resource { body, .. } | Decl::Module { body, .. } => Some(body),
        Decl::Import { .. } | Decl::Error { .. } => None,
    };
    if let Some(expr) = root {
        walk_expr(expr, f);
    }
}

fn walk_expr(expr: &Expr, f: &mut impl FnMut(&Expr)) {
    f(expr);
    match expr {
        Expr::Array { items, .. } => {
            for item in items {
                walk_expr(item, f);
            }
        }
        Expr::Object { properties, .. } => {
            for (_, value) in properties {
                walk_expr(value, f);
            }
        }
        Expr::Member { base, .. } => {
            // The callback already saw the base identifier; only recurse into
            // non-identifier bases
            if !matches!(&**base, Expr::Identifier { .. }) {
                walk_expr(base, f);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse;

    fn bind_source(source: &str) -> BindResult {
        let (tree, diagnostics) = parse(source);
        assert!(diagnostics.is_empty(), "parse failed: {:?}", diagnostics);
        bind(&tree)
    }

    #[test]
    fn test_binder_collects_symbols() {
        let result = bind_source(
            "param location string\nvar zone = 'z'\nresource dns 'Ns.A/b@2020-01-01' = { name: zone }\noutput o string = zone\nimport kubernetes",
        );
        assert!(result.diagnostics.is_empty());
        assert_eq!(result.table.len(), 5);
        assert_eq!(result.table.get("dns").unwrap().kind, SymbolKind::Resource);
        assert_eq!(
            result.table.get("kubernetes").unwrap().kind,
            SymbolKind::NamespaceImport
        );
    }

    #[test]
    fn test_binder_duplicate_declaration() {
        let result = bind_source("var x = 1\nvar x = 2");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].code, codes::DUPLICATE_DECLARATION);
        assert_eq!(result.table.len(), 1);
    }

    #[test]
    fn test_binder_forward_reference_allowed() {
        let result = bind_source("var a = b\nvar b = 1");
        assert!(result.diagnostics.is_empty());
        assert_eq!(result.references["a"], vec!["b"]);
    }

    #[test]
    fn test_binder_unresolved_identifier() {
        let result = bind_source("var a = missing");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].code, codes::UNRESOLVED_IDENTIFIER);
        assert!(result.diagnostics[0].message.contains("missing"));
    }

    #[test]
    fn test_binder_cycle_detected() {
        let result = bind_source("var a = b\nvar b = a");
        let cycles: Vec<_> = result
            .diagnostics
            .iter()
            .filter(|d| d.code == codes::CYCLIC_REFERENCE)
            .collect();
        assert_eq!(cycles.len(), 1);
    }

    #[test]
    fn test_binder_self_reference_is_cycle() {
        let result = bind_source("var a = a");
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == codes::CYCLIC_REFERENCE));
    }

    #[test]
    fn test_binder_resource_dependencies_direct() {
        let result = bind_source(
            "resource a 'Ns.A/x@2020-01-01' = { name: 'a' }\nresource b 'Ns.A/x@2020-01-01' = { name: a.name }",
        );
        let deps = result.resource_dependencies();
        assert!(deps["a"].is_empty());
        assert_eq!(deps["b"], vec!["a"]);
    }

    #[test]
    fn test_binder_resource_dependencies_through_variable() {
        let result = bind_source(
            "resource a 'Ns.A/x@2020-01-01' = { name: 'a' }\nvar indirection = a.name\nresource b 'Ns.A/x@2020-01-01' = { name: indirection }",
        );
        let deps = result.resource_dependencies();
        assert_eq!(deps["b"], vec!["a"]);
    }

    #[test]
    fn test_binder_references_inside_nested_expressions() {
        let result = bind_source(
            "var inner = 1\nvar outer = { a: [inner, { b: inner }] }",
        );
        assert!(result.diagnostics.is_empty());
        assert_eq!(result.references["outer"], vec!["inner"]);
    }

    #[test]
    fn test_binder_error_decl_skipped() {
        let (tree, _) = parse("var = broken\nvar ok = 1");
        let result = bind(&tree);
        assert_eq!(result.table.len(), 1);
        assert!(result.table.contains("ok"));
    }
}
