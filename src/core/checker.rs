//! Type checking: assigns a `TypeInfo` to every expression, validates
//! resource bodies against a type provider, and gates `targetScope` values.
//!
//! Type errors never stop compilation. The offending expression lowers to
//! `TypeInfo::Error`, emission for diagnostics display still works, and the
//! deploy path refuses later based on diagnostic severity.

use super::binder::BindResult;
use super::parser::{Decl, Expr, SyntaxTree};
use super::types::{codes, Diagnostic, ResourceTypeId, Span, TypeInfo};
use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};

// ============================================================================
// Resource type provider
// ============================================================================

/// Shape description for a known resource type.
#[derive(Debug, Clone)]
pub struct ResourceTypeSchema {
    /// Top-level body properties that must be present.
    pub required: Vec<&'static str>,
    /// Top-level body properties the type understands.
    pub known: Vec<&'static str>,
}

/// Resolves resource type literals to schemas. Statically registered tables,
/// no runtime type discovery.
pub trait ResourceTypeProvider: Send + Sync {
    fn resolve(&self, id: &ResourceTypeId) -> Option<ResourceTypeSchema>;
}

/// Built-in registry of well-known resource types.
#[derive(Debug, Default)]
pub struct BuiltinTypeProvider;

const BUILTIN_TYPES: &[(&str, &str)] = &[
    ("Microsoft.Network/dnsZones", "2018-05-01"),
    ("Microsoft.Network/virtualNetworks", "2023-04-01"),
    ("Microsoft.Storage/storageAccounts", "2022-09-01"),
    ("Microsoft.Resources/resourceGroups", "2021-04-01"),
    ("Microsoft.KeyVault/vaults", "2023-02-01"),
];

impl ResourceTypeProvider for BuiltinTypeProvider {
    fn resolve(&self, id: &ResourceTypeId) -> Option<ResourceTypeSchema> {
        BUILTIN_TYPES
            .iter()
            .find(|(t, v)| *t == id.full_type && *v == id.api_version)
            .map(|_| ResourceTypeSchema {
                required: vec!["name"],
                known: vec!["name", "location", "properties", "tags"],
            })
    }
}

// ============================================================================
// Check result
// ============================================================================

/// Types assigned by the checker plus its diagnostics.
#[derive(Debug, Clone, Default)]
pub struct CheckResult {
    /// Type of every visited expression, keyed by span.
    pub expr_types: FxHashMap<Span, TypeInfo>,
    /// Type of every declared symbol.
    pub symbol_types: FxHashMap<String, TypeInfo>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CheckResult {
    pub fn type_of(&self, span: Span) -> Option<&TypeInfo> {
        self.expr_types.get(&span)
    }
}

/// Check a bound program.
pub fn check(
    tree: &SyntaxTree,
    bound: &BindResult,
    provider: &dyn ResourceTypeProvider,
) -> CheckResult {
    let mut checker = Checker {
        tree,
        bound,
        provider,
        result: CheckResult::default(),
        in_progress: FxHashSet::default(),
        target_scope_seen: false,
    };
    checker.run();
    checker.result
}

struct Checker<'a> {
    tree: &'a SyntaxTree,
    bound: &'a BindResult,
    provider: &'a dyn ResourceTypeProvider,
    result: CheckResult,
    /// Symbols currently being typed; guards against reference cycles the
    /// binder has already reported.
    in_progress: FxHashSet<String>,
    target_scope_seen: bool,
}

impl Checker<'_> {
    fn run(&mut self) {
        for decl in &self.tree.decls {
            self.check_decl(decl);
        }
    }

    fn check_decl(&mut self, decl: &Decl) {
        match decl {
            Decl::TargetScope { value, span } => self.check_target_scope(value, *span),
            Decl::Param {
                name,
                type_name,
                default,
                span,
            } => {
                let declared = self.declared_type(type_name, *span);
                if let Some(default) = default {
                    let actual = self.visit_expr(default);
                    self.require_assignable(&actual, &declared, default.span());
                }
                self.result.symbol_types.insert(name.clone(), declared);
            }
            Decl::Var { name, value, .. } => {
                let ty = self.visit_expr(value);
                self.result.symbol_types.insert(name.clone(), ty);
            }
            Decl::Resource {
                symbolic_name,
                type_literal,
                type_span,
                body,
                ..
            } => {
                self.check_resource(symbolic_name, type_literal, *type_span, body);
            }
            Decl::Output {
                name,
                type_name,
                value,
                span,
            } => {
                let declared = self.declared_type(type_name, *span);
                let actual = self.visit_expr(value);
                self.require_assignable(&actual, &declared, value.span());
                self.result.symbol_types.insert(name.clone(), declared);
            }
            Decl::Module {
                symbolic_name,
                body,
                ..
            } => {
                self.visit_expr(body);
                self.result
                    .symbol_types
                    .insert(symbolic_name.clone(), TypeInfo::Any);
            }
            Decl::Import { namespace, .. } => {
                self.result
                    .symbol_types
                    .insert(namespace.clone(), TypeInfo::Any);
            }
            Decl::Error { .. } => {}
        }
    }

    fn check_target_scope(&mut self, value: &Expr, span: Span) {
        if self.target_scope_seen {
            self.result.diagnostics.push(Diagnostic::error(
                codes::DUPLICATE_TARGET_SCOPE,
                span,
                "'targetScope' is declared more than once",
            ));
            return;
        }
        self.target_scope_seen = true;

        let expected = TypeInfo::Union(vec![
            TypeInfo::StringLiteral("tenant".into()),
            TypeInfo::StringLiteral("managementGroup".into()),
            TypeInfo::StringLiteral("subscription".into()),
            TypeInfo::StringLiteral("resourceGroup".into()),
        ]);
        let actual = self.visit_expr(value);
        if !assignable(&actual, &expected) {
            self.result.expr_types.insert(value.span(), TypeInfo::Error);
            self.result.diagnostics.push(Diagnostic::error(
                codes::INVALID_TARGET_SCOPE,
                value.span(),
                format!("'targetScope' must be one of {}, found {}", expected, actual),
            ));
        }
    }

    fn check_resource(
        &mut self,
        symbolic_name: &str,
        type_literal: &str,
        type_span: Span,
        body: &Expr,
    ) {
        let schema = match ResourceTypeId::parse(type_literal) {
            Some(id) => {
                let schema = self.provider.resolve(&id);
                if schema.is_none() {
                    // Unknown type or API version: permissive fallback
                    self.result.diagnostics.push(Diagnostic::warning(
                        codes::UNKNOWN_RESOURCE_TYPE,
                        type_span,
                        format!("resource type '{}' is not a known type; properties will not be validated", id),
                    ));
                    self.result
                        .symbol_types
                        .insert(symbolic_name.to_string(), TypeInfo::Any);
                } else {
                    self.result
                        .symbol_types
                        .insert(symbolic_name.to_string(), TypeInfo::Resource(id));
                }
                schema
            }
            None => {
                self.result.diagnostics.push(Diagnostic::error(
                    codes::INVALID_RESOURCE_TYPE_FORMAT,
                    type_span,
                    format!(
                        "'{}' is not a valid resource type; expected 'Namespace/kind@apiVersion'",
                        type_literal
                    ),
                ));
                self.result
                    .symbol_types
                    .insert(symbolic_name.to_string(), TypeInfo::Error);
                None
            }
        };

        let body_type = self.visit_expr(body);
        let Expr::Object { properties, .. } = body else {
            self.result.diagnostics.push(Diagnostic::error(
                codes::TYPE_MISMATCH,
                body.span(),
                format!("resource body must be an object, found {}", body_type),
            ));
            return;
        };

        // Every resource needs a name; the emitter depends on it
        let has_name = properties.iter().any(|(key, _)| key == "name");
        if !has_name {
            self.result.diagnostics.push(Diagnostic::error(
                codes::MISSING_REQUIRED_PROPERTY,
                body.span(),
                format!("resource '{}' is missing required property 'name'", symbolic_name),
            ));
        }

        if let Some(schema) = schema {
            for required in &schema.required {
                if *required != "name" && !properties.iter().any(|(key, _)| key == required) {
                    self.result.diagnostics.push(Diagnostic::error(
                        codes::MISSING_REQUIRED_PROPERTY,
                        body.span(),
                        format!(
                            "resource '{}' is missing required property '{}'",
                            symbolic_name, required
                        ),
                    ));
                }
            }
            for (key, value) in properties {
                if !schema.known.contains(&key.as_str()) {
                    self.result.diagnostics.push(Diagnostic::warning(
                        codes::UNKNOWN_PROPERTY,
                        value.span(),
                        format!("property '{}' is not a known property of this resource type", key),
                    ));
                }
            }
        }

        for (key, value) in properties {
            if key == "name" {
                let name_type = self
                    .result
                    .expr_types
                    .get(&value.span())
                    .cloned()
                    .unwrap_or(TypeInfo::Any);
                self.require_assignable(&name_type, &TypeInfo::String, value.span());
            }
        }
    }

    /// Compute and record the type of an expression tree.
    fn visit_expr(&mut self, expr: &Expr) -> TypeInfo {
        let ty = match expr {
            Expr::StringLit { value, .. } => TypeInfo::StringLiteral(value.clone()),
            Expr::IntLit { value, .. } => TypeInfo::IntLiteral(*value),
            Expr::BoolLit { .. } => TypeInfo::Bool,
            Expr::NullLit { .. } => TypeInfo::Null,
            Expr::Array { items, .. } => {
                for item in items {
                    self.visit_expr(item);
                }
                TypeInfo::Array(Box::new(TypeInfo::Any))
            }
            Expr::Object { properties, .. } => {
                let mut shape = IndexMap::new();
                for (key, value) in properties {
                    let value_type = self.visit_expr(value);
                    shape.insert(key.clone(), value_type);
                }
                TypeInfo::Object(shape)
            }
            Expr::Identifier { name, .. } => self.symbol_type(name),
            Expr::Member { base, path, .. } => {
                let base_type = match &**base {
                    Expr::Identifier { name, .. } => self.symbol_type(name),
                    other => self.visit_expr(other),
                };
                self.result
                    .expr_types
                    .insert(base.span(), base_type.clone());
                member_type(&base_type, path)
            }
        };
        self.result.expr_types.insert(expr.span(), ty.clone());
        ty
    }

    /// Type of a declared symbol, computed on demand so forward references
    /// work. Cycles fall back to `Error` (the binder already reported them).
    fn symbol_type(&mut self, name: &str) -> TypeInfo {
        if let Some(ty) = self.result.symbol_types.get(name) {
            return ty.clone();
        }
        let Some(symbol) = self.bound.table.get(name) else {
            return TypeInfo::Error;
        };
        if !self.in_progress.insert(name.to_string()) {
            return TypeInfo::Error;
        }
        // No diagnostics here; check_decl reports bad declared types when it
        // reaches the declaration itself
        let ty = match self.tree.decls.get(symbol.decl_index) {
            Some(Decl::Param { type_name, .. }) | Some(Decl::Output { type_name, .. }) => {
                primitive_type(type_name).unwrap_or(TypeInfo::Error)
            }
            Some(Decl::Var { value, .. }) => self.visit_expr(value),
            Some(Decl::Resource { type_literal, .. }) => ResourceTypeId::parse(type_literal)
                .map(|id| {
                    if self.provider.resolve(&id).is_some() {
                        TypeInfo::Resource(id)
                    } else {
                        TypeInfo::Any
                    }
                })
                .unwrap_or(TypeInfo::Error),
            Some(Decl::Module { .. }) | Some(Decl::Import { .. }) => TypeInfo::Any,
            _ => TypeInfo::Error,
        };
        self.in_progress.remove(name);
        self.result
            .symbol_types
            .entry(name.to_string())
            .or_insert_with(|| ty.clone());
        ty
    }

    fn declared_type(&mut self, type_name: &str, span: Span) -> TypeInfo {
        match primitive_type(type_name) {
            Some(ty) => ty,
            None => {
                self.result.diagnostics.push(Diagnostic::error(
                    codes::UNKNOWN_TYPE_NAME,
                    span,
                    format!("'{}' is not a valid type name", type_name),
                ));
                TypeInfo::Error
            }
        }
    }

    fn require_assignable(&mut self, actual: &TypeInfo, expected: &TypeInfo, span: Span) {
        if !assignable(actual, expected) {
            self.result.diagnostics.push(Diagnostic::error(
                codes::TYPE_MISMATCH,
                span,
                format!("expected a value of type {}, found {}", expected, actual),
            ));
        }
    }
}

fn primitive_type(name: &str) -> Option<TypeInfo> {
    match name {
        "string" => Some(TypeInfo::String),
        "int" => Some(TypeInfo::Int),
        "bool" => Some(TypeInfo::Bool),
        "object" => Some(TypeInfo::Object(IndexMap::new())),
        "array" => Some(TypeInfo::Array(Box::new(TypeInfo::Any))),
        _ => None,
    }
}

/// Structural assignability. `Any` and `Error` are permissive in both
/// directions so one problem produces one diagnostic.
pub fn assignable(actual: &TypeInfo, expected: &TypeInfo) -> bool {
    use TypeInfo::*;
    match (actual, expected) {
        (Error, _) | (_, Error) | (Any, _) | (_, Any) => true,
        (_, Union(members)) => members.iter().any(|m| assignable(actual, m)),
        (StringLiteral(_), String) | (String, String) => true,
        (StringLiteral(a), StringLiteral(b)) => a == b,
        (IntLiteral(_), Int) | (Int, Int) => true,
        (IntLiteral(a), IntLiteral(b)) => a == b,
        (Bool, Bool) | (Null, Null) => true,
        (Array(a), Array(b)) => assignable(a, b),
        (Object(actual_props), Object(expected_props)) => expected_props
            .iter()
            .all(|(key, ty)| actual_props.get(key).is_some_and(|a| assignable(a, ty))),
        (Resource(a), Resource(b)) => a == b,
        _ => false,
    }
}

/// Property-for-property member lookup; unresolved shapes degrade to `Any`.
fn member_type(base: &TypeInfo, path: &[String]) -> TypeInfo {
    let mut current = base.clone();
    for segment in path {
        current = match current {
            TypeInfo::Object(props) => props.get(segment).cloned().unwrap_or(TypeInfo::Any),
            TypeInfo::Error => TypeInfo::Error,
            // Resource runtime state is opaque to the checker
            _ => TypeInfo::Any,
        };
    }
    current
}
