//! Shared pipeline types: spans, diagnostics, deployment scopes, and the
//! structural type descriptions attached to expressions after checking.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

// ============================================================================
// Documents
// ============================================================================

/// Identity of a source document. Compilations, the manager, and the
/// deployment-file cache are all keyed by this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve a relative reference (a module path) against this document.
    pub fn resolve(&self, relative: &str) -> DocumentId {
        let relative = relative.strip_prefix("./").unwrap_or(relative);
        let base = Path::new(&self.0).parent().unwrap_or_else(|| Path::new(""));
        DocumentId::new(base.join(relative).to_string_lossy().into_owned())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// Spans and diagnostics
// ============================================================================

/// Byte range in a source document, with the line it starts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize) -> Self {
        Self { start, end, line }
    }

    /// Smallest span covering both inputs. Keeps the earlier line.
    pub fn to(&self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: self.line.min(other.line),
        }
    }
}

/// Diagnostic severity. Emission and deployment gate on `Error` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single diagnostic. Accumulated across all pipeline stages into one
/// ordered sequence per compilation; never raised as an `Err`.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub span: Span,
    pub code: &'static str,
    pub message: String,
}

impl Diagnostic {
    pub fn error(code: &'static str, span: Span, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            span,
            code,
            message: message.into(),
        }
    }

    pub fn warning(code: &'static str, span: Span, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            span,
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} (line {})",
            self.severity, self.code, self.message, self.span.line
        )
    }
}

/// Stable diagnostic codes.
pub mod codes {
    pub const UNEXPECTED_TOKEN: &str = "ARM100";
    pub const DUPLICATE_DECLARATION: &str = "ARM200";
    pub const UNRESOLVED_IDENTIFIER: &str = "ARM201";
    pub const CYCLIC_REFERENCE: &str = "ARM202";
    pub const UNKNOWN_RESOURCE_TYPE: &str = "ARM300";
    pub const INVALID_TARGET_SCOPE: &str = "ARM301";
    pub const TYPE_MISMATCH: &str = "ARM302";
    pub const MISSING_REQUIRED_PROPERTY: &str = "ARM303";
    pub const UNKNOWN_TYPE_NAME: &str = "ARM304";
    pub const INVALID_RESOURCE_TYPE_FORMAT: &str = "ARM305";
    pub const DUPLICATE_TARGET_SCOPE: &str = "ARM306";
    pub const UNKNOWN_PROPERTY: &str = "ARM307";
    pub const MODULE_NOT_FOUND: &str = "ARM308";
}

// ============================================================================
// Deployment scope
// ============================================================================

/// The level a template's resources are deployed at. Derived from the bound
/// program on every request, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentScope {
    None,
    Tenant,
    ManagementGroup,
    Subscription,
    ResourceGroup,
}

impl DeploymentScope {
    /// Map a `targetScope` string literal. Only the four recognized values
    /// resolve; everything else is the caller's fallback decision.
    pub fn from_literal(value: &str) -> Option<Self> {
        match value {
            "tenant" => Some(Self::Tenant),
            "managementGroup" => Some(Self::ManagementGroup),
            "subscription" => Some(Self::Subscription),
            "resourceGroup" => Some(Self::ResourceGroup),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Tenant => "tenant",
            Self::ManagementGroup => "managementGroup",
            Self::Subscription => "subscription",
            Self::ResourceGroup => "resourceGroup",
        }
    }
}

impl fmt::Display for DeploymentScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Resource type identifiers
// ============================================================================

/// Parsed `Namespace/kind@apiVersion` resource type literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTypeId {
    /// Fully qualified type, e.g. `Microsoft.Network/dnsZones`.
    pub full_type: String,
    /// API version, e.g. `2018-05-01`.
    pub api_version: String,
}

impl ResourceTypeId {
    pub fn parse(literal: &str) -> Option<Self> {
        let (full_type, api_version) = literal.split_once('@')?;
        if full_type.is_empty() || api_version.is_empty() || !full_type.contains('/') {
            return None;
        }
        Some(Self {
            full_type: full_type.to_string(),
            api_version: api_version.to_string(),
        })
    }

    /// Provider namespace — everything before the first `/`.
    pub fn namespace(&self) -> &str {
        self.full_type.split('/').next().unwrap_or(&self.full_type)
    }
}

impl fmt::Display for ResourceTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.full_type, self.api_version)
    }
}

// ============================================================================
// Type information
// ============================================================================

/// Structural description of a value's shape. Attached to every expression
/// after type checking; literal types narrow to themselves, compound types
/// compare property-for-property, never nominally.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeInfo {
    /// Permissive fallback: anything assigns to and from it.
    Any,
    /// A type error was already reported for this expression.
    Error,
    String,
    Int,
    Bool,
    Null,
    StringLiteral(String),
    IntLiteral(i64),
    Array(Box<TypeInfo>),
    Object(IndexMap<String, TypeInfo>),
    Resource(ResourceTypeId),
    Union(Vec<TypeInfo>),
}

impl TypeInfo {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Error => write!(f, "error"),
            Self::String => write!(f, "string"),
            Self::Int => write!(f, "int"),
            Self::Bool => write!(f, "bool"),
            Self::Null => write!(f, "null"),
            Self::StringLiteral(s) => write!(f, "'{}'", s),
            Self::IntLiteral(n) => write!(f, "{}", n),
            Self::Array(inner) => write!(f, "array<{}>", inner),
            Self::Object(_) => write!(f, "object"),
            Self::Resource(id) => write!(f, "resource<{}>", id),
            Self::Union(members) => {
                let parts: Vec<String> = members.iter().map(|m| m.to_string()).collect();
                write!(f, "{}", parts.join(" | "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_types_scope_literals() {
        assert_eq!(
            DeploymentScope::from_literal("tenant"),
            Some(DeploymentScope::Tenant)
        );
        assert_eq!(
            DeploymentScope::from_literal("managementGroup"),
            Some(DeploymentScope::ManagementGroup)
        );
        assert_eq!(
            DeploymentScope::from_literal("subscription"),
            Some(DeploymentScope::Subscription)
        );
        assert_eq!(
            DeploymentScope::from_literal("resourceGroup"),
            Some(DeploymentScope::ResourceGroup)
        );
        assert_eq!(DeploymentScope::from_literal("region"), None);
        assert_eq!(DeploymentScope::from_literal(""), None);
    }

    #[test]
    fn test_types_scope_display() {
        assert_eq!(DeploymentScope::None.to_string(), "None");
        assert_eq!(DeploymentScope::ResourceGroup.to_string(), "resourceGroup");
    }

    #[test]
    fn test_types_resource_type_id_parse() {
        let id = ResourceTypeId::parse("Microsoft.Network/dnsZones@2018-05-01").unwrap();
        assert_eq!(id.full_type, "Microsoft.Network/dnsZones");
        assert_eq!(id.api_version, "2018-05-01");
        assert_eq!(id.namespace(), "Microsoft.Network");
    }

    #[test]
    fn test_types_resource_type_id_rejects_malformed() {
        assert!(ResourceTypeId::parse("no-version").is_none());
        assert!(ResourceTypeId::parse("noSlash@2020-01-01").is_none());
        assert!(ResourceTypeId::parse("@2020-01-01").is_none());
        assert!(ResourceTypeId::parse("Ns/kind@").is_none());
    }

    #[test]
    fn test_types_span_to() {
        let a = Span::new(5, 10, 2);
        let b = Span::new(12, 20, 3);
        let merged = a.to(b);
        assert_eq!(merged.start, 5);
        assert_eq!(merged.end, 20);
        assert_eq!(merged.line, 2);
    }

    #[test]
    fn test_types_diagnostic_display() {
        let d = Diagnostic::error(codes::UNEXPECTED_TOKEN, Span::new(0, 4, 1), "unexpected '{'");
        let s = d.to_string();
        assert!(s.contains("error"));
        assert!(s.contains("ARM100"));
        assert!(s.contains("line 1"));
    }

    #[test]
    fn test_types_document_id_resolve() {
        let entry = DocumentId::new("infra/main.arm");
        let module = entry.resolve("./network.arm");
        assert_eq!(module.as_str(), "infra/network.arm");

        let flat = DocumentId::new("main.arm");
        assert_eq!(flat.resolve("network.arm").as_str(), "network.arm");
    }
}
