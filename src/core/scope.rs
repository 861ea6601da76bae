//! Deployment scope resolution.
//!
//! A pure function over the entry tree. It never consults diagnostics from
//! later stages; callers that need the error-gated answer (the scope request
//! surface) combine this with `Compilation::has_errors`.

use super::parser::{Decl, Expr, SyntaxTree};
use super::types::DeploymentScope;

/// Resolve the deployment scope of an entry tree.
///
/// A tree that failed to parse into well-formed declarations has no usable
/// scope. Otherwise the first `targetScope` declaration with a string literal
/// value decides; an absent or unrecognized value falls back to the default
/// `resourceGroup` scope. The checker separately rejects unrecognized values,
/// so the fallback only surfaces alongside an error diagnostic.
pub fn resolve_deployment_scope(tree: &SyntaxTree) -> DeploymentScope {
    if !tree.well_formed {
        return DeploymentScope::None;
    }
    for decl in &tree.decls {
        if let Decl::TargetScope { value, .. } = decl {
            if let Expr::StringLit { value, .. } = value {
                if let Some(scope) = DeploymentScope::from_literal(value) {
                    return scope;
                }
            }
            return DeploymentScope::ResourceGroup;
        }
    }
    DeploymentScope::ResourceGroup
}
