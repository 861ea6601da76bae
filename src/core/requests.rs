//! Editor/tooling request surface.
//!
//! Requests never fail with a transport-level error for problems in the
//! user's source; they degrade to a response that carries the reason.

use super::cache::CompilationCache;
use super::checker::ResourceTypeProvider;
use super::compilation::{CompilationManager, SourceProvider};
use super::config::BuildConfig;
use super::types::{DocumentId, Severity};
use serde::{Deserialize, Serialize};

/// Answer to a scope request. `scope` is always a printable name; `"None"`
/// means the document could not be taken to a deployable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeResponse {
    pub scope: String,
    pub template: Option<String>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

impl ScopeResponse {
    fn none(reason: impl Into<String>) -> Self {
        Self {
            scope: "None".to_string(),
            template: None,
            error_message: Some(reason.into()),
        }
    }
}

/// Resolve the deployment scope of a document and, when it compiles cleanly,
/// produce its template and stash the compilation for a subsequent deploy to
/// claim from the cache.
pub fn resolve_scope(
    manager: &CompilationManager,
    cache: &CompilationCache,
    id: &DocumentId,
    sources: &dyn SourceProvider,
    types: &dyn ResourceTypeProvider,
    config: Result<BuildConfig, String>,
) -> ScopeResponse {
    if let Err(reason) = config {
        return ScopeResponse::none(reason);
    }

    let compilation = match manager.get_or_create(id, sources, types) {
        Ok(compilation) => compilation,
        Err(reason) => return ScopeResponse::none(reason),
    };

    if compilation.has_errors() {
        let summary = compilation
            .diagnostics()
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return ScopeResponse::none(summary);
    }

    let template = match compilation.emit_template() {
        Ok(template) => match serde_json::to_string_pretty(&template) {
            Ok(text) => text,
            Err(e) => return ScopeResponse::none(format!("serialization failed: {}", e)),
        },
        Err(reason) => return ScopeResponse::none(reason),
    };

    let scope = compilation.scope().as_str().to_string();
    cache.insert(compilation);
    ScopeResponse {
        scope,
        template: Some(template),
        error_message: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checker::BuiltinTypeProvider;
    use crate::core::compilation::MemoryProvider;
    use std::sync::Arc;

    struct Fixture {
        manager: CompilationManager,
        cache: CompilationCache,
        sources: MemoryProvider,
    }

    impl Fixture {
        fn with_source(source: &str) -> Self {
            let sources = MemoryProvider::new();
            sources.put("main.arm", source);
            Self {
                manager: CompilationManager::new(),
                cache: CompilationCache::new(),
                sources,
            }
        }

        fn resolve(&self) -> ScopeResponse {
            resolve_scope(
                &self.manager,
                &self.cache,
                &"main.arm".into(),
                &self.sources,
                &BuiltinTypeProvider,
                Ok(BuildConfig::default()),
            )
        }
    }

    const DNS_SOURCE: &str =
        "resource dns 'Microsoft.Network/dnsZones@2018-05-01' = {\n  name: 'name'\n  location: 'global'\n}";

    #[test]
    fn test_requests_single_resource_end_to_end() {
        let fixture = Fixture::with_source(DNS_SOURCE);
        let response = fixture.resolve();
        assert_eq!(response.scope, "resourceGroup");
        assert!(response.error_message.is_none());

        let template: serde_json::Value =
            serde_json::from_str(&response.template.unwrap()).unwrap();
        assert_eq!(
            template["resources"][0],
            serde_json::json!({
                "type": "Microsoft.Network/dnsZones",
                "apiVersion": "2018-05-01",
                "name": "name",
                "location": "global",
            })
        );
    }

    #[test]
    fn test_requests_truncated_source_degrades() {
        let fixture = Fixture::with_source(
            "resource dns 'Microsoft.Network/dnsZones@2018-05-01' = {\n  name: 'name'\n  location: 'global'",
        );
        let response = fixture.resolve();
        assert_eq!(response.scope, "None");
        assert!(response.template.is_none());
        assert!(response.error_message.is_some());
    }

    #[test]
    fn test_requests_explicit_scopes() {
        for scope in ["tenant", "managementGroup", "subscription", "resourceGroup"] {
            let fixture =
                Fixture::with_source(&format!("targetScope = '{}'\n{}", scope, DNS_SOURCE));
            assert_eq!(fixture.resolve().scope, scope);
        }
    }

    #[test]
    fn test_requests_unrecognized_scope_literal_is_none() {
        let fixture = Fixture::with_source(&format!("targetScope = 'region'\n{}", DNS_SOURCE));
        let response = fixture.resolve();
        assert_eq!(response.scope, "None");
        assert!(response.error_message.unwrap().contains("targetScope"));
    }

    #[test]
    fn test_requests_malformed_config_degrades() {
        let fixture = Fixture::with_source(DNS_SOURCE);
        let response = resolve_scope(
            &fixture.manager,
            &fixture.cache,
            &"main.arm".into(),
            &fixture.sources,
            &BuiltinTypeProvider,
            Err("invalid armature.json: expected value at line 1".to_string()),
        );
        assert_eq!(response.scope, "None");
        assert!(response.error_message.unwrap().contains("armature.json"));
    }

    #[test]
    fn test_requests_success_stashes_compilation_for_deploy() {
        let fixture = Fixture::with_source(DNS_SOURCE);
        fixture.resolve();

        let live = fixture
            .manager
            .get_or_create(&"main.arm".into(), &fixture.sources, &BuiltinTypeProvider)
            .unwrap();
        let claimed = fixture.cache.find_and_remove(&"main.arm".into()).unwrap();
        assert!(Arc::ptr_eq(&live, &claimed));
        assert!(fixture.cache.find_and_remove(&"main.arm".into()).is_none());
    }

    #[test]
    fn test_requests_failure_leaves_cache_empty() {
        let fixture = Fixture::with_source("var a = missing");
        fixture.resolve();
        assert!(fixture.cache.is_empty());
    }
}
