//! Extension dispatch: maps a compilation's namespace imports to the
//! provider binaries that will serve them.

use crate::core::compilation::Compilation;
use crate::core::config::BuildConfig;
use std::path::PathBuf;

/// A provider binary bound to a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryExtensionReference {
    pub namespace: String,
    pub binary: PathBuf,
}

/// Namespace → binary lookup. Statically registered; no probing.
pub trait ArtifactResolver {
    fn resolve(&self, namespace: &str) -> Option<PathBuf>;
}

/// Resolver backed by the project config's `extensions` table.
#[derive(Debug)]
pub struct ConfigResolver<'a> {
    config: &'a BuildConfig,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(config: &'a BuildConfig) -> Self {
        Self { config }
    }
}

impl ArtifactResolver for ConfigResolver<'_> {
    fn resolve(&self, namespace: &str) -> Option<PathBuf> {
        self.config.extension_binary(namespace).map(PathBuf::from)
    }
}

/// Resolve every namespace import across the compilation's reachable files.
/// A namespace the resolver cannot place is omitted; it never aborts the
/// rest.
pub fn dispatch(
    compilation: &Compilation,
    resolver: &dyn ArtifactResolver,
) -> Vec<BinaryExtensionReference> {
    compilation
        .namespace_imports()
        .into_iter()
        .filter_map(|namespace| {
            resolver
                .resolve(&namespace)
                .map(|binary| BinaryExtensionReference { namespace, binary })
        })
        .collect()
}
