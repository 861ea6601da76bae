//! The compilation aggregate and the manager that owns live compilations.
//!
//! A `Compilation` is immutable once built. Recompiling a document produces a
//! fresh aggregate and swaps the `Arc` in the manager; readers holding the
//! old one keep a consistent snapshot.

use super::binder::{self, BindResult};
use super::checker::{self, CheckResult, ResourceTypeProvider};
use super::config::BuildConfig;
use super::emitter::{self, TemplateDocument};
use super::parser::{self, Decl, SyntaxTree};
use super::scope::resolve_deployment_scope;
use super::types::{codes, DeploymentScope, Diagnostic, DocumentId, Severity, Span, TypeInfo};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};

// ============================================================================
// Source access
// ============================================================================

/// Reads source text by document identity. The CLI uses the filesystem;
/// tests use an in-memory table.
pub trait SourceProvider: Send + Sync {
    fn read(&self, id: &DocumentId) -> Result<String, String>;
}

/// Filesystem-backed provider; document identities are paths.
#[derive(Debug, Default)]
pub struct FileSystemProvider;

impl SourceProvider for FileSystemProvider {
    fn read(&self, id: &DocumentId) -> Result<String, String> {
        std::fs::read_to_string(id.as_str())
            .map_err(|e| format!("cannot read {}: {}", id, e))
    }
}

/// In-memory provider keyed by document identity. Shared between tests and
/// the request layer's unit tests.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    documents: Mutex<FxHashMap<DocumentId, String>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, id: impl Into<DocumentId>, source: impl Into<String>) {
        lock(&self.documents).insert(id.into(), source.into());
    }
}

impl SourceProvider for MemoryProvider {
    fn read(&self, id: &DocumentId) -> Result<String, String> {
        lock(&self.documents)
            .get(id)
            .cloned()
            .ok_or_else(|| format!("no such document: {}", id))
    }
}

// ============================================================================
// Compilation aggregate
// ============================================================================

/// Everything the pipeline produced for one entry document.
#[derive(Debug)]
pub struct Compilation {
    entry: DocumentId,
    entry_tree: SyntaxTree,
    /// Module files referenced from the entry, in declaration order. Loaded
    /// and parsed for diagnostics and namespace imports; not emitted.
    module_trees: IndexMap<DocumentId, SyntaxTree>,
    bound: BindResult,
    checked: CheckResult,
    scope: DeploymentScope,
    diagnostics: Vec<Diagnostic>,
}

impl Compilation {
    /// Run the full pipeline for `entry`. An unreadable entry document is a
    /// hard error; an unreadable module file is an `ARM308` diagnostic.
    pub fn compile(
        entry: DocumentId,
        sources: &dyn SourceProvider,
        types: &dyn ResourceTypeProvider,
    ) -> Result<Self, String> {
        let source = sources.read(&entry)?;
        let (entry_tree, mut diagnostics) = parser::parse(&source);

        let mut module_trees = IndexMap::new();
        for decl in &entry_tree.decls {
            let Decl::Module { path, span, .. } = decl else {
                continue;
            };
            let module_id = entry.resolve(path);
            if module_trees.contains_key(&module_id) {
                continue;
            }
            match sources.read(&module_id) {
                Ok(text) => {
                    let (tree, module_diagnostics) = parser::parse(&text);
                    diagnostics.extend(module_diagnostics);
                    module_trees.insert(module_id, tree);
                }
                Err(reason) => {
                    diagnostics.push(Diagnostic::error(
                        codes::MODULE_NOT_FOUND,
                        *span,
                        format!("cannot load module '{}': {}", path, reason),
                    ));
                }
            }
        }

        let bound = binder::bind(&entry_tree);
        diagnostics.extend(bound.diagnostics.clone());
        let checked = checker::check(&entry_tree, &bound, types);
        diagnostics.extend(checked.diagnostics.clone());
        let scope = resolve_deployment_scope(&entry_tree);

        Ok(Self {
            entry,
            entry_tree,
            module_trees,
            bound,
            checked,
            scope,
            diagnostics,
        })
    }

    pub fn entry(&self) -> &DocumentId {
        &self.entry
    }

    pub fn entry_tree(&self) -> &SyntaxTree {
        &self.entry_tree
    }

    pub fn scope(&self) -> DeploymentScope {
        self.scope
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Namespace imports across the entry and every loaded module file,
    /// first occurrence order, deduplicated.
    pub fn namespace_imports(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let trees =
            std::iter::once(&self.entry_tree).chain(self.module_trees.values());
        for tree in trees {
            for decl in &tree.decls {
                if let Decl::Import { namespace, .. } = decl {
                    if !out.iter().any(|n| n == namespace) {
                        out.push(namespace.clone());
                    }
                }
            }
        }
        out
    }

    pub fn resource_dependencies(&self) -> IndexMap<String, Vec<String>> {
        self.bound.resource_dependencies()
    }

    pub fn type_of(&self, span: Span) -> Option<&TypeInfo> {
        self.checked.type_of(span)
    }

    pub fn symbol_type(&self, name: &str) -> Option<&TypeInfo> {
        self.checked.symbol_types.get(name)
    }

    pub fn emit_template(&self) -> Result<TemplateDocument, String> {
        emitter::emit(&self.entry_tree, &self.bound, self.scope, &self.diagnostics)
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Per-document compilation slot. The inner mutex serializes recompiles of
/// one document without blocking other documents.
#[derive(Debug, Default)]
struct DocumentSlot {
    current: Mutex<Option<Arc<Compilation>>>,
}

/// Owns the single live `Arc<Compilation>` per open document.
#[derive(Debug, Default)]
pub struct CompilationManager {
    slots: Mutex<FxHashMap<DocumentId, Arc<DocumentSlot>>>,
}

impl CompilationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live compilation for `id`, compiling it first if no live
    /// one exists. Repeated calls on an unchanged document return the same
    /// `Arc`.
    pub fn get_or_create(
        &self,
        id: &DocumentId,
        sources: &dyn SourceProvider,
        types: &dyn ResourceTypeProvider,
    ) -> Result<Arc<Compilation>, String> {
        let slot = self.slot(id);
        let mut current = lock(&slot.current);
        if let Some(live) = current.as_ref() {
            return Ok(Arc::clone(live));
        }
        let compiled = Arc::new(Compilation::compile(id.clone(), sources, types)?);
        *current = Some(Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Drop the live compilation so the next access recompiles. Readers
    /// holding the old `Arc` are unaffected.
    pub fn invalidate(&self, id: &DocumentId) {
        if let Some(slot) = lock(&self.slots).get(id).cloned() {
            *lock(&slot.current) = None;
        }
    }

    /// Release the document entirely.
    pub fn close(&self, id: &DocumentId) {
        lock(&self.slots).remove(id);
    }

    fn slot(&self, id: &DocumentId) -> Arc<DocumentSlot> {
        let mut slots = lock(&self.slots);
        Arc::clone(slots.entry(id.clone()).or_default())
    }
}

/// The config governing a compilation's entry document, when the identity is
/// a filesystem path.
pub fn config_for(compilation: &Compilation) -> Result<BuildConfig, String> {
    BuildConfig::load_for(std::path::Path::new(compilation.entry().as_str()))
}

/// Lock with poison recovery; the guarded state is valid after any panic in
/// a holder because every writer replaces values wholesale.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checker::BuiltinTypeProvider;

    const DNS_SOURCE: &str =
        "resource dns 'Microsoft.Network/dnsZones@2018-05-01' = {\n  name: 'name'\n  location: 'global'\n}";

    fn provider_with(entries: &[(&str, &str)]) -> MemoryProvider {
        let provider = MemoryProvider::new();
        for (id, source) in entries {
            provider.put(*id, *source);
        }
        provider
    }

    #[test]
    fn test_compilation_clean_pipeline() {
        let sources = provider_with(&[("main.arm", DNS_SOURCE)]);
        let compilation =
            Compilation::compile("main.arm".into(), &sources, &BuiltinTypeProvider).unwrap();
        assert!(!compilation.has_errors());
        assert_eq!(compilation.scope(), DeploymentScope::ResourceGroup);
        assert!(compilation.emit_template().is_ok());
    }

    #[test]
    fn test_compilation_unreadable_entry_is_err() {
        let sources = MemoryProvider::new();
        assert!(
            Compilation::compile("missing.arm".into(), &sources, &BuiltinTypeProvider).is_err()
        );
    }

    #[test]
    fn test_compilation_missing_module_is_diagnostic() {
        let sources = provider_with(&[(
            "main.arm",
            "module net './network.arm' = { name: 'net' }",
        )]);
        let compilation =
            Compilation::compile("main.arm".into(), &sources, &BuiltinTypeProvider).unwrap();
        assert!(compilation.has_errors());
        assert!(compilation
            .diagnostics()
            .iter()
            .any(|d| d.code == codes::MODULE_NOT_FOUND));
    }

    #[test]
    fn test_compilation_module_diagnostics_and_imports_surface() {
        let sources = provider_with(&[
            ("infra/main.arm", "module net './network.arm' = { name: 'net' }\nimport kubernetes"),
            ("infra/network.arm", "import helm\nvar broken = "),
        ]);
        let compilation =
            Compilation::compile("infra/main.arm".into(), &sources, &BuiltinTypeProvider)
                .unwrap();
        assert!(compilation.has_errors());
        assert_eq!(
            compilation.namespace_imports(),
            vec!["kubernetes".to_string(), "helm".to_string()]
        );
    }

    #[test]
    fn test_manager_returns_same_arc_for_unchanged_document() {
        let sources = provider_with(&[("main.arm", DNS_SOURCE)]);
        let manager = CompilationManager::new();
        let id: DocumentId = "main.arm".into();
        let first = manager
            .get_or_create(&id, &sources, &BuiltinTypeProvider)
            .unwrap();
        let second = manager
            .get_or_create(&id, &sources, &BuiltinTypeProvider)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_manager_invalidate_produces_distinct_compilation() {
        let sources = provider_with(&[("main.arm", DNS_SOURCE)]);
        let manager = CompilationManager::new();
        let id: DocumentId = "main.arm".into();
        let first = manager
            .get_or_create(&id, &sources, &BuiltinTypeProvider)
            .unwrap();
        sources.put("main.arm", "var changed = 1");
        manager.invalidate(&id);
        let second = manager
            .get_or_create(&id, &sources, &BuiltinTypeProvider)
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        // The old snapshot is still intact
        assert_eq!(first.entry_tree().decls.len(), 1);
    }

    #[test]
    fn test_manager_documents_are_independent() {
        let sources = provider_with(&[("a.arm", DNS_SOURCE), ("b.arm", "var x = 1")]);
        let manager = CompilationManager::new();
        let a = manager
            .get_or_create(&"a.arm".into(), &sources, &BuiltinTypeProvider)
            .unwrap();
        manager.invalidate(&"b.arm".into());
        let a_again = manager
            .get_or_create(&"a.arm".into(), &sources, &BuiltinTypeProvider)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &a_again));
    }

    #[test]
    fn test_manager_concurrent_readers_share_one_compilation() {
        let sources = Arc::new(provider_with(&[("main.arm", DNS_SOURCE)]));
        let manager = Arc::new(CompilationManager::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            let sources = Arc::clone(&sources);
            handles.push(std::thread::spawn(move || {
                manager
                    .get_or_create(&"main.arm".into(), &*sources, &BuiltinTypeProvider)
                    .unwrap()
            }));
        }
        let compilations: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for pair in compilations.windows(2) {
            assert!(Arc::ptr_eq(&pair[0], &pair[1]));
        }
    }
}
