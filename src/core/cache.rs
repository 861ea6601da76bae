//! Hand-off cache between scope resolution and deployment.
//!
//! The scope request stashes its compilation here so a subsequent deploy of
//! the same document reuses the exact object instead of recompiling. Claims
//! are exactly-once; an unclaimed entry is simply replaced by the next
//! insert.

use super::compilation::{lock, Compilation};
use super::types::DocumentId;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct CompilationCache {
    entries: Mutex<FxHashMap<DocumentId, Arc<Compilation>>>,
}

impl CompilationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stash a compilation. Last writer wins for the same identity.
    pub fn insert(&self, compilation: Arc<Compilation>) {
        lock(&self.entries).insert(compilation.entry().clone(), compilation);
    }

    /// Claim and evict atomically. A second claim for the same identity
    /// reports absence.
    pub fn find_and_remove(&self, id: &DocumentId) -> Option<Arc<Compilation>> {
        lock(&self.entries).remove(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checker::BuiltinTypeProvider;
    use crate::core::compilation::MemoryProvider;

    fn compile(source: &str) -> Arc<Compilation> {
        let sources = MemoryProvider::new();
        sources.put("main.arm", source);
        Arc::new(
            Compilation::compile("main.arm".into(), &sources, &BuiltinTypeProvider).unwrap(),
        )
    }

    #[test]
    fn test_cache_claim_is_exactly_once() {
        let cache = CompilationCache::new();
        let compilation = compile("var x = 1");
        cache.insert(Arc::clone(&compilation));

        let id: DocumentId = "main.arm".into();
        let claimed = cache.find_and_remove(&id).unwrap();
        assert!(Arc::ptr_eq(&claimed, &compilation));
        assert!(cache.find_and_remove(&id).is_none());
    }

    #[test]
    fn test_cache_insert_replaces_unclaimed_entry() {
        let cache = CompilationCache::new();
        let first = compile("var x = 1");
        let second = compile("var x = 2");
        cache.insert(Arc::clone(&first));
        cache.insert(Arc::clone(&second));
        assert_eq!(cache.len(), 1);

        let claimed = cache.find_and_remove(&"main.arm".into()).unwrap();
        assert!(Arc::ptr_eq(&claimed, &second));
        assert!(!Arc::ptr_eq(&claimed, &first));
    }

    #[test]
    fn test_cache_absence_is_none() {
        let cache = CompilationCache::new();
        assert!(cache.find_and_remove(&"never-inserted.arm".into()).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_concurrent_claims_yield_single_winner() {
        let cache = Arc::new(CompilationCache::new());
        cache.insert(compile("var x = 1"));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                cache.find_and_remove(&"main.arm".into()).is_some()
            }));
        }
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }
}
