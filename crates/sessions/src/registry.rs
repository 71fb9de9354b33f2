//! Process-wide map of per-session shared state.
//!
//! Creation is lazy on first use; removal is explicit on session end.
//! This is the only cross-session mutable state besides the artifact store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::term_cache::TermCache;

#[derive(Default)]
pub struct SessionRegistry {
    caches: Mutex<HashMap<String, Arc<TermCache>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the term cache for a lecture, creating it on first use.
    pub fn cache_for(&self, lecture_id: &str) -> Arc<TermCache> {
        let mut caches = self.caches.lock();
        caches
            .entry(lecture_id.to_owned())
            .or_insert_with(|| Arc::new(TermCache::new()))
            .clone()
    }

    /// Drop all per-session state for a lecture.
    pub fn drop_session(&self, lecture_id: &str) {
        if self.caches.lock().remove(lecture_id).is_some() {
            tracing::debug!(lecture_id, "session cache dropped");
        }
    }

    pub fn len(&self) -> usize {
        self.caches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_is_created_lazily_and_shared() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty());

        let first = registry.cache_for("lecture-1");
        let second = registry.cache_for("lecture-1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn sessions_are_isolated() {
        let registry = SessionRegistry::new();
        let a = registry.cache_for("lecture-a");
        let b = registry.cache_for("lecture-b");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn drop_session_removes_the_cache() {
        let registry = SessionRegistry::new();
        registry.cache_for("lecture-1");
        registry.drop_session("lecture-1");
        assert!(registry.is_empty());

        // Dropping an unknown session is a no-op.
        registry.drop_session("lecture-2");
    }
}
