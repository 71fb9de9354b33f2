//! Per-session LRU cache of already-defined terms.
//!
//! Keyed by the normalized term so "Transformer", " transformer " and
//! "TRANSFORMER" all hit the same slot. Bounded; the least-recently-used
//! entry is evicted on overflow. One cache per session, never shared
//! across sessions.

use std::collections::HashMap;

use parking_lot::Mutex;

use lectern_domain::analysis::CardDraft;

const DEFAULT_CAPACITY: usize = 512;

/// Trim, lowercase, and collapse internal whitespace.
pub fn normalize_term(term: &str) -> String {
    term.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

struct Slot {
    value: CardDraft,
    last_used: u64,
}

struct Inner {
    slots: HashMap<String, Slot>,
    clock: u64,
}

/// Bounded cache of definition records, keyed by normalized term.
pub struct TermCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl Default for TermCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TermCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                clock: 0,
            }),
            capacity,
        }
    }

    pub fn contains(&self, term: &str) -> bool {
        self.inner.lock().slots.contains_key(&normalize_term(term))
    }

    /// Fetch a record and mark it most-recently-used.
    pub fn get(&self, term: &str) -> Option<CardDraft> {
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;
        let slot = inner.slots.get_mut(&normalize_term(term))?;
        slot.last_used = clock;
        Some(slot.value.clone())
    }

    /// Insert a record, marking it most-recently-used and evicting the
    /// least-recently-used entry on overflow.
    pub fn put(&self, term: &str, value: CardDraft) {
        let key = normalize_term(term);
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;
        inner.slots.insert(key, Slot { value, last_used: clock });

        if inner.slots.len() > self.capacity {
            // A linear min-scan is fine at this capacity.
            let oldest = inner
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                inner.slots.remove(&oldest);
            }
        }
    }

    /// Return only the terms not yet present in the cache.
    ///
    /// Lookup does not refresh recency.
    pub fn filter_new(&self, terms: &[&str]) -> Vec<String> {
        let inner = self.inner.lock();
        terms
            .iter()
            .filter(|term| !inner.slots.contains_key(&normalize_term(term)))
            .map(|term| term.to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().slots.is_empty()
    }
}
