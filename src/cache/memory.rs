//! In-memory session store for tests and embedded use.

use std::sync::Mutex;

use super::{CacheEntry, SessionStore};

/// Session store backed by process memory only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entry: Mutex<CacheEntry>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with an entry.
    #[must_use]
    pub fn with_entry(entry: CacheEntry) -> Self {
        Self {
            entry: Mutex::new(entry),
        }
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> CacheEntry {
        self.entry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn save(&self, entry: &CacheEntry) {
        *self
            .entry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = entry.clone();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::CookieRecord;
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.load().is_empty());

        let entry = CacheEntry {
            cookies: vec![CookieRecord {
                name: "sid".to_string(),
                value: "v".to_string(),
                expires_at: None,
            }],
            user_agent: None,
        };
        store.save(&entry);
        assert_eq!(store.load(), entry);
    }

    #[test]
    fn test_with_entry_seeds_initial_state() {
        let entry = CacheEntry {
            cookies: vec![],
            user_agent: Some("UA".to_string()),
        };
        let store = MemoryStore::with_entry(entry.clone());
        assert_eq!(store.load(), entry);
    }
}
