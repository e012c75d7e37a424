//! Authorization cache: the in-memory blacklist.
//!
//! The cache shadows the persistent `blacklist` table with deferred
//! write-back. It is hydrated once at boot, reconciled against the live
//! principal set when the platform finishes syncing, consulted on every
//! dispatch, and flushed back wholesale at shutdown. Administrative edits
//! happen out-of-process against the same table and are only observed at
//! the next boot.

mod schema;
mod store;

pub use store::BlacklistStore;

use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::logbuf::LogSink;

/// Opaque numeric identifier of a platform user.
pub type PrincipalId = u64;

/// A blocked principal and the reason it was blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    /// Blocked principal.
    pub principal: PrincipalId,
    /// Human-readable block reason, shown to the principal on rejection.
    pub reason: String,
}

/// In-memory view of the persisted blacklist.
#[derive(Debug, Default)]
pub struct BlacklistCache {
    entries: HashMap<PrincipalId, String>,
}

impl BlacklistCache {
    /// Read every row from the store into memory.
    ///
    /// Called once at boot, before the platform connection is authenticated.
    /// A store failure here is fatal: the process must not dispatch commands
    /// without authorization state.
    pub fn hydrate(store: &BlacklistStore, logs: &LogSink) -> Result<Self> {
        let mut entries = HashMap::new();
        for entry in store.load_all()? {
            logs.append(format!(
                "Principal {} is blacklisted for {}",
                entry.principal, entry.reason
            ));
            entries.insert(entry.principal, entry.reason);
        }
        Ok(Self { entries })
    }

    /// Drop entries whose principal is not in the live platform's known-user
    /// set. Returns the number of entries removed.
    ///
    /// Called once, right after the platform signals full sync, to shed
    /// stale blocks for accounts that vanished.
    pub fn reconcile(&mut self, active: &HashSet<PrincipalId>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|principal, _| active.contains(principal));
        before - self.entries.len()
    }

    /// Whether `principal` is blocked. Hot path; O(1).
    #[must_use]
    pub fn contains(&self, principal: PrincipalId) -> bool {
        self.entries.contains_key(&principal)
    }

    /// The stored block reason for `principal`, if any.
    #[must_use]
    pub fn reason(&self, principal: PrincipalId) -> Option<&str> {
        self.entries.get(&principal).map(String::as_str)
    }

    /// Add or replace an entry.
    ///
    /// The daemon itself never mutates the cache at runtime; blocks are an
    /// administrator concern persisted directly to storage. This exists for
    /// tests and local tooling.
    pub fn insert(&mut self, principal: PrincipalId, reason: impl Into<String>) {
        self.entries.insert(principal, reason.into());
    }

    /// Write all current entries to the store, replacing the persisted set.
    ///
    /// Called exactly once during orderly shutdown, before the store is
    /// closed. This is the only durability point for in-run cache changes.
    pub fn flush(&self, store: &BlacklistStore) -> Result<()> {
        store.replace_all(&self.to_entries())
    }

    /// Current entries, sorted by principal for deterministic output.
    #[must_use]
    pub fn to_entries(&self) -> Vec<BlockEntry> {
        let mut entries: Vec<BlockEntry> = self
            .entries
            .iter()
            .map(|(&principal, reason)| BlockEntry {
                principal,
                reason: reason.clone(),
            })
            .collect();
        entries.sort_by_key(|e| e.principal);
        entries
    }

    /// Number of blocked principals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no principal is blocked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn populated_store() -> BlacklistStore {
        let store = BlacklistStore::open_in_memory().unwrap();
        store.ensure_layout().unwrap();
        store
            .replace_all(&[
                BlockEntry {
                    principal: 1,
                    reason: "spam".to_owned(),
                },
                BlockEntry {
                    principal: 2,
                    reason: "abuse".to_owned(),
                },
            ])
            .unwrap();
        store
    }

    #[test]
    fn hydrate_reads_all_rows() {
        let store = populated_store();
        let logs = LogSink::new(16);

        let cache = BlacklistCache::hydrate(&store, &logs).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(1));
        assert_eq!(cache.reason(2), Some("abuse"));
        assert_eq!(logs.len(), 2);
    }

    #[test]
    fn hydrate_from_empty_store_yields_empty_cache() {
        let store = BlacklistStore::open_in_memory().unwrap();
        store.ensure_layout().unwrap();
        let logs = LogSink::new(16);

        let cache = BlacklistCache::hydrate(&store, &logs).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn flush_then_hydrate_round_trips() {
        let store = BlacklistStore::open_in_memory().unwrap();
        store.ensure_layout().unwrap();
        let logs = LogSink::new(16);

        let mut cache = BlacklistCache::default();
        cache.insert(1, "spam");
        cache.insert(2, "abuse");
        cache.flush(&store).unwrap();

        let rehydrated = BlacklistCache::hydrate(&store, &logs).unwrap();
        assert_eq!(rehydrated.to_entries(), cache.to_entries());
    }

    #[test]
    fn reconcile_removes_only_vanished_principals() {
        let mut cache = BlacklistCache::default();
        cache.insert(1, "spam");
        cache.insert(2, "abuse");
        cache.insert(3, "ban evasion");

        let active: HashSet<PrincipalId> = [1, 2].into_iter().collect();
        let removed = cache.reconcile(&active);

        assert_eq!(removed, 1);
        assert!(!cache.contains(3));
        assert_eq!(cache.reason(1), Some("spam"));
        assert_eq!(cache.reason(2), Some("abuse"));
    }

    #[test]
    fn reconcile_against_empty_set_clears_everything() {
        let mut cache = BlacklistCache::default();
        cache.insert(5, "spam");

        let removed = cache.reconcile(&HashSet::new());
        assert_eq!(removed, 1);
        assert!(cache.is_empty());
    }
}
