//! SQLite-backed blacklist store.
//!
//! Thread-safe via an internal `Mutex<Connection>`. All access is serialized;
//! the daemon only touches the store at boot (hydrate) and shutdown (flush),
//! so contention is not a concern.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, params};

use super::schema::apply_schema;
use super::{BlockEntry, PrincipalId};
use crate::error::{Result, WardenError};

/// Persistent store for [`BlockEntry`] rows.
pub struct BlacklistStore {
    conn: Mutex<Connection>,
}

impl BlacklistStore {
    /// Open (or create) the database at `path`.
    ///
    /// Does not apply the schema; call [`ensure_layout`](Self::ensure_layout)
    /// before the first query.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| WardenError::Storage("store connection lock poisoned".to_owned()))
    }

    /// Idempotent schema application.
    pub fn ensure_layout(&self) -> Result<()> {
        let conn = self.lock()?;
        apply_schema(&conn)?;
        Ok(())
    }

    /// Read every blacklist row.
    pub fn load_all(&self) -> Result<Vec<BlockEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT principal, reason FROM blacklist")?;
        let rows = stmt.query_map([], |row| {
            let principal: i64 = row.get(0)?;
            let reason: String = row.get(1)?;
            Ok(BlockEntry {
                principal: principal as PrincipalId,
                reason,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Replace the entire persisted set with `entries`, atomically.
    ///
    /// This is the only write the daemon performs: a wholesale DELETE plus
    /// batch INSERT inside one transaction. Incremental writes are not
    /// supported; administrator edits made between hydrate and flush are
    /// overwritten (a documented durability trade-off).
    pub fn replace_all(&self, entries: &[BlockEntry]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM blacklist", [])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO blacklist (principal, reason) VALUES (?1, ?2)")?;
            for entry in entries {
                stmt.execute(params![entry.principal as i64, entry.reason])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn entry(principal: PrincipalId, reason: &str) -> BlockEntry {
        BlockEntry {
            principal,
            reason: reason.to_owned(),
        }
    }

    #[test]
    fn load_from_empty_store() {
        let store = BlacklistStore::open_in_memory().unwrap();
        store.ensure_layout().unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn replace_all_then_load_round_trips() {
        let store = BlacklistStore::open_in_memory().unwrap();
        store.ensure_layout().unwrap();

        let entries = vec![entry(1, "spam"), entry(2, "abuse")];
        store.replace_all(&entries).unwrap();

        let mut loaded = store.load_all().unwrap();
        loaded.sort_by_key(|e| e.principal);
        assert_eq!(loaded, entries);
    }

    #[test]
    fn replace_all_discards_previous_rows() {
        let store = BlacklistStore::open_in_memory().unwrap();
        store.ensure_layout().unwrap();

        store.replace_all(&[entry(1, "spam"), entry(2, "abuse")]).unwrap();
        store.replace_all(&[entry(3, "ban evasion")]).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded, vec![entry(3, "ban evasion")]);
    }

    #[test]
    fn replace_all_with_empty_set_clears_store() {
        let store = BlacklistStore::open_in_memory().unwrap();
        store.ensure_layout().unwrap();

        store.replace_all(&[entry(9, "scraping")]).unwrap();
        store.replace_all(&[]).unwrap();

        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.db");

        {
            let store = BlacklistStore::open(&path).unwrap();
            store.ensure_layout().unwrap();
            store.replace_all(&[entry(7, "spam")]).unwrap();
        }

        let store = BlacklistStore::open(&path).unwrap();
        store.ensure_layout().unwrap();
        assert_eq!(store.load_all().unwrap(), vec![entry(7, "spam")]);
    }
}
