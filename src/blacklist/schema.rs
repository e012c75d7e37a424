//! SQLite DDL for the blacklist store.
//!
//! The `CREATE TABLE` statements live here so they are reviewable and
//! testable in isolation. The administrative web tool writes the same table
//! out-of-process; the daemon only observes those edits at its next boot.

use rusqlite::Connection;

/// Complete DDL for the blacklist database.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
-- Enable WAL mode so the admin tool can read while the daemon holds the
-- connection open.
PRAGMA journal_mode = WAL;

-- Blocked principals and the reason each one was blocked.
CREATE TABLE IF NOT EXISTS blacklist (
    principal INTEGER PRIMARY KEY,
    reason    TEXT NOT NULL
);
"#;

/// Apply the full schema to an open connection.
///
/// Safe to call multiple times — all statements use `IF NOT EXISTS`.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn apply_schema_creates_table() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        apply_schema(&conn).expect("apply_schema");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare")
            .query_map([], |row| row.get(0))
            .expect("query")
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"blacklist".to_owned()));
    }

    #[test]
    fn apply_schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        apply_schema(&conn).expect("first apply_schema");
        apply_schema(&conn).expect("second apply_schema (idempotent)");
    }
}
