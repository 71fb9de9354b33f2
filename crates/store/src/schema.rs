//! SQLite schema for persisted lecture artifacts.

use rusqlite::Connection;

use lectern_domain::error::Result;

use crate::store::from_sqlite;

/// Create the tables if they do not exist.
///
/// Cascade deletion from lectures is declared here and enforced at runtime
/// because every pooled connection opens with `PRAGMA foreign_keys = ON`.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS lectures (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL DEFAULT 'Untitled Lecture',
            status TEXT NOT NULL DEFAULT 'idle',
            summary TEXT,
            transcript TEXT,
            duration_seconds INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_lectures_updated ON lectures(updated_at);

        CREATE TABLE IF NOT EXISTS cards (
            id TEXT PRIMARY KEY,
            lecture_id TEXT NOT NULL REFERENCES lectures(id) ON DELETE CASCADE,
            kind TEXT NOT NULL DEFAULT 'auto_define',
            term TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            citations TEXT NOT NULL DEFAULT '[]',
            badge TEXT NOT NULL DEFAULT 'concept',
            lecture_timestamp_seconds INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_cards_lecture ON cards(lecture_id);

        CREATE TABLE IF NOT EXISTS takeaways (
            id TEXT PRIMARY KEY,
            lecture_id TEXT NOT NULL REFERENCES lectures(id) ON DELETE CASCADE,
            text TEXT NOT NULL,
            lecture_timestamp_seconds INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_takeaways_lecture ON takeaways(lecture_id);
        "#,
    )
    .map_err(from_sqlite)
}
