//! Database schema migrations for SQLite.
//!
//! Versioned migrations: each one transforms the schema from version N to N+1.

use rusqlite::Connection;

use medvault_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// Idempotent; safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {current} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: blobs and the audit ledger.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Content-addressed ciphertext
        CREATE TABLE blobs (
            address BLOB PRIMARY KEY,         -- 32 bytes, Blake3 of bytes
            bytes BLOB NOT NULL,
            stored_at INTEGER NOT NULL
        );

        -- Append-only audit trail, one row per entry
        CREATE TABLE audit_entries (
            seq INTEGER PRIMARY KEY,          -- starts at 0, no gaps
            prev_hash BLOB NOT NULL,          -- 32 bytes
            entry_hash BLOB NOT NULL,         -- 32 bytes
            actor_id TEXT NOT NULL,
            action TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,       -- Unix ms
            signature BLOB NOT NULL           -- 64 bytes, Ed25519 over entry_hash
        );

        CREATE INDEX idx_audit_subject_seq ON audit_entries(subject_id, seq);
        "#,
    )?;

    Ok(())
}
