//! Database schema migrations for SQLite.
//!
//! Versioned migrations: each one transforms the schema from version N to N+1
//! inside a single transaction.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// Idempotent.
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
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, crate::sqlite::now_secs()],
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
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Envelopes, content-addressed, in arrival order
        CREATE TABLE envelopes (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,  -- arrival sequence
            hash BLOB NOT NULL UNIQUE,              -- 32 bytes, Blake3 of header || ciphertext
            version INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,             -- sender-claimed (Unix s)
            ttl_periods INTEGER NOT NULL,
            sender TEXT,                            -- address, NULL when anonymous
            recipient_tag BLOB NOT NULL,            -- 32 bytes
            claims_paid INTEGER NOT NULL,
            ciphertext BLOB NOT NULL,
            funding_txid BLOB,                      -- 32 bytes, NULL when free
            paid INTEGER NOT NULL DEFAULT 0,        -- funding verified locally
            read INTEGER NOT NULL DEFAULT 0,
            received_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            bucket INTEGER NOT NULL
        );

        -- Local messaging keys (wallet-derived and standalone)
        CREATE TABLE local_keys (
            address TEXT PRIMARY KEY,
            public_key BLOB NOT NULL,               -- 32 bytes, X25519
            kind INTEGER NOT NULL,                  -- 0=wallet, 1=standalone
            receiving_enabled INTEGER NOT NULL,
            label TEXT NOT NULL,
            secret BLOB,                            -- standalone keys only
            created_at INTEGER NOT NULL
        );

        -- Public keys of other parties
        CREATE TABLE peer_keys (
            address TEXT PRIMARY KEY,
            public_key BLOB NOT NULL,
            added_at INTEGER NOT NULL
        );

        -- Sent envelopes and funding progress
        CREATE TABLE outbox (
            hash BLOB PRIMARY KEY,
            envelope BLOB NOT NULL,                 -- CBOR
            state INTEGER NOT NULL,                 -- 0=broadcast 1=confirmed 2=sent 3=rejected
            fee INTEGER NOT NULL,
            txid BLOB,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX idx_envelopes_recipient ON envelopes(recipient_tag, seq);
        CREATE INDEX idx_envelopes_expires ON envelopes(expires_at);
        CREATE INDEX idx_envelopes_bucket ON envelopes(bucket);
        CREATE INDEX idx_outbox_state ON outbox(state);
        "#,
    )?;

    Ok(())
}
