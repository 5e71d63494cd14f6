//! Versioned schema for the document store.
//!
//! `PRAGMA user_version` records how many entries of [`MIGRATIONS`] have been
//! applied. Each step runs in its own transaction together with the version
//! bump, so an interrupted upgrade resumes at the failed step.

use rusqlite::Connection;

use super::error::StoreError;

/// Ordered schema steps; step `n` upgrades version `n` to `n + 1`.
///
/// The timestamp columns on `users` are deliberately untyped: current writes
/// are epoch milliseconds, but records imported from older deployments may
/// hold RFC 3339 text or numeric strings.
const MIGRATIONS: &[&str] = &[r#"
CREATE TABLE users (
    user_id TEXT PRIMARY KEY NOT NULL,
    connected INTEGER NOT NULL DEFAULT 0,
    access_token TEXT,
    refresh_token TEXT,
    token_expires_at,
    last_sync_at,
    last_sync_result TEXT,
    sync_lock_at
);

CREATE TABLE documents (
    user_id TEXT NOT NULL,
    collection TEXT NOT NULL,
    doc_id TEXT NOT NULL,
    data TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (user_id, collection, doc_id)
);

CREATE INDEX idx_documents_collection ON documents(user_id, collection);
"#];

/// Schema version this build writes.
pub const SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, StoreError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Bring the schema up to [`SCHEMA_VERSION`]. A no-op when already current.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let found = get_schema_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchemaVersion {
            found,
            expected: SCHEMA_VERSION,
        });
    }

    for (step, sql) in MIGRATIONS.iter().enumerate().skip(found.max(0) as usize) {
        let target = step as i32 + 1;
        conn.execute_batch(&format!(
            "BEGIN;\n{sql}\nPRAGMA user_version = {target};\nCOMMIT;"
        ))
        .inspect_err(|_| {
            let _ = conn.execute_batch("ROLLBACK");
        })?;
        tracing::info!(version = target, "Migrated document store schema");
    }

    Ok(())
}
