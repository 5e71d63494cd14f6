//! Document store trait and SQLite implementation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;

use super::error::StoreError;
use super::schema;
use super::types::{
    parse_instant, to_millis, AcquireOutcome, Collection, DocOp, LockRejection, SyncCounts,
    SyncCredentials, UserSyncState,
};

/// Decision callback evaluated inside the compare-and-acquire transaction.
///
/// Receives the user's record as read by the transaction (`None` when no
/// record exists) and either hands back the credentials to sync with, or a
/// rejection. The lock is written only on `Ok`.
pub type AcquireCheck<'a> =
    &'a (dyn Fn(Option<&UserSyncState>) -> Result<SyncCredentials, LockRejection> + Send + Sync);

/// A stored document together with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub data: Value,
}

/// Trait for the per-user document store.
///
/// Object-safe so the engine and HTTP layer can share an `Arc<dyn SyncStore>`.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Load a user's sync state, if the user has a record.
    async fn get_user(&self, user_id: &str) -> Result<Option<UserSyncState>, StoreError>;

    /// Mark the remote account as linked and store its credentials.
    ///
    /// Creates the user record when missing; leaves sync history untouched.
    async fn link_account(
        &self,
        user_id: &str,
        credentials: &SyncCredentials,
    ) -> Result<(), StoreError>;

    /// Atomically read the user record, run `check`, and write the lock
    /// timestamp only if `check` accepts.
    ///
    /// The read, the decision and the write happen in one write transaction,
    /// so two concurrent callers can never both acquire.
    async fn compare_and_acquire(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        check: AcquireCheck<'_>,
    ) -> Result<AcquireOutcome, StoreError>;

    /// Persist a refreshed credential pair and its expiry.
    async fn update_tokens(
        &self,
        user_id: &str,
        credentials: &SyncCredentials,
    ) -> Result<(), StoreError>;

    /// Record a successful sync and clear the lock in a single update.
    ///
    /// Only applies while the lock is still the one written at `locked_at`.
    /// Returns `false`, having written nothing, when another run has since
    /// overridden it.
    async fn finish_sync(
        &self,
        user_id: &str,
        locked_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        counts: &SyncCounts,
    ) -> Result<bool, StoreError>;

    /// Clear the lock field only, if it is still the one written at
    /// `locked_at`. Returns whether it was cleared.
    async fn release_lock(&self, user_id: &str, locked_at: DateTime<Utc>)
        -> Result<bool, StoreError>;

    /// Ids of every stored document in a sub-collection.
    async fn document_ids(
        &self,
        user_id: &str,
        collection: Collection,
    ) -> Result<HashSet<String>, StoreError>;

    /// All stored documents in a sub-collection, ordered by id.
    async fn documents(
        &self,
        user_id: &str,
        collection: Collection,
    ) -> Result<Vec<StoredDocument>, StoreError>;

    /// A single stored document.
    #[cfg(test)]
    async fn get_document(
        &self,
        user_id: &str,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Value>, StoreError>;

    /// Number of stored documents in a sub-collection.
    async fn count_documents(&self, user_id: &str, collection: Collection)
        -> Result<u64, StoreError>;

    /// Apply a group of operations, in order, as one transaction.
    async fn apply_batch(&self, user_id: &str, ops: &[DocOp]) -> Result<(), StoreError>;
}

/// SQLite implementation of the document store.
pub struct SqliteStore {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    /// Path to the database file (for error messages).
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path_clone.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| StoreError::CreateDir {
                        path: parent.to_path_buf(),
                        source: e,
                    })?;
                }
            }

            let conn = Connection::open(&path_clone).map_err(|e| StoreError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            // WAL lets status reads proceed while a sync is writing
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StoreError::Setup)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StoreError::Setup)?;
            // Another process may hold the write lock during compare-and-acquire
            conn.busy_timeout(std::time::Duration::from_secs(5))
                .map_err(StoreError::Setup)?;

            schema::migrate(&conn)?;

            Ok::<_, StoreError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Get the path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run raw SQL against the connection (for arranging test fixtures).
    #[cfg(test)]
    pub fn execute_raw(&self, sql: &str, params: impl rusqlite::Params) -> usize {
        self.conn.lock().unwrap().execute(sql, params).unwrap()
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))
    }
}

#[async_trait]
impl SyncStore for SqliteStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserSyncState>, StoreError> {
        let conn = self.lock_conn()?;
        load_user(&conn, user_id)
    }

    async fn link_account(
        &self,
        user_id: &str,
        credentials: &SyncCredentials,
    ) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"
            INSERT INTO users (user_id, connected, access_token, refresh_token, token_expires_at)
            VALUES (?1, 1, ?2, ?3, ?4)
            ON CONFLICT(user_id) DO UPDATE SET
                connected = 1,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                token_expires_at = excluded.token_expires_at
            "#,
            rusqlite::params![
                user_id,
                &credentials.access_token,
                &credentials.refresh_token,
                credentials.expires_at.map(to_millis),
            ],
        )
        .map_err(StoreError::query)?;

        Ok(())
    }

    async fn compare_and_acquire(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        check: AcquireCheck<'_>,
    ) -> Result<AcquireOutcome, StoreError> {
        let mut conn = self.lock_conn()?;

        // IMMEDIATE takes the write lock up front so a second process cannot
        // read the same unlocked state between our read and our write.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::query)?;

        let state = load_user(&tx, user_id)?;
        match check(state.as_ref()) {
            Ok(credentials) => {
                tx.execute(
                    "UPDATE users SET sync_lock_at = ?1 WHERE user_id = ?2",
                    rusqlite::params![to_millis(now), user_id],
                )
                .map_err(StoreError::query)?;
                tx.commit().map_err(StoreError::query)?;
                Ok(AcquireOutcome::Acquired(credentials))
            }
            Err(rejection) => {
                tx.rollback().map_err(StoreError::query)?;
                Ok(AcquireOutcome::Rejected(rejection))
            }
        }
    }

    async fn update_tokens(
        &self,
        user_id: &str,
        credentials: &SyncCredentials,
    ) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;

        conn.execute(
            "UPDATE users SET access_token = ?1, refresh_token = ?2, token_expires_at = ?3 WHERE user_id = ?4",
            rusqlite::params![
                &credentials.access_token,
                &credentials.refresh_token,
                credentials.expires_at.map(to_millis),
                user_id,
            ],
        )
        .map_err(StoreError::query)?;

        Ok(())
    }

    async fn finish_sync(
        &self,
        user_id: &str,
        locked_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        counts: &SyncCounts,
    ) -> Result<bool, StoreError> {
        let result = serde_json::to_string(counts)?;
        let conn = self.lock_conn()?;

        let updated = conn
            .execute(
                "UPDATE users SET last_sync_at = ?1, last_sync_result = ?2, sync_lock_at = NULL WHERE user_id = ?3 AND sync_lock_at = ?4",
                rusqlite::params![to_millis(completed_at), result, user_id, to_millis(locked_at)],
            )
            .map_err(StoreError::query)?;

        Ok(updated > 0)
    }

    async fn release_lock(
        &self,
        user_id: &str,
        locked_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.lock_conn()?;

        let updated = conn
            .execute(
                "UPDATE users SET sync_lock_at = NULL WHERE user_id = ?1 AND sync_lock_at = ?2",
                rusqlite::params![user_id, to_millis(locked_at)],
            )
            .map_err(StoreError::query)?;

        Ok(updated > 0)
    }

    async fn document_ids(
        &self,
        user_id: &str,
        collection: Collection,
    ) -> Result<HashSet<String>, StoreError> {
        let conn = self.lock_conn()?;

        let mut stmt = conn
            .prepare_cached("SELECT doc_id FROM documents WHERE user_id = ?1 AND collection = ?2")
            .map_err(StoreError::query)?;

        let ids = stmt
            .query_map([user_id, collection.as_str()], |row| row.get::<_, String>(0))
            .map_err(StoreError::query)?
            .collect::<Result<HashSet<_>, _>>()
            .map_err(StoreError::query)?;

        Ok(ids)
    }

    async fn documents(
        &self,
        user_id: &str,
        collection: Collection,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let conn = self.lock_conn()?;

        let mut stmt = conn
            .prepare_cached(
                "SELECT doc_id, data FROM documents WHERE user_id = ?1 AND collection = ?2 ORDER BY doc_id",
            )
            .map_err(StoreError::query)?;

        let rows = stmt
            .query_map([user_id, collection.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(StoreError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::query)?;

        rows.into_iter()
            .map(|(id, data)| {
                Ok(StoredDocument {
                    id,
                    data: serde_json::from_str(&data)?,
                })
            })
            .collect()
    }

    #[cfg(test)]
    async fn get_document(
        &self,
        user_id: &str,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Value>, StoreError> {
        let data: Option<String> = {
            let conn = self.lock_conn()?;
            conn.query_row(
                "SELECT data FROM documents WHERE user_id = ?1 AND collection = ?2 AND doc_id = ?3",
                [user_id, collection.as_str(), id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::query)?
        };

        data.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
            .transpose()
    }

    async fn count_documents(
        &self,
        user_id: &str,
        collection: Collection,
    ) -> Result<u64, StoreError> {
        let conn = self.lock_conn()?;

        let count = conn
            .query_row(
                "SELECT COUNT(*) FROM documents WHERE user_id = ?1 AND collection = ?2",
                [user_id, collection.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .map_err(StoreError::query)?;

        Ok(count as u64)
    }

    async fn apply_batch(&self, user_id: &str, ops: &[DocOp]) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock_conn()?;
        let updated_at = to_millis(Utc::now());

        let tx = conn.transaction().map_err(StoreError::query)?;
        {
            let mut upsert = tx
                .prepare_cached(
                    r#"
                    INSERT INTO documents (user_id, collection, doc_id, data, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(user_id, collection, doc_id) DO UPDATE SET
                        data = excluded.data,
                        updated_at = excluded.updated_at
                    "#,
                )
                .map_err(StoreError::query)?;
            let mut delete = tx
                .prepare_cached(
                    "DELETE FROM documents WHERE user_id = ?1 AND collection = ?2 AND doc_id = ?3",
                )
                .map_err(StoreError::query)?;

            for op in ops {
                match op {
                    DocOp::Set {
                        collection,
                        id,
                        data,
                    } => {
                        upsert
                            .execute(rusqlite::params![
                                user_id,
                                collection.as_str(),
                                id,
                                data,
                                updated_at
                            ])
                            .map_err(StoreError::query)?;
                    }
                    DocOp::Delete { collection, id } => {
                        delete
                            .execute(rusqlite::params![user_id, collection.as_str(), id])
                            .map_err(StoreError::query)?;
                    }
                }
            }
        }
        // Dropping an uncommitted transaction rolls it back
        tx.commit().map_err(StoreError::query)?;

        Ok(())
    }
}

/// Read a user's record, normalizing every timestamp through `parse_instant`.
fn load_user(conn: &Connection, user_id: &str) -> Result<Option<UserSyncState>, StoreError> {
    conn.query_row(
        "SELECT user_id, connected, access_token, refresh_token, token_expires_at, last_sync_at, last_sync_result, sync_lock_at FROM users WHERE user_id = ?1",
        [user_id],
        |row| {
            let last_sync_result: Option<String> = row.get(6)?;
            Ok(UserSyncState {
                user_id: row.get(0)?,
                connected: row.get::<_, Option<i64>>(1)?.unwrap_or(0) != 0,
                access_token: row.get(2)?,
                refresh_token: row.get(3)?,
                token_expires_at: parse_instant(row.get_ref(4)?),
                last_sync_at: parse_instant(row.get_ref(5)?),
                last_sync_result: last_sync_result.and_then(|raw| {
                    serde_json::from_str(&raw)
                        .map_err(|e| {
                            tracing::warn!(error = %e, "Ignoring unreadable last sync result");
                        })
                        .ok()
                }),
                sync_lock_at: parse_instant(row.get_ref(7)?),
            })
        },
    )
    .optional()
    .map_err(StoreError::query)
}
