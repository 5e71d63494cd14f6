//! Per-user document store.
//!
//! SQLite-backed storage for each user's sync state (credentials, cooldown
//! and lock fields) and the sub-collections the sync engine reconciles:
//! aggregate lists, ratings and per-show episode tracking. Writes from the
//! engine go through [`BatchWriter`], which keeps every transaction below
//! the operation ceiling.

pub mod batch;
pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use batch::{BatchWriter, MAX_BATCH_OPERATIONS};
pub use db::{SqliteStore, StoredDocument, SyncStore};
pub use error::StoreError;
pub use types::{
    AcquireOutcome, Collection, LockRejection, SyncCounts, SyncCredentials, UserSyncState,
};
