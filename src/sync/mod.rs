//! Reconciliation of a linked tracker account into the local document store.
//!
//! [`SyncEngine::run`] takes the per-user lock, refreshes credentials if
//! needed, fetches a full remote snapshot, plans the target image of each
//! sub-collection, sweeps stale documents, writes fresh ones in bounded
//! batches and finally releases the lock.

pub mod engine;
pub mod error;
pub mod finalize;
pub mod lock;
pub mod plan;
pub mod sweep;
pub mod token;

#[cfg(test)]
pub use engine::Clock;
pub use engine::{SyncEngine, SyncSettings};
pub use error::SyncError;
