//! Chunked batch writer.
//!
//! Callers queue `set`/`delete` operations; the writer commits them to the
//! store in chunks of at most `limit` operations. Operations land in the
//! order they were queued. Chunks commit independently, so a failed chunk
//! does not roll back the ones already committed.

use serde::Serialize;

use super::db::SyncStore;
use super::error::StoreError;
use super::types::{Collection, DocOp};

/// Default per-commit operation ceiling.
pub const MAX_BATCH_OPERATIONS: usize = 500;

/// Accumulates document operations for one user and flushes them in chunks.
///
/// One writer per sync invocation; it is not shared between tasks.
pub struct BatchWriter<'a> {
    store: &'a dyn SyncStore,
    user_id: &'a str,
    limit: usize,
    pending: Vec<DocOp>,
    commits: usize,
    operations: usize,
}

impl std::fmt::Debug for BatchWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("user_id", &self.user_id)
            .field("limit", &self.limit)
            .field("pending", &self.pending.len())
            .field("commits", &self.commits)
            .finish()
    }
}

impl<'a> BatchWriter<'a> {
    pub fn new(store: &'a dyn SyncStore, user_id: &'a str, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            store,
            user_id,
            limit,
            pending: Vec::with_capacity(limit.min(MAX_BATCH_OPERATIONS)),
            commits: 0,
            operations: 0,
        }
    }

    /// Queue a full overwrite of one document.
    pub async fn set<T: Serialize + ?Sized>(
        &mut self,
        collection: Collection,
        id: impl Into<String>,
        document: &T,
    ) -> Result<(), StoreError> {
        let data = serde_json::to_string(document)?;
        self.pending.push(DocOp::Set {
            collection,
            id: id.into(),
            data,
        });
        self.commit_if_needed().await
    }

    /// Queue deletion of one document.
    pub async fn delete(
        &mut self,
        collection: Collection,
        id: impl Into<String>,
    ) -> Result<(), StoreError> {
        self.pending.push(DocOp::Delete {
            collection,
            id: id.into(),
        });
        self.commit_if_needed().await
    }

    /// True once the pending operation count has reached the ceiling.
    pub fn should_commit(&self) -> bool {
        self.pending.len() >= self.limit
    }

    pub async fn commit_if_needed(&mut self) -> Result<(), StoreError> {
        if self.should_commit() {
            self.commit().await?;
        }
        Ok(())
    }

    /// Flush everything pending. A no-op when nothing is queued.
    pub async fn commit(&mut self) -> Result<(), StoreError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let ops = std::mem::take(&mut self.pending);
        self.store.apply_batch(self.user_id, &ops).await?;
        self.commits += 1;
        self.operations += ops.len();
        tracing::debug!(
            user = %self.user_id,
            operations = ops.len(),
            commit = self.commits,
            "Committed batch"
        );
        Ok(())
    }

    /// Number of physical commits issued so far.
    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Number of operations committed so far.
    pub fn operations(&self) -> usize {
        self.operations
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
