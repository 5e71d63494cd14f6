use chrono::{DateTime, Utc};

use crate::store::{StoreError, SyncCounts, SyncStore};

/// Record the successful sync and clear the lock in one update.
///
/// If that update fails the lock is still cleared on a best-effort basis
/// and the original error is returned. A lock taken over by another run is
/// left alone, and so is the sync record.
pub async fn release_success(
    store: &dyn SyncStore,
    user_id: &str,
    locked_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    counts: &SyncCounts,
) -> Result<(), StoreError> {
    match store
        .finish_sync(user_id, locked_at, completed_at, counts)
        .await
    {
        Ok(true) => {
            tracing::debug!(user = %user_id, "Released sync lock after success");
            Ok(())
        }
        Ok(false) => {
            tracing::warn!(
                user = %user_id,
                "Sync lock was overridden while running; leaving it to the newer run"
            );
            Ok(())
        }
        Err(e) => {
            release_failure(store, user_id, locked_at).await;
            Err(e)
        }
    }
}

/// Clear the lock after a failed sync. Errors are logged, never returned.
pub async fn release_failure(store: &dyn SyncStore, user_id: &str, locked_at: DateTime<Utc>) {
    match store.release_lock(user_id, locked_at).await {
        Ok(true) => tracing::debug!(user = %user_id, "Released sync lock after failure"),
        Ok(false) => tracing::warn!(
            user = %user_id,
            "Sync lock was overridden while running; leaving it to the newer run"
        ),
        Err(e) => tracing::error!(
            user = %user_id,
            error = %e,
            "Failed to release sync lock; it will expire after the lock timeout"
        ),
    }
}
