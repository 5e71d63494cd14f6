//! The sync engine: acquire, refresh, fetch, plan, sweep, write, release.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use super::error::SyncError;
use super::lock::{self, LockPolicy};
use super::{finalize, plan, sweep, token};
use crate::remote::{fetch_snapshot, TrackerApi};
use crate::store::{
    BatchWriter, Collection, StoreError, SyncCounts, SyncCredentials, SyncStore,
    MAX_BATCH_OPERATIONS,
};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub cooldown: Duration,
    pub lock_timeout: Duration,
    /// Refresh the access token this long before it expires.
    pub refresh_margin: Duration,
    pub batch_limit: usize,
    pub fetch_concurrency: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(300),
            lock_timeout: Duration::from_secs(300),
            refresh_margin: Duration::from_secs(60),
            batch_limit: MAX_BATCH_OPERATIONS,
            fetch_concurrency: 8,
        }
    }
}

impl SyncSettings {
    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            cooldown: self.cooldown,
            lock_timeout: self.lock_timeout,
        }
    }
}

/// Result of a successful sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub success: bool,
    #[serde(flatten)]
    pub counts: SyncCounts,
}

pub struct SyncEngine {
    store: Arc<dyn SyncStore>,
    api: Arc<dyn TrackerApi>,
    settings: SyncSettings,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn SyncStore>,
        api: Arc<dyn TrackerApi>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            api,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run one complete sync for `user_id`.
    ///
    /// Once the lock is acquired it is always released, whether the body
    /// succeeds or fails.
    pub async fn run(&self, user_id: &str) -> Result<SyncReport, SyncError> {
        let span = tracing::info_span!("sync", user = %user_id, run = %Uuid::new_v4());
        self.run_locked(user_id).instrument(span).await
    }

    async fn run_locked(&self, user_id: &str) -> Result<SyncReport, SyncError> {
        let store = self.store.as_ref();
        let lease = lock::acquire(
            store,
            user_id,
            self.clock.now(),
            &self.settings.lock_policy(),
        )
        .await?;

        match self.sync_body(user_id, lease.credentials).await {
            Ok(counts) => {
                finalize::release_success(
                    store,
                    user_id,
                    lease.locked_at,
                    self.clock.now(),
                    &counts,
                )
                .await?;
                tracing::info!(
                    movies = counts.movies,
                    shows = counts.shows,
                    episodes = counts.episodes,
                    ratings = counts.ratings,
                    lists = counts.lists,
                    favorites = counts.favorites,
                    watchlist = counts.watchlist,
                    "Sync complete"
                );
                Ok(SyncReport {
                    success: true,
                    counts,
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "Sync failed");
                finalize::release_failure(store, user_id, lease.locked_at).await;
                Err(e)
            }
        }
    }

    async fn sync_body(
        &self,
        user_id: &str,
        credentials: SyncCredentials,
    ) -> Result<SyncCounts, SyncError> {
        let credentials = token::ensure_fresh(
            self.api.as_ref(),
            self.store.as_ref(),
            user_id,
            credentials,
            self.clock.now(),
            self.settings.refresh_margin,
        )
        .await?;

        let snapshot = fetch_snapshot(
            self.api.as_ref(),
            &credentials.access_token,
            self.settings.fetch_concurrency,
        )
        .await?;

        let plan = plan::plan(&snapshot, self.clock.now());
        self.write_plan(user_id, &plan).await?;
        Ok(plan.counts)
    }

    /// Sweep then write each sub-collection.
    async fn write_plan(&self, user_id: &str, plan: &plan::SyncPlan) -> Result<(), StoreError> {
        let store = self.store.as_ref();
        let mut writer = BatchWriter::new(store, user_id, self.settings.batch_limit);

        sweep::sweep_stale(
            store,
            &mut writer,
            user_id,
            Collection::Ratings,
            &plan.rating_keys(),
        )
        .await?;
        for (key, document) in &plan.ratings {
            writer.set(Collection::Ratings, key.as_str(), document).await?;
        }

        sweep::sweep_stale(
            store,
            &mut writer,
            user_id,
            Collection::EpisodeTracking,
            &plan.episode_keys(),
        )
        .await?;
        for (show_id, document) in &plan.episodes {
            writer
                .set(Collection::EpisodeTracking, show_id.as_str(), document)
                .await?;
        }

        sweep::sweep_synced_lists(store, &mut writer, user_id, &plan.list_ids()).await?;
        for (list_id, document) in &plan.lists {
            writer.set(Collection::Lists, list_id.as_str(), document).await?;
        }

        writer.commit().await?;
        tracing::debug!(
            commits = writer.commits(),
            operations = writer.operations(),
            "Wrote sync plan"
        );
        Ok(())
    }
}
