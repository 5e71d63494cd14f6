use std::path::PathBuf;
use std::time::Duration;

use crate::cli::{EngineArgs, StoreArgs, TrackerArgs};
use crate::remote::TrackerConfig;
use crate::store::MAX_BATCH_OPERATIONS;
use crate::sync::SyncSettings;

/// Everything needed to build a [`crate::sync::SyncEngine`].
pub struct Config {
    pub database: PathBuf,
    pub tracker: TrackerConfig,
    pub settings: SyncSettings,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database", &self.database)
            .field("tracker", &self.tracker)
            .field("settings", &self.settings)
            .finish()
    }
}

/// Expand ~ to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn database_path(store: &StoreArgs) -> PathBuf {
    expand_tilde(&store.database)
}

fn required(value: &Option<String>, what: &str, env: &str) -> anyhow::Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => anyhow::bail!("Missing {what}: pass --{} or set {env}", what.replace(' ', "-")),
    }
}

impl Config {
    pub fn from_engine_args(
        store: &StoreArgs,
        tracker: &TrackerArgs,
        engine: &EngineArgs,
    ) -> anyhow::Result<Self> {
        let client_id = required(&tracker.client_id, "client id", "TRACKER_CLIENT_ID")?;
        let client_secret =
            required(&tracker.client_secret, "client secret", "TRACKER_CLIENT_SECRET")?;

        if !(1..=MAX_BATCH_OPERATIONS).contains(&engine.batch_limit) {
            anyhow::bail!(
                "--batch-limit must be between 1 and {}, got {}",
                MAX_BATCH_OPERATIONS,
                engine.batch_limit
            );
        }
        if engine.fetch_concurrency == 0 {
            anyhow::bail!("--fetch-concurrency must be at least 1");
        }
        if tracker.http_timeout_secs == 0 {
            anyhow::bail!("--http-timeout-secs must be at least 1");
        }
        if !tracker.api_url.starts_with("http://") && !tracker.api_url.starts_with("https://") {
            anyhow::bail!("--api-url must be an http(s) URL, got {}", tracker.api_url);
        }

        Ok(Self {
            database: database_path(store),
            tracker: TrackerConfig {
                api_url: tracker.api_url.clone(),
                client_id,
                client_secret,
                redirect_uri: tracker.redirect_uri.clone(),
                timeout: Duration::from_secs(tracker.http_timeout_secs),
            },
            settings: SyncSettings {
                cooldown: Duration::from_secs(engine.cooldown_secs),
                lock_timeout: Duration::from_secs(engine.lock_timeout_secs),
                batch_limit: engine.batch_limit,
                fetch_concurrency: engine.fetch_concurrency,
                ..SyncSettings::default()
            },
        })
    }
}
