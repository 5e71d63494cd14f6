use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::remote::endpoints::{DEFAULT_API_URL, OOB_REDIRECT_URI};
use crate::server::DEFAULT_USER_HEADER;
use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "watchsync",
    version,
    about = "Reconcile linked tracker accounts into the local document store"
)]
pub struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Run one sync for a user and print the counts
    Sync(SyncArgs),
    /// Show a user's sync state
    Status(StatusArgs),
    /// Store credentials obtained out-of-band for a user
    Link(LinkArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Path to the SQLite database
    #[arg(long, env = "WATCHSYNC_DATABASE", default_value = "~/.watchsync/watchsync.db")]
    pub database: String,
}

#[derive(Args, Clone)]
pub struct TrackerArgs {
    /// Tracker API client id
    #[arg(long, env = "TRACKER_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Tracker API client secret.
    /// Prefer the TRACKER_CLIENT_SECRET environment variable; flags are
    /// visible in process listings.
    #[arg(long, env = "TRACKER_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Redirect URI registered with the tracker application
    #[arg(long, env = "TRACKER_REDIRECT_URI", default_value = OOB_REDIRECT_URI)]
    pub redirect_uri: String,

    /// Tracker API base URL
    #[arg(long, env = "TRACKER_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Per-request HTTP timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub http_timeout_secs: u64,
}

impl std::fmt::Debug for TrackerArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerArgs")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("api_url", &self.api_url)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish()
    }
}

#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Minimum seconds between two successful syncs of one user
    #[arg(long, default_value_t = 300)]
    pub cooldown_secs: u64,

    /// Seconds after which a held sync lock is treated as abandoned
    #[arg(long, default_value_t = 300)]
    pub lock_timeout_secs: u64,

    /// Maximum document operations per store commit (1-500)
    #[arg(long, default_value_t = 500)]
    pub batch_limit: usize,

    /// Maximum concurrent requests to the tracker during a sync
    #[arg(long, default_value_t = 8)]
    pub fetch_concurrency: usize,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "WATCHSYNC_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Header carrying the user id verified by the upstream proxy
    #[arg(long, default_value = DEFAULT_USER_HEADER)]
    pub user_header: String,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub tracker: TrackerArgs,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// User to sync
    #[arg(long)]
    pub user: String,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub tracker: TrackerArgs,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// User to inspect
    #[arg(long)]
    pub user: String,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Args)]
pub struct LinkArgs {
    /// User to link
    #[arg(long)]
    pub user: String,

    /// Access token issued by the tracker
    #[arg(long, env = "TRACKER_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: String,

    /// Refresh token issued by the tracker
    #[arg(long, env = "TRACKER_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: String,

    /// Access token lifetime in seconds from now (unknown if omitted;
    /// the first sync then refreshes immediately)
    #[arg(long)]
    pub expires_in: Option<i64>,

    #[command(flatten)]
    pub store: StoreArgs,
}

impl std::fmt::Debug for LinkArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkArgs")
            .field("user", &self.user)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("store", &self.store)
            .finish()
    }
}
