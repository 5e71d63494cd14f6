//! watchsync - reconciles a linked movie/TV tracker account into the
//! application's per-user document store.
//!
//! A sync takes a per-user lock inside one SQLite transaction, refreshes the
//! tracker credentials when they are about to expire, fetches the account's
//! history, ratings, watchlist and custom lists concurrently, and rewrites
//! the local lists, ratings and episode tracking so they match the remote
//! state exactly. The lock is released on every exit path.

#![warn(clippy::all)]

mod cli;
mod config;
mod remote;
mod server;
mod shutdown;
mod store;
mod sync;
mod types;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Command;
use config::Config;
use remote::HttpTracker;
use store::{Collection, SqliteStore, SyncCredentials, SyncStore};
use sync::SyncEngine;

async fn open_store(path: &Path) -> anyhow::Result<Arc<SqliteStore>> {
    let db = SqliteStore::open(path).await?;
    tracing::debug!(path = %path.display(), "Opened document store");
    Ok(Arc::new(db))
}

async fn build_engine(config: &Config) -> anyhow::Result<SyncEngine> {
    let db = open_store(&config.database).await?;
    let tracker = HttpTracker::new(config.tracker.clone())?;
    Ok(SyncEngine::new(db, Arc::new(tracker), config.settings))
}

/// Run the serve command.
async fn run_serve(args: cli::ServeArgs) -> anyhow::Result<()> {
    let config = Config::from_engine_args(&args.store, &args.tracker, &args.engine)?;
    tracing::debug!(?config, "Loaded configuration");

    let engine = build_engine(&config).await?;
    let sessions = server::TrustedHeader::new(&args.user_header)
        .map_err(|e| anyhow::anyhow!("Invalid --user-header {:?}: {}", args.user_header, e))?;
    let state = server::AppState {
        engine: Arc::new(engine),
        sessions: Arc::new(sessions),
    };

    let shutdown = shutdown::install_signal_handler()?;
    server::serve(args.listen, state, shutdown).await?;
    Ok(())
}

/// Run the sync command.
async fn run_sync(args: cli::SyncArgs) -> anyhow::Result<()> {
    let config = Config::from_engine_args(&args.store, &args.tracker, &args.engine)?;
    let engine = build_engine(&config).await?;

    match engine.run(&args.user).await {
        Ok(report) => {
            let counts = report.counts;
            println!("Sync complete for {}", args.user);
            println!("  Movies:    {}", counts.movies);
            println!("  Shows:     {}", counts.shows);
            println!("  Episodes:  {}", counts.episodes);
            println!("  Ratings:   {}", counts.ratings);
            println!("  Lists:     {}", counts.lists);
            println!("  Favorites: {}", counts.favorites);
            println!("  Watchlist: {}", counts.watchlist);
            Ok(())
        }
        Err(sync::SyncError::RateLimited { retry_after_secs }) => {
            anyhow::bail!("Synced recently; retry in {retry_after_secs}s")
        }
        Err(e) if !e.is_unexpected() => anyhow::bail!("Sync not started: {e}"),
        Err(e) => Err(anyhow::Error::new(e).context("Sync failed")),
    }
}

fn format_instant(instant: Option<chrono::DateTime<chrono::Utc>>) -> String {
    instant
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}

/// Run the status command.
async fn run_status(args: cli::StatusArgs) -> anyhow::Result<()> {
    let db_path = config::database_path(&args.store);

    if !db_path.exists() {
        println!("No database found at {}", db_path.display());
        println!("Link an account first to create it.");
        return Ok(());
    }

    let db = open_store(&db_path).await?;
    let Some(state) = db.get_user(&args.user).await? else {
        println!("No sync record for {}", args.user);
        return Ok(());
    };

    println!("Database: {}", db.path().display());
    println!();
    println!("User {}:", state.user_id);
    println!("  Connected:     {}", state.connected);
    println!(
        "  Credentials:   {}",
        if state.access_token.is_some() && state.refresh_token.is_some() {
            "present"
        } else {
            "missing"
        }
    );
    println!("  Token expires: {}", format_instant(state.token_expires_at));
    println!("  Last sync:     {}", format_instant(state.last_sync_at));
    match state.sync_lock_at {
        Some(at) => println!("  Lock:          held since {}", format_instant(Some(at))),
        None => println!("  Lock:          free"),
    }

    if let Some(counts) = state.last_sync_result {
        println!();
        println!("Last result:");
        println!("  Movies:    {}", counts.movies);
        println!("  Shows:     {}", counts.shows);
        println!("  Episodes:  {}", counts.episodes);
        println!("  Ratings:   {}", counts.ratings);
        println!("  Lists:     {}", counts.lists);
        println!("  Favorites: {}", counts.favorites);
        println!("  Watchlist: {}", counts.watchlist);
    }

    println!();
    println!("Documents:");
    for collection in Collection::ALL {
        let count = db.count_documents(&state.user_id, collection).await?;
        println!("  {:<17} {}", collection.as_str(), count);
    }

    Ok(())
}

/// Run the link command.
async fn run_link(args: cli::LinkArgs) -> anyhow::Result<()> {
    if args.access_token.trim().is_empty() || args.refresh_token.trim().is_empty() {
        anyhow::bail!("Both --access-token and --refresh-token must be non-empty");
    }

    let expires_at = match args.expires_in {
        Some(secs) => {
            let ttl = chrono::Duration::try_seconds(secs)
                .ok_or_else(|| anyhow::anyhow!("--expires-in out of range: {secs}"))?;
            Some(chrono::Utc::now() + ttl)
        }
        None => None,
    };

    let db = open_store(&config::database_path(&args.store)).await?;
    db.link_account(
        &args.user,
        &SyncCredentials {
            access_token: args.access_token.trim().to_string(),
            refresh_token: args.refresh_token.trim().to_string(),
            expires_at,
        },
    )
    .await?;

    tracing::info!(user = %args.user, "Linked tracker account");
    println!("Linked tracker account for {}", args.user);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    match cli.command {
        Command::Serve(args) => run_serve(args).await,
        Command::Sync(args) => run_sync(args).await,
        Command::Status(args) => run_status(args).await,
        Command::Link(args) => run_link(args).await,
    }
}
