//! Signal handling for `serve`.
//!
//! The first SIGINT or SIGTERM cancels the returned token: the listener stops
//! accepting and in-flight syncs finish and release their locks. Any later
//! signal exits immediately with status 130.

use tokio_util::sync::CancellationToken;

#[cfg(unix)]
struct Signals {
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn next(&mut self) -> std::io::Result<()> {
        tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = self.terminate.recv() => Ok(()),
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn register() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> std::io::Result<()> {
        tokio::signal::ctrl_c().await
    }
}

/// Spawn the signal listener and hand back its cancellation token.
pub(crate) fn install_signal_handler() -> anyhow::Result<CancellationToken> {
    let mut signals = Signals::register()?;
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        if let Err(e) = signals.next().await {
            tracing::error!(error = %e, "Signal listener failed; graceful shutdown unavailable");
            return;
        }
        tracing::info!("Shutdown requested, waiting for running syncs (signal again to abort)");
        trigger.cancel();

        if signals.next().await.is_ok() {
            tracing::warn!("Aborting without waiting for running syncs");
            std::process::exit(130);
        }
    });

    Ok(token)
}
