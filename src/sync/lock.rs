//! Per-user sync lock.
//!
//! The decision is a pure function of the user record and the current time;
//! [`acquire`] runs it inside the store's compare-and-acquire transaction so
//! the read, the checks and the lock write are one atomic step.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::error::SyncError;
use crate::store::{AcquireOutcome, LockRejection, SyncCredentials, SyncStore, UserSyncState};

/// Cooldown and stale-lock timeout applied when acquiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Minimum time between two successful syncs.
    pub cooldown: Duration,
    /// Age after which a held lock is considered abandoned.
    pub lock_timeout: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(300),
            lock_timeout: Duration::from_secs(300),
        }
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn present(token: &Option<String>) -> Option<&str> {
    token.as_deref().filter(|t| !t.is_empty())
}

/// Decide whether a sync may start. Checks run in a fixed order: link,
/// credentials, cooldown, then an existing lock.
pub fn evaluate(
    state: Option<&UserSyncState>,
    now: DateTime<Utc>,
    policy: &LockPolicy,
) -> Result<SyncCredentials, LockRejection> {
    let state = match state {
        Some(s) if s.connected => s,
        _ => return Err(LockRejection::NotConnected),
    };

    let (access_token, refresh_token) =
        match (present(&state.access_token), present(&state.refresh_token)) {
            (Some(a), Some(r)) => (a.to_string(), r.to_string()),
            _ => return Err(LockRejection::ReauthRequired),
        };

    if let Some(last) = state.last_sync_at {
        let elapsed = (now - last).num_milliseconds();
        let cooldown = millis(policy.cooldown);
        if elapsed < cooldown {
            let remaining = cooldown.saturating_sub(elapsed);
            let retry_after_secs = u64::try_from((remaining + 999) / 1000).unwrap_or(0);
            return Err(LockRejection::RateLimited { retry_after_secs });
        }
    }

    if let Some(locked_at) = state.sync_lock_at {
        let age = (now - locked_at).num_milliseconds();
        if age < millis(policy.lock_timeout) {
            return Err(LockRejection::InProgress);
        }
        tracing::warn!(
            user = %state.user_id,
            age_secs = age / 1000,
            "Overriding stale sync lock"
        );
    }

    Ok(SyncCredentials {
        access_token,
        refresh_token,
        expires_at: state.token_expires_at,
    })
}

/// A held sync lock.
///
/// `locked_at` is the value written to the lock field; releasing compares
/// against it so a run never clears a lock another run has taken over.
#[derive(Debug)]
pub struct Lease {
    pub locked_at: DateTime<Utc>,
    pub credentials: SyncCredentials,
}

/// Take the user's sync lock, returning the credentials read in the same
/// transaction.
pub async fn acquire(
    store: &dyn SyncStore,
    user_id: &str,
    now: DateTime<Utc>,
    policy: &LockPolicy,
) -> Result<Lease, SyncError> {
    let policy = *policy;
    let check = move |state: Option<&UserSyncState>| evaluate(state, now, &policy);

    match store.compare_and_acquire(user_id, now, &check).await? {
        AcquireOutcome::Acquired(credentials) => {
            tracing::debug!(user = %user_id, "Acquired sync lock");
            Ok(Lease {
                locked_at: now,
                credentials,
            })
        }
        AcquireOutcome::Rejected(rejection) => {
            tracing::info!(user = %user_id, ?rejection, "Sync rejected");
            Err(rejection.into())
        }
    }
}
