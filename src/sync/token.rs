use std::time::Duration;

use chrono::{DateTime, Utc};

use super::error::SyncError;
use crate::remote::TrackerApi;
use crate::store::{SyncCredentials, SyncStore};

/// True when the access token is expired, about to expire within `margin`,
/// or has no known expiry.
pub fn needs_refresh(
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    margin: Duration,
) -> bool {
    let Some(expires_at) = expires_at else {
        return true;
    };
    let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
    match expires_at.checked_sub_signed(margin) {
        Some(deadline) => now > deadline,
        None => true,
    }
}

/// Return usable credentials, refreshing and persisting them first if needed.
pub async fn ensure_fresh(
    api: &dyn TrackerApi,
    store: &dyn SyncStore,
    user_id: &str,
    credentials: SyncCredentials,
    now: DateTime<Utc>,
    margin: Duration,
) -> Result<SyncCredentials, SyncError> {
    if !needs_refresh(credentials.expires_at, now, margin) {
        return Ok(credentials);
    }

    tracing::info!(
        user = %user_id,
        expires_at = ?credentials.expires_at,
        "Refreshing remote access token"
    );
    let grant = api
        .refresh_token(&credentials.refresh_token)
        .await
        .map_err(|e| {
            if e.is_auth_failure() {
                tracing::warn!(user = %user_id, "Refresh token rejected; account must be relinked");
            }
            SyncError::TokenRefreshFailed(e)
        })?;

    let refreshed = SyncCredentials {
        access_token: grant.access_token,
        refresh_token: grant.refresh_token,
        expires_at: grant.expires_at,
    };
    store.update_tokens(user_id, &refreshed).await?;
    Ok(refreshed)
}
