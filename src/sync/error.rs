use axum::http::StatusCode;
use thiserror::Error;

use crate::remote::RemoteError;
use crate::store::{LockRejection, StoreError};

/// Why a sync did not complete.
///
/// The first four variants are raised by the acquire transaction, before any
/// remote call or write. The rest happen with the lock held.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Not connected")]
    NotConnected,

    #[error("Remote account needs to be reconnected")]
    ReauthRequired,

    #[error("Sync cooldown active, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Sync already in progress")]
    SyncInProgress,

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(#[source] RemoteError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<LockRejection> for SyncError {
    fn from(rejection: LockRejection) -> Self {
        match rejection {
            LockRejection::NotConnected => Self::NotConnected,
            LockRejection::ReauthRequired => Self::ReauthRequired,
            LockRejection::RateLimited { retry_after_secs } => {
                Self::RateLimited { retry_after_secs }
            }
            LockRejection::InProgress => Self::SyncInProgress,
        }
    }
}

impl SyncError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotConnected => StatusCode::BAD_REQUEST,
            Self::ReauthRequired => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::SyncInProgress => StatusCode::CONFLICT,
            Self::TokenRefreshFailed(_) | Self::Remote(_) | Self::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable code for clients that branch on the failure kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::ReauthRequired => "REAUTH_REQUIRED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::SyncInProgress => "SYNC_IN_PROGRESS",
            Self::TokenRefreshFailed(_) => "TOKEN_REFRESH_FAILED",
            Self::Remote(_) | Self::Store(_) => "UNEXPECTED_FAILURE",
        }
    }

    /// Failures that happened with the lock held.
    pub fn is_unexpected(&self) -> bool {
        matches!(
            self,
            Self::TokenRefreshFailed(_) | Self::Remote(_) | Self::Store(_)
        )
    }
}
