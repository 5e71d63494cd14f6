//! Remote tracking service: the trait the sync engine talks to, its HTTP
//! implementation, and the concurrent snapshot fetcher.

pub mod client;
pub mod endpoints;
pub mod error;
pub mod fetch;
pub mod responses;
#[cfg(test)]
pub mod testing;

pub use client::{HttpTracker, TrackerConfig};
pub use error::RemoteError;
pub use fetch::{fetch_snapshot, CustomList, RemoteSnapshot};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use self::responses::{HistoryItem, ListSummary, ListedItem, RatingItem};

/// Media kinds the service exposes as separate collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Movie,
    Show,
    Episode,
}

impl MediaKind {
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Movie => "movies",
            Self::Show => "shows",
            Self::Episode => "episodes",
        }
    }
}

/// A freshly issued credential pair.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Operations the sync engine needs from the tracking service.
///
/// Collection calls return the complete collection; pagination is the
/// implementation's concern.
#[async_trait]
pub trait TrackerApi: Send + Sync {
    /// Exchange a refresh token for a new access/refresh pair.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, RemoteError>;

    async fn movie_history(&self, access_token: &str) -> Result<Vec<HistoryItem>, RemoteError>;

    async fn episode_history(&self, access_token: &str) -> Result<Vec<HistoryItem>, RemoteError>;

    async fn ratings(
        &self,
        access_token: &str,
        kind: MediaKind,
    ) -> Result<Vec<RatingItem>, RemoteError>;

    async fn watchlist(
        &self,
        access_token: &str,
        kind: MediaKind,
    ) -> Result<Vec<ListedItem>, RemoteError>;

    /// Custom list definitions owned by the account.
    async fn lists(&self, access_token: &str) -> Result<Vec<ListSummary>, RemoteError>;

    async fn list_items(
        &self,
        access_token: &str,
        list_id: &str,
    ) -> Result<Vec<ListedItem>, RemoteError>;
}
