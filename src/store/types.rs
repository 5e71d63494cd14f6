//! Types for the document store.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::ValueRef;
use serde::{Deserialize, Serialize};

/// Sub-collections the sync engine owns inside the per-user document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Aggregate list documents (`already-watched`, `watchlist`, `favorites`, custom slugs).
    Lists,
    /// One document per composite rating key.
    Ratings,
    /// One document per show id.
    EpisodeTracking,
}

impl Collection {
    /// Convert to the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lists => "lists",
            Self::Ratings => "ratings",
            Self::EpisodeTracking => "episode_tracking",
        }
    }

    pub const ALL: [Collection; 3] = [Self::Lists, Self::Ratings, Self::EpisodeTracking];
}

/// Per-category counts recorded as the last sync result and returned to callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub movies: u64,
    pub shows: u64,
    pub episodes: u64,
    pub ratings: u64,
    pub lists: u64,
    pub favorites: u64,
    pub watchlist: u64,
}

/// Sync-related state embedded in a user's record.
#[derive(Debug, Clone, Default)]
pub struct UserSyncState {
    pub user_id: String,
    pub connected: bool,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_result: Option<SyncCounts>,
    /// Absent means unlocked.
    pub sync_lock_at: Option<DateTime<Utc>>,
}

/// Remote-service credential pair plus its expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct SyncCredentials {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for SyncCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCredentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Reasons the compare-and-acquire transaction refuses to take the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRejection {
    NotConnected,
    ReauthRequired,
    RateLimited { retry_after_secs: u64 },
    InProgress,
}

/// Result of a compare-and-acquire attempt.
#[derive(Debug)]
pub enum AcquireOutcome {
    /// The lock timestamp was written; these are the credentials read in the
    /// same transaction.
    Acquired(SyncCredentials),
    /// Nothing was written.
    Rejected(LockRejection),
}

/// A single pending write against the document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocOp {
    Set {
        collection: Collection,
        id: String,
        data: String,
    },
    Delete {
        collection: Collection,
        id: String,
    },
}

/// Normalize any stored timestamp representation into an instant.
///
/// Accepts epoch milliseconds (integer, finite real, or numeric text) and
/// RFC 3339 text. Everything else, including NULL, reads as "never".
pub fn parse_instant(value: ValueRef<'_>) -> Option<DateTime<Utc>> {
    match value {
        ValueRef::Integer(ms) => Utc.timestamp_millis_opt(ms).single(),
        ValueRef::Real(ms) if ms.is_finite() => Utc.timestamp_millis_opt(ms as i64).single(),
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes).ok()?.trim();
            if let Ok(ms) = text.parse::<i64>() {
                return Utc.timestamp_millis_opt(ms).single();
            }
            if let Ok(ms) = text.parse::<f64>() {
                if ms.is_finite() {
                    return Utc.timestamp_millis_opt(ms as i64).single();
                }
                return None;
            }
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        ValueRef::Null | ValueRef::Real(_) | ValueRef::Blob(_) => None,
    }
}

/// Epoch milliseconds, the representation every write site uses.
pub fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_instant_integer_millis() {
        let dt = parse_instant(ValueRef::Integer(1_700_000_000_123)).unwrap();
        assert_eq!(dt.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn test_parse_instant_real_and_numeric_text() {
        let dt = parse_instant(ValueRef::Real(1_700_000_000_000.0)).unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
        let dt = parse_instant(ValueRef::Text(b"1700000000000")).unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_instant_rfc3339() {
        let dt = parse_instant(ValueRef::Text(b"2024-03-01T12:00:00.000Z")).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T12:00:00+00:00");
    }

    #[test]
    fn test_parse_instant_never() {
        assert!(parse_instant(ValueRef::Null).is_none());
        assert!(parse_instant(ValueRef::Real(f64::NAN)).is_none());
        assert!(parse_instant(ValueRef::Real(f64::INFINITY)).is_none());
        assert!(parse_instant(ValueRef::Text(b"not a date")).is_none());
        assert!(parse_instant(ValueRef::Text(b"NaN")).is_none());
        assert!(parse_instant(ValueRef::Blob(b"\x00\x01")).is_none());
    }

    #[test]
    fn test_sync_counts_json_shape() {
        let counts = SyncCounts {
            movies: 2,
            shows: 1,
            episodes: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(counts).unwrap();
        assert_eq!(json["movies"], 2);
        assert_eq!(json["favorites"], 0);
    }

    #[test]
    fn test_credentials_debug_redacts_tokens() {
        let creds = SyncCredentials {
            access_token: "secret-access".into(),
            refresh_token: "secret-refresh".into(),
            expires_at: None,
        };
        let out = format!("{:?}", creds);
        assert!(!out.contains("secret"));
    }
}
