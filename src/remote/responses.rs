use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Decode an RFC 3339 timestamp, mapping anything unparsable to `None` so a
/// single bad row cannot fail the page it arrives on.
fn lenient_instant<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    let parsed = match &raw {
        Some(serde_json::Value::String(text)) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        _ => None,
    };
    if parsed.is_none() {
        if let Some(value) = raw.filter(|v| !v.is_null()) {
            tracing::debug!(%value, "Ignoring unparsable timestamp");
        }
    }
    Ok(parsed)
}

/// Cross-service identifiers attached to every media object.
///
/// `tmdb` is the id the local app keys its documents by.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Ids {
    #[serde(default)]
    pub trakt: Option<u64>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub imdb: Option<String>,
    #[serde(default)]
    pub tmdb: Option<u64>,
}

/// A movie or show as embedded in history, rating and list items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Media {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub ids: Ids,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Episode {
    #[serde(default)]
    pub season: Option<u32>,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub ids: Ids,
    /// Only present with `extended=full`.
    #[serde(default)]
    pub first_aired: Option<String>,
}

/// One row of `/sync/history/{movies,episodes}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HistoryItem {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, deserialize_with = "lenient_instant")]
    pub watched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub movie: Option<Media>,
    #[serde(default)]
    pub show: Option<Media>,
    #[serde(default)]
    pub episode: Option<Episode>,
}

/// One row of `/sync/ratings/{movies,shows,episodes}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RatingItem {
    #[serde(default, deserialize_with = "lenient_instant")]
    pub rated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub movie: Option<Media>,
    #[serde(default)]
    pub show: Option<Media>,
    #[serde(default)]
    pub episode: Option<Episode>,
}

/// One row of a watchlist or custom list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ListedItem {
    #[serde(default, deserialize_with = "lenient_instant")]
    pub listed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub movie: Option<Media>,
    #[serde(default)]
    pub show: Option<Media>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ListIds {
    #[serde(default)]
    pub trakt: Option<u64>,
    #[serde(default)]
    pub slug: Option<String>,
}

/// A custom list definition from `/users/me/lists`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ListSummary {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ids: ListIds,
}

impl ListSummary {
    /// Identifier used both in the items URL and as the local document id.
    pub fn slug(&self) -> Option<String> {
        self.ids
            .slug
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| self.ids.trakt.map(|id| id.to_string()))
    }
}

/// Body of `POST /oauth/token` for the refresh grant.
#[derive(Serialize)]
pub struct RefreshTokenRequest<'a> {
    pub refresh_token: &'a str,
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub redirect_uri: &'a str,
    pub grant_type: &'static str,
}

/// Response from `POST /oauth/token`.
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime in seconds.
    pub expires_in: i64,
    /// Issue time, epoch seconds.
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl TokenResponse {
    /// `issued_at + expires_in`, falling back to `received_at` when the
    /// service omits the issue time.
    pub fn expires_at(&self, received_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let issued_at = self
            .created_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or(received_at);
        issued_at.checked_add_signed(chrono::Duration::try_seconds(self.expires_in)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_episode_deserialize() {
        let json = r#"{
            "id": 1982346,
            "watched_at": "2014-03-31T09:28:53.000Z",
            "action": "scrobble",
            "type": "episode",
            "episode": {
                "season": 2,
                "number": 1,
                "title": "Pawnee Zoo",
                "ids": {"trakt": 251, "tvdb": 797571, "imdb": null, "tmdb": 397629},
                "first_aired": "2009-09-18T01:00:00.000Z"
            },
            "show": {
                "title": "Parks and Recreation",
                "year": 2009,
                "ids": {"trakt": 4, "slug": "parks-and-recreation", "tmdb": 8592}
            }
        }"#;
        let item: HistoryItem = serde_json::from_str(json).unwrap();
        let episode = item.episode.unwrap();
        assert_eq!(episode.season, Some(2));
        assert_eq!(episode.number, Some(1));
        assert_eq!(episode.ids.tmdb, Some(397629));
        assert!(episode.ids.imdb.is_none());
        assert_eq!(item.show.unwrap().ids.tmdb, Some(8592));
        assert_eq!(item.watched_at.unwrap().timestamp(), 1_396_258_133);
    }

    #[test]
    fn test_rating_minimal() {
        let item: RatingItem = serde_json::from_str(r#"{"rating": 8}"#).unwrap();
        assert_eq!(item.rating, Some(8));
        assert!(item.movie.is_none());
        assert!(item.rated_at.is_none());
    }

    #[test]
    fn test_malformed_timestamps_do_not_fail_the_page() {
        let json = r#"[
            {"watched_at": "yesterday", "movie": {"title": "Heat", "ids": {"tmdb": 949}}},
            {"watched_at": 1700000000, "movie": {"title": "Alien", "ids": {"tmdb": 348}}},
            {"watched_at": null, "movie": {"title": "Ran", "ids": {"tmdb": 11645}}},
            {"watched_at": "2024-01-01T00:00:00.000Z", "movie": {"title": "Ikiru", "ids": {"tmdb": 3782}}}
        ]"#;
        let items: Vec<HistoryItem> = serde_json::from_str(json).unwrap();
        assert_eq!(items.len(), 4);
        assert!(items[..3].iter().all(|i| i.watched_at.is_none()));
        assert_eq!(items[3].watched_at.unwrap().timestamp(), 1_704_067_200);

        let rating: RatingItem =
            serde_json::from_str(r#"{"rating": 6, "rated_at": "2024-13-45"}"#).unwrap();
        assert_eq!(rating.rating, Some(6));
        assert!(rating.rated_at.is_none());

        let listed: ListedItem = serde_json::from_str(r#"{"listed_at": {}}"#).unwrap();
        assert!(listed.listed_at.is_none());
    }

    #[test]
    fn test_listed_item_extra_fields() {
        let json = r#"{
            "rank": 1, "id": 101, "notes": null,
            "listed_at": "2024-01-01T00:00:00.000Z",
            "type": "movie",
            "movie": {"title": "Heat", "year": 1995, "ids": {"tmdb": 949}}
        }"#;
        let item: ListedItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.movie.unwrap().title.as_deref(), Some("Heat"));
    }

    #[test]
    fn test_list_summary_slug_fallback() {
        let with_slug: ListSummary =
            serde_json::from_str(r#"{"name": "Noir", "ids": {"trakt": 7, "slug": "noir"}}"#)
                .unwrap();
        assert_eq!(with_slug.slug().as_deref(), Some("noir"));

        let trakt_only: ListSummary =
            serde_json::from_str(r#"{"name": "Noir", "ids": {"trakt": 7}}"#).unwrap();
        assert_eq!(trakt_only.slug().as_deref(), Some("7"));

        let none: ListSummary = serde_json::from_str(r#"{"name": "Noir"}"#).unwrap();
        assert!(none.slug().is_none());
    }

    #[test]
    fn test_token_expiry_from_issue_time() {
        let json = r#"{
            "access_token": "a", "token_type": "bearer", "expires_in": 7776000,
            "refresh_token": "r", "scope": "public", "created_at": 1700000000
        }"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        let received = Utc.timestamp_opt(1_800_000_000, 0).unwrap();
        assert_eq!(
            token.expires_at(received).unwrap().timestamp(),
            1_700_000_000 + 7_776_000
        );
    }

    #[test]
    fn test_token_expiry_without_issue_time() {
        let json = r#"{"access_token": "a", "refresh_token": "r", "expires_in": 3600}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        let received = Utc.timestamp_opt(1_800_000_000, 0).unwrap();
        assert_eq!(
            token.expires_at(received).unwrap().timestamp(),
            1_800_003_600
        );
    }
}
