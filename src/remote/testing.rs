//! Scripted in-process tracker for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::RemoteError;
use super::responses::{
    Episode, HistoryItem, Ids, ListIds, ListSummary, ListedItem, Media, RatingItem,
};
use super::{MediaKind, TokenGrant, TrackerApi};

/// Remote state served by [`FakeTracker`].
#[derive(Debug, Default)]
pub struct FakeState {
    pub movie_history: Vec<HistoryItem>,
    pub episode_history: Vec<HistoryItem>,
    pub movie_ratings: Vec<RatingItem>,
    pub show_ratings: Vec<RatingItem>,
    pub episode_ratings: Vec<RatingItem>,
    pub movie_watchlist: Vec<ListedItem>,
    pub show_watchlist: Vec<ListedItem>,
    pub lists: Vec<(ListSummary, Vec<ListedItem>)>,
    /// Endpoint key (e.g. `"ratings/shows"`, `"lists/noir"`, `"token"`) that fails.
    pub fail_endpoint: Option<&'static str>,
    /// Grant returned by `refresh_token`; `None` issues a generated pair.
    pub refresh_grant: Option<TokenGrant>,
    /// Sleep inside every history call, to hold a sync open.
    pub delay: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct FakeTracker {
    state: Mutex<FakeState>,
    refresh_calls: AtomicUsize,
    tokens_seen: Mutex<Vec<String>>,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, f: impl FnOnce(&mut FakeState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn access_tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().unwrap().clone()
    }

    fn check(&self, endpoint: &str, access_token: &str) -> Result<(), RemoteError> {
        self.tokens_seen
            .lock()
            .unwrap()
            .push(access_token.to_string());
        if self.state.lock().unwrap().fail_endpoint == Some(endpoint) {
            return Err(RemoteError::Status {
                status: 503,
                endpoint: endpoint.to_string(),
            });
        }
        Ok(())
    }

    fn delay(&self) -> Option<Duration> {
        self.state.lock().unwrap().delay
    }
}

#[async_trait]
impl TrackerApi for FakeTracker {
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, RemoteError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let state = self.state.lock().unwrap();
        if state.fail_endpoint == Some("token") {
            return Err(RemoteError::Status {
                status: 401,
                endpoint: "/oauth/token".to_string(),
            });
        }
        Ok(state.refresh_grant.clone().unwrap_or_else(|| TokenGrant {
            access_token: format!("access-{n}"),
            refresh_token: format!("{refresh_token}-next"),
            expires_at: Some(Utc::now() + chrono::Duration::days(90)),
        }))
    }

    async fn movie_history(&self, access_token: &str) -> Result<Vec<HistoryItem>, RemoteError> {
        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }
        self.check("history/movies", access_token)?;
        Ok(self.state.lock().unwrap().movie_history.clone())
    }

    async fn episode_history(&self, access_token: &str) -> Result<Vec<HistoryItem>, RemoteError> {
        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }
        self.check("history/episodes", access_token)?;
        Ok(self.state.lock().unwrap().episode_history.clone())
    }

    async fn ratings(
        &self,
        access_token: &str,
        kind: MediaKind,
    ) -> Result<Vec<RatingItem>, RemoteError> {
        self.check(&format!("ratings/{}", kind.path_segment()), access_token)?;
        let state = self.state.lock().unwrap();
        Ok(match kind {
            MediaKind::Movie => state.movie_ratings.clone(),
            MediaKind::Show => state.show_ratings.clone(),
            MediaKind::Episode => state.episode_ratings.clone(),
        })
    }

    async fn watchlist(
        &self,
        access_token: &str,
        kind: MediaKind,
    ) -> Result<Vec<ListedItem>, RemoteError> {
        self.check(&format!("watchlist/{}", kind.path_segment()), access_token)?;
        let state = self.state.lock().unwrap();
        Ok(match kind {
            MediaKind::Movie => state.movie_watchlist.clone(),
            MediaKind::Show => state.show_watchlist.clone(),
            MediaKind::Episode => Vec::new(),
        })
    }

    async fn lists(&self, access_token: &str) -> Result<Vec<ListSummary>, RemoteError> {
        self.check("lists", access_token)?;
        let state = self.state.lock().unwrap();
        Ok(state.lists.iter().map(|(summary, _)| summary.clone()).collect())
    }

    async fn list_items(
        &self,
        access_token: &str,
        list_id: &str,
    ) -> Result<Vec<ListedItem>, RemoteError> {
        self.check(&format!("lists/{list_id}"), access_token)?;
        let state = self.state.lock().unwrap();
        state
            .lists
            .iter()
            .find(|(summary, _)| summary.slug().as_deref() == Some(list_id))
            .map(|(_, items)| items.clone())
            .ok_or_else(|| RemoteError::Status {
                status: 404,
                endpoint: format!("lists/{list_id}"),
            })
    }
}

pub fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

pub fn media(tmdb: u64, title: &str) -> Media {
    Media {
        title: Some(title.to_string()),
        year: None,
        ids: Ids {
            tmdb: Some(tmdb),
            ..Default::default()
        },
    }
}

pub fn episode(show_tmdb: u64, season: u32, number: u32) -> Episode {
    Episode {
        season: Some(season),
        number: Some(number),
        title: Some(format!("Episode {number}")),
        ids: Ids {
            tmdb: Some(show_tmdb * 1000 + u64::from(season) * 100 + u64::from(number)),
            ..Default::default()
        },
        first_aired: None,
    }
}

pub fn movie_watch(tmdb: u64, title: &str, watched_at: &str) -> HistoryItem {
    HistoryItem {
        watched_at: Some(ts(watched_at)),
        movie: Some(media(tmdb, title)),
        ..Default::default()
    }
}

pub fn episode_watch(
    show_tmdb: u64,
    show_title: &str,
    season: u32,
    number: u32,
    watched_at: &str,
) -> HistoryItem {
    HistoryItem {
        watched_at: Some(ts(watched_at)),
        show: Some(media(show_tmdb, show_title)),
        episode: Some(episode(show_tmdb, season, number)),
        ..Default::default()
    }
}

pub fn movie_rating(tmdb: u64, title: &str, rating: u8) -> RatingItem {
    RatingItem {
        rated_at: Some(ts("2024-02-01T00:00:00Z")),
        rating: Some(rating),
        movie: Some(media(tmdb, title)),
        ..Default::default()
    }
}

pub fn show_rating(tmdb: u64, title: &str, rating: u8) -> RatingItem {
    RatingItem {
        rated_at: Some(ts("2024-02-01T00:00:00Z")),
        rating: Some(rating),
        show: Some(media(tmdb, title)),
        ..Default::default()
    }
}

pub fn episode_rating(
    show_tmdb: u64,
    show_title: &str,
    season: u32,
    number: u32,
    rating: u8,
) -> RatingItem {
    RatingItem {
        rated_at: Some(ts("2024-02-01T00:00:00Z")),
        rating: Some(rating),
        show: Some(media(show_tmdb, show_title)),
        episode: Some(episode(show_tmdb, season, number)),
        ..Default::default()
    }
}

pub fn listed_movie(tmdb: u64, title: &str) -> ListedItem {
    ListedItem {
        listed_at: Some(ts("2024-03-01T00:00:00Z")),
        movie: Some(media(tmdb, title)),
        show: None,
    }
}

pub fn listed_show(tmdb: u64, title: &str) -> ListedItem {
    ListedItem {
        listed_at: Some(ts("2024-03-01T00:00:00Z")),
        movie: None,
        show: Some(media(tmdb, title)),
    }
}

pub fn list(name: &str, slug: &str) -> ListSummary {
    ListSummary {
        name: name.to_string(),
        ids: ListIds {
            trakt: None,
            slug: Some(slug.to_string()),
        },
    }
}
