//! Reconciliation planner.
//!
//! Turns a [`RemoteSnapshot`] into the complete target image of each local
//! sub-collection: the aggregate list documents, one episode-tracking
//! document per show and one rating document per composite key. Planning is
//! pure; nothing here touches the store.
//!
//! Duplicates are resolved by first occurrence everywhere. Entries that
//! lack a resolvable media id are skipped.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::remote::responses::{Episode, HistoryItem, ListedItem, Media, RatingItem};
use crate::remote::{CustomList, RemoteSnapshot};
use crate::store::types::to_millis;
use crate::store::SyncCounts;

pub const ALREADY_WATCHED: &str = "already-watched";
pub const WATCHLIST: &str = "watchlist";
pub const FAVORITES: &str = "favorites";

/// List ids owned by the engine rather than by a remote custom list.
pub const RESERVED_LIST_IDS: [&str; 3] = [ALREADY_WATCHED, WATCHLIST, FAVORITES];

/// Prefix given to custom list slugs that collide with a reserved id.
const CUSTOM_PREFIX: &str = "custom-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
    Episode,
}

/// One item of an aggregate list document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEntry {
    pub id: u64,
    pub title: String,
    pub media_type: MediaType,
    /// Left empty here; filled by metadata enrichment.
    pub poster_path: Option<String>,
    /// Epoch milliseconds.
    pub added_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocument {
    pub name: String,
    pub items: BTreeMap<String, ListEntry>,
    pub updated_at: i64,
    pub is_custom: bool,
    /// Set on every list the engine writes; locally created lists lack it.
    #[serde(default)]
    pub synced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedEpisode {
    pub episode_id: Option<u64>,
    pub season_number: u32,
    pub episode_number: u32,
    pub watched_at: Option<i64>,
    pub name: Option<String>,
    /// `YYYY-MM-DD`.
    pub air_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeTrackingDocument {
    pub show_id: u64,
    /// Keyed by `"{season}_{episode}"`.
    pub episodes: BTreeMap<String, WatchedEpisode>,
    pub show_name: String,
    pub show_poster_path: Option<String>,
    pub last_updated: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingDocument {
    pub media_type: MediaType,
    /// Movie or show id; for episodes, the show's id.
    pub media_id: u64,
    pub rating: u8,
    pub title: String,
    pub rated_at: Option<i64>,
    pub poster_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_name: Option<String>,
}

/// Target image of every engine-owned sub-collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    /// In write order: `already-watched`, `watchlist`, then custom lists as
    /// the service returned them.
    pub lists: Vec<(String, ListDocument)>,
    /// Keyed by show id.
    pub episodes: BTreeMap<String, EpisodeTrackingDocument>,
    /// Keyed by composite rating key.
    pub ratings: BTreeMap<String, RatingDocument>,
    pub counts: SyncCounts,
}

impl SyncPlan {
    pub fn list_ids(&self) -> HashSet<String> {
        self.lists.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn episode_keys(&self) -> HashSet<String> {
        self.episodes.keys().cloned().collect()
    }

    pub fn rating_keys(&self) -> HashSet<String> {
        self.ratings.keys().cloned().collect()
    }
}

pub fn movie_rating_key(id: u64) -> String {
    format!("movie-{id}")
}

pub fn show_rating_key(id: u64) -> String {
    format!("tv-{id}")
}

pub fn episode_rating_key(show_id: u64, season: u32, episode: u32) -> String {
    format!("episode-{show_id}-{season}-{episode}")
}

pub fn episode_key(season: u32, episode: u32) -> String {
    format!("{season}_{episode}")
}

fn millis(instant: Option<DateTime<Utc>>) -> Option<i64> {
    instant.map(to_millis)
}

fn tmdb(media: Option<&Media>) -> Option<u64> {
    media.and_then(|m| m.ids.tmdb)
}

fn title(media: Option<&Media>) -> String {
    media.and_then(|m| m.title.clone()).unwrap_or_default()
}

fn air_date(episode: &Episode) -> Option<String> {
    let aired = episode.first_aired.as_deref()?;
    Some(aired.get(..10).unwrap_or(aired).to_string())
}

/// Compute the target image for one sync.
pub fn plan(snapshot: &RemoteSnapshot, now: DateTime<Utc>) -> SyncPlan {
    let updated_at = to_millis(now);
    let mut counts = SyncCounts::default();
    let mut lists = Vec::new();

    let watched = watched_movies(&snapshot.movie_history, updated_at);
    counts.movies = watched.items.len() as u64;
    lists.push((ALREADY_WATCHED.to_string(), watched));

    let watchlist = watchlist(
        &snapshot.movie_watchlist,
        &snapshot.show_watchlist,
        updated_at,
    );
    counts.watchlist = watchlist.items.len() as u64;
    lists.push((WATCHLIST.to_string(), watchlist));

    for (id, document) in custom_lists(&snapshot.lists, updated_at) {
        if id == FAVORITES {
            counts.favorites += document.items.len() as u64;
        } else {
            counts.lists += document.items.len() as u64;
        }
        lists.push((id, document));
    }

    let episodes = episode_tracking(&snapshot.episode_history, updated_at);
    counts.shows = episodes.len() as u64;
    counts.episodes = episodes.values().map(|d| d.episodes.len() as u64).sum();

    let ratings = ratings(snapshot);
    counts.ratings = ratings.len() as u64;

    SyncPlan {
        lists,
        episodes,
        ratings,
        counts,
    }
}

fn list_document(name: &str, is_custom: bool, updated_at: i64) -> ListDocument {
    ListDocument {
        name: name.to_string(),
        items: BTreeMap::new(),
        updated_at,
        is_custom,
        synced: true,
    }
}

fn watched_movies(history: &[HistoryItem], updated_at: i64) -> ListDocument {
    let mut document = list_document("Already Watched", false, updated_at);
    for item in history {
        let Some(id) = tmdb(item.movie.as_ref()) else {
            continue;
        };
        document
            .items
            .entry(id.to_string())
            .or_insert_with(|| ListEntry {
                id,
                title: title(item.movie.as_ref()),
                media_type: MediaType::Movie,
                poster_path: None,
                added_at: millis(item.watched_at),
            });
    }
    document
}

/// Convert a listed item into a list entry, if it names a movie or show
/// with a usable id.
fn list_entry(item: &ListedItem) -> Option<ListEntry> {
    let (media, media_type) = match (&item.movie, &item.show) {
        (Some(movie), _) => (movie, MediaType::Movie),
        (None, Some(show)) => (show, MediaType::Tv),
        (None, None) => return None,
    };
    Some(ListEntry {
        id: media.ids.tmdb?,
        title: media.title.clone().unwrap_or_default(),
        media_type,
        poster_path: None,
        added_at: millis(item.listed_at),
    })
}

fn fill_items<'a>(document: &mut ListDocument, items: impl IntoIterator<Item = &'a ListedItem>) {
    for entry in items.into_iter().filter_map(list_entry) {
        document.items.entry(entry.id.to_string()).or_insert(entry);
    }
}

fn watchlist(movies: &[ListedItem], shows: &[ListedItem], updated_at: i64) -> ListDocument {
    let mut document = list_document("Watchlist", false, updated_at);
    fill_items(&mut document, movies.iter().chain(shows));
    document
}

fn custom_lists(lists: &[CustomList], updated_at: i64) -> Vec<(String, ListDocument)> {
    let mut out: Vec<(String, ListDocument)> = Vec::new();
    for list in lists {
        let is_favorites = list.name.trim().eq_ignore_ascii_case(FAVORITES);
        let id = if is_favorites {
            FAVORITES.to_string()
        } else if RESERVED_LIST_IDS.contains(&list.id.as_str()) {
            format!("{CUSTOM_PREFIX}{}", list.id)
        } else {
            list.id.clone()
        };

        if out.iter().any(|(existing, _)| *existing == id) {
            tracing::warn!(list = %list.name, id = %id, "Skipping duplicate list");
            continue;
        }

        let mut document = list_document(&list.name, !is_favorites, updated_at);
        fill_items(&mut document, &list.items);
        out.push((id, document));
    }
    out
}

fn episode_tracking(
    history: &[HistoryItem],
    updated_at: i64,
) -> BTreeMap<String, EpisodeTrackingDocument> {
    let mut shows: BTreeMap<String, EpisodeTrackingDocument> = BTreeMap::new();
    for item in history {
        let (Some(show_id), Some(episode)) = (tmdb(item.show.as_ref()), item.episode.as_ref())
        else {
            continue;
        };
        let (Some(season), Some(number)) = (episode.season, episode.number) else {
            continue;
        };

        let document = shows
            .entry(show_id.to_string())
            .or_insert_with(|| EpisodeTrackingDocument {
                show_id,
                episodes: BTreeMap::new(),
                show_name: title(item.show.as_ref()),
                show_poster_path: None,
                last_updated: updated_at,
            });
        document
            .episodes
            .entry(episode_key(season, number))
            .or_insert_with(|| WatchedEpisode {
                episode_id: episode.ids.tmdb,
                season_number: season,
                episode_number: number,
                watched_at: millis(item.watched_at),
                name: episode.title.clone(),
                air_date: air_date(episode),
            });
    }
    shows
}

fn ratings(snapshot: &RemoteSnapshot) -> BTreeMap<String, RatingDocument> {
    let mut out = BTreeMap::new();

    let movies = snapshot.movie_ratings.iter().filter_map(|item| {
        let id = tmdb(item.movie.as_ref())?;
        Some((
            movie_rating_key(id),
            rating_document(item, MediaType::Movie, id, item.movie.as_ref())?,
        ))
    });
    let shows = snapshot.show_ratings.iter().filter_map(|item| {
        let id = tmdb(item.show.as_ref())?;
        Some((
            show_rating_key(id),
            rating_document(item, MediaType::Tv, id, item.show.as_ref())?,
        ))
    });
    let episodes = snapshot.episode_ratings.iter().filter_map(|item| {
        let show_id = tmdb(item.show.as_ref())?;
        let episode = item.episode.as_ref()?;
        let (season, number) = (episode.season?, episode.number?);
        let mut document = rating_document(item, MediaType::Episode, show_id, item.show.as_ref())?;
        document.season_number = Some(season);
        document.episode_number = Some(number);
        document.episode_id = episode.ids.tmdb;
        document.episode_name = episode.title.clone();
        Some((episode_rating_key(show_id, season, number), document))
    });

    for (key, document) in movies.chain(shows).chain(episodes) {
        out.entry(key).or_insert(document);
    }
    out
}

fn rating_document(
    item: &RatingItem,
    media_type: MediaType,
    media_id: u64,
    media: Option<&Media>,
) -> Option<RatingDocument> {
    Some(RatingDocument {
        media_type,
        media_id,
        rating: item.rating?,
        title: title(media),
        rated_at: millis(item.rated_at),
        poster_path: None,
        season_number: None,
        episode_number: None,
        episode_id: None,
        episode_name: None,
    })
}
