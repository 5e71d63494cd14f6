//! Concurrent snapshot fetch.
//!
//! Issues every collection request for one sync with a bounded fan-out, then
//! fetches each custom list's items once the definitions are known. The
//! first failure aborts the whole fetch; no partial snapshot is returned.

use futures_util::stream::{self, StreamExt, TryStreamExt};

use super::error::RemoteError;
use super::responses::{HistoryItem, ListSummary, ListedItem, RatingItem};
use super::{MediaKind, TrackerApi};

/// A custom list definition with its fetched items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomList {
    /// Remote slug (or numeric id when the slug is missing).
    pub id: String,
    pub name: String,
    pub items: Vec<ListedItem>,
}

/// Everything the planner needs, fetched in one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteSnapshot {
    pub movie_history: Vec<HistoryItem>,
    pub episode_history: Vec<HistoryItem>,
    pub movie_ratings: Vec<RatingItem>,
    pub show_ratings: Vec<RatingItem>,
    pub episode_ratings: Vec<RatingItem>,
    pub movie_watchlist: Vec<ListedItem>,
    pub show_watchlist: Vec<ListedItem>,
    /// In the order the service returned the definitions.
    pub lists: Vec<CustomList>,
}

#[derive(Debug, Clone, Copy)]
enum Job {
    MovieHistory,
    EpisodeHistory,
    Ratings(MediaKind),
    Watchlist(MediaKind),
    Lists,
}

const JOBS: [Job; 8] = [
    Job::MovieHistory,
    Job::EpisodeHistory,
    Job::Ratings(MediaKind::Movie),
    Job::Ratings(MediaKind::Show),
    Job::Ratings(MediaKind::Episode),
    Job::Watchlist(MediaKind::Movie),
    Job::Watchlist(MediaKind::Show),
    Job::Lists,
];

enum Fetched {
    MovieHistory(Vec<HistoryItem>),
    EpisodeHistory(Vec<HistoryItem>),
    Ratings(MediaKind, Vec<RatingItem>),
    Watchlist(MediaKind, Vec<ListedItem>),
    Lists(Vec<ListSummary>),
}

async fn run_job(api: &dyn TrackerApi, access_token: &str, job: Job) -> Result<Fetched, RemoteError> {
    Ok(match job {
        Job::MovieHistory => Fetched::MovieHistory(api.movie_history(access_token).await?),
        Job::EpisodeHistory => Fetched::EpisodeHistory(api.episode_history(access_token).await?),
        Job::Ratings(kind) => Fetched::Ratings(kind, api.ratings(access_token, kind).await?),
        Job::Watchlist(kind) => Fetched::Watchlist(kind, api.watchlist(access_token, kind).await?),
        Job::Lists => Fetched::Lists(api.lists(access_token).await?),
    })
}

/// Fetch a complete snapshot of the account's remote state.
///
/// At most `concurrency` requests are in flight at once.
pub async fn fetch_snapshot(
    api: &dyn TrackerApi,
    access_token: &str,
    concurrency: usize,
) -> Result<RemoteSnapshot, RemoteError> {
    let concurrency = concurrency.max(1);

    let fetched: Vec<Fetched> = stream::iter(JOBS)
        .map(|job| run_job(api, access_token, job))
        .buffer_unordered(concurrency)
        .try_collect()
        .await?;

    let mut snapshot = RemoteSnapshot::default();
    let mut definitions = Vec::new();
    for result in fetched {
        match result {
            Fetched::MovieHistory(items) => snapshot.movie_history = items,
            Fetched::EpisodeHistory(items) => snapshot.episode_history = items,
            Fetched::Ratings(MediaKind::Movie, items) => snapshot.movie_ratings = items,
            Fetched::Ratings(MediaKind::Show, items) => snapshot.show_ratings = items,
            Fetched::Ratings(MediaKind::Episode, items) => snapshot.episode_ratings = items,
            Fetched::Watchlist(MediaKind::Movie, items) => snapshot.movie_watchlist = items,
            Fetched::Watchlist(MediaKind::Show, items) => snapshot.show_watchlist = items,
            Fetched::Watchlist(MediaKind::Episode, _) => {}
            Fetched::Lists(lists) => definitions = lists,
        }
    }

    let definitions: Vec<(String, String)> = definitions
        .into_iter()
        .filter_map(|list| match list.slug() {
            Some(id) => Some((id, list.name)),
            None => {
                tracing::warn!(name = %list.name, "Skipping custom list without an id");
                None
            }
        })
        .collect();

    let mut lists: Vec<(usize, CustomList)> = stream::iter(definitions.into_iter().enumerate())
        .map(|(index, (id, name))| async move {
            let items = api.list_items(access_token, &id).await?;
            Ok::<_, RemoteError>((index, CustomList { id, name, items }))
        })
        .buffer_unordered(concurrency)
        .try_collect()
        .await?;
    lists.sort_by_key(|(index, _)| *index);
    snapshot.lists = lists.into_iter().map(|(_, list)| list).collect();

    tracing::debug!(
        movies = snapshot.movie_history.len(),
        episodes = snapshot.episode_history.len(),
        lists = snapshot.lists.len(),
        "Fetched remote snapshot"
    );

    Ok(snapshot)
}
