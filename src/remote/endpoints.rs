//! Path builders for the tracking service's v2 API.
//! All paths are relative to the configured API root.

use super::MediaKind;

pub const DEFAULT_API_URL: &str = "https://api.trakt.tv";

/// Value of the `trakt-api-version` header.
pub const API_VERSION: &str = "2";

/// Redirect URI used by device/out-of-band OAuth apps.
pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

pub const TOKEN: &str = "/oauth/token";
pub const LISTS: &str = "/users/me/lists";

pub fn history(kind: MediaKind) -> String {
    format!("/sync/history/{}", kind.path_segment())
}

pub fn ratings(kind: MediaKind) -> String {
    format!("/sync/ratings/{}", kind.path_segment())
}

pub fn watchlist(kind: MediaKind) -> String {
    format!("/sync/watchlist/{}", kind.path_segment())
}

pub fn list_items(list_id: &str) -> String {
    format!("{}/{}/items", LISTS, list_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_paths() {
        assert_eq!(history(MediaKind::Movie), "/sync/history/movies");
        assert_eq!(history(MediaKind::Episode), "/sync/history/episodes");
        assert_eq!(ratings(MediaKind::Show), "/sync/ratings/shows");
        assert_eq!(watchlist(MediaKind::Movie), "/sync/watchlist/movies");
        assert_eq!(list_items("sci-fi"), "/users/me/lists/sci-fi/items");
    }
}
