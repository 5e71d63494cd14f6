//! HTTP client for the tracking service.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use super::endpoints::{self, API_VERSION};
use super::error::RemoteError;
use super::responses::{
    HistoryItem, ListSummary, ListedItem, RatingItem, RefreshTokenRequest, TokenResponse,
};
use super::{MediaKind, TokenGrant, TrackerApi};

/// Items requested per page on paginated collection endpoints.
const PAGE_LIMIT: u32 = 1000;

/// Hard stop on page walks in case the page-count header is bogus.
const MAX_PAGES: u32 = 500;

const PAGE_COUNT_HEADER: &str = "x-pagination-page-count";

/// Connection settings for the tracking service.
#[derive(Clone)]
pub struct TrackerConfig {
    pub api_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for TrackerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerConfig")
            .field("api_url", &self.api_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// [`TrackerApi`] over HTTPS.
pub struct HttpTracker {
    client: Client,
    config: TrackerConfig,
}

impl std::fmt::Debug for HttpTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTracker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HttpTracker {
    pub fn new(mut config: TrackerConfig) -> Result<Self, RemoteError> {
        config.api_url = config.api_url.trim_end_matches('/').to_string();

        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        default_headers.insert("trakt-api-version", HeaderValue::from_static(API_VERSION));

        let client = Client::builder()
            .default_headers(default_headers)
            .user_agent(concat!("watchsync/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(RemoteError::Client)?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url, path)
    }

    fn authorized(&self, builder: RequestBuilder, access_token: &str) -> RequestBuilder {
        builder
            .bearer_auth(access_token)
            .header("trakt-api-key", &self.config.client_id)
    }

    /// Fetch every page of a collection endpoint.
    async fn get_all<T: DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
        extended: Option<&str>,
    ) -> Result<Vec<T>, RemoteError> {
        let mut items = Vec::new();
        let mut page = 1u32;

        loop {
            let mut builder = self.authorized(self.client.get(self.url(path)), access_token);
            builder = builder.query(&[("page", page), ("limit", PAGE_LIMIT)]);
            if let Some(level) = extended {
                builder = builder.query(&[("extended", level)]);
            }

            tracing::debug!(page, "GET {}", path);
            let response = builder
                .send()
                .await
                .map_err(|e| RemoteError::http(path, e))?;
            let response = check_status(response, path)?;
            let page_count = page_count(response.headers());

            let mut batch: Vec<T> = decode(response, path).await?;
            items.append(&mut batch);

            match page_count {
                Some(total) if page < total && page < MAX_PAGES => page += 1,
                _ => break,
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl TrackerApi for HttpTracker {
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, RemoteError> {
        let body = RefreshTokenRequest {
            refresh_token,
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
            redirect_uri: &self.config.redirect_uri,
            grant_type: "refresh_token",
        };

        tracing::debug!("POST {}", endpoints::TOKEN);
        let response = self
            .client
            .post(self.url(endpoints::TOKEN))
            .json(&body)
            .send()
            .await
            .map_err(|e| RemoteError::http(endpoints::TOKEN, e))?;
        let response = check_status(response, endpoints::TOKEN)?;
        let token: TokenResponse = decode(response, endpoints::TOKEN).await?;

        if token.access_token.is_empty() || token.refresh_token.is_empty() {
            return Err(RemoteError::InvalidResponse {
                endpoint: endpoints::TOKEN.to_string(),
                reason: "token response is missing a token".to_string(),
            });
        }

        let expires_at = token.expires_at(Utc::now());
        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
        })
    }

    async fn movie_history(&self, access_token: &str) -> Result<Vec<HistoryItem>, RemoteError> {
        self.get_all(&endpoints::history(MediaKind::Movie), access_token, None)
            .await
    }

    async fn episode_history(&self, access_token: &str) -> Result<Vec<HistoryItem>, RemoteError> {
        // `full` adds first_aired to each episode
        self.get_all(
            &endpoints::history(MediaKind::Episode),
            access_token,
            Some("full"),
        )
        .await
    }

    async fn ratings(
        &self,
        access_token: &str,
        kind: MediaKind,
    ) -> Result<Vec<RatingItem>, RemoteError> {
        self.get_all(&endpoints::ratings(kind), access_token, None)
            .await
    }

    async fn watchlist(
        &self,
        access_token: &str,
        kind: MediaKind,
    ) -> Result<Vec<ListedItem>, RemoteError> {
        self.get_all(&endpoints::watchlist(kind), access_token, None)
            .await
    }

    async fn lists(&self, access_token: &str) -> Result<Vec<ListSummary>, RemoteError> {
        self.get_all(endpoints::LISTS, access_token, None).await
    }

    async fn list_items(
        &self,
        access_token: &str,
        list_id: &str,
    ) -> Result<Vec<ListedItem>, RemoteError> {
        self.get_all(&endpoints::list_items(list_id), access_token, None)
            .await
    }
}

fn check_status(response: Response, endpoint: &str) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(RemoteError::Status {
            status: status.as_u16(),
            endpoint: endpoint.to_string(),
        })
    }
}

async fn decode<T: DeserializeOwned>(response: Response, endpoint: &str) -> Result<T, RemoteError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| RemoteError::http(endpoint, e))?;
    serde_json::from_slice(&bytes).map_err(|source| RemoteError::Json {
        endpoint: endpoint.to_string(),
        source,
    })
}

/// Total page count advertised by a paginated response, if any.
fn page_count(headers: &HeaderMap) -> Option<u32> {
    headers
        .get(PAGE_COUNT_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_url: &str) -> TrackerConfig {
        TrackerConfig {
            api_url: api_url.to_string(),
            client_id: "id".to_string(),
            client_secret: "very-secret".to_string(),
            redirect_uri: endpoints::OOB_REDIRECT_URI.to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_page_count_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(page_count(&headers), None);
        headers.insert(PAGE_COUNT_HEADER, HeaderValue::from_static("4"));
        assert_eq!(page_count(&headers), Some(4));
        headers.insert(PAGE_COUNT_HEADER, HeaderValue::from_static("many"));
        assert_eq!(page_count(&headers), None);
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let tracker = HttpTracker::new(config("https://api.example.test/")).unwrap();
        assert_eq!(
            tracker.url("/users/me/lists"),
            "https://api.example.test/users/me/lists"
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let tracker = HttpTracker::new(config("https://api.example.test")).unwrap();
        let out = format!("{:?}", tracker);
        assert!(!out.contains("very-secret"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_http_error() {
        let tracker = HttpTracker::new(config("http://127.0.0.1:1")).unwrap();
        let err = tracker.lists("token").await.unwrap_err();
        assert!(matches!(err, RemoteError::Http { .. }));
        assert!(!err.is_auth_failure());
    }
}
