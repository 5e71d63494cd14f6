//! HTTP surface.
//!
//! - `POST /sync` - run a sync for the session's user
//! - `GET /health` - liveness probe
//!
//! Session verification happens upstream; this server only reads the
//! verified user id through a [`SessionVerifier`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{
        header::{self, HeaderName, InvalidHeaderName},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::sync::{SyncEngine, SyncError};

/// Header the bundled [`TrustedHeader`] verifier reads by default.
pub const DEFAULT_USER_HEADER: &str = "x-user-id";

/// Resolves the authenticated user of a request.
pub trait SessionVerifier: Send + Sync {
    /// The verified user id, or `None` when the request has no valid session.
    fn verify(&self, headers: &HeaderMap) -> Option<String>;
}

/// Trusts a header set by a session-verifying reverse proxy.
#[derive(Debug, Clone)]
pub struct TrustedHeader {
    header: HeaderName,
}

impl TrustedHeader {
    pub fn new(name: &str) -> Result<Self, InvalidHeaderName> {
        Ok(Self {
            header: HeaderName::from_bytes(name.as_bytes())?,
        })
    }
}

impl SessionVerifier for TrustedHeader {
    fn verify(&self, headers: &HeaderMap) -> Option<String> {
        let value = headers.get(&self.header)?.to_str().ok()?.trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
    pub sessions: Arc<dyn SessionVerifier>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl ErrorBody {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
            retry_after: None,
            message: None,
        }
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            SyncError::NotConnected => (status, Json(ErrorBody::new("Not connected"))).into_response(),
            SyncError::ReauthRequired => {
                let body = ErrorBody {
                    code: Some(self.code()),
                    ..ErrorBody::new("Remote account needs to be reconnected")
                };
                (status, Json(body)).into_response()
            }
            SyncError::RateLimited { retry_after_secs } => {
                let body = ErrorBody {
                    code: Some(self.code()),
                    retry_after: Some(retry_after_secs),
                    ..ErrorBody::new("Sync cooldown active")
                };
                (
                    status,
                    [(header::RETRY_AFTER, retry_after_secs.to_string())],
                    Json(body),
                )
                    .into_response()
            }
            SyncError::SyncInProgress => {
                let body = ErrorBody {
                    code: Some(self.code()),
                    message: Some(
                        "Another sync is running for this account. Try again in a few minutes."
                            .to_string(),
                    ),
                    ..ErrorBody::new("Sync already in progress")
                };
                (status, Json(body)).into_response()
            }
            SyncError::TokenRefreshFailed(_) | SyncError::Remote(_) | SyncError::Store(_) => {
                // Details are logged by the engine; clients get a generic body
                let body = ErrorBody {
                    code: Some(self.code()),
                    ..ErrorBody::new("Sync failed")
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

async fn sync(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(user_id) = state.sessions.verify(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody::new("Unauthorized")),
        )
            .into_response();
    };

    tracing::debug!(user = %user_id, "POST /sync");
    // Detached so a client hanging up cannot drop the run between acquiring
    // and releasing the lock
    let engine = Arc::clone(&state.engine);
    let run = tokio::spawn(async move { engine.run(&user_id).await });
    match run.await {
        Ok(Ok(report)) => Json(report).into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Sync task aborted");
            let body = ErrorBody {
                code: Some("UNEXPECTED_FAILURE"),
                ..ErrorBody::new("Sync failed")
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sync", post(sync))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled, then drain in-flight requests.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::{self, FakeTracker};
    use crate::remote::RemoteError;
    use crate::store::{SqliteStore, SyncCredentials, SyncStore};
    use crate::sync::{Clock, SyncSettings};
    use axum::http::HeaderValue;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::Value;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    async fn app() -> (AppState, Arc<SqliteStore>, Arc<FakeTracker>) {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        db.link_account(
            "u1",
            &SyncCredentials {
                access_token: "a".into(),
                refresh_token: "r".into(),
                expires_at: Some(t0() + chrono::Duration::days(30)),
            },
        )
        .await
        .unwrap();
        let fake = Arc::new(FakeTracker::new());
        let engine = SyncEngine::new(db.clone(), fake.clone(), SyncSettings::default())
            .with_clock(Arc::new(FixedClock(t0())));
        let state = AppState {
            engine: Arc::new(engine),
            sessions: Arc::new(TrustedHeader::new(DEFAULT_USER_HEADER).unwrap()),
        };
        (state, db, fake)
    }

    fn as_user(user: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_str(user).unwrap());
        headers
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_trusted_header_verify() {
        let verifier = TrustedHeader::new("X-Forwarded-User").unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(verifier.verify(&headers), None);

        headers.insert("x-forwarded-user", HeaderValue::from_static("  "));
        assert_eq!(verifier.verify(&headers), None);

        headers.insert("x-forwarded-user", HeaderValue::from_static("alice"));
        assert_eq!(verifier.verify(&headers).as_deref(), Some("alice"));
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        assert!(TrustedHeader::new("bad header").is_err());
    }

    #[tokio::test]
    async fn test_sync_without_session_is_unauthorized() {
        let (state, _, fake) = app().await;
        let response = sync(State(state), HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "Unauthorized");
        assert!(fake.access_tokens_seen().is_empty());
    }

    #[tokio::test]
    async fn test_sync_success_body() {
        let (state, _, fake) = app().await;
        fake.update(|s| {
            s.movie_history = vec![
                testing::movie_watch(1, "Alien", "2024-01-01T00:00:00Z"),
                testing::movie_watch(2, "Heat", "2024-01-02T00:00:00Z"),
            ]
        });

        let response = sync(State(state), as_user("u1")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["movies"], 2);
        assert_eq!(body["favorites"], 0);
    }

    #[tokio::test]
    async fn test_sync_not_connected() {
        let (state, _, _) = app().await;
        let response = sync(State(state), as_user("stranger")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Not connected");
    }

    #[tokio::test]
    async fn test_sync_reauth_required() {
        let (state, db, _) = app().await;
        db.execute_raw(
            "UPDATE users SET access_token = NULL WHERE user_id = 'u1'",
            [],
        );
        let response = sync(State(state), as_user("u1")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["code"], "REAUTH_REQUIRED");
    }

    #[tokio::test]
    async fn test_sync_rate_limited_sets_retry_after() {
        let (state, db, _) = app().await;
        db.execute_raw(
            "UPDATE users SET last_sync_at = ?1 WHERE user_id = 'u1'",
            [(t0() - chrono::Duration::seconds(120)).timestamp_millis()],
        );

        let response = sync(State(state), as_user("u1")).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "180"
        );
        assert_eq!(json_body(response).await["retryAfter"], 180);
    }

    #[tokio::test]
    async fn test_sync_in_progress() {
        let (state, db, _) = app().await;
        db.execute_raw(
            "UPDATE users SET sync_lock_at = ?1 WHERE user_id = 'u1'",
            [(t0() - chrono::Duration::seconds(1)).timestamp_millis()],
        );

        let response = sync(State(state), as_user("u1")).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Sync already in progress");
        assert!(body["message"].as_str().unwrap().contains("Try again"));
    }

    #[tokio::test]
    async fn test_unexpected_failure_hides_details() {
        let (state, db, fake) = app().await;
        fake.update(|s| s.fail_endpoint = Some("lists"));

        let response = sync(State(state), as_user("u1")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Sync failed");
        assert!(!body.to_string().contains("503"));

        let user = db.get_user("u1").await.unwrap().unwrap();
        assert!(user.sync_lock_at.is_none());
    }

    #[tokio::test]
    async fn test_client_disconnect_still_releases_lock() {
        use tokio::io::AsyncWriteExt;

        let (state, db, fake) = app().await;
        fake.update(|s| s.delay = Some(std::time::Duration::from_millis(300)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { axum::serve(listener, router(state)).await });

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client
            .write_all(
                b"POST /sync HTTP/1.1\r\nhost: localhost\r\nx-user-id: u1\r\ncontent-length: 0\r\n\r\n",
            )
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let user = db.get_user("u1").await.unwrap().unwrap();
        assert!(user.sync_lock_at.is_some());
        drop(client);

        let mut user = user;
        for _ in 0..40 {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            user = db.get_user("u1").await.unwrap().unwrap();
            if user.last_sync_at.is_some() {
                break;
            }
        }
        assert!(user.sync_lock_at.is_none());
        assert_eq!(user.last_sync_at, Some(t0()));
        server.abort();
    }

    #[tokio::test]
    async fn test_refresh_failure_is_500() {
        let response = SyncError::TokenRefreshFailed(RemoteError::Status {
            status: 400,
            endpoint: "/oauth/token".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["code"], "TOKEN_REFRESH_FAILED");
    }

    #[tokio::test]
    async fn test_health() {
        let response = health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let (state, _, _) = app().await;
        let token = CancellationToken::new();
        let handle = tokio::spawn(serve(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            state,
            token.clone(),
        ));
        token.cancel();
        handle.await.unwrap().unwrap();
    }
}
