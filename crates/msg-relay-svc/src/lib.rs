//! Message Relay Service
//!
//! HTTP routes over a [`MessageStore`]:
//!
//! - `GET /health`
//! - `POST /v1/sessions/:sid/messages` appends a broadcast or direct message
//! - `GET /v1/sessions/:sid/messages?recipient=&after=` returns every message
//!   for `recipient` with a sequence number above `after`

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use msg_relay::{
    b64, MessageStore, MessagesQuery, MessagesResponse, PostMessageRequest, RelayError,
    WireMessage,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Application state
pub struct AppState {
    pub store: MessageStore,
}

/// Error returned to HTTP callers
pub struct ApiError(RelayError);

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            RelayError::InvalidFormat(_) => StatusCode::BAD_REQUEST,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

/// Build the service router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/v1/sessions/:sid/messages",
            get(get_messages).post(post_message),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Periodically drop expired messages
pub fn spawn_cleanup(
    store: MessageStore,
    every: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let removed = store.cleanup();
            if removed > 0 {
                info!(removed, "Expired messages removed");
            }
        }
    })
}

/// Health check endpoint
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "msg-relay-svc",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.store.session_count(),
    }))
}

/// Post a message to a session
async fn post_message(
    State(state): State<Arc<AppState>>,
    Path(sid): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = b64::decode(&req.payload)
        .map_err(|e| RelayError::InvalidFormat(format!("Invalid base64: {}", e)))?;

    let outcome = state.store.put(&sid, req.from, req.to, payload)?;

    debug!(
        session_id = %sid,
        seq = outcome.seq,
        from = req.from,
        to = ?req.to,
        duplicate = outcome.duplicate,
        "Message posted"
    );

    let status = if outcome.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

/// Fetch a recipient's messages after a sequence number
async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(sid): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let messages = state
        .store
        .fetch(&sid, query.recipient, query.after)?
        .iter()
        .map(WireMessage::from)
        .collect();
    Ok(Json(MessagesResponse { messages }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use msg_relay::PutOutcome;
    use tower::ServiceExt;

    fn app() -> Router {
        router(Arc::new(AppState {
            store: MessageStore::new(3600),
        }))
    }

    fn sid() -> String {
        hex::encode([0xabu8; 32])
    }

    fn post(sid: &str, body: &PostMessageRequest) -> Request<Body> {
        Request::post(format!("/v1/sessions/{}/messages", sid))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_post_then_poll() {
        let app = app();
        let message = PostMessageRequest {
            from: 1,
            to: None,
            payload: b64::encode(b"commitment"),
        };

        let response = app.clone().oneshot(post(&sid(), &message)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let outcome: PutOutcome = json(response).await;
        assert_eq!(outcome.seq, 1);

        let response = app.clone().oneshot(post(&sid(), &message)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let uri = format!("/v1/sessions/{}/messages?recipient=2&after=0", sid());
        let response = app
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body: MessagesResponse = json(response).await;
        assert_eq!(body.messages.len(), 1);
        assert_eq!(body.messages[0].from, 1);
        assert_eq!(b64::decode(&body.messages[0].payload).unwrap(), b"commitment");

        let uri = format!("/v1/sessions/{}/messages?recipient=1", sid());
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body: MessagesResponse = json(response).await;
        assert!(body.messages.is_empty());
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let app = app();
        let message = PostMessageRequest {
            from: 1,
            to: Some(2),
            payload: "***".into(),
        };
        let response = app.clone().oneshot(post(&sid(), &message)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let message = PostMessageRequest {
            from: 1,
            to: Some(2),
            payload: b64::encode(b"x"),
        };
        let response = app.oneshot(post("short", &message)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
