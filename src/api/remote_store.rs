//! Reference authoritative store
//!
//! Minimal server side of the envelope protocol backed by a
//! [`MemoryRemote`]. Lets the binary run standalone and gives the HTTP
//! backend something real to talk to in tests.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tracing::{debug, warn};

use crate::models::{ResponseEnvelope, SaveRequest};
use crate::remote::MemoryRemote;

#[derive(Clone, Debug)]
pub struct RemoteStoreState {
    pub store: MemoryRemote,
    /// Bearer token required on settings routes, None = open
    pub token: Option<String>,
}

fn authorized(state: &RemoteStoreState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.token else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ResponseEnvelope::failure("Unauthorized")),
    )
        .into_response()
}

/// Handler for GET /api/settings
async fn load_handler(State(state): State<RemoteStoreState>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        warn!("Rejected unauthenticated settings load");
        return unauthorized();
    }
    Json(state.store.load_envelope()).into_response()
}

/// Handler for POST /api/settings
async fn save_handler(
    State(state): State<RemoteStoreState>,
    headers: HeaderMap,
    Json(request): Json<SaveRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        warn!("Rejected unauthenticated settings save");
        return unauthorized();
    }
    debug!(
        "Store received {} settings from {}",
        request.settings.len(),
        request.origin_id
    );
    Json(state.store.apply_save(&request)).into_response()
}

/// Handler for GET /api/health
async fn health_handler() -> Json<ResponseEnvelope> {
    Json(ResponseEnvelope::ok(None))
}

/// Creates the store router, nested under `/api`.
pub fn create_remote_store_router(store: MemoryRemote, token: Option<String>) -> Router {
    let api = Router::new()
        .route("/settings", get(load_handler).post(save_handler))
        .route("/health", get(health_handler))
        .with_state(RemoteStoreState { store, token });

    Router::new().nest("/api", api)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn save_body() -> Body {
        Body::from(
            json!({
                "settings": {"menu_width": 200, "stale": null},
                "options": {},
                "timestamp": 1,
                "originId": "ctx-a",
                "schemaVersion": 1
            })
            .to_string(),
        )
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = MemoryRemote::new();
        store.put("stale", json!("x"));
        let app = create_remote_store_router(store.clone(), None);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/settings")
                    .header("content-type", "application/json")
                    .body(save_body())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["success"], true);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/settings")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["data"]["menu_width"], 200);
        assert!(json["data"].get("stale").is_none());
    }

    #[tokio::test]
    async fn test_token_required() {
        let app = create_remote_store_router(MemoryRemote::new(), Some("secret".into()));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/settings")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["success"], false);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/settings")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_is_open() {
        let app = create_remote_store_router(MemoryRemote::new(), Some("secret".into()));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
