//! API Routes
//!
//! Configures the Axum router with all settings endpoints.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, delete_handler, export_handler, get_all_handler, get_handler, health_handler,
    import_handler, metrics_handler, refresh_handler, reset_handler, save_handler,
    search_handler, set_handler, set_multiple_handler, status_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/settings",
            get(get_all_handler)
                .patch(set_multiple_handler)
                .delete(clear_handler),
        )
        .route("/settings/reset", post(reset_handler))
        .route(
            "/settings/:key",
            get(get_handler).put(set_handler).delete(delete_handler),
        )
        .route("/search", get(search_handler))
        .route("/export", get(export_handler))
        .route("/import", post(import_handler))
        .route("/refresh", post(refresh_handler))
        .route("/save", post(save_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
