//! API Handlers
//!
//! HTTP request handlers for each settings endpoint. Handlers are thin:
//! validation of the HTTP shape here, semantics in the engine.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use crate::engine::{EngineStatus, ExportFormat, SettingsEngine};
use crate::error::{Result, SyncError};
use crate::metrics::MetricsSnapshot;
use crate::models::{
    validate_key, DeleteResponse, ExportQuery, GetResponse, HealthResponse, ResetRequest,
    SearchQuery, SetMultipleRequest, SetResponse, SetValueRequest, SettingsResponse,
};
use crate::queue::SaveOutcome;

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    pub engine: SettingsEngine,
}

impl AppState {
    pub fn new(engine: SettingsEngine) -> Self {
        Self { engine }
    }
}

/// Handler for GET /settings
pub async fn get_all_handler(State(state): State<AppState>) -> Json<SettingsResponse> {
    Json(SettingsResponse::new(state.engine.get_all()))
}

/// Handler for GET /settings/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    let value = state
        .engine
        .get(&key)
        .ok_or_else(|| SyncError::NotFound(key.clone()))?;
    Ok(Json(GetResponse::new(key, value)))
}

/// Handler for PUT /settings/:key
///
/// Responds with the value as stored, after sanitization.
pub async fn set_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<SetValueRequest>,
) -> Result<Json<SetResponse>> {
    let stored = state.engine.set(&key, req.value, req.options)?;
    Ok(Json(SetResponse::new(key, stored)))
}

/// Handler for PATCH /settings
pub async fn set_multiple_handler(
    State(state): State<AppState>,
    Json(req): Json<SetMultipleRequest>,
) -> Result<Json<SettingsResponse>> {
    if let Some(reason) = req.validate() {
        return Err(SyncError::Validation {
            key: "settings".to_string(),
            reason,
        });
    }
    let stored = state.engine.set_multiple(&req.settings, req.options)?;
    Ok(Json(SettingsResponse::new(stored)))
}

/// Handler for DELETE /settings/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    if let Some(reason) = validate_key(&key) {
        return Err(SyncError::Validation { key, reason });
    }
    let value = state.engine.delete(&key)?;
    Ok(Json(DeleteResponse::new(key, value)))
}

/// Handler for DELETE /settings
pub async fn clear_handler(State(state): State<AppState>) -> Result<Json<SettingsResponse>> {
    Ok(Json(SettingsResponse::new(state.engine.clear()?)))
}

/// Handler for POST /settings/reset
///
/// An empty body resets every registered key.
pub async fn reset_handler(
    State(state): State<AppState>,
    req: Option<Json<ResetRequest>>,
) -> Result<Json<SettingsResponse>> {
    let req = req.map(|Json(req)| req).unwrap_or_default();
    let reset = state.engine.reset_to_defaults(req.keys.as_deref())?;
    Ok(Json(SettingsResponse::new(reset)))
}

/// Handler for GET /search
pub async fn search_handler(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Json<SettingsResponse> {
    Json(SettingsResponse::new(state.engine.search(&query.q)))
}

/// Handler for GET /export
pub async fn export_handler(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response> {
    let format: ExportFormat = query.format.parse()?;
    let body = state.engine.export(format)?;
    let content_type = match format {
        ExportFormat::Json => "application/json",
        ExportFormat::Css => "text/css; charset=utf-8",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

/// Handler for POST /import
pub async fn import_handler(
    State(state): State<AppState>,
    Json(data): Json<Value>,
) -> Result<Json<SettingsResponse>> {
    let imported = state.engine.import_value(data)?;
    Ok(Json(SettingsResponse::new(imported)))
}

/// Handler for POST /refresh
///
/// Responds with the settings that changed.
pub async fn refresh_handler(State(state): State<AppState>) -> Result<Json<SettingsResponse>> {
    let changes = state.engine.refresh().await?;
    Ok(Json(SettingsResponse::new(changes)))
}

/// Handler for POST /save
pub async fn save_handler(State(state): State<AppState>) -> Json<SaveOutcome> {
    Json(state.engine.force_save().await)
}

/// Handler for GET /status
pub async fn status_handler(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.engine.get_status())
}

/// Handler for GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.engine.get_metrics())
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
