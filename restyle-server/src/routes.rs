//! HTTP routes.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use restyle_core::{
    styles::{self, StyleSummary},
    Dispatcher, GenerateError, GenerationRequest, GenerationResult,
};
use serde_json::json;
use std::{path::Path, sync::Arc};
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

/// Room photos arrive as data URIs inside JSON, so the default 2 MB limit is far too small.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

pub struct AppState {
    pub dispatcher: Dispatcher,
}

pub fn routes(state: Arc<AppState>, static_dir: &Path) -> Router {
    Router::new()
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(static_dir))
        .route("/get-predefined-styles", get(predefined_styles))
        .route("/api-status", get(api_status))
        .route("/generate", post(generate))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn predefined_styles() -> Json<Vec<StyleSummary>> {
    Json(styles::list())
}

async fn api_status(State(state): State<Arc<AppState>>) -> Response {
    match state.dispatcher.status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => {
            tracing::error!(backend = state.dispatcher.backend_name(), "status probe failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn generate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<GenerationResult>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    tracing::info!(
        prompt = request.prompt.as_deref().unwrap_or(""),
        style = request.style.as_deref().unwrap_or(""),
        image_len = request.image.as_ref().map_or(0, String::len),
        mask_len = request.mask.as_ref().map_or(0, String::len),
        "received generate request"
    );

    let result = state.dispatcher.handle(request).await?;
    Ok(Json(result))
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Generate(GenerateError),
}

impl From<GenerateError> for ApiError {
    fn from(e: GenerateError) -> Self {
        ApiError::Generate(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => {
                tracing::warn!("rejected request body: {msg}");
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::Generate(e) => {
                let status = StatusCode::from_u16(e.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                if status.is_server_error() {
                    tracing::error!("generation failed: {e}");
                } else {
                    tracing::warn!("rejected generate request: {e}");
                }
                let body = match e.details() {
                    Some(details) => json!({ "error": e.to_string(), "details": details }),
                    None => json!({ "error": e.to_string() }),
                };
                (status, Json(body)).into_response()
            }
        }
    }
}
