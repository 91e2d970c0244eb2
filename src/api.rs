//! HTTP front end
//!
//! # Endpoints
//! - `POST /parse` - multipart form with the catalog `file` (its file name is
//!   the job name) and an optional `callbackUri`; answers `202` once queued
//! - `GET /stats` - overseer status as JSON
//! - `GET /health` - liveness probe

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::info;

use crate::pipeline::{Overseer, OverseerStatus, SubmittedJob};

pub mod error;

pub use error::ApiError;

/// Largest accepted upload
pub const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub overseer: Arc<Overseer>,
}

pub fn build_router(overseer: Arc<Overseer>) -> Router {
    Router::new()
        .route("/parse", post(parse))
        .route("/stats", get(stats))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(AppState { overseer })
}

async fn parse(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmittedJob>), ApiError> {
    let mut upload: Option<(String, Bytes)> = None;
    let mut callback = None;

    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let name = field
                    .file_name()
                    .map(str::to_string)
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| ApiError::bad_request("Uploaded file has no name"))?;
                upload = Some((name, field.bytes().await?));
            }
            Some("callbackUri") => callback = Some(field.text().await?),
            _ => {}
        }
    }

    let (name, document) = upload.ok_or_else(|| ApiError::bad_request("Missing form field: file"))?;
    info!(file = %name, callback = callback.as_deref().unwrap_or_default(), "Catalog received");

    let submitted = state
        .overseer
        .submit_document(name, callback, Box::new(std::io::Cursor::new(document)))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(submitted)))
}

async fn stats(State(state): State<AppState>) -> Json<OverseerStatus> {
    Json(state.overseer.status())
}

async fn health() -> &'static str {
    "ok"
}
