//! JSON API handlers for transfer management

use axum::Form;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{Value, json};
use shoal_core::{SnapshotMap, TransferSnapshot};

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct MagnetForm {
    pub link: String,
}

#[derive(Debug, Deserialize)]
pub struct FileForm {
    pub path: String,
}

/// All transfers keyed by info hash, `null` until the engine is configured.
pub async fn list_transfers(State(state): State<AppState>) -> Json<Option<SnapshotMap>> {
    Json(state.registry.list().await)
}

pub async fn add_magnet(
    State(state): State<AppState>,
    Form(form): Form<MagnetForm>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let info_hash = state.controller.add_descriptor(form.link.trim()).await?;
    tracing::info!("Added transfer {} via API", info_hash);
    Ok((StatusCode::ACCEPTED, Json(json!({ "info_hash": info_hash }))))
}

pub async fn get_transfer(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<TransferSnapshot>, ApiError> {
    Ok(Json(state.registry.get(&hash).await?))
}

pub async fn start_transfer(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.controller.start(&hash).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn stop_transfer(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.controller.stop(&hash).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_transfer(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete(&hash).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start_file(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Form(form): Form<FileForm>,
) -> Result<StatusCode, ApiError> {
    state.controller.start_file(&hash, &form.path).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn stop_file(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Form(form): Form<FileForm>,
) -> Result<StatusCode, ApiError> {
    state.controller.stop_file(&hash, &form.path).await?;
    Ok(StatusCode::NO_CONTENT)
}
