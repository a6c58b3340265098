//! FTPS file browser endpoints (§4.9, §6.1). `/api/files/*` normalizes the
//! spec's inconsistent `/api/ftps/files` vs `/files/*` prefixes onto one
//! router, documented in DESIGN.md.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::resolve_printer_id;
use crate::errors::{DomainError, DomainResult};
use crate::AppState;

async fn ftps_for(state: &AppState, printer_id: Option<String>) -> DomainResult<(String, Arc<crate::services::ftps_service::FtpsService>)> {
    let config = state.config.read().await;
    let printer_id = resolve_printer_id(&config, printer_id)?;
    drop(config);
    let ftps = state
        .registry
        .connections
        .ftps_for(&printer_id)
        .await
        .ok_or_else(|| DomainError::ServiceUnavailable("FTPS channel is not connected".into()))?;
    Ok((printer_id, ftps))
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub printer_id: Option<String>,
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    "/".to_string()
}

pub async fn list(State(state): State<Arc<AppState>>, Query(query): Query<PathQuery>) -> DomainResult<Json<Value>> {
    let (_, ftps) = ftps_for(&state, query.printer_id).await?;
    let entries = ftps.list(&query.path).await?;
    Ok(Json(json!({"path": query.path, "entries": entries})))
}

pub async fn download(State(state): State<Arc<AppState>>, Query(query): Query<PathQuery>) -> DomainResult<Response> {
    let (_, ftps) = ftps_for(&state, query.printer_id).await?;
    let bytes = ftps.retrieve(&query.path).await?;
    let filename = query.path.rsplit('/').next().unwrap_or("download").to_string();
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderRequest {
    #[serde(default)]
    pub printer_id: Option<String>,
    pub path: String,
}

pub async fn create_folder(State(state): State<Arc<AppState>>, Json(body): Json<CreateFolderRequest>) -> DomainResult<Json<Value>> {
    let (_, ftps) = ftps_for(&state, body.printer_id).await?;
    ftps.make_dir(&body.path).await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    #[serde(default)]
    pub printer_id: Option<String>,
    pub from: String,
    pub to: String,
}

pub async fn rename(State(state): State<Arc<AppState>>, Json(body): Json<RenameRequest>) -> DomainResult<Json<Value>> {
    let (_, ftps) = ftps_for(&state, body.printer_id).await?;
    ftps.rename(&body.from, &body.to).await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub printer_id: Option<String>,
    pub path: String,
}

/// Synchronous upload: the body is the file, buffered fully before the
/// `STOR` completes (§9 Open Questions — streaming upload progress is not
/// implemented, see DESIGN.md).
pub async fn upload(State(state): State<Arc<AppState>>, Query(query): Query<UploadQuery>, body: Bytes) -> DomainResult<Json<Value>> {
    let (_, ftps) = ftps_for(&state, query.printer_id).await?;
    ftps.store(&query.path, &body).await?;
    Ok(Json(json!({"ok": true, "bytes": body.len()})))
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub printer_id: Option<String>,
    pub path: String,
}

pub async fn delete(State(state): State<Arc<AppState>>, Query(query): Query<DeleteRequest>) -> DomainResult<Json<Value>> {
    let (_, ftps) = ftps_for(&state, query.printer_id).await?;
    ftps.delete(&query.path).await?;
    Ok(Json(json!({"ok": true})))
}

/// Uploads complete synchronously inside `upload`, so there is no
/// in-flight job to poll; always reports idle. Kept as a distinct
/// endpoint so the client doesn't need to special-case this transport.
pub async fn upload_status() -> Json<Value> {
    Json(json!({"active": false}))
}

pub async fn upload_cancel() -> Json<Value> {
    Json(json!({"ok": true}))
}
