//! Print job endpoints (§4.8, §6.1): prepare/cancel/execute/status plus
//! the plate preview image and per-plate skip-objects gcode passthrough.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::resolve_printer_id;
use crate::errors::{DomainError, DomainResult};
use crate::services::print_job::ExecutePrintParams;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PrepareRequest {
    #[serde(default)]
    pub printer_id: Option<String>,
    pub filename: String,
}

pub async fn prepare(State(state): State<Arc<AppState>>, Json(body): Json<PrepareRequest>) -> DomainResult<Json<Value>> {
    let config = state.config.read().await;
    let printer_id = resolve_printer_id(&config, body.printer_id)?;
    drop(config);
    state.registry.print_jobs.prepare(&printer_id, &body.filename).await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct PrinterScoped {
    #[serde(default)]
    pub printer_id: Option<String>,
}

pub async fn cancel(State(state): State<Arc<AppState>>, Json(body): Json<PrinterScoped>) -> DomainResult<Json<Value>> {
    let config = state.config.read().await;
    let printer_id = resolve_printer_id(&config, body.printer_id)?;
    drop(config);
    state.registry.print_jobs.cancel(&printer_id).await;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub printer_id: Option<String>,
    pub url: String,
    pub file: String,
    pub plate: String,
    #[serde(default)]
    pub bed_leveling: bool,
    #[serde(default)]
    pub flow_cali: bool,
    #[serde(default)]
    pub timelapse: bool,
    #[serde(default)]
    pub use_ams: bool,
    #[serde(default)]
    pub layer_inspect: bool,
    #[serde(default)]
    pub vibration_cali: bool,
    #[serde(default)]
    pub ams_mapping: Option<Vec<i32>>,
}

pub async fn execute(State(state): State<Arc<AppState>>, Json(body): Json<ExecuteRequest>) -> DomainResult<Json<Value>> {
    let config = state.config.read().await;
    let printer_id = resolve_printer_id(&config, body.printer_id.clone())?;
    drop(config);
    let params = ExecutePrintParams {
        url: body.url,
        file: body.file,
        plate: body.plate,
        bed_leveling: body.bed_leveling,
        flow_cali: body.flow_cali,
        timelapse: body.timelapse,
        use_ams: body.use_ams,
        layer_inspect: body.layer_inspect,
        vibration_cali: body.vibration_cali,
        ams_mapping: body.ams_mapping,
    };
    state.registry.print_jobs.execute_print(&printer_id, params).await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct PrinterIdQuery {
    pub printer_id: Option<String>,
}

pub async fn status(State(state): State<Arc<AppState>>, Query(query): Query<PrinterIdQuery>) -> DomainResult<Json<Value>> {
    let config = state.config.read().await;
    let printer_id = resolve_printer_id(&config, query.printer_id)?;
    drop(config);
    let job = state.registry.print_jobs.status(&printer_id).await;
    Ok(Json(json!(job)))
}

#[derive(Debug, Deserialize)]
pub struct PlatePreviewQuery {
    pub printer_id: String,
    pub plate: String,
}

/// Serves a plate preview PNG from the current job's extracted bundle.
/// Allowlisted past the auth middleware (§6.1) since it's embedded
/// directly in `<img src>` tags without custom headers.
pub async fn plate_preview(State(state): State<Arc<AppState>>, Query(query): Query<PlatePreviewQuery>) -> DomainResult<Response> {
    if query.plate.contains("..") || query.plate.contains('/') {
        return Err(DomainError::BadRequest("invalid plate identifier".into()));
    }
    let extract_dir = current_extract_dir(&state, &query.printer_id).await?;
    let path = extract_dir.join("Metadata").join(format!("{}.png", query.plate));
    let bytes = tokio::fs::read(&path).await.map_err(|_| DomainError::NotFound("plate preview".into()))?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response())
}

async fn current_extract_dir(state: &AppState, printer_id: &str) -> DomainResult<std::path::PathBuf> {
    let job = state.registry.print_jobs.status(printer_id).await;
    let metadata = job.metadata_result.ok_or_else(|| DomainError::NotFound("print job metadata".into()))?;
    Ok(std::path::PathBuf::from(metadata.extract_dir))
}

#[derive(Debug, Deserialize)]
pub struct SkipMetadataQuery {
    pub printer_id: String,
    pub path: String,
}

/// Serves the extracted pick-metadata gcode fragment a slicer plugin reads
/// to resolve the skip-objects dialog for a plate.
pub async fn skip_metadata(State(state): State<Arc<AppState>>, Query(query): Query<SkipMetadataQuery>) -> DomainResult<Response> {
    if query.path.contains("..") {
        return Err(DomainError::BadRequest("invalid path".into()));
    }
    let extract_dir = current_extract_dir(&state, &query.printer_id).await?;
    let path = extract_dir.join(&query.path);
    let bytes = tokio::fs::read(&path).await.map_err(|_| DomainError::NotFound("skip metadata".into()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain")], bytes).into_response())
}
