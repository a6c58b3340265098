//! `GET /api/camera`, WebRTC offer/keepalive/release (§6.1, §6.2).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::resolve_printer_id;
use crate::api::status::PrinterIdQuery;
use crate::errors::{DomainError, DomainResult};
use crate::AppState;

pub async fn latest_frame(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PrinterIdQuery>,
) -> DomainResult<Json<Value>> {
    let config = state.config.read().await;
    let printer_id = resolve_printer_id(&config, query.printer_id)?;
    drop(config);
    let snapshot = state.registry.state.repository().get_state(&printer_id).await;
    let frame = snapshot.camera_frame.ok_or_else(|| DomainError::NotFound("camera frame".into()))?;
    Ok(Json(json!({"printer_id": printer_id, "frame": frame, "status": snapshot.camera_status})))
}

#[derive(Debug, Deserialize)]
pub struct OfferRequest {
    pub sdp: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub printer_id: Option<String>,
}

pub async fn webrtc_offer(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OfferRequest>,
) -> DomainResult<Json<Value>> {
    let config = state.config.read().await;
    let printer_id = resolve_printer_id(&config, body.printer_id.clone())?;
    let printer = config
        .printers
        .iter()
        .find(|p| p.id == printer_id)
        .ok_or_else(|| DomainError::NotFound(format!("printer {printer_id}")))?;
    let external_url = printer
        .external_camera_url
        .clone()
        .ok_or_else(|| DomainError::BadRequest("printer has no external_camera_url configured".into()))?;
    let relay_log_output = config.app_settings.relay_log_output.clone();
    drop(config);

    let relay = state.relay.as_ref().ok_or_else(|| DomainError::ServiceUnavailable("webrtc relay is not configured".into()))?;
    let source = body.source.as_deref().unwrap_or("external");
    relay.ensure_started(&external_url, relay_log_output.as_deref()).await?;
    let answer_sdp = relay.offer(&body.sdp, source).await?;

    let session_id = state
        .webrtc
        .claim(&printer_id)
        .await
        .ok_or_else(|| DomainError::ServiceUnavailable("webrtc viewer capacity exceeded for this printer".into()))?;

    Ok(Json(json!({"sdp": answer_sdp, "session_id": session_id})))
}

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub session_id: String,
}

pub async fn webrtc_keepalive(State(state): State<Arc<AppState>>, Json(body): Json<SessionRequest>) -> DomainResult<Json<Value>> {
    let alive = state.webrtc.keepalive(&body.session_id).await;
    if !alive {
        return Err(DomainError::NotFound("webrtc session".into()));
    }
    Ok(Json(json!({"ok": true})))
}

pub async fn webrtc_release(State(state): State<Arc<AppState>>, Json(body): Json<SessionRequest>) -> Json<Value> {
    state.webrtc.release(&body.session_id).await;
    Json(json!({"ok": true}))
}
