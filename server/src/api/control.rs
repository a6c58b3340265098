//! Control command endpoints (§4.13, §6.1): translate JSON request bodies
//! into command builders and publish over the active printer's MQTT
//! channel.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::resolve_printer_id;
use crate::errors::{DomainError, DomainResult};
use crate::services::control_commands::{self, FeatureKey};
use crate::AppState;

async fn mqtt_for(state: &AppState, printer_id: Option<String>) -> DomainResult<(String, Arc<crate::services::mqtt_service::MqttService>)> {
    let config = state.config.read().await;
    let printer_id = resolve_printer_id(&config, printer_id)?;
    drop(config);
    let mqtt = state
        .registry
        .connections
        .mqtt_for(&printer_id)
        .await
        .ok_or_else(|| DomainError::ServiceUnavailable("MQTT channel is not connected".into()))?;
    Ok((printer_id, mqtt))
}

#[derive(Debug, Deserialize)]
pub struct PrinterScoped {
    #[serde(default)]
    pub printer_id: Option<String>,
}

pub async fn pushall(State(state): State<Arc<AppState>>, Json(body): Json<PrinterScoped>) -> DomainResult<Json<Value>> {
    let (_, mqtt) = mqtt_for(&state, body.printer_id).await?;
    mqtt.send_command(control_commands::pushall()).await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    #[serde(default)]
    pub printer_id: Option<String>,
    pub payload: Value,
}

pub async fn command(State(state): State<Arc<AppState>>, Json(body): Json<CommandRequest>) -> DomainResult<Json<Value>> {
    let (_, mqtt) = mqtt_for(&state, body.printer_id).await?;
    mqtt.send_command(body.payload).await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct ChamberLightRequest {
    #[serde(default)]
    pub printer_id: Option<String>,
    pub on: bool,
}

pub async fn chamber_light(State(state): State<Arc<AppState>>, Json(body): Json<ChamberLightRequest>) -> DomainResult<Json<Value>> {
    let (_, mqtt) = mqtt_for(&state, body.printer_id).await?;
    mqtt.send_command(control_commands::chamber_light(body.on)).await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct AmsFilamentRequest {
    #[serde(default)]
    pub printer_id: Option<String>,
    pub slot: Option<i32>,
}

pub async fn ams_filament(State(state): State<Arc<AppState>>, Json(body): Json<AmsFilamentRequest>) -> DomainResult<Json<Value>> {
    let (_, mqtt) = mqtt_for(&state, body.printer_id).await?;
    mqtt.send_command(control_commands::ams_change_filament(body.slot)).await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct AmsMaterialRequest {
    #[serde(default)]
    pub printer_id: Option<String>,
    pub tray_info_idx: String,
    pub tray_type: String,
    pub color: String,
    pub nozzle_diameter: f64,
}

/// `ams_material`: publishes `ams_filament_setting` then `extrusion_cali_sel`
/// in order on the same MQTT session (§5 Ordering).
pub async fn ams_material(State(state): State<Arc<AppState>>, Json(body): Json<AmsMaterialRequest>) -> DomainResult<Json<Value>> {
    let (setting, cali_sel) =
        control_commands::ams_filament_setting(&body.tray_info_idx, &body.tray_type, &body.color, body.nozzle_diameter)?;
    let (_, mqtt) = mqtt_for(&state, body.printer_id).await?;
    mqtt.send_command(setting).await?;
    mqtt.send_command(cali_sel).await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct FeatureToggleRequest {
    #[serde(default)]
    pub printer_id: Option<String>,
    pub key: String,
    pub enabled: bool,
}

pub async fn feature_toggle(State(state): State<Arc<AppState>>, Json(body): Json<FeatureToggleRequest>) -> DomainResult<Json<Value>> {
    let key = FeatureKey::parse(&body.key)?;
    let (_, mqtt) = mqtt_for(&state, body.printer_id).await?;
    mqtt.send_command(control_commands::feature_toggle(key, body.enabled)).await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct NozzleAccessoryRequest {
    #[serde(default)]
    pub printer_id: Option<String>,
    pub nozzle_type: String,
    pub nozzle_diameter: String,
}

pub async fn nozzle_accessory(State(state): State<Arc<AppState>>, Json(body): Json<NozzleAccessoryRequest>) -> DomainResult<Json<Value>> {
    let (_, mqtt) = mqtt_for(&state, body.printer_id).await?;
    mqtt.send_command(control_commands::nozzle_accessory(&body.nozzle_type, &body.nozzle_diameter)).await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct SkipObjectsRequest {
    #[serde(default)]
    pub printer_id: Option<String>,
    pub object_ids: Vec<i64>,
}

pub async fn skip_objects(State(state): State<Arc<AppState>>, Json(body): Json<SkipObjectsRequest>) -> DomainResult<Json<Value>> {
    let config = state.config.read().await;
    let printer_id = resolve_printer_id(&config, body.printer_id.clone())?;
    drop(config);

    let job = state.registry.print_jobs.status(&printer_id).await;
    let active_plate = job
        .metadata_result
        .as_ref()
        .and_then(|metadata| metadata.plates.iter().find(|plate| plate.skip.available))
        .ok_or_else(|| DomainError::BadRequest("Print cache missing or does not match the active file".into()))?;

    let snapshot = state.registry.state.repository().get_state(&printer_id).await;
    let already_skipped = snapshot.print.skipped_objects.clone();
    let total_objects = active_plate.objects.len();
    let payload = control_commands::skip_objects(&already_skipped, &body.object_ids, total_objects)?;

    let mqtt = state
        .registry
        .connections
        .mqtt_for(&printer_id)
        .await
        .ok_or_else(|| DomainError::ServiceUnavailable("MQTT channel is not connected".into()))?;
    mqtt.send_command(payload).await?;
    Ok(Json(json!({"ok": true})))
}
