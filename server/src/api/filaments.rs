//! Filament catalog, custom definitions, and capture candidates (§4.12, §6.1).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::resolve_printer_id;
use crate::errors::DomainResult;
use crate::AppState;

pub async fn catalog(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({"catalog": state.registry.filament.catalog()}))
}

pub async fn list_custom(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({"custom": state.registry.filament.custom().await}))
}

pub async fn add_custom(State(state): State<Arc<AppState>>, Json(entry): Json<Value>) -> DomainResult<Json<Value>> {
    state.registry.filament.add_custom(entry).await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct RemoveCustomQuery {
    pub tray_info_idx: String,
}

pub async fn remove_custom(State(state): State<Arc<AppState>>, Query(query): Query<RemoveCustomQuery>) -> DomainResult<Json<Value>> {
    state.registry.filament.remove_custom(&query.tray_info_idx).await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct CandidatesQuery {
    #[serde(default)]
    pub printer_id: Option<String>,
}

pub async fn candidates(State(state): State<Arc<AppState>>, Query(query): Query<CandidatesQuery>) -> DomainResult<Json<Value>> {
    let config = state.config.read().await;
    let printer_id = resolve_printer_id(&config, query.printer_id)?;
    drop(config);
    let candidates = state.registry.filament.candidates(&printer_id).await;
    Ok(Json(json!({"candidates": candidates})))
}
