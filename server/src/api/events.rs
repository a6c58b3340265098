//! Event feed, metrics, and liveness endpoints (§4.7, §4.19, §6.1).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    #[serde(default)]
    pub printer_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn list_events(State(state): State<Arc<AppState>>, Query(query): Query<ListEventsQuery>) -> Json<Value> {
    let events = state.registry.events.list_events(query.printer_id.as_deref(), query.limit).await;
    Json(json!({"events": events}))
}

#[derive(Debug, Deserialize)]
pub struct ClearEventsQuery {
    #[serde(default)]
    pub printer_id: Option<String>,
}

pub async fn clear_events(State(state): State<Arc<AppState>>, Query(query): Query<ClearEventsQuery>) -> Json<Value> {
    state.registry.events.clear_events(query.printer_id.as_deref()).await;
    Json(json!({"ok": true}))
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({"paths": state.metrics.summary().await}))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_s": state.started_at.elapsed().as_secs(),
        "printers": state.registry.state.repository().known_printer_ids().await,
    }))
}
