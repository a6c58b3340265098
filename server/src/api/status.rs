//! `GET /api/status` and printer CRUD (§6.1, §4.16).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::resolve_printer_id;
use crate::errors::{DomainError, DomainResult};
use crate::models::PrinterDefinition;
use crate::wire::ftps::FtpsWireClient;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PrinterIdQuery {
    pub printer_id: Option<String>,
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PrinterIdQuery>,
) -> DomainResult<Json<Value>> {
    let config = state.config.read().await;
    let printer_id = resolve_printer_id(&config, query.printer_id)?;
    drop(config);
    let snapshot = state.registry.state.repository().get_state(&printer_id).await;
    Ok(Json(json!({"printer_id": printer_id, "state": snapshot})))
}

pub async fn list_printers(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = state.config.read().await;
    Json(json!({"printers": config.printers, "default_printer_id": config.settings.default_printer_id}))
}

pub async fn create_printer(
    State(state): State<Arc<AppState>>,
    Json(printer): Json<PrinterDefinition>,
) -> DomainResult<Json<PrinterDefinition>> {
    let mut config = state.config.write().await;
    if config.printers.iter().any(|p| p.id == printer.id) {
        return Err(DomainError::Conflict(format!("printer {} already exists", printer.id)));
    }
    config.printers.push(printer.clone());
    if config.settings.default_printer_id.is_none() {
        config.settings.default_printer_id = Some(printer.id.clone());
    }
    config.save(&state.config_path).await?;
    state.registry.reconcile(&config).await;
    Ok(Json(printer))
}

pub async fn update_printer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<PrinterDefinition>,
) -> DomainResult<Json<PrinterDefinition>> {
    let mut config = state.config.write().await;
    let entry = config
        .printers
        .iter_mut()
        .find(|p| p.id == id)
        .ok_or_else(|| DomainError::NotFound(format!("printer {id}")))?;
    *entry = PrinterDefinition { id: id.clone(), ..update };
    let saved = entry.clone();
    config.save(&state.config_path).await?;
    state.registry.reconcile(&config).await;
    Ok(Json(saved))
}

pub async fn delete_printer(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> DomainResult<()> {
    let mut config = state.config.write().await;
    config.remove_printer(&id)?;
    config.save(&state.config_path).await?;
    state.registry.reconcile(&config).await;
    state.registry.state.repository().reset(&id).await;
    Ok(())
}

pub async fn set_default_printer(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> DomainResult<()> {
    let mut config = state.config.write().await;
    if !config.printers.iter().any(|p| p.id == id) {
        return Err(DomainError::NotFound(format!("printer {id}")));
    }
    config.settings.default_printer_id = Some(id);
    config.save(&state.config_path).await?;
    state.registry.reconcile(&config).await;
    Ok(())
}

/// Open a short-lived FTPS session against the printer's credentials to
/// confirm they're reachable, without disturbing the active connection.
pub async fn verify_printer(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> DomainResult<Json<Value>> {
    let config = state.config.read().await;
    let printer = config.printers.iter().find(|p| p.id == id).ok_or_else(|| DomainError::NotFound(format!("printer {id}")))?;
    let host = printer.printer_ip.clone();
    let access_code = printer.access_code.clone();
    drop(config);

    match FtpsWireClient::connect(&host, "bblp", &access_code).await {
        Ok(_) => Ok(Json(json!({"ok": true}))),
        Err(e) => Ok(Json(json!({"ok": false, "error": e.to_string()}))),
    }
}
