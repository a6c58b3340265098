//! HTTP API (§6.1): one module per resource group, assembled into a single
//! router in [`router`]. Every handler is a thin translation from
//! axum extractors to a service call and a `DomainResult` response; no
//! business logic lives here.

pub mod admin;
pub mod camera;
pub mod control;
pub mod events;
pub mod filaments;
pub mod files;
pub mod printjob;
pub mod status;
pub mod stream;

use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::config::AppConfig;
use crate::errors::{DomainError, DomainResult};
use crate::AppState;

/// Resolve the effective printer id for a request: the explicit
/// `?printer_id=` query parameter, falling back to `settings.default_printer_id`.
pub fn resolve_printer_id(config: &AppConfig, printer_id: Option<String>) -> DomainResult<String> {
    printer_id
        .or_else(|| config.settings.default_printer_id.clone())
        .ok_or_else(|| DomainError::NotFound("no active printer configured".into()))
}

/// Routes that sit behind [`crate::auth::require_api_token`] (§4.17, §6.1).
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(status::get_status))
        .route("/status/printers", get(status::list_printers).post(status::create_printer))
        .route("/status/printers/{id}", put(status::update_printer).delete(status::delete_printer))
        .route("/status/printers/{id}/verify", post(status::verify_printer))
        .route("/status/printers/{id}/default", put(status::set_default_printer))
        .route("/state/stream", get(stream::state_stream))
        .route("/camera", get(camera::latest_frame))
        .route("/camera/webrtc/offer", post(camera::webrtc_offer))
        .route("/camera/webrtc/keepalive", post(camera::webrtc_keepalive))
        .route("/camera/webrtc/release", post(camera::webrtc_release))
        .route("/control/pushall", post(control::pushall))
        .route("/control/command", post(control::command))
        .route("/control/chamber-light", post(control::chamber_light))
        .route("/control/ams/filament", post(control::ams_filament))
        .route("/control/ams/material", post(control::ams_material))
        .route("/control/features/toggle", post(control::feature_toggle))
        .route("/control/accessories/nozzle", post(control::nozzle_accessory))
        .route("/control/skip-objects", post(control::skip_objects))
        .route("/ftps/files", get(files::list))
        .route("/files/download", get(files::download))
        .route("/files/create-folder", post(files::create_folder))
        .route("/files/rename", post(files::rename))
        .route("/files/upload", post(files::upload))
        .route("/files/delete", delete(files::delete))
        .route("/files/upload/status", get(files::upload_status))
        .route("/files/upload/cancel", post(files::upload_cancel))
        .route("/printjob/prepare", post(printjob::prepare))
        .route("/printjob/cancel", post(printjob::cancel))
        .route("/printjob/execute", post(printjob::execute))
        .route("/printjob/status", get(printjob::status))
        .route("/printjob/skip-metadata", get(printjob::skip_metadata))
        .route("/events", get(events::list_events).delete(events::clear_events))
        .route("/metrics", get(events::metrics))
        .route("/filaments/catalog", get(filaments::catalog))
        .route("/filaments/custom", get(filaments::list_custom).post(filaments::add_custom).delete(filaments::remove_custom))
        .route("/filaments/custom/candidates", get(filaments::candidates))
}

/// Routes allowlisted past the bearer-auth middleware (§6.1): health,
/// the admin/login surface (which gates itself on the admin session
/// cookie), the plate preview image embedded in `<img src>` tags, and
/// `/debug` (which performs its own bearer-or-session check so an admin
/// session cookie alone is enough to reach it).
pub fn public_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(events::health))
        .route("/printjob/plate-preview", get(printjob::plate_preview))
        .merge(admin::router())
}
