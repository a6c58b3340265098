//! HTTP surface integration tests (§4.19): drive the same `Router` `main`
//! assembles through `tower::ServiceExt::oneshot`, against a freshly built
//! service registry backed by a scratch directory instead of a real printer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use tokio::sync::RwLock;
use tower::ServiceExt;

use crate::auth::RateLimiter;
use crate::config::AppConfig;
use crate::metrics::MetricsRegistry;
use crate::services::camera_service::WebRtcSessionManager;
use crate::services::registry::ServiceRegistry;
use crate::state::{Notifier, StateOrchestrator, StateRepository};
use crate::AppState;

async fn test_app() -> (Router, std::path::PathBuf) {
    let dir = std::env::temp_dir().join(format!("bambu-sentinel-api-test-{}", uuid::Uuid::new_v4()));
    let data_dir = dir.join("data");
    let cache_dir = dir.join("cache");
    tokio::fs::create_dir_all(&data_dir).await.unwrap();

    let config = AppConfig::load(&dir.join("app.json")).await.unwrap();

    let notifier = Arc::new(Notifier::new());
    let repository = Arc::new(StateRepository::new());
    let orchestrator = Arc::new(StateOrchestrator::new(repository, notifier.clone(), data_dir.clone()));
    let registry = ServiceRegistry::build(orchestrator, &notifier, &data_dir, cache_dir.clone(), config.app_settings.cam_interval)
        .await
        .unwrap();
    registry.reconcile(&config).await;

    let state = Arc::new(AppState {
        config: RwLock::new(config),
        config_path: dir.join("app.json"),
        data_dir,
        cache_dir,
        registry,
        rate_limiter: Arc::new(RateLimiter::admin_default()),
        webrtc: Arc::new(WebRtcSessionManager::new(std::time::Duration::from_secs(45), 2)),
        relay: None,
        metrics: Arc::new(MetricsRegistry::new()),
        started_at: Instant::now(),
    });

    let app = Router::new().nest("/api", crate::api::router().merge(crate::api::public_router())).with_state(state);
    (app, dir)
}

fn with_fake_peer(mut req: Request<Body>) -> Request<Body> {
    req.extensions_mut().insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4242))));
    req
}

#[tokio::test]
async fn health_reports_ok_with_no_known_printers() {
    let (app, dir) = test_app().await;
    let response = app.oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["printers"].as_array().unwrap().len(), 0);
    tokio::fs::remove_dir_all(dir).await.ok();
}

#[tokio::test]
async fn listing_printers_returns_an_empty_set() {
    let (app, dir) = test_app().await;
    let response = app.oneshot(Request::builder().uri("/api/status/printers").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["printers"].as_array().unwrap().len(), 0);
    tokio::fs::remove_dir_all(dir).await.ok();
}

#[tokio::test]
async fn status_with_no_configured_default_printer_is_not_found() {
    let (app, dir) = test_app().await;
    let response = app.oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    tokio::fs::remove_dir_all(dir).await.ok();
}

#[tokio::test]
async fn filament_catalog_loads_empty_without_a_data_file() {
    let (app, dir) = test_app().await;
    let response = app.oneshot(Request::builder().uri("/api/filaments/catalog").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["catalog"].as_array().unwrap().is_empty());
    tokio::fs::remove_dir_all(dir).await.ok();
}

#[tokio::test]
async fn login_before_a_password_is_set_is_a_conflict() {
    let (app, dir) = test_app().await;
    let req = with_fake_peer(
        Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::json!({"password": "whatever"}).to_string()))
            .unwrap(),
    );
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    tokio::fs::remove_dir_all(dir).await.ok();
}

#[tokio::test]
async fn admin_routes_reject_a_missing_session_cookie() {
    let (app, dir) = test_app().await;
    let req = with_fake_peer(Request::builder().method("POST").uri("/api/admin/token/rotate").body(Body::empty()).unwrap());
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    tokio::fs::remove_dir_all(dir).await.ok();
}

#[tokio::test]
async fn debug_dump_rejects_requests_without_any_credential() {
    let (app, dir) = test_app().await;
    let response = app.oneshot(Request::builder().uri("/api/debug?printer_id=p1").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    tokio::fs::remove_dir_all(dir).await.ok();
}

#[tokio::test]
async fn skip_objects_without_a_cached_plate_is_a_bad_request() {
    let (app, dir) = test_app().await;
    let req = Request::builder()
        .method("POST")
        .uri("/api/control/skip-objects")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::json!({"printer_id": "p1", "object_ids": [1]}).to_string()))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["detail"], "Print cache missing or does not match the active file");
    tokio::fs::remove_dir_all(dir).await.ok();
}

#[tokio::test]
async fn unknown_plate_preview_is_not_found() {
    let (app, dir) = test_app().await;
    let response = app
        .oneshot(Request::builder().uri("/api/printjob/plate-preview?printer_id=p1&plate=plate_1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    tokio::fs::remove_dir_all(dir).await.ok();
}
