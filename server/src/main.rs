mod api;
mod auth;
mod backoff;
mod config;
mod errors;
mod hms;
#[cfg(test)]
mod integration_tests;
mod merge;
mod metrics;
mod models;
mod services;
mod state;
mod wire;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::middleware;
use axum::Router;
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::RateLimiter;
use crate::config::{AppConfig, Config};
use crate::metrics::MetricsRegistry;
use crate::services::camera_service::{RelayProcess, WebRtcSessionManager};
use crate::services::registry::ServiceRegistry;
use crate::state::{Notifier, StateOrchestrator, StateRepository};

const WEBRTC_VIEWER_CAP: usize = 2;
const WEBRTC_SESSION_TTL: Duration = Duration::from_secs(45);

/// Shared application state (§4.16-4.19). `config` is the single mutable
/// source of truth for `app.json`; everything downstream of it is
/// reconciled through [`ServiceRegistry::reconcile`] whenever it changes.
pub struct AppState {
    pub config: RwLock<AppConfig>,
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub registry: Arc<ServiceRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub webrtc: Arc<WebRtcSessionManager>,
    pub relay: Option<Arc<RelayProcess>>,
    pub metrics: Arc<MetricsRegistry>,
    pub started_at: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "bambu_sentinel_server=info,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let env_config = Config::from_env();
    let config = AppConfig::load(&env_config.config_path).await?;

    let notifier = Arc::new(Notifier::new());
    let repository = Arc::new(StateRepository::new());
    let state_orchestrator = Arc::new(StateOrchestrator::new(repository, notifier.clone(), env_config.data_dir.clone()));

    let registry = ServiceRegistry::build(
        state_orchestrator,
        &notifier,
        &env_config.data_dir,
        env_config.cache_dir.clone(),
        config.app_settings.cam_interval,
    )
    .await?;
    registry.reconcile(&config).await;
    registry.spawn_background_tasks();

    let relay = match (&config.app_settings.relay_path, config.app_settings.relay_port) {
        (Some(path), Some(port)) => {
            let relay_config_path = env_config.data_dir.join("relay.yaml");
            Some(Arc::new(RelayProcess::new(path.clone(), relay_config_path, port)))
        }
        _ => None,
    };

    let state = Arc::new(AppState {
        config: RwLock::new(config),
        config_path: env_config.config_path.clone(),
        data_dir: env_config.data_dir.clone(),
        cache_dir: env_config.cache_dir.clone(),
        registry,
        rate_limiter: Arc::new(RateLimiter::admin_default()),
        webrtc: Arc::new(WebRtcSessionManager::new(WEBRTC_SESSION_TTL, WEBRTC_VIEWER_CAP)),
        relay,
        metrics: Arc::new(MetricsRegistry::new()),
        started_at: Instant::now(),
    });

    let protected = api::router().route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_token));
    let api_router = protected.merge(api::public_router());

    let app = Router::new()
        .nest("/api", api_router)
        .fallback_service(ServeDir::new(&env_config.static_dir))
        .layer(middleware::from_fn_with_state(state.clone(), metrics::track_metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&env_config.bind_address).await?;
    tracing::info!(addr = %env_config.bind_address, "bambu-sentinel server listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
