//! Admin & auth endpoints (§4.17, §6.1): session login, admin token
//! rotation, allowlist edits, password hash management, and print-cache
//! stats/pruning. Mounted outside the bearer-auth middleware — every
//! handler here (other than `login`) instead requires the `admin_logged_in`
//! session cookie set by a successful login.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::extract::{ConnectInfo, Json, Query, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::info;

use crate::api::status::PrinterIdQuery;
use crate::auth::{check_bearer_or_api_key, hash_password, verify_password};
use crate::errors::{DomainError, DomainResult};
use crate::AppState;

const SESSION_COOKIE: &str = "admin_logged_in";
const SESSION_MAX_AGE_S: u64 = 12 * 3600;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/admin/token/rotate", post(rotate_admin_token))
        .route("/admin/allowlist", put(set_allowlist))
        .route("/admin/password", post(set_password))
        .route("/admin/password/verify", post(verify_password_handler))
        .route("/admin/cache/stats", get(cache_stats))
        .route("/admin/cache/clean", post(cache_clean))
        .route("/debug", get(debug_dump))
}

fn sign_session(secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(SESSION_COOKIE.as_bytes());
    let bytes = mac.finalize().into_bytes();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn session_cookie_value(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

/// Require a valid `admin_logged_in` session cookie, constant-time compared
/// against the signature derived from `session_secret`.
async fn require_admin_session(state: &AppState, headers: &HeaderMap) -> DomainResult<()> {
    let config = state.config.read().await;
    let secret = config.app_settings.session_secret.clone().ok_or_else(|| DomainError::Internal("session_secret missing".into()))?;
    drop(config);
    let expected = sign_session(&secret);
    let provided = session_cookie_value(headers).ok_or(DomainError::Unauthorized)?;
    if provided.len() != expected.len() || provided.bytes().zip(expected.bytes()).fold(0u8, |acc, (a, b)| acc | (a ^ b)) != 0 {
        return Err(DomainError::Unauthorized);
    }
    Ok(())
}

/// Dump the raw, unassembled MQTT master document for a printer (§6.1).
/// Mounted outside `require_api_token` so an authenticated admin session can
/// reach it without also carrying the API bearer token, but still requires
/// one or the other.
pub async fn debug_dump(State(state): State<Arc<AppState>>, headers: HeaderMap, Query(query): Query<PrinterIdQuery>) -> DomainResult<Json<Value>> {
    if require_admin_session(&state, &headers).await.is_err() {
        let config = state.config.read().await;
        check_bearer_or_api_key(&config, &headers)?;
    }
    let config = state.config.read().await;
    let printer_id = crate::api::resolve_printer_id(&config, query.printer_id.clone())?;
    drop(config);
    let raw_master = state.registry.state.repository().get_master(&printer_id).await;
    Ok(Json(json!({"printer_id": printer_id, "raw_master": raw_master})))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<LoginRequest>,
) -> DomainResult<Response> {
    state.rate_limiter.check(addr.ip()).await?;

    let config = state.config.read().await;
    let stored_hash = config.app_settings.admin_password_hash.clone();
    let secret = config.app_settings.session_secret.clone().ok_or_else(|| DomainError::Internal("session_secret missing".into()))?;
    drop(config);

    let Some(stored_hash) = stored_hash else {
        return Err(DomainError::Conflict("no admin password has been set".into()));
    };
    if !verify_password(&body.password, &stored_hash) {
        return Err(DomainError::Unauthorized);
    }

    let cookie = format!(
        "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={SESSION_MAX_AGE_S}",
        sign_session(&secret)
    );
    Ok(([(SET_COOKIE, cookie)], Json(json!({"ok": true}))).into_response())
}

pub async fn rotate_admin_token(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> DomainResult<Json<Value>> {
    require_admin_session(&state, &headers).await?;
    let new_token = generate_token();
    {
        let mut config = state.config.write().await;
        config.app_settings.admin_token = Some(new_token.clone());
        config.save(&state.config_path).await?;
    }
    info!(source_ip = %addr.ip(), "admin token rotated");
    Ok(Json(json!({"admin_token": new_token})))
}

#[derive(Debug, Deserialize)]
pub struct AllowlistRequest {
    pub allowlist: Vec<String>,
}

pub async fn set_allowlist(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<AllowlistRequest>,
) -> DomainResult<Json<Value>> {
    require_admin_session(&state, &headers).await?;
    {
        let mut config = state.config.write().await;
        config.app_settings.admin_allowlist = body.allowlist.clone();
        config.save(&state.config_path).await?;
    }
    info!(source_ip = %addr.ip(), allowlist = ?body.allowlist, "admin allowlist updated");
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct SetPasswordRequest {
    pub password: String,
}

pub async fn set_password(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SetPasswordRequest>,
) -> DomainResult<Json<Value>> {
    // Bootstrapping the first password has no session to present yet: only
    // require one once a hash is already on file.
    let has_existing = state.config.read().await.app_settings.admin_password_hash.is_some();
    if has_existing {
        require_admin_session(&state, &headers).await?;
    }
    let mut config = state.config.write().await;
    config.app_settings.admin_password_hash = Some(hash_password(&body.password));
    config.save(&state.config_path).await?;
    Ok(Json(json!({"ok": true})))
}

pub async fn verify_password_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SetPasswordRequest>,
) -> DomainResult<Json<Value>> {
    require_admin_session(&state, &headers).await?;
    let config = state.config.read().await;
    let ok = config.app_settings.admin_password_hash.as_deref().map(|h| verify_password(&body.password, h)).unwrap_or(false);
    Ok(Json(json!({"ok": ok})))
}

fn generate_token() -> String {
    use rand::Rng;
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Default, serde::Serialize)]
struct CacheStats {
    size_bytes: u64,
    file_count: u64,
    folder_count: u64,
}

pub async fn cache_stats(State(state): State<Arc<AppState>>, headers: HeaderMap) -> DomainResult<Json<Value>> {
    require_admin_session(&state, &headers).await?;
    let stats = walk_cache_stats(&state.cache_dir).await?;
    Ok(Json(json!(stats)))
}

async fn walk_cache_stats(dir: &Path) -> DomainResult<CacheStats> {
    let mut stats = CacheStats::default();
    walk_cache_stats_into(dir, &mut stats).await?;
    Ok(stats)
}

fn walk_cache_stats_into<'a>(dir: &'a Path, stats: &'a mut CacheStats) -> std::pin::Pin<Box<dyn std::future::Future<Output = DomainResult<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(DomainError::Internal(format!("failed to read {}: {e}", dir.display()))),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| DomainError::Internal(e.to_string()))? {
            let metadata = entry.metadata().await.map_err(|e| DomainError::Internal(e.to_string()))?;
            if metadata.is_dir() {
                stats.folder_count += 1;
                walk_cache_stats_into(&entry.path(), stats).await?;
            } else {
                stats.file_count += 1;
                stats.size_bytes += metadata.len();
            }
        }
        Ok(())
    })
}

#[derive(Debug, Deserialize)]
pub struct CleanRequest {
    #[serde(default = "default_clean_days")]
    pub days: u64,
}

fn default_clean_days() -> u64 {
    30
}

/// Prune cached `.3mf` bundles (plus their `.meta.json` sibling and
/// extracted directory) older than `days`, across every printer's cache
/// subdirectory.
pub async fn cache_clean(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(body): Json<CleanRequest>) -> DomainResult<Json<Value>> {
    require_admin_session(&state, &headers).await?;
    let cutoff = SystemTime::now().checked_sub(Duration::from_secs(body.days * 86_400)).unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = Vec::new();

    let mut printer_dirs = match tokio::fs::read_dir(&state.cache_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Json(json!({"removed": removed}))),
        Err(e) => return Err(DomainError::Internal(e.to_string())),
    };

    while let Some(printer_dir) = printer_dirs.next_entry().await.map_err(|e| DomainError::Internal(e.to_string()))? {
        if !printer_dir.metadata().await.map_err(|e| DomainError::Internal(e.to_string()))?.is_dir() {
            continue;
        }
        let mut files = tokio::fs::read_dir(printer_dir.path()).await.map_err(|e| DomainError::Internal(e.to_string()))?;
        while let Some(file) = files.next_entry().await.map_err(|e| DomainError::Internal(e.to_string()))? {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("3mf") {
                continue;
            }
            let metadata = file.metadata().await.map_err(|e| DomainError::Internal(e.to_string()))?;
            let modified = metadata.modified().unwrap_or(SystemTime::now());
            if modified >= cutoff {
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
            let meta_path = path.with_file_name(format!("{stem}.meta.json"));
            let extract_dir = path.with_file_name(&stem);
            tokio::fs::remove_file(&path).await.ok();
            tokio::fs::remove_file(&meta_path).await.ok();
            tokio::fs::remove_dir_all(&extract_dir).await.ok();
            removed.push(path.display().to_string());
        }
    }

    info!(count = removed.len(), days = body.days, "print cache pruned");
    Ok(Json(json!({"removed": removed})))
}
