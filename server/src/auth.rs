//! Admin/API authentication (§4.17, §6.4): bearer/API-key guard for the
//! JSON API, PBKDF2-HMAC-SHA256 password hashing for the admin login, and
//! a per-source-IP sliding window rate limiter for the login endpoint.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha2::Sha256;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::errors::DomainError;
use crate::AppState;

const PBKDF2_ITERATIONS: u32 = 200_000;
const SALT_BYTES: usize = 16;

/// Hash `password` into the `pbkdf2_sha256$<iters>$<salt>$<digest>` form.
pub fn hash_password(password: &str) -> String {
    let mut salt_bytes = [0u8; SALT_BYTES];
    rand::thread_rng().fill(&mut salt_bytes);
    let salt_hex: String = salt_bytes.iter().map(|b| format!("{b:02x}")).collect();
    encode_hash(password, &salt_hex, PBKDF2_ITERATIONS)
}

fn encode_hash(password: &str, salt_hex: &str, iterations: u32) -> String {
    let mut digest = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt_hex.as_bytes(), iterations, &mut digest);
    let digest_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
    format!("pbkdf2_sha256${iterations}${salt_hex}${digest_b64}")
}

/// Verify `password` against a stored `pbkdf2_sha256$...` hash, in constant
/// time over the digest comparison.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let parts: Vec<&str> = stored.split('$').collect();
    let [algo, iters, salt, _digest] = parts.as_slice() else {
        return false;
    };
    if *algo != "pbkdf2_sha256" {
        return false;
    }
    let Ok(iterations) = iters.parse::<u32>() else {
        return false;
    };
    let candidate = encode_hash(password, salt, iterations);
    constant_time_eq(candidate.as_bytes(), stored.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Sliding-window rate limiter: at most `limit` hits per `window` per key.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    hits: Mutex<HashMap<IpAddr, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn admin_default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }

    pub async fn check(&self, key: IpAddr) -> Result<(), DomainError> {
        let mut hits = self.hits.lock().await;
        let now = Instant::now();
        let entry = hits.entry(key).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);
        if entry.len() >= self.limit {
            return Err(DomainError::TooManyRequests);
        }
        entry.push(now);
        Ok(())
    }
}

/// Validate a bearer/`X-API-Key` header against `config.app_settings.api_token`.
/// Shared by [`require_api_token`] and the `/api/debug` session-cookie bypass,
/// which falls back to this check when no admin session is present.
pub fn check_bearer_or_api_key(config: &AppConfig, headers: &HeaderMap) -> Result<(), DomainError> {
    if !config.app_settings.auth_enabled {
        return Ok(());
    }
    let Some(expected) = config.app_settings.api_token.as_deref() else {
        return Ok(());
    };

    let header_token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()));

    match header_token {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => Ok(()),
        _ => Err(DomainError::Unauthorized),
    }
}

/// Bearer/`X-API-Key` guard applied to `/api/*` except the allowlisted
/// paths the router mounts outside this layer (health, admin, auth,
/// plate-preview, debug).
pub async fn require_api_token(
    State(state): State<std::sync::Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, DomainError> {
    let config = state.config.read().await;
    let verdict = check_bearer_or_api_key(&config, request.headers());
    drop(config);
    verdict?;
    Ok(next.run(request).await)
}

pub fn client_ip(connect_info: &ConnectInfo<std::net::SocketAddr>) -> IpAddr {
    connect_info.0.ip()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trips() {
        let hash = hash_password("correct horse battery staple");
        assert!(hash.starts_with("pbkdf2_sha256$200000$"));
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[tokio::test]
    async fn rate_limiter_blocks_after_limit() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(limiter.check(ip).await.is_ok());
        assert!(limiter.check(ip).await.is_ok());
        assert!(limiter.check(ip).await.is_err());
    }
}
