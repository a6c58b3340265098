//! Camera Service (§4.1, §4.9, C11): internal MJPEG decode loop feeding the
//! latest frame into the state snapshot, the external WebRTC relay process
//! lifecycle, and the WebRTC viewer session manager (§3.1 invariant 6).

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::errors::{DomainError, DomainResult};
use crate::models::CameraStatus;
use crate::state::StateOrchestrator;
use crate::wire::camera::{should_keep_frame, CameraWireClient};

/// Owns the internal decode loop for one printer's camera stream.
pub struct CameraService {
    printer_id: String,
    host: String,
    access_code: String,
    cam_interval: Duration,
    orchestrator: Arc<StateOrchestrator>,
    reconnect_paused: AtomicBool,
    shutdown: AtomicBool,
}

impl CameraService {
    pub fn new(
        printer_id: String,
        host: String,
        access_code: String,
        cam_interval: Duration,
        orchestrator: Arc<StateOrchestrator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            printer_id,
            host,
            access_code,
            cam_interval,
            orchestrator,
            reconnect_paused: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn set_reconnect_paused(&self, paused: bool) {
        self.reconnect_paused.store(paused, Ordering::SeqCst);
        if paused {
            let orchestrator = self.orchestrator.clone();
            let printer_id = self.printer_id.clone();
            tokio::spawn(async move {
                orchestrator.set_camera_status(&printer_id, CameraStatus::Paused, None).await;
            });
        }
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = Backoff::default_connection();
            while !self.shutdown.load(Ordering::SeqCst) {
                if self.reconnect_paused.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }

                self.orchestrator.set_camera_status(&self.printer_id, CameraStatus::Connecting, None).await;
                match CameraWireClient::connect(&self.host, &self.access_code).await {
                    Ok(client) => {
                        backoff.reset();
                        if let Err(e) = self.stream_frames(client).await {
                            warn!(printer_id = %self.printer_id, error = %e, "camera stream ended");
                        }
                    }
                    Err(e) => {
                        warn!(printer_id = %self.printer_id, error = %e, "camera connect failed");
                    }
                }
                if self.shutdown.load(Ordering::SeqCst) || self.reconnect_paused.load(Ordering::SeqCst) {
                    continue;
                }
                self.orchestrator
                    .set_camera_status(&self.printer_id, CameraStatus::Reconnecting, Some("transport error".into()))
                    .await;
                tokio::time::sleep(backoff.next_delay()).await;
            }
            self.orchestrator.set_camera_status(&self.printer_id, CameraStatus::Stopped, None).await;
        })
    }

    async fn stream_frames(&self, mut client: CameraWireClient) -> DomainResult<()> {
        let mut last_kept: Option<Instant> = None;
        loop {
            if self.shutdown.load(Ordering::SeqCst) || self.reconnect_paused.load(Ordering::SeqCst) {
                return Ok(());
            }
            match client.next_frame().await {
                Ok(Some(frame)) => {
                    let now = Instant::now();
                    if !should_keep_frame(last_kept, now, self.cam_interval) {
                        continue;
                    }
                    last_kept = Some(now);
                    self.orchestrator.set_camera_status(&self.printer_id, CameraStatus::Streaming, None).await;
                    self.orchestrator.update_camera_frame(&self.printer_id, BASE64.encode(&frame)).await;
                }
                Ok(None) => {
                    self.orchestrator
                        .set_camera_status(&self.printer_id, CameraStatus::StallWarning, Some("no frame bytes".into()))
                        .await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// WebRTC viewer session registry (§3.1 invariant 6): a TTL-pruned,
/// per-printer-capped map of opaque session ids to their last keepalive.
pub struct WebRtcSessionManager {
    ttl: Duration,
    max_viewers: usize,
    sessions: Mutex<HashMap<String, (String, Instant)>>,
}

impl WebRtcSessionManager {
    pub fn new(ttl: Duration, max_viewers: usize) -> Self {
        Self { ttl, max_viewers, sessions: Mutex::new(HashMap::new()) }
    }

    /// Prune expired sessions, then mint a new one for `printer_id` unless
    /// doing so would exceed the per-printer viewer cap.
    pub async fn claim(&self, printer_id: &str) -> Option<String> {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        sessions.retain(|_, (_, last)| now.duration_since(*last) < self.ttl);

        let live_for_printer = sessions.values().filter(|(pid, _)| pid == printer_id).count();
        if live_for_printer >= self.max_viewers {
            return None;
        }

        let id = Uuid::new_v4().to_string();
        sessions.insert(id.clone(), (printer_id.to_string(), now));
        Some(id)
    }

    pub async fn keepalive(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(session_id) {
            Some((_, last)) => {
                *last = Instant::now();
                true
            }
            None => false,
        }
    }

    pub async fn release(&self, session_id: &str) {
        self.sessions.lock().await.remove(session_id);
    }
}

/// Supervises the external relay binary: writes its YAML config, spawns the
/// process, and forwards WebRTC offer/answer exchanges to its local API.
pub struct RelayProcess {
    relay_path: String,
    config_path: PathBuf,
    relay_port: u16,
    child: Mutex<Option<Child>>,
    http: reqwest::Client,
}

impl RelayProcess {
    pub fn new(relay_path: String, config_path: PathBuf, relay_port: u16) -> Self {
        Self {
            relay_path,
            config_path,
            relay_port,
            child: Mutex::new(None),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(8))
                .build()
                .expect("reqwest client config is valid"),
        }
    }

    pub async fn ensure_started(&self, external_url: &str, log_output: Option<&str>) -> DomainResult<()> {
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                return Ok(());
            }
        }

        let config = format!(
            "api:\n  listen: 127.0.0.1:{port}\nrtsp:\n  listen: 127.0.0.1:8554\nstreams:\n  external: {url}\n",
            port = self.relay_port,
            url = external_url
        );
        tokio::fs::write(&self.config_path, config)
            .await
            .map_err(|e| DomainError::Internal(format!("failed to write relay config: {e}")))?;

        let mut command = Command::new(&self.relay_path);
        command.arg("-config").arg(&self.config_path).stdin(Stdio::null());
        if let Some(path) = log_output {
            let file = std::fs::File::create(path)
                .map_err(|e| DomainError::Internal(format!("failed to open relay log {path}: {e}")))?;
            command.stdout(Stdio::from(file.try_clone().map_err(|e| DomainError::Internal(e.to_string()))?));
            command.stderr(Stdio::from(file));
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let child = command.spawn().map_err(|e| DomainError::Internal(format!("failed to spawn relay: {e}")))?;
        info!(relay_port = self.relay_port, "webrtc relay started");
        *guard = Some(child);
        Ok(())
    }

    pub async fn offer(&self, sdp: &str, source: &str) -> DomainResult<String> {
        let url = format!("http://127.0.0.1:{}/api/webrtc?src={}", self.relay_port, source);
        let response = self
            .http
            .post(&url)
            .header("content-type", "text/plain")
            .body(sdp.to_string())
            .send()
            .await
            .map_err(|e| DomainError::BadGateway(format!("relay offer request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(DomainError::BadGateway(format!("relay returned {}", response.status())));
        }
        response.text().await.map_err(|e| DomainError::BadGateway(format!("failed to read relay answer: {e}")))
    }

    pub async fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_respects_viewer_cap_and_ttl() {
        let manager = WebRtcSessionManager::new(Duration::from_millis(50), 2);
        let a = manager.claim("printer-1").await;
        let b = manager.claim("printer-1").await;
        let c = manager.claim("printer-1").await;
        assert!(a.is_some() && b.is_some());
        assert!(c.is_none());

        tokio::time::sleep(Duration::from_millis(80)).await;
        let d = manager.claim("printer-1").await;
        assert!(d.is_some());
    }

    #[tokio::test]
    async fn release_frees_a_slot() {
        let manager = WebRtcSessionManager::new(Duration::from_secs(45), 1);
        let a = manager.claim("printer-1").await.unwrap();
        assert!(manager.claim("printer-1").await.is_none());
        manager.release(&a).await;
        assert!(manager.claim("printer-1").await.is_some());
    }

    #[tokio::test]
    async fn keepalive_extends_session_lifetime() {
        let manager = WebRtcSessionManager::new(Duration::from_millis(60), 1);
        let id = manager.claim("printer-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(manager.keepalive(&id).await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(manager.keepalive(&id).await);
    }
}
