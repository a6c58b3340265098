//! FTPS Service (§4.9, §4.10, C10): owns the implicit-TLS FTP session for
//! the active printer's file channel. Gated by the connection orchestrator
//! on MQTT liveness via `reconnect_paused`; a `connected` transition is
//! only published after a 1-second debounce.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::backoff::Backoff;
use crate::errors::{DomainError, DomainResult};
use crate::models::FtpsStatus;
use crate::state::StateOrchestrator;
use crate::wire::ftps::{FtpEntry, FtpsWireClient};

const CONNECTED_DEBOUNCE: Duration = Duration::from_secs(1);

pub struct FtpsService {
    printer_id: String,
    host: String,
    access_code: String,
    orchestrator: Arc<StateOrchestrator>,
    client: RwLock<Option<Arc<FtpsWireClient>>>,
    reconnect_paused: AtomicBool,
    shutdown: AtomicBool,
}

impl FtpsService {
    pub fn new(printer_id: String, host: String, access_code: String, orchestrator: Arc<StateOrchestrator>) -> Arc<Self> {
        Arc::new(Self {
            printer_id,
            host,
            access_code,
            orchestrator,
            client: RwLock::new(None),
            reconnect_paused: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn set_reconnect_paused(&self, paused: bool) {
        self.reconnect_paused.store(paused, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub async fn list(&self, path: &str) -> DomainResult<Vec<FtpEntry>> {
        let client = self.require_client().await?;
        client.list(path).await
    }

    pub async fn retrieve(&self, path: &str) -> DomainResult<Vec<u8>> {
        let client = self.require_client().await?;
        client.retrieve(path).await
    }

    pub async fn store(&self, path: &str, body: &[u8]) -> DomainResult<()> {
        let client = self.require_client().await?;
        client.store(path, body).await
    }

    pub async fn delete(&self, path: &str) -> DomainResult<()> {
        self.require_client().await?.delete(path).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> DomainResult<()> {
        self.require_client().await?.rename(from, to).await
    }

    pub async fn make_dir(&self, path: &str) -> DomainResult<()> {
        self.require_client().await?.make_dir(path).await
    }

    async fn require_client(&self) -> DomainResult<Arc<FtpsWireClient>> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| DomainError::ServiceUnavailable("FTPS channel is not connected".into()))
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = Backoff::default_connection();
            while !self.shutdown.load(Ordering::SeqCst) {
                if self.reconnect_paused.load(Ordering::SeqCst) {
                    *self.client.write().await = None;
                    self.orchestrator.set_ftps_status(&self.printer_id, FtpsStatus::Disconnected).await;
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }

                self.orchestrator.set_ftps_status(&self.printer_id, FtpsStatus::Reconnecting).await;
                match FtpsWireClient::connect(&self.host, "bblp", &self.access_code).await {
                    Ok(client) => {
                        tokio::time::sleep(CONNECTED_DEBOUNCE).await;
                        if self.reconnect_paused.load(Ordering::SeqCst) || self.shutdown.load(Ordering::SeqCst) {
                            continue;
                        }
                        *self.client.write().await = Some(Arc::new(client));
                        self.orchestrator.set_ftps_status(&self.printer_id, FtpsStatus::Connected).await;
                        backoff.reset();
                        info!(printer_id = %self.printer_id, "ftps session established");
                        // Hold the session until gated off or shut down; the
                        // client itself is reused from request handlers.
                        while !self.reconnect_paused.load(Ordering::SeqCst) && !self.shutdown.load(Ordering::SeqCst) {
                            tokio::time::sleep(Duration::from_secs(2)).await;
                        }
                        *self.client.write().await = None;
                    }
                    Err(e) => {
                        warn!(printer_id = %self.printer_id, error = %e, "ftps connect failed");
                        self.orchestrator.set_ftps_status(&self.printer_id, FtpsStatus::Disconnected).await;
                        tokio::time::sleep(backoff.next_delay()).await;
                    }
                }
            }
        })
    }
}
