//! MQTT Service (§4.9 pairs with the Connection Orchestrator, C9): the
//! active-printer MQTT session — connect, subscribe, initial pushall +
//! get_version, heartbeat on idle, command publishing, and structured
//! restart with backoff on any transport failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::backoff::Backoff;
use crate::errors::{DomainError, DomainResult};
use crate::services::control_commands;
use crate::state::StateOrchestrator;
use crate::wire::mqtt::{MqttHandle, MqttWireClient, MqttWireConfig, WireEvent};

const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MqttService {
    printer_id: String,
    config: MqttWireConfig,
    orchestrator: Arc<StateOrchestrator>,
    handle: RwLock<Option<MqttHandle>>,
    last_message_at: RwLock<Instant>,
    connected: AtomicBool,
    shutdown: AtomicBool,
}

impl MqttService {
    pub fn new(printer_id: String, config: MqttWireConfig, orchestrator: Arc<StateOrchestrator>) -> Arc<Self> {
        Arc::new(Self {
            printer_id,
            config,
            orchestrator,
            handle: RwLock::new(None),
            last_message_at: RwLock::new(Instant::now()),
            connected: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn is_live(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.shutdown.store(false, Ordering::SeqCst);
    }

    pub async fn send_command(&self, payload: Value) -> DomainResult<()> {
        let handle = self.handle.read().await.clone();
        let Some(handle) = handle else {
            return Err(DomainError::ServiceUnavailable("MQTT session is not connected".into()));
        };
        handle
            .publish(&payload)
            .await
            .map_err(|e| DomainError::BadGateway(format!("failed to publish MQTT command: {e}")))
    }

    /// Own the connect/run/backoff loop for the lifetime of the returned
    /// task. Every crash is logged and retried; success resets the backoff.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = Backoff::default_connection();
            while !self.shutdown.load(Ordering::SeqCst) {
                match self.run_session().await {
                    Ok(()) => backoff.reset(),
                    Err(e) => warn!(printer_id = %self.printer_id, error = %e, "mqtt session ended"),
                }
                self.connected.store(false, Ordering::SeqCst);
                *self.handle.write().await = None;
                self.orchestrator.set_printer_online(&self.printer_id, false).await;
                if self.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(backoff.next_delay()).await;
            }
        })
    }

    async fn run_session(&self) -> anyhow::Result<()> {
        let wire = MqttWireClient::connect(self.config.clone()).await?;
        let handle = wire.handle();
        handle.publish(&control_commands::pushall()).await?;
        handle.publish(&control_commands::get_version()).await?;

        *self.handle.write().await = Some(handle.clone());
        self.connected.store(true, Ordering::SeqCst);
        *self.last_message_at.write().await = Instant::now();
        self.orchestrator.set_printer_online(&self.printer_id, true).await;
        info!(printer_id = %self.printer_id, "mqtt session established");

        let (tx, mut rx) = mpsc::channel(256);
        let driver = tokio::spawn(wire.run(tx));

        loop {
            match timeout(HEARTBEAT_TIMEOUT, rx.recv()).await {
                Ok(Some(WireEvent::Message(payload))) => {
                    *self.last_message_at.write().await = Instant::now();
                    self.orchestrator.update_print_data(&self.printer_id, &payload).await;
                }
                Ok(Some(WireEvent::Connected)) => {}
                Ok(Some(WireEvent::Disconnected)) | Ok(None) => {
                    driver.abort();
                    anyhow::bail!("mqtt transport disconnected");
                }
                Err(_) => {
                    let idle = self.last_message_at.read().await.elapsed();
                    if idle >= 2 * HEARTBEAT_TIMEOUT {
                        driver.abort();
                        anyhow::bail!("no report received within {:?}, marking offline", 2 * HEARTBEAT_TIMEOUT);
                    }
                    let _ = handle.publish(&control_commands::heartbeat()).await;
                }
            }
        }
    }
}
