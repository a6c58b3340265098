//! Connection Orchestrator (§4.9, C8): the per-active-printer supervisor.
//! Starts presence watching and the active MQTT session first, then gates
//! FTPS and Camera on MQTT liveness so their reconnect loops don't flap
//! against a printer that's already unreachable over MQTT.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::models::PrinterDefinition;
use crate::services::camera_service::CameraService;
use crate::services::ftps_service::FtpsService;
use crate::services::mqtt_service::MqttService;
use crate::services::presence::PresenceRegistry;
use crate::state::StateOrchestrator;
use crate::wire::mqtt::MqttWireConfig;

const TICK_INTERVAL: Duration = Duration::from_secs(2);

struct ActiveSession {
    printer_id: String,
    mqtt: Arc<MqttService>,
    mqtt_task: JoinHandle<()>,
    ftps: Arc<FtpsService>,
    ftps_task: JoinHandle<()>,
    camera: Arc<CameraService>,
    camera_task: JoinHandle<()>,
}

impl ActiveSession {
    fn shutdown(self) {
        self.mqtt.stop();
        self.ftps.stop();
        self.camera.stop();
        self.mqtt_task.abort();
        self.ftps_task.abort();
        self.camera_task.abort();
    }
}

pub struct ConnectionOrchestrator {
    state: Arc<StateOrchestrator>,
    presence: Arc<PresenceRegistry>,
    cam_interval: Duration,
    active: RwLock<Option<ActiveSession>>,
    shutdown: AtomicBool,
}

impl ConnectionOrchestrator {
    pub fn new(state: Arc<StateOrchestrator>, presence: Arc<PresenceRegistry>, cam_interval: Duration) -> Arc<Self> {
        Arc::new(Self { state, presence, cam_interval, active: RwLock::new(None), shutdown: AtomicBool::new(false) })
    }

    /// Reconcile both the presence watcher set and the single active
    /// session against the current printer list / active printer id.
    /// Idempotent: safe to call on every config change.
    pub async fn reconcile(&self, printers: &[PrinterDefinition], active_printer_id: Option<&str>) {
        self.presence.reconcile(printers, active_printer_id).await;

        let target = active_printer_id.and_then(|id| printers.iter().find(|p| p.id == id));
        let mut active = self.active.write().await;

        let needs_swap = match (&*active, target) {
            (Some(session), Some(printer)) => session.printer_id != printer.id,
            (None, Some(_)) => true,
            (Some(_), None) => true,
            (None, None) => false,
        };
        if !needs_swap {
            return;
        }

        if let Some(session) = active.take() {
            info!(printer_id = %session.printer_id, "deactivating printer connection session");
            session.shutdown();
        }

        if let Some(printer) = target {
            self.state.register_printer(&printer.id, &printer.serial, printer.model.clone()).await;

            let mqtt_config = MqttWireConfig {
                serial: printer.serial.clone(),
                host: printer.printer_ip.clone(),
                access_code: printer.access_code.clone(),
            };
            let mqtt = MqttService::new(printer.id.clone(), mqtt_config, self.state.clone());
            let mqtt_task = mqtt.clone().spawn();

            let ftps = FtpsService::new(
                printer.id.clone(),
                printer.printer_ip.clone(),
                printer.access_code.clone(),
                self.state.clone(),
            );
            let ftps_task = ftps.clone().spawn();

            let camera = CameraService::new(
                printer.id.clone(),
                printer.printer_ip.clone(),
                printer.access_code.clone(),
                self.cam_interval,
                self.state.clone(),
            );
            let camera_task = camera.clone().spawn();

            info!(printer_id = %printer.id, "activated printer connection session");
            *active = Some(ActiveSession { printer_id: printer.id.clone(), mqtt, mqtt_task, ftps, ftps_task, camera, camera_task });
        }
    }

    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.presence.shutdown().await;
        if let Some(session) = self.active.write().await.take() {
            session.shutdown();
        }
    }

    /// The FTPS/MQTT channels only exist for the currently active printer;
    /// presence watchers keep other printers' telemetry warm but never own
    /// a file or camera channel for them.
    pub async fn ftps_for(&self, printer_id: &str) -> Option<Arc<FtpsService>> {
        let active = self.active.read().await;
        active.as_ref().filter(|s| s.printer_id == printer_id).map(|s| s.ftps.clone())
    }

    pub async fn mqtt_for(&self, printer_id: &str) -> Option<Arc<MqttService>> {
        let active = self.active.read().await;
        active.as_ref().filter(|s| s.printer_id == printer_id).map(|s| s.mqtt.clone())
    }

    /// Sample MQTT liveness every tick and flip the FTPS/Camera reconnect
    /// gates accordingly. Never exits on its own; an error during a single
    /// tick is logged and the loop carries on to the next one.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while !self.shutdown.load(Ordering::SeqCst) {
                if let Err(e) = self.tick().await {
                    error!(error = %e, "connection orchestrator tick failed, continuing");
                }
                tokio::time::sleep(TICK_INTERVAL).await;
            }
        })
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let active = self.active.read().await;
        let Some(session) = active.as_ref() else { return Ok(()) };
        let live = session.mqtt.is_live();
        session.ftps.set_reconnect_paused(!live);
        session.camera.set_reconnect_paused(!live);
        Ok(())
    }
}
