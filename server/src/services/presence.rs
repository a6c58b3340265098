//! Presence Watchers (§4.10): one lightweight MQTT watcher per configured
//! printer that is *not* the active one, keeping every `PrinterStore` warm.
//! Watchers self-suspend when their printer becomes active (the active
//! MQTT service owns the connection) and resume when it is deselected.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::info;

use crate::models::PrinterDefinition;
use crate::services::mqtt_service::MqttService;
use crate::state::StateOrchestrator;
use crate::wire::mqtt::MqttWireConfig;

struct Watcher {
    service: Arc<MqttService>,
    task: JoinHandle<()>,
}

/// Owns one [`MqttService`] per non-active printer.
pub struct PresenceRegistry {
    orchestrator: Arc<StateOrchestrator>,
    watchers: RwLock<HashMap<String, Watcher>>,
}

impl PresenceRegistry {
    pub fn new(orchestrator: Arc<StateOrchestrator>) -> Self {
        Self { orchestrator, watchers: RwLock::new(HashMap::new()) }
    }

    /// Reconcile the watcher set against the configured printer list and
    /// the currently active printer id: start watchers for every other
    /// printer, stop the one for the printer that just became active.
    pub async fn reconcile(&self, printers: &[PrinterDefinition], active_printer_id: Option<&str>) {
        let mut watchers = self.watchers.write().await;

        let keep: Vec<String> =
            printers.iter().filter(|p| Some(p.id.as_str()) != active_printer_id).map(|p| p.id.clone()).collect();

        let stale: Vec<String> = watchers.keys().filter(|id| !keep.contains(id)).cloned().collect();
        for id in stale {
            if let Some(watcher) = watchers.remove(&id) {
                watcher.task.abort();
                info!(printer_id = %id, "presence watcher suspended");
            }
        }

        for printer in printers {
            if Some(printer.id.as_str()) == active_printer_id || watchers.contains_key(&printer.id) {
                continue;
            }
            self.orchestrator.register_printer(&printer.id, &printer.serial, printer.model.clone()).await;
            let config = MqttWireConfig {
                serial: printer.serial.clone(),
                host: printer.printer_ip.clone(),
                access_code: printer.access_code.clone(),
            };
            let service = MqttService::new(printer.id.clone(), config, self.orchestrator.clone());
            let task = service.clone().spawn();
            watchers.insert(printer.id.clone(), Watcher { service, task });
            info!(printer_id = %printer.id, "presence watcher started");
        }
    }

    pub async fn shutdown(&self) {
        let mut watchers = self.watchers.write().await;
        for (_, watcher) in watchers.drain() {
            watcher.task.abort();
        }
    }
}
