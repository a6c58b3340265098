//! Service Registry (C15): wires the long-lived services together once at
//! startup and re-applies printer/active-printer changes to the connection
//! orchestrator and presence watchers whenever `app.json` changes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::AppConfig;
use crate::services::connection_orchestrator::ConnectionOrchestrator;
use crate::services::event_service::EventService;
use crate::services::filament::FilamentService;
use crate::services::presence::PresenceRegistry;
use crate::services::print_job::PrintJobService;
use crate::state::{Notifier, StateOrchestrator, StreamService};

pub struct ServiceRegistry {
    pub state: Arc<StateOrchestrator>,
    pub events: Arc<EventService>,
    pub stream: Arc<StreamService>,
    pub filament: Arc<FilamentService>,
    pub presence: Arc<PresenceRegistry>,
    pub connections: Arc<ConnectionOrchestrator>,
    pub print_jobs: Arc<PrintJobService>,
}

impl ServiceRegistry {
    pub async fn build(
        state: Arc<StateOrchestrator>,
        notifier: &Arc<Notifier>,
        data_dir: &std::path::Path,
        cache_dir: PathBuf,
        cam_interval_secs: f64,
    ) -> anyhow::Result<Arc<Self>> {
        let events = Arc::new(EventService::new());
        let stream = Arc::new(StreamService::new());

        {
            let events = events.clone();
            notifier.register(move |printer_id, state| {
                let events = events.clone();
                async move { events.observe(printer_id, state).await }
            }).await;
        }
        {
            let stream = stream.clone();
            notifier.register(move |printer_id, state| {
                let stream = stream.clone();
                async move { stream.publish(&printer_id, &state).await }
            }).await;
        }

        let filament = Arc::new(FilamentService::load(data_dir).await?);
        state.set_filament_sink(filament.clone()).await;

        let presence = Arc::new(PresenceRegistry::new(state.clone()));
        let connections = ConnectionOrchestrator::new(state.clone(), presence.clone(), Duration::from_secs_f64(cam_interval_secs));
        let print_jobs = PrintJobService::new(cache_dir, connections.clone(), state.clone());

        Ok(Arc::new(Self { state, events, stream, filament, presence, connections, print_jobs }))
    }

    /// Re-apply the current printer list / active printer id to the
    /// connection orchestrator (which reconciles presence watchers too).
    /// Call on startup and after every `app.json` mutation.
    pub async fn reconcile(&self, config: &AppConfig) {
        let active = config.settings.default_printer_id.as_deref();
        self.connections.reconcile(&config.printers, active).await;
        info!(active_printer_id = ?active, printer_count = config.printers.len(), "service registry reconciled");
    }

    pub fn spawn_background_tasks(self: &Arc<Self>) {
        self.connections.clone().spawn();
    }

    pub async fn shutdown(&self) {
        self.connections.shutdown().await;
    }
}
