//! State Orchestrator (§4.5): the single writer into each printer's store.
//! Every mutation runs inside the store's lock, via the assembler, before
//! handing a snapshot clone to the notifier.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::merge;
use crate::models::{AmsStatus, CameraStatus, FtpsStatus, LastSentProjectFile, PrinterState};
use crate::state::assembler::{self, AssembleContext};
use crate::state::notifier::Notifier;
use crate::state::repository::StateRepository;

#[derive(Debug, Clone, Default)]
struct PrinterMeta {
    serial: String,
    model: Option<String>,
    last_sent_project_file: Option<LastSentProjectFile>,
}

/// Breaks the orchestrator/print-job-service cyclic reference (§9 Open
/// Questions): the filament catalog owns no reference back into the
/// orchestrator, it's just handed every raw report payload to look for
/// successful `ams_filament_setting`/`extrusion_cali_sel` commands.
pub trait FilamentCaptureSink: Send + Sync {
    fn ingest(&self, printer_id: &str, payload: &Value);
}

pub struct StateOrchestrator {
    repository: Arc<StateRepository>,
    notifier: Arc<Notifier>,
    data_dir: PathBuf,
    meta: RwLock<HashMap<String, PrinterMeta>>,
    filament_sink: RwLock<Option<Arc<dyn FilamentCaptureSink>>>,
}

impl StateOrchestrator {
    pub fn new(repository: Arc<StateRepository>, notifier: Arc<Notifier>, data_dir: PathBuf) -> Self {
        Self { repository, notifier, data_dir, meta: RwLock::new(HashMap::new()), filament_sink: RwLock::new(None) }
    }

    pub fn repository(&self) -> &Arc<StateRepository> {
        &self.repository
    }

    /// Wire up the filament capture ingestor after both sides are
    /// constructed, avoiding a constructor-time cycle.
    pub async fn set_filament_sink(&self, sink: Arc<dyn FilamentCaptureSink>) {
        *self.filament_sink.write().await = Some(sink);
    }

    pub async fn register_printer(&self, printer_id: &str, serial: &str, model: Option<String>) {
        let mut meta = self.meta.write().await;
        let entry = meta.entry(printer_id.to_string()).or_default();
        entry.serial = serial.to_string();
        entry.model = model;
    }

    async fn reassemble_and_notify(&self, printer_id: &str) -> PrinterState {
        let meta = self.meta.read().await.get(printer_id).cloned().unwrap_or_default();
        let master = self.repository.get_master(printer_id).await;
        let online = self.repository.get_state(printer_id).await.printer_online;

        let ctx = AssembleContext {
            serial: &meta.serial,
            model: meta.model.as_deref(),
            data_dir: &self.data_dir,
            last_sent_project_file: meta.last_sent_project_file.as_ref(),
            printer_online: online,
        };
        let (print, mut ams, external) = assembler::assemble(&master, &ctx).await;
        ams.external_spool = external;

        let snapshot = self
            .repository
            .update(printer_id, |store| {
                store.snapshot.print = print;
                store.snapshot.ams = ams;
                store.snapshot.capabilities =
                    crate::services::capability::apply_printer_capabilities(meta.model.as_deref());
                store.snapshot.updated_at = chrono::Local::now().format("%H:%M:%S").to_string();
            })
            .await;

        self.notifier.notify(printer_id, &snapshot).await;
        snapshot
    }

    pub async fn update_print_data(&self, printer_id: &str, payload: &Value) -> PrinterState {
        self.repository
            .update(printer_id, |store| {
                merge::merge_into(&mut store.raw_master, payload);
            })
            .await;
        if let Some(sink) = self.filament_sink.read().await.as_ref() {
            sink.ingest(printer_id, payload);
        }
        self.reassemble_and_notify(printer_id).await
    }

    pub async fn set_printer_online(&self, printer_id: &str, online: bool) -> PrinterState {
        let snapshot = self
            .repository
            .update(printer_id, |store| {
                store.snapshot.printer_online = online;
                if !online {
                    store.snapshot.ams = AmsStatus::default();
                }
            })
            .await;
        if online {
            // Reassemble so other online-dependent fields pick up the transition too.
            self.reassemble_and_notify(printer_id).await
        } else {
            // Skip the reassembler here: it re-derives `ams` from `raw_master` and
            // would immediately clobber the reset above.
            self.notifier.notify(printer_id, &snapshot).await;
            snapshot
        }
    }

    pub async fn set_ftps_status(&self, printer_id: &str, status: FtpsStatus) {
        let previous = self.repository.get_state(printer_id).await.ftps_status;
        if previous == status {
            return;
        }
        self.repository
            .update(printer_id, |store| {
                store.snapshot.ftps_status = status;
            })
            .await;
        let snapshot = self.repository.get_state(printer_id).await;
        self.notifier.notify(printer_id, &snapshot).await;
    }

    pub async fn set_camera_status(&self, printer_id: &str, status: CameraStatus, reason: Option<String>) {
        self.repository
            .update(printer_id, |store| {
                store.snapshot.camera_status = status;
                store.snapshot.camera_status_reason = reason;
            })
            .await;
        let snapshot = self.repository.get_state(printer_id).await;
        self.notifier.notify(printer_id, &snapshot).await;
    }

    pub async fn update_camera_frame(&self, printer_id: &str, frame_base64: String) {
        self.repository
            .update(printer_id, |store| {
                store.snapshot.camera_frame = Some(frame_base64);
            })
            .await;
    }

    pub async fn set_last_sent_project_file(&self, printer_id: &str, file: LastSentProjectFile) -> PrinterState {
        {
            let mut meta = self.meta.write().await;
            meta.entry(printer_id.to_string()).or_default().last_sent_project_file = Some(file.clone());
        }
        self.repository
            .update(printer_id, |store| {
                store.snapshot.last_sent_project_file = Some(file);
            })
            .await;
        self.reassemble_and_notify(printer_id).await
    }

    pub async fn set_skip_object_state(&self, printer_id: &str, state: Option<String>) {
        self.repository
            .update(printer_id, |store| {
                store.snapshot.print.skip_object_state = state;
            })
            .await;
        let snapshot = self.repository.get_state(printer_id).await;
        self.notifier.notify(printer_id, &snapshot).await;
    }
}
