//! Per-printer state repository (§4.2): one `PrinterStore` per configured
//! printer, each guarded by its own lock so one writer (the orchestrator)
//! and many readers never block each other across printers.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::models::PrinterState;

pub struct PrinterStore {
    pub raw_master: Value,
    pub snapshot: PrinterState,
}

impl Default for PrinterStore {
    fn default() -> Self {
        Self {
            raw_master: Value::Object(Default::default()),
            snapshot: PrinterState::default(),
        }
    }
}

#[derive(Default)]
pub struct StateRepository {
    stores: RwLock<HashMap<String, Arc<Mutex<PrinterStore>>>>,
}

impl StateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn store_for(&self, printer_id: &str) -> Arc<Mutex<PrinterStore>> {
        if let Some(store) = self.stores.read().await.get(printer_id) {
            return store.clone();
        }
        let mut stores = self.stores.write().await;
        stores
            .entry(printer_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PrinterStore::default())))
            .clone()
    }

    pub async fn get_state(&self, printer_id: &str) -> PrinterState {
        self.store_for(printer_id).await.lock().await.snapshot.clone()
    }

    pub async fn get_master(&self, printer_id: &str) -> Value {
        self.store_for(printer_id).await.lock().await.raw_master.clone()
    }

    /// Acquire the per-printer store lock and run `f` against it, returning
    /// a snapshot clone taken after `f` runs. This is the single choke
    /// point every mutation of a printer's state passes through.
    pub async fn update<F>(&self, printer_id: &str, f: F) -> PrinterState
    where
        F: FnOnce(&mut PrinterStore),
    {
        let store = self.store_for(printer_id).await;
        let mut guard = store.lock().await;
        f(&mut guard);
        guard.snapshot.clone()
    }

    pub async fn reset(&self, printer_id: &str) {
        self.stores.write().await.remove(printer_id);
    }

    pub async fn known_printer_ids(&self) -> Vec<String> {
        self.stores.read().await.keys().cloned().collect()
    }
}
