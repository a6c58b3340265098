//! Filament Catalog + Capture (§4.12, C13): the static catalog is read-only
//! ambient I/O; custom definitions are user-authored and read/write;
//! captures are an in-memory accumulation keyed by `tray_info_idx`, fed by
//! every successful `ams_filament_setting`/`extrusion_cali_sel` MQTT report
//! through the [`FilamentCaptureSink`] the orchestrator calls into.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::warn;

use crate::errors::{DomainError, DomainResult};
use crate::services::control_commands::{normalize_color, normalize_nozzle_diameter};
use crate::state::orchestrator::FilamentCaptureSink;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilamentCaptureRecord {
    pub tray_info_idx: String,
    pub tray_type: Option<String>,
    pub color: Option<String>,
    pub nozzle_diameter: Option<String>,
    pub last_seen: DateTime<Utc>,
}

pub struct FilamentService {
    catalog_path: PathBuf,
    custom_path: PathBuf,
    catalog: Vec<Value>,
    custom: RwLock<Vec<Value>>,
    captures: StdMutex<HashMap<String, HashMap<String, FilamentCaptureRecord>>>,
}

impl FilamentService {
    pub async fn load(data_dir: &std::path::Path) -> DomainResult<Self> {
        let filament_dir = data_dir.join("filament");
        let catalog_path = filament_dir.join("filaments_full.json");
        let custom_path = filament_dir.join("custom_filament.json");

        let catalog = read_json_array(&catalog_path).await.unwrap_or_else(|e| {
            warn!(path = %catalog_path.display(), error = %e, "filament catalog missing or unreadable, starting empty");
            Vec::new()
        });
        let custom = match read_json_array(&custom_path).await {
            Ok(entries) => entries,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            catalog_path,
            custom_path,
            catalog,
            custom: RwLock::new(custom),
            captures: StdMutex::new(HashMap::new()),
        })
    }

    pub fn catalog(&self) -> &[Value] {
        &self.catalog
    }

    pub async fn custom(&self) -> Vec<Value> {
        self.custom.read().await.clone()
    }

    pub async fn add_custom(&self, entry: Value) -> DomainResult<()> {
        let mut custom = self.custom.write().await;
        custom.push(entry);
        write_json_array(&self.custom_path, &custom).await
    }

    pub async fn remove_custom(&self, tray_info_idx: &str) -> DomainResult<()> {
        let mut custom = self.custom.write().await;
        let before = custom.len();
        custom.retain(|entry| entry.get("tray_info_idx").and_then(Value::as_str) != Some(tray_info_idx));
        if custom.len() == before {
            return Err(DomainError::NotFound(format!("custom filament {tray_info_idx}")));
        }
        write_json_array(&self.custom_path, &custom).await
    }

    /// Captured definitions for `printer_id` not already present in the
    /// static catalog or custom list, keyed by `tray_info_idx`.
    pub async fn candidates(&self, printer_id: &str) -> Vec<FilamentCaptureRecord> {
        let known: std::collections::HashSet<String> = self
            .catalog
            .iter()
            .chain(self.custom.read().await.iter())
            .filter_map(|entry| entry.get("tray_info_idx").and_then(Value::as_str).map(str::to_string))
            .collect();

        self.captures
            .lock()
            .expect("filament capture lock not poisoned")
            .get(printer_id)
            .map(|by_idx| by_idx.values().filter(|r| !known.contains(&r.tray_info_idx)).cloned().collect())
            .unwrap_or_default()
    }
}

impl FilamentCaptureSink for FilamentService {
    fn ingest(&self, printer_id: &str, payload: &Value) {
        let Some(print) = payload.get("print") else { return };
        let Some(command) = print.get("command").and_then(Value::as_str) else { return };
        if !matches!(command, "ams_filament_setting" | "extrusion_cali_sel") {
            return;
        }
        if print.get("result").and_then(Value::as_str) != Some("success") {
            return;
        }
        let Some(tray_info_idx) = print.get("tray_info_idx").and_then(Value::as_str) else { return };

        let color = print.get("color").and_then(Value::as_str).and_then(|c| normalize_color(c).ok());
        let nozzle_diameter = print.get("nozzle_diameter").and_then(Value::as_f64).map(normalize_nozzle_diameter);
        let tray_type = print.get("tray_type").and_then(Value::as_str).map(str::to_string);

        let record = FilamentCaptureRecord {
            tray_info_idx: tray_info_idx.to_string(),
            tray_type,
            color,
            nozzle_diameter,
            last_seen: Utc::now(),
        };

        let mut captures = self.captures.lock().expect("filament capture lock not poisoned");
        captures.entry(printer_id.to_string()).or_default().insert(tray_info_idx.to_string(), record);
    }
}

async fn read_json_array(path: &std::path::Path) -> DomainResult<Vec<Value>> {
    let bytes = fs::read(path).await.map_err(|e| DomainError::Internal(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_slice(&bytes).map_err(|e| DomainError::Internal(format!("{} is not a JSON array: {e}", path.display())))
}

async fn write_json_array(path: &std::path::Path, entries: &[Value]) -> DomainResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| DomainError::Internal(format!("failed to create {}: {e}", parent.display())))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(entries).map_err(|e| DomainError::Internal(e.to_string()))?;
    fs::write(&tmp_path, body).await.map_err(|e| DomainError::Internal(format!("failed to write {}: {e}", tmp_path.display())))?;
    fs::rename(&tmp_path, path).await.map_err(|e| DomainError::Internal(format!("failed to rename into {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ingest_captures_successful_filament_setting() {
        let service = FilamentService {
            catalog_path: PathBuf::new(),
            custom_path: PathBuf::new(),
            catalog: Vec::new(),
            custom: RwLock::new(Vec::new()),
            captures: StdMutex::new(HashMap::new()),
        };
        let payload = json!({
            "print": {
                "command": "ams_filament_setting",
                "result": "success",
                "tray_info_idx": "GFL99",
                "color": "#ff0000",
                "tray_type": "PLA",
                "nozzle_diameter": 0.4,
            }
        });
        service.ingest("printer-1", &payload);
        let captures = service.captures.lock().unwrap();
        let record = &captures["printer-1"]["GFL99"];
        assert_eq!(record.color.as_deref(), Some("FF0000FF"));
        assert_eq!(record.nozzle_diameter.as_deref(), Some("0.4"));
    }

    #[test]
    fn ingest_ignores_failed_commands() {
        let service = FilamentService {
            catalog_path: PathBuf::new(),
            custom_path: PathBuf::new(),
            catalog: Vec::new(),
            custom: RwLock::new(Vec::new()),
            captures: StdMutex::new(HashMap::new()),
        };
        let payload = json!({"print": {"command": "ams_filament_setting", "result": "fail", "tray_info_idx": "GFL99"}});
        service.ingest("printer-1", &payload);
        assert!(service.captures.lock().unwrap().is_empty());
    }
}
