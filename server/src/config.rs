//! Process configuration: environment-derived bind/paths plus the
//! persisted `app.json` document (§4.16, §6.3). Writes are atomic
//! (sibling tmp file + rename) so a crash mid-write never corrupts the
//! live config.

use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::errors::{DomainError, DomainResult};
use crate::models::{PrinterDefinition, Settings};

/// Environment-derived process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub config_path: PathBuf,
    pub static_dir: String,
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_address: std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".into()),
            config_path: std::env::var("CONFIG_PATH")
                .unwrap_or_else(|_| "data/app.json".into())
                .into(),
            static_dir: std::env::var("STATIC_DIR").unwrap_or_else(|_| "../web/dist".into()),
            cache_dir: std::env::var("CACHE_DIR")
                .unwrap_or_else(|_| "data/print-cache".into())
                .into(),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "data".into()).into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_pushall_interval")]
    pub pushall_interval: f64,
    #[serde(default = "default_cam_interval")]
    pub cam_interval: f64,
    pub relay_port: Option<u16>,
    pub relay_path: Option<String>,
    pub relay_log_output: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub admin_token: Option<String>,
    #[serde(default)]
    pub admin_allowlist: Vec<String>,
    #[serde(default)]
    pub admin_password_hash: Option<String>,
    #[serde(default)]
    pub session_secret: Option<String>,
    #[serde(default = "default_true")]
    pub auth_enabled: bool,
    #[serde(default)]
    pub debug_enabled: bool,
    #[serde(default = "default_true")]
    pub cache_upload_enabled: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_pushall_interval() -> f64 {
    30.0
}
fn default_cam_interval() -> f64 {
    0.2
}
fn default_true() -> bool {
    true
}

/// On-disk shape of `app.json` (§6.3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub app_settings: AppSettings,
    #[serde(default)]
    pub printers: Vec<PrinterDefinition>,
    #[serde(default)]
    pub settings: Settings,
}

fn generate_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl AppConfig {
    /// Load `app.json` from disk, creating a default document (with freshly
    /// generated tokens) if it's absent. Missing tokens on an existing
    /// document are filled in and persisted immediately.
    pub async fn load(path: &Path) -> DomainResult<Self> {
        let mut config = match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice::<Self>(&bytes)
                .map_err(|e| DomainError::Internal(format!("app.json is not valid JSON: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(DomainError::Internal(format!("failed to read {}: {e}", path.display()))),
        };

        let mut dirty = false;
        if config.app_settings.api_token.is_none() {
            config.app_settings.api_token = Some(generate_token());
            dirty = true;
        }
        if config.app_settings.admin_token.is_none() {
            config.app_settings.admin_token = Some(generate_token());
            dirty = true;
        }
        if config.app_settings.session_secret.is_none() {
            config.app_settings.session_secret = Some(generate_token());
            dirty = true;
        }
        if config.settings.default_printer_id.is_none() {
            if let Some(first) = config.printers.first() {
                config.settings.default_printer_id = Some(first.id.clone());
                dirty = true;
            }
        }

        if dirty {
            config.save(path).await?;
        }
        Ok(config)
    }

    /// Persist to `path` atomically: write to a sibling `.tmp` file, then
    /// rename over the target.
    pub async fn save(&self, path: &Path) -> DomainResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DomainError::Internal(format!("failed to create {}: {e}", parent.display())))?;
        }
        let tmp_path = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(self)
            .map_err(|e| DomainError::Internal(format!("failed to serialize app.json: {e}")))?;
        fs::write(&tmp_path, body)
            .await
            .map_err(|e| DomainError::Internal(format!("failed to write {}: {e}", tmp_path.display())))?;
        fs::rename(&tmp_path, path)
            .await
            .map_err(|e| DomainError::Internal(format!("failed to rename into {}: {e}", path.display())))?;
        Ok(())
    }

    /// Remove a printer, enforcing that at least one remains and that
    /// `default_printer_id` always points at a surviving printer.
    pub fn remove_printer(&mut self, id: &str) -> DomainResult<()> {
        if self.printers.len() <= 1 {
            return Err(DomainError::Conflict("at least one printer must remain".into()));
        }
        let before = self.printers.len();
        self.printers.retain(|p| p.id != id);
        if self.printers.len() == before {
            return Err(DomainError::NotFound(format!("printer {id}")));
        }
        if self.settings.default_printer_id.as_deref() == Some(id) {
            self.settings.default_printer_id = self.printers.first().map(|p| p.id.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_generates_tokens_once() {
        let dir = std::env::temp_dir().join(format!("sentinel-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("app.json");
        let first = AppConfig::load(&path).await.unwrap();
        let token = first.app_settings.api_token.clone().unwrap();
        let second = AppConfig::load(&path).await.unwrap();
        assert_eq!(second.app_settings.api_token.unwrap(), token);
        tokio::fs::remove_dir_all(dir).await.ok();
    }

    #[test]
    fn remove_printer_keeps_at_least_one() {
        let mut config = AppConfig {
            printers: vec![PrinterDefinition {
                id: "p1".into(),
                printer_ip: "10.0.0.1".into(),
                access_code: "x".into(),
                serial: "S1".into(),
                model: None,
                name: None,
                external_camera_url: None,
            }],
            ..Default::default()
        };
        assert!(config.remove_printer("p1").is_err());
    }
}
