//! Typed snapshot of a single printer's state, assembled from the raw
//! merged MQTT payload by the state assembler.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::domain::PrinterGcodeState;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PrinterCapabilities {
    pub model: Option<String>,
    #[serde(default)]
    pub fields: HashMap<String, HashMap<String, bool>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AmsTray {
    pub id: String,
    #[serde(default = "default_material")]
    pub material: String,
    #[serde(default)]
    pub remain: i32,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_unknown")]
    pub nozzle_min: String,
    #[serde(default = "default_unknown")]
    pub nozzle_max: String,
    #[serde(default = "default_tray_type")]
    pub tray_type: String,
    #[serde(default)]
    pub tray_info_idx: String,
}

fn default_material() -> String {
    "Empty".to_string()
}
fn default_color() -> String {
    "000000FF".to_string()
}
fn default_unknown() -> String {
    "?".to_string()
}
fn default_tray_type() -> String {
    "Unknown".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalSpool {
    pub id: String,
    #[serde(default = "default_external_material")]
    pub material: String,
    #[serde(default)]
    pub remain: i32,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_unknown")]
    pub nozzle_min: String,
    #[serde(default = "default_unknown")]
    pub nozzle_max: String,
    #[serde(default = "default_external_material")]
    pub tray_type: String,
    #[serde(default)]
    pub tray_info_idx: String,
}

fn default_external_material() -> String {
    "External Spool".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AmsUnitCapabilities {
    pub product_name: Option<String>,
    #[serde(default)]
    pub fields: HashMap<String, HashMap<String, bool>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AmsUnit {
    pub id: String,
    pub ams_id: i32,
    pub humidity: Option<String>,
    pub temp: Option<String>,
    pub firmware: Option<String>,
    pub product_name: Option<String>,
    #[serde(default)]
    pub trays: Vec<AmsTray>,
    #[serde(default)]
    pub capabilities: AmsUnitCapabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AmsStatus {
    #[serde(default)]
    pub hub_connected: String,
    pub status_main: Option<String>,
    pub status_sub: Option<String>,
    #[serde(default)]
    pub total_ams: i32,
    #[serde(default)]
    pub ams_units: Vec<AmsUnit>,
    pub external_spool: Option<ExternalSpool>,
    #[serde(default)]
    pub tray_exist_bits: String,
    #[serde(default)]
    pub tray_is_bbl_bits: String,
    #[serde(default)]
    pub tray_read_done_bits: String,
    #[serde(default)]
    pub tray_reading_bits: String,
    #[serde(default)]
    pub tray_exist_slots: Vec<bool>,
    pub active_tray_index: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrintError {
    pub code: String,
    pub description: Option<String>,
    pub sub_code: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HmsError {
    pub code: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrintAgainState {
    pub visible: bool,
    pub enabled: bool,
    pub reason: Option<String>,
    pub payload: Option<serde_json::Value>,
}

impl Default for PrintAgainState {
    fn default() -> Self {
        Self {
            visible: false,
            enabled: false,
            reason: Some("print_in_progress".to_string()),
            payload: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LastSentProjectFile {
    pub url: String,
    pub file: Option<String>,
    pub plate: Option<String>,
    #[serde(default)]
    pub bed_leveling: bool,
    #[serde(default)]
    pub flow_cali: bool,
    #[serde(default)]
    pub timelapse: bool,
    #[serde(default)]
    pub use_ams: bool,
    #[serde(default)]
    pub layer_inspect: bool,
    #[serde(default)]
    pub vibration_cali: bool,
    pub ams_mapping: Option<Vec<i32>>,
    pub sent_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PrintStatus {
    pub nozzle_temp: Option<f64>,
    pub nozzle_target_temp: Option<f64>,
    pub bed_temp: Option<f64>,
    pub bed_target_temp: Option<f64>,
    pub chamber_temp: Option<f64>,
    pub chamber_target_temp: Option<f64>,
    #[serde(default)]
    pub stage: i64,
    #[serde(default)]
    pub stage_label: String,
    #[serde(default)]
    pub stage_history: Vec<i64>,
    #[serde(default)]
    pub percent: i32,
    #[serde(default)]
    pub remaining_time: i64,
    #[serde(default = "default_layer")]
    pub layer: String,
    pub gcode_state: PrinterGcodeState,
    pub file: Option<String>,
    pub finish_time: Option<String>,
    pub nozzle_type: Option<String>,
    pub nozzle_diameter: Option<String>,
    pub wifi_signal: Option<String>,
    #[serde(default)]
    pub fan_gear: i64,
    pub print_error: Option<PrintError>,
    #[serde(default)]
    pub hms_errors: Vec<HmsError>,
    #[serde(default)]
    pub chamber_light: bool,
    #[serde(default)]
    pub timelapse_enabled: bool,
    pub sdcard_state: Option<String>,
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub feature_toggles: Vec<super::domain::HomeFlagFeature>,
    #[serde(default)]
    pub skipped_objects: Vec<i64>,
    pub skip_object_state: Option<String>,
    #[serde(default)]
    pub print_again: PrintAgainState,
}

fn default_layer() -> String {
    "0/0".to_string()
}

impl Serialize for super::domain::HomeFlagFeature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("HomeFlagFeature", 3)?;
        s.serialize_field("key", self.key)?;
        s.serialize_field("supported", &self.supported)?;
        s.serialize_field("enabled", &self.enabled)?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for super::domain::HomeFlagFeature {
    fn deserialize<D>(_deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Feature toggles are produced by the assembler, never read back
        // from the wire, so deserialization only needs to exist to satisfy
        // `PrintStatus`'s derive. Any shape is accepted as the empty set.
        Ok(super::domain::HomeFlagFeature {
            key: "",
            supported: None,
            enabled: None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FtpsStatus {
    Connected,
    Reconnecting,
    Disconnected,
}

impl Default for FtpsStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    Stopped,
    Connecting,
    Streaming,
    StallWarning,
    Reconnecting,
    Paused,
}

impl Default for CameraStatus {
    fn default() -> Self {
        Self::Stopped
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PrinterState {
    pub print: PrintStatus,
    pub ams: AmsStatus,
    pub camera_frame: Option<String>,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub printer_online: bool,
    #[serde(default)]
    pub ftps_status: FtpsStatus,
    #[serde(default)]
    pub capabilities: PrinterCapabilities,
    #[serde(default)]
    pub camera_status: CameraStatus,
    pub camera_status_reason: Option<String>,
    pub last_sent_project_file: Option<LastSentProjectFile>,
}
