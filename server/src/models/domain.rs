//! Core printer domain types: normalized gcode state, AMS status codes,
//! the stage-label table, and home_flag bit decoding.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Normalized `gcode_state` values reported by printers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrinterGcodeState {
    Finish,
    Slicing,
    Running,
    Pause,
    Prepare,
    Init,
    Failed,
    Idle,
    Unknown,
}

impl PrinterGcodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Finish => "FINISH",
            Self::Slicing => "SLICING",
            Self::Running => "RUNNING",
            Self::Pause => "PAUSE",
            Self::Prepare => "PREPARE",
            Self::Init => "INIT",
            Self::Failed => "FAILED",
            Self::Idle => "IDLE",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Normalize raw `gcode_state` values emitted by printers, mapping the
    /// handful of long-form aliases onto the canonical set.
    pub fn normalize(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::Unknown;
        };
        let normalized = raw.trim().to_ascii_uppercase();
        match normalized.as_str() {
            "FINISH" | "FINISHED" => Self::Finish,
            "SLICING" => Self::Slicing,
            "RUNNING" | "PRINTING" => Self::Running,
            "PAUSE" | "PAUSED" => Self::Pause,
            "PREPARE" | "PREPARING" => Self::Prepare,
            "INIT" | "INITIALIZING" => Self::Init,
            "FAILED" | "FAIL" => Self::Failed,
            "IDLE" => Self::Idle,
            _ => Self::Unknown,
        }
    }

    pub fn is_finished_state(&self) -> bool {
        matches!(self, Self::Finish | Self::Failed)
    }
}

impl Default for PrinterGcodeState {
    fn default() -> Self {
        Self::Unknown
    }
}

/// High-byte AMS status codes indicating the main AMS state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmsStatusMain {
    Idle,
    FilamentChange,
    RfidIdentifying,
    Assist,
    Calibration,
    SelfCheck,
    Debug,
    Unknown,
}

impl AmsStatusMain {
    fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Idle,
            0x01 => Self::FilamentChange,
            0x02 => Self::RfidIdentifying,
            0x03 => Self::Assist,
            0x04 => Self::Calibration,
            0x10 => Self::SelfCheck,
            0x20 => Self::Debug,
            _ => Self::Unknown,
        }
    }
}

/// Low-byte AMS status codes indicating the active sub-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmsSubStatus {
    Idle,
    HeatNozzle,
    CutFilament,
    PullCurrentFilament,
    CutOrPushNewFilament,
    PushNewFilament,
    PullCurrFilamentOrPurgeOldFilament,
    CheckPosition,
    Wait,
    CheckPositionAgain,
    Unknown,
}

impl AmsSubStatus {
    fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Idle,
            0x02 => Self::HeatNozzle,
            0x03 => Self::CutFilament,
            0x04 => Self::PullCurrentFilament,
            0x05 => Self::CutOrPushNewFilament,
            0x06 => Self::PushNewFilament,
            0x07 => Self::PullCurrFilamentOrPurgeOldFilament,
            0x08 => Self::CheckPosition,
            0x09 => Self::Wait,
            0x0B => Self::CheckPositionAgain,
            _ => Self::Unknown,
        }
    }
}

/// Resolve a 16-bit `ams_status` word into its `(main, sub)` pair. The high
/// byte selects the main state, the low byte the active sub-operation.
pub fn resolve_ams_status(value: u32) -> (AmsStatusMain, AmsSubStatus) {
    let main = AmsStatusMain::from_byte(((value >> 8) & 0xFF) as u8);
    let sub = AmsSubStatus::from_byte((value & 0xFF) as u8);
    (main, sub)
}

/// SD card state encoded in bits 8-9 of `home_flag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SdCardState {
    NoSdcard,
    HasSdcardNormal,
    HasSdcardAbnormal,
    HasSdcardReadonly,
}

impl SdCardState {
    fn from_bits(bits: u32) -> Self {
        match bits & 0x03 {
            0 => Self::NoSdcard,
            1 => Self::HasSdcardNormal,
            2 => Self::HasSdcardAbnormal,
            3 => Self::HasSdcardReadonly,
            _ => unreachable!("bits & 0x03 is always < 4"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSdcard => "NO_SDCARD",
            Self::HasSdcardNormal => "HAS_SDCARD_NORMAL",
            Self::HasSdcardAbnormal => "HAS_SDCARD_ABNORMAL",
            Self::HasSdcardReadonly => "HAS_SDCARD_READONLY",
        }
    }
}

/// One decoded `home_flag` feature bit (or paired support/enabled bits).
/// `Serialize`/`Deserialize` are implemented by hand in `models::state`
/// alongside the snapshot types that embed it.
#[derive(Debug, Clone, PartialEq)]
pub struct HomeFlagFeature {
    pub key: &'static str,
    pub supported: Option<bool>,
    pub enabled: Option<bool>,
}

const HOME_FLAG_STATUS_BITS: &[(u32, &str)] = &[
    (0, "X_AXIS_AT_HOME"),
    (1, "Y_AXIS_AT_HOME"),
    (2, "Z_AXIS_AT_HOME"),
    (3, "IS_220V_VOLTAGE"),
    (4, "STEP_LOSS_RECOVERY"),
    (7, "AMS_DETECT_REMAIN"),
    (10, "AMS_AUTO_REFILL"),
];

const HOME_FLAG_SUPPORT_ONLY_BITS: &[(u32, &str)] = &[
    (15, "FLOW_CALIBRATION"),
    (16, "PA_CALIBRATION"),
    (21, "MOTOR_NOISE_CALIBRATION"),
    (22, "USER_PRESET"),
    (30, "AGORA"),
];

const HOME_FLAG_TOGGLE_BITS: &[(&str, u32, u32)] = &[
    ("AIR_PRINT_DETECTION", 29, 28),
    ("FILAMENT_TANGLE_DETECT", 19, 20),
    ("NOZZLE_BLOB_DETECTION", 25, 24),
    ("PROMPT_SOUND", 18, 17),
    ("UPGRADE_KIT", 27, 26),
];

/// Decode a `home_flag` 32-bit word into its feature list plus SD card state.
/// Entries are ordered: status bits (bit order), support-only bits (bit
/// order), then the paired toggle bits (alphabetical by key) — matching the
/// ordering the UI has always been fed.
pub fn parse_home_flag(value: Option<u32>) -> (Vec<HomeFlagFeature>, SdCardState) {
    let Some(raw) = value else {
        return (Vec::new(), SdCardState::NoSdcard);
    };
    let mut features = Vec::with_capacity(
        HOME_FLAG_STATUS_BITS.len() + HOME_FLAG_SUPPORT_ONLY_BITS.len() + HOME_FLAG_TOGGLE_BITS.len(),
    );
    for &(bit, key) in HOME_FLAG_STATUS_BITS {
        features.push(HomeFlagFeature {
            key,
            supported: None,
            enabled: Some(raw & (1 << bit) != 0),
        });
    }
    for &(bit, key) in HOME_FLAG_SUPPORT_ONLY_BITS {
        features.push(HomeFlagFeature {
            key,
            supported: Some(raw & (1 << bit) != 0),
            enabled: None,
        });
    }
    for &(key, support_bit, enabled_bit) in HOME_FLAG_TOGGLE_BITS {
        features.push(HomeFlagFeature {
            key,
            supported: Some(raw & (1 << support_bit) != 0),
            enabled: Some(raw & (1 << enabled_bit) != 0),
        });
    }
    let sd_state = SdCardState::from_bits(raw >> 8);
    (features, sd_state)
}

/// Human-readable label for a `mc_print_stage`/`stg_cur` code. Verbatim
/// transcription of the 67-entry stage table; unknown codes render as
/// `"Stage {n}"`.
pub fn resolve_stage_label(code: i64) -> String {
    stage_descriptions()
        .get(&code)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("Stage {code}"))
}

fn stage_descriptions() -> &'static HashMap<i64, &'static str> {
    use std::sync::OnceLock;
    static TABLE: OnceLock<HashMap<i64, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let entries: &[(i64, &str)] = &[
            (0, "Printing"),
            (1, "Auto bed leveling"),
            (2, "Heatbed preheating"),
            (3, "Vibration compensation"),
            (4, "Changing filament"),
            (5, "M400 pause"),
            (6, "Paused (filament ran out)"),
            (7, "Heating nozzle"),
            (8, "Calibrating dynamic flow"),
            (9, "Scanning bed surface"),
            (10, "Inspecting first layer"),
            (11, "Identifying build plate type"),
            (12, "Calibrating Micro Lidar"),
            (13, "Homing toolhead"),
            (14, "Cleaning nozzle tip"),
            (15, "Checking extruder temperature"),
            (16, "Paused by the user"),
            (17, "Pause (front cover fall off)"),
            (18, "Calibrating the micro lidar"),
            (19, "Calibrating flow ratio"),
            (20, "Pause (nozzle temperature malfunction)"),
            (21, "Pause (heatbed temperature malfunction)"),
            (22, "Filament unloading"),
            (23, "Pause (step loss)"),
            (24, "Filament loading"),
            (25, "Motor noise cancellation"),
            (26, "Pause (AMS offline)"),
            (27, "Pause (low speed of the heatbreak fan)"),
            (28, "Pause (chamber temperature control problem)"),
            (29, "Cooling chamber"),
            (30, "Pause (Gcode inserted by user)"),
            (31, "Motor noise showoff"),
            (32, "Pause (nozzle clumping)"),
            (33, "Pause (cutter error)"),
            (34, "Pause (first layer error)"),
            (35, "Pause (nozzle clog)"),
            (36, "Measuring motion precision"),
            (37, "Enhancing motion precision"),
            (38, "Measure motion accuracy"),
            (39, "Nozzle offset calibration"),
            (40, "High temperature auto bed leveling"),
            (41, "Auto Check: Quick Release Lever"),
            (42, "Auto Check: Door and Upper Cover"),
            (43, "Laser Calibration"),
            (44, "Auto Check: Platform"),
            (45, "Confirming BirdsEye Camera location"),
            (46, "Calibrating BirdsEye Camera"),
            (47, "Auto bed leveling - phase 1"),
            (48, "Auto bed leveling - phase 2"),
            (49, "Heating chamber"),
            (50, "Cooling heatbed"),
            (51, "Printing calibration lines"),
            (52, "Auto Check: Material"),
            (53, "Live View Camera Calibration"),
            (54, "Waiting for heatbed target temperature"),
            (55, "Auto Check: Material Position"),
            (56, "Cutting Module Offset Calibration"),
            (57, "Measuring Surface"),
            (58, "Thermal Preconditioning for first layer"),
            (59, "Homing Blade Holder"),
            (60, "Calibrating Camera Offset"),
            (61, "Calibrating Blade Holder Position"),
            (62, "Hotend Pick and Place Test"),
            (63, "Waiting for chamber temperature to equalize"),
            (64, "Preparing Hotend"),
            (65, "Calibrating detection position of nozzle clumping"),
            (66, "Purifying the chamber air"),
        ];
        entries.iter().copied().collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_known_aliases() {
        assert_eq!(PrinterGcodeState::normalize(Some("PRINTING")), PrinterGcodeState::Running);
        assert_eq!(PrinterGcodeState::normalize(Some("FINISHED")), PrinterGcodeState::Finish);
        assert_eq!(PrinterGcodeState::normalize(Some("paused")), PrinterGcodeState::Pause);
        assert_eq!(PrinterGcodeState::normalize(Some("FAIL")), PrinterGcodeState::Failed);
        assert_eq!(PrinterGcodeState::normalize(None), PrinterGcodeState::Unknown);
        assert_eq!(PrinterGcodeState::normalize(Some("")), PrinterGcodeState::Unknown);
    }

    #[test]
    fn stage_label_falls_back_for_unknown_codes() {
        assert_eq!(resolve_stage_label(0), "Printing");
        assert_eq!(resolve_stage_label(66), "Purifying the chamber air");
        assert_eq!(resolve_stage_label(999), "Stage 999");
    }

    #[test]
    fn resolves_ams_status_word() {
        let (main, sub) = resolve_ams_status(0x0402);
        assert_eq!(main, AmsStatusMain::Calibration);
        assert_eq!(sub, AmsSubStatus::HeatNozzle);
        let (main, sub) = resolve_ams_status(0xFFFF);
        assert_eq!(main, AmsStatusMain::Unknown);
        assert_eq!(sub, AmsSubStatus::Unknown);
    }

    #[test]
    fn decodes_home_flag_bits() {
        let raw = (1 << 0) | (1 << 7) | (1 << 19) | (1 << 20) | (1 << 8);
        let (features, sd_state) = parse_home_flag(Some(raw));
        assert_eq!(sd_state.as_str(), "HAS_SDCARD_NORMAL");
        let x_axis = features.iter().find(|f| f.key == "X_AXIS_AT_HOME").unwrap();
        assert_eq!(x_axis.enabled, Some(true));
        let tangle = features.iter().find(|f| f.key == "FILAMENT_TANGLE_DETECT").unwrap();
        assert_eq!(tangle.supported, Some(true));
        assert_eq!(tangle.enabled, Some(true));
    }

    #[test]
    fn parse_home_flag_none_is_empty() {
        let (features, sd_state) = parse_home_flag(None);
        assert!(features.is_empty());
        assert_eq!(sd_state.as_str(), "NO_SDCARD");
    }
}
