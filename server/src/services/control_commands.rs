//! Control Command Builders (§4.13): pure functions producing the JSON
//! payloads published to `device/<serial>/request`. No I/O — every
//! validation failure is a [`DomainError::BadRequest`] the caller
//! surfaces directly, never a panic.

use serde_json::{json, Value};

use crate::errors::{DomainError, DomainResult};

/// Feature toggle keys accepted by `POST /api/control/features/toggle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKey {
    BuildplateMarkerDetector,
    CameraRecording,
    AmsDetectRemain,
    AmsOnStartup,
    StepLossRecovery,
    PromptSound,
    FilamentTangleDetect,
    AmsAutoRefill,
    AirPrintDetection,
    NozzleBlobDetection,
}

impl FeatureKey {
    pub fn parse(key: &str) -> DomainResult<Self> {
        match key {
            "BUILDPLATE_MARKER_DETECTOR" => Ok(Self::BuildplateMarkerDetector),
            "CAMERA_RECORDING" => Ok(Self::CameraRecording),
            "AMS_DETECT_REMAIN" => Ok(Self::AmsDetectRemain),
            "AMS_ON_STARTUP" => Ok(Self::AmsOnStartup),
            "STEP_LOSS_RECOVERY" => Ok(Self::StepLossRecovery),
            "PROMPT_SOUND" => Ok(Self::PromptSound),
            "FILAMENT_TANGLE_DETECT" => Ok(Self::FilamentTangleDetect),
            "AMS_AUTO_REFILL" => Ok(Self::AmsAutoRefill),
            "AIR_PRINT_DETECTION" => Ok(Self::AirPrintDetection),
            "NOZZLE_BLOB_DETECTION" => Ok(Self::NozzleBlobDetection),
            other => Err(DomainError::BadRequest(format!("unknown feature key: {other}"))),
        }
    }
}

/// `ams_change_filament`: load a slot (`slot` = tray id) or unload
/// (`slot = None`).
pub fn ams_change_filament(slot: Option<i32>) -> Value {
    let (slot_id, tar_temp, curr_temp) = match slot {
        Some(id) => (id, -1, -1),
        None => (255, 210, 210),
    };
    json!({
        "print": {
            "command": "ams_change_filament",
            "target": slot.unwrap_or(255),
            "slot_id": slot_id,
            "curr_temp": curr_temp,
            "tar_temp": tar_temp,
        }
    })
}

pub fn nozzle_accessory(nozzle_type: &str, nozzle_diameter: &str) -> Value {
    json!({
        "system": {
            "command": "set_accessories",
            "accessory_type": "nozzle",
            "nozzle_type": nozzle_type,
            "nozzle_diameter": nozzle_diameter,
        }
    })
}

/// Normalize a color string to 8-char uppercase hex (`RGBA`). Accepts
/// `#RGB`, `#RRGGBB`, `#RRGGBBAA` (with or without `#`).
pub fn normalize_color(raw: &str) -> DomainResult<String> {
    let hex: String = raw.trim_start_matches('#').to_ascii_uppercase();
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DomainError::BadRequest(format!("invalid color: {raw}")));
    }
    match hex.len() {
        3 => Ok(hex.chars().flat_map(|c| [c, c]).chain("FF".chars()).collect()),
        6 => Ok(format!("{hex}FF")),
        8 => Ok(hex),
        _ => Err(DomainError::BadRequest(format!("invalid color length: {raw}"))),
    }
}

/// Normalize a nozzle diameter to one decimal place, e.g. `"0.4"`.
pub fn normalize_nozzle_diameter(raw: f64) -> String {
    format!("{raw:.1}")
}

/// `ams_filament_setting` + `extrusion_cali_sel`: two sequential commands
/// published in order.
pub fn ams_filament_setting(
    tray_info_idx: &str,
    tray_type: &str,
    color: &str,
    nozzle_diameter: f64,
) -> DomainResult<(Value, Value)> {
    if tray_info_idx.is_empty() || tray_type.is_empty() {
        return Err(DomainError::BadRequest("tray_info_idx and tray_type are required".into()));
    }
    let normalized_color = normalize_color(color)?;
    let diameter = normalize_nozzle_diameter(nozzle_diameter);

    let setting = json!({
        "print": {
            "command": "ams_filament_setting",
            "tray_info_idx": tray_info_idx,
            "tray_type": tray_type,
            "tray_color": normalized_color,
        }
    });
    let cali_sel = json!({
        "print": {
            "command": "extrusion_cali_sel",
            "tray_info_idx": tray_info_idx,
            "nozzle_diameter": diameter,
        }
    });
    Ok((setting, cali_sel))
}

/// `skip_objects`: validate ids are new, at least one remaining object
/// survives, and the plate stays within the 64-object ceiling.
pub fn skip_objects(
    already_skipped: &[i64],
    new_ids: &[i64],
    total_objects: usize,
) -> DomainResult<Value> {
    if total_objects > 64 {
        return Err(DomainError::BadRequest("plate object count is limited to 64".into()));
    }
    if new_ids.is_empty() {
        return Err(DomainError::BadRequest("at least one object id must be provided".into()));
    }
    let mut combined: Vec<i64> = already_skipped.to_vec();
    for id in new_ids {
        if !combined.contains(id) {
            combined.push(*id);
        }
    }
    if total_objects as i64 - (combined.len() as i64) < 1 {
        return Err(DomainError::BadRequest("at least one object must remain after skipping".into()));
    }
    Ok(json!({
        "print": {
            "command": "skip_objects",
            "obj_list": combined,
        }
    }))
}

pub fn chamber_light(on: bool) -> Value {
    json!({
        "system": {
            "command": "ledctrl",
            "led_node": "chamber_light",
            "led_mode": if on { "on" } else { "off" },
        }
    })
}

pub fn pushall() -> Value {
    json!({"pushing": {"command": "pushall"}})
}

pub fn get_version() -> Value {
    json!({"info": {"command": "get_version"}})
}

pub fn heartbeat() -> Value {
    json!({"print": {"command": "heartbeat"}})
}

/// Dispatch a feature toggle to its wire command. Paired (support, enabled)
/// toggles publish `print_option`/AMS-setting commands with the matching
/// field name; two keys route to device subsystems entirely.
pub fn feature_toggle(key: FeatureKey, enabled: bool) -> Value {
    match key {
        FeatureKey::BuildplateMarkerDetector => json!({
            "xcam": {"command": "set_buildplate_marker_detector", "control": enabled}
        }),
        FeatureKey::CameraRecording => json!({
            "camera": {"command": "ipcam_record_set", "control": enabled}
        }),
        FeatureKey::AmsDetectRemain => json!({
            "print": {"command": "ams_user_setting", "ams_detect_enable": enabled}
        }),
        FeatureKey::AmsOnStartup => json!({
            "print": {"command": "ams_user_setting", "ams_auto_switch": enabled}
        }),
        FeatureKey::StepLossRecovery => print_option("auto_recovery", enabled),
        FeatureKey::PromptSound => print_option("sound_enable", enabled),
        FeatureKey::FilamentTangleDetect => print_option("filament_tangle_detect", enabled),
        FeatureKey::AmsAutoRefill => print_option("auto_switch_filament", enabled),
        FeatureKey::AirPrintDetection => print_option("air_print_detect", enabled),
        FeatureKey::NozzleBlobDetection => print_option("nozzle_blob_detect", enabled),
    }
}

fn print_option(field: &str, enabled: bool) -> Value {
    json!({"print": {"command": "print_option", field: enabled}})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_and_unload_use_distinct_slot_ids() {
        let load = ams_change_filament(Some(2));
        assert_eq!(load["print"]["slot_id"], 2);
        assert_eq!(load["print"]["tar_temp"], load["print"]["curr_temp"]);
        assert_eq!(load["print"]["curr_temp"], -1);
        let unload = ams_change_filament(None);
        assert_eq!(unload["print"]["slot_id"], 255);
        assert_eq!(unload["print"]["curr_temp"], 210);
        assert_eq!(unload["print"]["tar_temp"], unload["print"]["curr_temp"]);
    }

    #[test]
    fn short_hex_colors_expand_with_alpha() {
        assert_eq!(normalize_color("#f00").unwrap(), "FF0000FF");
        assert_eq!(normalize_color("00ff00").unwrap(), "00FF00FF");
        assert_eq!(normalize_color("00FF00AA").unwrap(), "00FF00AA");
        assert!(normalize_color("nothex").is_err());
    }

    #[test]
    fn skip_objects_rejects_when_nothing_remains() {
        let result = skip_objects(&[], &[1, 2, 3], 3);
        assert!(result.is_err());
    }

    #[test]
    fn skip_objects_rejects_over_64_objects() {
        let result = skip_objects(&[], &[1], 65);
        assert!(result.is_err());
    }

    #[test]
    fn skip_objects_accepts_partial_skip() {
        let result = skip_objects(&[], &[1, 2], 3).unwrap();
        assert_eq!(result["print"]["obj_list"], json!([1, 2]));
    }

    #[test]
    fn feature_toggle_routes_paired_bits_to_print_option() {
        let value = feature_toggle(FeatureKey::PromptSound, true);
        assert_eq!(value["print"]["command"], "print_option");
        assert_eq!(value["print"]["sound_enable"], true);
    }
}
