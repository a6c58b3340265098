//! State Assembler (§4.4): pure(ish) transform from the deep-merged raw
//! MQTT payload into the typed [`PrinterState`] snapshot. HMS/print-error
//! description lookups read a small cached JSON table from disk but never
//! mutate the master document.

use std::path::Path;

use chrono::{Local, Timelike};
use serde_json::Value;

use crate::hms;
use crate::models::domain::{parse_home_flag, resolve_ams_status, resolve_stage_label, PrinterGcodeState};
use crate::models::{
    AmsStatus, AmsTray, AmsUnit, ExternalSpool, HmsError, LastSentProjectFile, PrintError, PrintStatus,
};
use crate::services::capability;
use crate::services::print_again;

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn as_i64(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn as_u32(v: &Value) -> Option<u32> {
    as_i64(v).and_then(|n| u32::try_from(n).ok())
}

fn get<'a>(obj: &'a Value, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

fn get_str(obj: &Value, key: &str) -> Option<String> {
    get(obj, key).and_then(|v| v.as_str().map(str::to_string))
}

/// Parse a slot/tray integer that may arrive as a decimal or hex-looking
/// string.
fn parse_slot_int(v: &Value) -> Option<i32> {
    if let Some(n) = v.as_i64() {
        return i32::try_from(n).ok();
    }
    let s = v.as_str()?;
    if let Ok(n) = s.parse::<i32>() {
        return Some(n);
    }
    i32::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

fn decode_tray_bits(bits: Option<i64>, count: usize) -> Vec<bool> {
    let bits = bits.unwrap_or(0);
    (0..count).map(|i| bits & (1 << i) != 0).collect()
}

fn hex_string_field(obj: &Value, key: &str) -> String {
    get(obj, key).and_then(as_i64).map(|n| format!("{n:X}")).unwrap_or_default()
}

/// Input the assembler needs beyond the raw master payload: identity and
/// the command history the repository/orchestrator track outside the
/// merged document.
pub struct AssembleContext<'a> {
    pub serial: &'a str,
    pub model: Option<&'a str>,
    pub data_dir: &'a Path,
    pub last_sent_project_file: Option<&'a LastSentProjectFile>,
    pub printer_online: bool,
}

pub async fn assemble(master: &Value, ctx: &AssembleContext<'_>) -> (PrintStatus, AmsStatus, ExternalSpool_Opt) {
    let print_section = master.get("print").filter(|v| v.is_object()).unwrap_or(master);
    let print = assemble_print(print_section, ctx).await;
    let ams_section = print_section.get("ams").filter(|v| v.is_object()).unwrap_or(print_section);
    let ams = assemble_ams(ams_section, print_section);
    let external = assemble_external_spool(print_section);
    (print, ams, external)
}

pub type ExternalSpool_Opt = Option<ExternalSpool>;

async fn assemble_print(section: &Value, ctx: &AssembleContext<'_>) -> PrintStatus {
    let gcode_state = PrinterGcodeState::normalize(get_str(section, "gcode_state").as_deref());

    let home_flag = get(section, "home_flag").and_then(as_u32);
    let (feature_toggles, sd_state) = parse_home_flag(home_flag);

    let stage = get(section, "stg_cur").and_then(as_i64).unwrap_or(-1);
    let stage_label = resolve_stage_label(stage);
    let stage_history: Vec<i64> = get(section, "stg")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(as_i64).collect())
        .unwrap_or_default();

    let percent = get(section, "mc_percent").and_then(as_i64).unwrap_or(0) as i32;
    let remaining_time = get(section, "mc_remaining_time").and_then(as_i64).unwrap_or(0).max(0);
    let finish_time = if remaining_time > 0 {
        let now = Local::now();
        let total_minutes = now.hour() as i64 * 60 + now.minute() as i64 + remaining_time;
        let total_minutes = total_minutes.rem_euclid(24 * 60);
        Some(format!("{:02}:{:02}", total_minutes / 60, total_minutes % 60))
    } else {
        None
    };

    let layer_num = get(section, "layer_num").and_then(as_i64);
    let total_layer_num = get(section, "total_layer_num").and_then(as_i64);
    let layer = match (layer_num, total_layer_num) {
        (Some(cur), Some(total)) => format!("{cur}/{total}"),
        _ => "0/0".to_string(),
    };

    let file = get_str(section, "subtask_name").or_else(|| get_str(section, "gcode_file"));

    let print_error = get(section, "print_error").and_then(as_i64).filter(|&n| n != 0).map(|code| {
        let hex = hms::int_to_hex_groups(code);
        PrintError { code: hex, description: None, sub_code: None }
    });
    let print_error = match print_error {
        Some(mut pe) => {
            pe.description = hms::describe(ctx.data_dir, ctx.serial, &pe.code).await;
            Some(pe)
        }
        None => None,
    };

    let mut hms_errors = Vec::new();
    if let Some(entries) = get(section, "hms").and_then(|v| v.as_array()) {
        for entry in entries {
            let attr = get(entry, "attr").and_then(as_i64).unwrap_or(0);
            let code = get(entry, "code").and_then(as_i64).unwrap_or(0);
            let raw = format!("{:08X}{:08X}", attr, code);
            let normalized = hms::normalize_code(&raw);
            let description = hms::describe(ctx.data_dir, ctx.serial, &normalized).await;
            hms_errors.push(HmsError { code: normalized, description });
        }
    }

    let mut print = PrintStatus {
        nozzle_temp: get(section, "nozzle_temper").and_then(as_f64),
        nozzle_target_temp: get(section, "nozzle_target_temper").and_then(as_f64),
        bed_temp: get(section, "bed_temper").and_then(as_f64),
        bed_target_temp: get(section, "bed_target_temper").and_then(as_f64),
        chamber_temp: get(section, "chamber_temper").and_then(as_f64),
        chamber_target_temp: None,
        stage,
        stage_label,
        stage_history,
        percent,
        remaining_time,
        layer,
        gcode_state,
        file,
        finish_time,
        nozzle_type: get_str(section, "nozzle_type"),
        nozzle_diameter: get_str(section, "nozzle_diameter"),
        wifi_signal: get_str(section, "wifi_signal"),
        fan_gear: get(section, "fan_gear").and_then(as_i64).unwrap_or(0),
        print_error,
        hms_errors,
        chamber_light: get(section, "chamber_light").and_then(|v| v.as_bool()).unwrap_or(false),
        timelapse_enabled: get_str(section, "ipcam")
            .map(|_| false)
            .unwrap_or_else(|| get(section, "ipcam").and_then(|v| get_str(v, "timelapse")).as_deref() == Some("enable")),
        sdcard_state: Some(sd_state.as_str().to_string()),
        firmware_version: find_firmware_version(section),
        feature_toggles,
        skipped_objects: get(section, "s_obj")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(as_i64).collect())
            .unwrap_or_default(),
        skip_object_state: None,
        print_again: Default::default(),
    };

    print.print_again = print_again::evaluate(&print, ctx.last_sent_project_file, ctx.printer_online);
    print
}

fn find_firmware_version(section: &Value) -> Option<String> {
    let modules = section.get("info").and_then(|info| info.get("module")).and_then(|v| v.as_array())?;
    modules.iter().find_map(|m| {
        let name = m.get("name").and_then(|v| v.as_str())?;
        if name.contains("ota") || name.contains("mc") {
            m.get("sw_ver").and_then(|v| v.as_str()).map(str::to_string)
        } else {
            None
        }
    })
}

fn assemble_external_spool(section: &Value) -> Option<ExternalSpool> {
    let vt = section.get("vt_tray").filter(|v| v.is_object())?;
    Some(ExternalSpool {
        id: get(vt, "id").and_then(as_i64).map(|n| n.to_string()).unwrap_or_default(),
        material: get_str(vt, "tray_sub_brands").unwrap_or_else(|| "External Spool".to_string()),
        remain: get(vt, "remain").and_then(as_i64).unwrap_or(0) as i32,
        color: get_str(vt, "tray_color").unwrap_or_else(|| "000000FF".to_string()),
        nozzle_min: get_str(vt, "nozzle_temp_min").unwrap_or_else(|| "?".to_string()),
        nozzle_max: get_str(vt, "nozzle_temp_max").unwrap_or_else(|| "?".to_string()),
        tray_type: get_str(vt, "tray_type").unwrap_or_else(|| "External Spool".to_string()),
        tray_info_idx: get_str(vt, "tray_info_idx").unwrap_or_default(),
    })
}

fn build_tray(entry: &Value) -> AmsTray {
    AmsTray {
        id: get(entry, "id").and_then(as_i64).map(|n| n.to_string()).unwrap_or_default(),
        material: get_str(entry, "tray_sub_brands").unwrap_or_else(|| "Empty".to_string()),
        remain: get(entry, "remain").and_then(as_i64).unwrap_or(0) as i32,
        color: get_str(entry, "tray_color").unwrap_or_else(|| "000000FF".to_string()),
        nozzle_min: get_str(entry, "nozzle_temp_min").unwrap_or_else(|| "?".to_string()),
        nozzle_max: get_str(entry, "nozzle_temp_max").unwrap_or_else(|| "?".to_string()),
        tray_type: get_str(entry, "tray_type").unwrap_or_else(|| "Unknown".to_string()),
        tray_info_idx: get_str(entry, "tray_info_idx").unwrap_or_default(),
    }
}

fn assemble_ams(ams_section: &Value, print_section: &Value) -> AmsStatus {
    let units_raw = ams_section.get("ams").and_then(|v| v.as_array());
    let mut ams_units = Vec::new();
    if let Some(units) = units_raw {
        for unit in units {
            let trays = unit
                .get("tray")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().map(build_tray).collect())
                .unwrap_or_default();
            let product_name = get_str(unit, "info");
            ams_units.push(AmsUnit {
                id: get(unit, "id").and_then(as_i64).map(|n| n.to_string()).unwrap_or_default(),
                ams_id: get(unit, "id").and_then(as_i64).unwrap_or(0) as i32,
                humidity: get_str(unit, "humidity"),
                temp: get_str(unit, "temp"),
                firmware: get_str(unit, "sw_ver"),
                product_name: product_name.clone(),
                capabilities: capability::apply_ams_capabilities(product_name.as_deref()),
                trays,
            });
        }
    }

    let status_word = get(ams_section, "ams_status").and_then(as_u32).unwrap_or(0);
    let (main, sub) = resolve_ams_status(status_word);

    let ams_exist_bits = get(print_section, "ams_exist_bits").and_then(as_i64);
    let hub_connected = if ams_exist_bits.unwrap_or(0) != 0 { "Connected" } else { "Disconnected" };

    let tray_exist_bits = get(print_section, "tray_exist_bits").and_then(as_i64);

    AmsStatus {
        hub_connected: hub_connected.to_string(),
        status_main: Some(format!("{main:?}")),
        status_sub: Some(format!("{sub:?}")),
        total_ams: ams_units.len() as i32,
        tray_exist_bits: hex_string_field(print_section, "tray_exist_bits"),
        tray_is_bbl_bits: hex_string_field(print_section, "tray_is_bbl_bits"),
        tray_read_done_bits: hex_string_field(print_section, "tray_read_done_bits"),
        tray_reading_bits: hex_string_field(print_section, "tray_reading_bits"),
        tray_exist_slots: decode_tray_bits(tray_exist_bits, 4),
        active_tray_index: get(print_section, "tray_now").and_then(parse_slot_int),
        external_spool: None,
        ams_units,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx<'a>(data_dir: &'a Path) -> AssembleContext<'a> {
        AssembleContext {
            serial: "01S00A123456789",
            model: None,
            data_dir,
            last_sent_project_file: None,
            printer_online: true,
        }
    }

    #[tokio::test]
    async fn assembles_gcode_state_and_layer() {
        let master = json!({
            "print": {
                "gcode_state": "PRINTING",
                "layer_num": 10,
                "total_layer_num": 30,
                "mc_percent": 42,
            }
        });
        let dir = std::env::temp_dir();
        let (print, _ams, _spool) = assemble(&master, &ctx(&dir)).await;
        assert_eq!(print.gcode_state, PrinterGcodeState::Running);
        assert_eq!(print.layer, "10/30");
        assert_eq!(print.percent, 42);
    }

    #[tokio::test]
    async fn missing_layer_info_defaults_to_zero_sentinel() {
        let master = json!({"print": {"gcode_state": "IDLE"}});
        let dir = std::env::temp_dir();
        let (print, _ams, _spool) = assemble(&master, &ctx(&dir)).await;
        assert_eq!(print.layer, "0/0");
    }

    #[tokio::test]
    async fn ams_total_matches_unit_count_and_tray_slots_decode() {
        let master = json!({
            "print": {
                "tray_exist_bits": 5,
                "ams": {
                    "ams_status": 0,
                    "ams": [
                        {"id": 0, "humidity": "30", "temp": "25", "tray": [{"id": 0, "tray_color": "FF0000FF"}]}
                    ]
                }
            }
        });
        let dir = std::env::temp_dir();
        let (_print, ams, _spool) = assemble(&master, &ctx(&dir)).await;
        assert_eq!(ams.total_ams, ams.ams_units.len() as i32);
        assert_eq!(ams.tray_exist_slots, vec![true, false, true, false]);
    }
}
