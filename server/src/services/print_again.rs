//! "Print again" eligibility derivation (§4.11): whether the last
//! `project_file` command can be safely resubmitted for the file currently
//! loaded on the printer.

use serde_json::json;

use crate::models::{LastSentProjectFile, PrintAgainState, PrintStatus};

fn basename(path: &str) -> String {
    path.rsplit(['/', '\\']).next().unwrap_or(path).to_string()
}

pub fn evaluate(print: &PrintStatus, last_sent: Option<&LastSentProjectFile>, online: bool) -> PrintAgainState {
    if !print.gcode_state.is_finished_state() {
        return PrintAgainState {
            visible: false,
            enabled: false,
            reason: Some("print_in_progress".to_string()),
            payload: None,
        };
    }

    let Some(last_sent) = last_sent else {
        return PrintAgainState {
            visible: false,
            enabled: false,
            reason: Some("no_payload".to_string()),
            payload: None,
        };
    };

    let last_name = last_sent.file.as_deref().unwrap_or(&last_sent.url);
    let current_name = print.file.as_deref().unwrap_or("");
    if basename(last_name) != basename(current_name) {
        return PrintAgainState {
            visible: false,
            enabled: false,
            reason: Some("file_mismatch".to_string()),
            payload: None,
        };
    }

    let payload = json!({
        "url": last_sent.url,
        "file": last_sent.file,
        "plate": last_sent.plate,
        "bed_leveling": last_sent.bed_leveling,
        "flow_cali": last_sent.flow_cali,
        "timelapse": last_sent.timelapse,
        "use_ams": last_sent.use_ams,
        "layer_inspect": last_sent.layer_inspect,
        "vibration_cali": last_sent.vibration_cali,
        "ams_mapping": last_sent.ams_mapping,
    });

    PrintAgainState {
        visible: true,
        enabled: online,
        reason: if online { None } else { Some("printer_offline".to_string()) },
        payload: Some(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PrinterGcodeState;

    fn finished_print(file: &str) -> PrintStatus {
        PrintStatus {
            gcode_state: PrinterGcodeState::Finish,
            file: Some(file.to_string()),
            ..Default::default()
        }
    }

    fn sent(url: &str) -> LastSentProjectFile {
        LastSentProjectFile {
            url: url.to_string(),
            file: Some(url.rsplit('/').next().unwrap().to_string()),
            plate: Some("Metadata/plate_1.gcode".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn in_progress_print_is_never_eligible() {
        let print = PrintStatus { gcode_state: PrinterGcodeState::Running, ..Default::default() };
        let result = evaluate(&print, Some(&sent("ftp:///cube.3mf")), true);
        assert!(!result.visible);
        assert_eq!(result.reason.as_deref(), Some("print_in_progress"));
    }

    #[test]
    fn file_mismatch_hides_print_again() {
        let print = finished_print("other.3mf");
        let result = evaluate(&print, Some(&sent("ftp:///cube.3mf")), true);
        assert_eq!(result.reason.as_deref(), Some("file_mismatch"));
    }

    #[test]
    fn finished_matching_file_is_eligible_when_online() {
        let print = finished_print("cube.3mf");
        let result = evaluate(&print, Some(&sent("ftp:///cube.3mf")), true);
        assert!(result.visible);
        assert!(result.enabled);
        assert!(result.reason.is_none());
    }

    #[test]
    fn offline_printer_is_visible_but_disabled() {
        let print = finished_print("cube.3mf");
        let result = evaluate(&print, Some(&sent("ftp:///cube.3mf")), false);
        assert!(result.visible);
        assert!(!result.enabled);
        assert_eq!(result.reason.as_deref(), Some("printer_offline"));
    }
}
