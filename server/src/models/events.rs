//! Discrete printer events derived from state transitions (§4.7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::domain::PrinterGcodeState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterEvent {
    pub id: String,
    pub printer_id: String,
    pub gcode_state: PrinterGcodeState,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub percent: Option<i32>,
    pub layer: Option<String>,
    pub remaining_time: Option<i64>,
    pub finish_time: Option<String>,
    pub speed_level: Option<i32>,
    pub file: Option<String>,
}

impl PrinterEvent {
    pub fn new(printer_id: impl Into<String>, gcode_state: PrinterGcodeState, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            printer_id: printer_id.into(),
            gcode_state,
            message: message.into(),
            created_at: Utc::now(),
            percent: None,
            layer: None,
            remaining_time: None,
            finish_time: None,
            speed_level: None,
            file: None,
        }
    }
}
