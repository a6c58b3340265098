//! Event Service (§4.7): derives discrete events from snapshot
//! transitions on three channels (`gcode_state`, `print_error`,
//! `hms_errors`) and keeps a bounded, newest-first ring per printer.

use std::collections::{HashMap, VecDeque};

use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::models::{PrinterEvent, PrinterGcodeState, PrinterState};

const RING_CAPACITY: usize = 50;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
enum Channel {
    GcodeState,
    PrintError,
    HmsErrors,
}

#[derive(Default)]
pub struct EventService {
    snapshots: RwLock<HashMap<(String, &'static str), Value>>,
    events: RwLock<HashMap<String, VecDeque<PrinterEvent>>>,
}

impl EventService {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel_key(channel: Channel) -> &'static str {
        match channel {
            Channel::GcodeState => "gcode_state",
            Channel::PrintError => "print_error",
            Channel::HmsErrors => "hms_errors",
        }
    }

    async fn changed(&self, printer_id: &str, channel: Channel, value: Value) -> bool {
        let key = (printer_id.to_string(), Self::channel_key(channel));
        let mut snapshots = self.snapshots.write().await;
        let changed = snapshots.get(&key) != Some(&value);
        snapshots.insert(key, value);
        changed
    }

    async fn push_event(&self, printer_id: &str, event: PrinterEvent) {
        let mut events = self.events.write().await;
        let ring = events.entry(printer_id.to_string()).or_default();
        ring.push_front(event);
        while ring.len() > RING_CAPACITY {
            ring.pop_back();
        }
    }

    /// Observe a newly-assembled snapshot and emit whichever events fired.
    /// Intended to be wired into the [`crate::state::Notifier`] as a hook.
    pub async fn observe(&self, printer_id: String, state: PrinterState) {
        let gcode_state = state.print.gcode_state;
        if self.changed(&printer_id, Channel::GcodeState, json!(gcode_state.as_str())).await
            && matches!(gcode_state, PrinterGcodeState::Finish | PrinterGcodeState::Pause)
        {
            let message = match gcode_state {
                PrinterGcodeState::Finish => "Print finished",
                PrinterGcodeState::Pause => "Print paused",
                _ => unreachable!(),
            };
            let mut event = PrinterEvent::new(&printer_id, gcode_state, message);
            event.percent = Some(state.print.percent);
            event.layer = Some(state.print.layer.clone());
            event.remaining_time = Some(state.print.remaining_time);
            event.finish_time = state.print.finish_time.clone();
            event.file = state.print.file.clone();
            self.push_event(&printer_id, event).await;
        }

        let error_value = state
            .print
            .print_error
            .as_ref()
            .map(|e| json!({"code": e.code, "description": e.description, "sub_code": e.sub_code}))
            .unwrap_or(Value::Null);
        if error_value != Value::Null && self.changed(&printer_id, Channel::PrintError, error_value.clone()).await {
            let description = error_value.get("description").and_then(|v| v.as_str()).unwrap_or("unknown error");
            let event = PrinterEvent::new(&printer_id, gcode_state, format!("Print error detected: {description}"));
            self.push_event(&printer_id, event).await;
        }

        let first_hms = state.print.hms_errors.first().map(|e| json!({"code": e.code, "description": e.description}));
        if let Some(value) = first_hms {
            if self.changed(&printer_id, Channel::HmsErrors, value.clone()).await {
                let description = value.get("description").and_then(|v| v.as_str()).unwrap_or("unknown error");
                let event = PrinterEvent::new(&printer_id, gcode_state, format!("HMS error detected: {description}"));
                self.push_event(&printer_id, event).await;
            }
        }
    }

    pub async fn list_events(&self, printer_id: Option<&str>, limit: usize) -> Vec<PrinterEvent> {
        let events = self.events.read().await;
        let mut all: Vec<PrinterEvent> = match printer_id {
            Some(id) => events.get(id).cloned().unwrap_or_default().into_iter().collect(),
            None => events.values().flat_map(|ring| ring.iter().cloned()).collect(),
        };
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        all
    }

    pub async fn clear_events(&self, printer_id: Option<&str>) {
        let mut events = self.events.write().await;
        match printer_id {
            Some(id) => {
                events.remove(id);
            }
            None => events.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PrintStatus;

    fn state_with(gcode_state: PrinterGcodeState) -> PrinterState {
        PrinterState { print: PrintStatus { gcode_state, ..Default::default() }, ..Default::default() }
    }

    #[tokio::test]
    async fn finish_transition_emits_one_event() {
        let service = EventService::new();
        service.observe("p1".into(), state_with(PrinterGcodeState::Running)).await;
        service.observe("p1".into(), state_with(PrinterGcodeState::Finish)).await;
        let events = service.list_events(Some("p1"), 10).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "Print finished");
    }

    #[tokio::test]
    async fn repeated_identical_state_does_not_duplicate_events() {
        let service = EventService::new();
        service.observe("p1".into(), state_with(PrinterGcodeState::Running)).await;
        service.observe("p1".into(), state_with(PrinterGcodeState::Finish)).await;
        service.observe("p1".into(), state_with(PrinterGcodeState::Finish)).await;
        assert_eq!(service.list_events(Some("p1"), 10).await.len(), 1);
    }

    #[tokio::test]
    async fn ring_is_bounded_and_newest_first() {
        let service = EventService::new();
        for _ in 0..60 {
            service.observe("p1".into(), state_with(PrinterGcodeState::Running)).await;
            service.observe("p1".into(), state_with(PrinterGcodeState::Finish)).await;
            service.observe("p1".into(), state_with(PrinterGcodeState::Running)).await;
        }
        let events = service.list_events(Some("p1"), 200).await;
        assert!(events.len() <= 50);
    }
}
