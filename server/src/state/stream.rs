//! Stream Service (§4.6): versioned snapshot + diff fan-out over bounded
//! per-subscriber queues, with back-pressure drop when a slow consumer's
//! queue fills.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use crate::models::PrinterState;

const SUBSCRIBER_QUEUE_CAPACITY: usize = 200;

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Snapshot { version: u64, printer_id: String, state: Value },
    Diff { version: u64, printer_id: String, changes: Value },
}

struct Subscriber {
    id: u64,
    printer_filter: Option<String>,
    tx: mpsc::Sender<Option<StreamEvent>>,
}

struct PrinterStreamState {
    version: AtomicU64,
    last_serialized: RwLock<Option<Value>>,
}

impl Default for PrinterStreamState {
    fn default() -> Self {
        Self { version: AtomicU64::new(0), last_serialized: RwLock::new(None) }
    }
}

#[derive(Default)]
pub struct StreamService {
    subscribers: RwLock<Vec<Subscriber>>,
    next_subscriber_id: AtomicU64,
    per_printer: RwLock<HashMap<String, Arc<PrinterStreamState>>>,
}

impl StreamService {
    pub fn new() -> Self {
        Self::default()
    }

    async fn printer_state(&self, printer_id: &str) -> Arc<PrinterStreamState> {
        if let Some(s) = self.per_printer.read().await.get(printer_id) {
            return s.clone();
        }
        self.per_printer.write().await.entry(printer_id.to_string()).or_default().clone()
    }

    /// Register a new subscriber, returning its receiver and id (used to
    /// unregister on disconnect).
    pub async fn subscribe(&self, printer_filter: Option<String>) -> (u64, mpsc::Receiver<Option<StreamEvent>>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.write().await.push(Subscriber { id, printer_filter, tx });
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.subscribers.write().await.retain(|s| s.id != id);
    }

    /// Seed a fresh subscription with a full snapshot and bump the version.
    pub async fn build_snapshot(&self, printer_id: &str, state: &PrinterState) -> StreamEvent {
        let printer_state = self.printer_state(printer_id).await;
        let serialized = serde_json::to_value(state).unwrap_or(Value::Null);
        let version = printer_state.version.fetch_add(1, Ordering::SeqCst) + 1;
        *printer_state.last_serialized.write().await = Some(serialized.clone());
        StreamEvent::Snapshot { version, printer_id: printer_id.to_string(), state: serialized }
    }

    /// Diff `state` against the last published snapshot for `printer_id`
    /// and broadcast to matching subscribers. No-op if nothing changed.
    pub async fn publish(&self, printer_id: &str, state: &PrinterState) {
        let printer_state = self.printer_state(printer_id).await;
        let serialized = serde_json::to_value(state).unwrap_or(Value::Null);

        let event = {
            let mut last = printer_state.last_serialized.write().await;
            let event = match last.as_ref() {
                None => {
                    let version = printer_state.version.fetch_add(1, Ordering::SeqCst) + 1;
                    StreamEvent::Snapshot { version, printer_id: printer_id.to_string(), state: serialized.clone() }
                }
                Some(prev) => {
                    let mut changes = serde_json::Map::new();
                    diff_into(prev, &serialized, String::new(), &mut changes);
                    if changes.is_empty() {
                        *last = Some(serialized);
                        return;
                    }
                    let version = printer_state.version.fetch_add(1, Ordering::SeqCst) + 1;
                    StreamEvent::Diff { version, printer_id: printer_id.to_string(), changes: Value::Object(changes) }
                }
            };
            *last = Some(serialized);
            event
        };

        self.broadcast(printer_id, event).await;
    }

    async fn broadcast(&self, printer_id: &str, event: StreamEvent) {
        let mut dead = Vec::new();
        let subscribers = self.subscribers.read().await;
        for sub in subscribers.iter() {
            if let Some(filter) = &sub.printer_filter {
                if filter != printer_id {
                    continue;
                }
            }
            if sub.tx.try_send(Some(event.clone())).is_err() {
                dead.push(sub.id);
                let _ = sub.tx.try_send(None);
            }
        }
        drop(subscribers);
        if !dead.is_empty() {
            self.subscribers.write().await.retain(|s| !dead.contains(&s.id));
        }
    }
}

/// Recursive dotted-path diff: new/changed scalars emit `path -> value`,
/// missing keys emit `path -> null`, unchanged nested objects recurse.
fn diff_into(old: &Value, new: &Value, prefix: String, out: &mut serde_json::Map<String, Value>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, new_val) in new_map {
                let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
                match old_map.get(key) {
                    Some(old_val) if old_val == new_val => {}
                    Some(old_val) if old_val.is_object() && new_val.is_object() => {
                        diff_into(old_val, new_val, path, out);
                    }
                    _ => {
                        out.insert(path, new_val.clone());
                    }
                }
            }
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
                    out.insert(path, Value::Null);
                }
            }
        }
        _ if old != new => {
            out.insert(prefix, new.clone());
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diff_reports_dotted_paths() {
        let old = json!({"print": {"percent": 10, "file": "a.3mf"}});
        let new = json!({"print": {"percent": 42, "file": "a.3mf"}});
        let mut out = serde_json::Map::new();
        diff_into(&old, &new, String::new(), &mut out);
        assert_eq!(out.get("print.percent"), Some(&json!(42)));
        assert!(!out.contains_key("print.file"));
    }

    #[tokio::test]
    async fn publish_emits_snapshot_then_diff() {
        let service = StreamService::new();
        let (_, mut rx) = service.subscribe(None).await;
        let state = PrinterState::default();
        service.publish("p1", &state).await;
        let first = rx.recv().await.unwrap().unwrap();
        assert!(matches!(first, StreamEvent::Snapshot { version: 1, .. }));

        let mut changed = PrinterState::default();
        changed.print.percent = 5;
        service.publish("p1", &changed).await;
        let second = rx.recv().await.unwrap().unwrap();
        assert!(matches!(second, StreamEvent::Diff { version: 2, .. }));
    }

    #[tokio::test]
    async fn unchanged_state_emits_nothing() {
        let service = StreamService::new();
        let (_, mut rx) = service.subscribe(None).await;
        let state = PrinterState::default();
        service.publish("p1", &state).await;
        rx.recv().await.unwrap();
        service.publish("p1", &state).await;
        assert!(rx.try_recv().is_err());
    }
}
