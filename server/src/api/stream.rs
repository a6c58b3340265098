//! `GET /api/state/stream` (§4.6, §6.1): SSE snapshot-then-diff feed.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use serde::Deserialize;

use crate::state::stream::StreamEvent;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub printer_id: Option<String>,
}

pub async fn state_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let registry = state.registry.clone();
    let printer_id = query.printer_id.clone();

    let sse_stream = stream! {
        let (sub_id, mut rx) = registry.stream.subscribe(printer_id.clone()).await;

        if let Some(id) = printer_id.as_deref() {
            let snapshot_state = registry.state.repository().get_state(id).await;
            let snapshot = registry.stream.build_snapshot(id, &snapshot_state).await;
            if let Some(event) = encode(snapshot) {
                yield Ok(event);
            }
        }

        while let Some(item) = rx.recv().await {
            let Some(event) = item else { break };
            if let Some(event) = encode(event) {
                yield Ok(event);
            }
        }

        registry.stream.unsubscribe(sub_id).await;
    };

    Sse::new(sse_stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping"))
}

fn encode(event: StreamEvent) -> Option<Event> {
    let (name, version, printer_id, body) = match event {
        StreamEvent::Snapshot { version, printer_id, state } => ("snapshot", version, printer_id, state),
        StreamEvent::Diff { version, printer_id, changes } => ("diff", version, printer_id, changes),
    };
    let payload = serde_json::json!({"printer_id": printer_id, "data": body});
    serde_json::to_string(&payload).ok().map(|data| Event::default().event(name).id(version.to_string()).data(data))
}
