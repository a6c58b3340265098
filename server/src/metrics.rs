//! Request Metrics (§4.19, C19): a per-path ring buffer of latency
//! samples backing `GET /api/metrics`, with a per-path alert throttle so a
//! sustained error burst logs once a minute rather than once per request.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::warn;

const RING_CAPACITY: usize = 200;
const ALERT_THROTTLE: Duration = Duration::from_secs(60);

struct Sample {
    duration: Duration,
    is_error: bool,
}

#[derive(Default)]
struct PathMetrics {
    samples: VecDeque<Sample>,
    last_alert: Option<Instant>,
}

#[derive(Default)]
pub struct MetricsRegistry {
    paths: Mutex<HashMap<String, PathMetrics>>,
}

#[derive(Debug, Serialize)]
pub struct PathSummary {
    pub path: String,
    pub count: usize,
    pub avg_ms: f64,
    pub p95_ms: f64,
    pub error_rate: f64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, path: &str, duration: Duration, is_error: bool) {
        let mut paths = self.paths.lock().await;
        let entry = paths.entry(path.to_string()).or_default();
        entry.samples.push_back(Sample { duration, is_error });
        while entry.samples.len() > RING_CAPACITY {
            entry.samples.pop_front();
        }
        if is_error {
            let should_alert = entry.last_alert.map(|t| t.elapsed() >= ALERT_THROTTLE).unwrap_or(true);
            if should_alert {
                entry.last_alert = Some(Instant::now());
                warn!(path, "elevated error rate");
            }
        }
    }

    pub async fn summary(&self) -> Vec<PathSummary> {
        let paths = self.paths.lock().await;
        let mut out: Vec<PathSummary> = paths
            .iter()
            .map(|(path, metrics)| {
                let count = metrics.samples.len();
                if count == 0 {
                    return PathSummary { path: path.clone(), count: 0, avg_ms: 0.0, p95_ms: 0.0, error_rate: 0.0 };
                }
                let mut millis: Vec<f64> = metrics.samples.iter().map(|s| s.duration.as_secs_f64() * 1000.0).collect();
                millis.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let avg = millis.iter().sum::<f64>() / count as f64;
                let p95_idx = (((count as f64) * 0.95).ceil() as usize).clamp(1, count) - 1;
                let errors = metrics.samples.iter().filter(|s| s.is_error).count();
                PathSummary {
                    path: path.clone(),
                    count,
                    avg_ms: avg,
                    p95_ms: millis[p95_idx],
                    error_rate: errors as f64 / count as f64,
                }
            })
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }
}

pub async fn track_metrics(State(state): State<Arc<crate::AppState>>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(req).await;
    let is_error = response.status().is_client_error() || response.status().is_server_error();
    state.metrics.record(&path, start.elapsed(), is_error).await;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn summary_computes_avg_and_error_rate() {
        let registry = MetricsRegistry::new();
        registry.record("/api/status", Duration::from_millis(10), false).await;
        registry.record("/api/status", Duration::from_millis(20), false).await;
        registry.record("/api/status", Duration::from_millis(30), true).await;
        let summary = registry.summary().await;
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].count, 3);
        assert!((summary[0].error_rate - (1.0 / 3.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn ring_buffer_is_bounded() {
        let registry = MetricsRegistry::new();
        for _ in 0..RING_CAPACITY + 50 {
            registry.record("/api/status", Duration::from_millis(1), false).await;
        }
        let summary = registry.summary().await;
        assert_eq!(summary[0].count, RING_CAPACITY);
    }
}
