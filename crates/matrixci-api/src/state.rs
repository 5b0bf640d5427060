//! Application state.

use matrixci_scheduler::{RunRegistry, TriggerDispatcher};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<TriggerDispatcher>,
    pub registry: RunRegistry,
    /// Shared secret for `X-Hub-Signature-256`; signatures are not checked
    /// when unset.
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(dispatcher: TriggerDispatcher) -> Self {
        let registry = dispatcher.registry().clone();
        Self {
            dispatcher: Arc::new(dispatcher),
            registry,
            webhook_secret: None,
        }
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<Arc<str>>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }
}
