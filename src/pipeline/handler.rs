//! Event handlers and the per-name handler table

use crate::error::Result;
use crate::types::PipelineEvent;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Registration key matching every event name
pub const WILDCARD: &str = "*";

/// Business logic reacting to pipeline events
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: PipelineEvent) -> Result<()>;

    /// Handler name for logging
    fn name(&self) -> &str {
        "anonymous"
    }
}

/// Handlers keyed by dispatch name
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, event_name: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_name = event_name.into();
        tracing::debug!(event = %event_name, handler = handler.name(), "Handler registered");
        self.handlers.entry(event_name).or_default().push(handler);
    }

    /// Handlers for `event_name`: exact matches first, then wildcard handlers
    pub fn handlers_for(&self, event_name: &str) -> Vec<Arc<dyn EventHandler>> {
        let exact = self.handlers.get(event_name).into_iter().flatten();
        let wildcard = if event_name == WILDCARD {
            None
        } else {
            self.handlers.get(WILDCARD)
        };
        exact.chain(wildcard.into_iter().flatten()).cloned().collect()
    }

    /// Total number of registrations
    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
