//! Shared dispatch pipeline, the single entry point for events from every ingress
//!
//! The gateway connection and the webhook listener both hold the same
//! `Arc<dyn EventSink>`, handed to them at construction. Whatever arrives
//! through either path is routed to the handlers registered here, so handler
//! registration and dispatch logic exist exactly once.

use crate::error::{Error, Result};
use crate::types::PipelineEvent;
use async_trait::async_trait;
use tokio::sync::mpsc;

mod handler;

pub use handler::{EventHandler, HandlerRegistry, WILDCARD};

/// Default queue depth between ingress and handler dispatch
pub const DEFAULT_CAPACITY: usize = 1024;

/// Injection seam for events entering the pipeline
///
/// Implementations must accept concurrent injection from any number of
/// tasks. `inject` returns once the event is queued, never after handlers run.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn inject(&self, event: PipelineEvent) -> Result<()>;
}

/// Cloneable sending half of the pipeline
#[derive(Clone)]
pub struct EventPipeline {
    tx: mpsc::Sender<PipelineEvent>,
}

impl EventPipeline {
    /// Create a pipeline, returning the sink handle and the runner that dispatches to handlers
    pub fn new(capacity: usize) -> (Self, PipelineRunner) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self { tx },
            PipelineRunner {
                rx,
                registry: HandlerRegistry::new(),
            },
        )
    }

    /// True once the runner has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl EventSink for EventPipeline {
    async fn inject(&self, event: PipelineEvent) -> Result<()> {
        let event_id = event.id.clone();
        self.tx
            .send(event)
            .await
            .map_err(|_| Error::Pipeline(format!("pipeline closed, dropped event {}", event_id)))
    }
}

/// Receiving half: owns the handler table and fans events out to handlers
pub struct PipelineRunner {
    rx: mpsc::Receiver<PipelineEvent>,
    registry: HandlerRegistry,
}

impl PipelineRunner {
    /// Register a handler for one dispatch name, or [`WILDCARD`] for all
    pub fn register(
        &mut self,
        event_name: impl Into<String>,
        handler: std::sync::Arc<dyn EventHandler>,
    ) -> &mut Self {
        self.registry.register(event_name, handler);
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Dispatch events until every sink handle has been dropped
    ///
    /// Each handler invocation runs on its own task; a slow handler never
    /// delays intake of the next event.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            self.dispatch(event);
        }
        tracing::info!("Event pipeline stopped: all sinks dropped");
    }

    /// Run on a background task
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    fn dispatch(&self, event: PipelineEvent) {
        let handlers = self.registry.handlers_for(&event.name);
        if handlers.is_empty() {
            tracing::debug!(
                event_id = %event.id,
                name = %event.name,
                ingress = %event.ingress,
                "No handler registered for event"
            );
            return;
        }

        for handler in handlers {
            let event = event.clone();
            tokio::spawn(async move {
                let event_id = event.id.clone();
                let name = event.name.clone();
                if let Err(e) = handler.handle(event).await {
                    tracing::warn!(
                        event_id = %event_id,
                        name = %name,
                        handler = handler.name(),
                        error = %e,
                        "Event handler failed"
                    );
                }
            });
        }
    }
}
