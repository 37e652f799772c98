//! Hand-off from the webhook path into the shared pipeline

use crate::pipeline::EventSink;
use crate::types::{Ingress, InteractionEnvelope, PipelineEvent, INTERACTION_CREATE};
use std::sync::Arc;

/// Injects webhook-delivered interactions into the pipeline the gateway feeds
///
/// Events are named `INTERACTION_CREATE`, the same name the gateway uses for
/// interactions it delivers natively, so one set of handlers serves both.
#[derive(Clone)]
pub struct DispatchBridge {
    sink: Arc<dyn EventSink>,
}

impl DispatchBridge {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Hand the envelope off and return its event id without waiting.
    ///
    /// Queueing happens on a spawned task, so a full pipeline never holds up
    /// the HTTP response. Queueing failures are logged; the caller has
    /// already been answered.
    pub fn inject(&self, envelope: InteractionEnvelope) -> String {
        let event = PipelineEvent::new(INTERACTION_CREATE, Ingress::Webhook, envelope.payload);
        let event_id = event.id.clone();
        let kind = envelope.kind;

        tracing::debug!(event_id = %event_id, kind = %kind, "Injecting webhook interaction");

        let sink = self.sink.clone();
        tokio::spawn(async move {
            let event_id = event.id.clone();
            if let Err(e) = sink.inject(event).await {
                tracing::error!(
                    event_id = %event_id,
                    kind = %kind,
                    error = %e,
                    "Failed to inject webhook interaction"
                );
            }
        });

        event_id
    }
}
