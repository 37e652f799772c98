//! # a3s-bridge
//!
//! Gateway plus signed-webhook ingress for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-bridge` keeps a persistent gateway connection to a remote event
//! service alive and, alongside it, serves the HTTP callback route the same
//! service uses to deliver interactions. Both paths feed one shared
//! [`pipeline::EventPipeline`], so handlers are registered once and see
//! events from either ingress.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3s_bridge::{
//!     webhook, BridgeConfig, DispatchBridge, EventPipeline, EventSink, LifecycleCoordinator,
//!     WebSocketGateway, WebhookState,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_bridge::Result<()> {
//! let config = BridgeConfig::load(None)?;
//! config.validate()?;
//!
//! let (pipeline, runner) = EventPipeline::new(1024);
//! runner.spawn();
//! let sink: Arc<dyn EventSink> = Arc::new(pipeline);
//!
//! let gateway = Arc::new(WebSocketGateway::new(config.gateway.clone(), sink.clone()));
//! let state = WebhookState::from_config(config.webhook.clone(), DispatchBridge::new(sink))?;
//!
//! let coordinator = LifecycleCoordinator::new(config.lifecycle.clone(), config.server.bind_addr()?);
//! let report = coordinator.run(gateway, webhook::router(state)).await?;
//! println!("clean shutdown: {}", report.is_clean());
//! # Ok(())
//! # }
//! ```
//!
//! ## Request handling
//!
//! `POST /interactions` is answered in this order:
//!
//! - missing signature headers → `401`
//! - body over the size limit → `413`
//! - signature does not verify over `timestamp || body` → `401`
//! - body is not an object with an integer `type` → `400`
//! - `type == 1` (liveness check) → `200 {"type":1}`
//! - anything else → injected as `INTERACTION_CREATE`, empty `200`
//!
//! ## Architecture
//!
//! - **SignatureVerifier**: Ed25519 check over the timestamp and raw body
//! - **InteractionDecoder**: extracts the interaction kind from a verified body
//! - **WebhookListener** (`webhook`): axum route enforcing verify → decode → dispatch
//! - **DispatchBridge**: fire-and-forget injection into the shared pipeline
//! - **Gateway** trait: persistent connection; `WebSocketGateway` implements it
//! - **LifecycleCoordinator**: gateway ready before the listener binds; concurrent bounded shutdown

pub mod bridge;
pub mod config;
pub mod decode;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod pipeline;
pub mod types;
pub mod verify;
pub mod webhook;

// Re-export core types
pub use bridge::DispatchBridge;
pub use config::BridgeConfig;
pub use decode::{DecodeError, InteractionDecoder};
pub use error::{Error, Result};
pub use gateway::{Gateway, GatewayStatus, WebSocketGateway};
pub use lifecycle::{LifecycleCoordinator, LifecycleState, ReleaseOutcome, ShutdownReport};
pub use pipeline::{EventHandler, EventPipeline, EventSink, HandlerRegistry, PipelineRunner};
pub use types::{
    DispatchResult, Ingress, InteractionEnvelope, InteractionKind, PipelineEvent,
    INTERACTION_CREATE,
};
pub use verify::{SignatureVerifier, VerificationError};
pub use webhook::{WebhookRejection, WebhookState};
