//! Persistent gateway connection
//!
//! The lifecycle coordinator only needs to start a connection, learn when
//! its handshake is done, and close it. `Gateway` is that seam; the
//! WebSocket client is the production implementation.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU8, Ordering};

pub mod protocol;
mod websocket;

pub use protocol::{opcode, GatewayFrame};
pub use websocket::WebSocketGateway;

/// Outbound persistent connection feeding the event pipeline
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Name for logging
    fn name(&self) -> &str;

    /// Begin connecting in the background; returns without waiting for the handshake
    async fn start(&self) -> Result<()>;

    /// Wait until the handshake has completed
    ///
    /// Errors if the gateway is closed before becoming ready.
    async fn wait_ready(&self) -> Result<()>;

    /// Whether the handshake has completed on the current session
    fn is_ready(&self) -> bool;

    /// Release the connection; idempotent
    async fn close(&self) -> Result<()>;
}

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    /// Not started, or closed
    Stopped,
    /// Connecting / handshaking
    Connecting,
    /// Handshake complete
    Ready,
    /// Waiting out backoff after a dropped session
    Reconnecting,
    /// Close requested
    Closing,
}

/// Lock-free status holder shared with the connection task
#[derive(Debug)]
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(GatewayStatus::Stopped as u8))
    }

    pub(crate) fn get(&self) -> GatewayStatus {
        match self.0.load(Ordering::SeqCst) {
            0 => GatewayStatus::Stopped,
            1 => GatewayStatus::Connecting,
            2 => GatewayStatus::Ready,
            3 => GatewayStatus::Reconnecting,
            _ => GatewayStatus::Closing,
        }
    }

    pub(crate) fn set(&self, status: GatewayStatus) {
        self.0.store(status as u8, Ordering::SeqCst);
    }
}
