//! Startup and shutdown ordering
//!
//! ```text
//! Idle → ConnectingGateway → GatewayReady → ListenerStarting → Serving → ShuttingDown → Stopped
//! ```
//!
//! The listener socket is bound only after the gateway reports ready, so the
//! webhook route is never reachable while the pipeline has no live gateway
//! behind it. Shutdown releases the listener and the gateway concurrently,
//! each bounded by its own timeout, so one hung resource cannot hold the
//! other.

use crate::config::LifecycleConfig;
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    ConnectingGateway,
    GatewayReady,
    ListenerStarting,
    Serving,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::ConnectingGateway => "connecting_gateway",
            Self::GatewayReady => "gateway_ready",
            Self::ListenerStarting => "listener_starting",
            Self::Serving => "serving",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// How one resource was released
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Closed cleanly within its timeout
    Released,
    /// Close returned an error
    Failed(String),
    /// Close did not finish in time and was abandoned
    TimedOut,
    /// Never acquired
    NotStarted,
}

impl ReleaseOutcome {
    pub fn is_released(&self) -> bool {
        matches!(self, Self::Released)
    }
}

/// Result of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub listener: ReleaseOutcome,
    pub gateway: ReleaseOutcome,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.listener.is_released() && self.gateway.is_released()
    }
}

/// Drives one gateway and one HTTP listener through startup and shutdown
pub struct LifecycleCoordinator {
    config: LifecycleConfig,
    bind_addr: SocketAddr,
    state: watch::Sender<LifecycleState>,
    local_addr: watch::Sender<Option<SocketAddr>>,
    shutdown: CancellationToken,
}

impl LifecycleCoordinator {
    pub fn new(config: LifecycleConfig, bind_addr: SocketAddr) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        let (local_addr, _) = watch::channel(None);
        Self {
            config,
            bind_addr,
            state,
            local_addr,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Address the listener is bound to, once serving
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.borrow()
    }

    /// Token that triggers shutdown when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request shutdown; safe to call at any point, including before `run`
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run until shutdown is requested or the listener dies.
    ///
    /// Returns an error, after releasing the gateway, if the gateway cannot
    /// start, does not become ready in time, or the listener cannot bind.
    pub async fn run(&self, gateway: Arc<dyn Gateway>, app: Router) -> Result<ShutdownReport> {
        let started = self.state.send_if_modified(|state| {
            if *state == LifecycleState::Idle {
                *state = LifecycleState::ConnectingGateway;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(Error::Lifecycle(format!(
                "coordinator already run (state: {})",
                self.state()
            )));
        }
        tracing::info!(
            state = %LifecycleState::ConnectingGateway,
            gateway = gateway.name(),
            "Lifecycle transition"
        );

        if let Err(e) = gateway.start().await {
            let err = Error::GatewayNotReady(format!(
                "gateway '{}' failed to start: {}",
                gateway.name(),
                e
            ));
            self.abort_startup(None, &err).await;
            return Err(err);
        }
        if let Err(e) = self.wait_ready(gateway.as_ref()).await {
            self.abort_startup(Some(gateway.as_ref()), &e).await;
            return Err(e);
        }
        self.transition(LifecycleState::GatewayReady);

        self.transition(LifecycleState::ListenerStarting);
        let (listener, local_addr) = match bind(self.bind_addr).await {
            Ok(bound) => bound,
            Err(e) => {
                let err = Error::Io(e);
                self.abort_startup(Some(gateway.as_ref()), &err).await;
                return Err(err);
            }
        };
        self.local_addr.send_replace(Some(local_addr));

        let drain = CancellationToken::new();
        let server_drain = drain.clone();
        let mut server: JoinHandle<std::io::Result<()>> = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(server_drain.cancelled_owned())
                .await
        });
        self.transition(LifecycleState::Serving);
        tracing::info!(addr = %local_addr, "Webhook listener serving");

        let exited = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            res = &mut server => {
                tracing::error!("Webhook listener exited unexpectedly, shutting down");
                Some(res)
            }
        };
        self.shutdown.cancel();
        self.transition(LifecycleState::ShuttingDown);

        let (listener, gateway) = tokio::join!(
            release_listener(server, drain, exited, self.config.shutdown_grace()),
            release_gateway(gateway.as_ref(), self.config.close_timeout()),
        );
        self.local_addr.send_replace(None);

        let report = ShutdownReport { listener, gateway };
        self.transition(LifecycleState::Stopped);
        if report.is_clean() {
            tracing::info!("Shutdown complete");
        } else {
            tracing::warn!(
                listener = ?report.listener,
                gateway = ?report.gateway,
                "Shutdown completed with unreleased resources"
            );
        }
        Ok(report)
    }

    async fn wait_ready(&self, gateway: &dyn Gateway) -> Result<()> {
        let ready_timeout = self.config.ready_timeout();
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(Error::GatewayNotReady(
                "shutdown requested before the gateway became ready".to_string(),
            )),
            res = tokio::time::timeout(ready_timeout, gateway.wait_ready()) => match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(Error::GatewayNotReady(e.to_string())),
                Err(_) => Err(Error::GatewayNotReady(format!(
                    "gateway '{}' not ready within {:?}",
                    gateway.name(),
                    ready_timeout
                ))),
            },
        }
    }

    /// Release whatever was acquired and settle in `Stopped`
    async fn abort_startup(&self, gateway: Option<&dyn Gateway>, err: &Error) {
        tracing::error!(state = %self.state(), error = %err, "Startup failed");
        self.transition(LifecycleState::ShuttingDown);
        let outcome = match gateway {
            Some(gateway) => release_gateway(gateway, self.config.close_timeout()).await,
            None => ReleaseOutcome::NotStarted,
        };
        tracing::info!(gateway = ?outcome, "Gateway released after failed startup");
        self.transition(LifecycleState::Stopped);
    }

    fn transition(&self, next: LifecycleState) {
        self.state.send_replace(next);
        tracing::info!(state = %next, "Lifecycle transition");
    }
}

async fn bind(addr: SocketAddr) -> std::io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    Ok((listener, local_addr))
}

async fn release_listener(
    mut server: JoinHandle<std::io::Result<()>>,
    drain: CancellationToken,
    exited: Option<std::result::Result<std::io::Result<()>, JoinError>>,
    grace: Duration,
) -> ReleaseOutcome {
    if let Some(res) = exited {
        return server_outcome(res);
    }

    drain.cancel();
    match tokio::time::timeout(grace, &mut server).await {
        Ok(res) => server_outcome(res),
        Err(_) => {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "In-flight requests outlived grace period, aborting listener"
            );
            server.abort();
            let _ = server.await;
            ReleaseOutcome::TimedOut
        }
    }
}

fn server_outcome(res: std::result::Result<std::io::Result<()>, JoinError>) -> ReleaseOutcome {
    match res {
        Ok(Ok(())) => ReleaseOutcome::Released,
        Ok(Err(e)) => ReleaseOutcome::Failed(e.to_string()),
        Err(e) => ReleaseOutcome::Failed(e.to_string()),
    }
}

async fn release_gateway(gateway: &dyn Gateway, timeout: Duration) -> ReleaseOutcome {
    match tokio::time::timeout(timeout, gateway.close()).await {
        Ok(Ok(())) => ReleaseOutcome::Released,
        Ok(Err(e)) => {
            tracing::warn!(gateway = gateway.name(), error = %e, "Gateway close failed");
            ReleaseOutcome::Failed(e.to_string())
        }
        Err(_) => {
            tracing::warn!(
                gateway = gateway.name(),
                timeout_secs = timeout.as_secs(),
                "Gateway close timed out"
            );
            ReleaseOutcome::TimedOut
        }
    }
}
