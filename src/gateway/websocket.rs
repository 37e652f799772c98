//! WebSocket gateway client with supervised reconnect.
//!
//! One background task owns the socket. A session is: connect, read Hello,
//! send Identify, then heartbeat and read dispatches until something ends it.
//! When a session fails the task waits with exponential backoff and starts a
//! fresh one. Backoff starts at `MIN_BACKOFF` and doubles up to
//! `MAX_BACKOFF`; a session that stayed up for `HEALTHY_THRESHOLD` resets it.
//!
//! Every dispatch, `READY` included, is injected into the pipeline with
//! [`Ingress::Gateway`]. `READY` additionally marks the gateway ready.

use super::protocol::{opcode, GatewayFrame};
use super::{Gateway, GatewayStatus, StatusCell};
use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::pipeline::EventSink;
use crate::types::{Ingress, PipelineEvent};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

/// Minimum backoff between reconnect attempts.
const MIN_BACKOFF: Duration = Duration::from_secs(2);
/// Maximum backoff cap.
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// If a session lasts longer than this, reset backoff.
const HEALTHY_THRESHOLD: Duration = Duration::from_secs(120);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// State shared between the handle and the connection task
struct Shared {
    config: GatewayConfig,
    sink: Arc<dyn EventSink>,
    status: StatusCell,
    ready: watch::Sender<bool>,
}

impl Shared {
    fn set_ready(&self, ready: bool) {
        self.ready.send_replace(ready);
        if ready {
            self.status.set(GatewayStatus::Ready);
        }
    }
}

/// Gateway connection over a WebSocket
pub struct WebSocketGateway {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketGateway {
    /// Create a gateway that injects every dispatch into `sink`
    pub fn new(config: GatewayConfig, sink: Arc<dyn EventSink>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                sink,
                status: StatusCell::new(),
                ready,
            }),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn status(&self) -> GatewayStatus {
        self.shared.status.get()
    }
}

#[async_trait]
impl Gateway for WebSocketGateway {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn start(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(Error::Gateway("gateway already started".to_string()));
        }
        if self.cancel.is_cancelled() {
            return Err(Error::Gateway("gateway already closed".to_string()));
        }

        // Fail fast on a missing token instead of retrying forever
        self.shared.config.resolve_token()?;

        self.shared.status.set(GatewayStatus::Connecting);
        *task = Some(tokio::spawn(supervise(
            self.shared.clone(),
            self.cancel.clone(),
        )));
        tracing::info!(url = %self.shared.config.url, "Gateway connection started");
        Ok(())
    }

    async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.shared.ready.subscribe();
        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(Error::Gateway("gateway closed before becoming ready".to_string()))
            }
            res = rx.wait_for(|ready| *ready) => {
                res.map(|_| ()).map_err(|_| {
                    Error::Gateway("gateway dropped before becoming ready".to_string())
                })
            }
        }
    }

    fn is_ready(&self) -> bool {
        *self.shared.ready.borrow()
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let handle = self.task.lock().await.take();
        let Some(handle) = handle else {
            self.shared.set_ready(false);
            self.shared.status.set(GatewayStatus::Stopped);
            return Ok(());
        };

        self.shared.status.set(GatewayStatus::Closing);
        handle
            .await
            .map_err(|e| Error::Gateway(format!("gateway task failed: {}", e)))?;
        tracing::info!("Gateway connection closed");
        Ok(())
    }
}

/// Run sessions until cancelled, backing off between failures
async fn supervise(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut backoff = MIN_BACKOFF;
    loop {
        let started = Instant::now();
        shared.status.set(GatewayStatus::Connecting);

        match run_session(&shared, &cancel).await {
            Ok(()) => break,
            Err(e) => {
                shared.set_ready(false);
                if cancel.is_cancelled() {
                    break;
                }
                if started.elapsed() >= HEALTHY_THRESHOLD {
                    backoff = MIN_BACKOFF;
                }

                tracing::error!(
                    error = %e,
                    backoff_secs = backoff.as_secs(),
                    "Gateway session ended, reconnecting after backoff"
                );
                shared.status.set(GatewayStatus::Reconnecting);

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    shared.set_ready(false);
    shared.status.set(GatewayStatus::Stopped);
}

/// One connection from connect to close. `Ok` only when cancelled.
async fn run_session(shared: &Shared, cancel: &CancellationToken) -> Result<()> {
    let token = shared.config.resolve_token()?;
    let url = shared.config.url.as_str();

    let ws = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        res = tokio_tungstenite::connect_async(url) => {
            res.map_err(|e| Error::Gateway(format!("connect to {} failed: {}", url, e)))?.0
        }
    };
    let (mut write, mut read) = ws.split();

    let hello = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = write.close().await;
            return Ok(());
        }
        frame = next_frame(&mut read) => frame?,
    };
    let interval = hello.heartbeat_interval()?;
    tracing::debug!(heartbeat_ms = interval.as_millis() as u64, "Gateway hello");

    send_frame(&mut write, &GatewayFrame::identify(&token, shared.config.intents)).await?;

    let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut seq: Option<u64> = None;
    let mut acked = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.close().await;
                return Ok(());
            }
            _ = heartbeat.tick() => {
                if !acked {
                    return Err(Error::Gateway(
                        "heartbeat not acknowledged, connection is zombied".to_string(),
                    ));
                }
                acked = false;
                send_frame(&mut write, &GatewayFrame::heartbeat(seq)).await?;
            }
            frame = next_frame(&mut read) => {
                let frame = frame?;
                match frame.op {
                    opcode::DISPATCH => {
                        if frame.s.is_some() {
                            seq = frame.s;
                        }
                        let became_ready = frame.is_ready();
                        let name = frame.t.unwrap_or_default();
                        let event = PipelineEvent::new(name, Ingress::Gateway, frame.d);
                        tracing::debug!(
                            event_id = %event.id,
                            name = %event.name,
                            seq = ?seq,
                            "Gateway dispatch"
                        );
                        if let Err(e) = shared.sink.inject(event).await {
                            tracing::warn!(error = %e, "Failed to inject gateway dispatch");
                        }
                        if became_ready {
                            shared.set_ready(true);
                            tracing::info!("Gateway ready");
                        }
                    }
                    opcode::HEARTBEAT => {
                        send_frame(&mut write, &GatewayFrame::heartbeat(seq)).await?;
                    }
                    opcode::HEARTBEAT_ACK => acked = true,
                    opcode::RECONNECT => {
                        return Err(Error::Gateway("gateway requested reconnect".to_string()));
                    }
                    opcode::INVALID_SESSION => {
                        return Err(Error::Gateway("gateway invalidated the session".to_string()));
                    }
                    other => tracing::debug!(op = other, "Ignoring gateway opcode"),
                }
            }
        }
    }
}

/// Read until the next text frame; cancel-safe
async fn next_frame(read: &mut WsSource) -> Result<GatewayFrame> {
    loop {
        match read.next().await {
            None => return Err(Error::Gateway("connection closed".to_string())),
            Some(Err(e)) => return Err(Error::Gateway(format!("read failed: {}", e))),
            Some(Ok(Message::Text(text))) => return GatewayFrame::parse(&text),
            Some(Ok(Message::Close(frame))) => {
                return Err(Error::Gateway(format!("closed by gateway: {:?}", frame)));
            }
            Some(Ok(_)) => continue,
        }
    }
}

async fn send_frame(write: &mut WsSink, frame: &GatewayFrame) -> Result<()> {
    write
        .send(Message::Text(frame.to_text()?))
        .await
        .map_err(|e| Error::Gateway(format!("send failed: {}", e)))
}
