//! Integration tests for startup ordering and bounded shutdown.
//!
//! The gateway is a controllable in-memory double; the webhook listener is
//! real and exercised over TCP.

use a3s_bridge::config::{LifecycleConfig, WebhookConfig};
use a3s_bridge::pipeline::EventSink;
use a3s_bridge::{
    webhook, DispatchBridge, Error, Gateway, LifecycleCoordinator, LifecycleState,
    PipelineEvent, ReleaseOutcome, WebhookState,
};
use async_trait::async_trait;
use axum::Router;
use ed25519_dalek::SigningKey;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

// ─── Test doubles ───

struct MockGateway {
    ready: watch::Sender<bool>,
    started: AtomicBool,
    closed: AtomicBool,
    fail_start: bool,
    hang_on_close: bool,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self {
            ready: watch::channel(false).0,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            fail_start: false,
            hang_on_close: false,
        }
    }
}

impl MockGateway {
    fn new() -> Self {
        Self::default()
    }

    fn mark_ready(&self) {
        self.ready.send_replace(true);
    }

    fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Gateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start(&self) -> a3s_bridge::Result<()> {
        if self.fail_start {
            return Err(Error::Gateway("refused".to_string()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_ready(&self) -> a3s_bridge::Result<()> {
        let mut rx = self.ready.subscribe();
        rx.wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| Error::Gateway("dropped".to_string()))
    }

    fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    async fn close(&self) -> a3s_bridge::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.hang_on_close {
            std::future::pending::<()>().await;
        }
        self.ready.send_replace(false);
        Ok(())
    }
}

struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn inject(&self, _event: PipelineEvent) -> a3s_bridge::Result<()> {
        Ok(())
    }
}

// ─── Helpers ───

fn lifecycle_config() -> LifecycleConfig {
    LifecycleConfig {
        ready_timeout_secs: 1,
        shutdown_grace_secs: 1,
        close_timeout_secs: 1,
    }
}

fn webhook_app() -> Router {
    let config = WebhookConfig {
        public_key: hex::encode(SigningKey::from_bytes(&[7u8; 32]).verifying_key().to_bytes()),
        ..Default::default()
    };
    let state = WebhookState::from_config(config, DispatchBridge::new(Arc::new(NullSink))).unwrap();
    webhook::router(state)
}

/// A loopback address that is free right now
async fn free_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn wait_state(coordinator: &LifecycleCoordinator, target: LifecycleState) {
    let mut rx = coordinator.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("never reached {}", target))
        .unwrap();
}

/// Send an unsigned POST and return the status line
async fn post_unsigned(addr: SocketAddr) -> std::io::Result<String> {
    let mut stream = TcpStream::connect(addr).await?;
    stream
        .write_all(
            b"POST /interactions HTTP/1.1\r\nHost: localhost\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}",
        )
        .await?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    let text = String::from_utf8_lossy(&response);
    Ok(text.lines().next().unwrap_or_default().to_string())
}

/// Open a request whose body stays incomplete, so its handler is in flight
async fn start_partial_request(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"POST /interactions HTTP/1.1\r\nHost: localhost\r\n\
              X-Signature-Ed25519: 00\r\nX-Signature-Timestamp: 1700000000\r\n\
              Content-Length: 10\r\nConnection: close\r\n\r\n{\"ty",
        )
        .await
        .unwrap();
    // Let the server pick the request up before shutdown starts
    tokio::time::sleep(Duration::from_millis(100)).await;
    stream
}

fn spawn_run(
    coordinator: &Arc<LifecycleCoordinator>,
    gateway: &Arc<MockGateway>,
) -> tokio::task::JoinHandle<a3s_bridge::Result<a3s_bridge::ShutdownReport>> {
    let coordinator = coordinator.clone();
    let gateway: Arc<dyn Gateway> = gateway.clone();
    tokio::spawn(async move { coordinator.run(gateway, webhook_app()).await })
}

// ─── Startup ordering ───

#[tokio::test]
async fn test_listener_not_bound_before_gateway_ready() {
    let addr = free_addr().await;
    let coordinator = Arc::new(LifecycleCoordinator::new(
        LifecycleConfig {
            ready_timeout_secs: 10,
            ..lifecycle_config()
        },
        addr,
    ));
    let gateway = Arc::new(MockGateway::new());
    let run = spawn_run(&coordinator, &gateway);

    wait_state(&coordinator, LifecycleState::ConnectingGateway).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(gateway.started());
    assert_eq!(coordinator.state(), LifecycleState::ConnectingGateway);
    assert_eq!(coordinator.local_addr(), None);
    assert!(TcpStream::connect(addr).await.is_err(), "listener bound before ready");

    gateway.mark_ready();
    wait_state(&coordinator, LifecycleState::Serving).await;
    assert_eq!(coordinator.local_addr(), Some(addr));

    let status = post_unsigned(addr).await.unwrap();
    assert!(status.contains("401"), "unexpected status line: {}", status);

    coordinator.shutdown();
    let report = run.await.unwrap().unwrap();
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_ephemeral_port_observable() {
    let coordinator = Arc::new(LifecycleCoordinator::new(
        lifecycle_config(),
        "127.0.0.1:0".parse().unwrap(),
    ));
    let gateway = Arc::new(MockGateway::new());
    gateway.mark_ready();
    let run = spawn_run(&coordinator, &gateway);

    wait_state(&coordinator, LifecycleState::Serving).await;
    let addr = coordinator.local_addr().unwrap();
    assert_ne!(addr.port(), 0);
    assert!(TcpStream::connect(addr).await.is_ok());

    coordinator.shutdown();
    run.await.unwrap().unwrap();
    assert_eq!(coordinator.local_addr(), None);
}

// ─── Shutdown ───

#[tokio::test]
async fn test_shutdown_releases_both_resources() {
    let coordinator = Arc::new(LifecycleCoordinator::new(
        lifecycle_config(),
        "127.0.0.1:0".parse().unwrap(),
    ));
    let gateway = Arc::new(MockGateway::new());
    gateway.mark_ready();
    let run = spawn_run(&coordinator, &gateway);

    wait_state(&coordinator, LifecycleState::Serving).await;
    let addr = coordinator.local_addr().unwrap();

    coordinator.shutdown_token().cancel();
    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(report.listener, ReleaseOutcome::Released);
    assert_eq!(report.gateway, ReleaseOutcome::Released);
    assert!(gateway.closed());
    assert_eq!(coordinator.state(), LifecycleState::Stopped);
    assert!(TcpStream::connect(addr).await.is_err(), "listener still bound");
}

#[tokio::test]
async fn test_hung_gateway_does_not_block_listener_release() {
    let coordinator = Arc::new(LifecycleCoordinator::new(
        lifecycle_config(),
        "127.0.0.1:0".parse().unwrap(),
    ));
    let gateway = Arc::new(MockGateway {
        hang_on_close: true,
        ..Default::default()
    });
    gateway.mark_ready();
    let run = spawn_run(&coordinator, &gateway);

    wait_state(&coordinator, LifecycleState::Serving).await;
    let addr = coordinator.local_addr().unwrap();

    let started = tokio::time::Instant::now();
    coordinator.shutdown();
    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("shutdown not bounded")
        .unwrap()
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(report.gateway, ReleaseOutcome::TimedOut);
    assert_eq!(report.listener, ReleaseOutcome::Released);
    assert!(!report.is_clean());
    assert_eq!(coordinator.state(), LifecycleState::Stopped);
    assert!(TcpStream::connect(addr).await.is_err(), "listener still bound");
}

#[tokio::test]
async fn test_stalled_request_does_not_block_gateway_release() {
    let coordinator = Arc::new(LifecycleCoordinator::new(
        lifecycle_config(),
        "127.0.0.1:0".parse().unwrap(),
    ));
    let gateway = Arc::new(MockGateway::new());
    gateway.mark_ready();
    let run = spawn_run(&coordinator, &gateway);

    wait_state(&coordinator, LifecycleState::Serving).await;
    let addr = coordinator.local_addr().unwrap();
    let _stalled = start_partial_request(addr).await;

    let started = tokio::time::Instant::now();
    coordinator.shutdown();
    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("shutdown not bounded")
        .unwrap()
        .unwrap();

    // grace is 1s
    assert!(started.elapsed() < Duration::from_millis(2500));
    assert_eq!(report.listener, ReleaseOutcome::TimedOut);
    assert_eq!(report.gateway, ReleaseOutcome::Released);
    assert!(gateway.closed());
    assert_eq!(coordinator.state(), LifecycleState::Stopped);
    assert!(TcpStream::connect(addr).await.is_err(), "listener still bound");
}

#[tokio::test]
async fn test_in_flight_request_completes_within_grace() {
    let coordinator = Arc::new(LifecycleCoordinator::new(
        LifecycleConfig {
            shutdown_grace_secs: 5,
            ..lifecycle_config()
        },
        "127.0.0.1:0".parse().unwrap(),
    ));
    let gateway = Arc::new(MockGateway::new());
    gateway.mark_ready();
    let run = spawn_run(&coordinator, &gateway);

    wait_state(&coordinator, LifecycleState::Serving).await;
    let addr = coordinator.local_addr().unwrap();
    let mut stream = start_partial_request(addr).await;

    coordinator.shutdown();
    wait_state(&coordinator, LifecycleState::ShuttingDown).await;

    // Finish the body after shutdown began; the request is still answered
    stream.write_all(b"pe\":1}").await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let status_line = String::from_utf8_lossy(&response)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();
    assert!(status_line.contains("401"), "unexpected status line: {}", status_line);

    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.listener, ReleaseOutcome::Released);
    assert_eq!(report.gateway, ReleaseOutcome::Released);
}

// ─── Startup failures ───

#[tokio::test]
async fn test_ready_timeout_is_fatal() {
    let addr = free_addr().await;
    let coordinator = Arc::new(LifecycleCoordinator::new(lifecycle_config(), addr));
    let gateway = Arc::new(MockGateway::new());
    let run = spawn_run(&coordinator, &gateway);

    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::GatewayNotReady(_))));
    assert!(gateway.closed());
    assert_eq!(coordinator.state(), LifecycleState::Stopped);
    assert_eq!(coordinator.local_addr(), None);
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_shutdown_while_connecting() {
    let coordinator = Arc::new(LifecycleCoordinator::new(
        LifecycleConfig {
            ready_timeout_secs: 30,
            ..lifecycle_config()
        },
        "127.0.0.1:0".parse().unwrap(),
    ));
    let gateway = Arc::new(MockGateway::new());
    let run = spawn_run(&coordinator, &gateway);

    wait_state(&coordinator, LifecycleState::ConnectingGateway).await;
    coordinator.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("shutdown during connect not honoured")
        .unwrap();
    assert!(matches!(result, Err(Error::GatewayNotReady(_))));
    assert!(gateway.closed());
    assert_eq!(coordinator.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_gateway_start_failure() {
    let coordinator = Arc::new(LifecycleCoordinator::new(
        lifecycle_config(),
        "127.0.0.1:0".parse().unwrap(),
    ));
    let gateway = Arc::new(MockGateway {
        fail_start: true,
        ..Default::default()
    });
    let result = spawn_run(&coordinator, &gateway).await.unwrap();

    assert!(matches!(result, Err(Error::GatewayNotReady(_))));
    assert!(!gateway.started());
    assert!(!gateway.closed(), "a gateway that never started is not closed");
    assert_eq!(coordinator.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_bind_failure_releases_gateway() {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = occupied.local_addr().unwrap();

    let coordinator = Arc::new(LifecycleCoordinator::new(lifecycle_config(), addr));
    let gateway = Arc::new(MockGateway::new());
    gateway.mark_ready();
    let result = spawn_run(&coordinator, &gateway).await.unwrap();

    assert!(matches!(result, Err(Error::Io(_))));
    assert!(gateway.closed());
    assert_eq!(coordinator.state(), LifecycleState::Stopped);
    drop(occupied);
}

#[tokio::test]
async fn test_run_only_once() {
    let coordinator = Arc::new(LifecycleCoordinator::new(
        lifecycle_config(),
        "127.0.0.1:0".parse().unwrap(),
    ));
    let gateway = Arc::new(MockGateway::new());
    gateway.mark_ready();
    let run = spawn_run(&coordinator, &gateway);
    wait_state(&coordinator, LifecycleState::Serving).await;

    let second = coordinator
        .run(Arc::new(MockGateway::new()), webhook_app())
        .await;
    assert!(matches!(second, Err(Error::Lifecycle(_))));

    coordinator.shutdown();
    run.await.unwrap().unwrap();

    let third = coordinator
        .run(Arc::new(MockGateway::new()), webhook_app())
        .await;
    assert!(matches!(third, Err(Error::Lifecycle(_))));
}
