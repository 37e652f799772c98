//! Signed interaction webhook
//!
//! One `POST` route. Each request goes through a fixed sequence: headers,
//! bounded body read, signature check, decode, then either the liveness
//! reply or a hand-off to the [`DispatchBridge`]. Every failure is turned
//! into a status code here and never propagates further.

use crate::bridge::DispatchBridge;
use crate::config::WebhookConfig;
use crate::decode::{DecodeError, InteractionDecoder};
use crate::error::Result;
use crate::types::DispatchResult;
use crate::verify::{check_freshness, SignatureVerifier, VerificationError};
use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use http_body_util::LengthLimitError;
use hyper::ext::ReasonPhrase;
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Hex-encoded Ed25519 signature header
pub const SIGNATURE_HEADER: &str = "X-Signature-Ed25519";
/// Timestamp header; its value is prepended to the body before verifying
pub const TIMESTAMP_HEADER: &str = "X-Signature-Timestamp";

/// Status-line reason for every 401, whatever the underlying cause
pub const UNAUTHORIZED_REASON: &str = "invalid request signature";

/// Why a request was turned away
///
/// Only the status code reaches the caller. The reason is logged.
#[derive(Debug, Error)]
pub enum WebhookRejection {
    #[error(transparent)]
    Unauthorized(#[from] VerificationError),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error(transparent)]
    BadRequest(#[from] DecodeError),

    #[error("failed to read request body: {0}")]
    BodyRead(String),

    #[error("request not completed within {0:?}")]
    Timeout(std::time::Duration),
}

impl WebhookRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BadRequest(_) | Self::BodyRead(_) => StatusCode::BAD_REQUEST,
            Self::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
        }
    }
}

impl IntoResponse for WebhookRejection {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(status = status.as_u16(), reason = %self, "Rejected webhook request");
        let mut response = status.into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .extensions_mut()
                .insert(ReasonPhrase::from_static(UNAUTHORIZED_REASON.as_bytes()));
        }
        response
    }
}

impl IntoResponse for DispatchResult {
    fn into_response(self) -> Response {
        match self {
            DispatchResult::LivenessAcknowledged => {
                (StatusCode::OK, Json(serde_json::json!({"type": 1}))).into_response()
            }
            DispatchResult::EventAccepted { .. } => StatusCode::OK.into_response(),
        }
    }
}

/// Everything a request needs, cloned into each handler invocation
#[derive(Clone)]
pub struct WebhookState {
    verifier: SignatureVerifier,
    decoder: InteractionDecoder,
    bridge: DispatchBridge,
    config: WebhookConfig,
}

impl WebhookState {
    pub fn new(
        verifier: SignatureVerifier,
        decoder: InteractionDecoder,
        bridge: DispatchBridge,
        config: WebhookConfig,
    ) -> Self {
        Self {
            verifier,
            decoder,
            bridge,
            config,
        }
    }

    /// Build state from config, resolving the public key
    pub fn from_config(config: WebhookConfig, bridge: DispatchBridge) -> Result<Self> {
        Ok(Self::new(
            config.verifier()?,
            InteractionDecoder::default(),
            bridge,
            config,
        ))
    }
}

/// Router serving the interaction route at the configured path
pub fn router(state: WebhookState) -> Router {
    let path = state.config.path.clone();
    Router::new()
        .route(&path, post(handle_interaction))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn handle_interaction(
    State(state): State<WebhookState>,
    request: Request,
) -> std::result::Result<DispatchResult, WebhookRejection> {
    let (parts, body) = request.into_parts();
    let (signature, timestamp) = credentials(&parts.headers)?;

    let limit = state.config.max_body_bytes;
    if declared_length(&parts.headers).is_some_and(|len| len > limit) {
        return Err(WebhookRejection::PayloadTooLarge { limit });
    }

    let timeout = state.config.request_timeout();
    let body = tokio::time::timeout(
        timeout,
        authenticate(&state, body, &signature, &timestamp),
    )
    .await
    .map_err(|_| WebhookRejection::Timeout(timeout))??;

    let envelope = state.decoder.decode(&body)?;
    if envelope.kind.is_ping() {
        tracing::debug!("Answering liveness probe");
        return Ok(DispatchResult::LivenessAcknowledged);
    }

    let kind = envelope.kind;
    let event_id = state.bridge.inject(envelope);
    tracing::info!(event_id = %event_id, kind = %kind, "Accepted interaction");
    Ok(DispatchResult::EventAccepted { event_id })
}

/// Signature and timestamp headers, both present and non-empty
fn credentials(headers: &HeaderMap) -> std::result::Result<(String, String), WebhookRejection> {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    match (read(SIGNATURE_HEADER), read(TIMESTAMP_HEADER)) {
        (Some(signature), Some(timestamp)) => Ok((signature, timestamp)),
        _ => Err(VerificationError::MissingCredential.into()),
    }
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Read the body under the size limit and verify it
async fn authenticate(
    state: &WebhookState,
    body: Body,
    signature: &str,
    timestamp: &str,
) -> std::result::Result<Bytes, WebhookRejection> {
    let limit = state.config.max_body_bytes;
    let body = to_bytes(body, limit).await.map_err(|e| {
        if exceeded_limit(&e) {
            WebhookRejection::PayloadTooLarge { limit }
        } else {
            WebhookRejection::BodyRead(e.to_string())
        }
    })?;

    state.verifier.verify(timestamp, &body, signature)?;
    if let Some(max_age) = state.config.max_timestamp_age_secs {
        check_freshness(timestamp, chrono::Utc::now().timestamp(), max_age)?;
    }
    Ok(body)
}

fn exceeded_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> =
        Some(err as &(dyn std::error::Error + 'static));
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}
