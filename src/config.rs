//! Bridge configuration
//!
//! Loaded from an optional HCL (or JSON) file, then overridden by CLI flags
//! and environment variables in the binary. Every section has defaults, so an
//! empty file is a valid config; `validate` decides whether it is runnable.

use crate::error::{Error, Result};
use crate::verify::SignatureVerifier;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Placeholder shown instead of secrets
pub const REDACTED: &str = "<redacted>";

/// Main bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// HTTP listener bind address
    #[serde(default)]
    pub server: ServerConfig,

    /// Interaction webhook settings
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Persistent gateway connection settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Startup and shutdown timing
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

impl BridgeConfig {
    /// Parse configuration from an HCL string (JSON is accepted too)
    pub fn from_hcl(content: &str) -> Result<Self> {
        if content.trim_start().starts_with('{') {
            return serde_json::from_str(content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)));
        }
        hcl::from_str(content).map_err(|e| Error::Config(format!("Failed to parse HCL config: {}", e)))
    }

    /// Load from `path`, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config = Self::from_hcl(&content)?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Check that the configuration can actually run a bridge
    pub fn validate(&self) -> Result<()> {
        self.server.bind_addr()?;

        if !self.webhook.path.starts_with('/') {
            return Err(Error::Config(format!(
                "webhook path must start with '/': {}",
                self.webhook.path
            )));
        }
        if self.webhook.max_body_bytes == 0 {
            return Err(Error::Config("webhook.max_body_bytes must be > 0".to_string()));
        }
        if self.webhook.request_timeout_secs == 0 {
            return Err(Error::Config(
                "webhook.request_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.webhook.public_key.trim().is_empty() {
            return Err(Error::Config(
                "webhook.public_key is not set (use --public-key or PUBLIC_KEY)".to_string(),
            ));
        }
        self.webhook.verifier()?;

        if self.gateway.url.is_empty() {
            return Err(Error::Config("gateway.url is empty".to_string()));
        }
        if self.gateway.token.trim().is_empty() {
            return Err(Error::Config(
                "gateway.token is not set (use --token or TOKEN)".to_string(),
            ));
        }
        self.gateway.resolve_token()?;

        let lifecycle = &self.lifecycle;
        if lifecycle.ready_timeout_secs == 0
            || lifecycle.shutdown_grace_secs == 0
            || lifecycle.close_timeout_secs == 0
        {
            return Err(Error::Config("lifecycle timeouts must be > 0".to_string()));
        }

        Ok(())
    }

    /// Copy suitable for printing: the gateway token is masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.gateway.token = REDACTED.to_string();
        config
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind to
    pub host: String,

    /// Port to listen on (0 picks a free port)
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|e| Error::Config(format!("Invalid listen host '{}': {}", self.host, e)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Interaction webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Route receiving signed callbacks
    pub path: String,

    /// Hex public key, or the name of an env var holding it
    pub public_key: String,

    /// Larger bodies are rejected with 413
    pub max_body_bytes: usize,

    /// Bound on body read plus verification per request
    pub request_timeout_secs: u64,

    /// Reject timestamps further than this from now (unset: no freshness check)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_timestamp_age_secs: Option<u64>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            path: "/interactions".to_string(),
            public_key: String::new(),
            max_body_bytes: 256 * 1024,
            request_timeout_secs: 10,
            max_timestamp_age_secs: None,
        }
    }
}

impl WebhookConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Resolve the public key reference and build a verifier from it
    pub fn verifier(&self) -> Result<SignatureVerifier> {
        let key = resolve_credential(&self.public_key)?;
        SignatureVerifier::from_hex(&key)
    }
}

/// Gateway connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// WebSocket URL of the gateway
    pub url: String,

    /// Bot token, or the name of an env var holding it
    pub token: String,

    /// Intents bitfield sent with Identify
    pub intents: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "wss://gateway.discord.gg/?v=10&encoding=json".to_string(),
            token: String::new(),
            // GUILDS | GUILD_MESSAGES
            intents: (1 << 0) | (1 << 9),
        }
    }
}

impl GatewayConfig {
    pub fn resolve_token(&self) -> Result<String> {
        resolve_credential(&self.token)
    }
}

/// Startup/shutdown timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long to wait for the gateway handshake before giving up
    pub ready_timeout_secs: u64,

    /// How long in-flight requests get once shutdown starts
    pub shutdown_grace_secs: u64,

    /// How long the gateway gets to close
    pub close_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            ready_timeout_secs: 30,
            shutdown_grace_secs: 10,
            close_timeout_secs: 5,
        }
    }
}

impl LifecycleConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

/// Resolve a credential reference: try environment variable first, fall back to inline value.
///
/// `"BOT_TOKEN"` reads `$BOT_TOKEN`. A reference shaped like an env var name
/// whose variable is unset is an error rather than a literal secret; anything
/// else non-empty is used as-is.
pub fn resolve_credential(credential_ref: &str) -> Result<String> {
    if !credential_ref.is_empty() {
        if let Ok(val) = std::env::var(credential_ref)
            .or_else(|_| std::env::var(credential_ref.to_uppercase()))
        {
            if !val.is_empty() {
                return Ok(val);
            }
        }
        if looks_like_env_name(credential_ref) {
            return Err(Error::Config(format!(
                "environment variable {} is not set",
                credential_ref
            )));
        }
        return Ok(credential_ref.to_string());
    }
    Err(Error::Config(format!(
        "Failed to resolve credential: '{}'",
        credential_ref
    )))
}

/// `SCREAMING_SNAKE` names; bare uppercase hex (a public key) does not count
fn looks_like_env_name(s: &str) -> bool {
    s.starts_with(|c: char| c.is_ascii_uppercase())
        && s.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        && !s.chars().all(|c| c.is_ascii_hexdigit())
}
