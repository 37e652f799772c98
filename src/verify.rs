//! Ed25519 request signature verification
//!
//! The remote service signs `timestamp || body` with its private key and
//! sends the signature hex-encoded in `X-Signature-Ed25519`, the timestamp in
//! `X-Signature-Timestamp`. Verification here is a pure function of those
//! inputs and the public key fixed at startup.

use crate::error::{Error, Result};
use ed25519_dalek::{Signature, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use thiserror::Error;

/// Reasons a request fails the authentication gate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// Signature or timestamp header absent or empty
    #[error("missing signature credentials")]
    MissingCredential,

    /// Signature is not hex, or not exactly 64 bytes
    #[error("malformed request signature")]
    MalformedSignature,

    /// Cryptographic check failed
    #[error("invalid request signature")]
    SignatureInvalid,

    /// Timestamp outside the configured freshness window (or unparseable)
    #[error("request timestamp outside freshness window")]
    StaleTimestamp,
}

/// Verifies request signatures against one immutable public key
///
/// Cheap to clone; the key is 32 bytes.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    key: VerifyingKey,
}

impl SignatureVerifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Build a verifier from the hex-encoded public key handed out by the remote service
    pub fn from_hex(public_key: &str) -> Result<Self> {
        let mut raw = [0u8; PUBLIC_KEY_LENGTH];
        hex::decode_to_slice(public_key.trim(), &mut raw).map_err(|e| {
            Error::Config(format!(
                "public key must be {} hex-encoded bytes: {}",
                PUBLIC_KEY_LENGTH, e
            ))
        })?;
        let key = VerifyingKey::from_bytes(&raw)
            .map_err(|e| Error::Config(format!("public key is not a valid Ed25519 point: {}", e)))?;
        Ok(Self { key })
    }

    /// The raw public key
    pub fn key(&self) -> &VerifyingKey {
        &self.key
    }

    /// Verify `signature_hex` over `timestamp || body`.
    ///
    /// Callers must reject empty timestamp/signature headers before calling.
    pub fn verify(
        &self,
        timestamp: &str,
        body: &[u8],
        signature_hex: &str,
    ) -> std::result::Result<(), VerificationError> {
        let mut raw = [0u8; SIGNATURE_LENGTH];
        hex::decode_to_slice(signature_hex, &mut raw)
            .map_err(|_| VerificationError::MalformedSignature)?;
        let signature = Signature::from_bytes(&raw);

        let mut message = Vec::with_capacity(timestamp.len() + body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body);

        self.key
            .verify_strict(&message, &signature)
            .map_err(|_| VerificationError::SignatureInvalid)
    }
}

/// Check that `timestamp` (Unix seconds) lies within `max_age_secs` of `now_secs`.
///
/// Skew is checked in both directions.
pub fn check_freshness(
    timestamp: &str,
    now_secs: i64,
    max_age_secs: u64,
) -> std::result::Result<(), VerificationError> {
    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| VerificationError::StaleTimestamp)?;
    let age = now_secs.saturating_sub(ts).unsigned_abs();
    if age > max_age_secs {
        return Err(VerificationError::StaleTimestamp);
    }
    Ok(())
}
