//! Interaction body decoding
//!
//! Parses a verified body into an [`InteractionEnvelope`]. The only schema
//! check is that the kind field exists and is an integer; everything else is
//! left for pipeline handlers to interpret.

use crate::types::{InteractionEnvelope, InteractionKind};
use thiserror::Error;

/// Field carrying the interaction discriminant on the wire
pub const DEFAULT_KIND_FIELD: &str = "type";

/// Reasons a verified body cannot be decoded
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Body is not valid JSON
    #[error("malformed interaction body: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Body is valid JSON but not an object
    #[error("interaction body is not an object")]
    NotAnObject,

    /// Kind field absent, or present but not an integer
    #[error("interaction kind field '{0}' missing or not an integer")]
    MissingKind(String),
}

/// Decodes interaction bodies
#[derive(Debug, Clone)]
pub struct InteractionDecoder {
    kind_field: String,
}

impl Default for InteractionDecoder {
    fn default() -> Self {
        Self {
            kind_field: DEFAULT_KIND_FIELD.to_string(),
        }
    }
}

impl InteractionDecoder {
    /// Decoder reading the discriminant from a different field name
    pub fn with_kind_field(kind_field: impl Into<String>) -> Self {
        Self {
            kind_field: kind_field.into(),
        }
    }

    pub fn kind_field(&self) -> &str {
        &self.kind_field
    }

    /// Parse `body` and extract its kind
    pub fn decode(&self, body: &[u8]) -> Result<InteractionEnvelope, DecodeError> {
        let payload: serde_json::Value = serde_json::from_slice(body)?;
        let object = payload.as_object().ok_or(DecodeError::NotAnObject)?;

        let kind = object
            .get(&self.kind_field)
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| DecodeError::MissingKind(self.kind_field.clone()))?;

        Ok(InteractionEnvelope {
            kind: InteractionKind(kind),
            payload,
        })
    }
}
