//! Message trait and the wire envelope exchanged over the bus.
//!
//! Messages are serialized with `bincode` on the wire: compact, fast, and
//! every rxflow service is Rust so a binary format costs nothing in
//! interoperability. Metadata (correlation identifier, reply topic) rides
//! alongside the payload as JSON so transports can route replies without
//! deserializing the body.
//!
//! # Message Naming Convention
//!
//! [`Message::message_type`] returns a stable, versioned identifier:
//!
//! - `"prescription.create.v1"`
//! - `"validation.request.v1"`
//!
//! The version suffix leaves room for schema evolution without breaking
//! consumers that still read the old shape.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Errors for message serialization.
#[derive(Error, Debug)]
pub enum MessageError {
    /// Failed to serialize a message to bytes.
    #[error("failed to serialize message: {0}")]
    Serialization(String),

    /// Failed to deserialize a message from bytes.
    #[error("failed to deserialize message: {0}")]
    Deserialization(String),
}

/// A typed message that can travel over the bus.
///
/// Provides bincode `to_bytes`/`from_bytes` for any type implementing
/// `Serialize`/`DeserializeOwned`, plus a stable type identifier used for
/// routing and logging.
pub trait Message: Send + Sync + 'static {
    /// Stable, versioned identifier for this message (e.g.
    /// `"prescription.create.v1"`).
    fn message_type(&self) -> &'static str;

    /// Serialize this message to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Serialization`] if encoding fails.
    fn to_bytes(&self) -> Result<Vec<u8>, MessageError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| MessageError::Serialization(e.to_string()))
    }

    /// Deserialize a message from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Deserialization`] if the bytes don't decode
    /// into this message type.
    fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| MessageError::Deserialization(e.to_string()))
    }
}

/// Correlation identifier matching an asynchronous reply to its request.
///
/// For gateway round-trips this is a random UUID; for the validation
/// exchange it is the creation attempt's idempotency key, so the replying
/// side can run its own duplicate check against the very same identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Create a fresh random correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a correlation id from an existing identifier.
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A serialized message ready for the wire.
///
/// Carries the type identifier, the bincode payload, and optional JSON
/// metadata. Metadata keys used by the platform:
///
/// - `correlation_id`: links a reply to its originating request
/// - `reply_topic`: where the handler should publish its reply
#[derive(Clone, Debug, PartialEq)]
pub struct SerializedMessage {
    /// The message type identifier (e.g. `"prescription.create.v1"`).
    pub message_type: String,

    /// The bincode-serialized payload.
    pub data: Vec<u8>,

    /// Optional metadata in JSON format.
    pub metadata: Option<serde_json::Value>,
}

impl SerializedMessage {
    /// Create a serialized message from raw parts.
    #[must_use]
    pub const fn new(
        message_type: String,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            message_type,
            data,
            metadata,
        }
    }

    /// Serialize a typed [`Message`] into an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Serialization`] if encoding fails.
    pub fn from_message<M: Message + Serialize>(message: &M) -> Result<Self, MessageError> {
        Ok(Self {
            message_type: message.message_type().to_string(),
            data: message.to_bytes()?,
            metadata: None,
        })
    }

    /// Attach a correlation id and reply topic to the metadata.
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: &CorrelationId, reply_topic: &str) -> Self {
        let mut metadata = match self.metadata.take() {
            Some(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        metadata.insert(
            "correlation_id".to_string(),
            serde_json::Value::String(correlation_id.as_str().to_string()),
        );
        metadata.insert(
            "reply_topic".to_string(),
            serde_json::Value::String(reply_topic.to_string()),
        );
        self.metadata = Some(serde_json::Value::Object(metadata));
        self
    }

    /// Attach only a correlation id (replies don't need a reply topic).
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: &CorrelationId) -> Self {
        let mut metadata = match self.metadata.take() {
            Some(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        metadata.insert(
            "correlation_id".to_string(),
            serde_json::Value::String(correlation_id.as_str().to_string()),
        );
        self.metadata = Some(serde_json::Value::Object(metadata));
        self
    }

    /// Read the correlation id from the metadata, if present.
    #[must_use]
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("correlation_id"))
            .and_then(serde_json::Value::as_str)
            .map(CorrelationId::from_string)
    }

    /// Read the reply topic from the metadata, if present.
    #[must_use]
    pub fn reply_topic(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("reply_topic"))
            .and_then(serde_json::Value::as_str)
    }

    /// Decode the payload into a typed [`Message`].
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Deserialization`] if the payload doesn't
    /// decode into `M`.
    pub fn decode<M: Message + DeserializeOwned>(&self) -> Result<M, MessageError> {
        M::from_bytes(&self.data)
    }
}

impl fmt::Display for SerializedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedMessage {{ type: {}, size: {} bytes }}",
            self.message_type,
            self.data.len()
        )
    }
}
