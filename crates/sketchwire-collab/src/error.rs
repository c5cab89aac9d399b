//! Error types for sketchwire-collab
//!
//! Errors here never leave a handler invocation: the router logs them and
//! drops the offending message. Lock conflicts and rate limiting are normal
//! protocol outcomes and are expressed as rejection envelopes instead.

use thiserror::Error;

/// Collaboration error type
#[derive(Debug, Error)]
pub enum Error {
    /// Envelope could not be decoded
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Envelope `type` is not part of the wire contract
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// A server-issued type was sent by a client, or a type arrived on the wrong channel
    #[error("message type {kind} not accepted on {channel} channel")]
    ChannelMismatch {
        /// Wire name of the message type
        kind: String,
        /// Inbound channel name
        channel: String,
    },

    /// Payload is missing required fields for its type
    #[error("malformed payload for {kind}: {reason}")]
    MalformedPayload {
        /// Wire name of the message type
        kind: String,
        /// What was wrong
        reason: String,
    },

    /// Coordination store failure
    #[error("store error: {0}")]
    Store(String),

    /// Persistence collaborator failure
    #[error("document error: {0}")]
    Document(String),

    /// Outbound delivery failure
    #[error("publish error: {0}")]
    Publish(String),

    /// The target connection is gone
    #[error("subscriber closed: {0}")]
    SubscriberClosed(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a malformed envelope error
    #[must_use]
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEnvelope(msg.into())
    }

    /// Create a malformed payload error
    #[must_use]
    pub fn payload(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Create a store error
    #[must_use]
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a publish error
    #[must_use]
    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    /// Whether the error was caused by client input (as opposed to infrastructure)
    #[must_use]
    pub fn is_client_input(&self) -> bool {
        matches!(
            self,
            Self::MalformedEnvelope(_)
                | Self::UnknownType(_)
                | Self::ChannelMismatch { .. }
                | Self::MalformedPayload { .. }
        )
    }

    /// Get error code for diagnostics
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope(_) => "malformed_envelope",
            Self::UnknownType(_) => "unknown_type",
            Self::ChannelMismatch { .. } => "channel_mismatch",
            Self::MalformedPayload { .. } => "malformed_payload",
            Self::Store(_) => "store_error",
            Self::Document(_) => "document_error",
            Self::Publish(_) => "publish_error",
            Self::SubscriberClosed(_) => "subscriber_closed",
            Self::Configuration(_) => "configuration_error",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedEnvelope(err.to_string())
    }
}

/// Result type alias for collaboration operations
pub type Result<T> = std::result::Result<T, Error>;
