//! Message Envelope
//!
//! The typed unit of communication. Clients send envelopes on one of the two
//! inbound channels of a project; the server stamps `seq`, `version` and
//! `timestamp` and publishes envelopes on the project topic.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{Error, Result};

/// Opaque project identifier
pub type ProjectId = String;

/// `userId` stamped on envelopes that originate from the server itself
pub const SERVER_USER: &str = "server";

/// Message type enumeration (wire contract)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Element created
    ElementCreate,
    /// Element updated (possibly transient)
    ElementUpdate,
    /// Element deleted
    ElementDelete,
    /// Point-delta block appended to an in-progress stroke
    StrokeAppend,
    /// Stroke finished
    StrokeEnd,
    /// Catch-up for a stroke that is still being drawn
    StrokeInit,
    /// Page created
    PageCreate,
    /// Page updated
    PageUpdate,
    /// Page deleted
    PageDelete,
    /// Participant switched page
    PageSwitch,
    /// Participant joined
    UserJoin,
    /// Participant left
    UserLeave,
    /// Cursor moved
    UserCursor,
    /// Full-state transfer requested
    SyncRequest,
    /// Single-message sync (kept in the wire contract, never issued)
    SyncResponse,
    /// Chunked sync header
    SyncResponseStart,
    /// Chunked sync body
    SyncResponseChunk,
    /// Chunked sync trailer
    SyncResponseEnd,
    /// Lock requested
    ElementLockRequest,
    /// Lock release requested
    ElementLockRelease,
    /// Lock announced to the project
    ElementLock,
    /// Lock granted to the requester
    LockGranted,
    /// Lock released
    LockReleased,
    /// Lock request rejected
    LockRejected,
    /// Operation rejected by the server
    ServerReject,
}

impl MessageType {
    /// Every type of the wire contract
    pub const ALL: [MessageType; 25] = [
        Self::ElementCreate,
        Self::ElementUpdate,
        Self::ElementDelete,
        Self::StrokeAppend,
        Self::StrokeEnd,
        Self::StrokeInit,
        Self::PageCreate,
        Self::PageUpdate,
        Self::PageDelete,
        Self::PageSwitch,
        Self::UserJoin,
        Self::UserLeave,
        Self::UserCursor,
        Self::SyncRequest,
        Self::SyncResponse,
        Self::SyncResponseStart,
        Self::SyncResponseChunk,
        Self::SyncResponseEnd,
        Self::ElementLockRequest,
        Self::ElementLockRelease,
        Self::ElementLock,
        Self::LockGranted,
        Self::LockReleased,
        Self::LockRejected,
        Self::ServerReject,
    ];

    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ElementCreate => "ELEMENT_CREATE",
            Self::ElementUpdate => "ELEMENT_UPDATE",
            Self::ElementDelete => "ELEMENT_DELETE",
            Self::StrokeAppend => "STROKE_APPEND",
            Self::StrokeEnd => "STROKE_END",
            Self::StrokeInit => "STROKE_INIT",
            Self::PageCreate => "PAGE_CREATE",
            Self::PageUpdate => "PAGE_UPDATE",
            Self::PageDelete => "PAGE_DELETE",
            Self::PageSwitch => "PAGE_SWITCH",
            Self::UserJoin => "USER_JOIN",
            Self::UserLeave => "USER_LEAVE",
            Self::UserCursor => "USER_CURSOR",
            Self::SyncRequest => "SYNC_REQUEST",
            Self::SyncResponse => "SYNC_RESPONSE",
            Self::SyncResponseStart => "SYNC_RESPONSE_START",
            Self::SyncResponseChunk => "SYNC_RESPONSE_CHUNK",
            Self::SyncResponseEnd => "SYNC_RESPONSE_END",
            Self::ElementLockRequest => "ELEMENT_LOCK_REQUEST",
            Self::ElementLockRelease => "ELEMENT_LOCK_RELEASE",
            Self::ElementLock => "ELEMENT_LOCK",
            Self::LockGranted => "LOCK_GRANTED",
            Self::LockReleased => "LOCK_RELEASED",
            Self::LockRejected => "LOCK_REJECTED",
            Self::ServerReject => "SERVER_REJECT",
        }
    }

    /// Parse a wire name, `None` for anything outside the contract
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == name)
    }

    /// Types that advance the project version
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::ElementCreate
                | Self::ElementUpdate
                | Self::ElementDelete
                | Self::StrokeEnd
                | Self::PageCreate
                | Self::PageUpdate
                | Self::PageDelete
        )
    }

    /// Types only the server may emit
    #[must_use]
    pub fn is_server_issued(&self) -> bool {
        matches!(
            self,
            Self::StrokeInit
                | Self::SyncResponse
                | Self::SyncResponseStart
                | Self::SyncResponseChunk
                | Self::SyncResponseEnd
                | Self::ElementLock
                | Self::LockGranted
                | Self::LockReleased
                | Self::LockRejected
                | Self::ServerReject
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound channel a message arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundChannel {
    /// General-purpose `project/{projectId}/action`
    #[default]
    Action,
    /// Point-append fast path `project/{projectId}/stroke`
    Stroke,
}

impl InboundChannel {
    /// Channel address for a project
    #[must_use]
    pub fn address(&self, project_id: &str) -> String {
        format!("project/{}/{}", project_id, self)
    }

    /// Whether a message type may arrive on this channel
    #[must_use]
    pub fn accepts(&self, kind: MessageType) -> bool {
        if kind.is_server_issued() {
            return false;
        }
        match self {
            Self::Action => true,
            Self::Stroke => kind == MessageType::StrokeAppend,
        }
    }
}

impl fmt::Display for InboundChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action => f.write_str("action"),
            Self::Stroke => f.write_str("stroke"),
        }
    }
}

/// Outbound project topic
#[must_use]
pub fn project_topic(project_id: &str) -> String {
    format!("project/{}", project_id)
}

/// A message on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Message type discriminator
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Project the message belongs to
    pub project_id: ProjectId,
    /// Originating user (or `"server"`)
    pub user_id: String,
    /// Type-specific payload
    #[serde(default)]
    pub payload: Value,
    /// Server-assigned sequence number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Server-assigned version, mutating types only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Server clock, epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Topic override for the outbound delivery
    #[serde(skip)]
    pub destination: Option<String>,
}

impl Envelope {
    /// Build a server-issued envelope
    #[must_use]
    pub fn server(
        kind: MessageType,
        project_id: impl Into<ProjectId>,
        user_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            kind,
            project_id: project_id.into(),
            user_id: user_id.into(),
            payload,
            seq: None,
            version: None,
            timestamp: None,
            destination: None,
        }
    }

    /// Decode a client message.
    ///
    /// `project_id` comes from the channel address and `user_id` from the
    /// identity resolver; both override whatever the client put in the body.
    /// Client-supplied `seq`, `version` and `timestamp` are discarded.
    pub fn decode_inbound(
        raw: &str,
        project_id: &str,
        user_id: &str,
        channel: InboundChannel,
    ) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_inbound_value(value, project_id, user_id, channel)
    }

    /// Decode a client message that has already been parsed as JSON
    pub fn from_inbound_value(
        value: Value,
        project_id: &str,
        user_id: &str,
        channel: InboundChannel,
    ) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(Error::malformed("envelope is not a JSON object"));
        };

        let type_name = match fields.get("type") {
            Some(Value::String(name)) => name.clone(),
            Some(_) => return Err(Error::malformed("`type` is not a string")),
            None => return Err(Error::malformed("missing `type`")),
        };
        let kind = MessageType::from_wire(&type_name).ok_or(Error::UnknownType(type_name))?;

        if !channel.accepts(kind) {
            return Err(Error::ChannelMismatch {
                kind: kind.to_string(),
                channel: channel.to_string(),
            });
        }

        let payload = fields.remove("payload").unwrap_or(Value::Null);
        if !(payload.is_object() || payload.is_null()) {
            return Err(Error::payload(kind.as_str(), "payload is not an object"));
        }

        let destination = match channel {
            InboundChannel::Stroke => Some(channel.address(project_id)),
            InboundChannel::Action => None,
        };

        Ok(Self {
            kind,
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            payload,
            seq: None,
            version: None,
            timestamp: None,
            destination,
        })
    }

    /// Deserialize the payload into a typed view
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| Error::payload(self.kind.as_str(), e.to_string()))
    }

    /// Set the sequence number
    #[must_use]
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Set the version
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Set the server timestamp
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Topic this envelope is published on
    #[must_use]
    pub fn topic(&self) -> String {
        self.destination
            .clone()
            .unwrap_or_else(|| project_topic(&self.project_id))
    }
}
