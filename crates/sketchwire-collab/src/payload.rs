//! Typed payload views
//!
//! Inbound payloads are decoded lazily by the handler for their type; anything
//! a handler does not need stays opaque inside the envelope and is
//! rebroadcast untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::envelope::{Envelope, MessageType};
use crate::error::{Error, Result};

/// `ELEMENT_LOCK_REQUEST`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRequest {
    /// Element to lock
    pub element_id: String,
    /// Page the element lives on
    #[serde(default)]
    pub page_id: Option<Value>,
    /// Requested lifetime in milliseconds, capped by the server
    #[serde(default)]
    pub requested_ttl: Option<u64>,
}

/// `ELEMENT_LOCK_RELEASE`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRelease {
    /// Element to unlock
    pub element_id: String,
    /// Token handed out on grant
    #[serde(default)]
    pub lock_token: Option<String>,
}

/// `ELEMENT_UPDATE` fields the lock check cares about
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementUpdate {
    /// Target element
    #[serde(default)]
    pub element_id: Option<String>,
    /// Replacement element, addressed by its own `id`
    #[serde(default)]
    pub element: Option<ElementRef>,
    /// Hover/preview update
    #[serde(default, rename = "transient")]
    pub is_transient: bool,
}

/// Identity of an element carried inline in a payload
#[derive(Debug, Clone, Deserialize)]
pub struct ElementRef {
    /// Element id
    pub id: String,
}

impl ElementUpdate {
    /// Decode the update view of an envelope.
    ///
    /// A null payload is an update with no target; any other payload must
    /// decode, so a badly typed field can never hide the target.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        if envelope.payload.is_null() {
            return Ok(Self::default());
        }
        envelope.payload_as()
    }

    /// Element the update applies to: `elementId`, else `element.id`.
    ///
    /// Both present and different is malformed.
    pub fn target(&self) -> Result<Option<&str>> {
        let inline = self.element.as_ref().map(|e| e.id.as_str());
        match (self.element_id.as_deref(), inline) {
            (Some(id), Some(other)) if id != other => Err(Error::payload(
                MessageType::ElementUpdate.as_str(),
                format!("elementId `{}` does not match element.id `{}`", id, other),
            )),
            (Some(id), _) => Ok(Some(id)),
            (None, inline) => Ok(inline),
        }
    }
}

/// Stroke styling sent with the first append of a stroke
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeInit {
    /// Drawing tool
    #[serde(default)]
    pub tool: Option<String>,
    /// Stroke color
    #[serde(default)]
    pub color: Option<String>,
    /// Stroke width
    #[serde(default)]
    pub stroke_width: Option<f64>,
}

/// `STROKE_APPEND`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeAppend {
    /// Stroke being drawn
    pub stroke_id: String,
    /// Page the stroke is drawn on
    #[serde(default)]
    pub page_id: Option<Value>,
    /// Present on the first append only
    #[serde(default)]
    pub stroke_init: Option<StrokeInit>,
    /// Opaque point-delta block
    #[serde(default)]
    pub points: Option<Value>,
}

/// `STROKE_END`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeEnd {
    /// Finished stroke
    pub stroke_id: String,
}

/// `SYNC_REQUEST`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Last version the client has seen
    #[serde(default)]
    pub from_version: Option<u64>,
}

/// `LOCK_GRANTED`, targeted at the requester
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockGranted {
    /// Locked element
    pub element_id: String,
    /// Token proving ownership
    pub lock_token: String,
    /// Expiry, epoch milliseconds
    pub expires_at: i64,
}

/// `ELEMENT_LOCK`, broadcast to the project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementLocked {
    /// Locked element
    pub element_id: String,
    /// Holder
    pub locked_by: String,
    /// Expiry, epoch milliseconds
    pub expires_at: i64,
}

/// `LOCK_RELEASED`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockReleased {
    /// Released element
    pub element_id: String,
}

/// `LOCK_REJECTED`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRejected {
    /// Contended element
    pub element_id: String,
    /// Human-readable reason
    pub reason: String,
    /// Current holder
    pub locked_by: String,
}

/// `SERVER_REJECT`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerReject {
    /// Machine-readable reason, e.g. `ELEMENT_LOCKED`
    pub reason: String,
    /// Human-readable detail
    pub message: String,
    /// Type of the rejected message
    pub original_event_type: String,
}

/// A still-active stroke as replayed to late joiners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveStroke {
    /// Stroke id
    pub stroke_id: String,
    /// Page the stroke is drawn on
    pub page_id: Value,
    /// Drawing user
    pub user_id: String,
    /// Drawing tool
    pub tool: String,
    /// Stroke color
    pub color: String,
    /// Stroke width
    pub stroke_width: f64,
    /// Every point-delta block appended so far, in order
    pub points: Vec<Value>,
}

/// Lock entry inside `SYNC_RESPONSE_END`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockView {
    /// Holder
    pub locked_by: String,
    /// Expiry, epoch milliseconds
    pub expires_at: i64,
}

/// `SYNC_RESPONSE_START`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStart {
    /// Anchor version of the transfer
    pub version: u64,
    /// Number of chunk messages that follow
    pub total_chunks: usize,
}

/// `SYNC_RESPONSE_CHUNK`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncChunk {
    /// Zero-based chunk index
    pub chunk_index: usize,
    /// Elements in this chunk
    pub elements: Vec<Value>,
}

/// `SYNC_RESPONSE_END`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEnd {
    /// Non-expired locks by element id
    pub lock_snapshot: BTreeMap<String, LockView>,
    /// Strokes still being drawn
    pub active_stroke_snapshot: Vec<ActiveStroke>,
    /// Anchor version of the transfer
    pub version: u64,
    /// Sequence number of the triggering request
    pub seq: u64,
}
