//! Sync Coordinator
//!
//! Answers a `SYNC_REQUEST` with a chunked transfer addressed to the
//! requesting connection: `SYNC_RESPONSE_START`, one `SYNC_RESPONSE_CHUNK`
//! per slice of elements, then `SYNC_RESPONSE_END` with the lock and active
//! stroke snapshots.
//!
//! The anchor version and the element snapshot are captured together while
//! in-flight commits are held off, so every mutation with `version <= V` is
//! in the transfer and none with `version > V` is.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::document::DocumentStore;
use crate::envelope::{Envelope, MessageType, SERVER_USER};
use crate::error::{Error, Result};
use crate::hub::{ConnectionId, Outbound};
use crate::payload::{SyncChunk, SyncEnd, SyncRequest, SyncStart};
use crate::session::ProjectSession;

/// Default number of elements per chunk
pub const DEFAULT_SYNC_CHUNK_SIZE: usize = 100;

/// Builds chunked full-state transfers
#[derive(Debug, Clone, Copy)]
pub struct SyncCoordinator {
    chunk_size: usize,
}

impl Default for SyncCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_SYNC_CHUNK_SIZE)
    }
}

fn to_payload<T: Serialize>(kind: MessageType, value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::payload(kind.as_str(), e.to_string()))
}

impl SyncCoordinator {
    /// Coordinator with the given chunk size (zero is treated as one)
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Elements per chunk
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunk messages for `element_count` elements
    #[must_use]
    pub fn total_chunks(&self, element_count: usize) -> usize {
        element_count.div_ceil(self.chunk_size)
    }

    /// Produce the full response sequence for `request`, in send order.
    ///
    /// `request` must already carry its sequence number; it becomes the
    /// `seq` of `SYNC_RESPONSE_END`.
    pub async fn respond(
        &self,
        session: &ProjectSession,
        documents: &dyn DocumentStore,
        clock: &dyn Clock,
        requester: ConnectionId,
        request: &Envelope,
    ) -> Result<Vec<Outbound>> {
        let request_seq = request
            .seq
            .ok_or_else(|| Error::payload(request.kind.as_str(), "request has no sequence number"))?;
        let from_version = request
            .payload_as::<SyncRequest>()
            .unwrap_or_default()
            .from_version;

        let (version, elements) = {
            let _quiet = session.quiesce().await;
            let version = session.allocator().current_version().await?;
            let elements = documents.elements(session.id()).await?;
            (version, elements)
        };

        let lock_snapshot = session.locks().snapshot().await?;
        let active_stroke_snapshot = session.strokes().snapshot().await?;
        let total_chunks = self.total_chunks(elements.len());

        info!(
            project_id = %session.id(),
            user_id = %request.user_id,
            seq = request_seq,
            version,
            from_version = ?from_version,
            elements = elements.len(),
            total_chunks,
            "Sync requested"
        );

        let now = clock.now_ms();
        let reply = |kind: MessageType, payload: Value| {
            Outbound::connection(
                requester,
                Envelope::server(kind, session.id(), SERVER_USER, payload)
                    .with_timestamp(now),
            )
        };

        let mut out = Vec::with_capacity(total_chunks + 2);
        out.push(reply(
            MessageType::SyncResponseStart,
            to_payload(
                MessageType::SyncResponseStart,
                &SyncStart {
                    version,
                    total_chunks,
                },
            )?,
        ));

        for (chunk_index, slice) in elements.chunks(self.chunk_size).enumerate() {
            out.push(reply(
                MessageType::SyncResponseChunk,
                to_payload(
                    MessageType::SyncResponseChunk,
                    &SyncChunk {
                        chunk_index,
                        elements: slice.to_vec(),
                    },
                )?,
            ));
        }

        let mut end = reply(
            MessageType::SyncResponseEnd,
            to_payload(
                MessageType::SyncResponseEnd,
                &SyncEnd {
                    lock_snapshot,
                    active_stroke_snapshot,
                    version,
                    seq: request_seq,
                },
            )?,
        );
        end.envelope.seq = Some(request_seq);
        end.envelope.version = Some(version);
        out.push(end);

        debug!(project_id = %session.id(), messages = out.len(), "Sync response built");
        Ok(out)
    }
}
