use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{encode, HandlerContext, MessageHandler};
use crate::clock::Clock;
use crate::envelope::{Envelope, MessageType};
use crate::error::Result;
use crate::hub::Outbound;
use crate::lock::LockOutcome;
use crate::payload::{ElementLocked, LockGranted, LockRejected, LockRelease, LockReleased, LockRequest};
use crate::session::ProjectSession;

/// `ELEMENT_LOCK_REQUEST`
pub struct LockRequestHandler;

#[async_trait]
impl MessageHandler for LockRequestHandler {
    async fn apply(&self, ctx: &HandlerContext<'_>, envelope: Envelope) -> Result<Vec<Outbound>> {
        let request: LockRequest = envelope.payload_as()?;
        let user_id = envelope.user_id.as_str();

        match ctx
            .session
            .locks()
            .request(user_id, &request.element_id, request.requested_ttl)
            .await?
        {
            LockOutcome::Granted(grant) => {
                info!(
                    project_id = %envelope.project_id,
                    user_id,
                    element_id = %grant.element_id,
                    expires_at = grant.expires_at,
                    "Lock granted"
                );
                let granted = LockGranted {
                    element_id: grant.element_id.clone(),
                    lock_token: grant.token,
                    expires_at: grant.expires_at,
                };
                let locked = ElementLocked {
                    element_id: grant.element_id,
                    locked_by: grant.owner_id,
                    expires_at: grant.expires_at,
                };
                Ok(vec![
                    ctx.reply(
                        MessageType::LockGranted,
                        user_id,
                        encode(MessageType::LockGranted, &granted)?,
                        envelope.seq,
                    ),
                    ctx.announce(
                        MessageType::ElementLock,
                        user_id,
                        encode(MessageType::ElementLock, &locked)?,
                    )
                    .await?,
                ])
            }
            LockOutcome::Rejected { held_by } => {
                warn!(
                    project_id = %envelope.project_id,
                    user_id,
                    element_id = %request.element_id,
                    held_by = %held_by,
                    "Lock rejected"
                );
                let rejected = LockRejected {
                    element_id: request.element_id,
                    reason: format!("Element is locked by user {}", held_by),
                    locked_by: held_by,
                };
                Ok(vec![ctx.reply(
                    MessageType::LockRejected,
                    user_id,
                    encode(MessageType::LockRejected, &rejected)?,
                    envelope.seq,
                )])
            }
        }
    }
}

/// `ELEMENT_LOCK_RELEASE`
pub struct LockReleaseHandler;

#[async_trait]
impl MessageHandler for LockReleaseHandler {
    async fn apply(&self, ctx: &HandlerContext<'_>, envelope: Envelope) -> Result<Vec<Outbound>> {
        let release: LockRelease = envelope.payload_as()?;
        let released = ctx
            .session
            .locks()
            .release(
                &envelope.user_id,
                &release.element_id,
                release.lock_token.as_deref(),
            )
            .await?;

        if !released {
            debug!(
                project_id = %envelope.project_id,
                user_id = %envelope.user_id,
                element_id = %release.element_id,
                "Release ignored, not owner"
            );
            return Ok(Vec::new());
        }

        info!(
            project_id = %envelope.project_id,
            user_id = %envelope.user_id,
            element_id = %release.element_id,
            "Lock released"
        );
        let payload = encode(
            MessageType::LockReleased,
            &LockReleased {
                element_id: release.element_id,
            },
        )?;
        Ok(vec![
            ctx.announce(MessageType::LockReleased, &envelope.user_id, payload)
                .await?,
        ])
    }
}

/// Release every lock `user_id` holds in the session's project.
///
/// Returns one `LOCK_RELEASED` broadcast per freed element, each with its
/// own sequence number. Used on leave and when a user's last connection
/// closes.
pub async fn release_all_for(
    session: &ProjectSession,
    clock: &dyn Clock,
    user_id: &str,
) -> Result<Vec<Outbound>> {
    let released = session.locks().release_all_for(user_id).await?;
    if !released.is_empty() {
        info!(
            project_id = %session.id(),
            user_id,
            count = released.len(),
            "Reclaimed locks"
        );
    }

    let mut out = Vec::with_capacity(released.len());
    for element_id in released {
        let seq = session.allocator().next_sequence().await?;
        let payload = encode(MessageType::LockReleased, &LockReleased { element_id })?;
        out.push(Outbound::project(
            Envelope::server(MessageType::LockReleased, session.id(), user_id, payload)
                .with_seq(seq)
                .with_timestamp(clock.now_ms()),
        ));
    }
    Ok(out)
}
