use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{encode, HandlerContext, MessageHandler};
use crate::envelope::{Envelope, MessageType};
use crate::error::Result;
use crate::hub::Outbound;
use crate::lock::UpdateCheck;
use crate::payload::{ElementUpdate, ServerReject};

/// Element and page create/update/delete: version, persist, broadcast
pub struct MutationHandler;

#[async_trait]
impl MessageHandler for MutationHandler {
    async fn apply(&self, ctx: &HandlerContext<'_>, envelope: Envelope) -> Result<Vec<Outbound>> {
        let envelope = ctx.commit(envelope).await?;
        info!(
            project_id = %envelope.project_id,
            user_id = %envelope.user_id,
            kind = %envelope.kind,
            seq = ?envelope.seq,
            version = ?envelope.version,
            "Mutation committed"
        );
        Ok(vec![Outbound::project(envelope)])
    }
}

/// `ELEMENT_UPDATE`: lock-checked unless transient
pub struct ElementUpdateHandler;

#[async_trait]
impl MessageHandler for ElementUpdateHandler {
    async fn apply(&self, ctx: &HandlerContext<'_>, envelope: Envelope) -> Result<Vec<Outbound>> {
        let update = ElementUpdate::from_envelope(&envelope)?;
        let target = update.target()?;

        // Previews never persist or advance the version.
        if update.is_transient {
            debug!(
                project_id = %envelope.project_id,
                user_id = %envelope.user_id,
                element_id = ?target,
                "Transient update"
            );
            return Ok(vec![Outbound::project(envelope)]);
        }

        let check = ctx
            .session
            .locks()
            .check_for_update(&envelope.user_id, target, false)
            .await?;

        if let UpdateCheck::Locked { held_by } = check {
            warn!(
                project_id = %envelope.project_id,
                user_id = %envelope.user_id,
                element_id = ?target,
                held_by = %held_by,
                "Update rejected, element locked"
            );
            let reject = ServerReject {
                reason: "ELEMENT_LOCKED".to_string(),
                message: format!("Element is locked by user {}", held_by),
                original_event_type: envelope.kind.as_str().to_string(),
            };
            return Ok(vec![ctx.reply(
                MessageType::ServerReject,
                &envelope.user_id,
                encode(MessageType::ServerReject, &reject)?,
                envelope.seq,
            )]);
        }

        MutationHandler.apply(ctx, envelope).await
    }
}
