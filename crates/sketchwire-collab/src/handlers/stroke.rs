use async_trait::async_trait;
use tracing::{debug, info};

use super::{HandlerContext, MessageHandler};
use crate::envelope::Envelope;
use crate::error::Result;
use crate::hub::Outbound;
use crate::payload::{StrokeAppend, StrokeEnd};

/// `STROKE_APPEND`: track the stroke, rebroadcast the block as-is
pub struct StrokeAppendHandler;

#[async_trait]
impl MessageHandler for StrokeAppendHandler {
    async fn apply(&self, ctx: &HandlerContext<'_>, envelope: Envelope) -> Result<Vec<Outbound>> {
        let append: StrokeAppend = envelope.payload_as()?;
        let outcome = ctx
            .session
            .strokes()
            .on_append(
                &envelope.user_id,
                &append.stroke_id,
                append.page_id,
                append.stroke_init,
                append.points,
            )
            .await?;

        debug!(
            project_id = %envelope.project_id,
            user_id = %envelope.user_id,
            stroke_id = %append.stroke_id,
            seq = ?envelope.seq,
            outcome = ?outcome,
            "Stroke append"
        );
        Ok(vec![Outbound::project(envelope)])
    }
}

/// `STROKE_END`: drop the stroke from the registry, then commit like any mutation
pub struct StrokeEndHandler;

#[async_trait]
impl MessageHandler for StrokeEndHandler {
    async fn apply(&self, ctx: &HandlerContext<'_>, envelope: Envelope) -> Result<Vec<Outbound>> {
        let end: StrokeEnd = envelope.payload_as()?;
        let was_active = ctx.session.strokes().on_end(&end.stroke_id).await?;
        let envelope = ctx.commit(envelope).await?;

        info!(
            project_id = %envelope.project_id,
            user_id = %envelope.user_id,
            stroke_id = %end.stroke_id,
            was_active,
            version = ?envelope.version,
            "Stroke ended"
        );
        Ok(vec![Outbound::project(envelope)])
    }
}
