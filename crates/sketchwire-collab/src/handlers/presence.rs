use async_trait::async_trait;
use tracing::{debug, info};

use super::{encode, release_all_for, HandlerContext, MessageHandler};
use crate::envelope::{Envelope, MessageType};
use crate::error::Result;
use crate::hub::Outbound;

/// Cursor moves and page switches: sequenced and rebroadcast, nothing else
pub struct PassthroughHandler;

#[async_trait]
impl MessageHandler for PassthroughHandler {
    async fn apply(&self, _ctx: &HandlerContext<'_>, envelope: Envelope) -> Result<Vec<Outbound>> {
        if envelope.kind == MessageType::PageSwitch {
            debug!(
                project_id = %envelope.project_id,
                user_id = %envelope.user_id,
                "Page switch"
            );
        }
        Ok(vec![Outbound::project(envelope)])
    }
}

/// `USER_JOIN`: announce, then replay in-progress strokes to the joiner
pub struct JoinHandler;

#[async_trait]
impl MessageHandler for JoinHandler {
    async fn apply(&self, ctx: &HandlerContext<'_>, envelope: Envelope) -> Result<Vec<Outbound>> {
        let strokes = ctx.session.strokes().snapshot().await?;
        info!(
            project_id = %envelope.project_id,
            user_id = %envelope.user_id,
            active_strokes = strokes.len(),
            "User joined"
        );

        let seq = envelope.seq;
        let mut out = Vec::with_capacity(strokes.len() + 1);
        out.push(Outbound::project(envelope));
        for stroke in strokes {
            let owner = stroke.user_id.clone();
            out.push(ctx.reply(
                MessageType::StrokeInit,
                &owner,
                encode(MessageType::StrokeInit, &stroke)?,
                seq,
            ));
        }
        Ok(out)
    }
}

/// `USER_LEAVE`: reclaim the leaver's locks before announcing the leave
pub struct LeaveHandler;

#[async_trait]
impl MessageHandler for LeaveHandler {
    async fn apply(&self, ctx: &HandlerContext<'_>, envelope: Envelope) -> Result<Vec<Outbound>> {
        let mut out = release_all_for(ctx.session, ctx.clock, &envelope.user_id).await?;
        info!(
            project_id = %envelope.project_id,
            user_id = %envelope.user_id,
            released = out.len(),
            "User left"
        );
        out.push(Outbound::project(envelope));
        Ok(out)
    }
}
