use async_trait::async_trait;

use super::{HandlerContext, MessageHandler};
use crate::envelope::Envelope;
use crate::error::Result;
use crate::hub::Outbound;

/// `SYNC_REQUEST`: chunked transfer to the requesting connection
pub struct SyncRequestHandler;

#[async_trait]
impl MessageHandler for SyncRequestHandler {
    async fn apply(&self, ctx: &HandlerContext<'_>, envelope: Envelope) -> Result<Vec<Outbound>> {
        ctx.sync
            .respond(ctx.session, ctx.documents, ctx.clock, ctx.origin, &envelope)
            .await
    }
}
