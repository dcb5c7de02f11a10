use polyglot_kernel::{CommandKind, CompositeKernel, EventKind, KernelCommand};

use super::JupyterRequestContext;
use crate::content::{CompleteReply, CompleteRequest, ReplyStatus};
use crate::error::JupyterError;

pub(super) async fn handle(
    composite: &CompositeKernel,
    ctx: &JupyterRequestContext,
) -> Result<(), JupyterError> {
    let request: CompleteRequest = ctx.request.content_as()?;
    let cursor = request.cursor_pos;
    let result = composite
        .send(KernelCommand::new(CommandKind::RequestCompletions {
            code: request.code,
            cursor_position: cursor,
        }))
        .await;

    let (matches, cursor_start, cursor_end) = result
        .find(|kind| match kind {
            EventKind::CompletionsProduced {
                completions,
                replace_start,
                replace_end,
            } => Some((
                completions
                    .iter()
                    .map(|c| c.insert_text.clone())
                    .collect::<Vec<_>>(),
                replace_start.unwrap_or(cursor),
                replace_end.unwrap_or(cursor),
            )),
            _ => None,
        })
        .unwrap_or((Vec::new(), cursor, cursor));
    let status = if result.succeeded() {
        ReplyStatus::Ok
    } else {
        tracing::debug!("completion failed: {:?}", result.outcome());
        ReplyStatus::Error
    };

    ctx.reply.reply(
        &ctx.request,
        "complete_reply",
        CompleteReply {
            matches,
            cursor_start,
            cursor_end,
            metadata: Default::default(),
            status,
        },
    )
}
