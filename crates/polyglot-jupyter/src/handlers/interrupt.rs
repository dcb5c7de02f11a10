use polyglot_kernel::{CommandKind, CompositeKernel, KernelCommand};

use super::JupyterRequestContext;
use crate::content::{InterruptReply, ReplyStatus};
use crate::error::JupyterError;

/// Cancels whatever is running on any child kernel.
pub(super) async fn handle(
    composite: &CompositeKernel,
    ctx: &JupyterRequestContext,
) -> Result<(), JupyterError> {
    let result = composite
        .send(KernelCommand::new(CommandKind::Cancel {
            command_token: None,
        }))
        .await;
    let status = if result.succeeded() {
        ReplyStatus::Ok
    } else {
        ReplyStatus::Error
    };
    ctx.reply
        .reply(&ctx.request, "interrupt_reply", InterruptReply { status })
}
