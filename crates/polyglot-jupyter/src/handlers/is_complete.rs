use polyglot_kernel::{CommandKind, CompositeKernel, EventKind, KernelCommand, SubmissionType};

use super::JupyterRequestContext;
use crate::content::{IsCompleteReply, IsCompleteRequest};
use crate::error::JupyterError;

/// Runs the code as a diagnose-only submission: nothing executes, but the
/// kernel reports whether the submission is complete.
pub(super) async fn handle(
    composite: &CompositeKernel,
    ctx: &JupyterRequestContext,
) -> Result<(), JupyterError> {
    let request: IsCompleteRequest = ctx.request.content_as()?;
    let result = composite
        .send(KernelCommand::new(CommandKind::SubmitCode {
            code: request.code,
            submission_type: SubmissionType::Diagnose,
        }))
        .await;

    let incomplete = result
        .events
        .iter()
        .any(|e| matches!(e.kind, EventKind::IncompleteCodeSubmissionReceived));
    let status = if incomplete {
        "incomplete"
    } else if result.succeeded() {
        "complete"
    } else {
        "invalid"
    };

    ctx.reply.reply(
        &ctx.request,
        "is_complete_reply",
        IsCompleteReply {
            status: status.into(),
            indent: String::new(),
        },
    )
}
