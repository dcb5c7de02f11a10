use polyglot_kernel::{CommandOutcome, EventKind, FormattedValue, KernelCommand, KernelEvent};
use serde_json::Value;

use super::{JupyterRequestContext, RequestHandlers, send_observed};
use crate::content::{
    DisplayData, ErrorContent, ExecuteInput, ExecuteReply, ExecuteRequest, ExecuteResult,
    MimeBundle, ReplyStatus, Stream, Transient,
};
use crate::error::JupyterError;

const JSON: &str = "application/json";

pub(super) async fn handle(
    handlers: &RequestHandlers,
    ctx: &JupyterRequestContext,
) -> Result<(), JupyterError> {
    let request: ExecuteRequest = ctx.request.content_as()?;
    let execution_count = handlers.next_execution_count(request.silent);

    if !request.silent {
        ctx.iopub.publish(
            &ctx.request,
            "execute_input",
            ExecuteInput {
                code: request.code.clone(),
                execution_count,
            },
        )?;
    }

    let _stdin = ctx.stdin.begin(&ctx.request, request.allow_stdin);
    let mut outputs = Outputs {
        ctx,
        silent: request.silent,
        execution_count,
        failure: None,
    };
    let result = send_observed(
        &handlers.composite,
        KernelCommand::submit_code(request.code),
        |event| outputs.publish(event),
    )
    .await;
    if let Some(err) = outputs.failure {
        return Err(err);
    }

    let reply = match result.outcome() {
        CommandOutcome::Succeeded => ExecuteReply {
            status: ReplyStatus::Ok,
            execution_count,
            error: None,
        },
        CommandOutcome::Failed(message) => {
            let error = ErrorContent {
                ename: "Unhandled exception".into(),
                evalue: message.clone(),
                traceback: vec![message],
            };
            ctx.iopub.publish(&ctx.request, "error", &error)?;
            ExecuteReply {
                status: ReplyStatus::Error,
                execution_count,
                error: Some(error),
            }
        }
        CommandOutcome::Cancelled => ExecuteReply {
            status: ReplyStatus::Aborted,
            execution_count,
            error: None,
        },
    };
    ctx.reply.reply(&ctx.request, "execute_reply", reply)
}

/// Translates kernel events into IOPub output for one execution.
struct Outputs<'a> {
    ctx: &'a JupyterRequestContext,
    silent: bool,
    execution_count: u64,
    failure: Option<JupyterError>,
}

impl Outputs<'_> {
    fn publish(&mut self, event: &KernelEvent) {
        if self.silent || self.failure.is_some() {
            return;
        }
        if let Err(err) = self.translate(&event.kind) {
            self.failure = Some(err);
        }
    }

    fn translate(&self, kind: &EventKind) -> Result<(), JupyterError> {
        let (iopub, parent) = (&self.ctx.iopub, &self.ctx.request);
        match kind {
            EventKind::DisplayedValueProduced {
                formatted_values,
                value_id,
            } => iopub.publish(
                parent,
                "display_data",
                DisplayData {
                    data: bundle(formatted_values),
                    metadata: Default::default(),
                    transient: transient(value_id.as_deref()),
                },
            ),
            EventKind::DisplayedValueUpdated {
                formatted_values,
                value_id,
            } => iopub.publish(
                parent,
                "update_display_data",
                DisplayData {
                    data: bundle(formatted_values),
                    metadata: Default::default(),
                    transient: transient(Some(value_id)),
                },
            ),
            EventKind::ReturnValueProduced {
                formatted_values, ..
            } => iopub.publish(
                parent,
                "execute_result",
                ExecuteResult {
                    execution_count: self.execution_count,
                    data: bundle(formatted_values),
                    metadata: Default::default(),
                    transient: transient(None),
                },
            ),
            EventKind::StandardOutputValueProduced { formatted_values } => {
                iopub.publish(parent, "stream", Stream::stdout(plain_text(formatted_values)))
            }
            EventKind::StandardErrorValueProduced { formatted_values } => {
                iopub.publish(parent, "stream", Stream::stderr(plain_text(formatted_values)))
            }
            EventKind::ErrorProduced {
                message,
                formatted_values,
            } => {
                let text = if formatted_values.is_empty() {
                    message.clone()
                } else {
                    plain_text(formatted_values)
                };
                iopub.publish(parent, "stream", Stream::stderr(text))
            }
            EventKind::DiagnosticsProduced {
                diagnostics,
                formatted_values,
            } => {
                let lines: Vec<String> = if formatted_values.is_empty() {
                    diagnostics
                        .iter()
                        .map(|d| format!("{}: {}", d.code, d.message))
                        .collect()
                } else {
                    formatted_values.iter().map(|v| v.value.clone()).collect()
                };
                if lines.is_empty() {
                    return Ok(());
                }
                let text = format!("\n{}\n\n", lines.join("\n\n"));
                iopub.publish(parent, "stream", Stream::stderr(text))
            }
            _ => Ok(()),
        }
    }
}

/// One entry per mime type. JSON values are embedded as JSON rather than as
/// strings.
fn bundle(values: &[FormattedValue]) -> MimeBundle {
    values
        .iter()
        .map(|v| {
            let value = if v.mime_type == JSON {
                serde_json::from_str(&v.value).unwrap_or_else(|_| Value::String(v.value.clone()))
            } else {
                Value::String(v.value.clone())
            };
            (v.mime_type.clone(), value)
        })
        .collect()
}

fn plain_text(values: &[FormattedValue]) -> String {
    values
        .iter()
        .find(|v| v.mime_type == polyglot_kernel::event::PLAIN_TEXT)
        .or_else(|| values.first())
        .map(|v| v.value.clone())
        .unwrap_or_default()
}

fn transient(display_id: Option<&str>) -> Transient {
    Transient {
        display_id: display_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
    }
}
