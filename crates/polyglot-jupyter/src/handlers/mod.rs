//! Handlers for the requests that run through the composite kernel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use polyglot_kernel::command::token_is_self_or_descendant;
use polyglot_kernel::{CompositeKernel, KernelCommand, KernelCommandResult, KernelEvent};
use tokio::sync::broadcast::error::RecvError;

use crate::channels::{IoPubChannel, ReplyChannel, StdinProvider};
use crate::error::JupyterError;
use crate::message::Message;

mod complete;
mod execute;
mod interrupt;
mod is_complete;

/// One inbound request and everything needed to answer it.
pub struct JupyterRequestContext {
    pub request: Message,
    /// Shell or control, whichever the request arrived on.
    pub reply: ReplyChannel,
    pub iopub: IoPubChannel,
    pub stdin: Arc<StdinProvider>,
}

pub struct RequestHandlers {
    composite: CompositeKernel,
    execution_count: AtomicU64,
}

impl RequestHandlers {
    pub fn new(composite: CompositeKernel) -> Self {
        Self {
            composite,
            execution_count: AtomicU64::new(0),
        }
    }

    pub fn handles(msg_type: &str) -> bool {
        matches!(
            msg_type,
            "execute_request" | "complete_request" | "is_complete_request" | "interrupt_request"
        )
    }

    pub async fn handle(&self, ctx: &JupyterRequestContext) -> Result<(), JupyterError> {
        match ctx.request.msg_type() {
            "execute_request" => execute::handle(self, ctx).await,
            "complete_request" => complete::handle(&self.composite, ctx).await,
            "is_complete_request" => is_complete::handle(&self.composite, ctx).await,
            "interrupt_request" => interrupt::handle(&self.composite, ctx).await,
            other => Err(JupyterError::Protocol(format!("no handler for '{other}'"))),
        }
    }

    fn next_execution_count(&self, silent: bool) -> u64 {
        if silent {
            self.execution_count.load(Ordering::SeqCst)
        } else {
            self.execution_count.fetch_add(1, Ordering::SeqCst) + 1
        }
    }
}

/// Sends `command` to the composite and hands every event of its command
/// tree to `observe` as it is published.
async fn send_observed(
    composite: &CompositeKernel,
    command: KernelCommand,
    mut observe: impl FnMut(&KernelEvent),
) -> KernelCommandResult {
    let token = command.token().to_string();
    let mut events = composite.subscribe();
    let mut pending = composite.send(command);
    let mut closed = false;
    let result = loop {
        tokio::select! {
            result = &mut pending => break result,
            event = events.recv(), if !closed => match event {
                Ok(event) if token_is_self_or_descendant(event.token(), &token) => observe(&event),
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("missed {missed} events for command {token}");
                }
                Err(RecvError::Closed) => closed = true,
            },
        }
    };
    while let Ok(event) = events.try_recv() {
        if token_is_self_or_descendant(event.token(), &token) {
            observe(&event);
        }
    }
    result
}
