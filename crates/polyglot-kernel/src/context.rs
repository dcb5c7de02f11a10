//! Per-command invocation context.
//!
//! Every handler receives the context of the command it is running. The
//! context stamps and records published events, forwards them toward the
//! caller, and seals itself once the command's terminal event is out. Child
//! commands get their own context linked to the parent's; their events reach
//! the outer stream only when the child (or an ancestor) carries
//! [`PUBLISH_INTERNAL_EVENTS`](crate::command::PUBLISH_INTERNAL_EVENTS), and
//! their terminal events stay with the child's result.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::broadcast;

use crate::cancellation::CancellationToken;
use crate::command::KernelCommand;
use crate::error::KernelError;
use crate::event::{EventKind, KernelCommandResult, KernelEvent};
use crate::kernel::Kernel;
use crate::scheduler::panic_message;
use crate::uri::KernelUri;

/// Source of interactive input (prompts, passwords) for executing code.
#[async_trait]
pub trait InputProvider: Send + Sync {
    async fn request_input(&self, prompt: &str, is_password: bool) -> Result<String, KernelError>;
}

/// Stamps its URI on every event it carries and broadcasts it.
#[derive(Clone)]
pub(crate) struct EventBus {
    pub(crate) uri: KernelUri,
    pub(crate) tx: broadcast::Sender<KernelEvent>,
}

impl EventBus {
    fn publish(&self, mut event: KernelEvent) {
        event.routing_slip.stamp(&self.uri);
        let _ = self.tx.send(event);
    }
}

/// What a kernel needs from the composite that owns it.
#[async_trait]
pub(crate) trait KernelParent: Send + Sync {
    async fn dispatch_child(
        &self,
        command: KernelCommand,
        parent: KernelInvocationContext,
    ) -> KernelCommandResult;

    fn bus(&self) -> EventBus;

    fn input_provider(&self) -> Option<Arc<dyn InputProvider>>;
}

/// Where a context runs.
pub(crate) struct Scope {
    pub(crate) handler_uri: KernelUri,
    pub(crate) kernel: Option<Kernel>,
    pub(crate) parent: Option<Weak<dyn KernelParent>>,
    pub(crate) own: Option<broadcast::Sender<KernelEvent>>,
    pub(crate) bus: Option<EventBus>,
    pub(crate) input: Option<Arc<dyn InputProvider>>,
}

enum Upstream {
    Root {
        own: Option<broadcast::Sender<KernelEvent>>,
        bus: Option<EventBus>,
    },
    Child {
        parent: KernelInvocationContext,
        visible: bool,
    },
}

#[derive(Default)]
struct ContextState {
    events: Vec<KernelEvent>,
    complete: bool,
}

struct ContextInner {
    command: KernelCommand,
    handler_uri: KernelUri,
    kernel: Option<Kernel>,
    parent: Option<Weak<dyn KernelParent>>,
    upstream: Upstream,
    cancellation: CancellationToken,
    input: Option<Arc<dyn InputProvider>>,
    state: Mutex<ContextState>,
}

#[derive(Clone)]
pub struct KernelInvocationContext {
    inner: Arc<ContextInner>,
}

impl KernelInvocationContext {
    pub(crate) fn root(command: KernelCommand, scope: Scope) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                command,
                handler_uri: scope.handler_uri,
                kernel: scope.kernel,
                parent: scope.parent,
                upstream: Upstream::Root {
                    own: scope.own,
                    bus: scope.bus,
                },
                cancellation: CancellationToken::new(),
                input: scope.input,
                state: Mutex::new(ContextState::default()),
            }),
        }
    }

    pub(crate) fn child(parent: &KernelInvocationContext, command: KernelCommand, scope: Scope) -> Self {
        let visible = command.publishes_internal_events()
            || parent.inner.command.publishes_internal_events();
        Self {
            inner: Arc::new(ContextInner {
                command,
                handler_uri: scope.handler_uri,
                kernel: scope.kernel,
                parent: scope.parent.or_else(|| parent.inner.parent.clone()),
                upstream: Upstream::Child {
                    parent: parent.clone(),
                    visible,
                },
                cancellation: parent.inner.cancellation.clone(),
                input: scope.input.or_else(|| parent.inner.input.clone()),
                state: Mutex::new(ContextState::default()),
            }),
        }
    }

    pub fn command(&self) -> &KernelCommand {
        &self.inner.command
    }

    /// URI of the kernel running this command.
    pub fn handling_kernel_uri(&self) -> &KernelUri {
        &self.inner.handler_uri
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancellation
    }

    pub fn is_complete(&self) -> bool {
        self.inner.state.lock().map(|s| s.complete).unwrap_or(true)
    }

    /// Publishes an event caused by this context's command.
    pub fn publish(&self, kind: EventKind) {
        self.publish_event(KernelEvent::new(kind, self.inner.command.clone()));
    }

    /// Publishes an event that already carries its command, e.g. one
    /// rehydrated from a remote kernel. Dropped once the context is sealed.
    pub fn publish_event(&self, mut event: KernelEvent) {
        let Ok(mut state) = self.inner.state.lock() else {
            return;
        };
        if state.complete {
            log::debug!(
                "dropping {} for completed command {}",
                event.kind.name(),
                self.inner.command.token()
            );
            return;
        }
        event.routing_slip.stamp(&self.inner.handler_uri);
        state.events.push(event.clone());
        if !event.is_terminal() {
            self.forward(event);
        }
    }

    pub fn complete(&self) {
        self.finish(EventKind::CommandSucceeded);
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.finish(EventKind::CommandFailed {
            message: message.into(),
        });
    }

    pub(crate) fn mark_cancelled(&self) {
        self.finish(EventKind::CommandCancelled);
    }

    pub fn result(&self) -> KernelCommandResult {
        let events = self
            .inner
            .state
            .lock()
            .map(|s| s.events.clone())
            .unwrap_or_default();
        KernelCommandResult {
            command: self.inner.command.clone(),
            events,
        }
    }

    /// Creates a child of this context's command.
    pub fn child_command(&self, kind: crate::command::CommandKind) -> KernelCommand {
        self.inner.command.child(kind)
    }

    /// Runs a child command. Children without a target, or targeting the
    /// kernel running this context, execute inline; others are routed
    /// through the owning composite.
    pub async fn send_child(&self, command: KernelCommand) -> KernelCommandResult {
        if let Some(kernel) = &self.inner.kernel {
            if command
                .target_kernel_uri()
                .is_none_or(|target| kernel.answers_to(target))
            {
                return kernel.run_child_inline(command, self).await;
            }
        }
        match self.inner.parent.as_ref().and_then(Weak::upgrade) {
            Some(parent) => parent.dispatch_child(command, self.clone()).await,
            None => {
                let target = command.target_kernel_uri().unwrap_or_default().to_string();
                self.child_failure(command, KernelError::KernelNotFound(target))
            }
        }
    }

    pub async fn request_input(&self, prompt: &str, is_password: bool) -> Result<String, KernelError> {
        let provider = self.inner.input.clone().ok_or(KernelError::InputUnavailable)?;
        provider.request_input(prompt, is_password).await
    }

    /// A child result that failed without running.
    pub(crate) fn child_failure(&self, command: KernelCommand, err: KernelError) -> KernelCommandResult {
        log::debug!("child command {} failed: {err}", command.token());
        let ctx = KernelInvocationContext::child(
            self,
            command,
            Scope {
                handler_uri: self.inner.handler_uri.clone(),
                kernel: None,
                parent: None,
                own: None,
                bus: None,
                input: None,
            },
        );
        ctx.fail(err.to_string());
        ctx.result()
    }

    /// Runs `work` as this context's handler: a panic or error fails the
    /// command, cancellation drops the work and publishes `CommandCancelled`,
    /// and normal completion succeeds unless the handler already finished
    /// the command itself.
    pub(crate) async fn drive<F>(&self, work: F)
    where
        F: Future<Output = Result<(), KernelError>>,
    {
        let cancellation = self.inner.cancellation.clone();
        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => None,
            res = AssertUnwindSafe(work).catch_unwind() => Some(res),
        };
        match outcome {
            None | Some(Ok(Err(KernelError::Cancelled))) => self.mark_cancelled(),
            Some(Ok(Ok(()))) => self.complete(),
            Some(Ok(Err(err))) => {
                log::debug!("command {} failed: {err}", self.inner.command.token());
                self.fail(err.to_string());
            }
            Some(Err(panic)) => {
                let err = KernelError::Panic(panic_message(panic.as_ref()));
                log::error!("command {} {err}", self.inner.command.token());
                self.fail(err.to_string());
            }
        }
    }

    fn finish(&self, kind: EventKind) {
        let Ok(mut state) = self.inner.state.lock() else {
            return;
        };
        if state.complete {
            return;
        }
        let mut event = KernelEvent::new(kind, self.inner.command.clone());
        event.routing_slip.stamp(&self.inner.handler_uri);
        state.events.push(event.clone());
        state.complete = true;
        if let Upstream::Root { .. } = self.inner.upstream {
            self.forward(event);
        }
    }

    fn forward(&self, event: KernelEvent) {
        match &self.inner.upstream {
            Upstream::Root { own, bus } => {
                if let Some(own) = own {
                    let _ = own.send(event.clone());
                }
                if let Some(bus) = bus {
                    bus.publish(event);
                }
            }
            Upstream::Child { parent, visible } => {
                if *visible {
                    parent.publish_event(event);
                }
            }
        }
    }
}
