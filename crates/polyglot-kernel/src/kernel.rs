//! A named, addressable command handler with its own serial scheduler.

use std::sync::{Arc, OnceLock, RwLock, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tokio::sync::{broadcast, oneshot};

use crate::cancellation::{CancellationToken, InFlightTable};
use crate::command::{CommandKind, KernelCommand, SubmissionType};
use crate::context::{EventBus, InputProvider, KernelInvocationContext, KernelParent, Scope};
use crate::directive::{Directive, DirectiveRegistry};
use crate::error::KernelError;
use crate::event::{EventKind, KernelCommandResult, KernelEvent};
use crate::kernel_info::KernelInfo;
use crate::scheduler::SerialScheduler;
use crate::submission::{self, Chunk};
use crate::uri::KernelUri;

const EVENT_CAPACITY: usize = 4096;

/// Language-specific behavior behind a [`Kernel`].
///
/// The kernel takes care of scheduling, cancellation, directives and the
/// submission bookkeeping events; `handle` sees language code with directive
/// lines removed, plus every other command kind except `Cancel`.
#[async_trait]
pub trait KernelHandler: Send + Sync + 'static {
    fn kernel_info(&self) -> KernelInfo;

    async fn handle(
        &self,
        command: &KernelCommand,
        context: &KernelInvocationContext,
    ) -> Result<(), KernelError>;

    async fn is_complete_submission(&self, _code: &str) -> bool {
        true
    }

    /// Called after an in-flight command on this kernel was cancelled.
    fn on_cancel(&self, _command_token: Option<&str>) {}
}

struct KernelInner {
    name: String,
    aliases: RwLock<Vec<String>>,
    uri: RwLock<KernelUri>,
    handler: Arc<dyn KernelHandler>,
    directives: DirectiveRegistry,
    scheduler: SerialScheduler,
    events: broadcast::Sender<KernelEvent>,
    in_flight: Arc<InFlightTable>,
    parent: OnceLock<Weak<dyn KernelParent>>,
    input: RwLock<Option<Arc<dyn InputProvider>>>,
}

#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    pub fn new(name: impl Into<String>, handler: impl KernelHandler) -> Self {
        Self::from_arc(name, Arc::new(handler))
    }

    pub fn from_arc(name: impl Into<String>, handler: Arc<dyn KernelHandler>) -> Self {
        let name = name.into();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(KernelInner {
                uri: RwLock::new(KernelUri::for_process().join(&name)),
                scheduler: SerialScheduler::new(name.clone()),
                name,
                aliases: RwLock::new(Vec::new()),
                handler,
                directives: DirectiveRegistry::new(),
                events,
                in_flight: Arc::new(InFlightTable::default()),
                parent: OnceLock::new(),
                input: RwLock::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn aliases(&self) -> Vec<String> {
        self.inner
            .aliases
            .read()
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    pub fn uri(&self) -> KernelUri {
        self.inner
            .uri
            .read()
            .map(|u| u.clone())
            .unwrap_or_else(|_| KernelUri::for_process().join(&self.inner.name))
    }

    pub fn is_proxy(&self) -> bool {
        self.inner.handler.kernel_info().is_proxy
    }

    pub fn info(&self) -> KernelInfo {
        let mut info = self.inner.handler.kernel_info();
        info.local_name = self.inner.name.clone();
        info.aliases = self.aliases();
        info.uri = Some(self.uri());
        if info.display_name.is_empty() {
            info.display_name = self.inner.name.clone();
        }
        for name in self.inner.directives.names() {
            if !info.supported_directives.contains(&name) {
                info.supported_directives.push(name);
            }
        }
        info
    }

    pub fn directives(&self) -> &DirectiveRegistry {
        &self.inner.directives
    }

    pub fn add_directive(&self, directive: Directive) -> Result<(), KernelError> {
        self.inner.directives.register(directive)
    }

    /// Events of root commands handled by this kernel.
    pub fn subscribe(&self) -> broadcast::Receiver<KernelEvent> {
        self.inner.events.subscribe()
    }

    pub fn set_input_provider(&self, provider: Arc<dyn InputProvider>) {
        if let Ok(mut slot) = self.inner.input.write() {
            *slot = Some(provider);
        }
    }

    /// Whether `target` (a name, alias or URI) addresses this kernel.
    pub fn answers_to(&self, target: &str) -> bool {
        if target.eq_ignore_ascii_case(&self.inner.name)
            || self
                .aliases()
                .iter()
                .any(|a| a.eq_ignore_ascii_case(target))
        {
            return true;
        }
        KernelUri::is_kernel_uri(target)
            && (self.uri().as_str() == target
                || self
                    .inner
                    .handler
                    .kernel_info()
                    .remote_uri
                    .is_some_and(|r| r.as_str() == target))
    }

    /// Sends a root command. The command is queued before this returns; the
    /// returned future resolves with its terminal event. Command faults are
    /// reported in the result, never as errors.
    pub fn send(&self, mut command: KernelCommand) -> BoxFuture<'static, KernelCommandResult> {
        command.routing_slip_mut().stamp(self.uri());
        match command.kind() {
            CommandKind::Cancel { command_token } => {
                let token = command_token.clone();
                let ctx = self.root_context(command);
                self.interrupt(token.as_deref());
                ctx.complete();
                return future::ready(ctx.result()).boxed();
            }
            CommandKind::RequestKernelInfo if !self.is_proxy() => {
                let ctx = self.root_context(command);
                ctx.publish(EventKind::KernelInfoProduced {
                    kernel_info: self.info(),
                });
                ctx.complete();
                return future::ready(ctx.result()).boxed();
            }
            _ => {}
        }

        let kernel = self.clone();
        let queued = command.clone();
        let scheduled = self.inner.scheduler.schedule(async move {
            let ctx = kernel.root_context(queued);
            kernel.run_in(&ctx).await;
            ctx.result()
        });
        let kernel = self.clone();
        async move {
            let outcome = match scheduled {
                Ok(job) => job.wait().await,
                Err(err) => Err(err),
            };
            outcome.unwrap_or_else(|err| {
                log::error!("kernel '{}' scheduler failure: {err}", kernel.inner.name);
                let ctx = kernel.root_context(command);
                ctx.fail(err.to_string());
                ctx.result()
            })
        }
        .boxed()
    }

    /// Cancels in-flight work. With a token, only that command's tree.
    pub fn interrupt(&self, command_token: Option<&str>) -> bool {
        let hit = self.inner.in_flight.cancel(command_token);
        if hit {
            log::info!("cancelled in-flight work on '{}'", self.inner.name);
            self.inner.handler.on_cancel(command_token);
        }
        hit
    }

    /// Holds a slot in this kernel's queue for the command tree rooted at
    /// `root`. Once the slot is reached the tree counts as running here, so
    /// its child commands run inline until the reservation is dropped.
    pub(crate) fn reserve(
        &self,
        root: &str,
        cancellation: CancellationToken,
    ) -> Result<Reservation, KernelError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let in_flight = self.inner.in_flight.clone();
        let root = root.to_string();
        self.inner.scheduler.schedule(async move {
            let _guard = in_flight.enter(&root, &root, cancellation);
            let _ = ready_tx.send(());
            let _ = release_rx.await;
        })?;
        Ok(Reservation {
            kernel: self.inner.name.clone(),
            ready: Some(ready_rx),
            _release: release_tx,
        })
    }

    pub(crate) fn attach(
        &self,
        parent: Weak<dyn KernelParent>,
        uri: KernelUri,
        aliases: Vec<String>,
    ) -> Result<(), KernelError> {
        self.inner
            .parent
            .set(parent)
            .map_err(|_| KernelError::AlreadyAttached(self.inner.name.clone()))?;
        if let Ok(mut slot) = self.inner.uri.write() {
            *slot = uri;
        }
        if let Ok(mut slot) = self.inner.aliases.write() {
            *slot = aliases;
        }
        Ok(())
    }

    /// Runs a child command from another kernel's context. Queued behind this
    /// kernel's other work, unless this kernel is already running the same
    /// command tree.
    pub(crate) async fn send_child(
        &self,
        mut command: KernelCommand,
        parent: &KernelInvocationContext,
    ) -> KernelCommandResult {
        if command.routing_slip().contains(self.uri()) {
            let err = KernelError::RoutingCycle(self.uri().to_string());
            return parent.child_failure(command, err);
        }
        command.routing_slip_mut().stamp(self.uri());
        if self.inner.in_flight.runs_tree(command.root_token()) {
            return self.run_child_inline(command, parent).await;
        }
        let kernel = self.clone();
        let parent_ctx = parent.clone();
        let queued = command.clone();
        let run = self
            .inner
            .scheduler
            .run(async move { kernel.run_child_inline(queued, &parent_ctx).await });
        match run.await {
            Ok(result) => result,
            Err(err) => parent.child_failure(command, err),
        }
    }

    pub(crate) async fn run_child_inline(
        &self,
        command: KernelCommand,
        parent: &KernelInvocationContext,
    ) -> KernelCommandResult {
        let ctx = KernelInvocationContext::child(parent, command, self.scope(false));
        self.run_in(&ctx).await;
        ctx.result()
    }

    fn root_context(&self, command: KernelCommand) -> KernelInvocationContext {
        KernelInvocationContext::root(command, self.scope(true))
    }

    fn scope(&self, with_buses: bool) -> Scope {
        let parent = self.inner.parent.get().cloned();
        let live_parent = parent.as_ref().and_then(Weak::upgrade);
        let input = self
            .inner
            .input
            .read()
            .ok()
            .and_then(|slot| slot.clone())
            .or_else(|| live_parent.as_ref().and_then(|p| p.input_provider()));
        let bus: Option<EventBus> = if with_buses {
            live_parent.as_ref().map(|p| p.bus())
        } else {
            None
        };
        Scope {
            handler_uri: self.uri(),
            kernel: Some(self.clone()),
            parent,
            own: with_buses.then(|| self.inner.events.clone()),
            bus,
            input,
        }
    }

    async fn run_in(&self, ctx: &KernelInvocationContext) {
        let _guard = self
            .inner
            .in_flight
            .enter(
                ctx.command().token(),
                ctx.command().root_token(),
                ctx.cancellation().clone(),
            );
        ctx.drive(self.invoke(ctx)).await;
    }

    async fn invoke(&self, ctx: &KernelInvocationContext) -> Result<(), KernelError> {
        let command = ctx.command();
        if self.is_proxy() {
            return self.inner.handler.handle(command, ctx).await;
        }
        match command.kind() {
            CommandKind::SubmitCode {
                code,
                submission_type,
            } => self.submit_code(code, *submission_type, ctx).await,
            CommandKind::RequestKernelInfo => {
                ctx.publish(EventKind::KernelInfoProduced {
                    kernel_info: self.info(),
                });
                Ok(())
            }
            CommandKind::RequestInput {
                prompt,
                is_password,
            } => {
                let value = ctx.request_input(prompt, *is_password).await?;
                ctx.publish(EventKind::InputProduced { value });
                Ok(())
            }
            CommandKind::Cancel { .. } | CommandKind::Quit => Ok(()),
            _ => self.inner.handler.handle(command, ctx).await,
        }
    }

    async fn submit_code(
        &self,
        code: &str,
        submission_type: SubmissionType,
        ctx: &KernelInvocationContext,
    ) -> Result<(), KernelError> {
        ctx.publish(EventKind::CodeSubmissionReceived {
            code: code.to_string(),
        });

        let chunks = submission::split_with(code, |name| self.inner.directives.contains(name));
        for chunk in &chunks {
            if let Chunk::Directive { name, .. } = chunk {
                if self.inner.directives.get(name).is_none() {
                    return Err(KernelError::UnknownDirective(name.clone()));
                }
            }
        }

        let language_code = submission::code_only(&chunks);
        let complete = language_code.trim().is_empty()
            || self.inner.handler.is_complete_submission(&language_code).await;
        if complete {
            ctx.publish(EventKind::CompleteCodeSubmissionReceived {
                code: code.to_string(),
            });
        } else {
            ctx.publish(EventKind::IncompleteCodeSubmissionReceived);
        }

        if submission_type == SubmissionType::Diagnose {
            return Ok(());
        }
        if !complete {
            return Err(KernelError::IncompleteSubmission);
        }

        for chunk in chunks {
            if ctx.is_complete() {
                break;
            }
            match chunk {
                Chunk::Directive { name, line } => {
                    let directive = self
                        .inner
                        .directives
                        .get(&name)
                        .ok_or(KernelError::UnknownDirective(name))?;
                    directive
                        .invoke(&line, ctx, Some(self.inner.name.clone()))
                        .await?;
                }
                Chunk::Code(text) => {
                    let language = ctx.command().with_kind(CommandKind::submit_code(text));
                    self.inner.handler.handle(&language, ctx).await?;
                }
            }
        }
        Ok(())
    }
}

/// A slot in a kernel's queue, released on drop.
pub(crate) struct Reservation {
    kernel: String,
    ready: Option<oneshot::Receiver<()>>,
    _release: oneshot::Sender<()>,
}

impl Reservation {
    /// Waits until every command queued before the reservation has finished.
    pub(crate) async fn acquired(&mut self) -> Result<(), KernelError> {
        match self.ready.take() {
            Some(ready) => ready
                .await
                .map_err(|_| KernelError::SchedulerClosed(self.kernel.clone())),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.inner.name)
            .field("uri", &self.uri())
            .finish()
    }
}
