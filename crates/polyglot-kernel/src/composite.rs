//! Routing among named child kernels.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tokio::sync::broadcast;

use crate::builtins::{escape_html, share};
use crate::cancellation::{CancellationToken, InFlightTable};
use crate::command::{CommandKind, KernelCommand, PUBLISH_INTERNAL_EVENTS, SubmissionType};
use crate::context::{EventBus, InputProvider, KernelInvocationContext, KernelParent, Scope};
use crate::directive::{Directive, DirectiveRegistry};
use crate::error::KernelError;
use crate::event::{CommandOutcome, EventKind, FormattedValue, KernelCommandResult, KernelEvent};
use crate::kernel::{Kernel, Reservation};
use crate::kernel_info::KernelInfo;
use crate::submission::{self, Chunk};
use crate::uri::KernelUri;

const EVENT_CAPACITY: usize = 4096;

#[derive(Default)]
struct Children {
    kernels: Vec<Kernel>,
    /// Lower-cased names and aliases to index in `kernels`.
    names: HashMap<String, usize>,
    default: Option<String>,
}

struct CompositeInner {
    name: String,
    uri: KernelUri,
    self_ref: Weak<CompositeInner>,
    children: RwLock<Children>,
    directives: DirectiveRegistry,
    events: broadcast::Sender<KernelEvent>,
    in_flight: Arc<InFlightTable>,
    /// Held while a split submission enqueues its reservations.
    reserving: Mutex<()>,
    input: RwLock<Option<Arc<dyn InputProvider>>>,
    quit: CancellationToken,
}

/// Owns child kernels and routes commands to them by name, alias or URI.
#[derive(Clone)]
pub struct CompositeKernel {
    inner: Arc<CompositeInner>,
}

#[derive(Clone)]
pub struct WeakCompositeKernel(Weak<CompositeInner>);

impl WeakCompositeKernel {
    pub fn upgrade(&self) -> Option<CompositeKernel> {
        self.0.upgrade().map(|inner| CompositeKernel { inner })
    }
}

impl CompositeKernel {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_uri(name, KernelUri::for_process())
    }

    pub fn with_uri(name: impl Into<String>, uri: KernelUri) -> Self {
        let name = name.into();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new_cyclic(|weak: &Weak<CompositeInner>| {
            let directives = DirectiveRegistry::new();
            for directive in [lsmagic_directive(weak.clone()), share::share_directive()] {
                if let Err(err) = directives.register(directive) {
                    log::warn!("builtin directive registration failed: {err}");
                }
            }
            CompositeInner {
                name,
                uri,
                self_ref: weak.clone(),
                children: RwLock::new(Children::default()),
                directives,
                events,
                in_flight: Arc::new(InFlightTable::default()),
                reserving: Mutex::new(()),
                input: RwLock::new(None),
                quit: CancellationToken::new(),
            }
        });
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn uri(&self) -> &KernelUri {
        &self.inner.uri
    }

    pub fn downgrade(&self) -> WeakCompositeKernel {
        WeakCompositeKernel(Arc::downgrade(&self.inner))
    }

    /// Registers a child. Names and aliases are unique, ignoring case. The
    /// first child added becomes the default.
    pub fn add(&self, kernel: Kernel, aliases: &[&str]) -> Result<(), KernelError> {
        let mut children = self
            .inner
            .children
            .write()
            .map_err(|_| KernelError::handler("child registry poisoned"))?;

        let mut keys = HashSet::new();
        for name in std::iter::once(kernel.name()).chain(aliases.iter().copied()) {
            let key = name.to_lowercase();
            if children.names.contains_key(&key) || !keys.insert(key) {
                return Err(KernelError::DuplicateName(name.to_string()));
            }
        }

        let parent: Weak<dyn KernelParent> = self.inner.self_ref.clone();
        kernel.attach(
            parent,
            self.inner.uri.join(kernel.name()),
            aliases.iter().map(|a| a.to_string()).collect(),
        )?;

        let index = children.kernels.len();
        for key in keys {
            children.names.insert(key, index);
        }
        if children.default.is_none() {
            children.default = Some(kernel.name().to_string());
        }
        log::info!("added kernel '{}' at {}", kernel.name(), kernel.uri());
        children.kernels.push(kernel);
        Ok(())
    }

    pub fn set_default_kernel(&self, name: &str) -> Result<(), KernelError> {
        let kernel = self.inner.resolve(Some(name))?;
        let mut children = self
            .inner
            .children
            .write()
            .map_err(|_| KernelError::handler("child registry poisoned"))?;
        children.default = Some(kernel.name().to_string());
        Ok(())
    }

    pub fn default_kernel_name(&self) -> Option<String> {
        self.inner
            .children
            .read()
            .ok()
            .and_then(|c| c.default.clone())
    }

    pub fn kernels(&self) -> Vec<Kernel> {
        self.inner
            .children
            .read()
            .map(|c| c.kernels.clone())
            .unwrap_or_default()
    }

    pub fn find(&self, target: &str) -> Option<Kernel> {
        self.inner.resolve(Some(target)).ok()
    }

    pub fn add_directive(&self, directive: Directive) -> Result<(), KernelError> {
        self.inner.directives.register(directive)
    }

    pub fn directives(&self) -> &DirectiveRegistry {
        &self.inner.directives
    }

    /// Every event of every command routed through this composite.
    pub fn subscribe(&self) -> broadcast::Receiver<KernelEvent> {
        self.inner.events.subscribe()
    }

    pub fn set_input_provider(&self, provider: Arc<dyn InputProvider>) {
        if let Ok(mut slot) = self.inner.input.write() {
            *slot = Some(provider);
        }
    }

    /// Cancelled when a `Quit` command is received.
    pub fn quit_signal(&self) -> CancellationToken {
        self.inner.quit.clone()
    }

    pub fn info(&self) -> KernelInfo {
        self.inner.info()
    }

    /// Routes a command to the kernel it targets, or to the default kernel.
    /// The command is queued on that kernel before this returns. Routing
    /// faults become `CommandFailed` without invoking any handler.
    pub fn send(&self, mut command: KernelCommand) -> BoxFuture<'static, KernelCommandResult> {
        command.routing_slip_mut().stamp(&self.inner.uri);
        let targets_self = self.inner.targets_self(command.target_kernel_uri());

        match command.kind().clone() {
            CommandKind::Cancel { command_token } if targets_self => {
                return future::ready(self.cancel(command, command_token.as_deref())).boxed();
            }
            CommandKind::Quit => {
                let ctx = self.inner.root_context(command);
                log::info!("quit requested");
                self.inner.quit.cancel();
                ctx.complete();
                return future::ready(ctx.result()).boxed();
            }
            CommandKind::RequestKernelInfo if command.target_kernel_uri().is_none() => {
                return future::ready(self.publish_kernel_infos(command)).boxed();
            }
            CommandKind::SubmitCode {
                code,
                submission_type,
            } if self.inner.needs_split(&code) => {
                return self.spawn_split(command, code, submission_type);
            }
            _ => {}
        }

        let target = if targets_self {
            None
        } else {
            command.target_kernel_uri()
        };
        let routed = match self.inner.resolve(target) {
            Ok(kernel) if command.routing_slip().contains(kernel.uri()) => {
                Err(KernelError::RoutingCycle(kernel.uri().to_string()))
            }
            Ok(kernel) => Ok(kernel),
            Err(err) => Err(err),
        };
        match routed {
            Ok(kernel) => kernel.send(command),
            Err(err) => future::ready(self.inner.fail_root(command, err)).boxed(),
        }
    }

    fn cancel(&self, command: KernelCommand, token: Option<&str>) -> KernelCommandResult {
        let ctx = self.inner.root_context(command);
        let mut hit = self.inner.in_flight.cancel(token);
        for kernel in self.kernels() {
            hit |= kernel.interrupt(token);
        }
        if !hit {
            log::debug!("cancel: nothing in flight");
        }
        ctx.complete();
        ctx.result()
    }

    fn publish_kernel_infos(&self, command: KernelCommand) -> KernelCommandResult {
        let ctx = self.inner.root_context(command);
        ctx.publish(EventKind::KernelInfoProduced {
            kernel_info: self.info(),
        });
        for kernel in self.kernels() {
            ctx.publish(EventKind::KernelInfoProduced {
                kernel_info: kernel.info(),
            });
        }
        ctx.complete();
        ctx.result()
    }

    /// Starts a submission that switches kernels or uses composite-level
    /// directives. Each run of code becomes a child command for the kernel
    /// selected at that point. Every kernel the submission will run code on
    /// is reserved before this returns, so commands sent afterwards queue
    /// behind it.
    fn spawn_split(
        &self,
        command: KernelCommand,
        code: String,
        submission_type: SubmissionType,
    ) -> BoxFuture<'static, KernelCommandResult> {
        let ctx = self.inner.root_context(command);
        let guard = self.inner.in_flight.enter(
            ctx.command().token(),
            ctx.command().root_token(),
            ctx.cancellation().clone(),
        );
        let reservations = match self.inner.reserve_split_targets(&ctx, &code) {
            Ok(reservations) => reservations,
            Err(err) => {
                drop(guard);
                log::warn!("split submission {} not queued: {err}", ctx.command().token());
                ctx.fail(err.to_string());
                return future::ready(ctx.result()).boxed();
            }
        };

        let this = self.clone();
        let task_ctx = ctx.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            this.run_split(&task_ctx, reservations, &code, submission_type)
                .await;
            task_ctx.result()
        });
        async move {
            task.await.unwrap_or_else(|err| {
                ctx.fail(KernelError::Panic(err.to_string()).to_string());
                ctx.result()
            })
        }
        .boxed()
    }

    async fn run_split(
        &self,
        ctx: &KernelInvocationContext,
        mut reservations: Vec<Reservation>,
        code: &str,
        submission_type: SubmissionType,
    ) {
        ctx.drive(async {
            for reservation in &mut reservations {
                reservation.acquired().await?;
            }
            self.split_submission(ctx, code, submission_type).await
        })
        .await;
    }

    async fn split_submission(
        &self,
        ctx: &KernelInvocationContext,
        code: &str,
        submission_type: SubmissionType,
    ) -> Result<(), KernelError> {
        ctx.publish(EventKind::CodeSubmissionReceived {
            code: code.to_string(),
        });

        let mut current = match ctx.command().target_kernel_uri() {
            Some(target) if !self.inner.targets_self(Some(target)) => {
                Some(self.inner.resolve(Some(target))?.name().to_string())
            }
            _ => self.default_kernel_name(),
        };
        let mut pending: Vec<String> = Vec::new();

        for chunk in self.inner.split(code) {
            match chunk {
                Chunk::Directive { name, line } => {
                    if let Some(kernel) = self.inner.chooser(&name) {
                        self.flush(ctx, &mut pending, current.as_deref(), submission_type)
                            .await?;
                        current = Some(kernel.name().to_string());
                    } else if let Some(directive) = self.inner.directives.get(&name) {
                        self.flush(ctx, &mut pending, current.as_deref(), submission_type)
                            .await?;
                        if submission_type == SubmissionType::Run {
                            directive.invoke(&line, ctx, current.clone()).await?;
                        }
                    } else {
                        pending.push(line);
                    }
                }
                Chunk::Code(text) => pending.push(text),
            }
        }
        self.flush(ctx, &mut pending, current.as_deref(), submission_type)
            .await
    }

    async fn flush(
        &self,
        ctx: &KernelInvocationContext,
        pending: &mut Vec<String>,
        target: Option<&str>,
        submission_type: SubmissionType,
    ) -> Result<(), KernelError> {
        let code = pending.join("\n");
        pending.clear();
        if code.trim().is_empty() {
            return Ok(());
        }
        let target = target.ok_or_else(|| KernelError::KernelNotFound("(default)".into()))?;
        let child = ctx
            .child_command(CommandKind::SubmitCode {
                code,
                submission_type,
            })
            .target(target)
            .property(PUBLISH_INTERNAL_EVENTS, "true");
        match ctx.send_child(child).await.outcome() {
            CommandOutcome::Succeeded => Ok(()),
            CommandOutcome::Failed(message) => Err(KernelError::Handler(message)),
            CommandOutcome::Cancelled => Err(KernelError::Cancelled),
        }
    }
}

impl CompositeInner {
    fn targets_self(&self, target: Option<&str>) -> bool {
        match target {
            None => true,
            Some(t) => t.eq_ignore_ascii_case(&self.name) || t == self.uri.as_str(),
        }
    }

    fn resolve(&self, target: Option<&str>) -> Result<Kernel, KernelError> {
        let children = self
            .children
            .read()
            .map_err(|_| KernelError::handler("child registry poisoned"))?;
        let target = match target {
            Some(t) if !self.targets_self(Some(t)) => t,
            _ => {
                let name = children
                    .default
                    .clone()
                    .ok_or_else(|| KernelError::KernelNotFound("(default)".into()))?;
                return children
                    .names
                    .get(&name.to_lowercase())
                    .map(|&i| children.kernels[i].clone())
                    .ok_or(KernelError::KernelNotFound(name));
            }
        };
        if let Some(&index) = children.names.get(&target.to_lowercase()) {
            return Ok(children.kernels[index].clone());
        }
        if KernelUri::is_kernel_uri(target) {
            if let Some(kernel) = children.kernels.iter().find(|k| k.answers_to(target)) {
                return Ok(kernel.clone());
            }
        }
        Err(KernelError::KernelNotFound(target.to_string()))
    }

    /// Child selected by a `#!name` line, if `name` is one.
    fn chooser(&self, directive: &str) -> Option<Kernel> {
        let name = directive.strip_prefix("#!")?;
        let children = self.children.read().ok()?;
        children
            .names
            .get(&name.to_lowercase())
            .map(|&i| children.kernels[i].clone())
    }

    /// Kernels a split submission will send code to, in first-use order.
    fn split_targets(&self, command: &KernelCommand, code: &str) -> Vec<Kernel> {
        let mut current = match command.target_kernel_uri() {
            Some(target) if !self.targets_self(Some(target)) => self.resolve(Some(target)).ok(),
            _ => self.resolve(None).ok(),
        };
        let mut targets: Vec<Kernel> = Vec::new();
        let mut pending = false;
        let mut take = |current: &Option<Kernel>, pending: &mut bool| {
            if let Some(kernel) = current.as_ref().filter(|_| *pending) {
                if !targets.iter().any(|k| k.name() == kernel.name()) {
                    targets.push(kernel.clone());
                }
            }
            *pending = false;
        };
        for chunk in self.split(code) {
            match chunk {
                Chunk::Directive { name, .. } => {
                    if let Some(kernel) = self.chooser(&name) {
                        take(&current, &mut pending);
                        current = Some(kernel);
                    } else if self.directives.get(&name).is_some() {
                        take(&current, &mut pending);
                    } else {
                        pending = true;
                    }
                }
                Chunk::Code(text) => pending |= !text.trim().is_empty(),
            }
        }
        take(&current, &mut pending);
        targets
    }

    fn reserve_split_targets(
        &self,
        ctx: &KernelInvocationContext,
        code: &str,
    ) -> Result<Vec<Reservation>, KernelError> {
        let targets = self.split_targets(ctx.command(), code);
        let _lock = self
            .reserving
            .lock()
            .map_err(|_| KernelError::handler("reservation lock poisoned"))?;
        targets
            .iter()
            .map(|kernel| kernel.reserve(ctx.command().root_token(), ctx.cancellation().clone()))
            .collect()
    }

    fn split(&self, code: &str) -> Vec<Chunk> {
        submission::split_with(code, |name| self.directives.contains(name))
    }

    fn needs_split(&self, code: &str) -> bool {
        self.split(code).iter().any(|chunk| match chunk {
            Chunk::Directive { name, .. } => {
                self.chooser(name).is_some() || self.directives.get(name).is_some()
            }
            Chunk::Code(_) => false,
        })
    }

    fn root_context(&self, command: KernelCommand) -> KernelInvocationContext {
        let parent: Weak<dyn KernelParent> = self.self_ref.clone();
        KernelInvocationContext::root(
            command,
            Scope {
                handler_uri: self.uri.clone(),
                kernel: None,
                parent: Some(parent),
                own: Some(self.events.clone()),
                bus: None,
                input: self.input_provider(),
            },
        )
    }

    fn fail_root(&self, command: KernelCommand, err: KernelError) -> KernelCommandResult {
        log::warn!("command {} not routed: {err}", command.token());
        let ctx = self.root_context(command);
        ctx.fail(err.to_string());
        ctx.result()
    }

    fn info(&self) -> KernelInfo {
        let mut directives = self.directives.names();
        if let Ok(children) = self.children.read() {
            for kernel in &children.kernels {
                directives.push(format!("#!{}", kernel.name()));
                for alias in kernel.aliases() {
                    directives.push(format!("#!{alias}"));
                }
            }
        }
        KernelInfo {
            local_name: self.name.clone(),
            display_name: self.name.clone(),
            uri: Some(self.uri.clone()),
            is_composite: true,
            supported_kernel_commands: CommandKind::ALL.iter().map(|c| c.to_string()).collect(),
            supported_directives: directives,
            ..KernelInfo::default()
        }
    }

    fn lsmagic_html(&self) -> String {
        let mut html = String::new();
        html.push_str(&format!("<h3>{}</h3><ul>", escape_html(&self.name)));
        for (name, description) in self.directives.describe() {
            html.push_str(&format!(
                "<li><code>{}</code> {}</li>",
                escape_html(&name),
                escape_html(&description)
            ));
        }
        html.push_str("</ul>");
        if let Ok(children) = self.children.read() {
            for kernel in &children.kernels {
                html.push_str(&format!(
                    "<h3>{} (<code>#!{}</code>)</h3><ul>",
                    escape_html(kernel.name()),
                    escape_html(kernel.name())
                ));
                for (name, description) in kernel.directives().describe() {
                    html.push_str(&format!(
                        "<li><code>{}</code> {}</li>",
                        escape_html(&name),
                        escape_html(&description)
                    ));
                }
                html.push_str("</ul>");
            }
        }
        html
    }
}

#[async_trait]
impl KernelParent for CompositeInner {
    async fn dispatch_child(
        &self,
        command: KernelCommand,
        parent: KernelInvocationContext,
    ) -> KernelCommandResult {
        match self.resolve(command.target_kernel_uri()) {
            Ok(kernel) => kernel.send_child(command, &parent).await,
            Err(err) => parent.child_failure(command, err),
        }
    }

    fn bus(&self) -> EventBus {
        EventBus {
            uri: self.uri.clone(),
            tx: self.events.clone(),
        }
    }

    fn input_provider(&self) -> Option<Arc<dyn InputProvider>> {
        self.input.read().ok().and_then(|slot| slot.clone())
    }
}

fn lsmagic_directive(composite: Weak<CompositeInner>) -> Directive {
    Directive::new(
        "#!lsmagic",
        "List the available directives.",
        move |inv| {
            let composite = composite.upgrade();
            async move {
                let composite =
                    composite.ok_or_else(|| KernelError::handler("kernel was disposed"))?;
                inv.context.publish(EventKind::DisplayedValueProduced {
                    formatted_values: vec![FormattedValue::html(composite.lsmagic_html())],
                    value_id: None,
                });
                Ok(())
            }
        },
    )
}
