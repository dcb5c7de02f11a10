//! The Jupyter adapter: reads shell and control messages, brackets each one
//! with busy/idle status on IOPub, and hands requests to the composite.
//!
//! `kernel_info_request` and `shutdown_request` are answered in the read
//! loop. Execute, complete, is-complete and interrupt requests are queued on
//! one [`SerialScheduler`] so they run in arrival order while the loop keeps
//! reading. Interrupts on the control channel skip the queue.

use std::sync::Arc;

use polyglot_kernel::{CommandKind, CompositeKernel, KernelCommand, SerialScheduler};
use tokio::sync::mpsc;

use crate::channels::{IoPubChannel, ReplyChannel, StdinChannel, StdinProvider};
use crate::connection::{ChannelKind, ConnectionInfo};
use crate::content::{
    ExecutionState, KernelInfoReply, LanguageInfo, ReplyStatus, ShutdownReply, ShutdownRequest,
};
use crate::error::JupyterError;
use crate::handlers::{JupyterRequestContext, RequestHandlers};
use crate::message::{Frames, Message};
use crate::signature::Signer;
use crate::transport::{KernelSockets, tcp};

pub struct JupyterAdapter {
    composite: CompositeKernel,
    signer: Signer,
    handlers: Arc<RequestHandlers>,
    scheduler: SerialScheduler,
    shell: ReplyChannel,
    control: ReplyChannel,
    iopub: IoPubChannel,
    stdin: Arc<StdinProvider>,
    shell_in: mpsc::UnboundedReceiver<Frames>,
    control_in: mpsc::UnboundedReceiver<Frames>,
}

impl JupyterAdapter {
    pub fn new(composite: CompositeKernel, sockets: KernelSockets, signer: Signer) -> Self {
        let kernel_identity = uuid::Uuid::new_v4().to_string();
        let stdin = Arc::new(StdinProvider::new(StdinChannel::new(
            sockets.stdin.outbound,
            sockets.stdin.inbound,
            signer.clone(),
        )));
        composite.set_input_provider(stdin.clone());
        Self {
            handlers: Arc::new(RequestHandlers::new(composite.clone())),
            scheduler: SerialScheduler::new("jupyter-shell"),
            shell: ReplyChannel::new("shell", sockets.shell.outbound, signer.clone()),
            control: ReplyChannel::new("control", sockets.control.outbound, signer.clone()),
            iopub: IoPubChannel::new(sockets.iopub, signer.clone(), &kernel_identity),
            stdin,
            shell_in: sockets.shell.inbound,
            control_in: sockets.control.inbound,
            composite,
            signer,
        }
    }

    /// Serves until the composite receives `Quit`. A message that fails
    /// signature or framing checks, or a closed channel, ends the adapter
    /// with an error.
    pub async fn run(mut self) -> Result<(), JupyterError> {
        let quit = self.composite.quit_signal();
        tracing::info!("jupyter adapter running");
        loop {
            tokio::select! {
                biased;
                _ = quit.cancelled() => {
                    tracing::info!("jupyter adapter stopping");
                    return Ok(());
                }
                frames = self.control_in.recv() => {
                    let frames = frames.ok_or(JupyterError::ChannelClosed("control"))?;
                    let request = Message::from_frames(frames, &self.signer)?;
                    self.on_control(request)?;
                }
                frames = self.shell_in.recv() => {
                    let frames = frames.ok_or(JupyterError::ChannelClosed("shell"))?;
                    let request = Message::from_frames(frames, &self.signer)?;
                    self.on_shell(request)?;
                }
            }
        }
    }

    fn on_shell(&self, request: Message) -> Result<(), JupyterError> {
        tracing::debug!("shell: {} {}", request.msg_type(), request.header.msg_id);
        self.iopub.status(&request, ExecutionState::Busy)?;
        match request.msg_type() {
            "kernel_info_request" => self.kernel_info(&self.shell, &request),
            "shutdown_request" => self.shutdown(&self.shell, &request),
            msg_type if RequestHandlers::handles(msg_type) => {
                self.schedule(request, self.shell.clone())
            }
            other => {
                tracing::warn!("ignoring unsupported shell message '{other}'");
                self.iopub.status(&request, ExecutionState::Idle)
            }
        }
    }

    fn on_control(&self, request: Message) -> Result<(), JupyterError> {
        tracing::debug!("control: {} {}", request.msg_type(), request.header.msg_id);
        self.iopub.status(&request, ExecutionState::Busy)?;
        match request.msg_type() {
            "interrupt_request" => {
                let ctx = self.context(request, self.control.clone());
                let handlers = self.handlers.clone();
                tokio::spawn(async move {
                    if let Err(err) = handlers.handle(&ctx).await {
                        tracing::warn!("interrupt failed: {err}");
                    }
                    idle(&ctx.iopub, &ctx.request);
                });
                Ok(())
            }
            "shutdown_request" => self.shutdown(&self.control, &request),
            "kernel_info_request" => self.kernel_info(&self.control, &request),
            other => {
                tracing::warn!("ignoring unsupported control message '{other}'");
                self.iopub.status(&request, ExecutionState::Idle)
            }
        }
    }

    fn context(&self, request: Message, reply: ReplyChannel) -> JupyterRequestContext {
        JupyterRequestContext {
            request,
            reply,
            iopub: self.iopub.clone(),
            stdin: self.stdin.clone(),
        }
    }

    /// Queues the request and publishes idle once its handler is done,
    /// however it ended.
    fn schedule(&self, request: Message, reply: ReplyChannel) -> Result<(), JupyterError> {
        let ctx = Arc::new(self.context(request, reply));
        let handlers = self.handlers.clone();
        let job = self.scheduler.schedule({
            let ctx = ctx.clone();
            async move { handlers.handle(&ctx).await }
        })?;
        tokio::spawn(async move {
            match job.wait().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!("{} failed: {err}", ctx.request.msg_type()),
                Err(err) => tracing::error!("{} handler crashed: {err}", ctx.request.msg_type()),
            }
            idle(&ctx.iopub, &ctx.request);
        });
        Ok(())
    }

    fn kernel_info(&self, channel: &ReplyChannel, request: &Message) -> Result<(), JupyterError> {
        channel.reply(request, "kernel_info_reply", KernelInfoReply::new(self.language_info()))?;
        self.iopub.status(request, ExecutionState::Idle)
    }

    fn shutdown(&self, channel: &ReplyChannel, request: &Message) -> Result<(), JupyterError> {
        let restart = request
            .content_as::<ShutdownRequest>()
            .map(|r| r.restart)
            .unwrap_or(false);
        channel.reply(
            request,
            "shutdown_reply",
            ShutdownReply {
                status: ReplyStatus::Ok,
                restart,
            },
        )?;
        self.iopub.status(request, ExecutionState::Idle)?;
        tracing::info!("shutdown requested");
        tokio::spawn(self.composite.send(KernelCommand::new(CommandKind::Quit)));
        Ok(())
    }

    /// Language of the default kernel.
    fn language_info(&self) -> LanguageInfo {
        let info = self
            .composite
            .default_kernel_name()
            .and_then(|name| self.composite.find(&name))
            .map(|kernel| kernel.info());
        match info {
            Some(info) => LanguageInfo::for_language(
                info.language_name.as_deref().unwrap_or(&info.local_name),
                info.language_version.as_deref().unwrap_or(""),
            ),
            None => LanguageInfo::for_language("polyglot", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn idle(iopub: &IoPubChannel, request: &Message) {
    if let Err(err) = iopub.status(request, ExecutionState::Idle) {
        tracing::warn!("could not publish idle: {err}");
    }
}

/// Binds the channels in `info` and serves the composite on them.
pub async fn serve(info: &ConnectionInfo, composite: CompositeKernel) -> Result<(), JupyterError> {
    let signer = Signer::new(&info.signature_scheme, &info.key)?;
    let bound = tcp::bind(info).await?;
    tracing::info!(
        "jupyter shell listening on {}",
        bound.info.endpoint(ChannelKind::Shell)
    );
    JupyterAdapter::new(composite, bound.sockets, signer).run().await
}
