//! Local stand-in for a kernel on the other side of a connection.

use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use polyglot_kernel::command::token_is_self_or_descendant;
use polyglot_kernel::{
    CommandKind, EventKind, KernelCommand, KernelError, KernelEvent, KernelHandler, KernelInfo,
    KernelInvocationContext, KernelUri,
};
use tokio::sync::broadcast;

use crate::connection::ConnectionSender;

pub struct ProxyHandler {
    remote_uri: KernelUri,
    sender: ConnectionSender,
    incoming: broadcast::Sender<KernelEvent>,
    remote_info: RwLock<KernelInfo>,
    /// Tokens of commands forwarded and not yet finished. The remote sees
    /// each one as a root of its own.
    forwarded: Mutex<Vec<String>>,
}

struct Forwarded<'a> {
    list: &'a Mutex<Vec<String>>,
    token: String,
}

impl<'a> Forwarded<'a> {
    fn track(list: &'a Mutex<Vec<String>>, token: &str) -> Self {
        if let Ok(mut tokens) = list.lock() {
            tokens.push(token.to_string());
        }
        Self {
            list,
            token: token.to_string(),
        }
    }
}

impl Drop for Forwarded<'_> {
    fn drop(&mut self) {
        if let Ok(mut tokens) = self.list.lock() {
            if let Some(pos) = tokens.iter().rposition(|t| *t == self.token) {
                tokens.remove(pos);
            }
        }
    }
}

impl ProxyHandler {
    /// `incoming` carries every event received on the connection.
    pub fn new(
        remote_uri: KernelUri,
        sender: ConnectionSender,
        incoming: broadcast::Sender<KernelEvent>,
    ) -> Self {
        Self {
            remote_info: RwLock::new(KernelInfo {
                local_name: remote_uri.local_name().to_string(),
                ..KernelInfo::default()
            }),
            remote_uri,
            sender,
            incoming,
            forwarded: Mutex::new(Vec::new()),
        }
    }

    /// Seeds the advertised capabilities, usually from the remote's
    /// `KernelReady`.
    pub fn with_remote_info(self, info: KernelInfo) -> Self {
        self.update_remote_info(&info);
        self
    }

    pub fn remote_uri(&self) -> &KernelUri {
        &self.remote_uri
    }

    fn update_remote_info(&self, info: &KernelInfo) {
        if info.uri.as_ref() != Some(&self.remote_uri) {
            return;
        }
        if let Ok(mut slot) = self.remote_info.write() {
            tracing::debug!(
                "proxy for {} now supports {:?}",
                self.remote_uri,
                info.supported_kernel_commands
            );
            *slot = info.clone();
        }
    }

    /// Remote tokens a local cancel for `token` has to name.
    fn remote_cancel_tokens(&self, token: &str) -> Vec<String> {
        let Ok(forwarded) = self.forwarded.lock() else {
            return vec![token.to_string()];
        };
        let mut tokens: Vec<String> = Vec::new();
        for remote in forwarded.iter() {
            let target = if token_is_self_or_descendant(remote, token) {
                remote.as_str()
            } else if token_is_self_or_descendant(token, remote) {
                token
            } else {
                continue;
            };
            if !tokens.iter().any(|t| t == target) {
                tokens.push(target.to_string());
            }
        }
        if tokens.is_empty() {
            tokens.push(token.to_string());
        }
        tokens
    }

    fn forward_cancel(&self, command_token: Option<String>) {
        let cancel = KernelCommand::new(CommandKind::Cancel { command_token })
            .target(self.remote_uri.to_string());
        if let Err(err) = self.sender.send_command(&cancel) {
            tracing::warn!("could not forward cancel to {}: {err}", self.remote_uri);
        }
    }
}

#[async_trait]
impl KernelHandler for ProxyHandler {
    fn kernel_info(&self) -> KernelInfo {
        let remote = self
            .remote_info
            .read()
            .map(|info| info.clone())
            .unwrap_or_default();
        KernelInfo {
            is_proxy: true,
            remote_uri: Some(self.remote_uri.clone()),
            uri: None,
            ..remote
        }
    }

    async fn handle(
        &self,
        command: &KernelCommand,
        ctx: &KernelInvocationContext,
    ) -> Result<(), KernelError> {
        if command.routing_slip().contains(&self.remote_uri) {
            return Err(KernelError::RoutingCycle(self.remote_uri.to_string()));
        }

        let mut events = self.incoming.subscribe();
        let mut outbound = command.clone();
        outbound.set_target_kernel_uri(Some(self.remote_uri.to_string()));
        outbound.set_origin_uri(Some(ctx.handling_kernel_uri().clone()));
        let _forwarded = Forwarded::track(&self.forwarded, outbound.token());
        self.sender
            .send_command(&outbound)
            .map_err(|e| KernelError::Transport(e.to_string()))?;
        tracing::debug!(
            "forwarded {} {} to {}",
            command.kind().name(),
            command.token(),
            self.remote_uri
        );

        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("proxy for {} skipped {n} events", self.remote_uri);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(KernelError::Transport(format!(
                        "connection to {} closed",
                        self.remote_uri
                    )));
                }
            };
            if !token_is_self_or_descendant(event.token(), command.token()) {
                continue;
            }
            if event.token() == command.token() {
                match &event.kind {
                    EventKind::CommandSucceeded => return Ok(()),
                    EventKind::CommandFailed { message } => {
                        return Err(KernelError::Handler(message.clone()));
                    }
                    EventKind::CommandCancelled => return Err(KernelError::Cancelled),
                    _ => {}
                }
            } else if event.is_terminal() {
                continue;
            }
            if let EventKind::KernelInfoProduced { kernel_info } = &event.kind {
                self.update_remote_info(kernel_info);
            }
            ctx.publish_event(event);
        }
    }

    fn on_cancel(&self, command_token: Option<&str>) {
        match command_token {
            None => self.forward_cancel(None),
            Some(token) => {
                for remote in self.remote_cancel_tokens(token) {
                    self.forward_cancel(Some(remote));
                }
            }
        }
    }
}
