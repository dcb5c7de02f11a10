//! Typed senders over the raw transport queues: shell/control replies,
//! IOPub broadcasts, and stdin prompts.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use polyglot_kernel::{InputProvider, KernelError};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::content::{ExecutionState, InputReply, InputRequest, Status};
use crate::error::JupyterError;
use crate::message::{Frames, Message};
use crate::signature::Signer;

/// Replies on a request/reply channel (shell or control).
#[derive(Clone)]
pub struct ReplyChannel {
    name: &'static str,
    outbound: mpsc::UnboundedSender<Frames>,
    signer: Signer,
}

impl ReplyChannel {
    pub fn new(name: &'static str, outbound: mpsc::UnboundedSender<Frames>, signer: Signer) -> Self {
        Self {
            name,
            outbound,
            signer,
        }
    }

    pub fn reply(
        &self,
        request: &Message,
        msg_type: &str,
        content: impl Serialize,
    ) -> Result<(), JupyterError> {
        let reply = Message::reply(request, msg_type, content)?;
        self.outbound
            .send(reply.to_frames(&self.signer)?)
            .map_err(|_| JupyterError::ChannelClosed(self.name))
    }
}

#[derive(Clone)]
pub struct IoPubChannel {
    outbound: mpsc::UnboundedSender<Frames>,
    signer: Signer,
    kernel_identity: Arc<str>,
}

impl IoPubChannel {
    pub fn new(outbound: mpsc::UnboundedSender<Frames>, signer: Signer, kernel_identity: &str) -> Self {
        Self {
            outbound,
            signer,
            kernel_identity: Arc::from(kernel_identity),
        }
    }

    pub fn publish(
        &self,
        parent: &Message,
        msg_type: &str,
        content: impl Serialize,
    ) -> Result<(), JupyterError> {
        let content = serde_json::to_value(content)?;
        let message = match self.topic(msg_type, &content) {
            Some(topic) => Message::publish(parent, &topic, msg_type, content)?,
            None => {
                let mut message = Message::reply(parent, msg_type, content)?;
                message.identities.clear();
                message
            }
        };
        self.outbound
            .send(message.to_frames(&self.signer)?)
            .map_err(|_| JupyterError::ChannelClosed("iopub"))
    }

    pub fn status(&self, parent: &Message, state: ExecutionState) -> Result<(), JupyterError> {
        self.publish(
            parent,
            "status",
            Status {
                execution_state: state,
            },
        )
    }

    fn topic(&self, msg_type: &str, content: &Value) -> Option<String> {
        match msg_type {
            "status" | "execute_input" => Some(format!("kernel.{}.{msg_type}", self.kernel_identity)),
            "display_data" | "update_display_data" => Some("display_data".into()),
            "stream" => Some(format!(
                "stream.{}",
                content.get("name").and_then(Value::as_str).unwrap_or("stdout")
            )),
            "error" => None,
            other => Some(other.to_string()),
        }
    }
}

/// Sends `input_request` and waits for the matching `input_reply`.
pub struct StdinChannel {
    outbound: mpsc::UnboundedSender<Frames>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frames>>,
    signer: Signer,
}

impl StdinChannel {
    pub fn new(
        outbound: mpsc::UnboundedSender<Frames>,
        inbound: mpsc::UnboundedReceiver<Frames>,
        signer: Signer,
    ) -> Self {
        Self {
            outbound,
            inbound: tokio::sync::Mutex::new(inbound),
            signer,
        }
    }

    pub async fn request_input(
        &self,
        parent: &Message,
        prompt: &str,
        password: bool,
    ) -> Result<String, JupyterError> {
        // One prompt at a time; the lock is held until its reply arrives.
        let mut inbound = self.inbound.lock().await;
        let request = Message::reply(
            parent,
            "input_request",
            InputRequest {
                prompt: prompt.to_string(),
                password,
            },
        )?;
        self.outbound
            .send(request.to_frames(&self.signer)?)
            .map_err(|_| JupyterError::ChannelClosed("stdin"))?;

        loop {
            let frames = inbound
                .recv()
                .await
                .ok_or(JupyterError::ChannelClosed("stdin"))?;
            let reply = Message::from_frames(frames, &self.signer)?;
            if reply.msg_type() == "input_reply" {
                return Ok(reply.content_as::<InputReply>()?.value);
            }
            tracing::warn!("ignoring '{}' on stdin", reply.msg_type());
        }
    }
}

struct Pending {
    parent: Message,
    allow_stdin: bool,
}

/// The composite's source of interactive input while a Jupyter request runs.
/// Prompts go to the frontend only when the running `execute_request`
/// allowed stdin.
pub struct StdinProvider {
    channel: StdinChannel,
    pending: Mutex<Option<Pending>>,
}

impl StdinProvider {
    pub fn new(channel: StdinChannel) -> Self {
        Self {
            channel,
            pending: Mutex::new(None),
        }
    }

    /// Routes prompts to the sender of `parent` until the returned scope is
    /// dropped.
    pub fn begin(&self, parent: &Message, allow_stdin: bool) -> StdinScope<'_> {
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(Pending {
                parent: parent.clone(),
                allow_stdin,
            });
        }
        StdinScope { provider: self }
    }
}

pub struct StdinScope<'a> {
    provider: &'a StdinProvider,
}

impl Drop for StdinScope<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.provider.pending.lock() {
            *pending = None;
        }
    }
}

#[async_trait]
impl InputProvider for StdinProvider {
    async fn request_input(&self, prompt: &str, is_password: bool) -> Result<String, KernelError> {
        let parent = match self.pending.lock().as_deref() {
            Ok(Some(pending)) if pending.allow_stdin => pending.parent.clone(),
            _ => return Err(KernelError::InputUnavailable),
        };
        self.channel
            .request_input(&parent, prompt, is_password)
            .await
            .map_err(|e| KernelError::Transport(e.to_string()))
    }
}
