//! Shared test helpers for integration tests.
//!
//! Each integration test compiles this module separately, so some helpers
//! may look unused in one test file while another relies on them.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use polyglot_jupyter::content::ExecuteRequest;
use polyglot_jupyter::transport::memory::{self, FrontendSockets};
use polyglot_jupyter::{JupyterAdapter, JupyterError, Message, Signer};
use polyglot_kernel::{
    CommandKind, CompletionItem, CompositeKernel, EventKind, FormattedValue, Kernel, KernelCommand,
    KernelError, KernelHandler, KernelInfo, KernelInvocationContext, KernelUri,
};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

pub const KEY: &str = "5ca1ab1e-d00d-4b1d-8e44-000000000000";
const WAIT: Duration = Duration::from_secs(5);

/// Runs one instruction per line:
/// `print X` writes X to stdout, `warn X` to stderr, `display X` shows X as
/// html, `fail X` fails, `sleep N` waits N ms, `input P` prompts with P and
/// returns the answer. Any other line is returned as a value (numbers also as
/// JSON). Code ending in `{` is incomplete.
#[derive(Clone, Default)]
pub struct Scripted {
    seen: Arc<Mutex<Vec<String>>>,
}

impl Scripted {
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub async fn wait_for(&self, code: &str) {
        for _ in 0..500 {
            if self.seen().iter().any(|c| c == code) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("'{code}' never started");
    }
}

#[async_trait]
impl KernelHandler for Scripted {
    fn kernel_info(&self) -> KernelInfo {
        KernelInfo {
            display_name: "Scripted".into(),
            supported_kernel_commands: vec!["SubmitCode".into(), "RequestCompletions".into()],
            ..KernelInfo::language("python", "3.12")
        }
    }

    async fn handle(
        &self,
        command: &KernelCommand,
        ctx: &KernelInvocationContext,
    ) -> Result<(), KernelError> {
        match command.kind() {
            CommandKind::SubmitCode { code, .. } => {
                self.seen.lock().unwrap().push(code.clone());
                for line in code.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    self.run_line(line, ctx).await?;
                }
                Ok(())
            }
            CommandKind::RequestCompletions {
                code,
                cursor_position,
            } => {
                let prefix = &code[..*cursor_position];
                let word_start = prefix.rfind(' ').map_or(0, |i| i + 1);
                let word = &prefix[word_start..];
                let completions = ["alpha", "alphabet", "beta"]
                    .iter()
                    .filter(|c| c.starts_with(word))
                    .map(|c| CompletionItem {
                        display_text: c.to_string(),
                        kind: "Variable".into(),
                        insert_text: c.to_string(),
                        documentation: None,
                    })
                    .collect();
                ctx.publish(EventKind::CompletionsProduced {
                    completions,
                    replace_start: Some(word_start),
                    replace_end: Some(*cursor_position),
                });
                Ok(())
            }
            other => Err(KernelError::unsupported("script", other.name())),
        }
    }

    async fn is_complete_submission(&self, code: &str) -> bool {
        !code.trim_end().ends_with('{')
    }
}

impl Scripted {
    async fn run_line(&self, line: &str, ctx: &KernelInvocationContext) -> Result<(), KernelError> {
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        match word {
            "print" => ctx.publish(EventKind::StandardOutputValueProduced {
                formatted_values: EventKind::plain_text(rest),
            }),
            "warn" => ctx.publish(EventKind::StandardErrorValueProduced {
                formatted_values: EventKind::plain_text(rest),
            }),
            "display" => ctx.publish(EventKind::DisplayedValueProduced {
                formatted_values: vec![FormattedValue::html(rest)],
                value_id: None,
            }),
            "fail" => return Err(KernelError::handler(rest)),
            "sleep" => {
                let ms = rest.parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            "input" => {
                let value = ctx.request_input(rest, false).await?;
                ctx.publish(EventKind::ReturnValueProduced {
                    formatted_values: EventKind::plain_text(value),
                    value: None,
                });
            }
            _ => {
                let mut formatted_values = EventKind::plain_text(line);
                if line.parse::<i64>().is_ok() {
                    formatted_values.push(FormattedValue::new("application/json", line));
                }
                ctx.publish(EventKind::ReturnValueProduced {
                    formatted_values,
                    value: None,
                });
            }
        }
        Ok(())
    }
}

/// A composite at `kernel://jupyter-test` whose default child is a
/// [`Scripted`] kernel named `script`, plus a second one named `other`.
pub fn composite() -> (CompositeKernel, Scripted, Scripted) {
    let composite =
        CompositeKernel::with_uri(".NET", KernelUri::parse("kernel://jupyter-test").unwrap());
    let script = Scripted::default();
    let other = Scripted::default();
    composite
        .add(Kernel::new("script", script.clone()), &["py"])
        .unwrap();
    composite.add(Kernel::new("other", other.clone()), &[]).unwrap();
    (composite, script, other)
}

pub fn signer() -> Signer {
    Signer::new("hmac-sha256", KEY).unwrap()
}

/// The frontend half of an in-memory connection to a running adapter.
pub struct Frontend {
    pub sockets: FrontendSockets,
    pub signer: Signer,
    pub session: String,
}

impl Frontend {
    pub fn request(&self, msg_type: &str, content: impl Serialize) -> Message {
        let mut message = Message::new(msg_type, &self.session, content).unwrap();
        message.identities = vec![b"frontend".to_vec()];
        message
    }

    pub fn send_shell(&self, msg_type: &str, content: impl Serialize) -> Message {
        let message = self.request(msg_type, content);
        self.sockets
            .shell
            .outbound
            .send(message.to_frames(&self.signer).unwrap())
            .unwrap();
        message
    }

    pub fn send_control(&self, msg_type: &str, content: impl Serialize) -> Message {
        let message = self.request(msg_type, content);
        self.sockets
            .control
            .outbound
            .send(message.to_frames(&self.signer).unwrap())
            .unwrap();
        message
    }

    pub fn execute(&self, code: &str) -> Message {
        self.send_shell("execute_request", ExecuteRequest::new(code))
    }

    pub async fn shell_reply(&mut self) -> Message {
        let frames = tokio::time::timeout(WAIT, self.sockets.shell.inbound.recv())
            .await
            .expect("no shell reply")
            .unwrap();
        Message::from_frames(frames, &self.signer).unwrap()
    }

    pub async fn control_reply(&mut self) -> Message {
        let frames = tokio::time::timeout(WAIT, self.sockets.control.inbound.recv())
            .await
            .expect("no control reply")
            .unwrap();
        Message::from_frames(frames, &self.signer).unwrap()
    }

    pub async fn stdin_request(&mut self) -> Message {
        let frames = tokio::time::timeout(WAIT, self.sockets.stdin.inbound.recv())
            .await
            .expect("no stdin request")
            .unwrap();
        Message::from_frames(frames, &self.signer).unwrap()
    }

    pub fn answer_stdin(&self, prompt: &Message, value: &str) {
        let reply = Message::reply(prompt, "input_reply", json!({ "value": value })).unwrap();
        self.sockets
            .stdin
            .outbound
            .send(reply.to_frames(&self.signer).unwrap())
            .unwrap();
    }

    pub async fn iopub(&mut self) -> Message {
        let frames = tokio::time::timeout(WAIT, self.sockets.iopub.recv())
            .await
            .expect("no iopub message")
            .unwrap();
        Message::from_frames(frames, &self.signer).unwrap()
    }

    /// IOPub messages caused by `request`, through its idle status.
    /// Messages for other requests are skipped.
    pub async fn iopub_for(&mut self, request: &Message) -> Vec<Message> {
        let mut seen = Vec::new();
        loop {
            let message = self.iopub().await;
            if !is_child_of(&message, request) {
                continue;
            }
            let done = is_status(&message, "idle");
            seen.push(message);
            if done {
                return seen;
            }
        }
    }
}

pub fn is_child_of(message: &Message, request: &Message) -> bool {
    message
        .parent_header
        .as_ref()
        .is_some_and(|p| p.msg_id == request.header.msg_id)
}

pub fn is_status(message: &Message, state: &str) -> bool {
    message.msg_type() == "status" && message.content["execution_state"] == json!(state)
}

pub fn types(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .map(|m| {
            if m.msg_type() == "status" {
                format!("status:{}", m.content["execution_state"].as_str().unwrap_or("?"))
            } else {
                m.msg_type().to_string()
            }
        })
        .collect()
}

pub fn content_of<'a>(messages: &'a [Message], msg_type: &str) -> &'a Value {
    &messages
        .iter()
        .find(|m| m.msg_type() == msg_type)
        .unwrap_or_else(|| panic!("no {msg_type} in {:?}", types(messages)))
        .content
}

/// Starts an adapter for `composite` on an in-memory connection.
pub fn start(
    composite: &CompositeKernel,
) -> (Frontend, JoinHandle<Result<(), JupyterError>>) {
    let (kernel_sockets, frontend_sockets) = memory::pair();
    let adapter = JupyterAdapter::new(composite.clone(), kernel_sockets, signer());
    let task = tokio::spawn(adapter.run());
    (
        Frontend {
            sockets: frontend_sockets,
            signer: signer(),
            session: uuid::Uuid::new_v4().to_string(),
        },
        task,
    )
}
