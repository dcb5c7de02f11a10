//! Shared test helpers for integration tests.
//!
//! Each integration test compiles this module separately, so some helpers
//! may look unused in one test file while another relies on them.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use polyglot_host::{KernelHost, connect};
use polyglot_kernel::{
    CommandKind, CompositeKernel, EventKind, FormattedValue, Kernel, KernelCommand, KernelError,
    KernelHandler, KernelInfo, KernelInvocationContext, KernelUri,
};

/// Echoes each submitted line as a return value. `sleep N` waits N ms and
/// `fail msg` fails the command.
#[derive(Clone, Default)]
pub struct Echo {
    seen: Arc<Mutex<Vec<String>>>,
}

impl Echo {
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    /// Polls until `code` has started running.
    pub async fn wait_for(&self, code: &str) {
        for _ in 0..200 {
            if self.seen().iter().any(|c| c == code) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("'{code}' never started");
    }
}

#[async_trait]
impl KernelHandler for Echo {
    fn kernel_info(&self) -> KernelInfo {
        KernelInfo {
            display_name: "Echo".into(),
            supported_kernel_commands: vec!["SubmitCode".into(), "RequestValue".into()],
            ..KernelInfo::language("echo", "1.0")
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
                    if let Some(ms) = line.strip_prefix("sleep ") {
                        let ms = ms.parse().map_err(|_| KernelError::handler("bad sleep"))?;
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                    } else if let Some(message) = line.strip_prefix("fail ") {
                        return Err(KernelError::handler(message));
                    } else {
                        ctx.publish(EventKind::ReturnValueProduced {
                            formatted_values: EventKind::plain_text(line),
                            value: None,
                        });
                    }
                }
                Ok(())
            }
            CommandKind::RequestValue { name, .. } => {
                ctx.publish(EventKind::ValueProduced {
                    name: name.clone(),
                    formatted_value: FormattedValue::plain(name.to_uppercase()),
                });
                Ok(())
            }
            other => Err(KernelError::unsupported("echo", other.name())),
        }
    }
}

/// A composite at `kernel://<host>` with one `python` child.
pub fn composite_on(host: &str) -> (CompositeKernel, Echo) {
    let echo = Echo::default();
    let composite = CompositeKernel::with_uri(".NET", KernelUri::host(host));
    composite
        .add(Kernel::new("python", echo.clone()), &[])
        .unwrap();
    (composite, echo)
}

/// Connects two composites back to back over an in-memory stream and
/// serves both ends.
pub fn wire(a: &CompositeKernel, b: &CompositeKernel) -> (KernelHost, KernelHost) {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let (left_read, left_write) = tokio::io::split(left);
    let (right_read, right_write) = tokio::io::split(right);
    let (a_tx, a_rx) = connect(left_read, left_write);
    let (b_tx, b_rx) = connect(right_read, right_write);
    let host_a = KernelHost::new(a.clone(), a_tx);
    let host_b = KernelHost::new(b.clone(), b_tx);
    tokio::spawn(host_a.clone().run(a_rx));
    tokio::spawn(host_b.clone().run(b_rx));
    (host_a, host_b)
}

pub fn uri(raw: &str) -> KernelUri {
    KernelUri::parse(raw).unwrap()
}
