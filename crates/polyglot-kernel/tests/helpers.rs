//! Shared test helpers for integration tests.
//!
//! Each integration test compiles this module separately, so some helpers
//! may look unused in one test file while another relies on them.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use polyglot_kernel::{
    CommandKind, CompletionItem, CompositeKernel, EventKind, FormattedValue, Kernel, KernelCommand,
    KernelError, KernelHandler, KernelInfo, KernelInvocationContext, ValueInfo,
};

/// A toy language: integer sums, variables, `print`, `sleep`, `fail` and
/// `panic`. Code ending in `+` is incomplete.
#[derive(Clone, Default)]
pub struct Arithmetic {
    pub executed: Arc<Mutex<Vec<String>>>,
    variables: Arc<Mutex<BTreeMap<String, i64>>>,
}

impl Arithmetic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn variable(&self, name: &str) -> Option<i64> {
        self.variables.lock().unwrap().get(name).copied()
    }

    fn eval(&self, expr: &str) -> Result<i64, KernelError> {
        let mut total = 0;
        for term in expr.split('+').map(str::trim) {
            total += match term.parse::<i64>() {
                Ok(n) => n,
                Err(_) => self
                    .variable(term)
                    .ok_or_else(|| KernelError::handler(format!("unknown name '{term}'")))?,
            };
        }
        Ok(total)
    }

    async fn run_line(&self, line: &str, ctx: &KernelInvocationContext) -> Result<(), KernelError> {
        if let Some(ms) = line.strip_prefix("sleep ") {
            let ms: u64 = ms.trim().parse().map_err(|_| KernelError::handler("bad sleep"))?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            return Ok(());
        }
        if line == "panic" {
            panic!("arithmetic kernel panicked");
        }
        if let Some(message) = line.strip_prefix("fail ") {
            return Err(KernelError::handler(message));
        }
        if let Some(text) = line.strip_prefix("print ") {
            ctx.publish(EventKind::StandardOutputValueProduced {
                formatted_values: EventKind::plain_text(format!("{text}\n")),
            });
            return Ok(());
        }
        if let Some((name, expr)) = line.split_once('=') {
            let value = self.eval(expr)?;
            self.variables
                .lock()
                .unwrap()
                .insert(name.trim().to_string(), value);
            return Ok(());
        }
        let value = self.eval(line)?;
        ctx.publish(EventKind::ReturnValueProduced {
            formatted_values: EventKind::plain_text(value.to_string()),
            value: Some(serde_json::json!(value)),
        });
        Ok(())
    }
}

#[async_trait]
impl KernelHandler for Arithmetic {
    fn kernel_info(&self) -> KernelInfo {
        KernelInfo {
            display_name: "Arithmetic".into(),
            supported_kernel_commands: vec![
                "SubmitCode".into(),
                "RequestValueInfos".into(),
                "RequestValue".into(),
                "SendValue".into(),
                "RequestCompletions".into(),
            ],
            ..KernelInfo::language("arithmetic", "1.0")
        }
    }

    async fn handle(
        &self,
        command: &KernelCommand,
        ctx: &KernelInvocationContext,
    ) -> Result<(), KernelError> {
        match command.kind() {
            CommandKind::SubmitCode { code, .. } => {
                self.executed.lock().unwrap().push(code.clone());
                for line in code.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    self.run_line(line, ctx).await?;
                }
                Ok(())
            }
            CommandKind::RequestValueInfos => {
                let value_infos = self
                    .variables
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|(name, value)| ValueInfo {
                        name: name.clone(),
                        type_name: "int".into(),
                        formatted_value: FormattedValue::plain(value.to_string()),
                    })
                    .collect();
                ctx.publish(EventKind::ValueInfosProduced { value_infos });
                Ok(())
            }
            CommandKind::RequestValue { name, .. } => {
                let value = self
                    .variable(name)
                    .ok_or_else(|| KernelError::ValueNotFound(name.clone()))?;
                ctx.publish(EventKind::ValueProduced {
                    name: name.clone(),
                    formatted_value: FormattedValue::plain(value.to_string()),
                });
                Ok(())
            }
            CommandKind::SendValue {
                name,
                formatted_value,
            } => {
                let value = formatted_value
                    .value
                    .trim()
                    .parse()
                    .map_err(|_| {
                        KernelError::handler(format!("'{}' is not an int", formatted_value.value))
                    })?;
                self.variables.lock().unwrap().insert(name.clone(), value);
                Ok(())
            }
            CommandKind::RequestCompletions { .. } => {
                let completions = self
                    .variables
                    .lock()
                    .unwrap()
                    .keys()
                    .map(|name| CompletionItem {
                        display_text: name.clone(),
                        kind: "Variable".into(),
                        insert_text: name.clone(),
                        documentation: None,
                    })
                    .collect();
                ctx.publish(EventKind::CompletionsProduced {
                    completions,
                    replace_start: None,
                    replace_end: None,
                });
                Ok(())
            }
            other => Err(KernelError::unsupported("arithmetic", other.name())),
        }
    }

    async fn is_complete_submission(&self, code: &str) -> bool {
        !code.trim_end().ends_with('+')
    }
}

/// A composite with one `csharp` child (the default) backed by `Arithmetic`.
pub fn composite_with_csharp() -> (CompositeKernel, Arithmetic) {
    let language = Arithmetic::new();
    let composite = CompositeKernel::new(".NET");
    composite
        .add(Kernel::new("csharp", language.clone()), &["c#"])
        .unwrap();
    (composite, language)
}

pub fn submit(code: &str) -> KernelCommand {
    KernelCommand::submit_code(code)
}
