//! A kernel that stores named values.
//!
//! Submissions are line oriented: `name = value` stores a plain-text value,
//! a bare `name` returns it. Values can also be moved in and out with
//! `SendValue` / `RequestValue`, which is what `#!share` uses.

use std::sync::Mutex;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::command::{CommandKind, KernelCommand};
use crate::context::KernelInvocationContext;
use crate::error::KernelError;
use crate::event::{EventKind, FormattedValue, ValueInfo};
use crate::kernel::KernelHandler;
use crate::kernel_info::KernelInfo;

#[derive(Default)]
pub struct ValueKernel {
    values: Mutex<IndexMap<String, FormattedValue>>,
}

impl ValueKernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<FormattedValue> {
        self.values.lock().ok()?.get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: FormattedValue) -> Result<(), KernelError> {
        let name = name.into();
        if !is_identifier(&name) {
            return Err(KernelError::handler(format!("invalid value name '{name}'")));
        }
        self.values
            .lock()
            .map_err(|_| KernelError::handler("value store poisoned"))?
            .insert(name, value);
        Ok(())
    }

    fn infos(&self) -> Vec<ValueInfo> {
        self.values
            .lock()
            .map(|values| {
                values
                    .iter()
                    .map(|(name, value)| ValueInfo {
                        name: name.clone(),
                        type_name: value.mime_type.clone(),
                        formatted_value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn submit(&self, code: &str, ctx: &KernelInvocationContext) -> Result<(), KernelError> {
        for line in code.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match line.split_once('=') {
                Some((name, value)) => {
                    self.set(name.trim(), FormattedValue::plain(unquote(value.trim())))?;
                }
                None => {
                    let value = self
                        .get(line)
                        .ok_or_else(|| KernelError::ValueNotFound(line.to_string()))?;
                    ctx.publish(EventKind::ReturnValueProduced {
                        value: Some(serde_json::Value::String(value.value.clone())),
                        formatted_values: vec![value],
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KernelHandler for ValueKernel {
    fn kernel_info(&self) -> KernelInfo {
        KernelInfo {
            language_name: Some("value".into()),
            display_name: "Value Storage".into(),
            supported_kernel_commands: [
                "SubmitCode",
                "RequestValueInfos",
                "RequestValue",
                "SendValue",
                "RequestKernelInfo",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            ..KernelInfo::default()
        }
    }

    async fn handle(
        &self,
        command: &KernelCommand,
        ctx: &KernelInvocationContext,
    ) -> Result<(), KernelError> {
        match command.kind() {
            CommandKind::SubmitCode { code, .. } => self.submit(code, ctx),
            CommandKind::RequestValueInfos => {
                ctx.publish(EventKind::ValueInfosProduced {
                    value_infos: self.infos(),
                });
                Ok(())
            }
            CommandKind::RequestValue { name, .. } => {
                let value = self
                    .get(name)
                    .ok_or_else(|| KernelError::ValueNotFound(name.clone()))?;
                ctx.publish(EventKind::ValueProduced {
                    name: name.clone(),
                    formatted_value: value,
                });
                Ok(())
            }
            CommandKind::SendValue {
                name,
                formatted_value,
            } => self.set(name.clone(), formatted_value.clone()),
            other => Err(KernelError::unsupported(
                ctx.handling_kernel_uri().local_name(),
                other.name(),
            )),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn unquote(raw: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = raw
            .strip_prefix(quote)
            .and_then(|r| r.strip_suffix(quote))
        {
            return inner;
        }
    }
    raw
}
