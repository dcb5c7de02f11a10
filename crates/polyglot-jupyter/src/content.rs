//! Message content for the message types this kernel speaks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::PROTOCOL_VERSION;

pub type MimeBundle = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub silent: bool,
    #[serde(default = "yes")]
    pub store_history: bool,
    #[serde(default)]
    pub user_expressions: BTreeMap<String, String>,
    #[serde(default = "yes")]
    pub allow_stdin: bool,
    #[serde(default = "yes")]
    pub stop_on_error: bool,
}

fn yes() -> bool {
    true
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            silent: false,
            store_history: true,
            user_expressions: BTreeMap::new(),
            allow_stdin: true,
            stop_on_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteReply {
    pub status: ReplyStatus,
    pub execution_count: u64,
    #[serde(flatten)]
    pub error: Option<ErrorContent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub code: String,
    pub cursor_pos: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteReply {
    pub matches: Vec<String>,
    pub cursor_start: usize,
    pub cursor_end: usize,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub status: ReplyStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsCompleteRequest {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsCompleteReply {
    /// `complete`, `incomplete`, `invalid` or `unknown`.
    pub status: String,
    #[serde(default)]
    pub indent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownRequest {
    #[serde(default)]
    pub restart: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownReply {
    pub status: ReplyStatus,
    pub restart: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptReply {
    pub status: ReplyStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub name: String,
    pub version: String,
    pub mimetype: String,
    pub file_extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pygments_lexer: Option<String>,
}

impl LanguageInfo {
    /// Well-known languages get their usual mimetype and file extension.
    pub fn for_language(name: &str, version: &str) -> Self {
        let (mimetype, extension, lexer) = match name {
            "csharp" | "C#" => ("text/x-csharp", ".cs", Some("csharp")),
            "fsharp" | "F#" => ("text/x-fsharp", ".fs", Some("fsharp")),
            "powershell" | "PowerShell" => ("text/x-powershell", ".ps1", Some("powershell")),
            "python" => ("text/x-python", ".py", Some("python")),
            _ => ("text/plain", ".txt", None),
        };
        Self {
            name: name.to_string(),
            version: version.to_string(),
            mimetype: mimetype.into(),
            file_extension: extension.into(),
            pygments_lexer: lexer.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelInfoReply {
    pub status: ReplyStatus,
    pub protocol_version: String,
    pub implementation: String,
    pub implementation_version: String,
    pub language_info: LanguageInfo,
    pub banner: String,
}

impl KernelInfoReply {
    pub fn new(language_info: LanguageInfo) -> Self {
        Self {
            status: ReplyStatus::Ok,
            protocol_version: PROTOCOL_VERSION.into(),
            implementation: "polyglot".into(),
            implementation_version: env!("CARGO_PKG_VERSION").into(),
            language_info,
            banner: "Polyglot kernel host".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Busy,
    Idle,
    Starting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub execution_state: ExecutionState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub name: String,
    pub text: String,
}

impl Stream {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            name: "stdout".into(),
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            name: "stderr".into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transient {
    pub display_id: String,
}

/// `display_data` and `update_display_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayData {
    pub data: MimeBundle,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub transient: Transient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub execution_count: u64,
    pub data: MimeBundle,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub transient: Transient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteInput {
    pub code: String,
    pub execution_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContent {
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRequest {
    pub prompt: String,
    pub password: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputReply {
    pub value: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn execute_request_defaults_match_the_protocol() {
        let request: ExecuteRequest = serde_json::from_value(json!({"code": "1+1"})).unwrap();
        assert!(!request.silent);
        assert!(request.store_history);
        assert!(request.allow_stdin);
        assert_eq!(request, ExecuteRequest::new("1+1"));
    }

    #[test]
    fn error_replies_inline_the_error_fields() {
        let reply = ExecuteReply {
            status: ReplyStatus::Error,
            execution_count: 3,
            error: Some(ErrorContent {
                ename: "Unhandled exception".into(),
                evalue: "boom".into(),
                traceback: vec!["boom".into()],
            }),
        };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({
                "status": "error",
                "execution_count": 3,
                "ename": "Unhandled exception",
                "evalue": "boom",
                "traceback": ["boom"],
            })
        );

        let ok = ExecuteReply {
            status: ReplyStatus::Ok,
            execution_count: 1,
            error: None,
        };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"status": "ok", "execution_count": 1})
        );
    }
}
