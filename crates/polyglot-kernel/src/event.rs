//! Events: immutable facts produced while a command is handled.

use serde::{Deserialize, Serialize};

use crate::command::KernelCommand;
use crate::kernel_info::KernelInfo;
use crate::routing_slip::RoutingSlip;

pub const PLAIN_TEXT: &str = "text/plain";
pub const HTML: &str = "text/html";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedValue {
    pub mime_type: String,
    pub value: String,
}

impl FormattedValue {
    pub fn new(mime_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            value: value.into(),
        }
    }

    pub fn plain(value: impl Into<String>) -> Self {
        Self::new(PLAIN_TEXT, value)
    }

    pub fn html(value: impl Into<String>) -> Self {
        Self::new(HTML, value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticSeverity {
    Hidden,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePosition {
    pub line: usize,
    pub character: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub start: LinePosition,
    pub end: LinePosition,
    pub severity: DiagnosticSeverity,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    pub display_text: String,
    pub kind: String,
    pub insert_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueInfo {
    pub name: String,
    pub type_name: String,
    pub formatted_value: FormattedValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all_fields = "camelCase")]
pub enum EventKind {
    CodeSubmissionReceived {
        code: String,
    },
    CompleteCodeSubmissionReceived {
        code: String,
    },
    IncompleteCodeSubmissionReceived,
    DisplayedValueProduced {
        formatted_values: Vec<FormattedValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value_id: Option<String>,
    },
    DisplayedValueUpdated {
        formatted_values: Vec<FormattedValue>,
        value_id: String,
    },
    ReturnValueProduced {
        formatted_values: Vec<FormattedValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<serde_json::Value>,
    },
    StandardOutputValueProduced {
        formatted_values: Vec<FormattedValue>,
    },
    StandardErrorValueProduced {
        formatted_values: Vec<FormattedValue>,
    },
    ErrorProduced {
        message: String,
        #[serde(default)]
        formatted_values: Vec<FormattedValue>,
    },
    DiagnosticsProduced {
        diagnostics: Vec<Diagnostic>,
        #[serde(default)]
        formatted_values: Vec<FormattedValue>,
    },
    CompletionsProduced {
        completions: Vec<CompletionItem>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replace_start: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replace_end: Option<usize>,
    },
    ValueInfosProduced {
        value_infos: Vec<ValueInfo>,
    },
    ValueProduced {
        name: String,
        formatted_value: FormattedValue,
    },
    KernelInfoProduced {
        kernel_info: KernelInfo,
    },
    KernelReady {
        kernel_infos: Vec<KernelInfo>,
    },
    InputProduced {
        value: String,
    },
    CommandSucceeded,
    CommandFailed {
        message: String,
    },
    CommandCancelled,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::CodeSubmissionReceived { .. } => "CodeSubmissionReceived",
            EventKind::CompleteCodeSubmissionReceived { .. } => "CompleteCodeSubmissionReceived",
            EventKind::IncompleteCodeSubmissionReceived => "IncompleteCodeSubmissionReceived",
            EventKind::DisplayedValueProduced { .. } => "DisplayedValueProduced",
            EventKind::DisplayedValueUpdated { .. } => "DisplayedValueUpdated",
            EventKind::ReturnValueProduced { .. } => "ReturnValueProduced",
            EventKind::StandardOutputValueProduced { .. } => "StandardOutputValueProduced",
            EventKind::StandardErrorValueProduced { .. } => "StandardErrorValueProduced",
            EventKind::ErrorProduced { .. } => "ErrorProduced",
            EventKind::DiagnosticsProduced { .. } => "DiagnosticsProduced",
            EventKind::CompletionsProduced { .. } => "CompletionsProduced",
            EventKind::ValueInfosProduced { .. } => "ValueInfosProduced",
            EventKind::ValueProduced { .. } => "ValueProduced",
            EventKind::KernelInfoProduced { .. } => "KernelInfoProduced",
            EventKind::KernelReady { .. } => "KernelReady",
            EventKind::InputProduced { .. } => "InputProduced",
            EventKind::CommandSucceeded => "CommandSucceeded",
            EventKind::CommandFailed { .. } => "CommandFailed",
            EventKind::CommandCancelled => "CommandCancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::CommandSucceeded
                | EventKind::CommandFailed { .. }
                | EventKind::CommandCancelled
        )
    }

    pub fn plain_text(value: impl Into<String>) -> Vec<FormattedValue> {
        vec![FormattedValue::plain(value)]
    }
}

/// An event together with the command that caused it.
#[derive(Debug, Clone)]
pub struct KernelEvent {
    pub kind: EventKind,
    pub command: KernelCommand,
    pub routing_slip: RoutingSlip,
}

impl KernelEvent {
    pub fn new(kind: EventKind, command: KernelCommand) -> Self {
        Self {
            kind,
            command,
            routing_slip: RoutingSlip::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    pub fn token(&self) -> &str {
        self.command.token()
    }
}

/// Outcome of a command as seen by the caller that sent it.
#[derive(Debug, Clone)]
pub struct KernelCommandResult {
    pub command: KernelCommand,
    pub events: Vec<KernelEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

impl KernelCommandResult {
    /// The terminal event for the command itself, if one was published.
    pub fn terminal(&self) -> Option<&KernelEvent> {
        self.events
            .iter()
            .rev()
            .find(|e| e.is_terminal() && e.command.token() == self.command.token())
    }

    pub fn outcome(&self) -> CommandOutcome {
        match self.terminal().map(|e| &e.kind) {
            Some(EventKind::CommandSucceeded) => CommandOutcome::Succeeded,
            Some(EventKind::CommandCancelled) => CommandOutcome::Cancelled,
            Some(EventKind::CommandFailed { message }) => CommandOutcome::Failed(message.clone()),
            _ => CommandOutcome::Failed("command did not complete".into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome() == CommandOutcome::Succeeded
    }

    pub fn event_names(&self) -> Vec<&'static str> {
        self.events.iter().map(|e| e.kind.name()).collect()
    }

    pub fn find<T>(&self, f: impl Fn(&EventKind) -> Option<T>) -> Option<T> {
        self.events.iter().find_map(|e| f(&e.kind))
    }
}
