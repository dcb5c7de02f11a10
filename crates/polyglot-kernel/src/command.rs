//! Commands: requests addressed to a kernel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::event::FormattedValue;
use crate::routing_slip::RoutingSlip;
use crate::uri::KernelUri;

/// Property that opts a command's child commands into publishing their
/// events on the outer stream.
pub const PUBLISH_INTERNAL_EVENTS: &str = "publish-internal-events";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubmissionType {
    #[default]
    Run,
    Diagnose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum CommandKind {
    SubmitCode {
        code: String,
        #[serde(default)]
        submission_type: SubmissionType,
    },
    RequestCompletions {
        code: String,
        cursor_position: usize,
    },
    RequestDiagnostics {
        code: String,
    },
    RequestValueInfos,
    RequestValue {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    SendValue {
        name: String,
        formatted_value: FormattedValue,
    },
    RequestKernelInfo,
    RequestInput {
        prompt: String,
        #[serde(default)]
        is_password: bool,
    },
    Cancel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command_token: Option<String>,
    },
    Quit,
}

impl CommandKind {
    pub const ALL: [&'static str; 10] = [
        "SubmitCode",
        "RequestCompletions",
        "RequestDiagnostics",
        "RequestValueInfos",
        "RequestValue",
        "SendValue",
        "RequestKernelInfo",
        "RequestInput",
        "Cancel",
        "Quit",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::SubmitCode { .. } => "SubmitCode",
            CommandKind::RequestCompletions { .. } => "RequestCompletions",
            CommandKind::RequestDiagnostics { .. } => "RequestDiagnostics",
            CommandKind::RequestValueInfos => "RequestValueInfos",
            CommandKind::RequestValue { .. } => "RequestValue",
            CommandKind::SendValue { .. } => "SendValue",
            CommandKind::RequestKernelInfo => "RequestKernelInfo",
            CommandKind::RequestInput { .. } => "RequestInput",
            CommandKind::Cancel { .. } => "Cancel",
            CommandKind::Quit => "Quit",
        }
    }

    pub fn submit_code(code: impl Into<String>) -> Self {
        CommandKind::SubmitCode {
            code: code.into(),
            submission_type: SubmissionType::Run,
        }
    }
}

/// A request to a kernel.
///
/// Child commands share their root's token as a dotted prefix
/// (`<root>.1`, `<root>.1.3`), so any event can be attributed to the tree it
/// belongs to by token alone. The root is recorded when the command is
/// built: a command read off the wire is always a root, whatever its token
/// looks like.
#[derive(Debug, Clone)]
pub struct KernelCommand {
    kind: CommandKind,
    token: String,
    root: String,
    id: String,
    parent: Option<Arc<KernelCommand>>,
    target_kernel_uri: Option<String>,
    origin_uri: Option<KernelUri>,
    routing_slip: RoutingSlip,
    properties: BTreeMap<String, String>,
    children: Arc<AtomicU64>,
}

impl KernelCommand {
    pub fn new(kind: CommandKind) -> Self {
        Self::with_token(kind, uuid::Uuid::new_v4().simple().to_string())
    }

    pub(crate) fn with_token(kind: CommandKind, token: String) -> Self {
        Self {
            kind,
            root: token.clone(),
            token,
            id: uuid::Uuid::new_v4().simple().to_string(),
            parent: None,
            target_kernel_uri: None,
            origin_uri: None,
            routing_slip: RoutingSlip::new(),
            properties: BTreeMap::new(),
            children: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn submit_code(code: impl Into<String>) -> Self {
        Self::new(CommandKind::submit_code(code))
    }

    /// Builds a child of this command. The child's token extends this
    /// command's token with the next sequence number.
    pub fn child(&self, kind: CommandKind) -> Self {
        let n = self.children.fetch_add(1, Ordering::Relaxed) + 1;
        let mut child = Self::with_token(kind, format!("{}.{n}", self.token));
        child.root = self.root.clone();
        child.parent = Some(Arc::new(self.clone()));
        child
    }

    /// Same token and routing state, different payload.
    pub fn with_kind(&self, kind: CommandKind) -> Self {
        let mut cmd = self.clone();
        cmd.kind = kind;
        cmd
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target_kernel_uri = Some(target.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent(&self) -> Option<&KernelCommand> {
        self.parent.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Token of the outermost command of this tree.
    pub fn root_token(&self) -> &str {
        &self.root
    }

    pub fn target_kernel_uri(&self) -> Option<&str> {
        self.target_kernel_uri.as_deref()
    }

    pub fn set_target_kernel_uri(&mut self, target: Option<String>) {
        self.target_kernel_uri = target;
    }

    pub fn origin_uri(&self) -> Option<&KernelUri> {
        self.origin_uri.as_ref()
    }

    pub fn set_origin_uri(&mut self, uri: Option<KernelUri>) {
        self.origin_uri = uri;
    }

    pub fn routing_slip(&self) -> &RoutingSlip {
        &self.routing_slip
    }

    pub fn routing_slip_mut(&mut self) -> &mut RoutingSlip {
        &mut self.routing_slip
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn publishes_internal_events(&self) -> bool {
        self.properties
            .get(PUBLISH_INTERNAL_EVENTS)
            .is_some_and(|v| v == "true")
    }

    pub fn is_self_or_descendant_of(&self, other: &KernelCommand) -> bool {
        token_is_self_or_descendant(&self.token, &other.token)
    }

    pub(crate) fn from_parts(
        kind: CommandKind,
        token: String,
        id: String,
        target_kernel_uri: Option<String>,
        origin_uri: Option<KernelUri>,
        routing_slip: RoutingSlip,
        properties: BTreeMap<String, String>,
    ) -> Self {
        Self {
            kind,
            root: token.clone(),
            token,
            id,
            parent: None,
            target_kernel_uri,
            origin_uri,
            routing_slip,
            properties,
            children: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// A token is one or more non-empty segments joined by '.'.
pub fn is_valid_token(token: &str) -> bool {
    !token.is_empty() && token.split('.').all(|segment| !segment.is_empty())
}

pub fn token_is_self_or_descendant(token: &str, ancestor: &str) -> bool {
    token == ancestor
        || (token.len() > ancestor.len()
            && token.starts_with(ancestor)
            && token.as_bytes()[ancestor.len()] == b'.')
}
