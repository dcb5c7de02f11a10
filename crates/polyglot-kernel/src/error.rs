use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("kernel '{0}' not found")]
    KernelNotFound(String),
    #[error("a kernel named '{0}' is already registered")]
    DuplicateName(String),
    #[error("kernel '{0}' already belongs to a composite kernel")]
    AlreadyAttached(String),
    #[error("routing cycle detected: '{0}' is already on the routing slip")]
    RoutingCycle(String),
    #[error("invalid kernel uri '{0}'")]
    InvalidUri(String),
    #[error("invalid command token '{0}'")]
    InvalidToken(String),
    #[error("unrecognized directive '{0}'")]
    UnknownDirective(String),
    #[error("directive '{0}' is already registered")]
    DuplicateDirective(String),
    #[error("{0}")]
    Directive(String),
    #[error("kernel '{kernel}' does not support {command}")]
    Unsupported { kernel: String, command: String },
    #[error("value '{0}' not found")]
    ValueNotFound(String),
    #[error("incomplete code submission")]
    IncompleteSubmission,
    #[error("interactive input is not available")]
    InputUnavailable,
    #[error("{0}")]
    Handler(String),
    #[error("command was cancelled")]
    Cancelled,
    #[error("handler panicked: {0}")]
    Panic(String),
    #[error("scheduler '{0}' is closed")]
    SchedulerClosed(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KernelError {
    pub fn handler(msg: impl Into<String>) -> Self {
        KernelError::Handler(msg.into())
    }

    pub fn unsupported(kernel: impl Into<String>, command: impl Into<String>) -> Self {
        KernelError::Unsupported {
            kernel: kernel.into(),
            command: command.into(),
        }
    }
}
