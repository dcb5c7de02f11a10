use thiserror::Error;

#[derive(Debug, Error)]
pub enum JupyterError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("kernel error: {0}")]
    Kernel(#[from] polyglot_kernel::KernelError),
    #[error("could not read connection file {path}: {message}")]
    ConnectionFile { path: String, message: String },
    #[error("unsupported signature scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("message signature is invalid")]
    InvalidSignature(#[source] hmac::digest::MacError),
    #[error("malformed message: {0}")]
    Protocol(String),
    #[error("failed to bind {channel} channel on {address}: {source}")]
    Bind {
        channel: &'static str,
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
    #[error("kernel spec error: {0}")]
    KernelSpec(String),
}
