use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("kernel error: {0}")]
    Kernel(#[from] polyglot_kernel::KernelError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("http server error: {0}")]
    Http(String),
}
