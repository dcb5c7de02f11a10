//! Jupyter messaging for a composite kernel: connection files, signed
//! multipart messages, the four channels, and the adapter that turns Jupyter
//! requests into kernel commands.

pub mod channels;
pub mod config;
pub mod connection;
pub mod content;
pub mod error;
pub mod handlers;
pub mod install;
pub mod message;
pub mod shell;
pub mod signature;
pub mod transport;

pub use config::JupyterConfig;
pub use connection::{ChannelKind, ConnectionInfo};
pub use error::JupyterError;
pub use install::{KernelSpec, install};
pub use message::{Header, Message};
pub use shell::{JupyterAdapter, serve};
pub use signature::Signer;
