//! Connections between composite kernels: newline-delimited JSON transports,
//! proxy kernels, the kernel host, `#!connect`, and the HTTP API.

pub mod config;
pub mod connect;
pub mod connection;
pub mod error;
pub mod host;
pub mod http;
pub mod proxy;

pub use config::{HostConfig, HttpServerConfig, PortRange};
pub use connect::{listen_unix, use_connect};
pub use connection::{ConnectionReceiver, ConnectionSender, connect};
pub use error::HostError;
pub use host::KernelHost;
pub use http::spawn_http_server;
pub use proxy::ProxyHandler;
