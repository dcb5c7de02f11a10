use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;

use tokio::net::TcpListener;

use crate::error::HostError;

pub const DEFAULT_KERNEL_ENV: &str = "POLYGLOT_DEFAULT_KERNEL";
pub const HTTP_PORT_ENV: &str = "POLYGLOT_HTTP_PORT";
pub const HTTP_PORT_RANGE_ENV: &str = "POLYGLOT_HTTP_PORT_RANGE";
pub const KERNEL_HOST_ENV: &str = "POLYGLOT_KERNEL_HOST";

#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    /// Name of the host part of every kernel URI (`kernel://<name>/...`).
    /// Defaults to `pid-<process id>`.
    pub kernel_host: Option<String>,
    /// Child kernel that receives commands without a target.
    pub default_kernel: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub http: HttpServerConfig,
}

impl HostConfig {
    /// Defaults overlaid with `POLYGLOT_*` environment variables.
    pub fn from_env() -> Result<Self, HostError> {
        let mut config = Self::default();
        config.default_kernel = std::env::var(DEFAULT_KERNEL_ENV).ok();
        config.kernel_host = std::env::var(KERNEL_HOST_ENV).ok();
        if let Ok(range) = std::env::var(HTTP_PORT_RANGE_ENV) {
            config.http.ports = Some(range.parse()?);
        }
        if let Ok(port) = std::env::var(HTTP_PORT_ENV) {
            config.http.ports = Some(PortRange::single(parse_port(&port)?));
        }
        Ok(config)
    }
}

/// Inclusive port range, written `START-END`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    pub fn ports(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }
}

impl FromStr for PortRange {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| HostError::Config(format!("port range '{s}' must look like 1000-2000")))?;
        let range = Self {
            start: parse_port(start)?,
            end: parse_port(end)?,
        };
        if range.start > range.end {
            return Err(HostError::Config(format!(
                "port range '{s}' starts after it ends"
            )));
        }
        Ok(range)
    }
}

fn parse_port(raw: &str) -> Result<u16, HostError> {
    raw.trim()
        .parse()
        .map_err(|_| HostError::Config(format!("invalid port '{raw}'")))
}

#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    pub ip: IpAddr,
    /// Disabled when `None`.
    pub ports: Option<PortRange>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ports: None,
        }
    }
}

impl HttpServerConfig {
    pub fn enabled(&self) -> bool {
        self.ports.is_some()
    }

    /// Binds the first free port in the configured range.
    pub async fn bind(&self) -> Result<TcpListener, HostError> {
        let range = self
            .ports
            .ok_or_else(|| HostError::Config("http server is disabled".into()))?;
        let mut last_err = None;
        for port in range.ports() {
            match TcpListener::bind(SocketAddr::new(self.ip, port)).await {
                Ok(listener) => return Ok(listener),
                Err(err) => last_err = Some(err),
            }
        }
        Err(HostError::Http(format!(
            "no free port in {}-{}: {}",
            range.start,
            range.end,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}
