//! The connection file a Jupyter frontend hands to the kernel at startup.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::JupyterError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default = "default_transport")]
    pub transport: String,
    pub ip: String,
    pub shell_port: u16,
    pub iopub_port: u16,
    pub stdin_port: u16,
    pub control_port: u16,
    pub hb_port: u16,
    #[serde(default = "default_scheme")]
    pub signature_scheme: String,
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_name: Option<String>,
}

fn default_transport() -> String {
    "tcp".into()
}

fn default_scheme() -> String {
    "hmac-sha256".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Shell,
    IoPub,
    Stdin,
    Control,
    Heartbeat,
}

impl ChannelKind {
    pub fn name(self) -> &'static str {
        match self {
            ChannelKind::Shell => "shell",
            ChannelKind::IoPub => "iopub",
            ChannelKind::Stdin => "stdin",
            ChannelKind::Control => "control",
            ChannelKind::Heartbeat => "heartbeat",
        }
    }
}

impl ConnectionInfo {
    pub fn from_file(path: &Path) -> Result<Self, JupyterError> {
        let raw = std::fs::read_to_string(path).map_err(|e| JupyterError::ConnectionFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let info: Self = serde_json::from_str(&raw).map_err(|e| JupyterError::ConnectionFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if info.transport != "tcp" {
            return Err(JupyterError::ConnectionFile {
                path: path.display().to_string(),
                message: format!("unsupported transport '{}'", info.transport),
            });
        }
        Ok(info)
    }

    pub fn port(&self, channel: ChannelKind) -> u16 {
        match channel {
            ChannelKind::Shell => self.shell_port,
            ChannelKind::IoPub => self.iopub_port,
            ChannelKind::Stdin => self.stdin_port,
            ChannelKind::Control => self.control_port,
            ChannelKind::Heartbeat => self.hb_port,
        }
    }

    /// `ip:port` for one channel.
    pub fn address(&self, channel: ChannelKind) -> String {
        format!("{}:{}", self.ip, self.port(channel))
    }

    /// Display form, e.g. `tcp://127.0.0.1:5555`.
    pub fn endpoint(&self, channel: ChannelKind) -> String {
        format!("{}://{}", self.transport, self.address(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "shell_port": 50001,
        "iopub_port": 50002,
        "stdin_port": 50003,
        "control_port": 50004,
        "hb_port": 50005,
        "ip": "127.0.0.1",
        "key": "a0436f6c-1916-498b-8eb9-e81ab9368e84",
        "transport": "tcp",
        "signature_scheme": "hmac-sha256",
        "kernel_name": "polyglot-value"
    }"#;

    #[test]
    fn reads_a_connection_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel-1.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let info = ConnectionInfo::from_file(&path).unwrap();

        assert_eq!(info.shell_port, 50001);
        assert_eq!(info.key, "a0436f6c-1916-498b-8eb9-e81ab9368e84");
        assert_eq!(info.endpoint(ChannelKind::Control), "tcp://127.0.0.1:50004");
        assert_eq!(info.address(ChannelKind::Heartbeat), "127.0.0.1:50005");
    }

    #[test]
    fn rejects_missing_or_unsupported_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ConnectionInfo::from_file(&dir.path().join("nope.json"));
        assert!(matches!(missing, Err(JupyterError::ConnectionFile { .. })));

        let path = dir.path().join("ipc.json");
        std::fs::write(&path, SAMPLE.replace("\"tcp\"", "\"ipc\"")).unwrap();
        let err = ConnectionInfo::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported transport"));
    }
}
