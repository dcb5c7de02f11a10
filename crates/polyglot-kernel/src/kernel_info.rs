use serde::{Deserialize, Serialize};

use crate::uri::KernelUri;

/// Capabilities a kernel advertises to routers and frontends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelInfo {
    pub local_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_version: Option<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<KernelUri>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_uri: Option<KernelUri>,
    #[serde(default)]
    pub is_proxy: bool,
    #[serde(default)]
    pub is_composite: bool,
    #[serde(default)]
    pub supported_kernel_commands: Vec<String>,
    #[serde(default)]
    pub supported_directives: Vec<String>,
}

impl KernelInfo {
    pub fn language(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            language_name: Some(name.into()),
            language_version: Some(version.into()),
            ..Self::default()
        }
    }

    pub fn supports(&self, command: &str) -> bool {
        self.supported_kernel_commands.iter().any(|c| c == command)
    }
}
