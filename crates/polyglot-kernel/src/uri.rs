//! `kernel://<host>/<name>[/<nested>...]` addresses.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::KernelError;

pub const SCHEME: &str = "kernel";

/// Address of a kernel instance, unique within a host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KernelUri(String);

impl KernelUri {
    pub fn parse(raw: &str) -> Result<Self, KernelError> {
        let url = Url::parse(raw).map_err(|e| KernelError::InvalidUri(format!("{raw}: {e}")))?;
        if url.scheme() != SCHEME {
            return Err(KernelError::InvalidUri(format!(
                "{raw}: expected scheme '{SCHEME}'"
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(KernelError::InvalidUri(format!("{raw}: missing host")));
        }
        Ok(Self(raw.trim_end_matches('/').to_string()))
    }

    /// Root URI for a host, e.g. `kernel://pid-42`.
    pub fn host(name: &str) -> Self {
        Self(format!("{SCHEME}://{name}"))
    }

    pub fn for_process() -> Self {
        Self::host(&format!("pid-{}", std::process::id()))
    }

    /// URI of a kernel nested under this one.
    pub fn join(&self, name: &str) -> Self {
        Self(format!("{}/{}", self.0, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn host_name(&self) -> &str {
        let rest = &self.0[SCHEME.len() + 3..];
        rest.split('/').next().unwrap_or(rest)
    }

    /// Last path segment, or the host name for a host root.
    pub fn local_name(&self) -> &str {
        let rest = &self.0[SCHEME.len() + 3..];
        rest.rsplit('/').next().unwrap_or(rest)
    }

    pub fn is_kernel_uri(raw: &str) -> bool {
        raw.starts_with("kernel://")
    }
}

impl fmt::Display for KernelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KernelUri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for KernelUri {
    type Error = KernelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        KernelUri::parse(&value)
    }
}

impl From<KernelUri> for String {
    fn from(value: KernelUri) -> Self {
        value.0
    }
}
