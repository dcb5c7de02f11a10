use std::path::PathBuf;

pub const DEFAULT_KERNEL_ENV: &str = "POLYGLOT_DEFAULT_KERNEL";
pub const JUPYTER_DATA_DIR_ENV: &str = "JUPYTER_DATA_DIR";

#[derive(Debug, Clone, Default)]
pub struct JupyterConfig {
    /// Child kernel that runs cells without a kernel chooser.
    pub default_kernel: Option<String>,
    /// Jupyter's data directory; kernel specs live in its `kernels/`.
    pub data_dir: Option<PathBuf>,
}

impl JupyterConfig {
    pub fn from_env() -> Self {
        let data_dir = std::env::var_os(JUPYTER_DATA_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME")
                    .map(|home| PathBuf::from(home).join(".local/share/jupyter"))
            });
        Self {
            default_kernel: std::env::var(DEFAULT_KERNEL_ENV).ok(),
            data_dir,
        }
    }

    pub fn kernels_dir(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join("kernels"))
    }
}
