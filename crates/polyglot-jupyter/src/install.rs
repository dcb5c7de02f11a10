//! `jupyter install`: kernel specs that point Jupyter at this binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::JupyterConfig;
use crate::error::JupyterError;

/// Contents of a `kernel.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSpec {
    pub argv: Vec<String>,
    pub display_name: String,
    pub language: String,
}

impl KernelSpec {
    /// A spec that starts `executable jupyter` with `kernel_name` as the
    /// default kernel.
    pub fn new(
        executable: &Path,
        kernel_name: &str,
        display_name: &str,
        language: &str,
        http_port_range: Option<&str>,
    ) -> Self {
        let mut argv = vec![
            executable.display().to_string(),
            "jupyter".into(),
            "--default-kernel".into(),
            kernel_name.into(),
            "{connection_file}".into(),
        ];
        if let Some(range) = http_port_range {
            argv.extend(["--http-port-range".into(), range.into()]);
        }
        Self {
            argv,
            display_name: display_name.into(),
            language: language.into(),
        }
    }

    /// Directory name Jupyter lists the spec under.
    pub fn dir_name(kernel_name: &str) -> String {
        format!("polyglot-{}", kernel_name.to_lowercase())
    }
}

/// Writes `<dest>/<dir>/kernel.json` for each spec and returns the paths
/// written. An explicit `path` must already exist; the default location is
/// created on demand.
pub fn install(
    config: &JupyterConfig,
    path: Option<&Path>,
    specs: &[(String, KernelSpec)],
) -> Result<Vec<PathBuf>, JupyterError> {
    let dest = match path {
        Some(path) if !path.is_dir() => {
            return Err(JupyterError::KernelSpec(format!(
                "directory {} does not exist",
                path.display()
            )));
        }
        Some(path) => path.to_path_buf(),
        None => {
            let dir = config.kernels_dir().ok_or_else(|| {
                JupyterError::KernelSpec("cannot locate the Jupyter data directory".into())
            })?;
            std::fs::create_dir_all(&dir)?;
            dir
        }
    };

    let mut written = Vec::with_capacity(specs.len());
    for (kernel_name, spec) in specs {
        let dir = dest.join(KernelSpec::dir_name(kernel_name));
        std::fs::create_dir_all(&dir)?;
        let file = dir.join("kernel.json");
        std::fs::write(&file, serde_json::to_vec_pretty(spec)?)?;
        tracing::info!("installed kernel spec '{}' at {}", spec.display_name, file.display());
        written.push(file);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_spec(range: Option<&str>) -> (String, KernelSpec) {
        (
            "value".into(),
            KernelSpec::new(Path::new("/usr/bin/polyglot"), "value", "Polyglot (value)", "value", range),
        )
    }

    #[test]
    fn writes_kernel_json_under_an_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let written = install(
            &JupyterConfig::default(),
            Some(dir.path()),
            &[value_spec(Some("1000-2000"))],
        )
        .unwrap();

        assert_eq!(written, vec![dir.path().join("polyglot-value/kernel.json")]);
        let spec: KernelSpec =
            serde_json::from_slice(&std::fs::read(&written[0]).unwrap()).unwrap();
        assert_eq!(
            spec.argv,
            [
                "/usr/bin/polyglot",
                "jupyter",
                "--default-kernel",
                "value",
                "{connection_file}",
                "--http-port-range",
                "1000-2000"
            ]
        );
        assert_eq!(spec.display_name, "Polyglot (value)");
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let err = install(
            &JupyterConfig::default(),
            Some(&dir.path().join("missing")),
            &[value_spec(None)],
        )
        .unwrap_err();
        assert!(matches!(err, JupyterError::KernelSpec(_)));
    }

    #[test]
    fn default_location_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let config = JupyterConfig {
            data_dir: Some(dir.path().join("jupyter")),
            ..JupyterConfig::default()
        };
        let written = install(&config, None, &[value_spec(None)]).unwrap();
        assert!(written[0].starts_with(dir.path().join("jupyter/kernels")));
        assert!(written[0].exists());
    }
}
