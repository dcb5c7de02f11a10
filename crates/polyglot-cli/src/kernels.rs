//! The kernels every `polyglot` process starts with.

use anyhow::{Context, Result};
use polyglot_kernel::{CompositeKernel, Kernel, KernelUri, ValueKernel, use_who};

/// Built-in kernels as `(name, display name, language)`.
pub const BUILTIN_KERNELS: &[(&str, &str, &str)] = &[("value", "Polyglot (value)", "value")];

/// A composite at `uri` holding the built-in kernels and `#!connect`.
pub fn composite(uri: KernelUri, default_kernel: Option<&str>) -> Result<CompositeKernel> {
    let composite = CompositeKernel::with_uri("polyglot", uri);

    let value = Kernel::new("value", ValueKernel::new());
    use_who(&value)?;
    composite.add(value, &[])?;
    polyglot_host::use_connect(&composite)?;

    if let Some(name) = default_kernel {
        composite
            .set_default_kernel(name)
            .with_context(|| format!("unknown default kernel '{name}'"))?;
    }
    Ok(composite)
}
