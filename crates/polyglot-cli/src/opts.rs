//! Options shared by every subcommand.

use clap::Args;
use tracing_subscriber::EnvFilter;

#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Kernel that runs code without a kernel chooser (env: POLYGLOT_DEFAULT_KERNEL)
    #[arg(long, global = true)]
    pub default_kernel: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Logs go to stderr; stdout belongs to the stdio protocol.
pub fn setup_logging(opts: &GlobalOpts) {
    let default = if opts.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
