//! `polyglot jupyter`: serve a Jupyter connection file, or install kernel
//! specs that launch this binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use polyglot_host::{HttpServerConfig, PortRange, spawn_http_server};
use polyglot_jupyter::{ConnectionInfo, JupyterConfig, KernelSpec};
use polyglot_kernel::KernelUri;
use tokio::sync::broadcast;

use crate::kernels::{self, BUILTIN_KERNELS};
use crate::opts::GlobalOpts;

#[derive(Args, Debug)]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
pub struct JupyterArgs {
    #[command(subcommand)]
    pub command: Option<JupyterCommand>,

    /// Connection file written by the Jupyter frontend
    #[arg(required = true)]
    pub connection_file: Option<PathBuf>,

    /// Also serve the HTTP API on the first free port in START-END
    #[arg(long, value_name = "START-END")]
    pub http_port_range: Option<PortRange>,
}

#[derive(Subcommand, Debug)]
pub enum JupyterCommand {
    /// Install a Jupyter kernel spec for each built-in kernel
    Install(InstallArgs),
}

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Existing directory to install into (default: the Jupyter data directory)
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Passed to the installed kernels as --http-port-range
    #[arg(long, value_name = "START-END")]
    pub http_port_range: Option<PortRange>,
}

pub async fn cmd_jupyter(opts: &GlobalOpts, args: &JupyterArgs) -> Result<()> {
    let mut config = JupyterConfig::from_env();
    if let Some(name) = &opts.default_kernel {
        config.default_kernel = Some(name.clone());
    }
    match (&args.command, &args.connection_file) {
        (Some(JupyterCommand::Install(install)), _) => cmd_install(&config, install),
        (None, Some(path)) => serve(&config, path, args.http_port_range).await,
        (None, None) => anyhow::bail!("a connection file is required"),
    }
}

async fn serve(
    config: &JupyterConfig,
    connection_file: &std::path::Path,
    http_ports: Option<PortRange>,
) -> Result<()> {
    let info = ConnectionInfo::from_file(connection_file)
        .with_context(|| format!("reading connection file {}", connection_file.display()))?;
    let composite = kernels::composite(KernelUri::for_process(), config.default_kernel.as_deref())?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let http_config = HttpServerConfig {
        ports: http_ports,
        ..HttpServerConfig::default()
    };
    let http = spawn_http_server(&http_config, composite.clone(), shutdown_tx.clone())
        .await
        .context("starting the HTTP API")?;

    let served = tokio::select! {
        served = polyglot_jupyter::serve(&info, composite) => served.context("jupyter kernel failed"),
        _ = super::shutdown_signal() => Ok(()),
    };

    let _ = shutdown_tx.send(());
    if let Some(http) = http {
        let _ = http.await;
    }
    served
}

fn cmd_install(config: &JupyterConfig, args: &InstallArgs) -> Result<()> {
    let executable = std::env::current_exe().context("locating the polyglot executable")?;
    let range = args
        .http_port_range
        .map(|r| format!("{}-{}", r.start, r.end));
    let specs: Vec<_> = BUILTIN_KERNELS
        .iter()
        .map(|(name, display_name, language)| {
            let spec = KernelSpec::new(&executable, name, display_name, language, range.as_deref());
            (name.to_string(), spec)
        })
        .collect();

    let written = polyglot_jupyter::install(config, args.path.as_deref(), &specs)?;
    for path in written {
        println!("Installed {}", path.display());
    }
    Ok(())
}
