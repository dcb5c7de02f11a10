//! `polyglot stdio`: a kernel host speaking newline-delimited JSON envelopes
//! on stdin/stdout, optionally with the HTTP API alongside.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use polyglot_host::{HostConfig, KernelHost, PortRange, connect, spawn_http_server};
use polyglot_kernel::KernelUri;
use tokio::sync::broadcast;

use crate::kernels;
use crate::opts::GlobalOpts;

#[derive(Args, Debug)]
pub struct StdioArgs {
    /// Serve the HTTP API on this port (env: POLYGLOT_HTTP_PORT)
    #[arg(long, conflicts_with = "http_port_range")]
    pub http_port: Option<u16>,

    /// Serve the HTTP API on the first free port in START-END (env: POLYGLOT_HTTP_PORT_RANGE)
    #[arg(long, value_name = "START-END")]
    pub http_port_range: Option<PortRange>,

    /// Host name used in this process's kernel URIs (env: POLYGLOT_KERNEL_HOST)
    #[arg(long)]
    pub kernel_host: Option<String>,

    /// Directory to run in
    #[arg(long)]
    pub working_dir: Option<PathBuf>,
}

impl StdioArgs {
    /// Environment defaults overlaid with the command line.
    fn host_config(&self, opts: &GlobalOpts) -> Result<HostConfig> {
        let mut config = HostConfig::from_env()?;
        if let Some(name) = &opts.default_kernel {
            config.default_kernel = Some(name.clone());
        }
        if let Some(host) = &self.kernel_host {
            config.kernel_host = Some(host.clone());
        }
        if let Some(dir) = &self.working_dir {
            config.working_dir = Some(dir.clone());
        }
        if let Some(range) = self.http_port_range {
            config.http.ports = Some(range);
        }
        if let Some(port) = self.http_port {
            config.http.ports = Some(PortRange::single(port));
        }
        Ok(config)
    }
}

pub async fn cmd_stdio(opts: &GlobalOpts, args: &StdioArgs) -> Result<()> {
    let config = args.host_config(opts)?;
    if let Some(dir) = &config.working_dir {
        std::env::set_current_dir(dir)
            .with_context(|| format!("cannot change to working directory {}", dir.display()))?;
    }
    let uri = match &config.kernel_host {
        Some(name) => KernelUri::host(name),
        None => KernelUri::for_process(),
    };
    let composite = kernels::composite(uri, config.default_kernel.as_deref())?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let http = spawn_http_server(&config.http, composite.clone(), shutdown_tx.clone())
        .await
        .context("starting the HTTP API")?;

    let (sender, receiver) = connect(tokio::io::stdin(), tokio::io::stdout());
    let host = KernelHost::new(composite, sender);
    tracing::info!("kernel host {} serving on stdio", host.uri());

    let served = tokio::select! {
        served = host.run(receiver) => served.map_err(anyhow::Error::from),
        _ = super::shutdown_signal() => Ok(()),
    };

    let _ = shutdown_tx.send(());
    if let Some(http) = http {
        let _ = http.await;
    }
    served?;
    // The stdin reader blocks runtime shutdown until another line arrives.
    std::process::exit(0);
}
