mod commands;
mod kernels;
mod opts;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::jupyter::JupyterArgs;
use commands::stdio::StdioArgs;
use opts::GlobalOpts;

#[derive(Parser, Debug)]
#[command(name = "polyglot", version, about = "Polyglot notebook kernel host")]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the kernel protocol as newline-delimited JSON on stdin/stdout
    Stdio(StdioArgs),

    /// Run as a Jupyter kernel, or install Jupyter kernel specs
    Jupyter(JupyterArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    opts::setup_logging(&cli.opts);

    match &cli.command {
        Command::Stdio(args) => commands::stdio::cmd_stdio(&cli.opts, args).await,
        Command::Jupyter(args) => commands::jupyter::cmd_jupyter(&cli.opts, args).await,
    }
}
