//! `#!connect` and the unix-socket listener that `#!connect named-pipe`
//! dials.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use clap::{Arg, ArgAction, ArgMatches, Command};
use polyglot_kernel::envelope::CommandOrEvent;
use polyglot_kernel::{
    CompositeKernel, Directive, DirectiveInvocation, EventKind, Kernel, KernelError, KernelEvent,
    KernelInfo, KernelUri, WeakCompositeKernel,
};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, oneshot};

use crate::connection::{ConnectionReceiver, ConnectionSender, connect};
use crate::error::HostError;
use crate::host::KernelHost;
use crate::proxy::ProxyHandler;

/// How long a connected kernel has to announce itself.
pub const READY_TIMEOUT: Duration = Duration::from_secs(30);

const INCOMING_CAPACITY: usize = 4096;

/// Adds `#!connect` to a composite.
pub fn use_connect(composite: &CompositeKernel) -> Result<(), KernelError> {
    composite.add_directive(connect_directive(composite.downgrade()))
}

fn connect_directive(composite: WeakCompositeKernel) -> Directive {
    Directive::new(
        "#!connect",
        "Connect to a kernel running in another process.",
        move |inv| {
            let composite = composite.upgrade();
            async move {
                let composite =
                    composite.ok_or_else(|| KernelError::handler("kernel was disposed"))?;
                run_connect(composite, inv).await
            }
        },
    )
    .subcommand(
        Command::new("stdio")
            .about("Start a process that speaks the kernel protocol on stdio")
            .arg(kernel_name_arg())
            .arg(
                Arg::new("kernel-host")
                    .long("kernel-host")
                    .help("Host name the connected kernels use in their URIs"),
            )
            .arg(
                Arg::new("working-dir")
                    .long("working-dir")
                    .help("Working directory for the process"),
            )
            .arg(
                Arg::new("command")
                    .long("command")
                    .required(true)
                    .num_args(1..)
                    .allow_hyphen_values(true)
                    .action(ArgAction::Append)
                    .help("The program to run, followed by its arguments"),
            ),
    )
    .subcommand(
        Command::new("named-pipe")
            .about("Connect to a kernel host listening on a local socket")
            .arg(kernel_name_arg())
            .arg(
                Arg::new("pipe-name")
                    .long("pipe-name")
                    .required(true)
                    .help("Path of the socket"),
            ),
    )
}

fn kernel_name_arg() -> Arg {
    Arg::new("kernel-name")
        .long("kernel-name")
        .required(true)
        .help("Local name for the connected kernel")
}

async fn run_connect(
    composite: CompositeKernel,
    inv: DirectiveInvocation,
) -> Result<(), KernelError> {
    let (kernel, info) = match inv.matches.subcommand() {
        Some(("stdio", args)) => connect_stdio(&composite, args).await,
        Some(("named-pipe", args)) => connect_named_pipe(&composite, args).await,
        _ => Err(HostError::Config(
            "#!connect needs a connection type: stdio or named-pipe".into(),
        )),
    }
    .map_err(into_kernel_error)?;

    inv.context.publish(EventKind::KernelInfoProduced { kernel_info: info });
    inv.context.publish(EventKind::DisplayedValueProduced {
        formatted_values: EventKind::plain_text(format!(
            "Kernel added: #!{}",
            kernel.name()
        )),
        value_id: None,
    });
    Ok(())
}

fn string_arg(args: &ArgMatches, id: &str) -> Result<String, HostError> {
    args.get_one::<String>(id)
        .cloned()
        .ok_or_else(|| HostError::Config(format!("missing --{id}")))
}

async fn connect_stdio(
    composite: &CompositeKernel,
    args: &ArgMatches,
) -> Result<(Kernel, KernelInfo), HostError> {
    let name = string_arg(args, "kernel-name")?;
    let host = args
        .get_one::<String>("kernel-host")
        .cloned()
        .unwrap_or_else(|| name.clone());
    let mut words = args
        .get_many::<String>("command")
        .into_iter()
        .flatten()
        .cloned();
    let program = words
        .next()
        .ok_or_else(|| HostError::Config("missing --command".into()))?;

    let mut process = tokio::process::Command::new(&program);
    process
        .args(words)
        .arg("--kernel-host")
        .arg(&host)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    if let Some(dir) = args.get_one::<String>("working-dir") {
        process.current_dir(dir);
    }
    let mut child = process.spawn()?;
    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(HostError::Config(format!("could not pipe stdio of '{program}'")));
    };
    tracing::info!("started '{program}' for kernel '{name}'");

    let (sender, receiver) = connect(stdout, stdin);
    let quit = composite.quit_signal();
    tokio::spawn(async move {
        let quitting = tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) => tracing::info!("'{program}' exited with {status}"),
                    Err(err) => tracing::warn!("'{program}' wait failed: {err}"),
                }
                false
            }
            _ = quit.cancelled() => true,
        };
        if quitting {
            let _ = child.kill().await;
        }
    });

    attach_remote(composite, &name, KernelUri::host(&host), sender, receiver).await
}

async fn connect_named_pipe(
    composite: &CompositeKernel,
    args: &ArgMatches,
) -> Result<(Kernel, KernelInfo), HostError> {
    let name = string_arg(args, "kernel-name")?;
    let path = PathBuf::from(string_arg(args, "pipe-name")?);
    let stream = UnixStream::connect(&path).await?;
    let (read, write) = stream.into_split();
    let (sender, receiver) = connect(read, write);
    tracing::info!("connected to {}", path.display());

    let (sender, incoming, ready) = pump(composite, sender, receiver);
    let infos = await_ready(ready).await?;
    let root = infos
        .iter()
        .find(|info| info.is_composite)
        .and_then(|info| info.uri.clone())
        .ok_or_else(|| HostError::Config("connected host did not announce its uri".into()))?;
    add_proxy(composite, &name, root, sender, incoming, &infos)
}

/// Waits for the remote's `KernelReady`, then registers a proxy for its root.
async fn attach_remote(
    composite: &CompositeKernel,
    name: &str,
    root: KernelUri,
    sender: ConnectionSender,
    receiver: ConnectionReceiver,
) -> Result<(Kernel, KernelInfo), HostError> {
    let (sender, incoming, ready) = pump(composite, sender, receiver);
    let infos = await_ready(ready).await?;
    add_proxy(composite, name, root, sender, incoming, &infos)
}

async fn await_ready(
    ready: oneshot::Receiver<Vec<KernelInfo>>,
) -> Result<Vec<KernelInfo>, HostError> {
    match tokio::time::timeout(READY_TIMEOUT, ready).await {
        Ok(Ok(infos)) => Ok(infos),
        Ok(Err(_)) => Err(HostError::ConnectionClosed),
        Err(_) => Err(HostError::Config(
            "connected kernel did not report ready in time".into(),
        )),
    }
}

fn add_proxy(
    composite: &CompositeKernel,
    name: &str,
    root: KernelUri,
    sender: ConnectionSender,
    incoming: broadcast::Sender<KernelEvent>,
    infos: &[KernelInfo],
) -> Result<(Kernel, KernelInfo), HostError> {
    let mut handler = ProxyHandler::new(root.clone(), sender, incoming);
    if let Some(info) = infos.iter().find(|i| i.uri.as_ref() == Some(&root)) {
        handler = handler.with_remote_info(info.clone());
    }
    let kernel = Kernel::new(name, handler);
    composite.add(kernel.clone(), &[])?;
    let info = kernel.info();
    Ok((kernel, info))
}

/// Reads the connection on behalf of proxies: events go to `incoming`, the
/// first `KernelReady` resolves the returned receiver, and commands sent by
/// the remote run on `composite` with their events written back.
fn pump(
    composite: &CompositeKernel,
    sender: ConnectionSender,
    mut receiver: ConnectionReceiver,
) -> (
    ConnectionSender,
    broadcast::Sender<KernelEvent>,
    oneshot::Receiver<Vec<KernelInfo>>,
) {
    let (incoming, _) = broadcast::channel(INCOMING_CAPACITY);
    let (ready_tx, ready_rx) = oneshot::channel();
    let events = incoming.clone();
    let replies = sender.clone();
    let composite = composite.downgrade();
    tokio::spawn(async move {
        let mut ready_tx = Some(ready_tx);
        while let Some(item) = receiver.recv().await {
            match item {
                CommandOrEvent::Event(event) => {
                    if let EventKind::KernelReady { kernel_infos } = &event.kind {
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(kernel_infos.clone());
                        }
                    }
                    let _ = events.send(event);
                }
                CommandOrEvent::Command(command) => {
                    let Some(composite) = composite.upgrade() else {
                        break;
                    };
                    let pending = composite.send(command);
                    let replies = replies.clone();
                    tokio::spawn(async move {
                        for event in pending.await.events {
                            if replies.send_event(&event).is_err() {
                                break;
                            }
                        }
                    });
                }
                CommandOrEvent::ParseError { message, .. } => {
                    tracing::warn!("connected kernel sent an unparseable envelope: {message}");
                }
            }
        }
        tracing::debug!("connected kernel closed its stream");
    });
    (sender, incoming, ready_rx)
}

/// Serves every connection on `path` with its own [`KernelHost`]. Runs until
/// the composite receives `Quit`.
pub async fn listen_unix(path: &Path, composite: CompositeKernel) -> Result<(), HostError> {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
    let listener = UnixListener::bind(path)?;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    tracing::info!("listening on {}", path.display());

    let quit = composite.quit_signal();
    loop {
        tokio::select! {
            res = listener.accept() => {
                match res {
                    Ok((stream, _)) => {
                        let (read, write) = stream.into_split();
                        let (sender, receiver) = connect(read, write);
                        let host = KernelHost::new(composite.clone(), sender);
                        tokio::spawn(async move {
                            if let Err(err) = host.run(receiver).await {
                                tracing::warn!("connection ended with error: {err}");
                            }
                        });
                    }
                    Err(err) => tracing::warn!("accept failed: {err}"),
                }
            }
            _ = quit.cancelled() => {
                let _ = std::fs::remove_file(path);
                break;
            }
        }
    }
    Ok(())
}

fn into_kernel_error(err: HostError) -> KernelError {
    match err {
        HostError::Kernel(err) => err,
        other => KernelError::Transport(other.to_string()),
    }
}
