//! Bridges a composite kernel to one connection.
//!
//! Commands arriving on the connection are sent to the composite; every
//! composite event is written back. Events arriving on the connection feed the
//! proxies created through [`KernelHost::create_proxy`].

use std::time::Duration;

use polyglot_kernel::{
    CommandKind, CompositeKernel, Diagnostic, DiagnosticSeverity, EventKind, Kernel, KernelCommand,
    KernelCommandResult, KernelEvent, KernelUri, LinePosition, SubmissionType,
    envelope::CommandOrEvent,
};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinSet;

use crate::connection::{ConnectionReceiver, ConnectionSender};
use crate::error::HostError;
use crate::proxy::ProxyHandler;

const INCOMING_CAPACITY: usize = 4096;

/// How long commands still running at shutdown get to finish.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct KernelHost {
    composite: CompositeKernel,
    sender: ConnectionSender,
    incoming: broadcast::Sender<KernelEvent>,
}

impl KernelHost {
    pub fn new(composite: CompositeKernel, sender: ConnectionSender) -> Self {
        let (incoming, _) = broadcast::channel(INCOMING_CAPACITY);
        Self {
            composite,
            sender,
            incoming,
        }
    }

    pub fn composite(&self) -> &CompositeKernel {
        &self.composite
    }

    pub fn uri(&self) -> &KernelUri {
        self.composite.uri()
    }

    /// Registers a child that forwards its commands to `remote_uri` over this
    /// host's connection.
    pub fn create_proxy(&self, local_name: &str, remote_uri: KernelUri) -> Result<Kernel, HostError> {
        let handler = ProxyHandler::new(remote_uri.clone(), self.sender.clone(), self.incoming.clone());
        let kernel = Kernel::new(local_name, handler);
        self.composite.add(kernel.clone(), &[])?;
        tracing::info!("proxy '{local_name}' -> {remote_uri}");
        Ok(kernel)
    }

    /// Announces the local kernels to the remote side.
    pub fn announce(&self) -> Result<(), HostError> {
        let mut kernel_infos = vec![self.composite.info()];
        kernel_infos.extend(
            self.composite
                .kernels()
                .iter()
                .filter(|k| !k.is_proxy())
                .map(Kernel::info),
        );
        let mut command = KernelCommand::new(CommandKind::RequestKernelInfo);
        command.set_origin_uri(Some(self.uri().clone()));
        let mut event = KernelEvent::new(EventKind::KernelReady { kernel_infos }, command);
        event.routing_slip.stamp(self.uri());
        self.sender.send_event(&event)
    }

    /// Serves the connection until the remote side closes it or a `Quit`
    /// command is received. Commands still running at that point get
    /// [`DRAIN_TIMEOUT`] to finish, and their events are written out before
    /// this returns.
    pub async fn run(self, mut receiver: ConnectionReceiver) -> Result<(), HostError> {
        let (stop_tx, stop_rx) = oneshot::channel();
        let forwarder = tokio::spawn(forward_events(
            self.composite.subscribe(),
            self.sender.clone(),
            stop_rx,
        ));
        self.announce()?;

        let mut in_flight = JoinSet::new();
        let quit = self.composite.quit_signal();
        loop {
            tokio::select! {
                item = receiver.recv() => {
                    let Some(item) = item else {
                        tracing::info!("connection closed by remote");
                        break;
                    };
                    self.dispatch(item, &mut in_flight);
                }
                _ = quit.cancelled() => {
                    tracing::info!("kernel host shutting down");
                    break;
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!("{} commands still running at shutdown", in_flight.len());
            in_flight.abort_all();
        }
        let _ = stop_tx.send(());
        if let Err(err) = forwarder.await {
            tracing::warn!("event forwarder failed: {err}");
        }
        // The remote side may already be gone.
        let _ = self.sender.flush().await;
        Ok(())
    }

    fn dispatch(&self, item: CommandOrEvent, in_flight: &mut JoinSet<KernelCommandResult>) {
        match item {
            CommandOrEvent::Command(command) => {
                tracing::debug!("received {} {}", command.kind().name(), command.token());
                // Queued now, in arrival order; awaited off the read loop.
                in_flight.spawn(self.composite.send(command));
            }
            CommandOrEvent::Event(event) => {
                let _ = self.incoming.send(event);
            }
            CommandOrEvent::ParseError { raw, message } => {
                tracing::warn!("unparseable envelope: {message}");
                if let Err(err) = self.sender.send_event(&parse_error_event(raw, message)) {
                    tracing::warn!("could not report parse error: {err}");
                }
            }
        }
    }
}

fn parse_error_event(raw: String, message: String) -> KernelEvent {
    let end = raw.lines().count().saturating_sub(1);
    let command = KernelCommand::new(CommandKind::SubmitCode {
        code: raw,
        submission_type: SubmissionType::Diagnose,
    });
    let diagnostic = Diagnostic {
        start: LinePosition::default(),
        end: LinePosition {
            line: end,
            character: 0,
        },
        severity: DiagnosticSeverity::Error,
        code: "parse_error".into(),
        message: message.clone(),
    };
    KernelEvent::new(
        EventKind::DiagnosticsProduced {
            diagnostics: vec![diagnostic],
            formatted_values: EventKind::plain_text(message),
        },
        command,
    )
}

/// Writes composite events to the connection until `stop` fires, then
/// writes whatever is already buffered and returns.
async fn forward_events(
    mut events: broadcast::Receiver<KernelEvent>,
    sender: ConnectionSender,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let received = tokio::select! {
            received = events.recv() => received,
            _ = &mut stop => break,
        };
        match received {
            Ok(event) => {
                if sender.send_event(&event).is_err() {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("event forwarder skipped {n} events");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
    loop {
        match events.try_recv() {
            Ok(event) => {
                if sender.send_event(&event).is_err() {
                    return;
                }
            }
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                tracing::warn!("event forwarder skipped {n} events");
            }
            Err(_) => return,
        }
    }
}
