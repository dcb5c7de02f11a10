//! Newline-delimited JSON envelopes over any byte stream (stdio, child
//! process pipes, unix sockets).

use polyglot_kernel::envelope::{CommandOrEvent, serialize_command, serialize_event};
use polyglot_kernel::{KernelCommand, KernelEvent};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};

use crate::error::HostError;

enum Outgoing {
    Line(String),
    Flush(oneshot::Sender<()>),
}

/// Writes envelopes to the remote side. Cheap to clone; all clones feed one
/// writer task, so lines never interleave.
#[derive(Clone)]
pub struct ConnectionSender {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl ConnectionSender {
    pub fn send_command(&self, command: &KernelCommand) -> Result<(), HostError> {
        self.send_line(serialize_command(command)?)
    }

    pub fn send_event(&self, event: &KernelEvent) -> Result<(), HostError> {
        self.send_line(serialize_event(event)?)
    }

    fn send_line(&self, line: String) -> Result<(), HostError> {
        self.tx
            .send(Outgoing::Line(line))
            .map_err(|_| HostError::ConnectionClosed)
    }

    /// Resolves once every line queued before this call has been written.
    pub async fn flush(&self) -> Result<(), HostError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Outgoing::Flush(done_tx))
            .map_err(|_| HostError::ConnectionClosed)?;
        done_rx.await.map_err(|_| HostError::ConnectionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Decoded envelopes from the remote side, in arrival order.
pub struct ConnectionReceiver {
    rx: mpsc::UnboundedReceiver<CommandOrEvent>,
}

impl ConnectionReceiver {
    /// `None` once the remote side closed its stream.
    pub async fn recv(&mut self) -> Option<CommandOrEvent> {
        self.rx.recv().await
    }
}

/// Starts reader and writer tasks over a byte stream pair.
pub fn connect<R, W>(reader: R, writer: W) -> (ConnectionSender, ConnectionReceiver)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    tokio::spawn(write_lines(writer, out_rx));
    tokio::spawn(read_lines(reader, in_tx));
    (
        ConnectionSender { tx: out_tx },
        ConnectionReceiver { rx: in_rx },
    )
}

async fn write_lines<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Outgoing>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(outgoing) = rx.recv().await {
        let line = match outgoing {
            Outgoing::Line(line) => line,
            Outgoing::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;
        if let Err(err) = written {
            tracing::warn!("connection write failed: {err}");
            break;
        }
    }
}

async fn read_lines<R>(reader: R, tx: mpsc::UnboundedSender<CommandOrEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let raw = line.trim();
                if raw.is_empty() {
                    continue;
                }
                if tx.send(CommandOrEvent::parse(raw)).is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::warn!("connection read failed: {err}");
                break;
            }
        }
    }
    tracing::debug!("connection reader finished");
}
