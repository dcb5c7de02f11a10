//! Multipart frames over plain TCP.
//!
//! A message is a big-endian `u32` frame count followed by each frame as a
//! big-endian `u32` length and its bytes. Shell, control and stdin behave as
//! routers. A client opens each router connection with a one-frame handshake
//! carrying its identity; using the same identity on all three channels lets
//! stdin prompts reach the client whose request raised them. An empty
//! handshake frame gets a generated identity. The identity is prepended to
//! the frames a connection sends, and outbound frames are delivered to the
//! connection named by their first frame, or dropped when nobody by that name
//! is connected. IOPub fans out to every connection. Heartbeat echoes.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use super::{Duplex, KernelSockets};
use crate::connection::{ChannelKind, ConnectionInfo};
use crate::error::JupyterError;
use crate::message::{DELIMITER, Frames};

pub const MAX_FRAMES: usize = 1024;
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;
/// Pause after a failed accept, so a persistent error does not spin.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
/// How long a new router connection has to send its handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type Peers = Arc<Mutex<HashMap<Vec<u8>, mpsc::UnboundedSender<Frames>>>>;

/// Sockets bound for every channel, plus the connection info with the ports
/// actually bound (relevant when the file asked for port 0).
pub struct Bound {
    pub sockets: KernelSockets,
    pub info: ConnectionInfo,
}

/// Binds all five channels. Any failure aborts startup.
pub async fn bind(info: &ConnectionInfo) -> Result<Bound, JupyterError> {
    let shell = listen(info, ChannelKind::Shell).await?;
    let iopub = listen(info, ChannelKind::IoPub).await?;
    let stdin = listen(info, ChannelKind::Stdin).await?;
    let control = listen(info, ChannelKind::Control).await?;
    let heartbeat = listen(info, ChannelKind::Heartbeat).await?;

    let mut bound = info.clone();
    bound.shell_port = shell.local_addr()?.port();
    bound.iopub_port = iopub.local_addr()?.port();
    bound.stdin_port = stdin.local_addr()?.port();
    bound.control_port = control.local_addr()?.port();
    bound.hb_port = heartbeat.local_addr()?.port();

    tokio::spawn(echo(heartbeat));
    Ok(Bound {
        sockets: KernelSockets {
            shell: router(shell, ChannelKind::Shell),
            control: router(control, ChannelKind::Control),
            stdin: router(stdin, ChannelKind::Stdin),
            iopub: publisher(iopub),
        },
        info: bound,
    })
}

async fn listen(info: &ConnectionInfo, channel: ChannelKind) -> Result<TcpListener, JupyterError> {
    let listener = TcpListener::bind(info.address(channel))
        .await
        .map_err(|source| JupyterError::Bind {
            channel: channel.name(),
            address: info.endpoint(channel),
            source,
        })?;
    tracing::debug!("{} channel bound to {}", channel.name(), info.endpoint(channel));
    Ok(listener)
}

fn router(listener: TcpListener, channel: ChannelKind) -> Duplex {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frames>();
    let peers: Peers = Arc::default();

    tokio::spawn(accept_peers(listener, channel, peers.clone(), inbound_tx));
    tokio::spawn(async move {
        while let Some(mut frames) = outbound_rx.recv().await {
            let identity = match frames.first() {
                Some(first) if first.as_slice() != DELIMITER => Some(frames.remove(0)),
                _ => None,
            };
            let Ok(peers) = peers.lock() else {
                break;
            };
            match identity.as_ref().and_then(|id| peers.get(id)) {
                Some(peer) => {
                    let _ = peer.send(frames);
                }
                None => tracing::debug!(
                    "{} dropped a message for {}",
                    channel.name(),
                    identity
                        .as_deref()
                        .map(String::from_utf8_lossy)
                        .unwrap_or_else(|| "no identity".into())
                ),
            }
        }
    });

    Duplex {
        outbound: outbound_tx,
        inbound: inbound_rx,
    }
}

async fn accept_peers(
    listener: TcpListener,
    channel: ChannelKind,
    peers: Peers,
    inbound: mpsc::UnboundedSender<Frames>,
) {
    let mut next = 0u64;
    loop {
        let (stream, addr) = accept_with_backoff(channel.name(), || listener.accept()).await;
        tracing::debug!("{} peer connected from {addr}", channel.name());
        next += 1;
        let fallback = format!("{}-peer-{next}", channel.name()).into_bytes();
        tokio::spawn(serve_peer(
            stream,
            channel,
            fallback,
            peers.clone(),
            inbound.clone(),
        ));
    }
}

async fn serve_peer(
    stream: TcpStream,
    channel: ChannelKind,
    fallback: Vec<u8>,
    peers: Peers,
    inbound: mpsc::UnboundedSender<Frames>,
) {
    let (mut read, write) = stream.into_split();
    let identity = match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frames(&mut read)).await {
        Ok(Ok(Some(mut frames))) if frames.len() == 1 => match frames.remove(0) {
            id if id.is_empty() => fallback,
            id => id,
        },
        Ok(Ok(None)) => return,
        Ok(Ok(Some(frames))) => {
            tracing::warn!(
                "{} handshake has {} frames, expected 1",
                channel.name(),
                frames.len()
            );
            return;
        }
        Ok(Err(err)) => {
            tracing::warn!("{} peer sent a bad handshake: {err}", channel.name());
            return;
        }
        Err(_) => {
            tracing::warn!("{} peer sent no handshake", channel.name());
            return;
        }
    };

    let (tx, rx) = mpsc::unbounded_channel();
    {
        let Ok(mut peers) = peers.lock() else {
            return;
        };
        if peers.contains_key(&identity) {
            tracing::warn!(
                "{} refused a second connection for {}",
                channel.name(),
                String::from_utf8_lossy(&identity)
            );
            return;
        }
        peers.insert(identity.clone(), tx);
    }
    tokio::spawn(drain_to(write, rx));

    loop {
        match read_frames(&mut read).await {
            Ok(Some(mut frames)) => {
                frames.insert(0, identity.clone());
                if inbound.send(frames).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!("{} peer sent bad frames: {err}", channel.name());
                break;
            }
        }
    }
    if let Ok(mut peers) = peers.lock() {
        peers.remove(&identity);
    }
}

fn publisher(listener: TcpListener) -> mpsc::UnboundedSender<Frames> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Frames>();
    let subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<Frames>>>> = Arc::default();

    let accepted = subscribers.clone();
    tokio::spawn(async move {
        loop {
            let (stream, addr) = accept_with_backoff("iopub", || listener.accept()).await;
            tracing::debug!("iopub subscriber connected from {addr}");
            let (_, write) = stream.into_split();
            let (tx, rx) = mpsc::unbounded_channel();
            if let Ok(mut subscribers) = accepted.lock() {
                subscribers.push(tx);
            }
            tokio::spawn(drain_to(write, rx));
        }
    });
    tokio::spawn(async move {
        while let Some(frames) = rx.recv().await {
            if let Ok(mut subscribers) = subscribers.lock() {
                subscribers.retain(|s| s.send(frames.clone()).is_ok());
            }
        }
    });
    tx
}

async fn echo(listener: TcpListener) {
    loop {
        let (mut stream, _) = accept_with_backoff("heartbeat", || listener.accept()).await;
        tokio::spawn(async move {
            while let Ok(Some(frames)) = read_frames(&mut stream).await {
                if write_frames(&mut stream, &frames).await.is_err() {
                    break;
                }
            }
        });
    }
}

/// Retries `accept` until it succeeds, pausing [`ACCEPT_BACKOFF`] after each
/// failure.
async fn accept_with_backoff<T, F, Fut>(channel: &str, mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(err) => {
                tracing::warn!("{channel} accept failed: {err}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn drain_to<W>(mut write: W, mut rx: mpsc::UnboundedReceiver<Frames>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frames) = rx.recv().await {
        if let Err(err) = write_frames(&mut write, &frames).await {
            tracing::debug!("peer write failed: {err}");
            break;
        }
    }
}

pub async fn write_frames<W>(write: &mut W, frames: &[Vec<u8>]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write.write_u32(length(frames.len())?).await?;
    for frame in frames {
        write.write_u32(length(frame.len())?).await?;
        write.write_all(frame).await?;
    }
    write.flush().await
}

/// Reads one message. `None` means the peer closed between messages.
pub async fn read_frames<R>(read: &mut R) -> io::Result<Option<Frames>>
where
    R: AsyncRead + Unpin,
{
    let count = match read.read_u32().await {
        Ok(count) => count as usize,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    };
    if count > MAX_FRAMES {
        return Err(invalid(format!("{count} frames exceeds the limit")));
    }
    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read.read_u32().await? as usize;
        if len > MAX_FRAME_LEN {
            return Err(invalid(format!("{len}-byte frame exceeds the limit")));
        }
        let mut frame = vec![0; len];
        read.read_exact(&mut frame).await?;
        frames.push(frame);
    }
    Ok(Some(frames))
}

fn is_router(channel: ChannelKind) -> bool {
    matches!(
        channel,
        ChannelKind::Shell | ChannelKind::Control | ChannelKind::Stdin
    )
}

fn length(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| invalid(format!("{len} does not fit a frame header")))
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

/// Frontend side of a TCP connection, used to talk to a bound kernel.
pub struct Client {
    stream: TcpStream,
}

impl Client {
    /// Connects with a fresh identity. Use [`Client::connect_as`] to share
    /// one identity across shell, control and stdin.
    pub async fn connect(info: &ConnectionInfo, channel: ChannelKind) -> Result<Self, JupyterError> {
        let identity = uuid::Uuid::new_v4().simple().to_string();
        Self::connect_as(info, channel, identity.as_bytes()).await
    }

    pub async fn connect_as(
        info: &ConnectionInfo,
        channel: ChannelKind,
        identity: &[u8],
    ) -> Result<Self, JupyterError> {
        let mut stream = TcpStream::connect(info.address(channel)).await?;
        if is_router(channel) {
            write_frames(&mut stream, &[identity.to_vec()]).await?;
        }
        Ok(Self { stream })
    }

    pub async fn send(&mut self, frames: &[Vec<u8>]) -> Result<(), JupyterError> {
        Ok(write_frames(&mut self.stream, frames).await?)
    }

    pub async fn recv(&mut self) -> Result<Frames, JupyterError> {
        read_frames(&mut self.stream)
            .await?
            .ok_or(JupyterError::ChannelClosed("tcp"))
    }
}
