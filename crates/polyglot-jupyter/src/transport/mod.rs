//! Message-passing endpoints behind the four Jupyter channels.
//!
//! The adapter only sees queues of multipart frames. A transport decides how
//! those frames travel: [`tcp`] serves real frontends, [`memory`] wires a
//! frontend and a kernel together inside one process.

use tokio::sync::mpsc;

use crate::message::Frames;

pub mod memory;
pub mod tcp;

/// One request/reply endpoint. Inbound frames start with the sender's
/// identity; outbound frames must start with the identity of the peer they
/// are for.
pub struct Duplex {
    pub outbound: mpsc::UnboundedSender<Frames>,
    pub inbound: mpsc::UnboundedReceiver<Frames>,
}

/// The kernel side of a connection.
pub struct KernelSockets {
    pub shell: Duplex,
    pub control: Duplex,
    pub stdin: Duplex,
    /// Frames sent here reach every subscriber. The first frame is the
    /// topic.
    pub iopub: mpsc::UnboundedSender<Frames>,
}
