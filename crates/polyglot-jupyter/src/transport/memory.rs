//! In-process channels: a frontend and a kernel joined by queues.

use tokio::sync::mpsc;

use super::{Duplex, KernelSockets};
use crate::message::Frames;

/// The frontend side of an in-memory connection. Frames pass through
/// untouched, so identities put in front of a request come back on its
/// replies.
pub struct FrontendSockets {
    pub shell: Duplex,
    pub control: Duplex,
    pub stdin: Duplex,
    pub iopub: mpsc::UnboundedReceiver<Frames>,
}

pub fn pair() -> (KernelSockets, FrontendSockets) {
    let (kernel_shell, frontend_shell) = duplex();
    let (kernel_control, frontend_control) = duplex();
    let (kernel_stdin, frontend_stdin) = duplex();
    let (iopub_tx, iopub_rx) = mpsc::unbounded_channel();
    (
        KernelSockets {
            shell: kernel_shell,
            control: kernel_control,
            stdin: kernel_stdin,
            iopub: iopub_tx,
        },
        FrontendSockets {
            shell: frontend_shell,
            control: frontend_control,
            stdin: frontend_stdin,
            iopub: iopub_rx,
        },
    )
}

fn duplex() -> (Duplex, Duplex) {
    let (to_kernel, from_frontend) = mpsc::unbounded_channel();
    let (to_frontend, from_kernel) = mpsc::unbounded_channel();
    (
        Duplex {
            outbound: to_frontend,
            inbound: from_frontend,
        },
        Duplex {
            outbound: to_kernel,
            inbound: from_kernel,
        },
    )
}
