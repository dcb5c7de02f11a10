//! Kernels, composite routing, and the command/event model shared by every
//! polyglot host.

pub mod builtins;
pub mod cancellation;
pub mod command;
pub mod composite;
pub mod context;
pub mod directive;
pub mod envelope;
pub mod error;
pub mod event;
pub mod kernel;
pub mod kernel_info;
pub mod routing_slip;
pub mod scheduler;
pub mod submission;
pub mod uri;

pub use builtins::{ValueKernel, use_who};
pub use cancellation::CancellationToken;
pub use command::{CommandKind, KernelCommand, PUBLISH_INTERNAL_EVENTS, SubmissionType};
pub use composite::{CompositeKernel, WeakCompositeKernel};
pub use context::{InputProvider, KernelInvocationContext};
pub use directive::{Directive, DirectiveInvocation, DirectiveRegistry};
pub use envelope::{
    CommandEnvelope, CommandOrEvent, EventEnvelope, serialize_command, serialize_event,
};
pub use error::KernelError;
pub use event::{
    CommandOutcome, CompletionItem, Diagnostic, DiagnosticSeverity, EventKind, FormattedValue,
    KernelCommandResult, KernelEvent, LinePosition, ValueInfo,
};
pub use kernel::{Kernel, KernelHandler};
pub use kernel_info::KernelInfo;
pub use routing_slip::RoutingSlip;
pub use scheduler::SerialScheduler;
pub use uri::KernelUri;
