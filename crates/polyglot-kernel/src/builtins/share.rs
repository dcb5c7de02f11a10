//! `#!share --from <kernel> <name> [--as <name>] [--mime-type <type>]`

use clap::Arg;

use crate::command::CommandKind;
use crate::directive::{Directive, DirectiveInvocation};
use crate::error::KernelError;
use crate::event::{CommandOutcome, EventKind, KernelCommandResult};

pub fn share_directive() -> Directive {
    Directive::new(
        "#!share",
        "Get a value from one kernel and create a copy in another.",
        share,
    )
    .arg(
        Arg::new("from")
            .long("from")
            .required(true)
            .help("The name of the kernel to get the value from"),
    )
    .arg(
        Arg::new("name")
            .required(true)
            .help("The name of the value to share"),
    )
    .arg(
        Arg::new("as")
            .long("as")
            .help("The name to give the value in the importing kernel"),
    )
    .arg(
        Arg::new("mime-type")
            .long("mime-type")
            .help("Share the value as a string formatted to this MIME type"),
    )
}

async fn share(inv: DirectiveInvocation) -> Result<(), KernelError> {
    let arg = |id: &str| inv.matches.get_one::<String>(id).cloned();
    let from = arg("from").ok_or_else(|| KernelError::Directive("missing --from".into()))?;
    let name = arg("name").ok_or_else(|| KernelError::Directive("missing value name".into()))?;
    let as_name = arg("as").unwrap_or_else(|| name.clone());
    let mime_type = arg("mime-type");
    let destination = inv
        .kernel_name
        .clone()
        .ok_or_else(|| KernelError::Directive("#!share needs a destination kernel".into()))?;

    let ctx = &inv.context;
    let request = ctx
        .child_command(CommandKind::RequestValue {
            name: name.clone(),
            mime_type,
        })
        .target(from);
    let fetched = ctx.send_child(request).await;
    ensure_succeeded(&fetched)?;
    let value = fetched
        .find(|kind| match kind {
            EventKind::ValueProduced {
                formatted_value, ..
            } => Some(formatted_value.clone()),
            _ => None,
        })
        .ok_or(KernelError::ValueNotFound(name))?;

    let send = ctx
        .child_command(CommandKind::SendValue {
            name: as_name,
            formatted_value: value,
        })
        .target(destination);
    ensure_succeeded(&ctx.send_child(send).await)
}

fn ensure_succeeded(result: &KernelCommandResult) -> Result<(), KernelError> {
    match result.outcome() {
        CommandOutcome::Succeeded => Ok(()),
        CommandOutcome::Failed(message) => Err(KernelError::Handler(message)),
        CommandOutcome::Cancelled => Err(KernelError::Cancelled),
    }
}
