use crate::builtins::escape_html;
use crate::command::CommandKind;
use crate::directive::{Directive, DirectiveInvocation};
use crate::error::KernelError;
use crate::event::{CommandOutcome, EventKind, FormattedValue, ValueInfo};
use crate::kernel::Kernel;

/// Registers `#!who` and `#!whos` on a kernel that answers
/// `RequestValueInfos`.
pub fn use_who(kernel: &Kernel) -> Result<(), KernelError> {
    kernel.add_directive(Directive::new(
        "#!who",
        "Display the names of the current top-level variables.",
        |inv| who(inv, false),
    ))?;
    kernel.add_directive(Directive::new(
        "#!whos",
        "Display the names of the current top-level variables and their values.",
        |inv| who(inv, true),
    ))
}

async fn who(inv: DirectiveInvocation, detailed: bool) -> Result<(), KernelError> {
    let ctx = inv.context;
    let result = ctx
        .send_child(ctx.child_command(CommandKind::RequestValueInfos))
        .await;
    match result.outcome() {
        CommandOutcome::Succeeded => {}
        CommandOutcome::Failed(message) => return Err(KernelError::Handler(message)),
        CommandOutcome::Cancelled => return Err(KernelError::Cancelled),
    }
    let infos = result
        .find(|kind| match kind {
            EventKind::ValueInfosProduced { value_infos } => Some(value_infos.clone()),
            _ => None,
        })
        .unwrap_or_default();

    let html = if detailed {
        render_table(&infos)
    } else {
        render_names(&infos)
    };
    ctx.publish(EventKind::DisplayedValueProduced {
        formatted_values: vec![FormattedValue::html(html)],
        value_id: None,
    });
    Ok(())
}

fn render_names(infos: &[ValueInfo]) -> String {
    let names: Vec<String> = infos
        .iter()
        .map(|i| format!("<code>{}</code>", escape_html(&i.name)))
        .collect();
    format!("<div>Variables: {}</div>", names.join("&emsp;"))
}

fn render_table(infos: &[ValueInfo]) -> String {
    let mut html = String::from(
        "<table><thead><tr><td>Variable</td><td>Type</td><td>Value</td></tr></thead><tbody>",
    );
    for info in infos {
        html.push_str(&format!(
            "<tr><td><code>{}</code></td><td>{}</td><td>{}</td></tr>",
            escape_html(&info.name),
            escape_html(&info.type_name),
            escape_html(&info.formatted_value.value)
        ));
    }
    html.push_str("</tbody></table>");
    html
}
