pub mod jupyter;
pub mod stdio;

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, shutting down...");
        }
        _ = async {
            if let Some(ref mut t) = term { t.recv().await; }
        } => {
            tracing::info!("SIGTERM received, shutting down...");
        }
    }
}
