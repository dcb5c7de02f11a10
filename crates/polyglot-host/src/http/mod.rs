pub mod api;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use polyglot_kernel::CompositeKernel;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::HttpServerConfig;
use crate::error::HostError;

#[derive(Clone)]
pub struct HttpState {
    pub composite: CompositeKernel,
    next_id: Arc<AtomicU64>,
}

impl HttpState {
    pub fn new(composite: CompositeKernel) -> Self {
        Self {
            composite,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_request_id(&self) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("http-{id}")
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new().nest("/api", api::router()).with_state(state)
}

/// Binds the configured port range and serves the API until `shutdown_tx`
/// fires. Returns `None` when the server is disabled; a bind failure is an
/// error so startup can abort.
pub async fn spawn_http_server(
    config: &HttpServerConfig,
    composite: CompositeKernel,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<Option<JoinHandle<()>>, HostError> {
    if !config.enabled() {
        return Ok(None);
    }
    let listener = config.bind().await?;
    let app = router(HttpState::new(composite));
    Ok(Some(tokio::spawn(async move {
        if let Err(err) = serve(listener, app, shutdown_tx).await {
            tracing::error!("http server error: {err}");
        }
    })))
}

async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), String> {
    let addr = listener
        .local_addr()
        .map_err(|e| format!("local addr: {e}"))?;
    tracing::info!("HTTP server listening on http://{}", addr);
    let mut shutdown_rx = shutdown_tx.subscribe();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(|e| format!("serve {addr}: {e}"))
}
