use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use polyglot_kernel::{
    CommandEnvelope, CommandKind, CommandOutcome, EventEnvelope, EventKind, KernelCommand,
    KernelError, KernelInfo,
};
use serde::Deserialize;

use crate::http::HttpState;

pub fn router() -> Router<HttpState> {
    Router::new()
        .route("/kernels", get(kernels))
        .route("/commands", post(commands_post))
        .route("/variables/{kernel}/{name}", get(variable_get))
}

#[derive(Debug)]
enum ApiError {
    Invalid(String),
    NotFound(String),
    Failed(String),
}

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::Invalid(msg.into())
    }
}

impl From<KernelError> for ApiError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::KernelNotFound(_) | KernelError::ValueNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            KernelError::InvalidUri(_) | KernelError::InvalidToken(_) | KernelError::Json(_) => {
                ApiError::Invalid(err.to_string())
            }
            other => ApiError::Failed(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Invalid(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Failed(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "command_failed", msg),
        };
        let body = serde_json::json!({ "code": code, "message": message });
        (status, Json(body)).into_response()
    }
}

async fn kernels(State(state): State<HttpState>) -> Json<Vec<KernelInfo>> {
    let mut infos = vec![state.composite.info()];
    infos.extend(state.composite.kernels().iter().map(|k| k.info()));
    Json(infos)
}

/// Runs one command and returns every event it produced, terminal included.
async fn commands_post(
    State(state): State<HttpState>,
    Json(envelope): Json<CommandEnvelope>,
) -> Result<Json<Vec<EventEnvelope>>, ApiError> {
    let command = KernelCommand::try_from(envelope)?;
    tracing::debug!(
        "{} runs {} {}",
        state.next_request_id(),
        command.kind().name(),
        command.token()
    );
    let result = state.composite.send(command).await;
    Ok(Json(result.events.iter().map(EventEnvelope::from).collect()))
}

#[derive(Debug, Deserialize)]
struct VariableQuery {
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
}

async fn variable_get(
    State(state): State<HttpState>,
    Path((kernel, name)): Path<(String, String)>,
    Query(query): Query<VariableQuery>,
) -> Result<Response, ApiError> {
    if state.composite.find(&kernel).is_none() {
        return Err(ApiError::NotFound(format!("kernel '{kernel}' not found")));
    }
    if name.trim().is_empty() {
        return Err(ApiError::bad_request("empty value name"));
    }
    let command = KernelCommand::new(CommandKind::RequestValue {
        name: name.clone(),
        mime_type: query.mime_type,
    })
    .target(kernel);
    let result = state.composite.send(command).await;
    if let CommandOutcome::Failed(message) = result.outcome() {
        return Err(ApiError::NotFound(message));
    }
    let value = result
        .find(|kind| match kind {
            EventKind::ValueProduced {
                formatted_value, ..
            } => Some(formatted_value.clone()),
            _ => None,
        })
        .ok_or_else(|| ApiError::NotFound(format!("value '{name}' not found")))?;
    Ok((
        [(axum::http::header::CONTENT_TYPE, value.mime_type)],
        value.value,
    )
        .into_response())
}
