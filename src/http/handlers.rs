use super::routes::REQUEST_ID_HEADER;
use super::state::AppState;
use crate::error::TranscribeError;
use crate::transcribe::types::parse_temperature;
use crate::transcribe::{Language, RequestContext, TranscriptionRequest, TranscriptionResponse};
use axum::{
    body::Bytes,
    extract::{multipart::Field, Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// SSE event name for load samples
pub const STATE_EVENT: &str = "engine_state_event";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for TranscribeError {
    fn into_response(self) -> Response {
        let status = match &self {
            // The client went away; there is nobody to report to.
            TranscribeError::Cancelled(_) => return StatusCode::NO_CONTENT.into_response(),
            TranscribeError::UnsupportedResponseFormat(_) => StatusCode::NOT_IMPLEMENTED,
            TranscribeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl IntoResponse for TranscriptionResponse {
    fn into_response(self) -> Response {
        match self {
            TranscriptionResponse::Json(transcription) => Json(transcription).into_response(),
            TranscriptionResponse::Text(text) => text.into_response(),
            TranscriptionResponse::VerboseJson(transcription) => {
                Json(transcription).into_response()
            }
        }
    }
}

// ============================================================================
// Form parsing
// ============================================================================

fn multipart_error(e: impl std::fmt::Display) -> TranscribeError {
    TranscribeError::Validation(format!("failed to read multipart body: {}", e))
}

async fn field_text(field: Field<'_>) -> Result<String, TranscribeError> {
    field.text().await.map_err(multipart_error)
}

/// Read and validate the transcription form.
///
/// Unknown fields are rejected. A missing `file` part yields an empty file.
async fn read_form(
    mut multipart: Multipart,
    default_language: Language,
) -> Result<TranscriptionRequest, TranscribeError> {
    let mut request = TranscriptionRequest::new(Bytes::new()).with_language(default_language);

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "file" => {
                request.content_type = field.content_type().map(str::to_string);
                request.file = field.bytes().await.map_err(multipart_error)?;
            }
            "language" => request.language = field_text(field).await?.trim().parse()?,
            "model" => request.model = Some(field_text(field).await?),
            "prompt" => request.prompt = Some(field_text(field).await?),
            "temperature" => request.temperature = parse_temperature(&field_text(field).await?)?,
            "response_format" => {
                request.response_format = field_text(field).await?.trim().parse()?
            }
            other => {
                return Err(TranscribeError::Validation(format!(
                    "unknown form field '{}'",
                    other
                )))
            }
        }
    }

    request.validate()?;
    Ok(request)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/audio/transcriptions
/// Transcribe an uploaded audio file
#[instrument(skip_all, fields(request_id = tracing::field::Empty))]
pub async fn create_transcription(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    tracing::Span::current().record("request_id", request_id.as_str());

    let request = match read_form(multipart, state.default_language).await {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    if request.file.is_empty() {
        info!("No audio in request {}, nothing to transcribe", request_id);
        return StatusCode::NO_CONTENT.into_response();
    }

    info!(
        "Transcription request {}: {} bytes, language={}, format={}",
        request_id,
        request.file.len(),
        request.language,
        request.response_format
    );

    // axum drops this future when the client disconnects; the guard then
    // cancels the transcription running in the spawned task.
    let cancel = CancellationToken::new();
    let _disconnect_guard = cancel.clone().drop_guard();

    let handler = Arc::clone(&state.transcriptions);
    let ctx = RequestContext::new(request_id).with_cancel(cancel);
    let task = tokio::spawn(async move { handler.invoke(request, ctx).await });

    match task.await {
        Ok(Ok(response)) => response.into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(e) => TranscribeError::Other(anyhow::anyhow!("transcription task failed: {}", e))
            .into_response(),
    }
}

/// GET /state
/// Stream engine load samples, current sample first
pub async fn engine_state(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    info!(
        "Engine state subscriber connected ({} already listening)",
        state.monitor.subscriber_count()
    );

    let events = state
        .monitor
        .subscribe()
        .map(|sample| Event::default().event(STATE_EVENT).json_data(sample));

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
