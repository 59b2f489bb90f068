//! OpenAI-compatible HTTP surface
//!
//! - POST /v1/audio/transcriptions - Transcribe an uploaded audio file
//! - GET /state - Server-sent stream of engine load samples
//! - GET /health - Liveness probe

mod handlers;
mod routes;
mod state;

pub use handlers::{ErrorResponse, STATE_EVENT};
pub use routes::{create_router, REQUEST_ID_HEADER};
pub use state::{AppState, TranscriptionService, DEFAULT_MAX_BODY_BYTES};
