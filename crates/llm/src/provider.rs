//! Upstream backends.
//!
//! Two fixed backends exist: the direct Gemini API dispatched under the
//! managed key pool, and Vertex AI under service-account credentials. The
//! catalog decides which one a request goes to.

pub(crate) mod google;
pub(crate) mod http_client;
pub(crate) mod keys;
pub(crate) mod vertex;

use std::pin::Pin;

use futures::Stream;

use crate::error::LlmError;

/// Ordered stream of SSE frame payloads (JSON text, without the `data: `
/// framing).
pub(crate) type ChatCompletionStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Maps a non-2xx upstream reply to a gateway error carrying the upstream
/// status.
pub(crate) fn upstream_error(status: reqwest::StatusCode, message: String) -> LlmError {
    LlmError::UpstreamError {
        status: status.as_u16(),
        message,
    }
}
