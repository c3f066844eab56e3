use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Gateway errors with appropriate HTTP status codes.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Requested model is not part of the synthesized catalog.
    #[error("Model '{0}' is not available")]
    ModelNotAvailable(String),

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication failed (missing or invalid API key).
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Upstream backend returned an error.
    #[error("Upstream error ({status}): {message}")]
    UpstreamError { status: u16, message: String },

    /// Network or connection error towards the upstream.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Internal server error.
    /// If Some(message), it came from the upstream and can be shown.
    /// If None, it is a gateway-internal error and must not leak details.
    #[error("Internal server error")]
    InternalError(Option<String>),
}

impl LlmError {
    /// Get the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            // Unknown models are a client mistake against the synthesized
            // catalog, not a missing resource.
            Self::ModelNotAvailable(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Self::ConnectionError(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type string for the response.
    pub fn error_type(&self) -> &str {
        match self {
            Self::ModelNotAvailable(_) | Self::InvalidRequest(_) => "invalid_request_error",
            Self::AuthenticationFailed(_) => "authentication_error",
            Self::UpstreamError { .. } | Self::ConnectionError(_) => "upstream_error",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::InternalError(Some(upstream_msg)) => upstream_msg.clone(),
            Self::InternalError(None) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Error response format compatible with the OpenAI API.
#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorDetails {
    pub message: String,
    pub r#type: String,
    pub code: u16,
}

impl From<&LlmError> for ErrorResponse {
    fn from(error: &LlmError) -> Self {
        ErrorResponse {
            error: ErrorDetails {
                message: error.client_message(),
                r#type: error.error_type().to_string(),
                code: error.status_code().as_u16(),
            },
        }
    }
}

impl IntoResponse for LlmError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = ErrorResponse::from(&self);

        (status, Json(error_response)).into_response()
    }
}
