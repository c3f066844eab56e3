//! Vertex AI backend.
//!
//! The alternate backend speaks an OpenAI-compatible dialect, so requests
//! pass through with the model id rewritten and responses need no
//! translation. Its stream framing differs from the direct API: records are
//! JSON objects terminated by a `{"done":true}` sentinel, which the stream
//! translator drops.

use config::VertexConfig;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;
use crate::messages::openai::{ChatCompletionRequest, ChatCompletionResponse};
use crate::provider::http_client::build_http_client;
use crate::provider::{ChatCompletionStream, upstream_error};
use crate::server::catalog::ResolvedModel;
use crate::streaming::frame_stream;

const DEFAULT_VERTEX_API_URL: &str = "https://aiplatform.googleapis.com/v1/openai";

pub(crate) struct VertexProvider {
    client: Client,
    base_url: String,
    access_token: Option<SecretString>,
}

impl VertexProvider {
    pub fn new(config: &VertexConfig, timeout: std::time::Duration) -> crate::Result<Self> {
        let client = build_http_client(timeout).map_err(|e| {
            log::error!("Failed to create HTTP client for the Vertex backend: {e}");
            LlmError::InternalError(None)
        })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_VERTEX_API_URL.to_string());

        Ok(Self {
            client,
            base_url,
            access_token: config.access_token.clone(),
        })
    }

    fn bearer_token(&self) -> crate::Result<&SecretString> {
        self.access_token.as_ref().ok_or_else(|| {
            LlmError::InternalError(Some(
                "Vertex backend is enabled but no access token is configured".to_string(),
            ))
        })
    }

    async fn post_chat(
        &self,
        request: &ChatCompletionRequest,
        route: &ResolvedModel,
        stream: bool,
    ) -> crate::Result<reqwest::Response> {
        let token = self.bearer_token()?;

        // Pass the request through with the virtual markers stripped.
        let mut upstream_request = request.clone();
        upstream_request.model = route.upstream_model.clone();
        upstream_request.stream = Some(stream);

        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.expose_secret())
            .json(&upstream_request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(format!("Failed to send request to Vertex: {e}")))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Vertex API error ({status}): {error_text}");

            return Err(upstream_error(status, error_text));
        }

        Ok(response)
    }

    pub async fn chat_completion(
        &self,
        request: &ChatCompletionRequest,
        route: &ResolvedModel,
    ) -> crate::Result<ChatCompletionResponse> {
        let response = self.post_chat(request, route, false).await?;

        let mut completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            log::error!("Failed to parse Vertex completion response: {e}");
            LlmError::InternalError(None)
        })?;

        // Echo the virtual id the client asked for.
        completion.model = route.requested.clone();

        Ok(completion)
    }

    pub async fn chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
        route: &ResolvedModel,
    ) -> crate::Result<ChatCompletionStream> {
        let response = self.post_chat(request, route, true).await?;

        let frames = frame_stream(response.bytes_stream(), route.requested.clone());

        Ok(Box::pin(frames))
    }
}
