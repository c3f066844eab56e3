pub(crate) mod input;
pub(crate) mod output;
pub(crate) mod schema;

use config::GoogleConfig;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde_json::{Value, json};

use self::input::{GoogleGenerateRequest, TranslateOptions, build_request};
use self::output::{GoogleGenerateResponse, to_chat_completion};

use crate::error::LlmError;
use crate::messages::openai::{ChatCompletionRequest, ChatCompletionResponse};
use crate::provider::http_client::build_http_client;
use crate::provider::keys::{KeyPool, SelectedKey};
use crate::provider::{ChatCompletionStream, upstream_error};
use crate::request::RequestContext;
use crate::server::catalog::ResolvedModel;
use crate::streaming::frame_stream;

const DEFAULT_GOOGLE_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// The direct Gemini API backend, dispatched under the managed key pool.
pub(crate) struct GoogleProvider {
    client: Client,
    base_url: String,
    keys: KeyPool,
}

impl GoogleProvider {
    pub fn new(config: &GoogleConfig) -> crate::Result<Self> {
        let client = build_http_client(config.timeout).map_err(|e| {
            log::error!("Failed to create HTTP client for the Gemini backend: {e}");
            LlmError::InternalError(None)
        })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_GOOGLE_API_URL.to_string());

        Ok(Self {
            client,
            base_url,
            keys: KeyPool::new(config.api_keys.clone()),
        })
    }

    fn translate_options(route: &ResolvedModel, context: &RequestContext) -> TranslateOptions {
        TranslateOptions {
            system_instruction: route.system_instruction,
            safety: context.safety(),
            thinking_budget: route.thinking_budget,
            web_search: route.web_search,
        }
    }

    async fn post_generate(
        &self,
        verb: &str,
        model: &str,
        key: &SelectedKey,
        google_request: &GoogleGenerateRequest,
    ) -> crate::Result<reqwest::Response> {
        let url = format!(
            "{}/models/{}:{verb}?key={}",
            self.base_url,
            model,
            key.secret.expose_secret()
        );

        let body = sonic_rs::to_vec(google_request).map_err(|e| {
            log::error!("Failed to serialize Gemini request: {e}");
            LlmError::InternalError(None)
        })?;

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(format!("Failed to send request to Gemini: {e}")))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Gemini API error ({status}) under {}: {error_text}", key.id);

            return Err(upstream_error(status, error_text));
        }

        Ok(response)
    }

    /// Single-shot completion.
    pub async fn chat_completion(
        &self,
        request: &ChatCompletionRequest,
        route: &ResolvedModel,
        context: &RequestContext,
    ) -> crate::Result<(ChatCompletionResponse, SelectedKey)> {
        let key = self.keys.select()?;
        let google_request = build_request(request, &Self::translate_options(route, context));

        let response = self
            .post_generate("generateContent", &route.upstream_model, &key, &google_request)
            .await?;

        let response_text = response.text().await.map_err(|e| {
            log::error!("Failed to read Gemini response body: {e}");
            LlmError::InternalError(None)
        })?;

        let google_response: GoogleGenerateResponse = sonic_rs::from_str(&response_text).map_err(|e| {
            log::error!("Failed to parse Gemini completion response: {e}");
            log::debug!("Unparseable response body: {response_text}");
            LlmError::InternalError(None)
        })?;

        Ok((to_chat_completion(&google_response, &route.requested), key))
    }

    /// Streamed completion. The upstream body is re-framed by the JSON
    /// extractor; no SSE framing is assumed.
    pub async fn chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
        route: &ResolvedModel,
        context: &RequestContext,
    ) -> crate::Result<(ChatCompletionStream, SelectedKey)> {
        let key = self.keys.select()?;
        let google_request = build_request(request, &Self::translate_options(route, context));

        let response = self
            .post_generate("streamGenerateContent", &route.upstream_model, &key, &google_request)
            .await?;

        let frames = frame_stream(response.bytes_stream(), route.requested.clone());

        Ok((Box::pin(frames), key))
    }

    /// Batch embedding call. Returns the raw upstream body; shape mapping
    /// happens in the embedding translator.
    pub async fn embeddings(&self, model: &str, inputs: &[String]) -> crate::Result<(Value, SelectedKey)> {
        let key = self.keys.select()?;

        let url = format!(
            "{}/models/{}:batchEmbedContents?key={}",
            self.base_url,
            model,
            key.secret.expose_secret()
        );

        let body = json!({
            "requests": inputs
                .iter()
                .map(|text| {
                    json!({
                        "model": format!("models/{model}"),
                        "content": { "parts": [{ "text": text }] }
                    })
                })
                .collect::<Vec<_>>()
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(format!("Failed to send embedding request to Gemini: {e}")))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Gemini embedding API error ({status}): {error_text}");

            return Err(upstream_error(status, error_text));
        }

        let value = response.json::<Value>().await.map_err(|e| {
            log::error!("Failed to read Gemini embedding response: {e}");
            LlmError::InternalError(None)
        })?;

        Ok((value, key))
    }
}
