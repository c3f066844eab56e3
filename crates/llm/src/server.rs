pub(crate) mod catalog;

use std::{sync::Arc, time::Duration};

use config::LlmConfig;

use crate::{
    embedding,
    error::LlmError,
    messages::openai::{ChatCompletionRequest, ChatCompletionResponse, EmbeddingsRequest, EmbeddingsResponse, ModelsResponse},
    provider::{ChatCompletionStream, google::GoogleProvider, keys::SelectedKey, vertex::VertexProvider},
    request::RequestContext,
    server::catalog::{Backend, ResolvedModel},
};

/// The LLM gateway core shared by all request handlers.
#[derive(Clone)]
pub(crate) struct LlmServer {
    shared: Arc<LlmServerInner>,
}

pub(crate) struct LlmServerInner {
    /// Resolved configuration snapshot used for catalog synthesis.
    config: LlmConfig,
    /// Direct Gemini backend under the key pool.
    google: GoogleProvider,
    /// Vertex backend, present when enabled.
    vertex: Option<VertexProvider>,
}

impl LlmServer {
    pub fn new(config: &config::Config) -> crate::Result<Self> {
        let google = GoogleProvider::new(&config.llm.google)?;

        let vertex = if config.llm.vertex.enabled {
            Some(VertexProvider::new(&config.llm.vertex, config.llm.google.timeout)?)
        } else {
            None
        };

        Ok(Self {
            shared: Arc::new(LlmServerInner {
                config: config.llm.clone(),
                google,
                vertex,
            }),
        })
    }

    /// The synthesized model listing, recomputed per call.
    pub fn models(&self) -> ModelsResponse {
        catalog::models_response(&self.shared.config)
    }

    /// Heartbeat interval when this caller qualifies for keep-alive
    /// streaming: the feature is on and the caller runs unfiltered.
    pub fn keepalive_interval(&self, context: &RequestContext) -> Option<Duration> {
        (self.shared.config.features.keepalive && !context.safety())
            .then_some(self.shared.config.features.keepalive_interval)
    }

    fn resolve(&self, requested: &str) -> crate::Result<ResolvedModel> {
        catalog::resolve(&self.shared.config, requested)
    }

    /// Validates a model id against the synthesized catalog without
    /// dispatching. Used before committing to an SSE response.
    pub fn validate_model(&self, requested: &str) -> crate::Result<()> {
        self.resolve(requested).map(|_| ())
    }

    fn vertex(&self) -> crate::Result<&VertexProvider> {
        self.shared.vertex.as_ref().ok_or_else(|| {
            log::error!("request routed to Vertex but the backend is not initialized");
            LlmError::InternalError(None)
        })
    }

    /// Single-shot chat completion.
    pub async fn completions(
        &self,
        request: &ChatCompletionRequest,
        context: &RequestContext,
    ) -> crate::Result<(ChatCompletionResponse, Option<SelectedKey>)> {
        let route = self.resolve(&request.model)?;

        match route.backend {
            Backend::Direct => {
                let (completion, key) = self.shared.google.chat_completion(request, &route, context).await?;
                Ok((completion, Some(key)))
            }
            Backend::Vertex => {
                let completion = self.vertex()?.chat_completion(request, &route).await?;
                Ok((completion, None))
            }
        }
    }

    /// Streamed chat completion.
    pub async fn completions_stream(
        &self,
        request: &ChatCompletionRequest,
        context: &RequestContext,
    ) -> crate::Result<(ChatCompletionStream, Option<SelectedKey>)> {
        let route = self.resolve(&request.model)?;

        match route.backend {
            Backend::Direct => {
                let (stream, key) = self
                    .shared
                    .google
                    .chat_completion_stream(request, &route, context)
                    .await?;
                Ok((stream, Some(key)))
            }
            Backend::Vertex => {
                let stream = self.vertex()?.chat_completion_stream(request, &route).await?;
                Ok((stream, None))
            }
        }
    }

    /// Embedding request. Short inputs never reach the upstream.
    pub async fn embeddings(
        &self,
        request: &EmbeddingsRequest,
    ) -> crate::Result<(EmbeddingsResponse, Option<SelectedKey>)> {
        let Ok(texts) = embedding::validate_input(&request.input) else {
            return Ok((embedding::short_input_response(&request.model), None));
        };

        let model = request.model.strip_prefix("models/").unwrap_or(&request.model);

        let (upstream, key) = self.shared.google.embeddings(model, &texts).await?;

        Ok((embedding::to_embeddings_response(&upstream, &request.model), Some(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::ClientIdentity;
    use indoc::indoc;

    fn server(toml_str: &str) -> LlmServer {
        let config: config::Config = toml::from_str(toml_str).unwrap();
        LlmServer::new(&config).unwrap()
    }

    fn context(safety: bool) -> RequestContext {
        RequestContext {
            client: Some(ClientIdentity {
                name: "test".to_string(),
                safety,
            }),
        }
    }

    #[test]
    fn keepalive_requires_feature_and_unfiltered_caller() {
        let server = server(indoc! {r#"
            [llm.google]
            api_keys = ["AIza-test"]

            [llm.models."gemini-2.5-pro"]
        "#});

        assert!(server.keepalive_interval(&context(true)).is_none());
        assert_eq!(
            server.keepalive_interval(&context(false)),
            Some(Duration::from_secs(3))
        );

        // Anonymous contexts keep safety on.
        assert!(server.keepalive_interval(&RequestContext::default()).is_none());
    }

    #[test]
    fn keepalive_can_be_disabled() {
        let server = server(indoc! {r#"
            [llm.google]
            api_keys = ["AIza-test"]

            [llm.models."gemini-2.5-pro"]

            [llm.features]
            keepalive = false
        "#});

        assert!(server.keepalive_interval(&context(false)).is_none());
    }

    #[test]
    fn models_listing_uses_the_catalog() {
        let server = server(indoc! {r#"
            [llm.google]
            api_keys = ["AIza-test"]

            [llm.models."gemini-2.5-flash-preview"]
        "#});

        let models = server.models();
        let ids: Vec<_> = models.data.iter().map(|model| model.id.as_str()).collect();

        assert_eq!(
            ids,
            vec!["gemini-2.5-flash-preview", "gemini-2.5-flash-preview:non-thinking"]
        );
    }
}
