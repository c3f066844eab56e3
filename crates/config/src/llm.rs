//! Upstream backend and model configuration.

use std::time::Duration;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;

/// Configuration for the upstream backends and the model catalog.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Direct Gemini API backend settings.
    pub google: GoogleConfig,
    /// Vertex AI backend settings.
    pub vertex: VertexConfig,
    /// Models exposed by the gateway, keyed by model id.
    ///
    /// The catalog synthesizes virtual variants (`-search`, `:non-thinking`,
    /// `[v]`-prefixed) on top of these entries.
    pub models: IndexMap<String, ModelSettings>,
    /// Feature toggles.
    pub features: FeatureConfig,
}

impl LlmConfig {
    /// Whether any backend is usable with this configuration.
    pub fn has_backends(&self) -> bool {
        !self.google.api_keys.is_empty() || self.vertex.enabled
    }
}

/// Settings for the direct Gemini API backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GoogleConfig {
    /// Pool of Gemini API keys requests are dispatched under.
    pub api_keys: Vec<SecretString>,
    /// Override for the Gemini API base URL.
    pub base_url: Option<String>,
    /// Upper bound on a single upstream call.
    #[serde(
        deserialize_with = "duration_str::deserialize_duration",
        default = "default_timeout"
    )]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            base_url: None,
            timeout: default_timeout(),
        }
    }
}

/// Settings for the Vertex AI backend.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VertexConfig {
    /// Whether the Vertex backend is enabled at all.
    pub enabled: bool,
    /// Override for the Vertex endpoint base URL.
    pub base_url: Option<String>,
    /// Service-account access token used as the bearer credential.
    ///
    /// Token acquisition and refresh happen outside the gateway; the
    /// expanded `{{ env.* }}` value is used as-is.
    pub access_token: Option<SecretString>,
    /// Models served through Vertex, exposed with the `[v]` prefix.
    pub models: Vec<String>,
}

/// Per-model settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelSettings {
    /// Free-form model category used for quota grouping.
    pub category: Option<String>,
    /// Total requests allowed per day across all clients.
    pub daily_quota: Option<u64>,
    /// Requests allowed per day for a single client.
    pub individual_quota: Option<u64>,
    /// Whether the model family supports the dedicated system instruction.
    ///
    /// When false, system messages are folded into the conversation as
    /// user turns.
    pub system_instruction: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            category: None,
            daily_quota: None,
            individual_quota: None,
            system_instruction: true,
        }
    }
}

/// Gateway feature toggles.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureConfig {
    /// Synthesize `-search` model variants backed by the upstream search tool.
    pub web_search: bool,
    /// Allow keep-alive streaming for clients with safety filtering off.
    pub keepalive: bool,
    /// Interval between keep-alive heartbeat frames.
    #[serde(deserialize_with = "duration_str::deserialize_duration")]
    pub keepalive_interval: Duration,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            web_search: false,
            keepalive: true,
            keepalive_interval: Duration::from_secs(3),
        }
    }
}
