//! Prism configuration structures to map the prism.toml configuration.

#![deny(missing_docs)]

mod client;
mod llm;
mod loader;
mod server;

use std::path::Path;

pub use client::ClientIdentity;
pub use llm::{
    FeatureConfig, GoogleConfig, LlmConfig, ModelSettings, VertexConfig,
};
use serde::Deserialize;
pub use server::{AuthConfig, ClientConfig, ServerConfig};

/// Main configuration structure for the prism gateway.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// Upstream backend and model configuration settings.
    pub llm: LlmConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates that the configuration can serve at least one backend.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;

    use crate::Config;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_debug_snapshot!(&config, @r#"
        Config {
            server: ServerConfig {
                listen_address: None,
                auth: AuthConfig {
                    clients: {},
                },
            },
            llm: LlmConfig {
                google: GoogleConfig {
                    api_keys: [],
                    base_url: None,
                    timeout: 60s,
                },
                vertex: VertexConfig {
                    enabled: false,
                    base_url: None,
                    access_token: None,
                    models: [],
                },
                models: {},
                features: FeatureConfig {
                    web_search: false,
                    keepalive: true,
                    keepalive_interval: 3s,
                },
            },
        }
        "#);
    }

    #[test]
    fn full_configuration() {
        let config_str = indoc::indoc! {r#"
            [server]
            listen_address = "127.0.0.1:8000"

            [server.auth.clients.worker]
            api_key = "sk-test"
            safety = false

            [llm.google]
            api_keys = ["AIza-one", "AIza-two"]
            timeout = "90s"

            [llm.vertex]
            enabled = true
            access_token = "ya29.token"
            models = ["gemini-2.5-pro"]

            [llm.models."gemini-2.5-flash-preview-05-20"]
            category = "flash"
            daily_quota = 1000
            individual_quota = 50

            [llm.features]
            web_search = true
            keepalive_interval = "5s"
        "#};

        let config: Config = toml::from_str(config_str).unwrap();

        assert_eq!(
            config.server.listen_address,
            Some("127.0.0.1:8000".parse().unwrap())
        );
        assert_eq!(config.llm.google.api_keys.len(), 2);
        assert!(config.llm.vertex.enabled);
        assert!(config.llm.features.web_search);
        assert_eq!(config.llm.features.keepalive_interval.as_secs(), 5);

        let model = &config.llm.models["gemini-2.5-flash-preview-05-20"];
        assert_eq!(model.category.as_deref(), Some("flash"));
        assert_eq!(model.daily_quota, Some(1000));
        assert!(model.system_instruction);

        let client = &config.server.auth.clients["worker"];
        assert!(!client.safety);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = toml::from_str::<Config>("[llm]\nfrobnicate = true\n");
        assert!(result.is_err());
    }
}
