//! HTTP server configuration settings.

use std::net::SocketAddr;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;

/// HTTP server configuration settings.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
    /// Client authentication configuration.
    pub auth: AuthConfig,
}

/// API-key authentication configuration.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Named API clients allowed to call the gateway.
    pub clients: IndexMap<String, ClientConfig>,
}

/// Configuration for a single API client.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// The API key the client presents in the Authorization header.
    pub api_key: SecretString,
    /// Whether upstream safety filtering stays enabled for this client.
    ///
    /// Disabling safety also makes the client eligible for keep-alive
    /// streaming responses.
    #[serde(default = "default_true")]
    pub safety: bool,
}

fn default_true() -> bool {
    true
}
