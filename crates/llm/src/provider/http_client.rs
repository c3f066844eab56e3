use std::time::Duration;

use reqwest::Client;

/// Shared HTTP client settings for all upstream calls.
///
/// The pool idle timeout stays short so DNS record changes on the upstream
/// are picked up without restarting the gateway.
pub(crate) fn build_http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .build()
}
