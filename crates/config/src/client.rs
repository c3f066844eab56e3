//! Identity of an authenticated gateway client.

/// Resolved identity of the client that authenticated a request.
///
/// Inserted as a request extension by the server's auth layer and consumed
/// by the LLM handlers to pick per-client behavior (safety filtering,
/// keep-alive eligibility).
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    /// Name of the configured client entry the API key matched.
    pub name: String,
    /// Whether upstream safety filtering stays enabled for this client.
    pub safety: bool,
}
