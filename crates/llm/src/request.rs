use config::ClientIdentity;

/// Runtime context for one request.
///
/// Carries the identity resolved by the auth layer. Everything else a
/// request needs is owned by the request itself.
#[derive(Debug, Clone, Default)]
pub(crate) struct RequestContext {
    /// Authenticated client, when the auth layer resolved one.
    pub client: Option<ClientIdentity>,
}

impl RequestContext {
    /// Whether upstream safety filtering stays on for this caller.
    /// Unidentified callers always keep it on.
    pub fn safety(&self) -> bool {
        self.client.as_ref().map(|client| client.safety).unwrap_or(true)
    }
}

pub(crate) fn extract_context(client: Option<ClientIdentity>) -> RequestContext {
    RequestContext { client }
}
