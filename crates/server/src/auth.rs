//! Static API-key authentication for gateway clients.
//!
//! Keys come from `[server.auth.clients]`; a match inserts the resolved
//! [`ClientIdentity`] as a request extension for the LLM handlers.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body;
use config::{AuthConfig, ClientIdentity};
use http::{HeaderValue, Request, Response, StatusCode, header};
use secrecy::ExposeSecret;
use serde::Serialize;
use tower::Layer;

/// Header carrying the client key when the Authorization header is not
/// used.
const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub(crate) struct AuthLayer(Arc<AuthConfig>);

impl AuthLayer {
    pub fn new(config: AuthConfig) -> Self {
        Self(Arc::new(config))
    }
}

impl<Service> Layer<Service> for AuthLayer
where
    Service: Send + Clone,
{
    type Service = AuthService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        AuthService {
            next,
            config: self.0.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct AuthService<Service> {
    next: Service,
    config: Arc<AuthConfig>,
}

impl<Service> tower::Service<Request<Body>> for AuthService<Service>
where
    Service: tower::Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
{
    type Response = Service::Response;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let identity = presented_key(&request).and_then(|key| resolve_identity(&self.config, key));

        match identity {
            Some(identity) => {
                log::debug!("authenticated client '{}'", identity.name);
                request.extensions_mut().insert(identity);

                // Move the service that was polled ready; keep the clone.
                let clone = self.next.clone();
                let mut next = std::mem::replace(&mut self.next, clone);

                Box::pin(async move { next.call(request).await })
            }
            None => Box::pin(async move { Ok(unauthorized_response()) }),
        }
    }
}

/// Reads the presented key from `Authorization: Bearer` or `x-api-key`.
fn presented_key<B>(request: &Request<B>) -> Option<&str> {
    if let Some(value) = request.headers().get(header::AUTHORIZATION) {
        let value = value.to_str().ok()?;
        return value.strip_prefix("Bearer ").map(str::trim);
    }

    request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
}

fn resolve_identity(config: &AuthConfig, presented: &str) -> Option<ClientIdentity> {
    config
        .clients
        .iter()
        .find(|(_, client)| client.api_key.expose_secret() == presented)
        .map(|(name, client)| ClientIdentity {
            name: name.clone(),
            safety: client.safety,
        })
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: AuthErrorDetails,
}

#[derive(Serialize)]
struct AuthErrorDetails {
    message: &'static str,
    r#type: &'static str,
    code: u16,
}

fn unauthorized_response() -> Response<Body> {
    let body = AuthErrorBody {
        error: AuthErrorDetails {
            message: "Missing or invalid API key",
            r#type: "authentication_error",
            code: 401,
        },
    };

    let json = sonic_rs::to_string(&body)
        .unwrap_or_else(|_| r#"{"error":{"message":"Unauthorized","type":"authentication_error","code":401}}"#.to_string());

    let mut response = Response::new(Body::from(json));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn auth_config() -> AuthConfig {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            auth: AuthConfig,
        }

        let wrapper: Wrapper = toml::from_str(indoc! {r#"
            [auth.clients.filtered]
            api_key = "sk-filtered"

            [auth.clients.unfiltered]
            api_key = "sk-unfiltered"
            safety = false
        "#})
        .unwrap();

        wrapper.auth
    }

    fn request_with_header(name: &str, value: &str) -> Request<()> {
        Request::builder().header(name, value).body(()).unwrap()
    }

    #[test]
    fn bearer_and_api_key_headers_are_accepted() {
        let bearer = request_with_header("authorization", "Bearer sk-filtered");
        assert_eq!(presented_key(&bearer), Some("sk-filtered"));

        let api_key = request_with_header("x-api-key", "sk-filtered");
        assert_eq!(presented_key(&api_key), Some("sk-filtered"));

        let basic = request_with_header("authorization", "Basic dXNlcg==");
        assert_eq!(presented_key(&basic), None);
    }

    #[test]
    fn identity_carries_the_safety_flag() {
        let config = auth_config();

        let filtered = resolve_identity(&config, "sk-filtered").unwrap();
        assert_eq!(filtered.name, "filtered");
        assert!(filtered.safety);

        let unfiltered = resolve_identity(&config, "sk-unfiltered").unwrap();
        assert_eq!(unfiltered.name, "unfiltered");
        assert!(!unfiltered.safety);

        assert!(resolve_identity(&config, "sk-unknown").is_none());
    }
}
