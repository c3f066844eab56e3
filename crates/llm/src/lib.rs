//! OpenAI-compatible gateway core.
//!
//! Exposes the client-facing routes and wires them to the translation
//! pipeline: catalog dispatch, request/response translation, the streaming
//! engine and the keep-alive pump.

use std::{convert::Infallible, time::Duration};

use axum::{
    Json, Router,
    extract::{Extension, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response, Sse, sse::Event},
    routing::{get, post},
};
use axum_serde::Sonic;
use futures::{StreamExt, stream};

mod embedding;
mod error;
mod keepalive;
mod messages;
mod provider;
mod request;
mod server;
mod streaming;

pub use error::{LlmError, LlmResult as Result};

use error::ErrorResponse;
use keepalive::KeepAlivePump;
use messages::openai::{ChatCompletionRequest, EmbeddingsRequest};
use provider::keys::SelectedKey;
use request::RequestContext;
use server::LlmServer;

/// Response header naming the upstream key a request was dispatched under.
const SELECTED_KEY_HEADER: &str = "x-selected-key-id";

/// Creates the axum router for the OpenAI-compatible endpoints.
pub fn router(config: &config::Config) -> anyhow::Result<Router> {
    let server = LlmServer::new(config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize LLM server: {e}"))?;

    Ok(Router::new()
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/embedded", post(embeddings))
        .with_state(server))
}

/// Handle chat completion requests.
///
/// Three response shapes exist: plain JSON, translated SSE, and keep-alive
/// SSE where heartbeats cover for a pending non-streaming upstream call.
async fn chat_completions(
    State(server): State<LlmServer>,
    client_identity: Option<Extension<config::ClientIdentity>>,
    Sonic(request): Sonic<ChatCompletionRequest>,
) -> Result<Response> {
    log::debug!(
        "chat completions for model {} with {} messages, streaming: {}",
        request.model,
        request.messages.len(),
        request.stream.unwrap_or(false)
    );

    let context = request::extract_context(client_identity.map(|ext| ext.0));

    if !request.stream.unwrap_or(false) {
        let (completion, key) = server.completions(&request, &context).await?;

        let mut response = Json(completion).into_response();
        apply_key_header(&mut response, key.as_ref());

        return Ok(response);
    }

    if let Some(interval) = server.keepalive_interval(&context) {
        // Reject unknown models before committing to a 200 SSE response.
        server.validate_model(&request.model)?;

        log::debug!("engaging keep-alive pump for model {}", request.model);
        return Ok(keepalive_response(server, request, context, interval));
    }

    let (frames, key) = server.completions_stream(&request, &context).await?;

    let events = frames.map(|result| {
        let event = match result {
            Ok(frame) => Event::default().data(frame),
            Err(error) => {
                log::error!("stream error: {error}");
                Event::default().data(error_frame(&error))
            }
        };

        Ok::<_, Infallible>(event)
    });

    let with_done = events.chain(stream::once(async { Ok(Event::default().data("[DONE]")) }));

    let mut response = Sse::new(with_done).into_response();
    apply_sse_headers(&mut response);
    apply_key_header(&mut response, key.as_ref());

    Ok(response)
}

/// Responds with SSE immediately and heartbeats until the upstream call
/// resolves; the completion then arrives as a single chunk.
fn keepalive_response(
    server: LlmServer,
    request: ChatCompletionRequest,
    context: RequestContext,
    interval: Duration,
) -> Response {
    let (mut pump, receiver) = KeepAlivePump::new(request.model.clone(), interval);
    pump.start_heartbeat();

    tokio::spawn(async move {
        match server.completions(&request, &context).await {
            Ok((completion, _key)) => pump.send_final_response(&completion).await,
            Err(error) => pump.send_error(&error).await,
        }
        // Dropping the pump closes the channel, which terminates the SSE
        // body below with its [DONE] frame.
    });

    let frames = stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|frame| (frame, receiver))
    });

    let events = frames
        .map(|frame| Ok::<_, Infallible>(Event::default().data(frame)))
        .chain(stream::once(async { Ok(Event::default().data("[DONE]")) }));

    let mut response = Sse::new(events).into_response();
    apply_sse_headers(&mut response);

    response
}

/// Handle list models requests.
async fn list_models(State(server): State<LlmServer>) -> Result<impl IntoResponse> {
    let response = server.models();

    log::debug!("returning {} models", response.data.len());
    Ok(Json(response))
}

/// Handle embedding requests.
async fn embeddings(
    State(server): State<LlmServer>,
    Sonic(request): Sonic<EmbeddingsRequest>,
) -> Result<Response> {
    let (embeddings, key) = server.embeddings(&request).await?;

    let mut response = Json(embeddings).into_response();
    apply_key_header(&mut response, key.as_ref());

    Ok(response)
}

fn error_frame(error: &LlmError) -> String {
    sonic_rs::to_string(&ErrorResponse::from(error)).unwrap_or_else(|serialize_error| {
        log::error!("failed to serialize stream error frame: {serialize_error}");
        r#"{"error":{"message":"Internal server error","type":"internal_error","code":500}}"#.to_string()
    })
}

fn apply_sse_headers(response: &mut Response) {
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
}

fn apply_key_header(response: &mut Response, key: Option<&SelectedKey>) {
    if let Some(key) = key
        && let Ok(value) = HeaderValue::from_str(&key.id)
    {
        response.headers_mut().insert(SELECTED_KEY_HEADER, value);
    }
}
