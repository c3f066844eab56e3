//! Incremental JSON-object extraction and SSE translation for streamed
//! upstream bodies.
//!
//! The direct upstream streams either a newline-less concatenation of JSON
//! objects or a JSON array of them, so the body cannot be handed to a
//! line-oriented parser. The extractor walks the bytes once, tracking brace
//! depth and string state, and yields every complete top-level object in
//! input order.

use std::collections::VecDeque;

use futures::{Stream, StreamExt, stream};
use serde_json::{Value, json};

use crate::error::LlmError;
use crate::provider::google::output::{GoogleGenerateResponse, to_chat_chunk};

/// Incremental extractor of complete top-level JSON objects from a chunked
/// byte stream.
#[derive(Debug, Default)]
pub(crate) struct JsonStreamExtractor {
    buffer: Vec<u8>,
    /// Scan position; everything before it has been consumed.
    pos: usize,
    /// Current `{}` nesting depth.
    depth: usize,
    /// Byte offset of the object currently being assembled.
    start: Option<usize>,
    in_string: bool,
    escape: bool,
}

impl JsonStreamExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of bytes, returning every object completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut objects = Vec::new();

        while self.pos < self.buffer.len() {
            let byte = self.buffer[self.pos];

            if self.in_string {
                if self.escape {
                    self.escape = false;
                } else if byte == b'\\' {
                    self.escape = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }

                self.pos += 1;
                continue;
            }

            match byte {
                b'"' if self.depth > 0 => self.in_string = true,
                b'{' => {
                    if self.depth == 0 {
                        self.start = Some(self.pos);
                    }
                    self.depth += 1;
                }
                b'}' if self.depth > 0 => {
                    self.depth -= 1;

                    if self.depth == 0 {
                        let start = self.start.take().unwrap_or(self.pos);
                        let object = String::from_utf8_lossy(&self.buffer[start..=self.pos]).into_owned();
                        objects.push(object);

                        // Nothing before the next object matters; drop the
                        // consumed prefix to keep the buffer bounded.
                        self.buffer.drain(..=self.pos);
                        self.pos = 0;
                        continue;
                    }
                }
                // Array framing and separators between objects.
                _ => {}
            }

            self.pos += 1;
        }

        objects
    }

    /// Signals end of stream. Any incomplete residue is discarded.
    pub fn finish(&mut self) {
        let residue = &self.buffer[..];

        let only_framing = residue
            .iter()
            .all(|byte| byte.is_ascii_whitespace() || matches!(byte, b'[' | b']' | b','));

        if !only_framing {
            log::debug!(
                "discarding {} bytes of incomplete stream residue",
                residue.len()
            );
        }

        self.buffer.clear();
        self.pos = 0;
        self.depth = 0;
        self.start = None;
        self.in_string = false;
        self.escape = false;
    }
}

/// Translates one extracted JSON value into zero or more SSE frame payloads.
///
/// Frames are the JSON text of OpenAI `chat.completion.chunk` objects, or a
/// verbatim passthrough for payloads that are already client-shaped.
pub(crate) fn translate_value(value: &Value, model: &str, frames: &mut Vec<String>) {
    // Arrays from the array-framed upstream variant.
    if let Some(elements) = value.as_array() {
        for element in elements {
            translate_value(element, model, frames);
        }
        return;
    }

    let Some(obj) = value.as_object() else {
        log::debug!("dropping non-object stream payload");
        return;
    };

    // Terminator sentinel from the alternate backend's framing; the outer
    // layer emits the [DONE] frame.
    if obj.get("done").and_then(Value::as_bool) == Some(true) {
        return;
    }

    if obj.contains_key("candidates") {
        match serde_json::from_value::<GoogleGenerateResponse>(value.clone()) {
            Ok(response) => {
                if let Some(chunk) = to_chat_chunk(&response, model) {
                    match sonic_rs::to_string(&chunk) {
                        Ok(frame) => frames.push(frame),
                        Err(error) => log::error!("failed to serialize stream chunk: {error}"),
                    }
                }
            }
            Err(error) => {
                log::warn!("failed to parse upstream stream record: {error}");
            }
        }
        return;
    }

    // A bare text fragment; wrap it into a candidate and go again.
    if obj.len() == 1 && obj.contains_key("text") {
        let wrapped = json!({
            "candidates": [{
                "content": { "role": "model", "parts": [ value ] }
            }]
        });
        translate_value(&wrapped, model, frames);
        return;
    }

    // Alternate-backend payloads are already OpenAI-shaped.
    match sonic_rs::to_string(value) {
        Ok(frame) => frames.push(frame),
        Err(error) => log::error!("failed to serialize passthrough payload: {error}"),
    }
}

fn translate_object(raw: &str, model: &str, frames: &mut Vec<String>) {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => translate_value(&value, model, frames),
        Err(error) => {
            log::warn!("dropping unparseable stream object: {error}");
        }
    }
}

struct PipelineState<S> {
    upstream: std::pin::Pin<Box<S>>,
    extractor: JsonStreamExtractor,
    model: String,
    pending: VecDeque<String>,
    done: bool,
}

/// Runs an upstream byte stream through the extractor and translator,
/// producing an ordered stream of SSE frame payloads.
///
/// Frames are emitted in upstream order; an upstream read error terminates
/// the stream after a single `Err` item.
pub(crate) fn frame_stream<S, E>(upstream: S, model: String) -> impl Stream<Item = Result<String, LlmError>>
where
    S: Stream<Item = Result<bytes::Bytes, E>>,
    E: std::fmt::Display,
{
    let state = PipelineState {
        upstream: Box::pin(upstream),
        extractor: JsonStreamExtractor::new(),
        model,
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((Ok(frame), state));
            }

            if state.done {
                return None;
            }

            match state.upstream.next().await {
                Some(Ok(bytes)) => {
                    let mut frames = Vec::new();

                    for object in state.extractor.feed(&bytes) {
                        translate_object(&object, &state.model, &mut frames);
                    }

                    state.pending.extend(frames);
                }
                Some(Err(error)) => {
                    state.done = true;
                    return Some((
                        Err(LlmError::ConnectionError(format!(
                            "upstream body read failed: {error}"
                        ))),
                        state,
                    ));
                }
                None => {
                    state.done = true;
                    state.extractor.finish();
                }
            }
        }
    })
}
