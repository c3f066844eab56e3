//! Keep-alive heartbeats for long-running upstream calls.
//!
//! When a client with safety filtering disabled asks for a streamed
//! response, the gateway answers with SSE headers immediately and emits
//! heartbeat chunks while the upstream call is still pending. The real
//! completion arrives later as a single chunk.
//!
//! All frames flow through one mpsc channel, so a heartbeat can never
//! interleave inside another frame; the `[DONE]` terminator is appended by
//! the handler once the channel closes.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ErrorResponse, LlmError};
use crate::messages::openai::{
    ChatChoiceDelta, ChatCompletionChunk, ChatCompletionResponse, ChatRole, MessageDelta, ObjectType,
    StreamingToolCall,
};
use crate::provider::google::output::unix_millis;

const FRAME_BUFFER: usize = 32;

/// Id carried by every heartbeat chunk.
const HEARTBEAT_ID: &str = "keepalive";

/// Single writer for one keep-alive SSE response.
///
/// Dropping the pump stops the heartbeat task and closes the channel, which
/// ends the response stream. Every operation is safe to call after the
/// client disconnected; sends into a closed channel are silently ignored.
pub(crate) struct KeepAlivePump {
    frames: mpsc::Sender<String>,
    heartbeat: Option<JoinHandle<()>>,
    interval: Duration,
    model: String,
    finished: bool,
}

impl KeepAlivePump {
    /// Creates a pump and the receiving end of its frame channel.
    pub fn new(model: String, interval: Duration) -> (Self, mpsc::Receiver<String>) {
        let (frames, receiver) = mpsc::channel(FRAME_BUFFER);

        let pump = Self {
            frames,
            heartbeat: None,
            interval,
            model,
            finished: false,
        };

        (pump, receiver)
    }

    /// Starts the heartbeat task. The first heartbeat is emitted
    /// immediately, then one per interval.
    pub fn start_heartbeat(&mut self) {
        if self.heartbeat.is_some() || self.finished {
            return;
        }

        let frames = self.frames.clone();
        let interval = self.interval;
        let model = self.model.clone();

        self.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let Ok(frame) = sonic_rs::to_string(&heartbeat_chunk(&model)) else {
                    continue;
                };

                if frames.send(frame).await.is_err() {
                    // Client is gone; stop ticking.
                    return;
                }
            }
        }));
    }

    /// Stops the heartbeat task. Idempotent.
    pub fn stop_heartbeat(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
    }

    /// Delivers the completed upstream response as a single chunk and ends
    /// the stream.
    pub async fn send_final_response(&mut self, completion: &ChatCompletionResponse) {
        if self.finished {
            return;
        }

        self.stop_heartbeat();
        self.finished = true;

        let chunk = final_chunk(completion);

        match sonic_rs::to_string(&chunk) {
            Ok(frame) => {
                if self.frames.send(frame).await.is_err() {
                    log::debug!("client disconnected before the final keep-alive frame");
                }
            }
            Err(error) => log::error!("failed to serialize final keep-alive chunk: {error}"),
        }
    }

    /// Delivers a terminal error frame and ends the stream.
    pub async fn send_error(&mut self, error: &LlmError) {
        if self.finished {
            return;
        }

        self.stop_heartbeat();
        self.finished = true;

        log::error!("keep-alive upstream call failed: {error}");

        let response = ErrorResponse::from(error);

        match sonic_rs::to_string(&response) {
            Ok(frame) => {
                let _ = self.frames.send(frame).await;
            }
            Err(serialize_error) => {
                log::error!("failed to serialize keep-alive error frame: {serialize_error}");
            }
        }
    }
}

impl Drop for KeepAlivePump {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

fn heartbeat_chunk(model: &str) -> ChatCompletionChunk {
    let now_ms = unix_millis();

    ChatCompletionChunk {
        id: HEARTBEAT_ID.to_string(),
        object: ObjectType::ChatCompletionChunk,
        created: now_ms / 1000,
        model: model.to_string(),
        system_fingerprint: None,
        choices: vec![ChatChoiceDelta {
            index: 0,
            delta: MessageDelta::default(),
            finish_reason: None,
        }],
        usage: None,
    }
}

/// Repackages a full completion as one streamed chunk.
fn final_chunk(completion: &ChatCompletionResponse) -> ChatCompletionChunk {
    let choice = completion.choices.first();

    let delta = MessageDelta {
        role: Some(ChatRole::Assistant),
        content: choice.and_then(|choice| choice.message.content.clone()),
        tool_calls: choice
            .and_then(|choice| choice.message.tool_calls.as_ref())
            .map(|calls| {
                calls
                    .iter()
                    .enumerate()
                    .map(|(index, call)| StreamingToolCall {
                        index: index as u32,
                        id: call.id.clone(),
                        tool_type: call.tool_type,
                        function: call.function.clone(),
                    })
                    .collect()
            }),
    };

    ChatCompletionChunk {
        id: completion.id.clone(),
        object: ObjectType::ChatCompletionChunk,
        created: completion.created,
        model: completion.model.clone(),
        system_fingerprint: None,
        choices: vec![ChatChoiceDelta {
            index: 0,
            delta,
            finish_reason: choice.and_then(|choice| choice.finish_reason),
        }],
        usage: Some(completion.usage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::google::output::error_completion;
    use serde_json::Value;

    fn drain(receiver: &mut mpsc::Receiver<String>) -> Vec<Value> {
        let mut frames = Vec::new();

        while let Ok(frame) = receiver.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }

        frames
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_every_interval_with_one_immediately() {
        let (mut pump, mut receiver) =
            KeepAlivePump::new("gemini-2.5-pro".to_string(), Duration::from_secs(3));

        pump.start_heartbeat();

        // After 6.5 seconds of upstream silence the client has seen the
        // immediate heartbeat plus the ones at 3s and 6s.
        tokio::time::sleep(Duration::from_millis(6500)).await;
        pump.stop_heartbeat();

        let frames = drain(&mut receiver);
        assert!(frames.len() >= 2, "expected at least 2 heartbeats, got {}", frames.len());

        for frame in &frames {
            assert_eq!(frame["id"], "keepalive");
            assert_eq!(frame["choices"][0]["delta"], serde_json::json!({}));
            assert_eq!(frame["choices"][0]["finish_reason"], Value::Null);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn final_response_stops_heartbeat_and_closes() {
        let (mut pump, mut receiver) =
            KeepAlivePump::new("gemini-2.5-pro".to_string(), Duration::from_secs(3));

        pump.start_heartbeat();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut completion = error_completion("gemini-2.5-pro", "placeholder");
        completion.choices[0].message.content = Some("ok".to_string());
        completion.choices[0].finish_reason = Some(crate::messages::openai::FinishReason::Stop);

        pump.send_final_response(&completion).await;
        drop(pump);

        let frames = drain(&mut receiver);
        let last = frames.last().unwrap();

        assert_eq!(last["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(last["choices"][0]["delta"]["content"], "ok");
        assert_eq!(last["choices"][0]["finish_reason"], "stop");

        // Channel is closed; the handler appends [DONE] after this.
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn error_frame_is_terminal_and_finalization_is_idempotent() {
        let (mut pump, mut receiver) =
            KeepAlivePump::new("gemini-2.5-pro".to_string(), Duration::from_secs(3));

        pump.start_heartbeat();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let error = LlmError::UpstreamError {
            status: 500,
            message: "boom".to_string(),
        };

        pump.send_error(&error).await;
        pump.send_error(&error).await;

        let completion = error_completion("gemini-2.5-pro", "late");
        pump.send_final_response(&completion).await;
        drop(pump);

        let frames = drain(&mut receiver);

        // One heartbeat, then exactly one error frame, nothing after.
        let error_frames: Vec<_> = frames.iter().filter(|frame| frame.get("error").is_some()).collect();
        assert_eq!(error_frames.len(), 1);
        assert_eq!(error_frames[0]["error"]["type"], "upstream_error");
        assert_eq!(frames.last().unwrap()["error"]["type"], "upstream_error");
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_client_is_tolerated() {
        let (mut pump, receiver) =
            KeepAlivePump::new("gemini-2.5-pro".to_string(), Duration::from_secs(3));

        drop(receiver);

        pump.start_heartbeat();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let completion = error_completion("gemini-2.5-pro", "nobody listening");
        pump.send_final_response(&completion).await;
        pump.stop_heartbeat();
    }
}
