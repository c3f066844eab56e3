//! Google Gemini wire types and their translation back to the OpenAI
//! dialect.
//!
//! The request/response content shapes are shared with the request builder
//! in `input.rs`; translation of upstream completions (single-shot and
//! streamed chunks) lives here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messages::openai::{
    ChatChoice, ChatChoiceDelta, ChatCompletionChunk, ChatCompletionResponse, ChatRole, FinishReason, FunctionCall,
    MessageDelta, ObjectType, ResponseMessage, StreamingToolCall, ToolCall, ToolType, Usage,
};

/// Placeholder content for candidates the upstream blocked on safety.
pub(crate) const SAFETY_PLACEHOLDER: &str = "[Response blocked by content safety filters]";

/// Conversation role in the Gemini dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoogleRole {
    User,
    Model,
    System,
}

/// One message of a Gemini conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleContent {
    pub role: GoogleRole,
    pub parts: Vec<GooglePart>,
}

/// A single content part. Exactly one field is populated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GooglePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<GoogleInlineData>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<GoogleFunctionCall>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<GoogleFunctionResponse>,
}

impl GooglePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

/// Base64-encoded binary content with its mime type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleInlineData {
    pub mime_type: String,
    pub data: String,
}

/// A function call produced by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleFunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// A function result sent back to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleFunctionResponse {
    pub name: String,
    pub response: Value,
}

/// Response body of `generateContent` / one record of
/// `streamGenerateContent`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleGenerateResponse {
    #[serde(default)]
    pub candidates: Vec<GoogleCandidate>,
    pub prompt_feedback: Option<GooglePromptFeedback>,
    pub usage_metadata: Option<GoogleUsageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleCandidate {
    pub content: Option<GoogleContent>,
    pub finish_reason: Option<String>,
    pub index: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GooglePromptFeedback {
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleUsageMetadata {
    pub prompt_token_count: Option<u32>,
    pub candidates_token_count: Option<u32>,
    pub total_token_count: Option<u32>,
}

impl GoogleUsageMetadata {
    fn to_usage(self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_token_count.unwrap_or(0),
            completion_tokens: self.candidates_token_count.unwrap_or(0),
            total_tokens: self.total_token_count.unwrap_or(0),
        }
    }
}

/// Maps an upstream finish reason into the OpenAI dialect.
///
/// The mapping is total: unknown reasons, `FINISH_REASON_UNSPECIFIED` and
/// `OTHER` map to `None`.
pub(crate) fn map_finish_reason(reason: &str) -> Option<FinishReason> {
    match reason {
        "STOP" => Some(FinishReason::Stop),
        "MAX_TOKENS" => Some(FinishReason::Length),
        "SAFETY" | "RECITATION" => Some(FinishReason::ContentFilter),
        "TOOL_CALLS" => Some(FinishReason::ToolCalls),
        _ => None,
    }
}

pub(crate) fn unix_millis() -> i64 {
    jiff::Timestamp::now().as_millisecond()
}

fn random_suffix() -> String {
    use rand::Rng;

    rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect()
}

pub(crate) fn response_id(now_ms: i64) -> String {
    format!("chatcmpl-{now_ms}-{}", random_suffix())
}

fn tool_call_id(name: &str, now_ms: i64, index: usize) -> String {
    format!("call_{name}_{now_ms}_{index}")
}

fn extract_tool_calls(content: &GoogleContent, now_ms: i64) -> Vec<ToolCall> {
    content
        .parts
        .iter()
        .filter_map(|part| part.function_call.as_ref())
        .enumerate()
        .map(|(index, call)| {
            let arguments = if call.args.is_null() {
                "{}".to_string()
            } else {
                serde_json::to_string(&call.args).unwrap_or_else(|_| "{}".to_string())
            };

            ToolCall {
                id: tool_call_id(&call.name, now_ms, index),
                tool_type: ToolType::Function,
                function: FunctionCall {
                    name: call.name.clone(),
                    arguments,
                },
            }
        })
        .collect()
}

fn concatenated_text(content: &GoogleContent) -> String {
    content
        .parts
        .iter()
        .filter_map(|part| part.text.as_deref())
        .collect::<Vec<_>>()
        .concat()
}

/// Translates an upstream completion into an OpenAI `chat.completion`.
///
/// Empty candidate lists become error-shaped completions; a safety block is
/// reported as `content_filter` with placeholder content.
pub(crate) fn to_chat_completion(response: &GoogleGenerateResponse, model: &str) -> ChatCompletionResponse {
    let now_ms = unix_millis();

    let usage = response.usage_metadata.map(GoogleUsageMetadata::to_usage).unwrap_or_default();

    let Some(candidate) = response.candidates.first() else {
        let blocked = response
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref());

        let (finish_reason, content) = match blocked {
            Some(reason) => {
                log::warn!("upstream blocked the prompt: {reason}");
                (FinishReason::ContentFilter, SAFETY_PLACEHOLDER.to_string())
            }
            None => (
                FinishReason::Error,
                "Upstream returned no candidates".to_string(),
            ),
        };

        return completion_shell(model, now_ms, content, finish_reason, usage);
    };

    let (mut content, tool_calls, finish_reason) = match candidate.content.as_ref() {
        Some(candidate_content) => {
            let text = concatenated_text(candidate_content);
            let tool_calls = extract_tool_calls(candidate_content, now_ms);
            let mapped = candidate.finish_reason.as_deref().and_then(map_finish_reason);

            let finish_reason = if !tool_calls.is_empty()
                && !matches!(mapped, Some(FinishReason::Stop) | Some(FinishReason::Length))
            {
                Some(FinishReason::ToolCalls)
            } else {
                mapped
            };

            (text, tool_calls, finish_reason)
        }
        None => (
            String::new(),
            Vec::new(),
            candidate.finish_reason.as_deref().and_then(map_finish_reason),
        ),
    };

    if content.is_empty() && candidate.finish_reason.as_deref() == Some("SAFETY") {
        content = SAFETY_PLACEHOLDER.to_string();
    }

    ChatCompletionResponse {
        id: response_id(now_ms),
        object: ObjectType::ChatCompletion,
        created: now_ms / 1000,
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ResponseMessage {
                role: ChatRole::Assistant,
                content: Some(content),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason,
        }],
        usage,
        system_fingerprint: None,
    }
}

/// A well-formed completion used when translation itself fails.
pub(crate) fn error_completion(model: &str, message: impl Into<String>) -> ChatCompletionResponse {
    let now_ms = unix_millis();
    completion_shell(model, now_ms, message.into(), FinishReason::Error, Usage::default())
}

fn completion_shell(
    model: &str,
    now_ms: i64,
    content: String,
    finish_reason: FinishReason,
    usage: Usage,
) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: response_id(now_ms),
        object: ObjectType::ChatCompletion,
        created: now_ms / 1000,
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ResponseMessage {
                role: ChatRole::Assistant,
                content: Some(content),
                tool_calls: None,
            },
            finish_reason: Some(finish_reason),
        }],
        usage,
        system_fingerprint: None,
    }
}

/// Translates one streamed upstream record into an OpenAI
/// `chat.completion.chunk`.
///
/// Returns `None` when the record carries nothing a client could act on.
pub(crate) fn to_chat_chunk(response: &GoogleGenerateResponse, model: &str) -> Option<ChatCompletionChunk> {
    let candidate = response.candidates.first()?;
    let now_ms = unix_millis();

    let mut delta = MessageDelta::default();

    if let Some(content) = candidate.content.as_ref() {
        let text = concatenated_text(content);

        if !text.is_empty() {
            delta.content = Some(text);
        }

        let tool_calls: Vec<StreamingToolCall> = extract_tool_calls(content, now_ms)
            .into_iter()
            .enumerate()
            .map(|(index, call)| StreamingToolCall {
                index: index as u32,
                id: call.id,
                tool_type: call.tool_type,
                function: call.function,
            })
            .collect();

        if !tool_calls.is_empty() {
            delta.tool_calls = Some(tool_calls);
        }
    }

    if !delta.is_empty() {
        delta.role = Some(ChatRole::Assistant);
    }

    let mapped = candidate.finish_reason.as_deref().and_then(map_finish_reason);

    let finish_reason = if delta.tool_calls.is_some()
        && !matches!(mapped, Some(FinishReason::Stop) | Some(FinishReason::Length))
    {
        Some(FinishReason::ToolCalls)
    } else {
        mapped
    };

    if delta.is_empty() && finish_reason.is_none() {
        return None;
    }

    Some(ChatCompletionChunk {
        id: response_id(now_ms),
        object: ObjectType::ChatCompletionChunk,
        created: now_ms / 1000,
        model: model.to_string(),
        system_fingerprint: None,
        choices: vec![ChatChoiceDelta {
            index: 0,
            delta,
            finish_reason,
        }],
        usage: None,
    })
}
