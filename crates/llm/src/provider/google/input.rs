//! Translation of OpenAI chat requests into the Gemini dialect.

use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};

use crate::messages::openai::{
    ChatCompletionRequest, ChatRole, ContentPart, MessageContent, ToolChoice, ToolChoiceMode,
};
use crate::provider::google::output::{
    GoogleContent, GoogleFunctionCall, GoogleFunctionResponse, GoogleInlineData, GooglePart, GoogleRole,
};
use crate::provider::google::schema;

/// RFC 2397 data URI with base64 payload.
static DATA_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^data:(.+?);base64,(.+)$").expect("data uri regex is valid"));

/// Characters allowed in upstream function declaration names.
static NAME_ALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.:-]").expect("name filter regex is valid"));

const MAX_FUNCTION_NAME_LEN: usize = 64;

/// Per-request knobs decided by the model catalog and the caller identity.
#[derive(Debug, Clone, Default)]
pub(crate) struct TranslateOptions {
    /// Whether the target model family accepts a dedicated system
    /// instruction.
    pub system_instruction: bool,
    /// Whether upstream safety filtering stays on for this caller.
    pub safety: bool,
    /// Thinking budget override (`:non-thinking` dispatch sets 0).
    pub thinking_budget: Option<i32>,
    /// Whether the upstream search tool is attached (`-search` dispatch).
    pub web_search: bool,
}

/// Request body for the Gemini GenerateContent API.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleGenerateRequest {
    pub contents: Vec<GoogleContent>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GoogleContent>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<GoogleTool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<GoogleToolConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GoogleGenerationConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_settings: Option<Vec<GoogleSafetySetting>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    pub candidate_count: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<GoogleThinkingConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleThinkingConfig {
    pub thinking_budget: i32,
}

/// One upstream tool entry: either function declarations or the built-in
/// search tool.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleTool {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_declarations: Option<Vec<GoogleFunctionDeclaration>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_search: Option<GoogleSearch>,
}

/// The built-in web search tool. Serializes to an empty object.
#[derive(Debug, Serialize)]
pub(crate) struct GoogleSearch {}

#[derive(Debug, Serialize)]
pub(crate) struct GoogleFunctionDeclaration {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum GoogleFunctionCallingMode {
    None,
    Auto,
    Any,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleToolConfig {
    pub function_calling_config: GoogleFunctionCallingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleFunctionCallingConfig {
    pub mode: GoogleFunctionCallingMode,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_function_names: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct GoogleSafetySetting {
    category: &'static str,
    threshold: &'static str,
}

/// Safety settings attached when the caller has filtering disabled.
fn block_none_safety_settings() -> Vec<GoogleSafetySetting> {
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ]
    .into_iter()
    .map(|category| GoogleSafetySetting {
        category,
        threshold: "BLOCK_NONE",
    })
    .collect()
}

/// Builds the upstream request from an OpenAI chat request.
///
/// Client-supplied `safety_settings` and `response_schema` never reach this
/// point; the typed request model drops them at the door.
pub(crate) fn build_request(request: &ChatCompletionRequest, options: &TranslateOptions) -> GoogleGenerateRequest {
    let mut contents = Vec::with_capacity(request.messages.len());
    let mut system_parts: Vec<GooglePart> = Vec::new();

    // Tool-call id to function name, threaded across turns of this request
    // only.
    let mut call_names: HashMap<&str, &str> = HashMap::new();

    for msg in &request.messages {
        match &msg.role {
            ChatRole::System => {
                let text = msg.content.as_ref().map(MessageContent::text).unwrap_or_default();

                if text.is_empty() {
                    continue;
                }

                if options.system_instruction && options.safety {
                    system_parts.push(GooglePart::text(text));
                } else {
                    // Families without systemInstruction support, and callers
                    // running unfiltered, get the prompt inline instead.
                    contents.push(GoogleContent {
                        role: GoogleRole::User,
                        parts: vec![GooglePart::text(text)],
                    });
                }
            }
            ChatRole::User => {
                let parts = msg.content.as_ref().map(content_parts).unwrap_or_default();

                if parts.is_empty() {
                    continue;
                }

                contents.push(GoogleContent {
                    role: GoogleRole::User,
                    parts,
                });
            }
            ChatRole::Assistant => {
                let mut parts = Vec::new();

                if let Some(tool_calls) = &msg.tool_calls {
                    for call in tool_calls {
                        call_names.insert(call.id.as_str(), call.function.name.as_str());

                        let args = parse_call_arguments(&call.function.arguments);

                        parts.push(GooglePart {
                            function_call: Some(GoogleFunctionCall {
                                name: call.function.name.clone(),
                                args,
                            }),
                            ..Default::default()
                        });
                    }
                }

                if let Some(content) = &msg.content {
                    let text = content.text();

                    if !text.is_empty() {
                        parts.push(GooglePart::text(text));
                    }
                }

                if parts.is_empty() {
                    continue;
                }

                contents.push(GoogleContent {
                    role: GoogleRole::Model,
                    parts,
                });
            }
            ChatRole::Tool => {
                let raw = msg.content.as_ref().map(MessageContent::text).unwrap_or_default();

                let name = msg
                    .name
                    .as_deref()
                    .or_else(|| msg.tool_call_id.as_deref().and_then(|id| call_names.get(id).copied()));

                let part = match name {
                    Some(name) => GooglePart {
                        function_response: Some(GoogleFunctionResponse {
                            name: name.to_string(),
                            response: coerce_tool_response(&raw),
                        }),
                        ..Default::default()
                    },
                    None => {
                        // Never drop a tool result; without a resolvable name
                        // it still reaches the model as plain text.
                        log::warn!("tool message has no resolvable function name, downgrading to text");
                        GooglePart::text(raw)
                    }
                };

                contents.push(GoogleContent {
                    role: GoogleRole::User,
                    parts: vec![part],
                });
            }
            ChatRole::Other(role) => {
                log::warn!("skipping message with unknown role: {role}");
            }
        }
    }

    let system_instruction = (!system_parts.is_empty()).then(|| GoogleContent {
        role: GoogleRole::System,
        parts: system_parts,
    });

    let mut tools = Vec::new();

    if let Some(declarations) = request.tools.as_ref().filter(|tools| !tools.is_empty()) {
        tools.push(GoogleTool {
            function_declarations: Some(function_declarations(declarations)),
            ..Default::default()
        });
    }

    if options.web_search {
        tools.push(GoogleTool {
            google_search: Some(GoogleSearch {}),
            ..Default::default()
        });
    }

    // Tool choice only means something when the client offered tools.
    let tool_config = request
        .tools
        .as_ref()
        .filter(|tools| !tools.is_empty())
        .and_then(|_| request.tool_choice.as_ref())
        .map(tool_config);

    let generation_config = GoogleGenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        max_output_tokens: request.max_tokens.map(|tokens| tokens as i32),
        stop_sequences: request.stop.clone(),
        candidate_count: 1,
        thinking_config: options
            .thinking_budget
            .map(|thinking_budget| GoogleThinkingConfig { thinking_budget }),
    };

    GoogleGenerateRequest {
        contents,
        system_instruction,
        tools: (!tools.is_empty()).then_some(tools),
        tool_config,
        generation_config: Some(generation_config),
        safety_settings: (!options.safety).then(block_none_safety_settings),
    }
}

/// Parses tool-call arguments, preserving unparseable input for debugging
/// instead of dropping the call.
fn parse_call_arguments(raw: &str) -> Value {
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(error) => {
            log::debug!("tool call arguments are not valid JSON: {error}");
            json!({ "_error": error.to_string(), "raw": raw })
        }
    }
}

/// The upstream requires `functionResponse.response` to be a JSON object.
fn coerce_tool_response(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if value.is_object() => value,
        Ok(value) => json!({ "content": value }),
        Err(_) => json!({ "content": raw }),
    }
}

fn content_parts(content: &MessageContent) -> Vec<GooglePart> {
    match content {
        MessageContent::Text(text) => {
            if text.is_empty() {
                Vec::new()
            } else {
                vec![GooglePart::text(text.clone())]
            }
        }
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(GooglePart::text(text.clone())),
                ContentPart::ImageUrl { image_url } => match DATA_URI.captures(&image_url.url) {
                    Some(captures) => Some(GooglePart {
                        inline_data: Some(GoogleInlineData {
                            mime_type: captures[1].to_string(),
                            data: captures[2].to_string(),
                        }),
                        ..Default::default()
                    }),
                    None => {
                        // The gateway never fetches client-supplied URLs.
                        log::warn!("skipping image part that is not a base64 data URI");
                        None
                    }
                },
            })
            .collect(),
    }
}

fn function_declarations(tools: &[crate::messages::openai::Tool]) -> Vec<GoogleFunctionDeclaration> {
    let mut seen: HashMap<String, usize> = HashMap::new();

    tools
        .iter()
        .map(|tool| {
            let name = dedupe_name(normalize_function_name(&tool.function.name), &mut seen);

            let parameters = tool.function.parameters.as_ref().map(|parameters| {
                let mut sanitized = schema::sanitize(parameters);

                if let Some(obj) = sanitized.as_object_mut()
                    && !obj.contains_key("type")
                {
                    obj.insert("type".to_string(), Value::String("object".to_string()));
                }

                sanitized
            });

            GoogleFunctionDeclaration {
                name,
                description: tool.function.description.clone(),
                parameters,
            }
        })
        .collect()
}

/// Restricts a declaration name to `[A-Za-z0-9_.:-]{1,64}` starting with
/// `[A-Za-z_]`.
fn normalize_function_name(name: &str) -> String {
    let mut cleaned = NAME_ALLOWED.replace_all(name, "").to_string();

    if cleaned.is_empty() {
        cleaned = "function".to_string();
    }

    let first = cleaned.chars().next().expect("cleaned name is non-empty");
    if !(first.is_ascii_alphabetic() || first == '_') {
        cleaned.insert(0, '_');
    }

    cleaned.truncate(MAX_FUNCTION_NAME_LEN);
    cleaned
}

/// Deduplicates names within a tool set by appending `_2`, `_3`, …
fn dedupe_name(name: String, seen: &mut HashMap<String, usize>) -> String {
    let count = seen.entry(name.clone()).or_insert(0);
    *count += 1;

    if *count == 1 {
        return name;
    }

    let suffix = format!("_{count}");
    let mut deduped = name;
    deduped.truncate(MAX_FUNCTION_NAME_LEN - suffix.len());
    deduped.push_str(&suffix);
    deduped
}

fn tool_config(choice: &ToolChoice) -> GoogleToolConfig {
    let (mode, allowed_function_names) = match choice {
        ToolChoice::Mode(ToolChoiceMode::Auto) => (GoogleFunctionCallingMode::Auto, None),
        ToolChoice::Mode(ToolChoiceMode::None) => (GoogleFunctionCallingMode::None, None),
        ToolChoice::Mode(ToolChoiceMode::Required) => (GoogleFunctionCallingMode::Any, None),
        ToolChoice::Named(name) => (GoogleFunctionCallingMode::Any, Some(vec![name.clone()])),
        ToolChoice::Specific { function, .. } => {
            (GoogleFunctionCallingMode::Any, Some(vec![function.name.clone()]))
        }
    };

    GoogleToolConfig {
        function_calling_config: GoogleFunctionCallingConfig {
            mode,
            allowed_function_names,
        },
    }
}
