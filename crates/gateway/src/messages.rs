//! Wire-shaped request and response types.
//!
//! The gateway speaks the OpenAI chat-completion dialect on both sides of
//! the request plane: callers submit a [`ModelRequest`] and receive a
//! [`ModelResponse`] (or a stream of [`ChatChunk`]s), regardless of which
//! upstream provider ends up serving the request. The only extension over
//! the stock wire shape is [`ModelResponse::routed_through`], which echoes
//! the upstream the router actually selected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token accounting for one request, as reported by the upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Message content: either a plain string or an ordered sequence of parts.
///
/// The multi-part form carries image references for vision models; the
/// router refuses to send image parts to a model without the `vision`
/// feature flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of all textual content, ignoring image parts.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Whether any part references an image.
    pub fn has_image(&self) -> bool {
        match self {
            Self::Text(_) => false,
            Self::Parts(parts) => parts.iter().any(|part| matches!(part, ContentPart::ImageUrl { .. })),
        }
    }
}

/// A single content part in the multi-part message form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// Image reference within a content part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    /// Requested fidelity, e.g. `"low"` or `"high"`. Passed through to the
    /// provider untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A single conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
    /// Optional author name, used to disambiguate multiple participants
    /// sharing a role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Id of the tool call this message responds to. Only meaningful for
    /// `tool` role messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(content.into()),
            name: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
            name: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(content.into()),
            name: None,
            tool_call_id: None,
        }
    }
}

/// Stop sequences: the wire accepts a single string or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

/// Legacy function declaration (`functions` array).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the function arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Tool declaration (`tools` array).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    /// Currently always `"function"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDef,
}

/// Requested response format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: ResponseFormatKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormatKind {
    Text,
    JsonObject,
}

/// Routing strategy requested by the caller or a custom endpoint.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RouteStrategy {
    /// Requested model, then its catalog-recommended fallbacks, then any
    /// eligible model.
    #[default]
    Default,
    /// Requested model, then the request's explicit `fallbacks` in order,
    /// then any eligible model.
    Fallback,
    /// Eligible models ordered by ascending combined price.
    LowestCost,
    /// Eligible models ordered by the fixed speed rank table.
    Fastest,
    /// Eligible models ordered by the fixed quality rank table.
    HighestQuality,
}

/// A validated chat-completion request.
///
/// Sampling knobs left as `None` fall through to the provider defaults;
/// the validator only checks ranges when a value is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Namespaced model id (`provider/name`), or the reserved `auto`.
    pub model: String,
    /// Conversation messages, oldest first. Must be non-empty.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature, `0.0..=2.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling cutoff, `0.0..=1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Repetition penalty, `-2.0..=2.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    /// Topic-diversity penalty, `-2.0..=2.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    /// Maximum tokens to generate. Must be positive when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
    /// Stream the response as incremental chunks. Streaming responses
    /// bypass the cache entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<FunctionDef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    /// Routing strategy. `None` means [`RouteStrategy::Default`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteStrategy>,
    /// Explicit fallback model ids for [`RouteStrategy::Fallback`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallbacks: Option<Vec<String>>,
}

impl ModelRequest {
    /// Minimal request with a model and messages, everything else default.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            max_tokens: None,
            stop: None,
            stream: None,
            functions: None,
            function_call: None,
            tools: None,
            tool_choice: None,
            response_format: None,
            route: None,
            fallbacks: None,
        }
    }

    /// Effective routing strategy.
    pub fn strategy(&self) -> RouteStrategy {
        self.route.unwrap_or_default()
    }

    /// Whether streaming was requested.
    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// Whether any message carries an image part.
    pub fn has_image_parts(&self) -> bool {
        self.messages.iter().any(|message| message.content.has_image())
    }

    /// Whether any message uses the `system` role.
    pub fn has_system_message(&self) -> bool {
        self.messages.iter().any(|message| message.role == Role::System)
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

/// Assistant message inside a response choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub role: Role,
    pub content: String,
}

/// One generated completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ResponseMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatObject {
    #[serde(rename = "chat.completion")]
    ChatCompletion,
    #[serde(rename = "chat.completion.chunk")]
    ChatCompletionChunk,
}

/// A complete, OpenAI-shaped chat completion response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Stable id, `chatcmpl-<uuid>`.
    pub id: String,
    pub object: ChatObject,
    /// Unix seconds at creation.
    pub created: u64,
    /// The model that actually served the request.
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: TokenUsage,
    /// Gateway extension: the upstream id the router selected. Matches
    /// `model` today but is guaranteed to survive future response-shape
    /// changes.
    pub routed_through: String,
}

impl ModelResponse {
    /// Assemble a response around a single assistant message.
    pub fn new(
        actual_model: impl Into<String>,
        content: impl Into<String>,
        finish_reason: FinishReason,
        usage: TokenUsage,
    ) -> Self {
        let actual_model = actual_model.into();

        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            object: ChatObject::ChatCompletion,
            created: crate::clock::unix_now_secs(),
            model: actual_model.clone(),
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    role: Role::Assistant,
                    content: content.into(),
                },
                finish_reason: Some(finish_reason),
            }],
            usage,
            routed_through: actual_model,
        }
    }
}

/// One streamed delta, `chat.completion.chunk`-shaped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChunk {
    pub id: String,
    pub object: ChatObject,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    pub routed_through: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_accepts_string_and_part_content() {
        let request: ModelRequest = serde_json::from_value(serde_json::json!({
            "model": "openai/gpt-4o",
            "messages": [
                {"role": "user", "content": "plain"},
                {"role": "user", "content": [
                    {"type": "text", "text": "what is this?"},
                    {"type": "image_url", "image_url": {"url": "https://example.com/cat.png", "detail": "low"}}
                ]}
            ]
        }))
        .unwrap();

        assert_eq!(request.messages.len(), 2);
        assert!(!request.messages[0].content.has_image());
        assert!(request.messages[1].content.has_image());
        assert!(request.has_image_parts());
        assert_eq!(request.messages[1].content.text(), "what is this?");
    }

    #[test]
    fn stop_accepts_string_or_list() {
        let one: ModelRequest = serde_json::from_value(serde_json::json!({
            "model": "auto",
            "messages": [{"role": "user", "content": "hi"}],
            "stop": "END"
        }))
        .unwrap();
        assert_eq!(one.stop, Some(StopSequences::One("END".into())));

        let many: ModelRequest = serde_json::from_value(serde_json::json!({
            "model": "auto",
            "messages": [{"role": "user", "content": "hi"}],
            "stop": ["END", "\n\n"]
        }))
        .unwrap();
        assert_eq!(many.stop, Some(StopSequences::Many(vec!["END".into(), "\n\n".into()])));
    }

    #[test]
    fn route_strategy_uses_snake_case_on_the_wire() {
        let request: ModelRequest = serde_json::from_value(serde_json::json!({
            "model": "auto",
            "messages": [{"role": "user", "content": "hi"}],
            "route": "lowest_cost"
        }))
        .unwrap();

        assert_eq!(request.strategy(), RouteStrategy::LowestCost);
        assert_eq!(RouteStrategy::HighestQuality.to_string(), "highest_quality");
    }

    #[test]
    fn response_echoes_actual_model_in_routed_through() {
        let response = ModelResponse::new(
            "anthropic/claude-3-haiku",
            "hello",
            FinishReason::Stop,
            TokenUsage::new(3, 5),
        );

        assert_eq!(response.model, "anthropic/claude-3-haiku");
        assert_eq!(response.routed_through, "anthropic/claude-3-haiku");
        assert!(response.id.starts_with("chatcmpl-"));
        assert_eq!(response.choices[0].message.role, Role::Assistant);
        assert_eq!(response.usage.total_tokens, 8);
    }

    #[test]
    fn chunk_serializes_with_chunk_object_type() {
        let chunk = ChatChunk {
            id: "chatcmpl-test".into(),
            object: ChatObject::ChatCompletionChunk,
            created: 1,
            model: "openai/gpt-4o".into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: Some(Role::Assistant),
                    content: Some("Hel".into()),
                },
                finish_reason: None,
            }],
            routed_through: "openai/gpt-4o".into(),
        };

        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["object"], "chat.completion.chunk");
        assert_eq!(value["choices"][0]["delta"]["content"], "Hel");
    }
}
