//! The unified chat-completion schema, shaped after the
//! [OpenAI Chat Completions API](https://platform.openai.com/docs/api-reference/chat).
//!
//! Clients speak this schema to the gateway, and every backend adapter translates
//! to and from it. Fields the gateway does not interpret are carried in `extra`
//! so OpenAI-compatible backends receive them unchanged.

use std::borrow::Cow;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const CHAT_COMPLETION_OBJECT: &str = "chat.completion";
pub const CHAT_COMPLETION_CHUNK_OBJECT: &str = "chat.completion.chunk";

// ---------------------------------------------------------------------------
// Request types (what clients send TO the gateway)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
    Tool,
    Function,
    /// A role this schema does not know; kept verbatim for passthrough.
    #[serde(untagged)]
    Other(String),
}

/// An optional request field that tolerates a wrongly typed value.
///
/// A value of the expected type is read as [`Lenient::Typed`]; anything else
/// is kept as [`Lenient::Raw`] so OpenAI-compatible backends still receive it
/// byte for byte, while translated backends treat it as absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Lenient<T> {
    Typed(T),
    Raw(serde_json::Value),
}

impl<T: Copy> Lenient<T> {
    #[must_use]
    pub fn get(&self) -> Option<T> {
        match self {
            Self::Typed(v) => Some(*v),
            Self::Raw(_) => None,
        }
    }
}

impl<T> From<T> for Lenient<T> {
    fn from(value: T) -> Self {
        Self::Typed(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    /// Multi-part content (`[{"type":"text","text":...}, {"type":"image_url",...}]`).
    Parts(Vec<serde_json::Value>),
}

impl MessageContent {
    /// Flatten to plain text. Non-text parts are skipped.
    #[must_use]
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(t) => Cow::Borrowed(t),
            Self::Parts(parts) => Cow::Owned(
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(serde_json::Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnifiedMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl UnifiedMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(content.into())),
            extra: HashMap::new(),
        }
    }

    /// The message text; a missing or `null` content reads as empty.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        self.content
            .as_ref()
            .map_or(Cow::Borrowed(""), MessageContent::as_text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UnifiedChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<UnifiedMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<Lenient<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<Lenient<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<Lenient<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<Lenient<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<Lenient<i64>>,
    /// Legacy `/v1/completions` prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl UnifiedChatRequest {
    /// Whether the client asked for `stream: true`.
    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.stream.as_ref().and_then(Lenient::get).unwrap_or(false)
    }

    #[must_use]
    pub fn temperature(&self) -> Option<f64> {
        self.temperature.as_ref().and_then(Lenient::get)
    }

    #[must_use]
    pub fn top_p(&self) -> Option<f64> {
        self.top_p.as_ref().and_then(Lenient::get)
    }

    #[must_use]
    pub fn n(&self) -> Option<u32> {
        self.n.as_ref().and_then(Lenient::get)
    }

    #[must_use]
    pub fn seed(&self) -> Option<i64> {
        self.seed.as_ref().and_then(Lenient::get)
    }

    /// The conversation to forward to backends that only understand chat turns.
    ///
    /// A legacy completions request (`prompt`, no `messages`) reads as a single
    /// user turn.
    #[must_use]
    pub fn conversation(&self) -> Cow<'_, [UnifiedMessage]> {
        if !self.messages.is_empty() {
            return Cow::Borrowed(&self.messages);
        }

        let prompt = match &self.prompt {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(serde_json::Value::as_str)
                .collect::<Vec<_>>()
                .join("\n"),
            _ => return Cow::Borrowed(&[]),
        };

        Cow::Owned(vec![UnifiedMessage::new(Role::User, prompt)])
    }
}

// ---------------------------------------------------------------------------
// Response types (what the gateway sends back)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UnifiedChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<UnifiedChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl UnifiedChatResponse {
    /// Text of the first choice, whether it carries a full message or a delta.
    #[must_use]
    pub fn first_content(&self) -> &str {
        self.choices
            .first()
            .and_then(|c| {
                c.message
                    .as_ref()
                    .map(|m| m.content.as_str())
                    .or_else(|| c.delta.as_ref().and_then(|d| d.content.as_deref()))
            })
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UnifiedChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ChoiceMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<ChunkDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default = "assistant_role")]
    pub role: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ChoiceMessage {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: assistant_role(),
            content: content.into(),
            extra: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Token accounting. Counters the backend did not report stay absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    /// Breakdowns such as `prompt_tokens_details`.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn assistant_role() -> String {
    "assistant".to_string()
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmbeddingRequest {
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub object: String,
    pub data: Vec<EmbeddingData>,
    pub model: String,
    pub usage: EmbeddingUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingData {
    pub object: String,
    pub embedding: Vec<f64>,
    pub index: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
                error_type: error_type.to_string(),
                code: None,
            },
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.error.code = Some(code.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_keeps_unknown_fields() {
        let req: UnifiedChatRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi", "name": "bob"}],
            "max_tokens": 12,
        }))
        .unwrap();

        assert!(!req.is_stream());
        assert_eq!(req.extra["max_tokens"], 12);
        assert_eq!(req.messages[0].extra["name"], "bob");

        let out = serde_json::to_value(&req).unwrap();
        assert_eq!(out["max_tokens"], 12);
        assert_eq!(out["messages"][0]["name"], "bob");
        assert!(out.get("temperature").is_none());
        assert!(out.get("stream").is_none());
    }

    #[test]
    fn test_unknown_roles_and_mistyped_fields_parse() {
        let body = serde_json::json!({
            "model": "gpt-4",
            "messages": [
                {"role": "developer", "content": "be terse"},
                {"role": "function", "name": "lookup", "content": "{}"},
                {"role": "critic", "content": "hmm"}
            ],
            "temperature": "0.7",
            "n": 2,
            "stream": true
        });
        let req: UnifiedChatRequest = serde_json::from_value(body.clone()).unwrap();

        assert_eq!(req.messages[0].role, Role::Developer);
        assert_eq!(req.messages[1].role, Role::Function);
        assert_eq!(req.messages[2].role, Role::Other("critic".to_string()));
        assert_eq!(req.temperature(), None);
        assert_eq!(req.n(), Some(2));
        assert!(req.is_stream());

        assert_eq!(serde_json::to_value(&req).unwrap(), body);
    }

    #[test]
    fn test_usage_keeps_detail_fields() {
        let body = serde_json::json!({
            "prompt_tokens": 9,
            "completion_tokens": 3,
            "total_tokens": 12,
            "prompt_tokens_details": {"cached_tokens": 0}
        });
        let usage: Usage = serde_json::from_value(body.clone()).unwrap();
        assert_eq!(usage.total_tokens, Some(12));
        assert_eq!(serde_json::to_value(&usage).unwrap(), body);
    }

    #[test]
    fn test_multipart_content_flattens_to_text() {
        let msg: UnifiedMessage = serde_json::from_value(serde_json::json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": "https://x/y.png"}},
                {"type": "text", "text": "here"}
            ]
        }))
        .unwrap();
        assert_eq!(msg.text(), "look\nhere");
    }

    #[test]
    fn test_null_content_reads_as_empty() {
        let msg: UnifiedMessage =
            serde_json::from_value(serde_json::json!({"role": "assistant", "content": null}))
                .unwrap();
        assert_eq!(msg.text(), "");

        let choice: UnifiedChoice = serde_json::from_value(serde_json::json!({
            "index": 0,
            "message": {"role": "assistant", "content": null},
            "finish_reason": "tool_calls"
        }))
        .unwrap();
        assert_eq!(choice.message.unwrap().content, "");
    }

    #[test]
    fn test_prompt_becomes_single_user_turn() {
        let req = UnifiedChatRequest {
            prompt: Some(serde_json::json!("Say hi")),
            ..Default::default()
        };
        let conversation = req.conversation();
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation[0].role, Role::User);
        assert_eq!(conversation[0].text(), "Say hi");
    }
}
