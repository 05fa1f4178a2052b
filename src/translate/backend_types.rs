//! Wire types for the non-OpenAI backends: Google Gemini, Google PaLM and
//! Alibaba Qwen (DashScope).
//!
//! Response types are lenient: every field a backend may omit has a serde
//! default, so a sparse payload still deserializes and the response adapters
//! decide what a missing field means.

use serde::{Deserialize, Serialize};

use super::unified::UnifiedMessage;

// ---------------------------------------------------------------------------
// Gemini (`models/{model}:generateContent`)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    pub generation_config: GeminiGenerationConfig,
}

/// One conversation turn. Gemini accepts a single part object here, which is
/// all a text-only turn needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeminiContent {
    pub role: String,
    pub parts: GeminiPart,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeminiPart {
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    pub usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    #[serde(default)]
    pub content: Option<GeminiCandidateContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub index: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiCandidateContent {
    #[serde(default)]
    pub parts: Vec<GeminiResponsePart>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiResponsePart {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiUsageMetadata {
    #[serde(default)]
    pub prompt_token_count: Option<u64>,
    #[serde(default)]
    pub candidates_token_count: Option<u64>,
    #[serde(default)]
    pub total_token_count: Option<u64>,
}

// ---------------------------------------------------------------------------
// PaLM (`models/{model}:generateMessage`)
// ---------------------------------------------------------------------------

pub const PALM_AUTHOR_USER: &str = "0";
pub const PALM_AUTHOR_MODEL: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PalmRequest {
    pub prompt: PalmPrompt,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PalmPrompt {
    pub messages: Vec<PalmMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PalmMessage {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PalmResponse {
    #[serde(default)]
    pub candidates: Vec<PalmMessage>,
    #[serde(default)]
    pub messages: Vec<PalmMessage>,
}

// ---------------------------------------------------------------------------
// Qwen / DashScope (`aigc/text-generation/generation`)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QwenRequest {
    pub model: String,
    pub input: QwenInput,
    pub parameters: QwenParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QwenInput {
    pub messages: Vec<UnifiedMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QwenParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QwenResponse {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub output: Option<QwenOutput>,
    #[serde(default)]
    pub usage: Option<QwenUsage>,
    /// Present only when DashScope reports an error inside a 200 body.
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QwenOutput {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QwenUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

// ---------------------------------------------------------------------------
// Qwen embeddings (`embeddings/text-embedding/text-embedding`)
// ---------------------------------------------------------------------------

pub const QWEN_EMBEDDING_MODEL: &str = "text-embedding-v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QwenEmbeddingRequest {
    pub model: String,
    pub input: QwenEmbeddingInput,
    pub parameters: QwenEmbeddingParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QwenEmbeddingInput {
    pub texts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QwenEmbeddingParameters {
    pub text_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QwenEmbeddingResponse {
    #[serde(default)]
    pub output: QwenEmbeddingOutput,
    #[serde(default)]
    pub usage: Option<QwenUsage>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QwenEmbeddingOutput {
    #[serde(default)]
    pub embeddings: Vec<QwenEmbedding>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QwenEmbedding {
    #[serde(default)]
    pub embedding: Vec<f64>,
    #[serde(default)]
    pub text_index: u32,
}
