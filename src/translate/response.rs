//! Translate backend responses into the unified (OpenAI-shaped) response.
//!
//! Translation never fails on missing fields: `id`, `object` and `created` are
//! synthesized when absent, an empty candidate list is replaced by a single
//! placeholder choice, and token counters the backend did not report stay unset.

use std::collections::HashMap;

use super::backend_types::{GeminiResponse, PalmResponse, QwenEmbeddingResponse, QwenResponse};
use super::unified::{
    ChoiceMessage, EmbeddingData, EmbeddingResponse, EmbeddingUsage, UnifiedChatResponse,
    UnifiedChoice, Usage, CHAT_COMPLETION_OBJECT,
};

/// Content of the substituted choice when a backend returns no candidates.
pub const FALLBACK_CONTENT: &str = "Oops, Model respond nothing.";

pub const FINISH_STOP: &str = "stop";

/// Model name reported on translated embedding responses.
pub const EMBEDDING_RESPONSE_MODEL: &str = "text-embedding-ada-002";

/// Normalize a response from an OpenAI-compatible backend.
///
/// The schema already matches; only missing envelope fields are filled in.
/// The backend's own `finish_reason` values are kept.
#[must_use]
pub fn openai_to_unified(mut resp: UnifiedChatResponse, requested_model: &str) -> UnifiedChatResponse {
    if resp.id.is_empty() {
        resp.id = completion_id();
    }
    if resp.object.is_empty() {
        resp.object = CHAT_COMPLETION_OBJECT.to_string();
    }
    if resp.created == 0 {
        resp.created = unix_now();
    }
    if resp.model.is_empty() {
        resp.model = requested_model.to_string();
    }
    if resp.choices.is_empty() {
        resp.choices.push(fallback_choice());
    }
    resp
}

/// Translate a Gemini `generateContent` response.
#[must_use]
pub fn gemini_to_unified(resp: &GeminiResponse, requested_model: &str) -> UnifiedChatResponse {
    let choices = resp
        .candidates
        .iter()
        .enumerate()
        .map(|(position, candidate)| {
            let text = candidate
                .content
                .as_ref()
                .map(|c| {
                    c.parts
                        .iter()
                        .filter_map(|p| p.text.as_deref())
                        .collect::<String>()
                })
                .unwrap_or_default();
            completed_choice(candidate.index.unwrap_or(position as u32), text)
        })
        .collect();

    let usage = resp.usage_metadata.as_ref().map(|u| Usage {
        prompt_tokens: u.prompt_token_count,
        completion_tokens: u.candidates_token_count,
        total_tokens: u.total_token_count,
        ..Default::default()
    });

    envelope(None, requested_model, choices, usage)
}

/// Translate a PaLM `generateMessage` response. PaLM reports no token counts.
#[must_use]
pub fn palm_to_unified(resp: &PalmResponse, requested_model: &str) -> UnifiedChatResponse {
    let choices = resp
        .candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| completed_choice(index as u32, candidate.content.clone()))
        .collect();

    envelope(None, requested_model, choices, None)
}

/// Translate a DashScope text-generation response. The caller is expected to
/// have rejected error bodies (those carrying `code`) already.
#[must_use]
pub fn qwen_to_unified(resp: &QwenResponse, requested_model: &str) -> UnifiedChatResponse {
    let choices = resp
        .output
        .as_ref()
        .and_then(|o| o.text.clone())
        .map(|text| vec![completed_choice(0, text)])
        .unwrap_or_default();

    let usage = resp.usage.as_ref().map(|u| Usage {
        prompt_tokens: u.input_tokens,
        completion_tokens: u.output_tokens,
        total_tokens: u.total_tokens.or_else(|| match (u.input_tokens, u.output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        }),
        ..Default::default()
    });

    envelope(resp.request_id.clone(), requested_model, choices, usage)
}

/// Translate a DashScope embeddings response into the OpenAI list shape.
#[must_use]
pub fn qwen_embeddings_to_unified(resp: &QwenEmbeddingResponse) -> EmbeddingResponse {
    let total_tokens = resp.usage.as_ref().and_then(|u| u.total_tokens);

    EmbeddingResponse {
        object: "list".to_string(),
        data: resp
            .output
            .embeddings
            .iter()
            .map(|e| EmbeddingData {
                object: "embedding".to_string(),
                embedding: e.embedding.clone(),
                index: e.text_index,
            })
            .collect(),
        model: EMBEDDING_RESPONSE_MODEL.to_string(),
        usage: EmbeddingUsage {
            prompt_tokens: total_tokens,
            total_tokens,
        },
    }
}

fn envelope(
    id: Option<String>,
    model: &str,
    mut choices: Vec<UnifiedChoice>,
    usage: Option<Usage>,
) -> UnifiedChatResponse {
    if choices.is_empty() {
        choices.push(fallback_choice());
    }

    UnifiedChatResponse {
        id: id.filter(|s| !s.is_empty()).unwrap_or_else(completion_id),
        object: CHAT_COMPLETION_OBJECT.to_string(),
        created: unix_now(),
        model: model.to_string(),
        choices,
        usage,
        extra: HashMap::new(),
    }
}

fn completed_choice(index: u32, content: String) -> UnifiedChoice {
    UnifiedChoice {
        index,
        message: Some(ChoiceMessage::assistant(content)),
        delta: None,
        finish_reason: Some(FINISH_STOP.to_string()),
        extra: HashMap::new(),
    }
}

/// The single choice substituted when a backend produced none.
#[must_use]
pub fn fallback_choice() -> UnifiedChoice {
    completed_choice(0, FALLBACK_CONTENT.to_string())
}

#[must_use]
pub fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

#[must_use]
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
