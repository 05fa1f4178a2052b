//! Translate unified (OpenAI-shaped) requests into each backend's request body.
//!
//! Every function here is pure. Optional fields that are missing or malformed
//! simply stay absent in the translated payload.

use super::backend_types::{
    GeminiContent, GeminiGenerationConfig, GeminiPart, GeminiRequest, PalmMessage, PalmPrompt,
    PalmRequest, QwenEmbeddingInput, QwenEmbeddingParameters, QwenEmbeddingRequest, QwenInput,
    QwenParameters, QwenRequest, PALM_AUTHOR_MODEL, PALM_AUTHOR_USER, QWEN_EMBEDDING_MODEL,
};
use super::unified::{EmbeddingRequest, Role, UnifiedChatRequest, UnifiedMessage};
use crate::config::BackendConfig;

pub const GEMINI_ROLE_USER: &str = "user";
pub const GEMINI_ROLE_MODEL: &str = "model";

/// Client model name that Qwen rewrites to its own default model.
pub const QWEN_ALIASED_MODEL: &str = "gpt-3.5-turbo";
pub const QWEN_DEFAULT_MODEL: &str = "qwen-turbo";

/// Azure and other OpenAI-compatible backends already speak the unified
/// schema, so the payload is the request itself.
#[must_use]
pub fn unified_to_openai(req: &UnifiedChatRequest) -> UnifiedChatRequest {
    req.clone()
}

/// Translate to a Gemini `generateContent` body.
///
/// Assistant turns become `model`; everything else, including `system`, becomes
/// `user`. Gemini rejects consecutive turns with the same role, so adjacent
/// same-role turns are merged (see [`merge_adjacent_roles`]).
#[must_use]
pub fn unified_to_gemini(req: &UnifiedChatRequest) -> GeminiRequest {
    let turns = req
        .conversation()
        .iter()
        .map(|msg| GeminiContent {
            role: match msg.role {
                Role::Assistant => GEMINI_ROLE_MODEL,
                Role::System
                | Role::Developer
                | Role::User
                | Role::Tool
                | Role::Function
                | Role::Other(_) => GEMINI_ROLE_USER,
            }
            .to_string(),
            parts: GeminiPart {
                text: msg.text().into_owned(),
            },
        })
        .collect();

    let mut contents = merge_adjacent_roles(turns);
    if contents.is_empty() {
        contents.push(GeminiContent {
            role: GEMINI_ROLE_USER.to_string(),
            parts: GeminiPart {
                text: String::new(),
            },
        });
    }

    GeminiRequest {
        contents,
        generation_config: GeminiGenerationConfig {
            temperature: req.temperature(),
            candidate_count: req.n(),
            top_p: req.top_p(),
        },
    }
}

/// Collapse runs of turns that share a role into one turn.
///
/// Each text in a run of two or more is followed by a newline, so
/// `["hi", "there"]` becomes `"hi\nthere\n"`. Single turns are left as they
/// are, which makes the merge idempotent.
#[must_use]
pub fn merge_adjacent_roles(turns: Vec<GeminiContent>) -> Vec<GeminiContent> {
    let mut merged: Vec<GeminiContent> = Vec::with_capacity(turns.len());
    let mut run_len = 0usize;

    for turn in turns {
        match merged.last_mut() {
            Some(last) if last.role == turn.role => {
                if run_len == 1 {
                    last.parts.text.push('\n');
                }
                last.parts.text.push_str(&turn.parts.text);
                last.parts.text.push('\n');
                run_len += 1;
            }
            _ => {
                merged.push(turn);
                run_len = 1;
            }
        }
    }

    merged
}

/// Translate to a PaLM `generateMessage` body.
///
/// Unlike Gemini, PaLM turns are not merged: author `"0"` is the user and every
/// other role is author `"1"`.
#[must_use]
pub fn unified_to_palm(req: &UnifiedChatRequest) -> PalmRequest {
    let mut messages: Vec<PalmMessage> = req
        .conversation()
        .iter()
        .map(|msg| PalmMessage {
            author: if msg.role == Role::User {
                PALM_AUTHOR_USER
            } else {
                PALM_AUTHOR_MODEL
            }
            .to_string(),
            content: msg.text().into_owned(),
        })
        .collect();

    if messages.is_empty() {
        messages.push(PalmMessage {
            author: PALM_AUTHOR_USER.to_string(),
            content: String::new(),
        });
    }

    PalmRequest {
        prompt: PalmPrompt { messages },
    }
}

/// Translate to a DashScope text-generation body. Messages pass through as-is.
///
/// The model is the resolved deployment, with the stock OpenAI alias rewritten
/// to Qwen's default model wherever it appears (`gpt-3.5-turbo-16k` becomes
/// `qwen-turbo-16k`).
#[must_use]
pub fn unified_to_qwen(req: &UnifiedChatRequest, backend: &BackendConfig) -> QwenRequest {
    let model = backend
        .deployment
        .replace(QWEN_ALIASED_MODEL, QWEN_DEFAULT_MODEL);

    let mut messages = req.conversation().into_owned();
    if messages.is_empty() {
        messages.push(UnifiedMessage::new(Role::User, ""));
    }

    QwenRequest {
        model,
        input: QwenInput { messages },
        parameters: QwenParameters {
            top_p: req.top_p(),
            top_k: req.n(),
            seed: req.seed(),
        },
    }
}

/// Translate an embeddings request. A string becomes a one-element list, a list
/// keeps its string items, anything else yields an empty list.
#[must_use]
pub fn embeddings_to_qwen(req: &EmbeddingRequest) -> QwenEmbeddingRequest {
    let texts = match &req.input {
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    };

    QwenEmbeddingRequest {
        model: QWEN_EMBEDDING_MODEL.to_string(),
        input: QwenEmbeddingInput { texts },
        parameters: QwenEmbeddingParameters {
            text_type: "query".to_string(),
        },
    }
}
