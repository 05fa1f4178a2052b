//! One capability interface over every backend family.
//!
//! The orchestrator never branches on the backend kind: it asks the registry for
//! the kind's [`ChatAdapter`] and drives translation, streaming mode and chunk
//! granularity through it.

use crate::config::BackendConfig;
use crate::error::{GatewayError, Result};
use crate::providers::BackendKind;
use crate::translate::backend_types::{GeminiResponse, PalmResponse, QwenResponse};
use crate::translate::request::{unified_to_gemini, unified_to_openai, unified_to_palm, unified_to_qwen};
use crate::translate::response::{
    gemini_to_unified, openai_to_unified, palm_to_unified, qwen_to_unified,
};
use crate::translate::synthesize::Granularity;
use crate::translate::unified::{UnifiedChatRequest, UnifiedChatResponse};

pub trait ChatAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Build the upstream request body.
    fn translate_request(
        &self,
        req: &UnifiedChatRequest,
        backend: &BackendConfig,
    ) -> Result<serde_json::Value>;

    /// Parse and translate a complete (non-streamed) upstream body.
    fn translate_response(&self, body: &[u8], requested_model: &str) -> Result<UnifiedChatResponse>;

    /// Whether the backend emits SSE itself when asked to stream.
    fn streams(&self) -> bool;

    /// How a complete response is cut up for `stream=true` clients.
    fn granularity(&self) -> Granularity;
}

struct OpenAiCompatible(BackendKind);
struct Gemini;
struct Palm;
struct Qwen;

static AZURE: OpenAiCompatible = OpenAiCompatible(BackendKind::Azure);
static OPENAI: OpenAiCompatible = OpenAiCompatible(BackendKind::OpenAi);
static GEMINI: Gemini = Gemini;
static PALM: Palm = Palm;
static QWEN: Qwen = Qwen;

/// Look up the adapter for a backend kind.
#[must_use]
pub fn adapter_for(kind: BackendKind) -> &'static dyn ChatAdapter {
    match kind {
        BackendKind::Azure => &AZURE,
        BackendKind::OpenAi => &OPENAI,
        BackendKind::Gemini => &GEMINI,
        BackendKind::Palm => &PALM,
        BackendKind::Qwen => &QWEN,
    }
}

fn parse<T: serde::de::DeserializeOwned>(body: &[u8], backend: &str) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| {
        GatewayError::translation(format!(
            "Failed to parse {backend} response: {e}. Body: {}",
            String::from_utf8_lossy(&body[..body.len().min(300)])
        ))
    })
}

impl ChatAdapter for OpenAiCompatible {
    fn kind(&self) -> BackendKind {
        self.0
    }

    fn translate_request(
        &self,
        req: &UnifiedChatRequest,
        _backend: &BackendConfig,
    ) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(unified_to_openai(req))?)
    }

    fn translate_response(&self, body: &[u8], requested_model: &str) -> Result<UnifiedChatResponse> {
        Ok(openai_to_unified(parse(body, self.0.as_str())?, requested_model))
    }

    fn streams(&self) -> bool {
        true
    }

    fn granularity(&self) -> Granularity {
        Granularity::Paragraph
    }
}

impl ChatAdapter for Gemini {
    fn kind(&self) -> BackendKind {
        BackendKind::Gemini
    }

    fn translate_request(
        &self,
        req: &UnifiedChatRequest,
        _backend: &BackendConfig,
    ) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(unified_to_gemini(req))?)
    }

    fn translate_response(&self, body: &[u8], requested_model: &str) -> Result<UnifiedChatResponse> {
        let resp: GeminiResponse = parse(body, "gemini")?;
        Ok(gemini_to_unified(&resp, requested_model))
    }

    fn streams(&self) -> bool {
        false
    }

    fn granularity(&self) -> Granularity {
        Granularity::Paragraph
    }
}

impl ChatAdapter for Palm {
    fn kind(&self) -> BackendKind {
        BackendKind::Palm
    }

    fn translate_request(
        &self,
        req: &UnifiedChatRequest,
        _backend: &BackendConfig,
    ) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(unified_to_palm(req))?)
    }

    fn translate_response(&self, body: &[u8], requested_model: &str) -> Result<UnifiedChatResponse> {
        let resp: PalmResponse = parse(body, "palm")?;
        Ok(palm_to_unified(&resp, requested_model))
    }

    fn streams(&self) -> bool {
        false
    }

    fn granularity(&self) -> Granularity {
        Granularity::Whitespace
    }
}

impl ChatAdapter for Qwen {
    fn kind(&self) -> BackendKind {
        BackendKind::Qwen
    }

    fn translate_request(
        &self,
        req: &UnifiedChatRequest,
        backend: &BackendConfig,
    ) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(unified_to_qwen(req, backend))?)
    }

    /// DashScope reports failures inside a 200 body carrying `code`; those
    /// become a 400 with the body passed through.
    fn translate_response(&self, body: &[u8], requested_model: &str) -> Result<UnifiedChatResponse> {
        let resp: QwenResponse = parse(body, "qwen")?;
        if resp.code.as_deref().is_some_and(|c| !c.is_empty()) {
            return Err(GatewayError::UpstreamRejected {
                status: 400,
                body: String::from_utf8_lossy(body).into_owned(),
                content_type: Some("application/json".to_string()),
            });
        }
        Ok(qwen_to_unified(&resp, requested_model))
    }

    fn streams(&self) -> bool {
        false
    }

    fn granularity(&self) -> Granularity {
        Granularity::Paragraph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::unified::{Role, UnifiedMessage};

    fn backend(kind: BackendKind) -> BackendConfig {
        BackendConfig {
            kind,
            base_url: "https://example.test".to_string(),
            deployment: "gpt-3.5-turbo".to_string(),
            api_key: "k".to_string(),
            api_version: None,
        }
    }

    #[test]
    fn test_registry_covers_every_kind() {
        for kind in [
            BackendKind::Azure,
            BackendKind::OpenAi,
            BackendKind::Gemini,
            BackendKind::Palm,
            BackendKind::Qwen,
        ] {
            assert_eq!(adapter_for(kind).kind(), kind);
        }
    }

    #[test]
    fn test_streaming_capabilities() {
        assert!(adapter_for(BackendKind::Azure).streams());
        assert!(adapter_for(BackendKind::OpenAi).streams());
        assert!(!adapter_for(BackendKind::Gemini).streams());
        assert!(!adapter_for(BackendKind::Qwen).streams());
        assert_eq!(
            adapter_for(BackendKind::Palm).granularity(),
            Granularity::Whitespace
        );
        assert_eq!(
            adapter_for(BackendKind::Gemini).granularity(),
            Granularity::Paragraph
        );
    }

    #[test]
    fn test_request_payload_shapes() {
        let req = UnifiedChatRequest {
            model: "gpt-3.5-turbo".to_string(),
            messages: vec![UnifiedMessage::new(Role::User, "hi")],
            ..Default::default()
        };

        let gemini = adapter_for(BackendKind::Gemini)
            .translate_request(&req, &backend(BackendKind::Gemini))
            .unwrap();
        assert!(gemini.get("contents").is_some());

        let palm = adapter_for(BackendKind::Palm)
            .translate_request(&req, &backend(BackendKind::Palm))
            .unwrap();
        assert_eq!(palm["prompt"]["messages"][0]["author"], "0");

        let qwen = adapter_for(BackendKind::Qwen)
            .translate_request(&req, &backend(BackendKind::Qwen))
            .unwrap();
        assert_eq!(qwen["model"], "qwen-turbo");
        assert_eq!(qwen["input"]["messages"][0]["content"], "hi");

        let azure = adapter_for(BackendKind::Azure)
            .translate_request(&req, &backend(BackendKind::Azure))
            .unwrap();
        assert_eq!(azure["messages"][0]["role"], "user");
    }

    #[test]
    fn test_qwen_error_body_is_rejected() {
        let err = adapter_for(BackendKind::Qwen)
            .translate_response(
                br#"{"code":"InvalidParameter","message":"bad","request_id":"r"}"#,
                "qwen-turbo",
            )
            .unwrap_err();
        match err {
            GatewayError::UpstreamRejected { status, body, .. } => {
                assert_eq!(status, 400);
                assert!(body.contains("InvalidParameter"));
            }
            other => panic!("Expected UpstreamRejected, got {other:?}"),
        }
    }

    #[test]
    fn test_unparseable_body_is_translation_error() {
        let err = adapter_for(BackendKind::Gemini)
            .translate_response(b"<html>oops</html>", "gemini-pro")
            .unwrap_err();
        assert!(matches!(err, GatewayError::Translation { .. }));
    }
}
