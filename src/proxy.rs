//! Per-request orchestration: translate, call upstream, pick the response mode.
//!
//! The caller resolves the [`BackendConfig`] and hands it in; nothing here reads
//! global state. Backend differences live behind [`adapter_for`].

use crate::adapter::adapter_for;
use crate::config::BackendConfig;
use crate::error::{GatewayError, Result};
use crate::polling::{poll_until_terminal, PollPolicy};
use crate::providers::{apply_credential, endpoint_url, BackendKind, Route};
use crate::translate::backend_types::QwenEmbeddingResponse;
use crate::translate::request::embeddings_to_qwen;
use crate::translate::response::qwen_embeddings_to_unified;
use crate::translate::streaming::{reframe_stream, truncate};
use crate::translate::synthesize::synthesize_stream;
use crate::translate::unified::{EmbeddingRequest, UnifiedChatRequest};

use bytes::Bytes;
use futures::stream::Stream;
use reqwest::header::CONTENT_TYPE;
use std::pin::Pin;
use std::time::Duration;

/// Header on an image submission response that names the status endpoint.
pub const OPERATION_LOCATION: &str = "operation-location";

/// SSE bytes on their way to the client.
pub type FrameStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// One JSON document.
    Json,
    /// Upstream SSE passed through the reframer.
    NativeStream,
    /// A complete upstream response replayed as synthetic chunks.
    SynthesizedStream,
}

pub enum ProxyOutcome {
    Json(serde_json::Value),
    Stream {
        frames: FrameStream,
        mode: ResponseMode,
    },
}

impl ProxyOutcome {
    #[must_use]
    pub fn mode(&self) -> ResponseMode {
        match self {
            Self::Json(_) => ResponseMode::Json,
            Self::Stream { mode, .. } => *mode,
        }
    }
}

impl std::fmt::Debug for ProxyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Self::Stream { mode, .. } => f
                .debug_struct("Stream")
                .field("mode", mode)
                .finish_non_exhaustive(),
        }
    }
}

/// Forward a chat or legacy completion request.
///
/// Streams natively when the client asked for `stream=true` and the backend can;
/// synthesizes chunks when it can't; otherwise answers with one JSON document.
pub async fn proxy_chat(
    route: Route,
    req: &UnifiedChatRequest,
    backend: &BackendConfig,
    pacing: Duration,
    client: &reqwest::Client,
) -> Result<ProxyOutcome> {
    let adapter = adapter_for(backend.kind);
    let url = endpoint_url(backend, route)?;
    let payload = adapter.translate_request(req, backend)?;
    let native = req.is_stream() && adapter.streams();

    tracing::info!(
        backend = backend.kind.as_str(),
        model = %req.model,
        deployment = %backend.deployment,
        stream = req.is_stream(),
        native,
        "Forwarding {:?}",
        route
    );

    let response = apply_credential(client.post(&url), backend)
        .json(&payload)
        .send()
        .await
        .map_err(|e| GatewayError::provider(format!("Request failed: {e}")))?;
    let response = ensure_success(response).await?;

    if native {
        let frames = reframe_stream(response.bytes_stream(), req.model.clone(), pacing);
        return Ok(ProxyOutcome::Stream {
            frames: Box::pin(frames),
            mode: ResponseMode::NativeStream,
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| GatewayError::provider(format!("Failed to read response body: {e}")))?;
    tracing::debug!(body_len = body.len(), "Upstream response received");

    let unified = adapter.translate_response(&body, &req.model)?;

    if req.is_stream() {
        return Ok(ProxyOutcome::Stream {
            frames: Box::pin(synthesize_stream(unified, adapter.granularity(), pacing)),
            mode: ResponseMode::SynthesizedStream,
        });
    }

    Ok(ProxyOutcome::Json(serde_json::to_value(unified)?))
}

/// Forward an embeddings request.
///
/// Qwen is translated both ways; OpenAI-compatible backends get the body as-is.
pub async fn proxy_embeddings(
    req: &EmbeddingRequest,
    backend: &BackendConfig,
    client: &reqwest::Client,
) -> Result<serde_json::Value> {
    let url = endpoint_url(backend, Route::Embeddings)?;
    let builder = apply_credential(client.post(&url), backend);

    tracing::info!(backend = backend.kind.as_str(), deployment = %backend.deployment, "Forwarding embeddings");

    let builder = if backend.kind == BackendKind::Qwen {
        builder.json(&embeddings_to_qwen(req))
    } else {
        builder.json(req)
    };

    let response = builder
        .send()
        .await
        .map_err(|e| GatewayError::provider(format!("Embeddings request failed: {e}")))?;
    let body = ensure_success(response)
        .await?
        .bytes()
        .await
        .map_err(|e| GatewayError::provider(format!("Failed to read embeddings response: {e}")))?;

    if backend.kind != BackendKind::Qwen {
        return serde_json::from_slice(&body).map_err(|e| {
            GatewayError::translation(format!(
                "Failed to parse embeddings response: {e}. Body: {}",
                truncate(&String::from_utf8_lossy(&body), 300)
            ))
        });
    }

    let resp: QwenEmbeddingResponse = serde_json::from_slice(&body).map_err(|e| {
        GatewayError::translation(format!("Failed to parse qwen embeddings response: {e}"))
    })?;
    if resp.code.as_deref().is_some_and(|c| !c.is_empty()) {
        return Err(GatewayError::UpstreamRejected {
            status: 400,
            body: String::from_utf8_lossy(&body).into_owned(),
            content_type: Some("application/json".to_string()),
        });
    }

    Ok(serde_json::to_value(qwen_embeddings_to_unified(&resp))?)
}

/// Submit an image generation job and poll it to a terminal state.
///
/// Success, failure and timeout are all returned as `Ok`; only the submission
/// itself can fail the request.
pub async fn proxy_image_generation(
    body: &serde_json::Value,
    backend: &BackendConfig,
    policy: PollPolicy,
    client: &reqwest::Client,
) -> Result<serde_json::Value> {
    let url = endpoint_url(backend, Route::ImageSubmit)?;

    tracing::info!(backend = backend.kind.as_str(), "Submitting image generation");

    let response = apply_credential(client.post(&url), backend)
        .json(body)
        .send()
        .await
        .map_err(|e| GatewayError::provider(format!("Image submission failed: {e}")))?;
    let response = ensure_success(response).await?;

    let operation = response
        .headers()
        .get(OPERATION_LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let submitted: serde_json::Value = response
        .json()
        .await
        .map_err(|e| GatewayError::translation(format!("Failed to parse submission response: {e}")))?;

    let Some(operation) = operation else {
        tracing::warn!("Image submission returned no {OPERATION_LOCATION} header");
        return Ok(submitted);
    };

    let operation = operation.as_str();
    let outcome = poll_until_terminal(policy, move || fetch_status(client, operation, backend)).await;

    Ok(outcome.into_body())
}

async fn fetch_status(
    client: &reqwest::Client,
    url: &str,
    backend: &BackendConfig,
) -> Result<serde_json::Value> {
    let response = apply_credential(client.get(url), backend)
        .send()
        .await
        .map_err(|e| GatewayError::provider(format!("Status request failed: {e}")))?;

    ensure_success(response)
        .await?
        .json()
        .await
        .map_err(|e| GatewayError::translation(format!("Failed to parse status response: {e}")))
}

/// Turn a non-success upstream answer into [`GatewayError::UpstreamRejected`],
/// keeping its status, body and content type.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let body = response.text().await.unwrap_or_default();

    tracing::warn!(
        status = status.as_u16(),
        body = %truncate(&body, 300),
        "Upstream rejected request"
    );

    Err(GatewayError::UpstreamRejected {
        status: status.as_u16(),
        body,
        content_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_mode() {
        let json = ProxyOutcome::Json(serde_json::json!({}));
        assert_eq!(json.mode(), ResponseMode::Json);

        let stream = ProxyOutcome::Stream {
            frames: Box::pin(futures::stream::empty()),
            mode: ResponseMode::SynthesizedStream,
        };
        assert_eq!(stream.mode(), ResponseMode::SynthesizedStream);
        assert!(format!("{stream:?}").contains("SynthesizedStream"));
    }
}
