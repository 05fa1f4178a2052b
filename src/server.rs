use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::journal::{ExchangeMode, ExchangeRecord, SharedJournal};
use crate::models::list_models;
use crate::providers::{BackendKind, Route};
use crate::proxy::{self, FrameStream, ProxyOutcome, ResponseMode};
use crate::translate::unified::{EmbeddingRequest, ErrorResponse, UnifiedChatRequest};

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Model used for image generation when the request names none.
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-2";

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
const COMPLETIONS_PATH: &str = "/v1/completions";
const EMBEDDINGS_PATH: &str = "/v1/embeddings";
const IMAGE_GENERATIONS_PATH: &str = "/v1/images/generations";

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub client: reqwest::Client,
    pub journal: SharedJournal,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // The CORS layer answers every OPTIONS request itself.
    Router::new()
        .route(CHAT_COMPLETIONS_PATH, post(handle_chat_completions))
        .route(COMPLETIONS_PATH, post(handle_completions))
        .route(EMBEDDINGS_PATH, post(handle_embeddings))
        .route(IMAGE_GENERATIONS_PATH, post(handle_image_generations))
        .route("/v1/models", get(handle_models))
        .route("/health", get(handle_health))
        .fallback(handle_fallback)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Extract the client's key from `Authorization`, dropping a `Bearer ` prefix.
///
/// # Errors
/// Returns `GatewayError::Unauthenticated` when the header is absent or empty.
pub fn bearer_key(headers: &HeaderMap) -> Result<String> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .ok_or(GatewayError::Unauthenticated)?;
    let key = value.strip_prefix("Bearer ").unwrap_or(value).trim();

    if key.is_empty() {
        return Err(GatewayError::Unauthenticated);
    }
    Ok(key.to_string())
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    if body.is_empty() {
        return Err(GatewayError::invalid_request("Request body is required"));
    }
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::invalid_request(format!("Invalid request body: {e}")))
}

/// What the journal learns about one proxied request as it is handled.
struct Exchange {
    journal: SharedJournal,
    route: &'static str,
    model: String,
    backend: Option<BackendKind>,
    started: Instant,
}

impl Exchange {
    fn new(journal: &SharedJournal, route: &'static str) -> Self {
        Self {
            journal: journal.clone(),
            route,
            model: String::new(),
            backend: None,
            started: Instant::now(),
        }
    }

    fn record(&self, mode: ExchangeMode, status: u16, frames: Option<usize>) {
        let mut record = ExchangeRecord::new(self.route, self.model.as_str(), mode, status)
            .with_elapsed(self.started.elapsed());
        if let Some(kind) = self.backend {
            record = record.with_backend(kind.as_str());
        }
        if let Some(frames) = frames {
            record = record.with_frames(frames);
        }
        self.journal.record(record);
    }

    /// Render the handler result, journaling it. Streams are journaled once
    /// they end or the client goes away.
    fn respond(self, result: Result<ProxyOutcome>) -> Response {
        match result {
            Ok(ProxyOutcome::Json(value)) => {
                self.record(ExchangeMode::Json, 200, None);
                Json(value).into_response()
            }
            Ok(ProxyOutcome::Stream { frames, mode }) => {
                let mode = match mode {
                    ResponseMode::NativeStream => ExchangeMode::NativeStream,
                    ResponseMode::SynthesizedStream | ResponseMode::Json => {
                        ExchangeMode::SynthesizedStream
                    }
                };
                sse_response(counted(frames, StreamGuard { exchange: self, mode, frames: 0 }))
            }
            Err(e) => {
                let status = e.status_code();
                if status >= 500 {
                    tracing::error!(route = self.route, error = %e, "Request failed");
                } else {
                    tracing::warn!(route = self.route, status, error = %e, "Request rejected");
                }
                self.record(ExchangeMode::Rejected, status, None);
                error_response(e)
            }
        }
    }
}

struct StreamGuard {
    exchange: Exchange,
    mode: ExchangeMode,
    frames: usize,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.exchange.record(self.mode, 200, Some(self.frames));
    }
}

fn counted(
    mut frames: FrameStream,
    mut guard: StreamGuard,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static {
    async_stream::stream! {
        while let Some(item) = frames.next().await {
            if item.is_ok() {
                guard.frames += 1;
            }
            yield item;
        }
    }
}

fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static,
{
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Upstream rejections go back verbatim; everything else becomes an
/// OpenAI-shaped error body.
fn error_response(err: GatewayError) -> Response {
    match err {
        GatewayError::UpstreamRejected {
            status,
            body,
            content_type,
        } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut response = (status, body).into_response();
            if let Some(value) = content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
                response.headers_mut().insert(CONTENT_TYPE, value);
            }
            response
        }
        other => {
            let status =
                StatusCode::from_u16(other.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let body = ErrorResponse::new(other.error_type(), other.to_string());
            (status, Json(body)).into_response()
        }
    }
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut exchange = Exchange::new(&state.journal, CHAT_COMPLETIONS_PATH);
    let result = chat(&state, Route::ChatCompletions, &headers, &body, &mut exchange).await;
    exchange.respond(result)
}

async fn handle_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut exchange = Exchange::new(&state.journal, COMPLETIONS_PATH);
    let result = chat(&state, Route::Completions, &headers, &body, &mut exchange).await;
    exchange.respond(result)
}

async fn chat(
    state: &AppState,
    route: Route,
    headers: &HeaderMap,
    body: &[u8],
    exchange: &mut Exchange,
) -> Result<ProxyOutcome> {
    let api_key = bearer_key(headers)?;
    let mut req: UnifiedChatRequest = parse_body(body)?;
    req.model = state.config.requested_model(&req.model);
    exchange.model.clone_from(&req.model);

    let backend = state.config.resolve(&req.model, &api_key)?;
    exchange.backend = Some(backend.kind);

    tracing::debug!(
        model = %req.model,
        messages = req.messages.len(),
        stream = req.is_stream(),
        "Chat request"
    );

    proxy::proxy_chat(route, &req, &backend, state.config.pacing(), &state.client).await
}

async fn handle_embeddings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut exchange = Exchange::new(&state.journal, EMBEDDINGS_PATH);
    let result = embeddings(&state, &headers, &body, &mut exchange).await;
    exchange.respond(result)
}

async fn embeddings(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    exchange: &mut Exchange,
) -> Result<ProxyOutcome> {
    let api_key = bearer_key(headers)?;
    let req: EmbeddingRequest = parse_body(body)?;
    exchange.model = state
        .config
        .requested_model(req.model.as_deref().unwrap_or_default());

    let backend = state.config.resolve(&exchange.model, &api_key)?;
    exchange.backend = Some(backend.kind);

    proxy::proxy_embeddings(&req, &backend, &state.client)
        .await
        .map(ProxyOutcome::Json)
}

async fn handle_image_generations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut exchange = Exchange::new(&state.journal, IMAGE_GENERATIONS_PATH);
    let result = image_generations(&state, &headers, &body, &mut exchange).await;
    exchange.respond(result)
}

async fn image_generations(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    exchange: &mut Exchange,
) -> Result<ProxyOutcome> {
    let api_key = bearer_key(headers)?;
    let req: serde_json::Value = parse_body(body)?;
    exchange.model = req
        .get("model")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(DEFAULT_IMAGE_MODEL)
        .to_string();

    let mut backend = state.config.resolve(&exchange.model, &api_key)?;
    exchange.backend = Some(backend.kind);
    backend.api_version = Some(state.config.images.api_version.clone());

    proxy::proxy_image_generation(&req, &backend, state.config.poll_policy(), &state.client)
        .await
        .map(ProxyOutcome::Json)
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Response {
    Json(list_models(&state.config)).into_response()
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "exchanges": state.journal.len(),
    }))
}

async fn handle_fallback() -> Response {
    (StatusCode::NOT_FOUND, "404 Not Found").into_response()
}
