//! Turn a complete response into a synthetic chunk stream.
//!
//! Backends that cannot stream still get `stream=true` clients: the assembled
//! content is cut into pieces, each piece becomes one `chat.completion.chunk`
//! frame, and the done-sentinel closes the stream. Concatenating the pieces
//! always reproduces the original content exactly.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::Stream;

use super::response::FINISH_STOP;
use super::streaming::{Pacer, DONE_FRAME, FRAME_DELIMITER};
use super::unified::{ChunkDelta, UnifiedChatResponse, UnifiedChoice, CHAT_COMPLETION_CHUNK_OBJECT};

const PARAGRAPH_BREAK: &str = "\n\n";

/// How content is cut into chunk pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// Alternating runs of whitespace and non-whitespace.
    Whitespace,
    /// Paragraphs; each piece keeps its trailing blank line.
    Paragraph,
}

/// Split `content` into pieces whose concatenation is `content`.
#[must_use]
pub fn split_content(content: &str, granularity: Granularity) -> Vec<&str> {
    match granularity {
        Granularity::Paragraph => content.split_inclusive(PARAGRAPH_BREAK).collect(),
        Granularity::Whitespace => {
            let mut pieces = Vec::new();
            let mut start = 0;
            let mut in_space: Option<bool> = None;

            for (i, ch) in content.char_indices() {
                let space = ch.is_whitespace();
                if in_space.is_some_and(|prev| prev != space) {
                    pieces.push(&content[start..i]);
                    start = i;
                }
                in_space = Some(space);
            }
            if start < content.len() {
                pieces.push(&content[start..]);
            }

            pieces
        }
    }
}

/// Build the chunk sequence for `resp`'s first choice.
///
/// Only the last chunk carries `finish_reason: "stop"`. Empty content still
/// produces one (empty) chunk so the client sees a finish reason.
#[must_use]
pub fn synthesize_chunks(resp: &UnifiedChatResponse, granularity: Granularity) -> Vec<UnifiedChatResponse> {
    let index = resp.choices.first().map_or(0, |c| c.index);
    let mut pieces = split_content(resp.first_content(), granularity);
    if pieces.is_empty() {
        pieces.push("");
    }

    let last = pieces.len() - 1;
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| UnifiedChatResponse {
            id: resp.id.clone(),
            object: CHAT_COMPLETION_CHUNK_OBJECT.to_string(),
            created: resp.created,
            model: resp.model.clone(),
            choices: vec![UnifiedChoice {
                index,
                message: None,
                delta: Some(ChunkDelta {
                    role: Some("assistant".to_string()),
                    content: Some(piece.to_string()),
                }),
                finish_reason: (i == last).then(|| FINISH_STOP.to_string()),
                extra: HashMap::new(),
            }],
            usage: None,
            extra: HashMap::new(),
        })
        .collect()
}

/// Render chunks as SSE frames, followed by the done-sentinel.
#[must_use]
pub fn render_frames(chunks: &[UnifiedChatResponse]) -> Vec<String> {
    chunks
        .iter()
        .filter_map(|chunk| match serde_json::to_string(chunk) {
            Ok(json) => Some(format!("data: {json}{FRAME_DELIMITER}")),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize synthesized chunk");
                None
            }
        })
        .chain(std::iter::once(DONE_FRAME.to_string()))
        .collect()
}

/// Stream a complete response to a `stream=true` client as synthetic chunks.
pub fn synthesize_stream(
    resp: UnifiedChatResponse,
    granularity: Granularity,
    pacing: Duration,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static {
    let frames = render_frames(&synthesize_chunks(&resp, granularity));

    async_stream::stream! {
        let mut pacer = Pacer::new(pacing);
        for frame in frames {
            pacer.wait().await;
            yield Ok(Bytes::from(frame));
        }
    }
}
