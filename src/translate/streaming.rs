//! Re-segmentation of upstream Server-Sent-Events streams.
//!
//! Upstream reads do not line up with event boundaries. The [`Reframer`]
//! accumulates bytes, decodes them incrementally (multi-byte characters split
//! across reads survive), and hands out one complete frame per `"\n\n"`
//! boundary. The [`FrameNormalizer`] then fills in the chunk fields OpenAI
//! clients expect before each frame is written downstream.
//!
//! Usage:
//!   let mut reframer = Reframer::new();
//!   for bytes in upstream_reads {
//!       for frame in reframer.push(&bytes) { /* forward */ }
//!   }
//!   let residual = reframer.finish();

use std::time::Duration;

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};

use super::unified::CHAT_COMPLETION_CHUNK_OBJECT;

pub const FRAME_DELIMITER: &str = "\n\n";
pub const DONE_SENTINEL: &str = "[DONE]";
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

const DATA_PREFIX: &str = "data:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReframerState {
    /// Nothing is buffered.
    Accumulating,
    /// A partial frame is waiting for its delimiter.
    Residual,
    /// The upstream ended; no further input is accepted.
    Closed,
}

/// UTF-8 decoder that carries an incomplete trailing sequence over to the next read.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        // Truncated sequence at the end: keep it for the next read.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        out
    }

    fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

/// Splits an SSE byte stream into complete frames.
#[derive(Debug)]
pub struct Reframer {
    decoder: Utf8Decoder,
    buffer: String,
    state: ReframerState,
}

impl Default for Reframer {
    fn default() -> Self {
        Self::new()
    }
}

impl Reframer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            decoder: Utf8Decoder::default(),
            buffer: String::new(),
            state: ReframerState::Accumulating,
        }
    }

    #[must_use]
    pub fn state(&self) -> ReframerState {
        self.state
    }

    /// Feed one upstream read. Returns every frame completed by it, in order,
    /// without the trailing delimiter.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        if self.state == ReframerState::Closed {
            return Vec::new();
        }

        let text = self.decoder.decode(bytes);
        self.buffer.push_str(&text);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find(FRAME_DELIMITER) {
            frames.push(self.buffer[..pos].to_string());
            self.buffer.drain(..pos + FRAME_DELIMITER.len());
        }

        self.state = if self.buffer.is_empty() {
            ReframerState::Accumulating
        } else {
            ReframerState::Residual
        };

        frames
    }

    /// Close the reframer. Returns the undelimited residual, if any; backends
    /// may omit the delimiter after their last event.
    pub fn finish(&mut self) -> Option<String> {
        if self.state == ReframerState::Closed {
            return None;
        }
        self.state = ReframerState::Closed;

        let tail = self.decoder.finish();
        self.buffer.push_str(&tail);
        let residual = std::mem::take(&mut self.buffer);

        if residual.trim().is_empty() {
            None
        } else {
            Some(residual)
        }
    }
}

/// Rewrites frames from an OpenAI-compatible upstream into well-formed chunks.
#[derive(Debug)]
pub struct FrameNormalizer {
    model: String,
    saw_done: bool,
    forwarded: usize,
}

impl FrameNormalizer {
    /// `model` is the model the client asked for, used when a chunk has none.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            saw_done: false,
            forwarded: 0,
        }
    }

    /// Normalize one frame into its downstream wire form (delimiter included).
    ///
    /// Returns `None` for blank frames and for `data:` frames whose payload is
    /// not valid JSON; the latter are logged and dropped.
    pub fn normalize(&mut self, frame: &str) -> Option<String> {
        if frame.trim().is_empty() {
            return None;
        }

        let Some(payload) = frame.strip_prefix(DATA_PREFIX).map(str::trim_start) else {
            // Comments, `event:` lines and the like carry nothing to normalize.
            self.forwarded += 1;
            return Some(format!("{frame}{FRAME_DELIMITER}"));
        };

        if payload.trim() == DONE_SENTINEL {
            self.saw_done = true;
            self.forwarded += 1;
            return Some(format!("{frame}{FRAME_DELIMITER}"));
        }

        let mut chunk: serde_json::Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, frame = %truncate(frame, 200), "Dropping malformed upstream frame");
                return None;
            }
        };

        normalize_chunk(&mut chunk, &self.model);
        self.forwarded += 1;
        Some(format!("data: {chunk}{FRAME_DELIMITER}"))
    }

    /// The done-sentinel frame, unless the upstream already sent one.
    #[must_use]
    pub fn terminator(&self) -> Option<&'static str> {
        if self.saw_done {
            None
        } else {
            Some(DONE_FRAME)
        }
    }

    /// Number of frames forwarded so far.
    #[must_use]
    pub fn forwarded(&self) -> usize {
        self.forwarded
    }
}

/// Fill in the chunk fields OpenAI clients rely on:
/// `choices[0].delta` exists, a `null` delta content reads as `""`,
/// `finish_reason` is present, and `model` and `object` are set.
pub fn normalize_chunk(chunk: &mut serde_json::Value, model: &str) {
    let Some(obj) = chunk.as_object_mut() else {
        return;
    };

    let choices = obj
        .entry("choices")
        .or_insert_with(|| serde_json::Value::Array(Vec::new()));
    if !choices.is_array() {
        *choices = serde_json::Value::Array(Vec::new());
    }
    if let Some(choices) = choices.as_array_mut() {
        if choices.is_empty() {
            choices.push(serde_json::json!({ "index": 0 }));
        }
        if !choices[0].is_object() {
            choices[0] = serde_json::json!({ "index": 0 });
        }
        if let Some(choice) = choices[0].as_object_mut() {
            let delta = choice
                .entry("delta")
                .or_insert_with(|| serde_json::json!({}));
            if !delta.is_object() {
                *delta = serde_json::json!({});
            }
            if let Some(content) = delta.get_mut("content") {
                if content.is_null() {
                    *content = serde_json::Value::String(String::new());
                }
            }
            choice
                .entry("finish_reason")
                .or_insert(serde_json::Value::Null);
        }
    }

    let has_model = obj
        .get("model")
        .and_then(serde_json::Value::as_str)
        .is_some_and(|m| !m.is_empty());
    if !has_model {
        obj.insert("model".to_string(), serde_json::Value::String(model.to_string()));
    }

    obj.entry("object")
        .or_insert_with(|| serde_json::Value::String(CHAT_COMPLETION_CHUNK_OBJECT.to_string()));
}

/// Inserts a fixed delay between successive writes.
#[derive(Debug)]
pub(crate) struct Pacer {
    delay: Duration,
    started: bool,
}

impl Pacer {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: false,
        }
    }

    /// Wait before a write. The first write goes out immediately.
    pub(crate) async fn wait(&mut self) {
        if self.started && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.started = true;
    }
}

/// Reframe and normalize an upstream SSE byte stream.
///
/// Each complete frame is yielded as soon as it is available. When the
/// upstream ends (or fails), the residual frame and the done-sentinel are
/// flushed and the stream closes. Dropping the returned stream drops the
/// upstream with it.
pub fn reframe_stream<S, E>(
    upstream: S,
    model: String,
    pacing: Duration,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut reframer = Reframer::new();
        let mut normalizer = FrameNormalizer::new(model);
        let mut pacer = Pacer::new(pacing);

        tokio::pin!(upstream);

        while let Some(chunk_result) = upstream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!(error = %e, "Upstream byte stream failed");
                    break;
                }
            };

            for frame in reframer.push(&chunk) {
                if let Some(out) = normalizer.normalize(&frame) {
                    pacer.wait().await;
                    yield Ok(Bytes::from(out));
                }
            }
        }

        if let Some(frame) = reframer.finish() {
            if let Some(out) = normalizer.normalize(&frame) {
                pacer.wait().await;
                yield Ok(Bytes::from(out));
            }
        }

        if let Some(done) = normalizer.terminator() {
            pacer.wait().await;
            yield Ok(Bytes::from_static(done.as_bytes()));
        }

        tracing::debug!(frames = normalizer.forwarded(), "Upstream stream closed");
    }
}

/// Cut `s` to at most `max` bytes without splitting a character.
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = concat!(
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hé\"},\"finish_reason\":null}]}\n\n",
        ": keep-alive\n\n",
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"llo 🌍\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );

    fn frames_for(chunks: &[&[u8]]) -> Vec<String> {
        let mut reframer = Reframer::new();
        let mut frames = Vec::new();
        for chunk in chunks {
            frames.extend(reframer.push(chunk));
        }
        frames.extend(reframer.finish());
        frames
    }

    #[test]
    fn test_frames_independent_of_chopping() {
        let bytes = STREAM.as_bytes();
        let whole = frames_for(&[bytes]);
        assert_eq!(whole.len(), 4);

        for size in 1..=bytes.len() {
            let pieces: Vec<&[u8]> = bytes.chunks(size).collect();
            assert_eq!(frames_for(&pieces), whole, "chunk size {size}");
        }

        // Every possible single split point, including inside multi-byte characters.
        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(frames_for(&[a, b]), whole, "split at {split}");
        }
    }

    #[test]
    fn test_state_transitions() {
        let mut reframer = Reframer::new();
        assert_eq!(reframer.state(), ReframerState::Accumulating);

        assert!(reframer.push(b"data: {\"a\":").is_empty());
        assert_eq!(reframer.state(), ReframerState::Residual);

        assert_eq!(reframer.push(b"1}\n\n"), vec!["data: {\"a\":1}"]);
        assert_eq!(reframer.state(), ReframerState::Accumulating);

        assert!(reframer.finish().is_none());
        assert_eq!(reframer.state(), ReframerState::Closed);
        assert!(reframer.push(b"data: late\n\n").is_empty());
    }

    #[test]
    fn test_residual_without_delimiter_is_emitted() {
        let mut reframer = Reframer::new();
        assert!(reframer.push(b"data: {\"last\":true}").is_empty());
        assert_eq!(reframer.finish().as_deref(), Some("data: {\"last\":true}"));
    }

    #[test]
    fn test_split_multibyte_character() {
        let snowman = "data: ☃\n\n".as_bytes();
        // ☃ is three bytes; split in the middle of it.
        let frames = frames_for(&[&snowman[..7], &snowman[7..8], &snowman[8..]]);
        assert_eq!(frames, vec!["data: ☃"]);
    }

    #[test]
    fn test_normalize_fills_missing_fields() {
        let mut normalizer = FrameNormalizer::new("gpt-3.5-turbo");
        let out = normalizer
            .normalize(r#"data: {"id":"x","choices":[]}"#)
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_str(out.strip_prefix("data: ").unwrap().trim_end()).unwrap();

        assert!(out.ends_with("\n\n"));
        assert_eq!(json["choices"][0]["delta"], serde_json::json!({}));
        assert!(json["choices"][0]["finish_reason"].is_null());
        assert_eq!(json["model"], "gpt-3.5-turbo");
        assert_eq!(json["object"], "chat.completion.chunk");
    }

    #[test]
    fn test_normalize_coerces_null_content_and_keeps_model() {
        let mut normalizer = FrameNormalizer::new("gpt-3.5-turbo");
        let out = normalizer
            .normalize(r#"data: {"model":"gpt-35-turbo","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"role":"assistant","content":null}}]}"#)
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_str(out.strip_prefix("data: ").unwrap().trim_end()).unwrap();

        assert_eq!(json["choices"][0]["delta"]["content"], "");
        assert_eq!(json["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(json["model"], "gpt-35-turbo");
    }

    #[test]
    fn test_normalize_adds_delta_to_choice_without_one() {
        let mut normalizer = FrameNormalizer::new("m");
        let out = normalizer
            .normalize(r#"data: {"choices":[{"index":0,"finish_reason":"stop"}]}"#)
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_str(out.strip_prefix("data: ").unwrap().trim_end()).unwrap();
        assert_eq!(json["choices"][0]["delta"], serde_json::json!({}));
        assert_eq!(json["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let mut normalizer = FrameNormalizer::new("m");
        assert!(normalizer.normalize("data: {not json").is_none());
        assert!(normalizer.normalize("").is_none());
        assert_eq!(normalizer.forwarded(), 0);
        assert_eq!(normalizer.terminator(), Some(DONE_FRAME));
    }

    #[test]
    fn test_done_is_forwarded_once() {
        let mut normalizer = FrameNormalizer::new("m");
        assert_eq!(normalizer.normalize("data: [DONE]").as_deref(), Some(DONE_FRAME));
        assert!(normalizer.terminator().is_none());
    }

    #[test]
    fn test_non_data_frames_pass_verbatim() {
        let mut normalizer = FrameNormalizer::new("m");
        assert_eq!(
            normalizer.normalize(": keep-alive").as_deref(),
            Some(": keep-alive\n\n")
        );
    }

    #[tokio::test]
    async fn test_stream_two_frames_in_three_fragments() {
        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
        )
        .as_bytes();
        let fragments: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::copy_from_slice(&body[..20])),
            Ok(Bytes::copy_from_slice(&body[20..90])),
            Ok(Bytes::copy_from_slice(&body[90..])),
        ];

        let out: Vec<Bytes> = reframe_stream(
            futures::stream::iter(fragments),
            "gpt-4".to_string(),
            Duration::ZERO,
        )
        .map(|r| r.unwrap())
        .collect()
        .await;

        assert_eq!(out.len(), 3);
        assert!(out[0].starts_with(b"data: {"));
        assert!(out[1].starts_with(b"data: {"));
        assert_eq!(&out[2][..], DONE_FRAME.as_bytes());
    }

    #[tokio::test]
    async fn test_stream_upstream_failure_still_terminates() {
        let fragments: Vec<std::result::Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[]}\n\ndata: {\"cho")),
            Err("connection reset".to_string()),
        ];

        let out: Vec<Bytes> = reframe_stream(
            futures::stream::iter(fragments),
            "gpt-4".to_string(),
            Duration::ZERO,
        )
        .map(|r| r.unwrap())
        .collect()
        .await;

        // The truncated residual is not valid JSON and is dropped.
        assert_eq!(out.len(), 2);
        assert_eq!(&out[1][..], DONE_FRAME.as_bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_between_frames() {
        let fragments: Vec<std::result::Result<Bytes, std::io::Error>> = vec![Ok(
            Bytes::from_static(b"data: {\"choices\":[]}\n\ndata: {\"choices\":[]}\n\n"),
        )];

        let started = tokio::time::Instant::now();
        let out: Vec<_> = reframe_stream(
            futures::stream::iter(fragments),
            "m".to_string(),
            Duration::from_millis(30),
        )
        .collect()
        .await;

        assert_eq!(out.len(), 3);
        // Two delays: before the second frame and before the terminator.
        assert_eq!(started.elapsed(), Duration::from_millis(60));
    }
}
