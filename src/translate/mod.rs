//! Translation between the OpenAI wire protocol and each backend family.
//!
//! The core of the gateway: converts requests, responses and streams between
//! the unified (OpenAI-shaped) schema and the Gemini, PaLM and Qwen schemas.
//! Everything here except the stream drivers is pure (no I/O).

pub mod backend_types;
pub mod request;
pub mod response;
pub mod streaming;
pub mod synthesize;
pub mod unified;
