//! Error types for the gateway.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Missing Authorization header")]
    Unauthenticated,

    #[error("No backend is configured for model '{model}'")]
    UnroutableModel { model: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unsupported operation: {message}")]
    UnsupportedOperation { message: String },

    /// The backend answered with a non-success status. Status and body are
    /// handed back to the client untouched.
    #[error("Upstream returned status {status}")]
    UpstreamRejected {
        status: u16,
        body: String,
        content_type: Option<String>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GatewayError {
    pub fn unroutable(model: impl Into<String>) -> Self {
        Self::UnroutableModel {
            model: model.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    /// HTTP status the gateway answers with for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthenticated => 403,
            Self::UnroutableModel { .. } => 404,
            Self::InvalidRequest { .. } | Self::UnsupportedOperation { .. } | Self::Json(_) => 400,
            Self::UpstreamRejected { status, .. } => *status,
            Self::Config { .. } | Self::Io(_) | Self::Toml(_) => 500,
            Self::Provider { .. } | Self::Translation { .. } | Self::Http(_) => 502,
        }
    }

    /// OpenAI-style `error.type` string for the rendered error body.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "authentication_error",
            Self::UnroutableModel { .. }
            | Self::InvalidRequest { .. }
            | Self::UnsupportedOperation { .. }
            | Self::Json(_) => "invalid_request_error",
            Self::UpstreamRejected { .. }
            | Self::Provider { .. }
            | Self::Translation { .. }
            | Self::Http(_) => "upstream_error",
            Self::Config { .. } | Self::Io(_) | Self::Toml(_) => "server_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
