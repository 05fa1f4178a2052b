//! Built-in presets for the supported backend families.
//!
//! Each preset defines the default base URL, default deployment, and where the
//! client's API key goes on the upstream request. Users name a backend kind in
//! their config and the preset fills in whatever they leave out.

use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Azure,
    OpenAi,
    Gemini,
    Palm,
    Qwen,
}

impl BackendKind {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "azure" => Some(Self::Azure),
            "openai" => Some(Self::OpenAi),
            "gemini" => Some(Self::Gemini),
            "palm" => Some(Self::Palm),
            "qwen" => Some(Self::Qwen),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Azure => "azure",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Palm => "palm",
            Self::Qwen => "qwen",
        }
    }

    #[must_use]
    pub fn preset(self) -> &'static BackendPreset {
        PRESETS
            .iter()
            .find(|p| p.kind == self)
            .unwrap_or(&PRESETS[0])
    }
}

/// Where the client's key is placed on the upstream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    /// A named header carrying the bare key (`api-key: <key>`).
    Header(&'static str),
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// A query parameter (`?key=<key>`).
    Query(&'static str),
}

/// The gateway operation an upstream URL is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    ChatCompletions,
    Completions,
    Embeddings,
    ImageSubmit,
}

#[derive(Debug, Clone)]
pub struct BackendPreset {
    pub kind: BackendKind,
    pub base_url: Option<&'static str>,
    pub default_deployment: Option<&'static str>,
    pub default_api_version: Option<&'static str>,
    pub credential: Credential,
}

const PRESETS: &[BackendPreset] = &[
    BackendPreset {
        kind: BackendKind::Azure,
        base_url: None,
        default_deployment: None,
        default_api_version: Some("2023-05-15"),
        credential: Credential::Header("api-key"),
    },
    BackendPreset {
        kind: BackendKind::OpenAi,
        base_url: Some("https://api.openai.com/v1"),
        default_deployment: None,
        default_api_version: None,
        credential: Credential::Bearer,
    },
    BackendPreset {
        kind: BackendKind::Gemini,
        base_url: Some("https://generativelanguage.googleapis.com/v1"),
        default_deployment: Some("gemini-pro"),
        default_api_version: None,
        credential: Credential::Query("key"),
    },
    BackendPreset {
        kind: BackendKind::Palm,
        base_url: Some("https://generativelanguage.googleapis.com/v1beta2"),
        default_deployment: Some("chat-bison-001"),
        default_api_version: None,
        credential: Credential::Query("key"),
    },
    BackendPreset {
        kind: BackendKind::Qwen,
        base_url: Some("https://dashscope.aliyuncs.com/api/v1/services"),
        default_deployment: None,
        default_api_version: None,
        credential: Credential::Bearer,
    },
];

impl BackendPreset {
    #[must_use]
    pub fn all() -> &'static [BackendPreset] {
        PRESETS
    }
}

/// Build the upstream URL for `route` on `backend`. Credentials are not part
/// of the URL; see [`apply_credential`].
///
/// # Errors
/// Returns `GatewayError::UnsupportedOperation` when the backend family has no
/// equivalent of the route.
pub fn endpoint_url(backend: &BackendConfig, route: Route) -> Result<String> {
    let base = backend.base_url.trim_end_matches('/');
    let deployment = &backend.deployment;

    let url = match (backend.kind, route) {
        (BackendKind::Azure, Route::ImageSubmit) => format!(
            "{base}/openai/images/generations:submit?api-version={}",
            backend.api_version.as_deref().unwrap_or_default()
        ),
        (BackendKind::Azure, route) => format!(
            "{base}/openai/deployments/{deployment}/{}?api-version={}",
            openai_path(route)?,
            backend.api_version.as_deref().unwrap_or_default()
        ),
        (BackendKind::OpenAi, route) => format!("{base}/{}", openai_path(route)?),
        (BackendKind::Gemini, Route::ChatCompletions | Route::Completions) => {
            format!("{base}/models/{deployment}:generateContent")
        }
        (BackendKind::Palm, Route::ChatCompletions | Route::Completions) => {
            format!("{base}/models/{deployment}:generateMessage")
        }
        (BackendKind::Qwen, Route::ChatCompletions | Route::Completions) => {
            format!("{base}/aigc/text-generation/generation")
        }
        (BackendKind::Qwen, Route::Embeddings) => {
            format!("{base}/embeddings/text-embedding/text-embedding")
        }
        (kind, route) => {
            return Err(GatewayError::unsupported(format!(
                "{route:?} is not available on {} backends",
                kind.as_str()
            )))
        }
    };

    Ok(url)
}

fn openai_path(route: Route) -> Result<&'static str> {
    match route {
        Route::ChatCompletions => Ok("chat/completions"),
        Route::Completions => Ok("completions"),
        Route::Embeddings => Ok("embeddings"),
        Route::ImageSubmit => Err(GatewayError::unsupported(
            "image generation is only available on azure backends",
        )),
    }
}

/// Attach the backend's credential to an outgoing request.
#[must_use]
pub fn apply_credential(
    builder: reqwest::RequestBuilder,
    backend: &BackendConfig,
) -> reqwest::RequestBuilder {
    match backend.kind.preset().credential {
        Credential::Header(name) => builder.header(name, &backend.api_key),
        Credential::Bearer => builder.bearer_auth(&backend.api_key),
        Credential::Query(name) => builder.query(&[(name, backend.api_key.as_str())]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(kind: BackendKind, deployment: &str) -> BackendConfig {
        BackendConfig {
            kind,
            base_url: "https://example.test/".to_string(),
            deployment: deployment.to_string(),
            api_key: "secret".to_string(),
            api_version: kind.preset().default_api_version.map(String::from),
        }
    }

    #[test]
    fn test_known_kinds() {
        assert_eq!(BackendKind::from_name("Azure"), Some(BackendKind::Azure));
        assert_eq!(BackendKind::from_name("qwen"), Some(BackendKind::Qwen));
        assert!(BackendKind::from_name("cohere").is_none());
        for preset in BackendPreset::all() {
            assert_eq!(preset.kind.preset().kind, preset.kind);
        }
    }

    #[test]
    fn test_azure_urls() {
        let b = backend(BackendKind::Azure, "gpt-35-turbo");
        assert_eq!(
            endpoint_url(&b, Route::ChatCompletions).unwrap(),
            "https://example.test/openai/deployments/gpt-35-turbo/chat/completions?api-version=2023-05-15"
        );
        assert_eq!(
            endpoint_url(&b, Route::Completions).unwrap(),
            "https://example.test/openai/deployments/gpt-35-turbo/completions?api-version=2023-05-15"
        );
    }

    #[test]
    fn test_google_urls_carry_no_key() {
        let gemini = backend(BackendKind::Gemini, "gemini-pro");
        assert_eq!(
            endpoint_url(&gemini, Route::ChatCompletions).unwrap(),
            "https://example.test/models/gemini-pro:generateContent"
        );

        let palm = backend(BackendKind::Palm, "chat-bison-001");
        assert_eq!(
            endpoint_url(&palm, Route::Completions).unwrap(),
            "https://example.test/models/chat-bison-001:generateMessage"
        );
    }

    #[test]
    fn test_unsupported_routes() {
        let gemini = backend(BackendKind::Gemini, "gemini-pro");
        assert!(matches!(
            endpoint_url(&gemini, Route::Embeddings),
            Err(GatewayError::UnsupportedOperation { .. })
        ));

        let openai = backend(BackendKind::OpenAi, "");
        assert!(endpoint_url(&openai, Route::ImageSubmit).is_err());
    }

    #[test]
    fn test_credential_placement() {
        assert_eq!(
            BackendKind::Azure.preset().credential,
            Credential::Header("api-key")
        );
        assert_eq!(BackendKind::Gemini.preset().credential, Credential::Query("key"));
        assert_eq!(BackendKind::Palm.preset().credential, Credential::Query("key"));
        assert_eq!(BackendKind::Qwen.preset().credential, Credential::Bearer);
    }
}
