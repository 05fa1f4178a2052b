use crate::error::{GatewayError, Result};
use crate::polling::PollPolicy;
use crate::providers::BackendKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Model used when a request omits `model`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub backends: HashMap<String, BackendEntry>,
    #[serde(default)]
    pub models: HashMap<String, ModelRoute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Delay between successive frame writes, in milliseconds. Zero disables pacing.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            pacing_ms: default_pacing_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_images_api_version")]
    pub api_version: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_timeout_secs: default_poll_timeout_secs(),
            api_version: default_images_api_version(),
        }
    }
}

/// A named upstream as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendEntry {
    pub kind: BackendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Azure resource name; expands to `https://{resource}.openai.azure.com`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRoute {
    pub backend: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
}

/// Everything the translation core needs to reach one backend for one request.
/// Built per request by [`GatewayConfig::resolve`]; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub base_url: String,
    pub deployment: String,
    pub api_key: String,
    pub api_version: Option<String>,
}

fn default_port() -> u16 {
    3000
}

fn default_pacing_ms() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_poll_timeout_secs() -> u64 {
    60
}

fn default_images_api_version() -> String {
    "2023-06-01-preview".to_string()
}

impl GatewayConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(GatewayError::config(format!(
            "No config file found. Searched: {}",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Check that every model route names a defined backend and every backend
    /// has somewhere to send requests.
    pub fn validate(&self) -> Result<()> {
        for (name, entry) in &self.backends {
            Self::effective_base_url(name, entry)?;
        }

        for (model, route) in &self.models {
            if !self.backends.contains_key(&route.backend) {
                return Err(GatewayError::config(format!(
                    "Model '{}' routes to unknown backend '{}'",
                    model, route.backend
                )));
            }
        }

        Ok(())
    }

    /// Resolve the effective base URL (explicit URL, Azure resource, or preset default).
    pub fn effective_base_url(name: &str, entry: &BackendEntry) -> Result<String> {
        if let Some(ref url) = entry.base_url {
            return Ok(url.clone());
        }

        if entry.kind == BackendKind::Azure {
            return entry
                .resource
                .as_ref()
                .map(|r| format!("https://{r}.openai.azure.com"))
                .ok_or_else(|| {
                    GatewayError::config(format!(
                        "Azure backend '{name}' needs either `resource` or `base_url`"
                    ))
                });
        }

        entry
            .kind
            .preset()
            .base_url
            .map(String::from)
            .ok_or_else(|| GatewayError::config(format!("Backend '{name}' has no base_url")))
    }

    /// The model a request addresses, falling back to `default_model` when the
    /// client sent none.
    #[must_use]
    pub fn requested_model(&self, model: &str) -> String {
        if model.is_empty() {
            self.default_model.clone().unwrap_or_default()
        } else {
            model.to_string()
        }
    }

    /// Resolve a client-facing model name to a concrete backend.
    ///
    /// # Errors
    /// Returns `GatewayError::UnroutableModel` if no route exists for `model`.
    pub fn resolve(&self, model: &str, api_key: &str) -> Result<BackendConfig> {
        let route = self
            .models
            .get(model)
            .ok_or_else(|| GatewayError::unroutable(model))?;
        let entry = self.backends.get(&route.backend).ok_or_else(|| {
            GatewayError::config(format!("Unknown backend '{}'", route.backend))
        })?;
        let preset = entry.kind.preset();

        let deployment = route
            .deployment
            .clone()
            .or_else(|| entry.deployment.clone())
            .or_else(|| preset.default_deployment.map(String::from))
            .unwrap_or_else(|| model.to_string());

        Ok(BackendConfig {
            kind: entry.kind,
            base_url: Self::effective_base_url(&route.backend, entry)?,
            deployment,
            api_key: api_key.to_string(),
            api_version: entry
                .api_version
                .clone()
                .or_else(|| preset.default_api_version.map(String::from)),
        })
    }

    #[must_use]
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.stream.pacing_ms)
    }

    #[must_use]
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.images.poll_interval_ms),
            timeout: Duration::from_secs(self.images.poll_timeout_secs),
        }
    }
}

#[must_use]
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("openai-gateway.toml"));

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("openai-gateway").join("config.toml"));
    }
    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("openai-gateway").join("config.toml"));
        paths.push(home.join(".openai-gateway.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
port = 5000
default_model = "gpt-3.5-turbo"

[stream]
pacing_ms = 0

[backends.azure]
kind = "azure"
resource = "contoso"
deployment = "gpt-35-turbo-16k"

[backends.gemini]
kind = "gemini"

[backends.qwen]
kind = "qwen"

[models]
"gpt-3.5-turbo" = { backend = "azure", deployment = "gpt-35-turbo" }
"gpt-3.5-turbo-16k" = { backend = "azure" }
"gemini-pro" = { backend = "gemini" }
"qwen-max" = { backend = "qwen" }
"#;

    #[test]
    fn test_load_config() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "{SAMPLE}").unwrap();

        let config = GatewayConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.stream.pacing_ms, 0);
        assert_eq!(config.poll_policy(), PollPolicy::default());
        assert_eq!(config.pacing(), Duration::ZERO);
        assert_eq!(config.backends.len(), 3);
        assert_eq!(config.models.len(), 4);
    }

    #[test]
    fn test_resolve_prefers_route_deployment() {
        let config = GatewayConfig::from_toml(SAMPLE).unwrap();

        let b = config.resolve("gpt-3.5-turbo", "k1").unwrap();
        assert_eq!(b.kind, BackendKind::Azure);
        assert_eq!(b.base_url, "https://contoso.openai.azure.com");
        assert_eq!(b.deployment, "gpt-35-turbo");
        assert_eq!(b.api_key, "k1");
        assert_eq!(b.api_version.as_deref(), Some("2023-05-15"));

        let b = config.resolve("gpt-3.5-turbo-16k", "k1").unwrap();
        assert_eq!(b.deployment, "gpt-35-turbo-16k");
    }

    #[test]
    fn test_resolve_uses_preset_defaults() {
        let config = GatewayConfig::from_toml(SAMPLE).unwrap();

        let gemini = config.resolve("gemini-pro", "k").unwrap();
        assert_eq!(gemini.base_url, "https://generativelanguage.googleapis.com/v1");
        assert_eq!(gemini.deployment, "gemini-pro");

        // Qwen has no default deployment: the client model name is used.
        let qwen = config.resolve("qwen-max", "k").unwrap();
        assert_eq!(qwen.deployment, "qwen-max");
    }

    #[test]
    fn test_unroutable_model() {
        let config = GatewayConfig::from_toml(SAMPLE).unwrap();
        assert!(matches!(
            config.resolve("gpt-5", "k"),
            Err(GatewayError::UnroutableModel { .. })
        ));
    }

    #[test]
    fn test_requested_model_default() {
        let config = GatewayConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.requested_model(""), "gpt-3.5-turbo");
        assert_eq!(config.requested_model("gemini-pro"), "gemini-pro");
    }

    #[test]
    fn test_validate_rejects_dangling_route() {
        let err = GatewayConfig::from_toml(
            r#"
[models]
"gpt-4" = { backend = "missing" }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::Config { .. }));
    }

    #[test]
    fn test_validate_rejects_azure_without_host() {
        let err = GatewayConfig::from_toml(
            r#"
[backends.azure]
kind = "azure"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("resource"));
    }
}
