//! The `/v1/models` listing.
//!
//! Clients use this to discover what they can put in `model`. The list is
//! derived from the configured route table: one OpenAI-shaped model object per
//! routable model name.

use serde::Serialize;

use crate::config::GatewayConfig;

/// Creation timestamp reported for every listed model.
pub const MODEL_CREATED: i64 = 1_677_610_602;
const PERMISSION_CREATED: i64 = 1_679_602_088;

#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelObject>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelObject {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: String,
    pub permission: Vec<ModelPermission>,
    pub root: String,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelPermission {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub allow_create_engine: bool,
    pub allow_sampling: bool,
    pub allow_logprobs: bool,
    pub allow_search_indices: bool,
    pub allow_view: bool,
    pub allow_fine_tuning: bool,
    pub organization: &'static str,
    pub group: Option<String>,
    pub is_blocking: bool,
}

impl ModelPermission {
    fn sampling_only(model: &str) -> Self {
        Self {
            id: format!("modelperm-{model}"),
            object: "model_permission",
            created: PERMISSION_CREATED,
            allow_create_engine: false,
            allow_sampling: true,
            allow_logprobs: true,
            allow_search_indices: false,
            allow_view: true,
            allow_fine_tuning: false,
            organization: "*",
            group: None,
            is_blocking: false,
        }
    }
}

/// List every routable model, sorted by id. `owned_by` is the backend kind the
/// model is served from.
#[must_use]
pub fn list_models(config: &GatewayConfig) -> ModelList {
    let mut data: Vec<ModelObject> = config
        .models
        .iter()
        .filter_map(|(name, route)| {
            let entry = config.backends.get(&route.backend)?;
            Some(ModelObject {
                id: name.clone(),
                object: "model",
                created: MODEL_CREATED,
                owned_by: entry.kind.as_str().to_string(),
                permission: vec![ModelPermission::sampling_only(name)],
                root: name.clone(),
                parent: None,
            })
        })
        .collect();

    data.sort_by(|a, b| a.id.cmp(&b.id));

    ModelList {
        object: "list",
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_models_follow_route_table() {
        let config = GatewayConfig::from_toml(
            r#"
[backends.azure]
kind = "azure"
resource = "contoso"

[backends.gemini]
kind = "gemini"

[models]
"gpt-4" = { backend = "azure" }
"gemini-pro" = { backend = "gemini" }
"gpt-3.5-turbo" = { backend = "azure" }
"#,
        )
        .unwrap();

        let list = list_models(&config);
        let ids: Vec<&str> = list.data.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["gemini-pro", "gpt-3.5-turbo", "gpt-4"]);
        assert_eq!(list.data[0].owned_by, "gemini");
        assert_eq!(list.data[1].owned_by, "azure");

        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json["object"], "list");
        assert_eq!(json["data"][2]["created"], 1_677_610_602);
        assert_eq!(json["data"][2]["root"], "gpt-4");
        assert!(json["data"][2]["parent"].is_null());
        assert_eq!(json["data"][2]["permission"][0]["object"], "model_permission");
        assert_eq!(json["data"][2]["permission"][0]["organization"], "*");
    }

    #[test]
    fn test_empty_route_table() {
        let config = GatewayConfig::from_toml("").unwrap();
        assert!(list_models(&config).data.is_empty());
    }
}
