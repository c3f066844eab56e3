//! Virtual model synthesis and dispatch.
//!
//! Clients see one flat model list; some entries are synthesized on top of
//! the configured ids and only exist inside the gateway:
//!
//! - `<id>-search` attaches the upstream search tool,
//! - `<id>:non-thinking` zeroes the thinking budget,
//! - `[v]<id>` routes to the Vertex backend.
//!
//! One synthesis function feeds both the `/v1/models` listing and request
//! validation, so the two can never drift apart.

use std::sync::LazyLock;

use config::LlmConfig;
use regex::Regex;

use crate::error::LlmError;
use crate::messages::openai::{Model, ModelsResponse, ObjectType};

/// Prefix marking models served by the alternate backend.
pub(crate) const VERTEX_PREFIX: &str = "[v]";

const SEARCH_SUFFIX: &str = "-search";
const NON_THINKING_SUFFIX: &str = ":non-thinking";

/// Model family marker whose members get a `:non-thinking` variant.
const NON_THINKING_MARKER: &str = "2.5-flash-preview";

/// Families versioned 2.x and later are search-capable.
static SEARCH_ELIGIBLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]*-[2-9]\.\d").expect("search regex is valid"));

/// Backend a request is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Backend {
    /// The direct Gemini API under the key pool.
    Direct,
    /// Vertex AI under service-account credentials.
    Vertex,
}

/// A fully resolved dispatch target for one requested model id.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedModel {
    /// The id the client asked for, echoed back in responses.
    pub requested: String,
    /// The id sent upstream, markers stripped.
    pub upstream_model: String,
    pub backend: Backend,
    /// Zeroed for `:non-thinking` dispatch.
    pub thinking_budget: Option<i32>,
    /// Set for `-search` dispatch.
    pub web_search: bool,
    /// Whether the model family accepts a dedicated system instruction.
    pub system_instruction: bool,
}

struct CatalogEntry {
    id: String,
    resolved: ResolvedModel,
}

/// Synthesizes the full virtual catalog from the persistent model config.
///
/// Recomputed on every call; caching belongs to the config layer, not here.
fn entries(config: &LlmConfig) -> Vec<CatalogEntry> {
    let mut entries = Vec::new();

    for (id, settings) in &config.models {
        let base = |requested: &str| ResolvedModel {
            requested: requested.to_string(),
            upstream_model: id.clone(),
            backend: Backend::Direct,
            thinking_budget: None,
            web_search: false,
            system_instruction: settings.system_instruction,
        };

        entries.push(CatalogEntry {
            id: id.clone(),
            resolved: base(id),
        });

        if config.features.web_search && SEARCH_ELIGIBLE.is_match(id) && !id.ends_with(SEARCH_SUFFIX) {
            let virtual_id = format!("{id}{SEARCH_SUFFIX}");
            entries.push(CatalogEntry {
                resolved: ResolvedModel {
                    web_search: true,
                    ..base(&virtual_id)
                },
                id: virtual_id,
            });
        }

        if id.contains(NON_THINKING_MARKER) && !id.ends_with(NON_THINKING_SUFFIX) {
            let virtual_id = format!("{id}{NON_THINKING_SUFFIX}");
            entries.push(CatalogEntry {
                resolved: ResolvedModel {
                    thinking_budget: Some(0),
                    ..base(&virtual_id)
                },
                id: virtual_id,
            });
        }
    }

    if config.vertex.enabled {
        for id in &config.vertex.models {
            let virtual_id = format!("{VERTEX_PREFIX}{id}");
            entries.push(CatalogEntry {
                resolved: ResolvedModel {
                    requested: virtual_id.clone(),
                    upstream_model: id.clone(),
                    backend: Backend::Vertex,
                    thinking_budget: None,
                    web_search: false,
                    system_instruction: true,
                },
                id: virtual_id,
            });
        }
    }

    entries
}

/// The OpenAI-shaped model listing for `GET /v1/models`.
pub(crate) fn models_response(config: &LlmConfig) -> ModelsResponse {
    let created = jiff::Timestamp::now().as_second();

    ModelsResponse {
        object: ObjectType::List,
        data: entries(config)
            .into_iter()
            .map(|entry| Model {
                id: entry.id,
                object: ObjectType::Model,
                created,
                owned_by: "google".to_string(),
            })
            .collect(),
    }
}

/// Resolves a requested model id against the synthesized catalog.
///
/// Ids outside the catalog are a client error, not a missing resource.
pub(crate) fn resolve(config: &LlmConfig, requested: &str) -> Result<ResolvedModel, LlmError> {
    entries(config)
        .into_iter()
        .find(|entry| entry.id == requested)
        .map(|entry| entry.resolved)
        .ok_or_else(|| LlmError::ModelNotAvailable(requested.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn llm_config(toml_str: &str) -> LlmConfig {
        #[derive(serde::Deserialize, Default)]
        #[serde(default)]
        struct Wrapper {
            llm: LlmConfig,
        }

        toml::from_str::<Wrapper>(toml_str).unwrap().llm
    }

    fn ids(config: &LlmConfig) -> Vec<String> {
        models_response(config).data.into_iter().map(|model| model.id).collect()
    }

    #[test]
    fn synthesizes_search_and_non_thinking_variants() {
        let config = llm_config(indoc! {r#"
            [llm.features]
            web_search = true

            [llm.models."gemini-2.5-flash-preview-05-20"]
            [llm.models."gemini-2.5-pro"]
            [llm.models."gemini-1.0-pro"]
        "#});

        insta::assert_debug_snapshot!(ids(&config), @r#"
        [
            "gemini-2.5-flash-preview-05-20",
            "gemini-2.5-flash-preview-05-20-search",
            "gemini-2.5-flash-preview-05-20:non-thinking",
            "gemini-2.5-pro",
            "gemini-2.5-pro-search",
            "gemini-1.0-pro",
        ]
        "#);
    }

    #[test]
    fn search_variants_require_the_feature_flag() {
        let config = llm_config(indoc! {r#"
            [llm.models."gemini-2.5-pro"]
        "#});

        assert_eq!(ids(&config), vec!["gemini-2.5-pro"]);
    }

    #[test]
    fn already_suffixed_ids_get_no_second_marker() {
        let config = llm_config(indoc! {r#"
            [llm.features]
            web_search = true

            [llm.models."gemini-2.5-flash-search"]
        "#});

        assert_eq!(ids(&config), vec!["gemini-2.5-flash-search"]);
    }

    #[test]
    fn vertex_models_are_prefixed_when_enabled() {
        let config = llm_config(indoc! {r#"
            [llm.vertex]
            enabled = true
            models = ["gemini-2.5-pro"]

            [llm.models."gemini-2.5-pro"]
        "#});

        assert_eq!(ids(&config), vec!["gemini-2.5-pro", "[v]gemini-2.5-pro"]);

        let resolved = resolve(&config, "[v]gemini-2.5-pro").unwrap();
        assert_eq!(resolved.backend, Backend::Vertex);
        assert_eq!(resolved.upstream_model, "gemini-2.5-pro");
    }

    #[test]
    fn disabled_vertex_hides_its_models() {
        let config = llm_config(indoc! {r#"
            [llm.vertex]
            enabled = false
            models = ["gemini-2.5-pro"]

            [llm.models."gemini-2.5-pro"]
        "#});

        assert_eq!(ids(&config), vec!["gemini-2.5-pro"]);
        assert!(resolve(&config, "[v]gemini-2.5-pro").is_err());
    }

    #[test]
    fn non_thinking_dispatch_strips_the_suffix_and_zeroes_the_budget() {
        let config = llm_config(indoc! {r#"
            [llm.models."gemini-2.5-flash-preview"]
        "#});

        let resolved = resolve(&config, "gemini-2.5-flash-preview:non-thinking").unwrap();

        assert_eq!(resolved.upstream_model, "gemini-2.5-flash-preview");
        assert_eq!(resolved.requested, "gemini-2.5-flash-preview:non-thinking");
        assert_eq!(resolved.thinking_budget, Some(0));
        assert_eq!(resolved.backend, Backend::Direct);
    }

    #[test]
    fn search_dispatch_strips_the_suffix_and_enables_search() {
        let config = llm_config(indoc! {r#"
            [llm.features]
            web_search = true

            [llm.models."gemini-2.5-pro"]
        "#});

        let resolved = resolve(&config, "gemini-2.5-pro-search").unwrap();

        assert_eq!(resolved.upstream_model, "gemini-2.5-pro");
        assert!(resolved.web_search);
    }

    #[test]
    fn unknown_models_are_rejected() {
        let config = llm_config(indoc! {r#"
            [llm.models."gemini-2.5-pro"]
        "#});

        let error = resolve(&config, "gpt-4o").unwrap_err();
        assert!(matches!(error, LlmError::ModelNotAvailable(_)));

        // The search variant exists only when the feature is on.
        assert!(resolve(&config, "gemini-2.5-pro-search").is_err());
    }

    #[test]
    fn system_instruction_flag_flows_through() {
        let config = llm_config(indoc! {r#"
            [llm.models."gemma-3-27b"]
            system_instruction = false
        "#});

        let resolved = resolve(&config, "gemma-3-27b").unwrap();
        assert!(!resolved.system_instruction);
    }
}
