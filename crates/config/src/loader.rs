use std::{path::Path, sync::LazyLock};

use anyhow::{Context, bail};
use regex::Regex;
use serde::Deserialize;
use toml::Value;

use crate::Config;

static ENV_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*env\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex is valid")
});

pub(crate) fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration from {}", path.display()))?;

    let mut raw_config: Value = toml::from_str(&content)?;
    expand_env_placeholders(&mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate(&config)?;

    Ok(config)
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    if !config.llm.has_backends() {
        bail!(
            "No upstream backend configured. Provide at least one Gemini API key in \
             [llm.google] or enable the Vertex backend in [llm.vertex]."
        );
    }

    if config.llm.models.is_empty() && config.llm.vertex.models.is_empty() {
        bail!(
            "No models configured. Add at least one entry under [llm.models] \
             or list models in [llm.vertex]."
        );
    }

    if config.server.auth.clients.is_empty() {
        bail!(
            "No API clients configured. Add at least one entry under \
             [server.auth.clients] so requests can be authenticated."
        );
    }

    if config.llm.vertex.enabled && config.llm.vertex.access_token.is_none() {
        log::warn!("Vertex backend is enabled without an access token; upstream calls will be rejected");
    }

    Ok(())
}

/// Replaces `{{ env.NAME }}` placeholders in every string value of the
/// configuration with the value of the corresponding environment variable.
fn expand_env_placeholders(value: &mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => {
            if !ENV_PLACEHOLDER.is_match(s) {
                return Ok(());
            }

            let mut out = String::with_capacity(s.len());
            let mut last = 0;

            for captures in ENV_PLACEHOLDER.captures_iter(s) {
                let whole = captures.get(0).expect("capture 0 always present");
                let name = &captures[1];

                let Ok(resolved) = std::env::var(name) else {
                    bail!("environment variable '{name}' referenced in configuration is not set");
                };

                out.push_str(&s[last..whole.start()]);
                out.push_str(&resolved);
                last = whole.end();
            }

            out.push_str(&s[last..]);
            *s = out;
        }
        Value::Array(values) => {
            for value in values {
                expand_env_placeholders(value)?;
            }
        }
        Value::Table(map) => {
            for (_, value) in map.iter_mut() {
                expand_env_placeholders(value)?;
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}
