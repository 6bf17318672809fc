//! Gateway behavior settings: token defaults, model templates, recording.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Gateway-wide behavior settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Fill-in value when an anthropic-dialect upstream requires
    /// `max_tokens` and the client omitted it.
    pub default_max_tokens: u32,

    /// Hard ceiling applied when no template covers the model.
    pub max_tokens_ceiling: u32,

    /// Per-model templates, keyed by model name or name prefix.
    pub templates: BTreeMap<String, ModelTemplate>,

    /// Scenario recorder settings.
    pub recording: RecordingConfig,

    /// Proxy URL defaulted into providers that declare none. Overridden by
    /// the `TINGLY_PROXY_URL` environment variable at load time.
    pub default_proxy_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            default_max_tokens: 4096,
            max_tokens_ceiling: 32_000,
            templates: BTreeMap::new(),
            recording: RecordingConfig::default(),
            default_proxy_url: None,
        }
    }
}

impl GatewayConfig {
    /// Per-model output-token ceiling.
    ///
    /// Exact template match wins, then the longest matching name prefix,
    /// then the global ceiling.
    pub fn max_tokens_for_model(&self, model: &str) -> u32 {
        if let Some(template) = self.templates.get(model) {
            return template.max_tokens;
        }

        self.templates
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, template)| template.max_tokens)
            .unwrap_or(self.max_tokens_ceiling)
    }
}

/// Per-model template entry.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelTemplate {
    /// Maximum output tokens the model accepts.
    pub max_tokens: u32,
}

/// Scenario recorder settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecordingConfig {
    /// Directory recordings are written under, one file per request.
    pub directory: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        RecordingConfig {
            directory: "recordings".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn max_tokens_prefers_exact_then_longest_prefix() {
        let config: GatewayConfig = serde_json::from_str(indoc! {r#"
            {
                "templates": {
                    "claude-": { "max_tokens": 8192 },
                    "claude-3-7": { "max_tokens": 64000 },
                    "gpt-4o-mini": { "max_tokens": 16384 }
                }
            }
        "#})
        .unwrap();

        assert_eq!(config.max_tokens_for_model("gpt-4o-mini"), 16384);
        assert_eq!(config.max_tokens_for_model("claude-3-7-sonnet-latest"), 64000);
        assert_eq!(config.max_tokens_for_model("claude-3-5-haiku-latest"), 8192);
        assert_eq!(config.max_tokens_for_model("unknown"), 32000);
    }
}
