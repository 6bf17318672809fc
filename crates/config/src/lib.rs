//! Tingly configuration structures to map the tingly.json configuration.

#![deny(missing_docs)]

mod gateway;
mod loader;
mod provider;
mod rule;
mod scenario;
mod server;

use std::{collections::BTreeMap, path::Path};

pub use gateway::{GatewayConfig, ModelTemplate, RecordingConfig};
pub use provider::{Dialect, OauthDetail, ProviderConfig, ProviderCredential};
pub use rule::{Rule, Service, SmartMatcher, SmartRoute, TacticConfig, TimeWindow};
pub use scenario::{ScenarioConfig, ScenarioFlags};
use serde::Deserialize;
pub use server::{HealthConfig, ManagementConfig, ServerConfig};
use uuid::Uuid;

/// Main configuration structure for the Tingly gateway.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// Gateway behavior settings (token defaults, recording, templates).
    pub gateway: GatewayConfig,
    /// Upstream LLM provider accounts.
    pub providers: Vec<ProviderConfig>,
    /// Routing rules and behavior flags, partitioned by scenario.
    pub scenarios: BTreeMap<String, ScenarioConfig>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates cross-references: unique provider UUIDs, services pointing
    /// at existing providers, recognizable dialect/base-URL combinations.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }

    /// Look up a provider by UUID.
    pub fn provider(&self, uuid: Uuid) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.uuid == uuid)
    }

    /// Look up a scenario by its tag.
    pub fn scenario(&self, tag: &str) -> Option<&ScenarioConfig> {
        self.scenarios.get(tag)
    }

    /// Whether any enabled provider is configured.
    pub fn has_enabled_providers(&self) -> bool {
        self.providers.iter().any(|p| p.enabled)
    }
}

/// A scenario tag is a short opaque identifier carried in the request path.
///
/// Blank tags and tags with path-hostile characters are rejected; routing
/// treats a missing path segment as the `default` scenario instead.
pub fn is_valid_scenario_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= 64
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// The scenario used when the request path carries no scenario segment.
pub const DEFAULT_SCENARIO: &str = "default";

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;

    use crate::Config;

    #[test]
    fn defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert_debug_snapshot!(&config, @r#"
        Config {
            server: ServerConfig {
                listen_address: None,
                health: HealthConfig {
                    enabled: true,
                    path: "/health",
                },
                management: ManagementConfig {
                    enabled: false,
                    jwt_secret: None,
                },
            },
            gateway: GatewayConfig {
                default_max_tokens: 4096,
                max_tokens_ceiling: 32000,
                templates: {},
                recording: RecordingConfig {
                    directory: "recordings",
                },
                default_proxy_url: None,
            },
            providers: [],
            scenarios: {},
        }
        "#);
    }

    #[test]
    fn scenario_tags() {
        assert!(super::is_valid_scenario_tag("default"));
        assert!(super::is_valid_scenario_tag("claude_code"));
        assert!(super::is_valid_scenario_tag("tool-1"));
        assert!(!super::is_valid_scenario_tag(""));
        assert!(!super::is_valid_scenario_tag("a/b"));
        assert!(!super::is_valid_scenario_tag("white space"));
    }
}
