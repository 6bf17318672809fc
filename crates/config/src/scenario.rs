//! Scenario configuration: per-client-tool routing rules and behavior flags.

use serde::Deserialize;

use crate::rule::Rule;

/// Rules and flags for one scenario tag.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Behavior flags applied by the request pipeline.
    pub flags: ScenarioFlags,
    /// Routing rules, keyed by their `request_model`.
    pub rules: Vec<Rule>,
}

impl ScenarioConfig {
    /// Find the active rule whose request-model matches `model`.
    pub fn rule_for_model(&self, model: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.active && r.request_model == model)
    }
}

/// Per-scenario behavior flags.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioFlags {
    /// Suppress the usage chunk before the stream terminator.
    pub disable_stream_usage: bool,
    /// Merge consecutive same-role messages before forwarding.
    pub enable_compact: bool,
    /// Tap requests and streams into the scenario recorder.
    pub enable_recording: bool,
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn flags_default_off() {
        let scenario: ScenarioConfig = serde_json::from_str("{}").unwrap();

        assert!(!scenario.flags.disable_stream_usage);
        assert!(!scenario.flags.enable_compact);
        assert!(!scenario.flags.enable_recording);
    }

    #[test]
    fn rule_lookup_skips_inactive() {
        let scenario: ScenarioConfig = serde_json::from_str(indoc! {r#"
            {
                "flags": { "enable_compact": true },
                "rules": [
                    {
                        "uuid": "0bd58a1e-21b5-44a1-9f0f-2f54c256a225",
                        "request_model": "alpha",
                        "active": false,
                        "services": [
                            {
                                "id": "svc-1",
                                "provider": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
                                "model": "claude-3-5-haiku-latest"
                            }
                        ]
                    }
                ]
            }
        "#})
        .unwrap();

        assert!(scenario.flags.enable_compact);
        assert!(scenario.rule_for_model("alpha").is_none());
    }
}
