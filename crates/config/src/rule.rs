//! Routing rules: the binding from a client-visible model name to upstream
//! services and a load-balancing tactic.

use serde::Deserialize;
use uuid::Uuid;

/// A routing rule for one request-model within a scenario.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    /// Stable identifier; also keys the round-robin streak registry.
    pub uuid: Uuid,

    /// The external model name clients address.
    pub request_model: String,

    /// Optional label echoed back in responses instead of the upstream model.
    #[serde(default)]
    pub response_model: Option<String>,

    /// Inactive rules are invisible to routing.
    #[serde(default = "default_true")]
    pub active: bool,

    /// Candidate upstream services.
    pub services: Vec<Service>,

    /// Identifier of the most recently selected service. Stateful tactics
    /// read it, the balancer updates it in memory after each selection.
    #[serde(default)]
    pub current_service_id: Option<String>,

    /// Load-balancing tactic descriptor.
    #[serde(default)]
    pub tactic: TacticConfig,

    /// Ordered smart-routing predicates. The first matcher that accepts the
    /// request restricts the service list for that call only.
    #[serde(default)]
    pub smart_routes: Vec<SmartRoute>,
}

impl Rule {
    /// Services currently eligible by their own `active` flag.
    pub fn active_services(&self) -> impl Iterator<Item = &Service> {
        self.services.iter().filter(|s| s.active)
    }

    /// Find a service by its identifier.
    pub fn service(&self, id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }
}

/// One upstream (provider, model) choice contributing to a rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Service {
    /// Identifier unique within the rule, used for tie-breaking and
    /// smart-route references.
    pub id: String,

    /// UUID of the provider account.
    pub provider: Uuid,

    /// Upstream model name.
    pub model: String,

    /// Weight used by weighted-random selection.
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Inactive services are skipped by the balancer.
    #[serde(default = "default_true")]
    pub active: bool,

    /// Statistics window for this service.
    #[serde(default)]
    pub window: TimeWindow,

    /// Force the chat-completions endpoint family even when the adaptive
    /// probe prefers the responses family.
    #[serde(default)]
    pub prefer_completions: bool,
}

/// Width of the statistics window attached to a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeWindow {
    /// Window width in seconds.
    pub seconds: u64,
}

impl Default for TimeWindow {
    fn default() -> Self {
        // Per-minute caps are the norm for the token/hybrid tactics.
        TimeWindow { seconds: 60 }
    }
}

/// Load-balancing tactic descriptor: a type tag plus optional parameters.
///
/// Kept as a descriptor rather than a closed enum so an unrecognized type
/// surfaces as an `unknown-tactic` selection error instead of a config
/// parse failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TacticConfig {
    /// Tactic type: `round_robin`, `token_based` or `hybrid`.
    pub r#type: String,

    /// Round-robin: repeat the current service this many times before
    /// advancing.
    #[serde(default = "default_streak")]
    pub streak: u32,

    /// Token-based: per-window output-token ceiling per service.
    #[serde(default)]
    pub capacity: Option<u64>,

    /// Hybrid: per-window request ceiling per service.
    #[serde(default)]
    pub request_cap: Option<u64>,

    /// Hybrid: per-window output-token ceiling per service.
    #[serde(default)]
    pub token_cap: Option<u64>,
}

impl Default for TacticConfig {
    fn default() -> Self {
        TacticConfig {
            r#type: "round_robin".to_string(),
            streak: default_streak(),
            capacity: None,
            request_cap: None,
            token_cap: None,
        }
    }
}

/// One smart-routing predicate: a matcher over request features plus the
/// subset of services it routes to.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmartRoute {
    /// The matcher evaluated against the extracted request features.
    pub matcher: SmartMatcher,

    /// Service identifiers (within the same rule) this predicate yields.
    pub services: Vec<String>,
}

/// Feature matcher for smart routing. All present fields must hold.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SmartMatcher {
    /// Minimum message count, inclusive.
    pub min_messages: Option<usize>,
    /// Maximum message count, inclusive.
    pub max_messages: Option<usize>,
    /// A tool with this name must be declared in the request.
    pub requires_tool: Option<String>,
    /// Hex SHA-256 of the system prompt must equal this value.
    pub system_prompt_sha256: Option<String>,
    /// Role of the last message (`user`, `assistant`, `tool`).
    pub last_role: Option<String>,
    /// Minimum token-length estimate, inclusive.
    pub min_token_estimate: Option<u32>,
    /// Maximum token-length estimate, inclusive.
    pub max_token_estimate: Option<u32>,
}

fn default_true() -> bool {
    true
}

fn default_weight() -> u32 {
    1
}

fn default_streak() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn parse(json: &str) -> Rule {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn minimal_rule_gets_round_robin_defaults() {
        let rule = parse(indoc! {r#"
            {
                "uuid": "0bd58a1e-21b5-44a1-9f0f-2f54c256a222",
                "request_model": "alpha",
                "services": [
                    {
                        "id": "svc-1",
                        "provider": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
                        "model": "gpt-4o-mini"
                    }
                ]
            }
        "#});

        assert!(rule.active);
        assert_eq!(rule.tactic.r#type, "round_robin");
        assert_eq!(rule.tactic.streak, 1);
        assert_eq!(rule.services[0].weight, 1);
        assert_eq!(rule.services[0].window.seconds, 60);
        assert!(!rule.services[0].prefer_completions);
    }

    #[test]
    fn unknown_tactic_type_parses_as_descriptor() {
        // The balancer reports unknown-tactic at selection time; parsing
        // must not reject forward-compatible descriptors.
        let rule = parse(indoc! {r#"
            {
                "uuid": "0bd58a1e-21b5-44a1-9f0f-2f54c256a223",
                "request_model": "beta",
                "services": [
                    {
                        "id": "svc-1",
                        "provider": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
                        "model": "gpt-4o"
                    }
                ],
                "tactic": { "type": "least_latency" }
            }
        "#});

        assert_eq!(rule.tactic.r#type, "least_latency");
    }

    #[test]
    fn smart_routes_parse() {
        let rule = parse(indoc! {r#"
            {
                "uuid": "0bd58a1e-21b5-44a1-9f0f-2f54c256a224",
                "request_model": "gamma",
                "services": [
                    {
                        "id": "fast",
                        "provider": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
                        "model": "gpt-4o-mini"
                    },
                    {
                        "id": "big",
                        "provider": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
                        "model": "gpt-4o"
                    }
                ],
                "smart_routes": [
                    {
                        "matcher": { "max_messages": 2, "max_token_estimate": 500 },
                        "services": ["fast"]
                    },
                    {
                        "matcher": { "requires_tool": "code_interpreter" },
                        "services": ["big"]
                    }
                ]
            }
        "#});

        assert_eq!(rule.smart_routes.len(), 2);
        assert_eq!(rule.smart_routes[0].services, vec!["fast"]);
        assert_eq!(
            rule.smart_routes[1].matcher.requires_tool.as_deref(),
            Some("code_interpreter")
        );
    }
}
