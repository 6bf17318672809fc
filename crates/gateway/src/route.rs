//! Rule resolution: mapping (scenario, request-model) onto a routing rule,
//! with optional smart-routing restriction of the service list.

mod features;
mod smart;

use config::{Config, Rule, ScenarioConfig, Service, is_valid_scenario_tag};

pub use features::RequestFeatures;
pub use smart::restrict_services;

use crate::{
    error::{GatewayError, GatewayResult},
    unified::UnifiedRequest,
};

/// Resolve the scenario configuration for a path segment.
///
/// A missing segment means the `default` scenario; a blank or malformed
/// tag, or one with no configuration, is a client error.
pub fn resolve_scenario<'a>(config: &'a Config, tag: &str) -> GatewayResult<&'a ScenarioConfig> {
    if !is_valid_scenario_tag(tag) {
        return Err(GatewayError::InvalidScenario(tag.to_string()));
    }

    config
        .scenario(tag)
        .ok_or_else(|| GatewayError::InvalidScenario(tag.to_string()))
}

/// Resolve the active rule for a request model within a scenario.
pub fn resolve_rule<'a>(scenario: &'a ScenarioConfig, model: &str) -> GatewayResult<&'a Rule> {
    if model.is_empty() {
        return Err(GatewayError::MissingModel);
    }

    scenario
        .rule_for_model(model)
        .ok_or_else(|| GatewayError::RuleNotFound(model.to_string()))
}

/// The services the balancer should run over for this one call.
///
/// Smart routing is best-effort: the first accepting predicate restricts
/// the list, any failure falls through to the rule's full service list
/// with a structured log, never a user-visible error.
pub fn effective_services(rule: &Rule, request: &UnifiedRequest) -> Vec<Service> {
    if rule.smart_routes.is_empty() {
        return rule.services.clone();
    }

    let features = RequestFeatures::extract(request);

    match restrict_services(rule, &features) {
        Some(restricted) if !restricted.is_empty() => restricted,
        Some(_) => {
            log::warn!(
                "Smart route on rule '{}' matched but yielded no services; using normal routing",
                rule.request_model
            );
            rule.services.clone()
        }
        None => rule.services.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn config() -> Config {
        serde_json::from_str(indoc! {r#"
            {
                "providers": [
                    {
                        "uuid": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
                        "name": "main",
                        "dialect": "anthropic",
                        "api_base": "https://api.anthropic.com/v1",
                        "credential": { "api_key": "sk-test" }
                    }
                ],
                "scenarios": {
                    "default": {
                        "rules": [
                            {
                                "uuid": "0bd58a1e-21b5-44a1-9f0f-2f54c256a222",
                                "request_model": "alpha",
                                "services": [
                                    {
                                        "id": "svc-1",
                                        "provider": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
                                        "model": "claude-3-5-haiku-latest"
                                    }
                                ]
                            },
                            {
                                "uuid": "0bd58a1e-21b5-44a1-9f0f-2f54c256a223",
                                "request_model": "retired",
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
                }
            }
        "#})
        .unwrap()
    }

    #[test]
    fn unknown_or_blank_scenarios_are_client_errors() {
        let config = config();

        assert!(matches!(
            resolve_scenario(&config, ""),
            Err(GatewayError::InvalidScenario(_))
        ));
        assert!(matches!(
            resolve_scenario(&config, "nope"),
            Err(GatewayError::InvalidScenario(_))
        ));
        assert!(resolve_scenario(&config, "default").is_ok());
    }

    #[test]
    fn rule_resolution_honors_active_flag_and_model() {
        let config = config();
        let scenario = resolve_scenario(&config, "default").unwrap();

        assert!(resolve_rule(scenario, "alpha").is_ok());
        assert!(matches!(
            resolve_rule(scenario, "retired"),
            Err(GatewayError::RuleNotFound(_))
        ));
        assert!(matches!(resolve_rule(scenario, ""), Err(GatewayError::MissingModel)));
    }
}
