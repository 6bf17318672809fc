//! Smart-routing predicate evaluation.
//!
//! Best-effort optimization, never a correctness gate: any anomaly logs
//! and yields `None`, which means "use normal routing".

use config::{Rule, Service, SmartMatcher};

use super::features::RequestFeatures;

/// Evaluate the rule's predicates in order; the first accepting matcher
/// yields its service subset. `None` means no predicate accepted (or one
/// referenced services that do not exist) and normal routing applies.
pub fn restrict_services(rule: &Rule, features: &RequestFeatures) -> Option<Vec<Service>> {
    for (position, route) in rule.smart_routes.iter().enumerate() {
        if !matcher_accepts(&route.matcher, features) {
            continue;
        }

        let mut services = Vec::with_capacity(route.services.len());

        for id in &route.services {
            match rule.service(id) {
                Some(service) => services.push(service.clone()),
                None => {
                    // Config drift between the route and its rule; fall
                    // through rather than fail the request.
                    log::warn!(
                        "Smart route {position} on rule '{}' references unknown service '{id}'",
                        rule.request_model
                    );
                    return None;
                }
            }
        }

        log::debug!(
            "Smart route {position} on rule '{}' restricted selection to {} service(s)",
            rule.request_model,
            services.len()
        );

        return Some(services);
    }

    None
}

fn matcher_accepts(matcher: &SmartMatcher, features: &RequestFeatures) -> bool {
    if let Some(min) = matcher.min_messages
        && features.message_count < min
    {
        return false;
    }

    if let Some(max) = matcher.max_messages
        && features.message_count > max
    {
        return false;
    }

    if let Some(tool) = &matcher.requires_tool
        && !features.tool_names.iter().any(|name| name == tool)
    {
        return false;
    }

    if let Some(hash) = &matcher.system_prompt_sha256
        && features.system_prompt_sha256.as_deref() != Some(hash.as_str())
    {
        return false;
    }

    if let Some(role) = &matcher.last_role
        && features.last_role.as_deref() != Some(role.as_str())
    {
        return false;
    }

    if let Some(min) = matcher.min_token_estimate
        && features.token_estimate < min
    {
        return false;
    }

    if let Some(max) = matcher.max_token_estimate
        && features.token_estimate > max
    {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(message_count: usize, tokens: u32, tools: &[&str]) -> RequestFeatures {
        RequestFeatures {
            message_count,
            tool_names: tools.iter().map(|t| t.to_string()).collect(),
            system_prompt_sha256: None,
            last_role: Some("user".to_string()),
            token_estimate: tokens,
        }
    }

    fn rule() -> Rule {
        serde_json::from_value(serde_json::json!({
            "uuid": "0bd58a1e-21b5-44a1-9f0f-2f54c256a224",
            "request_model": "gamma",
            "services": [
                { "id": "fast", "provider": "7c9e6679-7425-40de-944b-e07fc1f90ae7", "model": "small" },
                { "id": "big", "provider": "7c9e6679-7425-40de-944b-e07fc1f90ae7", "model": "large" }
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
        }))
        .unwrap()
    }

    #[test]
    fn first_accepting_matcher_wins() {
        let rule = rule();

        let short = restrict_services(&rule, &features(1, 100, &["code_interpreter"])).unwrap();
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].id, "fast");

        let tool_heavy = restrict_services(&rule, &features(10, 9000, &["code_interpreter"])).unwrap();
        assert_eq!(tool_heavy[0].id, "big");
    }

    #[test]
    fn no_match_falls_through() {
        let rule = rule();
        assert!(restrict_services(&rule, &features(10, 9000, &[])).is_none());
    }

    #[test]
    fn dangling_service_reference_falls_through() {
        let mut rule = rule();
        rule.smart_routes[0].services = vec!["missing".to_string()];

        assert!(restrict_services(&rule, &features(1, 100, &[])).is_none());
    }
}
