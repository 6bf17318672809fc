//! Configuration file loading and validation.

use std::{collections::HashSet, path::Path};

use anyhow::{Context, bail};

use crate::{Config, is_valid_scenario_tag};

/// Environment variable overriding the outbound proxy defaulted into
/// providers that declare none.
pub(crate) const PROXY_URL_ENV: &str = "TINGLY_PROXY_URL";

pub(crate) fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration from {}", path.display()))?;

    let mut config: Config = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse configuration from {}", path.display()))?;

    apply_default_proxy(&mut config);
    validate(&config)?;

    Ok(config)
}

fn apply_default_proxy(config: &mut Config) {
    let default_proxy = std::env::var(PROXY_URL_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| config.gateway.default_proxy_url.clone());

    let Some(proxy) = default_proxy else {
        return;
    };

    for provider in config.providers.iter_mut().filter(|p| p.proxy_url.is_none()) {
        log::debug!("Defaulting proxy for provider '{}'", provider.name);
        provider.proxy_url = Some(proxy.clone());
    }
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    let mut provider_ids = HashSet::new();

    for provider in &config.providers {
        if !provider_ids.insert(provider.uuid) {
            bail!("duplicate provider uuid {}", provider.uuid);
        }

        if provider.api_base.is_empty() {
            bail!("provider '{}' has an empty api_base", provider.name);
        }
    }

    for (tag, scenario) in &config.scenarios {
        if !is_valid_scenario_tag(tag) {
            bail!("invalid scenario tag '{tag}'");
        }

        let mut rule_models = HashSet::new();

        for rule in &scenario.rules {
            if !rule_models.insert(rule.request_model.as_str()) {
                bail!(
                    "scenario '{tag}' has duplicate rules for model '{}'",
                    rule.request_model
                );
            }

            if rule.services.is_empty() {
                bail!(
                    "rule '{}' in scenario '{tag}' has no services",
                    rule.request_model
                );
            }

            let mut service_ids = HashSet::new();

            for service in &rule.services {
                if !service_ids.insert(service.id.as_str()) {
                    bail!(
                        "rule '{}' in scenario '{tag}' has duplicate service id '{}'",
                        rule.request_model,
                        service.id
                    );
                }

                if config.provider(service.provider).is_none() {
                    bail!(
                        "service '{}' of rule '{}' references unknown provider {}",
                        service.id,
                        rule.request_model,
                        service.provider
                    );
                }
            }

            if let Some(current) = rule.current_service_id.as_deref()
                && !service_ids.contains(current)
            {
                bail!(
                    "rule '{}' current_service_id '{current}' is not one of its services",
                    rule.request_model
                );
            }

            for route in &rule.smart_routes {
                for id in &route.services {
                    if !service_ids.contains(id.as_str()) {
                        bail!(
                            "smart route of rule '{}' references unknown service '{id}'",
                            rule.request_model
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use std::io::Write;

    use super::*;

    const VALID: &str = indoc! {r#"
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
                        }
                    ]
                }
            }
        }
    "#};

    #[test]
    fn loads_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(VALID.as_bytes()).unwrap();

        let config = load(file.path()).unwrap();

        assert_eq!(config.providers.len(), 1);
        assert!(config.scenario("default").is_some());
    }

    #[test]
    fn rejects_dangling_service_provider() {
        let mut value: serde_json::Value = serde_json::from_str(VALID).unwrap();
        value["scenarios"]["default"]["rules"][0]["services"][0]["provider"] =
            "00000000-0000-0000-0000-000000000000".into();

        let config: Config = serde_json::from_value(value).unwrap();

        let error = validate(&config).unwrap_err().to_string();
        assert!(error.contains("unknown provider"), "{error}");
    }

    #[test]
    fn rejects_dangling_current_service_id() {
        let mut value: serde_json::Value = serde_json::from_str(VALID).unwrap();
        value["scenarios"]["default"]["rules"][0]["current_service_id"] = "missing".into();

        let config: Config = serde_json::from_value(value).unwrap();

        let error = validate(&config).unwrap_err().to_string();
        assert!(error.contains("current_service_id"), "{error}");
    }
}
