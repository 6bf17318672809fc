//! Management surface: provider, rule and scenario-flag CRUD, probe
//! triggers, stats and usage reads.
//!
//! Mutations edit the in-memory configuration snapshot; persisting the
//! configuration document back to disk is the embedding application's
//! concern. Responses never include credential material.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use config::{ProviderConfig, Rule, ScenarioFlags};

use crate::{
    Gateway,
    error::{GatewayError, GatewayResult},
    usage::UsageRecord,
};

fn provider_summary(provider: &ProviderConfig) -> Value {
    json!({
        "uuid": provider.uuid,
        "name": provider.name,
        "dialect": provider.dialect.to_string(),
        "api_base": provider.api_base,
        "proxy_url": provider.proxy_url,
        "timeout_secs": provider.timeout_secs,
        "enabled": provider.enabled,
    })
}

pub(super) async fn list_providers(State(gateway): State<Arc<Gateway>>) -> Json<Value> {
    let config = gateway.config.current();
    let providers: Vec<Value> = config.providers.iter().map(provider_summary).collect();

    Json(json!({ "providers": providers }))
}

pub(super) async fn create_provider(
    State(gateway): State<Arc<Gateway>>,
    Json(provider): Json<ProviderConfig>,
) -> GatewayResult<Response> {
    let config = gateway.config.current();

    if config.provider(provider.uuid).is_some() {
        return Err(GatewayError::InvalidRequest(format!(
            "provider {} already exists",
            provider.uuid
        )));
    }

    let summary = provider_summary(&provider);

    gateway.config.update(move |config| config.providers.push(provider));

    Ok((StatusCode::CREATED, Json(summary)).into_response())
}

pub(super) async fn update_provider(
    State(gateway): State<Arc<Gateway>>,
    Path(uuid): Path<Uuid>,
    Json(mut provider): Json<ProviderConfig>,
) -> GatewayResult<Json<Value>> {
    provider.uuid = uuid;

    let config = gateway.config.current();
    if config.provider(uuid).is_none() {
        return Err(GatewayError::InvalidRequest(format!("provider {uuid} not found")));
    }

    let summary = provider_summary(&provider);

    gateway.config.update(move |config| {
        if let Some(existing) = config.providers.iter_mut().find(|p| p.uuid == uuid) {
            *existing = provider;
        }
    });

    // Credential or proxy may have changed; cached clients are stale.
    gateway.forwarder.pool().remove_provider(uuid);

    Ok(Json(summary))
}

pub(super) async fn delete_provider(
    State(gateway): State<Arc<Gateway>>,
    Path(uuid): Path<Uuid>,
) -> GatewayResult<StatusCode> {
    let config = gateway.config.current();
    if config.provider(uuid).is_none() {
        return Err(GatewayError::InvalidRequest(format!("provider {uuid} not found")));
    }

    gateway.config.update(move |config| {
        config.providers.retain(|provider| provider.uuid != uuid);
    });

    gateway.forwarder.pool().remove_provider(uuid);

    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn list_rules(
    State(gateway): State<Arc<Gateway>>,
    Path(tag): Path<String>,
) -> GatewayResult<Json<Value>> {
    let config = gateway.config.current();
    let scenario = crate::route::resolve_scenario(&config, &tag)?;

    let rules: Vec<Value> = scenario
        .rules
        .iter()
        .map(|rule| serde_json::to_value(RuleView::from(rule)).unwrap_or_default())
        .collect();

    Ok(Json(json!({ "scenario": tag, "rules": rules })))
}

/// Outbound view of a rule; mirrors the config shape minus internals.
#[derive(serde::Serialize)]
struct RuleView {
    uuid: Uuid,
    request_model: String,
    response_model: Option<String>,
    active: bool,
    services: Vec<Value>,
    current_service_id: Option<String>,
    tactic: String,
}

impl From<&Rule> for RuleView {
    fn from(rule: &Rule) -> Self {
        RuleView {
            uuid: rule.uuid,
            request_model: rule.request_model.clone(),
            response_model: rule.response_model.clone(),
            active: rule.active,
            services: rule
                .services
                .iter()
                .map(|service| {
                    json!({
                        "id": service.id,
                        "provider": service.provider,
                        "model": service.model,
                        "weight": service.weight,
                        "active": service.active,
                        "prefer_completions": service.prefer_completions,
                    })
                })
                .collect(),
            current_service_id: rule.current_service_id.clone(),
            tactic: rule.tactic.r#type.clone(),
        }
    }
}

pub(super) async fn create_rule(
    State(gateway): State<Arc<Gateway>>,
    Path(tag): Path<String>,
    Json(rule): Json<Rule>,
) -> GatewayResult<Response> {
    if !config::is_valid_scenario_tag(&tag) {
        return Err(GatewayError::InvalidScenario(tag));
    }

    let config = gateway.config.current();

    if let Some(scenario) = config.scenario(&tag)
        && scenario.rules.iter().any(|r| r.request_model == rule.request_model)
    {
        return Err(GatewayError::InvalidRequest(format!(
            "rule for model '{}' already exists in scenario '{tag}'",
            rule.request_model
        )));
    }

    let view = serde_json::to_value(RuleView::from(&rule)).unwrap_or_default();

    gateway.config.update(move |config| {
        config.scenarios.entry(tag).or_default().rules.push(rule);
    });

    Ok((StatusCode::CREATED, Json(view)).into_response())
}

pub(super) async fn update_rule(
    State(gateway): State<Arc<Gateway>>,
    Path((tag, uuid)): Path<(String, Uuid)>,
    Json(mut rule): Json<Rule>,
) -> GatewayResult<Json<Value>> {
    rule.uuid = uuid;

    let config = gateway.config.current();
    let exists = config
        .scenario(&tag)
        .is_some_and(|scenario| scenario.rules.iter().any(|r| r.uuid == uuid));

    if !exists {
        return Err(GatewayError::InvalidRequest(format!(
            "rule {uuid} not found in scenario '{tag}'"
        )));
    }

    let view = serde_json::to_value(RuleView::from(&rule)).unwrap_or_default();

    gateway.config.update(move |config| {
        if let Some(scenario) = config.scenarios.get_mut(&tag)
            && let Some(existing) = scenario.rules.iter_mut().find(|r| r.uuid == uuid)
        {
            *existing = rule;
        }
    });

    Ok(Json(view))
}

pub(super) async fn delete_rule(
    State(gateway): State<Arc<Gateway>>,
    Path((tag, uuid)): Path<(String, Uuid)>,
) -> GatewayResult<StatusCode> {
    gateway.config.update(move |config| {
        if let Some(scenario) = config.scenarios.get_mut(&tag) {
            scenario.rules.retain(|rule| rule.uuid != uuid);
        }
    });

    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn update_flags(
    State(gateway): State<Arc<Gateway>>,
    Path(tag): Path<String>,
    Json(flags): Json<ScenarioFlags>,
) -> GatewayResult<Json<Value>> {
    if !config::is_valid_scenario_tag(&tag) {
        return Err(GatewayError::InvalidScenario(tag));
    }

    gateway.config.update({
        let tag = tag.clone();
        move |config| {
            config.scenarios.entry(tag).or_default().flags = flags;
        }
    });

    Ok(Json(json!({
        "scenario": tag,
        "flags": {
            "disable_stream_usage": flags.disable_stream_usage,
            "enable_compact": flags.enable_compact,
            "enable_recording": flags.enable_recording,
        }
    })))
}

pub(super) async fn run_probe(
    State(gateway): State<Arc<Gateway>>,
    Path((provider, model)): Path<(Uuid, String)>,
) -> GatewayResult<Json<Value>> {
    let config = gateway.config.current();

    let provider = config
        .provider(provider)
        .cloned()
        .ok_or_else(|| GatewayError::InvalidRequest(format!("provider {provider} not found")))?;

    let capability = gateway
        .forwarder
        .probe()
        .probe_now(&provider, &model)
        .await
        .map_err(|error| GatewayError::SubsystemUnavailable(format!("probe failed: {error}")))?;

    Ok(Json(serde_json::to_value(capability).unwrap_or_default()))
}

pub(super) async fn stats(State(gateway): State<Arc<Gateway>>) -> Json<Value> {
    let entries: Vec<Value> = gateway
        .tracker
        .stats()
        .all()
        .into_iter()
        .map(|((provider, model), stats)| {
            json!({
                "provider": provider,
                "model": model,
                "stats": stats,
            })
        })
        .collect();

    Json(json!({ "stats": entries }))
}

pub(super) async fn clear_stats(State(gateway): State<Arc<Gateway>>) -> StatusCode {
    gateway.tracker.stats().clear();
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub(super) struct UsageParams {
    #[serde(default = "default_usage_limit")]
    limit: usize,
}

fn default_usage_limit() -> usize {
    100
}

pub(super) async fn usage(
    State(gateway): State<Arc<Gateway>>,
    Query(params): Query<UsageParams>,
) -> GatewayResult<Json<Value>> {
    let records: Vec<UsageRecord> = gateway
        .tracker
        .recent(params.limit)
        .await
        .map_err(|error| GatewayError::SubsystemUnavailable(format!("usage store: {error}")))?;

    Ok(Json(json!({ "usage": records })))
}
