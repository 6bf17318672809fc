//! Rule-driven load balancing across upstream services.
//!
//! `select_service` filters a rule's services down to active and healthy
//! candidates, then delegates to a pluggable tactic. Tactics are
//! instantiated per call from the rule's descriptor (parameters may change
//! under hot reload); their durable state lives in process-wide keyed
//! registries, so instantiation costs nothing and survives config edits.

mod health;
mod registry;
mod tactic;

use std::sync::Arc;

use config::{Rule, Service};
use dashmap::DashMap;
use uuid::Uuid;

pub use health::{AlwaysHealthy, ErrorStreakHealth, HealthFilter};
pub use registry::RoundRobinRegistry;
pub use tactic::Tactic;

use crate::{
    error::{GatewayError, GatewayResult},
    usage::StatsRegistry,
};

/// Load balancer over one rule's services.
pub struct LoadBalancer {
    stats: Arc<StatsRegistry>,
    round_robin: Arc<RoundRobinRegistry>,
    current: DashMap<Uuid, String>,
}

impl LoadBalancer {
    /// Create a balancer sharing the given stats registry.
    pub fn new(stats: Arc<StatsRegistry>, round_robin: Arc<RoundRobinRegistry>) -> Self {
        LoadBalancer {
            stats,
            round_robin,
            current: DashMap::new(),
        }
    }

    /// Select one service for the rule, or explain why none qualifies.
    ///
    /// The health filter is external; the caller composes provider-enabled
    /// checks with failure-streak tracking. The selection is remembered as
    /// the rule's current service.
    pub fn select_service(&self, rule: &Rule, health: &dyn HealthFilter) -> GatewayResult<Service> {
        if rule.services.is_empty() {
            return Err(GatewayError::RuleEmpty);
        }

        let active: Vec<&Service> = rule.active_services().collect();

        if active.is_empty() {
            return Err(GatewayError::NoActiveServices);
        }

        let mut healthy: Vec<&Service> = active
            .into_iter()
            .filter(|service| health.is_healthy(service))
            .collect();

        if healthy.is_empty() {
            return Err(GatewayError::NoHealthyServices);
        }

        // Deterministic base order for every tactic's tie-breaks.
        healthy.sort_by(|a, b| a.id.cmp(&b.id));

        let selected = if healthy.len() == 1 {
            healthy[0].clone()
        } else {
            let tactic = Tactic::from_config(&rule.tactic)?;
            tactic
                .select(rule.uuid, &healthy, &self.stats, &self.round_robin)
                .clone()
        };

        self.current.insert(rule.uuid, selected.id.clone());

        Ok(selected)
    }

    /// The service most recently selected for a rule, if any.
    pub fn current_service_id(&self, rule: Uuid) -> Option<String> {
        self.current.get(&rule).map(|entry| entry.value().clone())
    }

    /// Deprecated post-call stats hook, kept for call-site compatibility.
    /// Accounting happens in the usage tracker after the response.
    pub fn record_usage(&self, _provider: Uuid, _model: &str, _input_tokens: u32, _output_tokens: u32) {
        log::trace!("record_usage is a no-op; accounting moved to the usage tracker");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use config::TacticConfig;

    fn service(id: &str, weight: u32, active: bool) -> Service {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "provider": Uuid::new_v4(),
            "model": format!("model-{id}"),
            "weight": weight,
            "active": active,
        }))
        .unwrap()
    }

    fn rule_with(services: Vec<Service>, tactic: TacticConfig) -> Rule {
        Rule {
            uuid: Uuid::new_v4(),
            request_model: "alpha".to_string(),
            response_model: None,
            active: true,
            services,
            current_service_id: None,
            tactic,
            smart_routes: Vec::new(),
        }
    }

    fn balancer() -> LoadBalancer {
        LoadBalancer::new(Arc::new(StatsRegistry::new()), Arc::new(RoundRobinRegistry::new()))
    }

    #[test]
    fn empty_and_inactive_rules_error_distinctly() {
        let balancer = balancer();

        let empty = rule_with(Vec::new(), TacticConfig::default());
        assert!(matches!(
            balancer.select_service(&empty, &AlwaysHealthy),
            Err(GatewayError::RuleEmpty)
        ));

        let inactive = rule_with(vec![service("a", 1, false)], TacticConfig::default());
        assert!(matches!(
            balancer.select_service(&inactive, &AlwaysHealthy),
            Err(GatewayError::NoActiveServices)
        ));
    }

    #[test]
    fn unknown_tactic_is_reported() {
        let balancer = balancer();
        let rule = rule_with(
            vec![service("a", 1, true), service("b", 1, true)],
            serde_json::from_value(serde_json::json!({ "type": "least_latency" })).unwrap(),
        );

        assert!(matches!(
            balancer.select_service(&rule, &AlwaysHealthy),
            Err(GatewayError::UnknownTactic(t)) if t == "least_latency"
        ));
    }

    #[test]
    fn single_healthy_service_short_circuits_unknown_tactic() {
        let balancer = balancer();
        let rule = rule_with(
            vec![service("only", 1, true)],
            serde_json::from_value(serde_json::json!({ "type": "least_latency" })).unwrap(),
        );

        let selected = balancer.select_service(&rule, &AlwaysHealthy).unwrap();
        assert_eq!(selected.id, "only");
        assert_eq!(balancer.current_service_id(rule.uuid).as_deref(), Some("only"));
    }

    #[test]
    fn round_robin_distributes_evenly_over_two_cycles() {
        let balancer = balancer();
        let rule = rule_with(
            vec![service("a", 1, true), service("b", 1, true), service("c", 1, true)],
            TacticConfig::default(),
        );

        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..6 {
            let selected = balancer.select_service(&rule, &AlwaysHealthy).unwrap();
            *counts.entry(selected.id).or_default() += 1;
        }

        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|&count| count == 2), "{counts:?}");
    }

    #[test]
    fn round_robin_streak_repeats_before_advancing() {
        let balancer = balancer();
        let rule = rule_with(
            vec![service("a", 1, true), service("b", 1, true)],
            serde_json::from_value(serde_json::json!({ "type": "round_robin", "streak": 2 })).unwrap(),
        );

        let picks: Vec<String> = (0..6)
            .map(|_| balancer.select_service(&rule, &AlwaysHealthy).unwrap().id)
            .collect();

        assert_eq!(picks, ["a", "a", "b", "b", "a", "a"]);
    }

    #[test]
    fn unhealthy_services_are_skipped() {
        struct OnlyB;

        impl HealthFilter for OnlyB {
            fn is_healthy(&self, service: &Service) -> bool {
                service.id == "b"
            }
        }

        let balancer = balancer();
        let rule = rule_with(
            vec![service("a", 1, true), service("b", 1, true)],
            TacticConfig::default(),
        );

        for _ in 0..3 {
            assert_eq!(balancer.select_service(&rule, &OnlyB).unwrap().id, "b");
        }
    }

    #[test]
    fn token_based_prefers_most_headroom() {
        let stats = Arc::new(StatsRegistry::new());
        let balancer = LoadBalancer::new(stats.clone(), Arc::new(RoundRobinRegistry::new()));

        let a = service("a", 1, true);
        let b = service("b", 1, true);

        // Service a has burned most of its window budget.
        stats.record(a.provider, &a.model, 60, 0, 900);
        stats.record(b.provider, &b.model, 60, 0, 100);

        let rule = rule_with(
            vec![a, b.clone()],
            serde_json::from_value(serde_json::json!({ "type": "token_based", "capacity": 1000 })).unwrap(),
        );

        let selected = balancer.select_service(&rule, &AlwaysHealthy).unwrap();
        assert_eq!(selected.id, b.id);
    }

    #[test]
    fn hybrid_rejects_over_cap_services() {
        let stats = Arc::new(StatsRegistry::new());
        let balancer = LoadBalancer::new(stats.clone(), Arc::new(RoundRobinRegistry::new()));

        let a = service("a", 10, true);
        let b = service("b", 1, true);

        // Service a exceeded the request cap this window.
        for _ in 0..5 {
            stats.record(a.provider, &a.model, 60, 10, 10);
        }

        let rule = rule_with(
            vec![a, b.clone()],
            serde_json::from_value(
                serde_json::json!({ "type": "hybrid", "request_cap": 5, "token_cap": 100000 }),
            )
            .unwrap(),
        );

        for _ in 0..5 {
            assert_eq!(balancer.select_service(&rule, &AlwaysHealthy).unwrap().id, b.id);
        }
    }
}
