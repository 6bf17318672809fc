//! Pluggable load-balancing tactics.

use config::{Service, TacticConfig};
use rand::Rng;
use uuid::Uuid;

use crate::{
    error::{GatewayError, GatewayResult},
    usage::StatsRegistry,
};

use super::registry::RoundRobinRegistry;

/// A recognized tactic, instantiated per selection from the rule's
/// descriptor.
#[derive(Debug, Clone, Copy)]
pub enum Tactic {
    /// Rotate through the healthy set, repeating each service `streak`
    /// times before advancing.
    RoundRobin {
        /// Repeat count per service.
        streak: u32,
    },
    /// Pick the service farthest below its per-window output-token
    /// ceiling; tie-break by lowest request count, then service id.
    TokenBased {
        /// Output tokens allowed per service per window.
        capacity: u64,
    },
    /// Reject services over either cap this window; weighted random among
    /// the remainder.
    Hybrid {
        /// Requests allowed per service per window.
        request_cap: u64,
        /// Output tokens allowed per service per window.
        token_cap: u64,
    },
}

impl Tactic {
    /// Instantiate from a descriptor; unrecognized types are an error the
    /// caller surfaces as `unknown-tactic`.
    pub fn from_config(config: &TacticConfig) -> GatewayResult<Tactic> {
        match config.r#type.as_str() {
            "round_robin" => Ok(Tactic::RoundRobin {
                streak: config.streak.max(1),
            }),
            "token_based" => Ok(Tactic::TokenBased {
                capacity: config.capacity.unwrap_or(100_000),
            }),
            "hybrid" => Ok(Tactic::Hybrid {
                request_cap: config.request_cap.unwrap_or(u64::MAX),
                token_cap: config.token_cap.unwrap_or(u64::MAX),
            }),
            other => Err(GatewayError::UnknownTactic(other.to_string())),
        }
    }

    /// Pick one service from the healthy set. `services` is non-empty and
    /// sorted ascending by id, which anchors every tie-break.
    pub fn select<'a>(
        &self,
        rule: Uuid,
        services: &[&'a Service],
        stats: &StatsRegistry,
        round_robin: &RoundRobinRegistry,
    ) -> &'a Service {
        match *self {
            Tactic::RoundRobin { streak } => {
                let index = round_robin.next_index(rule, services.len(), streak);
                services[index]
            }

            Tactic::TokenBased { capacity } => services
                .iter()
                .min_by_key(|service| {
                    let (tokens, requests) = window_counters(stats, service);
                    // Least-consumed first: farthest below the ceiling wins.
                    (tokens.min(capacity), requests, service.id.clone())
                })
                .copied()
                .unwrap_or(services[0]),

            Tactic::Hybrid { request_cap, token_cap } => {
                let eligible: Vec<&Service> = services
                    .iter()
                    .filter(|service| {
                        let (tokens, requests) = window_counters(stats, service);
                        requests < request_cap && tokens < token_cap
                    })
                    .copied()
                    .collect();

                // Everything over cap this window: degrade to the full
                // healthy set rather than failing the request.
                let pool: &[&Service] = if eligible.is_empty() { services } else { &eligible };

                weighted_pick(pool)
            }
        }
    }
}

fn window_counters(stats: &StatsRegistry, service: &Service) -> (u64, u64) {
    stats
        .snapshot(service.provider, &service.model, service.window.seconds)
        .map(|s| (s.window_output_tokens, s.window_requests))
        .unwrap_or((0, 0))
}

fn weighted_pick<'a>(services: &[&'a Service]) -> &'a Service {
    let total: u64 = services.iter().map(|s| u64::from(s.weight)).sum();

    if total == 0 {
        return services[0];
    }

    let mut threshold = rand::rng().random_range(0..total);

    for service in services {
        let weight = u64::from(service.weight);
        if threshold < weight {
            return service;
        }
        threshold -= weight;
    }

    services[services.len() - 1]
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use super::*;

    fn service(id: &str, weight: u32) -> Service {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "provider": Uuid::new_v4(),
            "model": format!("model-{id}"),
            "weight": weight,
        }))
        .unwrap()
    }

    #[test]
    fn descriptor_parsing_covers_the_minimum_set() {
        let rr = TacticConfig::default();
        assert!(matches!(Tactic::from_config(&rr), Ok(Tactic::RoundRobin { streak: 1 })));

        let token: TacticConfig =
            serde_json::from_value(serde_json::json!({ "type": "token_based", "capacity": 500 })).unwrap();
        assert!(matches!(
            Tactic::from_config(&token),
            Ok(Tactic::TokenBased { capacity: 500 })
        ));

        let unknown: TacticConfig = serde_json::from_value(serde_json::json!({ "type": "sticky" })).unwrap();
        assert!(matches!(
            Tactic::from_config(&unknown),
            Err(GatewayError::UnknownTactic(t)) if t == "sticky"
        ));
    }

    #[test]
    fn token_based_ties_break_on_request_count_then_id() {
        let stats = Arc::new(StatsRegistry::new());
        let registry = RoundRobinRegistry::new();

        let a = service("a", 1);
        let b = service("b", 1);

        // Equal token consumption, b busier by request count.
        stats.record(a.provider, &a.model, 60, 0, 50);
        stats.record(b.provider, &b.model, 60, 0, 25);
        stats.record(b.provider, &b.model, 60, 0, 25);

        let tactic = Tactic::TokenBased { capacity: 1000 };
        let picked = tactic.select(Uuid::new_v4(), &[&a, &b], &stats, &registry);

        assert_eq!(picked.id, "a");
    }

    #[test]
    fn weighted_pick_respects_weights_statistically() {
        let heavy = service("heavy", 9);
        let light = service("light", 1);
        let services = [&heavy, &light];

        let mut counts: HashMap<&str, u32> = HashMap::new();
        for _ in 0..2000 {
            *counts.entry(weighted_pick(&services).id.as_str()).or_default() += 1;
        }

        let heavy_share = f64::from(counts["heavy"]) / 2000.0;
        assert!(heavy_share > 0.8, "heavy share was {heavy_share}");
    }

    #[test]
    fn weighted_pick_with_zero_weights_takes_first() {
        let a = service("a", 0);
        let b = service("b", 0);

        assert_eq!(weighted_pick(&[&a, &b]).id, "a");
    }
}
