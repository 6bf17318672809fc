//! Health filtering for service selection.

use config::Service;
use dashmap::DashMap;
use uuid::Uuid;

/// External health verdict consulted by the balancer. Callers compose
/// whatever signals they track (provider enablement, failure streaks).
pub trait HealthFilter: Send + Sync {
    /// Whether the service may be selected right now.
    fn is_healthy(&self, service: &Service) -> bool;
}

/// Filter that never drops anything.
pub struct AlwaysHealthy;

impl HealthFilter for AlwaysHealthy {
    fn is_healthy(&self, _service: &Service) -> bool {
        true
    }
}

impl<F> HealthFilter for F
where
    F: Fn(&Service) -> bool + Send + Sync,
{
    fn is_healthy(&self, service: &Service) -> bool {
        self(service)
    }
}

/// Failure-streak tracker: a service is unhealthy after `threshold`
/// consecutive errors and recovers on the first success.
#[derive(Debug)]
pub struct ErrorStreakHealth {
    streaks: DashMap<(Uuid, String), u32>,
    threshold: u32,
}

impl ErrorStreakHealth {
    /// Create a tracker with the given consecutive-failure threshold.
    pub fn new(threshold: u32) -> Self {
        ErrorStreakHealth {
            streaks: DashMap::new(),
            threshold: threshold.max(1),
        }
    }

    /// Record a successful call for the (provider, model) key.
    pub fn record_success(&self, provider: Uuid, model: &str) {
        self.streaks.remove(&(provider, model.to_string()));
    }

    /// Record a failed call for the (provider, model) key.
    pub fn record_failure(&self, provider: Uuid, model: &str) {
        *self.streaks.entry((provider, model.to_string())).or_insert(0) += 1;
    }
}

impl HealthFilter for ErrorStreakHealth {
    fn is_healthy(&self, service: &Service) -> bool {
        self.streaks
            .get(&(service.provider, service.model.clone()))
            .map(|streak| *streak < self.threshold)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(provider: Uuid) -> Service {
        serde_json::from_value(serde_json::json!({
            "id": "svc",
            "provider": provider,
            "model": "m",
        }))
        .unwrap()
    }

    #[test]
    fn streak_crossing_threshold_marks_unhealthy() {
        let health = ErrorStreakHealth::new(3);
        let provider = Uuid::new_v4();
        let service = service(provider);

        health.record_failure(provider, "m");
        health.record_failure(provider, "m");
        assert!(health.is_healthy(&service));

        health.record_failure(provider, "m");
        assert!(!health.is_healthy(&service));

        health.record_success(provider, "m");
        assert!(health.is_healthy(&service));
    }
}
