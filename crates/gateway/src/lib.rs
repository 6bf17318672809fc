//! Core of the Tingly LLM gateway: rule-driven routing and load
//! balancing, protocol translation between the openai, anthropic and
//! google chat dialects, the streaming pipeline, adaptive endpoint
//! probing, and post-response usage accounting.
//!
//! The embedding server crate mounts [`client_router`] (the openai- and
//! anthropic-compatible surfaces) and [`management_router`] (the
//! JWT-protected administration surface) and owns everything else:
//! listeners, TLS, auth, logging.

use std::sync::Arc;

use config::Config;

pub mod balance;
pub mod context;
pub mod dialect;
pub mod error;
pub mod probe;
pub mod record;
pub mod route;
pub mod snapshot;
pub mod storage;
pub mod stream;
pub mod token_count;
pub mod unified;
pub mod upstream;
pub mod usage;

mod server;

pub use error::{AnthropicResult, GatewayError, GatewayResult as Result};
pub use server::{client_router, management_router};

use crate::{
    balance::{ErrorStreakHealth, LoadBalancer, RoundRobinRegistry},
    probe::AdaptiveProbe,
    record::Recorder,
    snapshot::ConfigStore,
    storage::{CapabilityRepository, UsageRepository},
    upstream::{ClientPool, Forwarder},
    usage::{StatsRegistry, UsageTracker},
};

/// Consecutive upstream failures before a service is considered
/// unhealthy and filtered from selection.
const UNHEALTHY_AFTER_FAILURES: u32 = 3;

/// Shared state of the gateway: configuration snapshots plus every
/// long-lived subsystem.
pub struct Gateway {
    /// Current configuration snapshot holder.
    pub config: ConfigStore,
    /// Load balancer with its process-wide tactic registries.
    pub balancer: LoadBalancer,
    /// Failure-streak health tracking, consulted at selection time.
    pub health: Arc<ErrorStreakHealth>,
    /// Upstream dispatcher over the cached client pool.
    pub forwarder: Forwarder,
    /// Post-response accounting.
    pub tracker: Arc<UsageTracker>,
    /// Scenario recorder.
    pub recorder: Arc<Recorder>,
}

impl Gateway {
    /// Assemble a gateway over the given configuration and repositories.
    pub fn new(
        config: Config,
        usage_repository: Arc<dyn UsageRepository>,
        capability_repository: Arc<dyn CapabilityRepository>,
    ) -> Arc<Self> {
        let stats = Arc::new(StatsRegistry::new());
        let pool = Arc::new(ClientPool::new());
        let probe = Arc::new(AdaptiveProbe::new(capability_repository, Arc::clone(&pool)));
        let recorder = Recorder::new(config.gateway.recording.directory.clone());

        Arc::new(Gateway {
            config: ConfigStore::new(config),
            balancer: LoadBalancer::new(Arc::clone(&stats), Arc::new(RoundRobinRegistry::new())),
            health: Arc::new(ErrorStreakHealth::new(UNHEALTHY_AFTER_FAILURES)),
            forwarder: Forwarder::new(pool, probe),
            tracker: Arc::new(UsageTracker::new(stats, usage_repository)),
            recorder,
        })
    }

    /// Gateway over in-memory repositories; backs tests and single-node
    /// deployments without a database.
    pub fn in_memory(config: Config) -> Arc<Self> {
        Self::new(
            config,
            Arc::new(storage::MemoryUsageRepository::default()),
            Arc::new(storage::MemoryCapabilityRepository::default()),
        )
    }
}
