//! Adaptive endpoint probing.
//!
//! Answers, per (provider, model), whether the upstream should be called
//! on the chat-completions or the responses endpoint family. Verdicts are
//! cached in memory with a TTL, persisted through the capability
//! repository, and refreshed asynchronously: request paths never wait for
//! a probe.

use std::{sync::Arc, time::Duration};

use config::{Dialect, ProviderConfig};
use jiff::Timestamp;
use mini_moka::sync::Cache;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::{
    storage::CapabilityRepository,
    upstream::pool::ClientPool,
};

/// How long a verdict stays fresh.
pub const DEFAULT_CAPABILITY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// In-flight probe ceiling per provider, protecting upstreams from
/// accidental fan-out.
const MAX_PROBES_PER_PROVIDER: usize = 5;

/// Deadline of a single probe run, independent of any request context.
const PROBE_DEADLINE: Duration = Duration::from_secs(10);

/// Endpoint family verdict for one (provider, model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointFamily {
    /// Call chat completions.
    Chat,
    /// Call the responses endpoint.
    Responses,
    /// Neither endpoint answered; calls will fail fast.
    None,
}

/// Result of probing one endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// Whether the endpoint is usable (HTTP 200, or 429: a rate limit is
    /// proof the endpoint exists and authenticates).
    pub available: bool,
    /// Round-trip latency of the probe.
    pub latency_ms: u64,
    /// Terminal error of the probe, when it failed outright.
    pub error: Option<String>,
}

/// Cached verdict for one (provider, model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointCapability {
    /// Provider the verdict belongs to.
    pub provider: Uuid,
    /// Model the verdict belongs to.
    pub model: String,
    /// Chat-completions probe result.
    pub supports_chat: ProbeOutcome,
    /// Responses probe result.
    pub supports_responses: ProbeOutcome,
    /// The preferred endpoint family.
    pub preferred: EndpointFamily,
    /// When the verdict was produced.
    pub last_verified: Timestamp,
}

impl EndpointCapability {
    fn is_stale(&self, ttl: Duration) -> bool {
        let age = Timestamp::now().as_second() - self.last_verified.as_second();
        age >= ttl.as_secs() as i64
    }
}

/// Preference rule: responses when available, else chat, else none.
fn preferred_family(chat: &ProbeOutcome, responses: &ProbeOutcome) -> EndpointFamily {
    if responses.available {
        EndpointFamily::Responses
    } else if chat.available {
        EndpointFamily::Chat
    } else {
        EndpointFamily::None
    }
}

/// The adaptive prober.
pub struct AdaptiveProbe {
    cache: Cache<(Uuid, String), EndpointCapability>,
    repository: Arc<dyn CapabilityRepository>,
    pool: Arc<ClientPool>,
    permits: dashmap::DashMap<Uuid, Arc<Semaphore>>,
    ttl: Duration,
}

impl AdaptiveProbe {
    /// Create a prober with the default 24h TTL.
    pub fn new(repository: Arc<dyn CapabilityRepository>, pool: Arc<ClientPool>) -> Self {
        Self::with_ttl(repository, pool, DEFAULT_CAPABILITY_TTL)
    }

    /// Create a prober with a custom TTL.
    pub fn with_ttl(repository: Arc<dyn CapabilityRepository>, pool: Arc<ClientPool>, ttl: Duration) -> Self {
        AdaptiveProbe {
            cache: Cache::builder().time_to_live(ttl).build(),
            repository,
            pool,
            permits: dashmap::DashMap::new(),
            ttl,
        }
    }

    /// The endpoint family to use for (provider, model), without ever
    /// blocking on network.
    ///
    /// Anthropic and google dialect providers short-circuit to chat. For
    /// openai-style providers: a fresh cached verdict is authoritative; a
    /// stale durable verdict is served as-is while a refresh runs in the
    /// background; a full miss returns the conservative chat default and
    /// spawns a probe.
    pub async fn preferred_endpoint(self: &Arc<Self>, provider: &ProviderConfig, model: &str) -> EndpointFamily {
        if provider.dialect != Dialect::Openai {
            return EndpointFamily::Chat;
        }

        let key = (provider.uuid, model.to_string());

        if let Some(capability) = self.cache.get(&key) {
            return capability.preferred;
        }

        match self.repository.get(provider.uuid, model).await {
            Ok(Some(capability)) => {
                if capability.is_stale(self.ttl) {
                    log::debug!(
                        "Capability for {}/{model} is stale; serving it and refreshing",
                        provider.name
                    );
                    self.spawn_refresh(provider.clone(), model.to_string());
                } else {
                    self.cache.insert(key, capability.clone());
                }

                capability.preferred
            }
            Ok(None) => {
                log::debug!(
                    "No capability for {}/{model}; probing in the background, defaulting to chat",
                    provider.name
                );
                self.spawn_refresh(provider.clone(), model.to_string());

                EndpointFamily::Chat
            }
            Err(error) => {
                log::error!("Capability repository unavailable: {error}; defaulting to chat");
                EndpointFamily::Chat
            }
        }
    }

    /// Probe both endpoint families now and cache + persist the verdict.
    /// Bounded per provider; runs under its own deadline.
    pub async fn probe_now(self: &Arc<Self>, provider: &ProviderConfig, model: &str) -> anyhow::Result<EndpointCapability> {
        let semaphore = self
            .permits
            .entry(provider.uuid)
            .or_insert_with(|| Arc::new(Semaphore::new(MAX_PROBES_PER_PROVIDER)))
            .clone();

        let _permit = semaphore.acquire().await?;

        let client = self.pool.client(provider)?;

        let (chat, responses) = tokio::join!(
            probe_endpoint(&client, provider, model, EndpointFamily::Chat),
            probe_endpoint(&client, provider, model, EndpointFamily::Responses),
        );

        let capability = EndpointCapability {
            provider: provider.uuid,
            model: model.to_string(),
            preferred: preferred_family(&chat, &responses),
            supports_chat: chat,
            supports_responses: responses,
            last_verified: Timestamp::now(),
        };

        self.cache
            .insert((provider.uuid, model.to_string()), capability.clone());

        if let Err(error) = self.repository.upsert(capability.clone()).await {
            log::error!("Failed to persist endpoint capability: {error}");
        }

        Ok(capability)
    }

    /// Kick off a detached probe. Runs on its own root task with the probe
    /// deadline; it deliberately does not inherit the triggering request's
    /// lifetime, so the refresh survives the request ending.
    fn spawn_refresh(self: &Arc<Self>, provider: ProviderConfig, model: String) {
        let probe = Arc::clone(self);

        tokio::spawn(async move {
            match tokio::time::timeout(PROBE_DEADLINE, probe.probe_now(&provider, &model)).await {
                Ok(Ok(capability)) => {
                    log::debug!(
                        "Probe for {}/{model} finished: preferred={:?}",
                        provider.name,
                        capability.preferred
                    );
                }
                Ok(Err(error)) => {
                    log::warn!("Probe for {}/{model} failed: {error}", provider.name);
                }
                Err(_) => {
                    log::warn!("Probe for {}/{model} exceeded its deadline", provider.name);
                }
            }
        });
    }
}

async fn probe_endpoint(
    client: &reqwest::Client,
    provider: &ProviderConfig,
    model: &str,
    family: EndpointFamily,
) -> ProbeOutcome {
    let (url, body) = match family {
        EndpointFamily::Chat => (
            format!("{}/chat/completions", provider.api_base),
            serde_json::json!({
                "model": model,
                "messages": [{ "role": "user", "content": "ping" }],
                "max_tokens": 5,
            }),
        ),
        EndpointFamily::Responses => (
            format!("{}/responses", provider.api_base),
            serde_json::json!({
                "model": model,
                "input": [{ "role": "user", "content": "ping" }],
                "max_output_tokens": 5,
            }),
        ),
        EndpointFamily::None => return ProbeOutcome::default(),
    };

    let started = std::time::Instant::now();

    let result = client
        .post(&url)
        .bearer_auth(provider.credential.bearer().expose_secret())
        .json(&body)
        .timeout(PROBE_DEADLINE)
        .send()
        .await;

    let latency_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(response) => {
            let status = response.status().as_u16();
            let available = status == 200 || status == 429;

            ProbeOutcome {
                available,
                latency_ms,
                error: (!available).then(|| format!("status {status}")),
            }
        }
        Err(error) => ProbeOutcome {
            available: false,
            latency_ms,
            error: Some(error.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::{Json, Router, http::StatusCode, routing::post};
    use tokio::net::TcpListener;

    use super::*;
    use crate::storage::MemoryCapabilityRepository;

    async fn mock_upstream(chat_status: StatusCode, responses_status: StatusCode) -> (String, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));

        let chat_hits = hits.clone();
        let responses_hits = hits.clone();

        let app = Router::new()
            .route(
                "/v1/chat/completions",
                post(move || {
                    chat_hits.fetch_add(1, Ordering::SeqCst);
                    async move { (chat_status, Json(serde_json::json!({}))) }
                }),
            )
            .route(
                "/v1/responses",
                post(move || {
                    responses_hits.fetch_add(1, Ordering::SeqCst);
                    async move { (responses_status, Json(serde_json::json!({}))) }
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{address}/v1"), hits)
    }

    fn provider(base: &str) -> ProviderConfig {
        serde_json::from_value(serde_json::json!({
            "uuid": Uuid::new_v4(),
            "name": "probe-target",
            "dialect": "openai",
            "api_base": base,
            "credential": { "api_key": "sk-test" },
        }))
        .unwrap()
    }

    fn probe() -> Arc<AdaptiveProbe> {
        Arc::new(AdaptiveProbe::new(
            Arc::new(MemoryCapabilityRepository::default()),
            Arc::new(ClientPool::new()),
        ))
    }

    #[tokio::test]
    async fn chat_only_upstream_prefers_chat() {
        let (base, _) = mock_upstream(StatusCode::OK, StatusCode::NOT_FOUND).await;
        let provider = provider(&base);
        let probe = probe();

        let capability = probe.probe_now(&provider, "gpt-4o-mini").await.unwrap();

        assert!(capability.supports_chat.available);
        assert!(!capability.supports_responses.available);
        assert_eq!(capability.preferred, EndpointFamily::Chat);
    }

    #[tokio::test]
    async fn responses_wins_when_available() {
        let (base, _) = mock_upstream(StatusCode::OK, StatusCode::OK).await;
        let provider = provider(&base);
        let probe = probe();

        let capability = probe.probe_now(&provider, "gpt-4o-mini").await.unwrap();
        assert_eq!(capability.preferred, EndpointFamily::Responses);
    }

    #[tokio::test]
    async fn rate_limited_endpoint_counts_as_available() {
        let (base, _) = mock_upstream(StatusCode::TOO_MANY_REQUESTS, StatusCode::NOT_FOUND).await;
        let provider = provider(&base);
        let probe = probe();

        let capability = probe.probe_now(&provider, "gpt-4o-mini").await.unwrap();

        assert!(capability.supports_chat.available);
        assert_eq!(capability.preferred, EndpointFamily::Chat);
    }

    #[tokio::test]
    async fn cached_verdict_answers_without_network() {
        let (base, hits) = mock_upstream(StatusCode::OK, StatusCode::NOT_FOUND).await;
        let provider = provider(&base);
        let probe = probe();

        probe.probe_now(&provider, "gpt-4o-mini").await.unwrap();
        let hits_after_probe = hits.load(Ordering::SeqCst);

        for _ in 0..3 {
            let family = probe.preferred_endpoint(&provider, "gpt-4o-mini").await;
            assert_eq!(family, EndpointFamily::Chat);
        }

        assert_eq!(hits.load(Ordering::SeqCst), hits_after_probe);
    }

    #[tokio::test]
    async fn full_miss_defaults_to_chat_immediately() {
        let (base, _) = mock_upstream(StatusCode::OK, StatusCode::OK).await;
        let provider = provider(&base);
        let probe = probe();

        // First answer never waits for the probe.
        let family = probe.preferred_endpoint(&provider, "gpt-4o-mini").await;
        assert_eq!(family, EndpointFamily::Chat);
    }

    #[tokio::test]
    async fn non_openai_dialects_short_circuit_to_chat() {
        let probe = probe();
        let provider: ProviderConfig = serde_json::from_value(serde_json::json!({
            "uuid": Uuid::new_v4(),
            "name": "claude",
            "dialect": "anthropic",
            "api_base": "https://api.anthropic.com/v1",
            "credential": { "api_key": "sk-test" },
        }))
        .unwrap();

        assert_eq!(
            probe.preferred_endpoint(&provider, "claude-3-5-haiku-latest").await,
            EndpointFamily::Chat
        );
    }
}
