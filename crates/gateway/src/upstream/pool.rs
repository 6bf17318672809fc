//! Cached, key-scoped upstream HTTP clients.
//!
//! One client per distinct upstream identity, amortizing TLS and
//! connection setup. The key embeds hashes of the credential and the
//! proxy URL: rotating a key or changing outbound policy forces a fresh
//! client instead of silently reusing the old transport.

use std::{
    collections::HashMap,
    sync::RwLock,
    time::Duration,
};

use config::{Dialect, ProviderConfig};
use http::{HeaderMap, HeaderValue};
use reqwest::Client;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Pool of upstream clients, one map per dialect family.
#[derive(Default)]
pub struct ClientPool {
    openai: RwLock<HashMap<String, Client>>,
    anthropic: RwLock<HashMap<String, Client>>,
    google: RwLock<HashMap<String, Client>>,
}

impl ClientPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached client for a provider, building one on first use.
    ///
    /// Read lock first; on a miss, upgrade to the write lock and check
    /// again before building, so concurrent first requests produce one
    /// client.
    pub fn client(&self, provider: &ProviderConfig) -> GatewayResult<Client> {
        let key = pool_key(provider);
        let family = self.family(provider.dialect);

        if let Some(client) = family.read().expect("client pool lock").get(&key) {
            return Ok(client.clone());
        }

        let mut map = family.write().expect("client pool lock");

        if let Some(client) = map.get(&key) {
            return Ok(client.clone());
        }

        let client = build_client(provider)?;
        map.insert(key, client.clone());

        Ok(client)
    }

    /// Atomically replace all maps with empty ones.
    pub fn clear(&self) {
        *self.openai.write().expect("client pool lock") = HashMap::new();
        *self.anthropic.write().expect("client pool lock") = HashMap::new();
        *self.google.write().expect("client pool lock") = HashMap::new();
    }

    /// Remove every cached client derived from a provider, across all
    /// credential and proxy variations it ever had.
    pub fn remove_provider(&self, provider: Uuid) {
        let prefix = format!("{provider}\u{1f}");

        for family in [&self.openai, &self.anthropic, &self.google] {
            family
                .write()
                .expect("client pool lock")
                .retain(|key, _| !key.starts_with(&prefix));
        }
    }

    fn family(&self, dialect: Dialect) -> &RwLock<HashMap<String, Client>> {
        match dialect {
            Dialect::Openai => &self.openai,
            Dialect::Anthropic => &self.anthropic,
            Dialect::Google => &self.google,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        [&self.openai, &self.anthropic, &self.google]
            .iter()
            .map(|family| family.read().expect("client pool lock").len())
            .sum()
    }
}

/// Cache key: provider uuid, api base, and 16 hex chars of the credential
/// and proxy hashes. Injective in (uuid, base, token, proxy).
fn pool_key(provider: &ProviderConfig) -> String {
    let token_hash = short_sha256(provider.credential.bearer().expose_secret());
    let proxy_hash = short_sha256(provider.proxy_url.as_deref().unwrap_or(""));

    format!(
        "{}\u{1f}{}\u{1f}{token_hash}\u{1f}{proxy_hash}",
        provider.uuid, provider.api_base
    )
}

fn short_sha256(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let hex = format!("{digest:x}");
    hex[..16].to_string()
}

fn build_client(provider: &ProviderConfig) -> GatewayResult<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(http::header::CONNECTION, HeaderValue::from_static("keep-alive"));

    if provider.dialect == Dialect::Anthropic {
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
    }

    // No client-level request timeout: streaming responses may
    // legitimately outlive any fixed ceiling. Unary calls set a per-request
    // timeout from the provider configuration.
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .default_headers(headers);

    builder = match outbound_proxy(provider) {
        Some(proxy) => builder.proxy(proxy),
        None => builder,
    };

    builder.build().map_err(|e| {
        log::error!(
            "Failed to build HTTP client for provider '{}': {e}",
            provider.name
        );
        GatewayError::InternalError(None)
    })
}

/// Wire the provider's outbound proxy when the scheme is supported;
/// unrecognized schemes log and fall back to a direct transport.
fn outbound_proxy(provider: &ProviderConfig) -> Option<reqwest::Proxy> {
    let url = provider.proxy_url.as_deref()?;

    let scheme = url.split("://").next().unwrap_or_default();

    match scheme {
        "http" | "https" | "socks5" | "socks5h" => match reqwest::Proxy::all(url) {
            Ok(proxy) => Some(proxy),
            Err(error) => {
                log::warn!(
                    "Invalid proxy URL '{url}' for provider '{}': {error}; using direct transport",
                    provider.name
                );
                None
            }
        },
        other => {
            log::warn!(
                "Unsupported proxy scheme '{other}' for provider '{}'; using direct transport",
                provider.name
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(uuid: Uuid, base: &str, key: &str, proxy: Option<&str>) -> ProviderConfig {
        serde_json::from_value(serde_json::json!({
            "uuid": uuid,
            "name": "p",
            "dialect": "openai",
            "api_base": base,
            "credential": { "api_key": key },
            "proxy_url": proxy,
        }))
        .unwrap()
    }

    #[test]
    fn keys_are_injective_in_all_four_components() {
        let uuid = Uuid::new_v4();
        let base = provider(uuid, "https://a.example/v1", "k1", None);

        let other_uuid = provider(Uuid::new_v4(), "https://a.example/v1", "k1", None);
        let other_base = provider(uuid, "https://b.example/v1", "k1", None);
        let other_key = provider(uuid, "https://a.example/v1", "k2", None);
        let other_proxy = provider(uuid, "https://a.example/v1", "k1", Some("http://127.0.0.1:3128"));

        let keys = [
            pool_key(&base),
            pool_key(&other_uuid),
            pool_key(&other_base),
            pool_key(&other_key),
            pool_key(&other_proxy),
        ];

        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn pool_caches_and_rotation_forces_fresh_entries() {
        let pool = ClientPool::new();
        let uuid = Uuid::new_v4();

        pool.client(&provider(uuid, "https://a.example/v1", "k1", None)).unwrap();
        pool.client(&provider(uuid, "https://a.example/v1", "k1", None)).unwrap();
        assert_eq!(pool.len(), 1);

        // Credential rotation: distinct cache entry.
        pool.client(&provider(uuid, "https://a.example/v1", "k2", None)).unwrap();
        assert_eq!(pool.len(), 2);

        pool.remove_provider(uuid);
        assert_eq!(pool.len(), 0);

        pool.client(&provider(uuid, "https://a.example/v1", "k1", None)).unwrap();
        pool.clear();
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn unsupported_proxy_scheme_falls_back_to_direct() {
        let with_bad_proxy = provider(
            Uuid::new_v4(),
            "https://a.example/v1",
            "k",
            Some("quic://proxy.example:1234"),
        );

        assert!(outbound_proxy(&with_bad_proxy).is_none());

        let with_socks = provider(
            Uuid::new_v4(),
            "https://a.example/v1",
            "k",
            Some("socks5://127.0.0.1:1080"),
        );

        assert!(outbound_proxy(&with_socks).is_some());
    }
}
