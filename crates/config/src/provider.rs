//! Upstream provider account configuration.

use std::fmt;

use jiff::Timestamp;
use secrecy::SecretString;
use serde::Deserialize;
use uuid::Uuid;

/// Wire dialect an upstream provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// OpenAI-style chat completions (and the newer responses family).
    Openai,
    /// Anthropic-style messages.
    Anthropic,
    /// Google-style generateContent.
    Google,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Openai => f.write_str("openai"),
            Dialect::Anthropic => f.write_str("anthropic"),
            Dialect::Google => f.write_str("google"),
        }
    }
}

/// Credential material for an upstream account.
///
/// Either a plain API key or an OAuth bundle obtained by a login flow that
/// lives outside this crate. The access token is what gets sent upstream;
/// refresh handling is the credential owner's job.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCredential {
    /// Static API key.
    ApiKey(SecretString),
    /// OAuth detail bundle.
    Oauth(OauthDetail),
}

impl ProviderCredential {
    /// The secret presented upstream: the API key, or the OAuth access
    /// token.
    pub fn bearer(&self) -> &SecretString {
        match self {
            ProviderCredential::ApiKey(key) => key,
            ProviderCredential::Oauth(detail) => &detail.access_token,
        }
    }
}

/// OAuth token bundle for providers authenticated through a login flow.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OauthDetail {
    /// Bearer token presented upstream.
    pub access_token: SecretString,
    /// Refresh token, when the flow issued one.
    #[serde(default)]
    pub refresh_token: Option<SecretString>,
    /// Access token expiry.
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
    /// Provider-type tag recorded by the login flow (for example `"anthropic"`).
    pub provider_type: String,
}

/// Configuration for one upstream LLM vendor account.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Stable identifier. Services and usage records reference this.
    pub uuid: Uuid,

    /// Display name.
    pub name: String,

    /// Wire dialect the provider speaks.
    pub dialect: Dialect,

    /// API base URL, without the trailing operation path.
    pub api_base: String,

    /// Credential material.
    pub credential: ProviderCredential,

    /// Optional outbound proxy URL (`http`, `https` or `socks5` scheme).
    #[serde(default)]
    pub proxy_url: Option<String>,

    /// Per-provider timeout for unary calls, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Disabled providers are never selected by the load balancer.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}
