//! HTTP server configuration.

use std::net::SocketAddr;

use secrecy::SecretString;
use serde::Deserialize;

/// HTTP server settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address the server binds to. Defaults to `127.0.0.1:8787`
    /// when absent.
    pub listen_address: Option<SocketAddr>,
    /// Health endpoint settings.
    pub health: HealthConfig,
    /// Management API settings.
    pub management: ManagementConfig,
}

/// Health endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    /// Whether the health endpoint is exposed.
    pub enabled: bool,
    /// Path of the health endpoint.
    pub path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            enabled: true,
            path: "/health".to_string(),
        }
    }
}

/// Management API settings. The surface is bearer-JWT protected; token
/// issuance happens elsewhere, this config only carries the verification
/// secret.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagementConfig {
    /// Whether the management routes are exposed.
    pub enabled: bool,
    /// HS256 secret used to verify management bearer tokens.
    pub jwt_secret: Option<SecretString>,
}
