use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::dialect::anthropic;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Gateway errors with appropriate HTTP status codes.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The scenario path segment is blank or not configured.
    #[error("Invalid scenario: '{0}'")]
    InvalidScenario(String),

    /// The request carries no model name.
    #[error("Missing model in request")]
    MissingModel,

    /// No routing rule matches (scenario, model).
    #[error("No rule found for model '{0}'")]
    RuleNotFound(String),

    /// Invalid request parameters or body.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The rule has no services at all.
    #[error("Rule has no services")]
    RuleEmpty,

    /// Every service of the rule is inactive.
    #[error("Rule has no active services")]
    NoActiveServices,

    /// Every active service is currently considered unhealthy.
    #[error("Rule has no healthy services")]
    NoHealthyServices,

    /// The rule's tactic descriptor is not recognized.
    #[error("Unknown load-balancing tactic '{0}'")]
    UnknownTactic(String),

    /// The selected provider is missing or disabled.
    #[error("No enabled provider for service")]
    ProviderUnavailable,

    /// Authentication failed upstream (401/403).
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Upstream reported the model as unavailable (404).
    #[error("Model not available: {0}")]
    ModelNotAvailable(String),

    /// Rate limit exceeded upstream (429).
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Transport-level failure reaching the upstream.
    #[error("Forward failed: {0}")]
    ForwardFailed(String),

    /// Upstream returned a semantic error not covered above.
    #[error("Provider API error ({status}): {message}")]
    ProviderApiError { status: u16, message: String },

    /// The upstream stream could not be established.
    #[error("Stream creation failed: {0}")]
    StreamCreationFailed(String),

    /// A subsystem (usage store, probe cache) is unavailable.
    #[error("Subsystem unavailable: {0}")]
    SubsystemUnavailable(String),

    /// Internal server error.
    /// If Some(message), it came from a provider and can be shown.
    /// If None, it is internal and must not leak details.
    #[error("Internal server error")]
    InternalError(Option<String>),
}

impl GatewayError {
    /// Get the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidScenario(_)
            | Self::MissingModel
            | Self::RuleNotFound(_)
            | Self::InvalidRequest(_)
            | Self::RuleEmpty
            | Self::NoActiveServices
            | Self::UnknownTactic(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Self::ModelNotAvailable(_) => StatusCode::NOT_FOUND,
            Self::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::ForwardFailed(_) | Self::StreamCreationFailed(_) => StatusCode::BAD_GATEWAY,
            Self::NoHealthyServices | Self::SubsystemUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ProviderApiError { status, .. } => match *status {
                400 => StatusCode::BAD_REQUEST,
                401 => StatusCode::UNAUTHORIZED,
                403 => StatusCode::FORBIDDEN,
                404 => StatusCode::NOT_FOUND,
                429 => StatusCode::TOO_MANY_REQUESTS,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::ProviderUnavailable | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type string for the response payload.
    pub fn error_type(&self) -> &str {
        match self {
            Self::InvalidScenario(_)
            | Self::MissingModel
            | Self::RuleNotFound(_)
            | Self::InvalidRequest(_)
            | Self::RuleEmpty
            | Self::NoActiveServices
            | Self::UnknownTactic(_) => "invalid_request_error",
            Self::AuthenticationFailed(_)
            | Self::ModelNotAvailable(_)
            | Self::RateLimitExceeded(_)
            | Self::ForwardFailed(_)
            | Self::ProviderApiError { .. } => "api_error",
            Self::StreamCreationFailed(_) => "stream_error",
            Self::NoHealthyServices
            | Self::SubsystemUnavailable(_)
            | Self::ProviderUnavailable
            | Self::InternalError(_) => "internal_error",
        }
    }

    /// Machine tag surfaced in the `code` field, shared with the usage
    /// tracker's error taxonomy.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::AuthenticationFailed(_) => Some("AUTHENTICATION_FAILED"),
            Self::RateLimitExceeded(_) => Some("RATE_LIMIT_EXCEEDED"),
            Self::ModelNotAvailable(_) => Some("MODEL_NOT_AVAILABLE"),
            Self::ForwardFailed(_) => Some("forward_failed"),
            Self::StreamCreationFailed(_) => Some("stream_creation_failed"),
            Self::UnknownTactic(_) => Some("unknown_tactic"),
            _ => None,
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::InternalError(Some(provider_msg)) => provider_msg.clone(),
            Self::InternalError(None) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Map an upstream HTTP status + body into the matching error variant.
    pub fn from_upstream_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(message),
            404 => Self::ModelNotAvailable(message),
            429 => Self::RateLimitExceeded(message),
            400 => Self::InvalidRequest(message),
            500 => Self::InternalError(Some(message)),
            _ => Self::ProviderApiError { status, message },
        }
    }
}

/// Unified error payload shape shared by both client surfaces.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = ErrorResponse {
            error: ErrorDetails {
                message: self.client_message(),
                r#type: self.error_type().to_string(),
                code: self.error_code().map(str::to_string),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// Anthropic-dialect error envelope: same taxonomy, Anthropic's shape.
pub struct AnthropicErrorResponse {
    status: StatusCode,
    body: anthropic::ErrorResponse,
}

impl From<GatewayError> for AnthropicErrorResponse {
    fn from(error: GatewayError) -> Self {
        let status = error.status_code();
        let body = anthropic::ErrorResponse::from(error);

        Self { status, body }
    }
}

impl IntoResponse for AnthropicErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type AnthropicResult<T> = std::result::Result<T, AnthropicErrorResponse>;
