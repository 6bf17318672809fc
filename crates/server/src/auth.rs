//! Bearer-JWT verification for the management surface.
//!
//! Tokens are HS256-signed with the shared secret from the configuration;
//! issuing them is out of scope here. Signature is always checked; the
//! expiry claim is enforced when present.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Request, State},
    http::{StatusCode, header::AUTHORIZATION},
    middleware::{Next, from_fn_with_state},
    response::{IntoResponse, Response},
};
use jwt_compact::{
    AlgorithmExt, TimeOptions, UntrustedToken,
    alg::{Hs256, Hs256Key},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

const BEARER_PREFIX_LEN: usize = 6;

/// Claims of a management token. Only the registered time claims are
/// enforced; the subject is carried for logging.
#[derive(Debug, Deserialize)]
struct ManagementClaims {
    #[serde(default)]
    #[allow(dead_code)]
    sub: Option<String>,
}

pub(crate) struct JwtVerifier {
    key: Hs256Key,
}

impl JwtVerifier {
    fn new(secret: &SecretString) -> Self {
        JwtVerifier {
            key: Hs256Key::new(secret.expose_secret().as_bytes()),
        }
    }

    fn verify(&self, header_value: &str) -> Result<(), &'static str> {
        // RFC 7235: the scheme is case-insensitive.
        if header_value.len() <= BEARER_PREFIX_LEN
            || !header_value[..BEARER_PREFIX_LEN].eq_ignore_ascii_case("bearer")
            || header_value.as_bytes()[BEARER_PREFIX_LEN] != b' '
        {
            return Err("token must be prefixed with Bearer");
        }

        let token_str = header_value[BEARER_PREFIX_LEN + 1..].trim();

        if token_str.is_empty() {
            return Err("missing token");
        }

        let untrusted = UntrustedToken::new(token_str).map_err(|_| "malformed token")?;

        let token = Hs256
            .validator::<ManagementClaims>(&self.key)
            .validate(&untrusted)
            .map_err(|_| "invalid signature")?;

        if token.claims().expiration.is_some() {
            token
                .claims()
                .validate_expiration(&TimeOptions::default())
                .map_err(|_| "token expired")?;
        }

        Ok(())
    }
}

/// Wrap a router so every request must carry a valid bearer token.
pub(crate) fn protect(router: Router, secret: &SecretString) -> Router {
    router.layer(from_fn_with_state(
        Arc::new(JwtVerifier::new(secret)),
        require_bearer,
    ))
}

async fn require_bearer(State(verifier): State<Arc<JwtVerifier>>, request: Request, next: Next) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match header {
        Some(value) => match verifier.verify(value) {
            Ok(()) => next.run(request).await,
            Err(reason) => {
                log::debug!("Rejected management request: {reason}");
                unauthorized()
            }
        },
        None => {
            log::debug!("Rejected management request: missing authorization header");
            unauthorized()
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({
            "error": {
                "message": "management API requires a valid bearer token",
                "type": "invalid_request_error",
                "code": "unauthorized"
            }
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use jwt_compact::Claims;

    use super::*;

    fn sign(secret: &str) -> String {
        let key = Hs256Key::new(secret.as_bytes());
        let claims = Claims::new(serde_json::json!({ "sub": "admin" }));

        Hs256
            .token(&jwt_compact::Header::empty(), &claims, &key)
            .expect("signing with a symmetric key cannot fail")
    }

    #[test]
    fn accepts_valid_tokens_and_rejects_everything_else() {
        let secret = SecretString::from("top-secret".to_string());
        let verifier = JwtVerifier::new(&secret);

        let valid = sign("top-secret");
        assert!(verifier.verify(&format!("Bearer {valid}")).is_ok());
        assert!(verifier.verify(&format!("bearer {valid}")).is_ok());

        let wrong_key = sign("other-secret");
        assert!(verifier.verify(&format!("Bearer {wrong_key}")).is_err());

        assert!(verifier.verify("Bearer").is_err());
        assert!(verifier.verify("Bearer ").is_err());
        assert!(verifier.verify("Basic abc").is_err());
        assert!(verifier.verify(&valid).is_err());
    }
}
