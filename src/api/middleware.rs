//! Authentication for the `/internal` control plane.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;
use secrecy::ExposeSecret;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::app_state::AppState;
use crate::config::OpsConfig;
use crate::error::GatewayError;
use crate::service::OpsContext;

/// Shared-secret header.
pub const SECRET_HEADER: &str = "x-internal-secret";

/// Optional caller label recorded in the audit trail.
pub const ACTOR_HEADER: &str = "x-internal-actor";

const DEFAULT_ACTOR: &str = "internal";

/// Rejects plain-HTTP and unauthenticated calls, then attaches an
/// [`OpsContext`] for the handlers.
///
/// # Errors
///
/// [`GatewayError::HttpsRequired`] when HTTPS is enforced and
/// `X-Forwarded-Proto` is not `https`, [`GatewayError::Unauthorized`] when
/// no configured secret matches.
pub async fn require_internal_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let actor = authorize(&state.ops_config, req.headers())?;
    let ctx = OpsContext {
        actor,
        method: req.method().to_string(),
        path: req.uri().path().to_string(),
    };
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

fn authorize(config: &OpsConfig, headers: &HeaderMap) -> Result<String, GatewayError> {
    if config.require_https {
        let proto = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .map(str::trim);
        if !proto.is_some_and(|p| p.eq_ignore_ascii_case("https")) {
            return Err(GatewayError::HttpsRequired);
        }
    }
    if config.secrets.is_empty() {
        return Err(GatewayError::Unauthorized(
            "internal secrets are not configured".to_string(),
        ));
    }

    let presented = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
        .map(str::trim)
        .ok_or_else(|| GatewayError::Unauthorized("missing internal secret".to_string()))?;

    // No early exit: every secret is compared.
    let matched = config.secrets.iter().fold(false, |acc, secret| {
        let hit: bool = secret
            .expose_secret()
            .as_bytes()
            .ct_eq(presented.as_bytes())
            .into();
        acc | hit
    });
    if !matched {
        warn!("Rejected internal request with an unknown secret");
        return Err(GatewayError::Unauthorized("invalid internal secret".to_string()));
    }

    Ok(headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or(DEFAULT_ACTOR)
        .to_string())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use secrecy::SecretString;

    use super::*;

    fn config(require_https: bool) -> OpsConfig {
        OpsConfig {
            secrets: vec![SecretString::from("old"), SecretString::from("new")],
            require_https,
            intent_retry_cooldown_secs: 60,
            intent_expire_cooldown_secs: 60,
            reconcile_cooldown_secs: 60,
            queue_bulk_cooldown_secs: 60,
        }
    }

    #[test]
    fn accepts_any_rotated_secret_via_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer old"));
        headers.insert(ACTOR_HEADER, HeaderValue::from_static("ops-bot"));
        let actor = authorize(&config(false), &headers);
        assert_eq!(actor.ok().as_deref(), Some("ops-bot"));
    }

    #[test]
    fn rejects_unknown_secret() {
        let mut headers = HeaderMap::new();
        headers.insert(SECRET_HEADER, HeaderValue::from_static("guess"));
        assert!(matches!(
            authorize(&config(false), &headers),
            Err(GatewayError::Unauthorized(_))
        ));
    }

    #[test]
    fn https_is_checked_before_the_secret() {
        let mut headers = HeaderMap::new();
        headers.insert(SECRET_HEADER, HeaderValue::from_static("new"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
        assert!(matches!(
            authorize(&config(true), &headers),
            Err(GatewayError::HttpsRequired)
        ));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert!(authorize(&config(true), &headers).is_ok());
    }
}
