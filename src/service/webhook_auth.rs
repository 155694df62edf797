//! Webhook request authentication: caller IP allowlist and timestamped
//! HMAC-SHA256 signatures with secret rotation.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tracing::warn;

use crate::config::WebhookConfig;
use crate::error::GatewayError;

type HmacSha256 = Hmac<Sha256>;

/// Unix timestamp header (seconds; milliseconds are accepted).
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

/// Hex HMAC header, optionally prefixed with `sha256=`.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Values above this are read as milliseconds.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Hex HMAC-SHA256 of `"{timestamp}." + body`.
///
/// # Errors
///
/// Returns [`GatewayError::Internal`] if the MAC cannot be keyed.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> Result<String, GatewayError> {
    let mut mac = keyed(secret)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn keyed(secret: &str) -> Result<HmacSha256, GatewayError> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::Internal(format!("failed to key webhook hmac: {e}")))
}

/// Checks inbound webhook requests.
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secrets: Vec<SecretString>,
    ttl_secs: u64,
    allowlist: Vec<IpAddr>,
    trust_forwarded_for: bool,
}

impl WebhookVerifier {
    /// Builds a verifier from configuration.
    #[must_use]
    pub fn from_config(config: &WebhookConfig) -> Self {
        Self {
            secrets: config.secrets.clone(),
            ttl_secs: config.signature_ttl_secs,
            allowlist: config.ip_allowlist.clone(),
            trust_forwarded_for: config.trust_forwarded_for,
        }
    }

    /// Enforces the allowlist when one is configured. `X-Forwarded-For` is
    /// consulted only when it is trusted; otherwise the socket peer counts.
    ///
    /// # Errors
    ///
    /// [`GatewayError::IpNotAllowed`] when the caller is not listed.
    pub fn check_ip(
        &self,
        forwarded_for: Option<&str>,
        peer: Option<IpAddr>,
    ) -> Result<(), GatewayError> {
        if self.allowlist.is_empty() {
            return Ok(());
        }
        let forwarded = forwarded_for
            .filter(|_| self.trust_forwarded_for)
            .and_then(|raw| raw.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        match forwarded.or(peer) {
            Some(ip) if self.allowlist.contains(&ip) => Ok(()),
            Some(ip) => {
                warn!(%ip, "Webhook caller not in allowlist");
                Err(GatewayError::IpNotAllowed(ip.to_string()))
            }
            None => Err(GatewayError::IpNotAllowed("unknown".to_string())),
        }
    }

    /// Verifies timestamp freshness, then the signature against every
    /// configured secret.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Unauthorized`] for missing or bad headers and
    /// signatures, [`GatewayError::SignatureExpired`] outside the window.
    pub fn verify(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        if self.secrets.is_empty() {
            return Err(GatewayError::Unauthorized(
                "webhook secrets are not configured".to_string(),
            ));
        }
        let raw_ts = timestamp
            .map(str::trim)
            .ok_or_else(|| GatewayError::Unauthorized(format!("missing {TIMESTAMP_HEADER}")))?;
        let signature = signature
            .map(|s| s.trim().trim_start_matches("sha256="))
            .ok_or_else(|| GatewayError::Unauthorized(format!("missing {SIGNATURE_HEADER}")))?;

        let mut ts: i64 = raw_ts
            .parse()
            .map_err(|_| GatewayError::Unauthorized("malformed webhook timestamp".to_string()))?;
        if ts > MILLIS_THRESHOLD {
            ts /= 1000;
        }
        let skew_secs = now.timestamp().abs_diff(ts);
        if skew_secs > self.ttl_secs {
            return Err(GatewayError::SignatureExpired {
                skew_secs,
                ttl_secs: self.ttl_secs,
            });
        }

        let provided = hex::decode(signature)
            .map_err(|_| GatewayError::Unauthorized("malformed webhook signature".to_string()))?;
        for secret in &self.secrets {
            let mut mac = keyed(secret.expose_secret())?;
            mac.update(raw_ts.as_bytes());
            mac.update(b".");
            mac.update(body);
            if mac.verify_slice(&provided).is_ok() {
                return Ok(());
            }
        }
        Err(GatewayError::Unauthorized("invalid webhook signature".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn verifier(allowlist: Vec<IpAddr>, trust: bool) -> WebhookVerifier {
        WebhookVerifier {
            secrets: vec![SecretString::from("old"), SecretString::from("new")],
            ttl_secs: 300,
            allowlist,
            trust_forwarded_for: trust,
        }
    }

    #[test]
    fn any_active_secret_is_accepted() {
        let now = Utc::now();
        let ts = now.timestamp().to_string();
        let body = br#"{"event":"commit.confirmed"}"#;
        let v = verifier(Vec::new(), false);
        for secret in ["old", "new"] {
            let Ok(sig) = sign(secret, &ts, body) else {
                panic!("signing should work");
            };
            assert!(v.verify(Some(&ts), Some(&format!("sha256={sig}")), body, now).is_ok());
        }
        let Ok(sig) = sign("retired", &ts, body) else {
            panic!("signing should work");
        };
        assert!(matches!(
            v.verify(Some(&ts), Some(&sig), body, now),
            Err(GatewayError::Unauthorized(_))
        ));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let now = Utc::now();
        let ts = now.timestamp().to_string();
        let Ok(sig) = sign("new", &ts, b"{}") else {
            panic!("signing should work");
        };
        assert!(verifier(Vec::new(), false).verify(Some(&ts), Some(&sig), b"{ }", now).is_err());
    }

    #[test]
    fn stale_timestamp_is_expired_even_in_millis() {
        let now = Utc::now();
        let stale = now - Duration::seconds(301);
        let ts = stale.timestamp_millis().to_string();
        let Ok(sig) = sign("new", &ts, b"{}") else {
            panic!("signing should work");
        };
        assert!(matches!(
            verifier(Vec::new(), false).verify(Some(&ts), Some(&sig), b"{}", now),
            Err(GatewayError::SignatureExpired { ttl_secs: 300, .. })
        ));
    }

    #[test]
    fn forwarded_for_only_counts_when_trusted() {
        let allowed: IpAddr = [10, 0, 0, 1].into();
        let other: IpAddr = [192, 168, 1, 9].into();

        let untrusted = verifier(vec![allowed], false);
        assert!(untrusted.check_ip(Some("10.0.0.1"), Some(other)).is_err());
        assert!(untrusted.check_ip(None, Some(allowed)).is_ok());

        let trusted = verifier(vec![allowed], true);
        assert!(trusted.check_ip(Some("10.0.0.1, 172.16.0.1"), Some(other)).is_ok());
    }
}
