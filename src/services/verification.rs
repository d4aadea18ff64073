use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;
use uuid::Uuid;

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_TTL_MINUTES: i64 = 30;

/// Constant-time byte comparison for signatures and MACs.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Issues and validates the short-lived signed tokens that carry redirect
/// state across the gateway round-trip. The token binds the order id, the
/// gateway's return-MAC and an expiry under an HMAC, so no session state is
/// needed to verify the shopper returning from a 3DS/hosted redirect.
pub struct VerificationTokenService {
    secret: String,
}

impl VerificationTokenService {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    fn signature(&self, order_id: Uuid, expires_at: i64, return_mac: &str) -> Result<String, ServiceError> {
        let message = format!("{order_id}.{expires_at}.{return_mac}");
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| ServiceError::InternalError(format!("hmac key: {e}")))?;
        mac.update(message.as_bytes());
        Ok(BASE64URL.encode(mac.finalize().into_bytes()))
    }

    /// Token handed to the storefront when a redirect flow starts.
    pub fn issue(&self, order_id: Uuid, return_mac: &str) -> Result<String, ServiceError> {
        self.issue_at(order_id, return_mac, Utc::now())
    }

    fn issue_at(
        &self,
        order_id: Uuid,
        return_mac: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        let expires_at = (now + Duration::minutes(TOKEN_TTL_MINUTES)).timestamp();
        let signature = self.signature(order_id, expires_at, return_mac)?;
        Ok(format!("{order_id}.{expires_at}.{signature}"))
    }

    /// Validates a returning token against the return-MAC the gateway sent
    /// back. Yields the order id the redirect was issued for.
    pub fn validate(&self, token: &str, return_mac: &str) -> Result<Uuid, ServiceError> {
        self.validate_at(token, return_mac, Utc::now())
    }

    fn validate_at(
        &self,
        token: &str,
        return_mac: &str,
        now: DateTime<Utc>,
    ) -> Result<Uuid, ServiceError> {
        let mut parts = token.splitn(3, '.');
        let (Some(order_part), Some(expiry_part), Some(signature)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ServiceError::Unauthorized("malformed verification token".to_string()));
        };
        let order_id = Uuid::parse_str(order_part)
            .map_err(|_| ServiceError::Unauthorized("malformed verification token".to_string()))?;
        let expires_at: i64 = expiry_part
            .parse()
            .map_err(|_| ServiceError::Unauthorized("malformed verification token".to_string()))?;

        if now.timestamp() > expires_at {
            warn!(order_id = %order_id, "verification token expired");
            return Err(ServiceError::Unauthorized("verification token expired".to_string()));
        }

        let expected = self.signature(order_id, expires_at, return_mac)?;
        if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            warn!(order_id = %order_id, "verification token signature mismatch");
            return Err(ServiceError::Unauthorized("verification token mismatch".to_string()));
        }
        Ok(order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_validates() {
        let svc = VerificationTokenService::new("secret-key-for-tests");
        let order_id = Uuid::new_v4();
        let token = svc.issue(order_id, "MAC123").unwrap();
        assert_eq!(svc.validate(&token, "MAC123").unwrap(), order_id);
    }

    #[test]
    fn wrong_mac_is_rejected() {
        let svc = VerificationTokenService::new("secret-key-for-tests");
        let token = svc.issue(Uuid::new_v4(), "MAC123").unwrap();
        assert!(matches!(
            svc.validate(&token, "FORGED"),
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let svc = VerificationTokenService::new("secret-key-for-tests");
        let order_id = Uuid::new_v4();
        let issued = Utc::now() - Duration::hours(2);
        let token = svc.issue_at(order_id, "MAC123", issued).unwrap();
        assert!(matches!(
            svc.validate_at(&token, "MAC123", Utc::now()),
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[test]
    fn tampered_token_is_rejected() {
        let svc = VerificationTokenService::new("secret-key-for-tests");
        let token = svc.issue(Uuid::new_v4(), "MAC123").unwrap();
        let other_order = Uuid::new_v4();
        let mut parts: Vec<&str> = token.splitn(3, '.').collect();
        let swapped = other_order.to_string();
        parts[0] = &swapped;
        let forged = parts.join(".");
        assert!(svc.validate(&forged, "MAC123").is_err());
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
