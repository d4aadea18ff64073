use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use crate::config::GatewayConfig;
use crate::errors::ServiceError;
use crate::models::error_codes::GatewayErrorCode;

type HmacSha256 = Hmac<Sha256>;

const CONTENT_TYPE_JSON: &str = "application/json";
const AUTH_SCHEME: &str = "GCS v1HMAC";

/// One structured error from the gateway's error list.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct GatewayApiError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Uniform failure shape for all gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Timeout or connect failure; retrying is safe (reconciliation is
    /// idempotent).
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// Non-2xx response with a parsed error list (or a generic message when
    /// the body was not JSON-shaped).
    #[error("gateway rejected request ({status}): {}", summarize(.errors))]
    Rejection {
        status: u16,
        errors: Vec<GatewayApiError>,
    },

    /// Response arrived but could not be interpreted.
    #[error("gateway protocol error: {0}")]
    Protocol(String),
}

fn summarize(errors: &[GatewayApiError]) -> String {
    if errors.is_empty() {
        return "no error detail".to_string();
    }
    errors
        .iter()
        .map(|e| format!("{}: {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl GatewayError {
    /// Known error codes carried by a rejection.
    pub fn error_codes(&self) -> Vec<GatewayErrorCode> {
        match self {
            Self::Rejection { errors, .. } => errors
                .iter()
                .map(|e| GatewayErrorCode::from_code(&e.code))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn has_code(&self, code: &GatewayErrorCode) -> bool {
        self.error_codes().iter().any(|c| c == code)
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Rejection { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(msg) => ServiceError::GatewayUnavailable(msg),
            rejection @ GatewayError::Rejection { .. } => {
                ServiceError::GatewayRejection(rejection.to_string())
            }
            GatewayError::Protocol(msg) => ServiceError::GatewayRejection(msg),
        }
    }
}

static CARD_NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""cardNumber"\s*:\s*"(\d{6})(\d+)(\d{4})""#).expect("static regex")
});
static CVV_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""cvv"\s*:\s*"\d{3,4}""#).expect("static regex"));

/// Masks PANs (first six and last four kept) and CVVs in loggable text.
/// Applied to every request/response body before it reaches a log sink.
pub fn mask_sensitive(text: &str) -> String {
    let masked = CARD_NUMBER_RE.replace_all(text, |caps: &regex::Captures<'_>| {
        format!(
            "\"cardNumber\":\"{}{}{}\"",
            &caps[1],
            "*".repeat(caps[2].len()),
            &caps[3]
        )
    });
    CVV_RE.replace_all(&masked, "\"cvv\":\"[REDACTED]\"").into_owned()
}

/// Thin typed client over the gateway's JSON REST API. Normalizes transport
/// and service failures into [`GatewayError`] and signs every request.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {e}")))?;
        Ok(Self { http, config })
    }

    fn merchant_path(&self, suffix: &str) -> String {
        format!("/v1/{}{}", self.config.merchant_id, suffix)
    }

    /// Signature string per the gateway convention:
    /// `METHOD\nContent-Type\nDate\n<path>\n`, HMAC-SHA-256, base64.
    fn sign(&self, method: &str, path: &str, date: &str) -> Result<String, ServiceError> {
        let to_sign = format!("{method}\n{CONTENT_TYPE_JSON}\n{date}\n{path}\n");
        let mut mac = HmacSha256::new_from_slice(self.config.api_secret.as_bytes())
            .map_err(|e| ServiceError::InternalError(format!("hmac key: {e}")))?;
        mac.update(to_sign.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());
        Ok(format!(
            "{AUTH_SCHEME}:{}:{signature}",
            self.config.client_id
        ))
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: String,
        body: Option<&Value>,
    ) -> Result<Value, GatewayError> {
        let url = format!("{}{}", self.config.endpoint, path);
        let date = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let auth = self
            .sign(method.as_str(), &path, &date)
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;

        let mut req = self
            .http
            .request(method.clone(), &url)
            .header("Content-Type", CONTENT_TYPE_JSON)
            .header("Date", date)
            .header("Authorization", auth);
        if let Some(body) = body {
            debug!(
                path = %path,
                body = %mask_sensitive(&body.to_string()),
                "gateway request"
            );
            req = req.json(body);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                warn!(path = %path, error = %e, "gateway unreachable");
                GatewayError::Unavailable(e.to_string())
            } else {
                GatewayError::Protocol(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 204 {
            return Ok(json!({}));
        }

        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, "gateway returned unparsable success body");
                GatewayError::Protocol(format!("unparsable response body: {e}"))
            })
        } else {
            error!(
                path = %path,
                status = status.as_u16(),
                body = %mask_sensitive(&text),
                "gateway rejected request"
            );
            Err(Self::rejection_from_body(status.as_u16(), &text))
        }
    }

    /// Parses a non-2xx body into a structured error list when JSON-shaped,
    /// else wraps the generic message.
    fn rejection_from_body(status: u16, body: &str) -> GatewayError {
        let errors = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.get("errors")
                    .cloned()
                    .and_then(|e| serde_json::from_value::<Vec<GatewayApiError>>(e).ok())
            })
            .unwrap_or_else(|| {
                vec![GatewayApiError {
                    code: status.to_string(),
                    message: if body.is_empty() {
                        "gateway returned an empty error body".to_string()
                    } else {
                        body.chars().take(200).collect()
                    },
                }]
            });
        GatewayError::Rejection { status, errors }
    }

    // Payments

    #[instrument(skip(self, payload))]
    pub async fn create_payment(&self, payload: &Value) -> Result<Value, GatewayError> {
        self.request(reqwest::Method::POST, self.merchant_path("/payments"), Some(payload))
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_payment(&self, payment_id: &str) -> Result<Value, GatewayError> {
        self.request(
            reqwest::Method::GET,
            self.merchant_path(&format!("/payments/{payment_id}")),
            None,
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn cancel_payment(&self, payment_id: &str) -> Result<Value, GatewayError> {
        self.request(
            reqwest::Method::POST,
            self.merchant_path(&format!("/payments/{payment_id}/cancel")),
            None,
        )
        .await
    }

    #[instrument(skip(self, payload))]
    pub async fn approve_payment(
        &self,
        payment_id: &str,
        payload: &Value,
    ) -> Result<Value, GatewayError> {
        self.request(
            reqwest::Method::POST,
            self.merchant_path(&format!("/payments/{payment_id}/approve")),
            Some(payload),
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn approve_fraud_pending(&self, payment_id: &str) -> Result<Value, GatewayError> {
        self.request(
            reqwest::Method::POST,
            self.merchant_path(&format!("/payments/{payment_id}/processchallenged")),
            None,
        )
        .await
    }

    #[instrument(skip(self, payload))]
    pub async fn refund_payment(
        &self,
        payment_id: &str,
        payload: &Value,
    ) -> Result<Value, GatewayError> {
        self.request(
            reqwest::Method::POST,
            self.merchant_path(&format!("/payments/{payment_id}/refund")),
            Some(payload),
        )
        .await
    }

    // Refunds

    #[instrument(skip(self))]
    pub async fn get_refund(&self, refund_id: &str) -> Result<Value, GatewayError> {
        self.request(
            reqwest::Method::GET,
            self.merchant_path(&format!("/refunds/{refund_id}")),
            None,
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn cancel_refund(&self, refund_id: &str) -> Result<Value, GatewayError> {
        self.request(
            reqwest::Method::POST,
            self.merchant_path(&format!("/refunds/{refund_id}/cancel")),
            None,
        )
        .await
    }

    // Hosted checkout

    #[instrument(skip(self, payload))]
    pub async fn create_hosted_checkout(&self, payload: &Value) -> Result<Value, GatewayError> {
        self.request(
            reqwest::Method::POST,
            self.merchant_path("/hostedcheckouts"),
            Some(payload),
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn get_hosted_checkout(&self, hosted_id: &str) -> Result<Value, GatewayError> {
        self.request(
            reqwest::Method::GET,
            self.merchant_path(&format!("/hostedcheckouts/{hosted_id}")),
            None,
        )
        .await
    }

    // Services

    #[instrument(skip(self))]
    pub async fn get_card_product(&self, bin: &str) -> Result<Value, GatewayError> {
        self.request(
            reqwest::Method::POST,
            self.merchant_path("/services/getIINdetails"),
            Some(&json!({ "bin": bin })),
        )
        .await
    }

    #[instrument(skip(self, payload))]
    pub async fn create_token(&self, payload: &Value) -> Result<Value, GatewayError> {
        self.request(reqwest::Method::POST, self.merchant_path("/tokens"), Some(payload))
            .await
    }
}
