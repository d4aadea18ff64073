use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Router,
};
use bytes::Bytes;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::{error, info, warn};

use crate::models::payload::WebhookEvent;
use crate::services::verification::constant_time_eq;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-gcs-signature";

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/gateway/webhook", post(gateway_webhook))
}

/// Computes the expected signature for a webhook body: base64-encoded
/// HMAC-SHA-256 of the raw bytes under the shared secret.
pub fn webhook_signature(body: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    BASE64.encode(mac.finalize().into_bytes())
}

/// Status pushes from the gateway. The signature check runs against the raw
/// bytes before anything is parsed; a payload that fails any check never
/// mutates an order. 204 acknowledges; any non-2xx tells the gateway to
/// redeliver later.
#[utoipa::path(
    post,
    path = "/api/v1/gateway/webhook",
    request_body = String,
    responses(
        (status = 204, description = "Notification applied"),
        (status = 400, description = "Malformed payload or reconciliation failure", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 500, description = "Webhook secret not configured", body = crate::errors::ErrorResponse)
    ),
    tag = "Webhooks"
)]
pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if body.is_empty() {
        warn!("webhook with empty body");
        return StatusCode::BAD_REQUEST;
    }

    let Some(secret) = state.config.gateway.webhook_secret.as_deref() else {
        error!("webhook received but no webhook secret is configured");
        return StatusCode::INTERNAL_SERVER_ERROR;
    };

    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let expected = webhook_signature(&body, secret);
    if !constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
        warn!("webhook signature verification failed");
        return StatusCode::UNAUTHORIZED;
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "webhook body is not valid JSON");
            return StatusCode::BAD_REQUEST;
        }
    };

    let Some(payment) = event.payment else {
        warn!("webhook without payment object");
        return StatusCode::BAD_REQUEST;
    };
    let Some(order_number) = payment
        .get("paymentOutput")
        .and_then(|p| p.get("references"))
        .and_then(|r| r.get("merchantReference"))
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        warn!("webhook payment carries no merchant reference");
        return StatusCode::BAD_REQUEST;
    };

    match state
        .services
        .reconciler
        .apply_value(&order_number, payment)
        .await
    {
        Ok(outcome) => {
            info!(
                order_number = %order_number,
                status = %outcome.status,
                "webhook notification applied"
            );
            StatusCode::NO_CONTENT
        }
        Err(e) => {
            error!(order_number = %order_number, error = %e, "webhook reconciliation failed");
            StatusCode::BAD_REQUEST
        }
    }
}
