use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;
use crate::gateway::payloads::CardDetails;
use crate::services::order_actions::{CheckoutOutcome, RedirectOutcome};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/checkout/payments", post(create_payment))
        .route("/api/v1/checkout/hosted", post(create_hosted_checkout))
        .route("/api/v1/checkout/return", get(redirect_return))
        .route("/api/v1/checkout/card-product", get(card_product))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CardProductQuery {
    /// First six (or more) digits of the card number
    pub bin: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreatePaymentRequest {
    #[validate(length(min = 1))]
    pub order_no: String,
    pub correlation_id: Uuid,
    /// Full PAN; omitted when paying with a stored token
    pub card_number: Option<String>,
    pub cvv: Option<String>,
    /// Stored wallet token replacing the PAN
    pub token: Option<String>,
    /// Unattended order placed through the back office
    #[serde(default)]
    pub api_order: bool,
    pub client_ip: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateHostedRequest {
    #[validate(length(min = 1))]
    pub order_no: String,
    pub correlation_id: Uuid,
}

/// Query parameters the gateway appends when sending the shopper back.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RedirectReturnQuery {
    /// Verification token issued when the redirect was initiated
    pub token: String,
    #[serde(rename = "RETURNMAC")]
    pub return_mac: String,
    #[serde(rename = "REF")]
    pub payment_ref: Option<String>,
    #[serde(rename = "hostedCheckoutId")]
    pub hosted_checkout_id: Option<String>,
}

/// Creates a direct card payment during checkout and reconciles the
/// synchronous gateway response.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Payment created", body = CheckoutOutcome),
        (status = 422, description = "Gateway rejected the payment", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Json<CheckoutOutcome>, ServiceError> {
    request.validate()?;
    let card = CardDetails {
        card_number: request.card_number,
        cvv: request.cvv,
        token: request.token,
    };
    let outcome = state
        .services
        .order_actions
        .create_payment(
            &request.order_no,
            request.correlation_id,
            card,
            request.api_order,
            request.client_ip,
        )
        .await?;
    Ok(Json(outcome))
}

/// Starts a hosted-checkout flow and returns the page URL to embed.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/hosted",
    request_body = CreateHostedRequest,
    responses(
        (status = 200, description = "Hosted checkout created", body = CheckoutOutcome),
        (status = 422, description = "Gateway rejected the request", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
async fn create_hosted_checkout(
    State(state): State<AppState>,
    Json(request): Json<CreateHostedRequest>,
) -> Result<Json<CheckoutOutcome>, ServiceError> {
    request.validate()?;
    let outcome = state
        .services
        .order_actions
        .create_hosted_checkout(&request.order_no, request.correlation_id)
        .await?;
    Ok(Json(outcome))
}

/// Completes a 3DS/hosted redirect round-trip: validates the return-MAC
/// against the signed verification token, then fetches and reconciles the
/// authoritative status.
#[utoipa::path(
    get,
    path = "/api/v1/checkout/return",
    params(
        ("token" = String, Query, description = "Verification token"),
        ("RETURNMAC" = String, Query, description = "Return MAC issued by the gateway"),
        ("REF" = Option<String>, Query, description = "Payment reference"),
        ("hostedCheckoutId" = Option<String>, Query, description = "Hosted checkout id"),
    ),
    responses(
        (status = 200, description = "Redirect processed", body = RedirectOutcome),
        (status = 401, description = "Verification failed", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
async fn redirect_return(
    State(state): State<AppState>,
    Query(query): Query<RedirectReturnQuery>,
) -> Result<Json<RedirectOutcome>, ServiceError> {
    let outcome = state
        .services
        .order_actions
        .handle_redirect_return(
            &query.token,
            &query.return_mac,
            query.payment_ref.as_deref(),
            query.hosted_checkout_id.as_deref(),
        )
        .await?;
    Ok(Json(outcome))
}

/// Resolves the payment product for a card number prefix.
#[utoipa::path(
    get,
    path = "/api/v1/checkout/card-product",
    params(("bin" = String, Query, description = "First six or more card digits")),
    responses(
        (status = 200, description = "Card product details"),
        (status = 400, description = "Prefix too short", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
async fn card_product(
    State(state): State<AppState>,
    Query(query): Query<CardProductQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let product = state
        .services
        .order_actions
        .lookup_card_product(&query.bin)
        .await?;
    Ok(Json(product))
}
