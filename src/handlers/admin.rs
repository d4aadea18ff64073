use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;
use crate::models::status::GatewayStatus;
use crate::services::order_actions::{ActionOutcome, PendingOrderSummary};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/admin/orders/approve-fraud", post(approve_fraud))
        .route("/api/v1/admin/orders/approve-payment", post(approve_payment))
        .route("/api/v1/admin/orders/cancel-payment", post(cancel_payment))
        .route("/api/v1/admin/orders/refresh", post(refresh_status))
        .route("/api/v1/admin/orders/refunds", post(create_refund))
        .route("/api/v1/admin/orders/refunds/status", post(refund_status))
        .route("/api/v1/admin/orders/refunds/cancel", post(cancel_refund))
        .route("/api/v1/admin/orders/pending", get(pending_orders))
}

/// Admin action envelope: `{error, errorMessage?, ...outcome}` as the
/// order-management UI expects.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    pub error: bool,
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub outcome: Option<ActionOutcome>,
}

impl ActionResponse {
    fn from_result(result: Result<ActionOutcome, ServiceError>) -> Json<Self> {
        match result {
            Ok(outcome) => Json(Self {
                error: false,
                error_message: None,
                outcome: Some(outcome),
            }),
            Err(e) => {
                warn!(error = %e, "admin action failed");
                Json(Self {
                    error: true,
                    error_message: Some(e.response_message()),
                    outcome: None,
                })
            }
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct OrderActionRequest {
    #[validate(length(min = 1))]
    pub order_no: String,
    pub correlation_id: Uuid,
    /// Optional transaction id cross-check from the admin screen
    pub transaction_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRefundRequest {
    #[validate(length(min = 1))]
    pub order_no: String,
    pub correlation_id: Uuid,
    pub transaction_id: Option<String>,
    pub amount: Decimal,
    #[validate(length(min = 1))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefundActionRequest {
    #[validate(length(min = 1))]
    pub order_no: String,
    pub correlation_id: Uuid,
    #[validate(length(min = 1))]
    pub refund_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PendingOrdersQuery {
    pub gateway_status: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/approve-fraud",
    request_body = OrderActionRequest,
    responses((status = 200, description = "Action result", body = ActionResponse)),
    tag = "Admin"
)]
async fn approve_fraud(
    State(state): State<AppState>,
    Json(request): Json<OrderActionRequest>,
) -> Json<ActionResponse> {
    let result = match request.validate() {
        Ok(()) => {
            state
                .services
                .order_actions
                .approve_fraud_pending(&request.order_no, request.correlation_id)
                .await
        }
        Err(e) => Err(e.into()),
    };
    ActionResponse::from_result(result)
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/approve-payment",
    request_body = OrderActionRequest,
    responses((status = 200, description = "Action result", body = ActionResponse)),
    tag = "Admin"
)]
async fn approve_payment(
    State(state): State<AppState>,
    Json(request): Json<OrderActionRequest>,
) -> Json<ActionResponse> {
    let result = match request.validate() {
        Ok(()) => {
            state
                .services
                .order_actions
                .approve_pending_approval(&request.order_no, request.correlation_id)
                .await
        }
        Err(e) => Err(e.into()),
    };
    ActionResponse::from_result(result)
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/cancel-payment",
    request_body = OrderActionRequest,
    responses((status = 200, description = "Action result", body = ActionResponse)),
    tag = "Admin"
)]
async fn cancel_payment(
    State(state): State<AppState>,
    Json(request): Json<OrderActionRequest>,
) -> Json<ActionResponse> {
    let result = match request.validate() {
        Ok(()) => {
            state
                .services
                .order_actions
                .cancel_payment(
                    &request.order_no,
                    request.correlation_id,
                    request.transaction_id.as_deref(),
                )
                .await
        }
        Err(e) => Err(e.into()),
    };
    ActionResponse::from_result(result)
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/refresh",
    request_body = OrderActionRequest,
    responses((status = 200, description = "Action result", body = ActionResponse)),
    tag = "Admin"
)]
async fn refresh_status(
    State(state): State<AppState>,
    Json(request): Json<OrderActionRequest>,
) -> Json<ActionResponse> {
    let result = match request.validate() {
        Ok(()) => {
            state
                .services
                .order_actions
                .refresh_status(
                    &request.order_no,
                    request.correlation_id,
                    request.transaction_id.as_deref(),
                )
                .await
        }
        Err(e) => Err(e.into()),
    };
    ActionResponse::from_result(result)
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/refunds",
    request_body = CreateRefundRequest,
    responses((status = 200, description = "Action result", body = ActionResponse)),
    tag = "Admin"
)]
async fn create_refund(
    State(state): State<AppState>,
    Json(request): Json<CreateRefundRequest>,
) -> Json<ActionResponse> {
    let result = match request.validate() {
        Ok(()) => {
            state
                .services
                .order_actions
                .create_refund(
                    &request.order_no,
                    request.correlation_id,
                    request.amount,
                    &request.reason,
                    request.transaction_id.as_deref(),
                )
                .await
        }
        Err(e) => Err(e.into()),
    };
    ActionResponse::from_result(result)
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/refunds/status",
    request_body = RefundActionRequest,
    responses((status = 200, description = "Action result", body = ActionResponse)),
    tag = "Admin"
)]
async fn refund_status(
    State(state): State<AppState>,
    Json(request): Json<RefundActionRequest>,
) -> Json<ActionResponse> {
    let result = match request.validate() {
        Ok(()) => {
            state
                .services
                .order_actions
                .get_refund_status(&request.order_no, request.correlation_id, &request.refund_id)
                .await
        }
        Err(e) => Err(e.into()),
    };
    ActionResponse::from_result(result)
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/refunds/cancel",
    request_body = RefundActionRequest,
    responses((status = 200, description = "Action result", body = ActionResponse)),
    tag = "Admin"
)]
async fn cancel_refund(
    State(state): State<AppState>,
    Json(request): Json<RefundActionRequest>,
) -> Json<ActionResponse> {
    let result = match request.validate() {
        Ok(()) => {
            state
                .services
                .order_actions
                .cancel_refund(&request.order_no, request.correlation_id, &request.refund_id)
                .await
        }
        Err(e) => Err(e.into()),
    };
    ActionResponse::from_result(result)
}

/// Orders awaiting an admin decision for a gateway status, e.g.
/// PENDING_FRAUD_APPROVAL or PENDING_APPROVAL.
#[utoipa::path(
    get,
    path = "/api/v1/admin/orders/pending",
    params(("gateway_status" = String, Query, description = "Gateway status to filter by")),
    responses(
        (status = 200, description = "Matching orders", body = Vec<PendingOrderSummary>),
        (status = 400, description = "Unknown status", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
async fn pending_orders(
    State(state): State<AppState>,
    Query(query): Query<PendingOrdersQuery>,
) -> Result<Json<Vec<PendingOrderSummary>>, ServiceError> {
    let status = GatewayStatus::from_str(&query.gateway_status).map_err(|_| {
        ServiceError::ValidationError(format!("unknown gateway status {}", query.gateway_status))
    })?;
    let orders = state
        .services
        .order_actions
        .list_orders_with_gateway_status(status)
        .await?;
    Ok(Json(orders))
}
