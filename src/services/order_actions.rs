use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::entities::{order, order_line, payment_instrument};
use crate::errors::ServiceError;
use crate::gateway::client::{GatewayClient, GatewayError};
use crate::gateway::payloads::{
    build_approve_payment, build_create_payment, build_refund, CardDetails, CreatePaymentOptions,
};
use crate::models::error_codes::GatewayErrorCode;
use crate::models::ledger::PaymentLedger;
use crate::models::payload::CardMethodOutput;
use crate::models::status::{GatewayStatus, OrderStatus};
use crate::services::reconciler::{ReconcileOutcome, StatusReconciler};
use crate::services::verification::VerificationTokenService;
use crate::services::wallet::WalletService;

/// Result of an admin action: the reconciliation outcome when one ran, plus
/// an optional operator-facing message (set when the action recovered via a
/// status resync).
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    #[serde(flatten)]
    pub reconcile: Option<ReconcileOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<ReconcileOutcome> for ActionOutcome {
    fn from(reconcile: ReconcileOutcome) -> Self {
        Self {
            reconcile: Some(reconcile),
            message: None,
        }
    }
}

/// Result of a checkout-side payment creation.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileOutcome>,
    pub action_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    /// Signed token the storefront passes through the redirect round-trip
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosted_checkout_id: Option<String>,
    /// Card token issued by the gateway, when tokenization was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_token: Option<String>,
}

/// Where the storefront should send the shopper after a redirect return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RedirectDisposition {
    Confirmation,
    Failure,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedirectOutcome {
    pub disposition: RedirectDisposition,
    #[serde(flatten)]
    pub reconcile: Option<ReconcileOutcome>,
}

/// An order that passed the correlation check, with its gateway instrument
/// resolved.
struct VerifiedOrder {
    order: order::Model,
    instrument: payment_instrument::Model,
    transaction_id: Option<String>,
    hosted_checkout_id: Option<String>,
}

/// Summary row for the admin pending-orders listing.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PendingOrderSummary {
    pub correlation_id: Uuid,
    pub order_number: String,
    pub customer_email: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub gateway_status: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
}

/// Orchestrates multi-step payment operations: each combines a gateway call
/// with a reconciler apply and error-code-specific recovery.
pub struct OrderActionService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<GatewayClient>,
    reconciler: Arc<StatusReconciler>,
    wallet: Arc<WalletService>,
    verification: Arc<VerificationTokenService>,
    config: GatewayConfig,
}

impl OrderActionService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<GatewayClient>,
        reconciler: Arc<StatusReconciler>,
        wallet: Arc<WalletService>,
        verification: Arc<VerificationTokenService>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            reconciler,
            wallet,
            verification,
            config,
        }
    }

    /// Admin actions are authorized by the order's correlation UUID, which
    /// is opaque, unlike the guessable order number.
    async fn verify(
        &self,
        order_number: &str,
        correlation_id: Uuid,
    ) -> Result<VerifiedOrder, ServiceError> {
        let order = order::Entity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_number} not found")))?;

        if order.id != correlation_id {
            warn!(order_number = %order_number, "correlation id mismatch on admin action");
            return Err(ServiceError::Unauthorized(
                "Request parameter mismatch".to_string(),
            ));
        }

        let instrument = payment_instrument::Entity::find()
            .filter(payment_instrument::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?
            .into_iter()
            .find(payment_instrument::Model::is_gateway_instrument)
            .ok_or_else(|| {
                ServiceError::NotFound("No gateway payment instrument for order".to_string())
            })?;

        let transaction_id = instrument
            .transaction_id
            .clone()
            .filter(|t| !t.is_empty());
        let hosted_checkout_id = instrument
            .hosted_checkout_id
            .clone()
            .filter(|h| !h.is_empty());
        if transaction_id.is_none() && hosted_checkout_id.is_none() {
            return Err(ServiceError::ValidationError(
                "Missing transaction id for order".to_string(),
            ));
        }

        Ok(VerifiedOrder {
            order,
            instrument,
            transaction_id,
            hosted_checkout_id,
        })
    }

    fn require_transaction_id(verified: &VerifiedOrder) -> Result<&str, ServiceError> {
        verified
            .transaction_id
            .as_deref()
            .ok_or_else(|| ServiceError::ValidationError("Missing transaction id for order".to_string()))
    }

    fn check_tid_param(
        verified: &VerifiedOrder,
        tid_param: Option<&str>,
    ) -> Result<(), ServiceError> {
        if let Some(param) = tid_param {
            if verified.transaction_id.as_deref() != Some(param) {
                return Err(ServiceError::ValidationError("ID mismatch".to_string()));
            }
        }
        Ok(())
    }

    /// Pulls the payment object out of the varying envelope shapes the
    /// gateway uses across endpoints.
    fn extract_payment_value(response: &Value) -> Option<Value> {
        if response.get("id").is_some() && response.get("statusOutput").is_some() {
            return Some(response.clone());
        }
        if let Some(payment) = response.get("payment") {
            return Some(payment.clone());
        }
        if let Some(payment) = response
            .get("paymentResult")
            .and_then(|r| r.get("payment"))
        {
            return Some(payment.clone());
        }
        response
            .get("createdPaymentOutput")
            .and_then(|c| c.get("payment"))
            .cloned()
    }

    /// Re-fetches the authoritative gateway status and reconciles it; the
    /// recovery path for "transaction not in expected state" rejections.
    async fn refresh(&self, verified: &VerifiedOrder) -> Result<ReconcileOutcome, ServiceError> {
        let response = match (&verified.transaction_id, &verified.hosted_checkout_id) {
            (Some(tid), _) => self.gateway.get_payment(tid).await?,
            (None, Some(hid)) => self.gateway.get_hosted_checkout(hid).await?,
            (None, None) => {
                return Err(ServiceError::ValidationError(
                    "Missing transaction id for order".to_string(),
                ))
            }
        };
        self.store_tokens_from_hosted_output(&verified.order, &response).await;
        let payment = Self::extract_payment_value(&response).ok_or_else(|| {
            ServiceError::GatewayRejection("Missing information in the response.".to_string())
        })?;
        self.reconciler
            .apply_value(&verified.order.order_number, payment)
            .await
    }

    /// Approves a transaction held for fraud review.
    #[instrument(skip(self), fields(order_number = %order_number))]
    pub async fn approve_fraud_pending(
        &self,
        order_number: &str,
        correlation_id: Uuid,
    ) -> Result<ActionOutcome, ServiceError> {
        let verified = self.verify(order_number, correlation_id).await?;
        let tid = Self::require_transaction_id(&verified)?;

        match self.gateway.approve_fraud_pending(tid).await {
            Ok(response) => {
                if response.get("paymentOutput").is_none() {
                    return Err(ServiceError::GatewayRejection(
                        "Missing payment information".to_string(),
                    ));
                }
                let outcome = self
                    .reconciler
                    .apply_value(order_number, response)
                    .await?;
                Ok(outcome.into())
            }
            Err(err) if err.has_code(&GatewayErrorCode::PaymentNotInProcessableState) => {
                let outcome = self.refresh(&verified).await?;
                Ok(ActionOutcome {
                    message: Some(format!(
                        "Transaction was not in an approvable state; resynced to {}",
                        outcome.status
                    )),
                    reconcile: Some(outcome),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Approves a transaction pending merchant approval (delayed capture).
    #[instrument(skip(self), fields(order_number = %order_number))]
    pub async fn approve_pending_approval(
        &self,
        order_number: &str,
        correlation_id: Uuid,
    ) -> Result<ActionOutcome, ServiceError> {
        let verified = self.verify(order_number, correlation_id).await?;
        let tid = Self::require_transaction_id(&verified)?.to_string();
        let amount = verified.instrument.amount.ok_or_else(|| {
            ServiceError::ValidationError("Instrument carries no authorized amount".to_string())
        })?;
        let payload = build_approve_payment(&verified.order, amount);

        match self.gateway.approve_payment(&tid, &payload).await {
            Ok(response) => {
                let payment = Self::extract_payment_value(&response).ok_or_else(|| {
                    ServiceError::GatewayRejection("Missing payment information".to_string())
                })?;
                let outcome = self.reconciler.apply_value(order_number, payment).await?;
                Ok(outcome.into())
            }
            Err(err) => self.recover_approve_failure(&verified, err).await,
        }
    }

    async fn recover_approve_failure(
        &self,
        verified: &VerifiedOrder,
        err: GatewayError,
    ) -> Result<ActionOutcome, ServiceError> {
        if err.http_status() == Some(404) {
            return Err(ServiceError::NotFound("Transaction ID not found".to_string()));
        }
        if err.http_status() == Some(402)
            || err.has_code(&GatewayErrorCode::PaymentNotInProcessableState)
        {
            let outcome = self.refresh(verified).await?;
            return Ok(ActionOutcome {
                message: Some(format!(
                    "Could not approve transaction as it was not in the correct status: {}",
                    outcome.status
                )),
                reconcile: Some(outcome),
            });
        }
        if err.has_code(&GatewayErrorCode::ApproveAmountTooLarge) {
            // resync so the operator sees the authoritative amount
            let _ = self.refresh(verified).await;
            let code = GatewayErrorCode::ApproveAmountTooLarge;
            return Err(ServiceError::GatewayRejection(
                code.operator_message().unwrap_or("Amount was too large").to_string(),
            ));
        }
        Err(err.into())
    }

    /// Cancels an uncaptured payment.
    #[instrument(skip(self), fields(order_number = %order_number))]
    pub async fn cancel_payment(
        &self,
        order_number: &str,
        correlation_id: Uuid,
        tid_param: Option<&str>,
    ) -> Result<ActionOutcome, ServiceError> {
        let verified = self.verify(order_number, correlation_id).await?;
        Self::check_tid_param(&verified, tid_param)?;
        let tid = Self::require_transaction_id(&verified)?;

        match self.gateway.cancel_payment(tid).await {
            Ok(response) => {
                let payment = Self::extract_payment_value(&response).ok_or_else(|| {
                    ServiceError::GatewayRejection("Missing payment information".to_string())
                })?;
                let outcome = self.reconciler.apply_value(order_number, payment).await?;
                Ok(outcome.into())
            }
            Err(err) if err.has_code(&GatewayErrorCode::PaymentNotCancellable) => {
                let code = GatewayErrorCode::PaymentNotCancellable;
                Err(ServiceError::GatewayRejection(
                    code.operator_message().unwrap_or("Payment not cancellable").to_string(),
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Admin "refresh status" action: fetch and reconcile the authoritative
    /// gateway state.
    #[instrument(skip(self), fields(order_number = %order_number))]
    pub async fn refresh_status(
        &self,
        order_number: &str,
        correlation_id: Uuid,
        tid_param: Option<&str>,
    ) -> Result<ActionOutcome, ServiceError> {
        let verified = self.verify(order_number, correlation_id).await?;
        Self::check_tid_param(&verified, tid_param)?;
        let outcome = self.refresh(&verified).await?;
        Ok(outcome.into())
    }

    /// Creates a refund after enforcing the refundable balance: the ledger's
    /// authorized amount minus all prior refunds the gateway has not
    /// classified unsuccessful. The check runs against a freshly resynced
    /// ledger and before any gateway call.
    #[instrument(skip(self), fields(order_number = %order_number, amount = %amount))]
    pub async fn create_refund(
        &self,
        order_number: &str,
        correlation_id: Uuid,
        amount: Decimal,
        reason: &str,
        tid_param: Option<&str>,
    ) -> Result<ActionOutcome, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Refund amount must be greater than 0".to_string(),
            ));
        }
        if reason.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Refund reason is required".to_string(),
            ));
        }
        let verified = self.verify(order_number, correlation_id).await?;
        Self::check_tid_param(&verified, tid_param)?;
        let tid = Self::require_transaction_id(&verified)?.to_string();

        // resync so the balance check sees the gateway's latest view; the
        // stored ledger still enforces the cap when the gateway is down
        if let Err(e) = self.refresh(&verified).await {
            warn!(order_number = %order_number, error = %e, "status resync before refund failed");
        }
        let order = order::Entity::find_by_id(verified.order.id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_number} not found")))?;
        let ledger = PaymentLedger::parse_or_default(order.payment_ledger.as_deref());
        let available = ledger.available_to_refund();
        if amount > available {
            return Err(ServiceError::ValidationError(
                "Amount to refund is greater than the amount available to refund".to_string(),
            ));
        }

        let payload = build_refund(&order, amount, Utc::now());
        match self.gateway.refund_payment(&tid, &payload).await {
            Ok(response) => {
                if response.get("refundOutput").is_none() {
                    return Err(ServiceError::GatewayRejection(
                        "Missing information in the response.".to_string(),
                    ));
                }
                let outcome = self.reconciler.apply_value(order_number, response).await?;
                let note = format!("Refund of {} {}. Reason: {}", order.currency, amount, reason);
                let message = self.append_order_note(&order, &note).await;
                Ok(ActionOutcome {
                    reconcile: Some(outcome),
                    message,
                })
            }
            Err(err) if err.has_code(&GatewayErrorCode::RefundAmountTooLarge) => {
                let code = GatewayErrorCode::RefundAmountTooLarge;
                Err(ServiceError::GatewayRejection(
                    code.operator_message().unwrap_or("Refund amount too large").to_string(),
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Fetches the latest status for a refund and reconciles it.
    #[instrument(skip(self), fields(order_number = %order_number, refund_id = %refund_id))]
    pub async fn get_refund_status(
        &self,
        order_number: &str,
        correlation_id: Uuid,
        refund_id: &str,
    ) -> Result<ActionOutcome, ServiceError> {
        let verified = self.verify(order_number, correlation_id).await?;
        let response = self.gateway.get_refund(refund_id).await?;
        if response.get("refundOutput").is_none() {
            return Err(ServiceError::GatewayRejection(
                "Missing refund information".to_string(),
            ));
        }
        let outcome = self
            .reconciler
            .apply_value(&verified.order.order_number, response)
            .await?;
        Ok(outcome.into())
    }

    /// Cancels a pending refund, then resyncs its status.
    #[instrument(skip(self), fields(order_number = %order_number, refund_id = %refund_id))]
    pub async fn cancel_refund(
        &self,
        order_number: &str,
        correlation_id: Uuid,
        refund_id: &str,
    ) -> Result<ActionOutcome, ServiceError> {
        let verified = self.verify(order_number, correlation_id).await?;
        self.gateway.cancel_refund(refund_id).await?;

        let outcome = self
            .get_refund_status(order_number, correlation_id, refund_id)
            .await?;

        let order = order::Entity::find_by_id(verified.order.id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_number} not found")))?;
        let ledger = PaymentLedger::parse_or_default(order.payment_ledger.as_deref());
        let refunded = ledger
            .refunds
            .iter()
            .find(|r| r.id == refund_id)
            .map(|r| r.amount)
            .unwrap_or(Decimal::ZERO);
        let note = format!("Refund of {} {} cancelled.", order.currency, refunded);
        let message = self.append_order_note(&order, &note).await;

        Ok(ActionOutcome {
            reconcile: outcome.reconcile,
            message,
        })
    }

    /// Creates a direct (card or redirect) payment for an order and
    /// reconciles the synchronous response.
    #[instrument(skip(self, card), fields(order_number = %order_number))]
    pub async fn create_payment(
        &self,
        order_number: &str,
        correlation_id: Uuid,
        card: CardDetails,
        api_order: bool,
        client_ip: Option<String>,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let verified = self.verify_for_checkout(order_number, correlation_id).await?;
        let lines = self.order_lines(&verified.order).await?;
        let payload = build_create_payment(
            &verified.order,
            &lines,
            &verified.instrument,
            &card,
            &self.config,
            &CreatePaymentOptions {
                hosted: false,
                api_order,
                client_ip,
                stored_tokens: Vec::new(),
            },
        );

        let response = self.gateway.create_payment(&payload).await?;
        let payment = Self::extract_payment_value(&response).ok_or_else(|| {
            ServiceError::GatewayRejection(
                "There were errors during the payment transaction.".to_string(),
            )
        })?;

        let outcome = self.reconciler.apply_value(order_number, payment).await?;
        if outcome.status == GatewayStatus::Rejected {
            return Err(ServiceError::GatewayRejection(
                "There were errors during the payment transaction.".to_string(),
            ));
        }

        let card_token = response
            .get("creationOutput")
            .and_then(|c| c.get("token"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let merchant_action = response.get("merchantAction");
        let (action_required, redirect_url, verification_token) = match merchant_action {
            Some(action) => {
                let redirect_url = action
                    .get("redirectData")
                    .and_then(|d| d.get("redirectURL"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let return_mac = action
                    .get("redirectData")
                    .and_then(|d| d.get("RETURNMAC"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let token = self.verification.issue(verified.order.id, return_mac)?;
                (true, redirect_url, Some(token))
            }
            None => (false, None, None),
        };

        Ok(CheckoutOutcome {
            reconcile: Some(outcome),
            action_required,
            redirect_url,
            verification_token,
            hosted_checkout_id: None,
            card_token,
        })
    }

    /// Starts a hosted-checkout flow: the gateway returns a page URL, a
    /// return-MAC and a hosted-checkout id this service must remember.
    #[instrument(skip(self), fields(order_number = %order_number))]
    pub async fn create_hosted_checkout(
        &self,
        order_number: &str,
        correlation_id: Uuid,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let verified = self.verify_for_checkout(order_number, correlation_id).await?;
        let lines = self.order_lines(&verified.order).await?;
        let stored_tokens = match verified.order.customer_id {
            Some(customer_id) if self.config.store_tokens => {
                self.wallet.tokens_for_customer(customer_id).await?
            }
            _ => Vec::new(),
        };
        let payload = build_create_payment(
            &verified.order,
            &lines,
            &verified.instrument,
            &CardDetails::default(),
            &self.config,
            &CreatePaymentOptions {
                hosted: true,
                api_order: false,
                client_ip: None,
                stored_tokens,
            },
        );

        let response = self.gateway.create_hosted_checkout(&payload).await?;
        let partial_url = response
            .get("partialRedirectUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ServiceError::GatewayRejection("Missing hosted checkout URL".to_string())
            })?;
        let hosted_checkout_id = response
            .get("hostedCheckoutId")
            .and_then(Value::as_str)
            .map(str::to_string);
        let return_mac = response
            .get("RETURNMAC")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if let Some(hid) = &hosted_checkout_id {
            let mut update: payment_instrument::ActiveModel = verified.instrument.clone().into();
            update.hosted_checkout_id = Set(Some(hid.clone()));
            update.updated_at = Set(Some(Utc::now()));
            update.update(&*self.db).await?;
        }

        let token = self.verification.issue(verified.order.id, return_mac)?;
        Ok(CheckoutOutcome {
            reconcile: None,
            action_required: true,
            redirect_url: Some(format!("https://payment.{partial_url}")),
            verification_token: Some(token),
            hosted_checkout_id,
            card_token: None,
        })
    }

    /// Handles the shopper returning from a 3DS/hosted redirect: validates
    /// the signed verification token against the gateway's return-MAC,
    /// fetches the authoritative status, persists any newly issued wallet
    /// tokens and reconciles.
    #[instrument(skip(self, token, return_mac))]
    pub async fn handle_redirect_return(
        &self,
        token: &str,
        return_mac: &str,
        payment_ref: Option<&str>,
        hosted_checkout_id: Option<&str>,
    ) -> Result<RedirectOutcome, ServiceError> {
        let order_id = self.verification.validate(token, return_mac)?;
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let response = match (hosted_checkout_id, payment_ref) {
            (Some(hid), _) => self.gateway.get_hosted_checkout(hid).await?,
            (None, Some(reference)) => self.gateway.get_payment(reference).await?,
            (None, None) => {
                return Err(ServiceError::ValidationError(
                    "Missing verification reference".to_string(),
                ))
            }
        };

        self.store_tokens_from_hosted_output(&order, &response).await;
        let payment = Self::extract_payment_value(&response).ok_or_else(|| {
            ServiceError::GatewayRejection("Missing information in the response.".to_string())
        })?;
        let outcome = self
            .reconciler
            .apply_value(&order.order_number, payment)
            .await?;

        let disposition = if outcome.status.is_terminal_failure()
            || matches!(
                outcome.status,
                GatewayStatus::Reversed | GatewayStatus::Chargebacked
            ) {
            RedirectDisposition::Failure
        } else {
            RedirectDisposition::Confirmation
        };

        Ok(RedirectOutcome {
            disposition,
            reconcile: Some(outcome),
        })
    }

    /// IIN lookup: resolves the card product for the first digits of a PAN
    /// so the storefront can pick the right payment product id.
    pub async fn lookup_card_product(&self, bin: &str) -> Result<Value, ServiceError> {
        let digits: String = bin.chars().filter(char::is_ascii_digit).collect();
        if digits.len() < 6 {
            return Err(ServiceError::ValidationError(
                "At least the first six card digits are required".to_string(),
            ));
        }
        let response = self.gateway.get_card_product(&digits).await?;
        if response.get("paymentProductId").is_none() {
            return Err(ServiceError::GatewayRejection(
                "Unknown card product".to_string(),
            ));
        }
        Ok(response)
    }

    /// Orders sitting in a given gateway status, for the admin action
    /// screens. Cancelled and failed orders are excluded.
    pub async fn list_orders_with_gateway_status(
        &self,
        status: GatewayStatus,
    ) -> Result<Vec<PendingOrderSummary>, ServiceError> {
        let orders = order::Entity::find()
            .filter(order::Column::GatewayStatus.eq(status.to_string()))
            .filter(
                Condition::all()
                    .add(order::Column::Status.ne(OrderStatus::Cancelled.to_string()))
                    .add(order::Column::Status.ne(OrderStatus::Failed.to_string())),
            )
            .order_by_asc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(orders
            .into_iter()
            .map(|o| PendingOrderSummary {
                correlation_id: o.id,
                order_number: o.order_number,
                customer_email: o.customer_email,
                total_amount: o.total_amount,
                currency: o.currency,
                gateway_status: o.gateway_status,
                created_at: o.created_at,
            })
            .collect())
    }

    // helpers

    /// Checkout flows carry the correlation id from the session rather than
    /// an operator form, but the check is the same.
    async fn verify_for_checkout(
        &self,
        order_number: &str,
        correlation_id: Uuid,
    ) -> Result<VerifiedOrder, ServiceError> {
        // a fresh order has no transaction id yet, so skip that requirement
        let order = order::Entity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_number} not found")))?;
        if order.id != correlation_id {
            return Err(ServiceError::Unauthorized(
                "Request parameter mismatch".to_string(),
            ));
        }
        let instrument = payment_instrument::Entity::find()
            .filter(payment_instrument::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?
            .into_iter()
            .find(payment_instrument::Model::is_gateway_instrument)
            .ok_or_else(|| {
                ServiceError::NotFound("No gateway payment instrument for order".to_string())
            })?;
        let transaction_id = instrument.transaction_id.clone().filter(|t| !t.is_empty());
        let hosted_checkout_id = instrument.hosted_checkout_id.clone().filter(|h| !h.is_empty());
        Ok(VerifiedOrder {
            order,
            instrument,
            transaction_id,
            hosted_checkout_id,
        })
    }

    async fn order_lines(&self, order: &order::Model) -> Result<Vec<order_line::Model>, ServiceError> {
        Ok(order_line::Entity::find()
            .filter(order_line::Column::OrderId.eq(order.id))
            .order_by_asc(order_line::Column::Position)
            .all(&*self.db)
            .await?)
    }

    /// Persists wallet tokens carried in a hosted-checkout status response.
    async fn store_tokens_from_hosted_output(&self, order: &order::Model, response: &Value) {
        if !self.config.store_tokens {
            return;
        }
        let Some(customer_id) = order.customer_id else {
            return;
        };
        let Some(created) = response.get("createdPaymentOutput") else {
            return;
        };
        let Some(tokens) = created.get("tokens").and_then(Value::as_str) else {
            return;
        };
        let card_output = created
            .get("payment")
            .and_then(|p| p.get("paymentOutput"))
            .and_then(|p| p.get("cardPaymentMethodSpecificOutput"))
            .cloned()
            .and_then(|v| serde_json::from_value::<CardMethodOutput>(v).ok());
        let Some(card_output) = card_output else {
            return;
        };
        if let Err(e) = self
            .wallet
            .store_hosted_tokens(customer_id, tokens, &card_output)
            .await
        {
            warn!(order_number = %order.order_number, error = %e, "failed to persist wallet tokens");
        }
    }

    /// Appends a history note to the order; a failure is reported in the
    /// action message, never by undoing the refund that already happened.
    async fn append_order_note(&self, order: &order::Model, note: &str) -> Option<String> {
        let fresh = match order::Entity::find_by_id(order.id).one(&*self.db).await {
            Ok(Some(fresh)) => fresh,
            _ => {
                warn!(order_number = %order.order_number, "could not reload order for history note");
                return Some("Refund processed but could not record the order history note".to_string());
            }
        };
        let combined = match &fresh.notes {
            Some(existing) if !existing.is_empty() => format!("{existing}\n{note}"),
            _ => note.to_string(),
        };
        let mut update: order::ActiveModel = fresh.into();
        update.notes = Set(Some(combined));
        update.updated_at = Set(Some(Utc::now()));
        match update.update(&*self.db).await {
            Ok(_) => None,
            Err(e) => {
                warn!(order_number = %order.order_number, error = %e, "failed to append order note");
                Some("Refund processed but could not record the order history note".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_payment_value_handles_envelope_shapes() {
        let direct = json!({ "id": "TX1", "statusOutput": {}, "status": "PAID" });
        assert_eq!(
            OrderActionService::extract_payment_value(&direct).unwrap()["id"],
            "TX1"
        );

        let wrapped = json!({ "payment": { "id": "TX2" } });
        assert_eq!(
            OrderActionService::extract_payment_value(&wrapped).unwrap()["id"],
            "TX2"
        );

        let result = json!({ "paymentResult": { "payment": { "id": "TX3" } } });
        assert_eq!(
            OrderActionService::extract_payment_value(&result).unwrap()["id"],
            "TX3"
        );

        let hosted = json!({ "createdPaymentOutput": { "payment": { "id": "TX4" } } });
        assert_eq!(
            OrderActionService::extract_payment_value(&hosted).unwrap()["id"],
            "TX4"
        );

        assert!(OrderActionService::extract_payment_value(&json!({ "errors": [] })).is_none());
    }
}
