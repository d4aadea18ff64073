use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{order, payment_instrument};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::ledger::{
    append_log_entry, from_minor_units, PaymentLedger, RefundRecord, TransactionLogEntry,
};
use crate::models::payload::StatusPayload;
use crate::models::status::{ExportStatus, GatewayStatus, OrderStatus, PaymentState};
use crate::services::notifications::NotificationDispatcher;

/// Result of one reconciliation pass, echoed back to callers so storefront
/// and admin surfaces can route on it.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub status: GatewayStatus,
    pub payment_auth_success: bool,
    pub payment_received: bool,
}

/// Mutable view of the order fields the transition table may touch.
struct OrderState {
    status: OrderStatus,
    export_status: ExportStatus,
    payment_state: PaymentState,
    placed_at: Option<DateTime<Utc>>,
}

impl OrderState {
    fn load(model: &order::Model) -> Result<Self, ServiceError> {
        Ok(Self {
            status: OrderStatus::from_str(&model.status)
                .map_err(|_| ServiceError::OrderError(format!("unknown order status {}", model.status)))?,
            export_status: ExportStatus::from_str(&model.export_status)
                .map_err(|_| ServiceError::OrderError(format!("unknown export status {}", model.export_status)))?,
            payment_state: PaymentState::from_str(&model.payment_status)
                .map_err(|_| ServiceError::OrderError(format!("unknown payment status {}", model.payment_status)))?,
            placed_at: model.placed_at,
        })
    }

    /// Places a not-yet-placed order. A submission failure aborts the whole
    /// reconciliation; the caller rolls back everything.
    fn submit(&mut self, now: DateTime<Utc>) -> Result<(), ServiceError> {
        if self.status != OrderStatus::Created {
            return Err(ServiceError::OrderError(format!(
                "order cannot be submitted from status {}",
                self.status
            )));
        }
        self.status = OrderStatus::New;
        self.placed_at = Some(now);
        Ok(())
    }
}

/// Applies gateway status notifications to orders exactly once. The sole
/// writer of the payment ledger. Notifications from any source (synchronous
/// response, webhook push, polled refresh) funnel through [`Self::apply`].
pub struct StatusReconciler {
    db: Arc<DatabaseConnection>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    dispatcher: Arc<NotificationDispatcher>,
    event_sender: Option<EventSender>,
    enable_transaction_log: bool,
}

impl StatusReconciler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        dispatcher: Arc<NotificationDispatcher>,
        event_sender: Option<EventSender>,
        enable_transaction_log: bool,
    ) -> Self {
        Self {
            db,
            locks: DashMap::new(),
            dispatcher,
            event_sender,
            enable_transaction_log,
        }
    }

    fn order_lock(&self, order_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(order_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Resolves an order by its human-facing number and reconciles.
    #[instrument(skip(self, payload), fields(order_number = %order_number, status = %payload.status))]
    pub async fn apply_by_order_number(
        &self,
        order_number: &str,
        payload: &StatusPayload,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let order = order::Entity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_number} not found")))?;
        self.apply(order.id, payload).await
    }

    /// Parses a raw gateway value and reconciles it against an order.
    pub async fn apply_value(
        &self,
        order_number: &str,
        raw: serde_json::Value,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let payload: StatusPayload = serde_json::from_value(raw)
            .map_err(|e| ServiceError::ValidationError(format!("malformed status payload: {e}")))?;
        self.apply_by_order_number(order_number, &payload).await
    }

    /// One idempotent reconciliation pass. Validation happens before any
    /// mutation; the ledger write, instrument update and order transition
    /// commit atomically under a per-order lock; emails and events fire
    /// after commit and never roll it back.
    #[instrument(skip(self, payload), fields(order_id = %order_id, status = %payload.status, tx_id = %payload.id))]
    pub async fn apply(
        &self,
        order_id: Uuid,
        payload: &StatusPayload,
    ) -> Result<ReconcileOutcome, ServiceError> {
        payload
            .validate_shape()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let lock = self.order_lock(order_id);
        let _guard = lock.lock().await;

        let txn = self.db.begin().await?;
        let now = Utc::now();

        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;
        let instrument = Self::select_instrument(&txn, order_id, payload).await?;

        let original_status = order
            .gateway_status
            .as_deref()
            .and_then(|s| GatewayStatus::from_str(s).ok());
        let mut state = OrderState::load(&order)?;
        let status_before = state.status;
        let mut ledger = PaymentLedger::parse_or_default(order.payment_ledger.as_deref());

        let mut outcome = ReconcileOutcome {
            status: payload.status,
            payment_auth_success: false,
            payment_received: false,
        };

        // A late pending notification must not resurrect a payment the
        // gateway already terminated. The ledger still records it below.
        let regression = matches!(original_status, Some(orig) if orig.is_terminal_failure())
            && payload.status.is_auth_pending();
        if regression {
            warn!(
                original = ?original_status,
                incoming = %payload.status,
                "ignoring non-terminal notification after terminal gateway status"
            );
        }

        let mut recorded_gateway_status = order.gateway_status.clone();
        let mut instrument_update: payment_instrument::ActiveModel = instrument.clone().into();
        let mut instrument_dirty = false;

        if let Some(payment_output) = &payload.payment_output {
            if !regression {
                Self::apply_transition(payload.status, &mut state, &mut outcome)?;
                recorded_gateway_status = Some(payload.status.to_string());
            }

            // transaction id is first-write-wins
            if instrument
                .transaction_id
                .as_deref()
                .unwrap_or("")
                .is_empty()
            {
                instrument_update.transaction_id = Set(Some(payload.id.clone()));
                instrument_dirty = true;
            }
            if instrument.processor_reference.is_none() {
                let reference = payment_output
                    .references
                    .as_ref()
                    .and_then(|r| r.payment_reference.clone())
                    .unwrap_or_else(|| instrument.processor.clone());
                instrument_update.processor_reference = Set(Some(reference));
                instrument_dirty = true;
            }
            if let Some(amount) = &payment_output.amount_of_money {
                let authorized = from_minor_units(amount.amount);
                instrument_update.amount = Set(Some(authorized));
                instrument_update.currency = Set(Some(amount.currency_code.clone()));
                instrument_dirty = true;

                ledger.payment.amount = authorized;
                if ledger.original_amount == Decimal::ZERO {
                    ledger.original_amount = authorized;
                }
            }

            // shape was validated above, so exactly one variant is present
            let method = payment_output
                .method_output()
                .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
            if let Some(code) = method.authorisation_code() {
                ledger.payment.auth_code = Some(code.to_string());
            }
            if let Some(product_id) = method.payment_product_id() {
                ledger.payment.method = Some(product_id.to_string());
            }

            ledger.payment.date = Some(now);
            ledger.payment.id = Some(payload.id.clone());
            ledger.payment.status = Some(payload.status);
            ledger.payment.status_output = payload.status_output.clone();
        }

        if let Some(refund_output) = &payload.refund_output {
            let amount = refund_output
                .amount_of_money
                .as_ref()
                .map(|am| from_minor_units(am.amount))
                .unwrap_or(Decimal::ZERO);
            ledger.upsert_refund(RefundRecord {
                amount,
                status: Some(payload.status),
                status_output: payload.status_output.clone(),
                date: Some(now),
                id: payload.id.clone(),
            });
        }

        let refund_index = Self::sync_refund_index(order.refund_ids.as_deref(), &ledger)?;
        let ledger_json = ledger.to_json()?;

        let mut order_update = order::ActiveModel {
            status: Set(state.status.to_string()),
            export_status: Set(state.export_status.to_string()),
            payment_status: Set(state.payment_state.to_string()),
            gateway_status: Set(recorded_gateway_status),
            payment_ledger: Set(Some(ledger_json)),
            refund_ids: Set(Some(refund_index)),
            placed_at: Set(state.placed_at),
            updated_at: Set(Some(now)),
            version: Set(order.version + 1),
            ..Default::default()
        };

        if self.enable_transaction_log {
            let entry = TransactionLogEntry {
                transaction_date: now,
                status: payload.status,
                status_last_change: payload.status_last_change(),
                raw: serde_json::to_value(payload)?,
            };
            order_update.transaction_log =
                Set(Some(append_log_entry(order.transaction_log.as_deref(), entry)?));
        }

        // The version filter backstops the per-order lock for multi-instance
        // deployments sharing one database.
        let updated = order::Entity::update_many()
            .set(order_update)
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Version.eq(order.version))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            txn.rollback().await?;
            return Err(ServiceError::ConcurrentModification(order_id));
        }

        if instrument_dirty {
            instrument_update.updated_at = Set(Some(now));
            instrument_update.update(&txn).await?;
        }

        txn.commit().await.map_err(|e| {
            error!(
                order_id = %order_id,
                order_number = %order.order_number,
                status = %payload.status,
                error = %e,
                "reconciliation commit failed"
            );
            ServiceError::DatabaseError(e)
        })?;

        info!(
            order_id = %order_id,
            order_number = %order.order_number,
            status = %payload.status,
            auth_success = outcome.payment_auth_success,
            received = outcome.payment_received,
            "reconciliation applied"
        );

        // Side effects below are best-effort: a failed email or event is
        // logged and never surfaces as a reconciliation error.
        let send_email = payload.refund_output.is_none();
        let status_changed = payload.payment_output.is_some()
            && !regression
            && original_status != Some(payload.status);
        if send_email {
            if payload.status == GatewayStatus::PendingFraudApproval && status_changed {
                if let Err(e) = self.dispatcher.dispatch_fraud_alert(&order.order_number).await {
                    error!(order_number = %order.order_number, error = %e, "fraud alert failed");
                }
            }
            if status_changed {
                if let Err(e) = self
                    .dispatcher
                    .dispatch_customer_email(payload.status, &order.customer_email, &order.order_number)
                    .await
                {
                    error!(order_number = %order.order_number, error = %e, "status email failed");
                }
            }
        }

        self.emit_events(&order, status_before, &state, payload, status_changed)
            .await;

        Ok(outcome)
    }

    /// Order lifecycle transition for an incoming gateway status.
    fn apply_transition(
        incoming: GatewayStatus,
        state: &mut OrderState,
        outcome: &mut ReconcileOutcome,
    ) -> Result<(), ServiceError> {
        if incoming.is_terminal_failure() {
            if state.status == OrderStatus::Created {
                // never placed: terminal, irreversible
                state.status = OrderStatus::Failed;
            } else if !state.status.is_terminal() {
                state.status = OrderStatus::Cancelled;
            }
            // already cancelled/failed: idempotent no-op
        } else if incoming.is_settled() {
            match state.status {
                OrderStatus::Created => {
                    state.submit(Utc::now())?;
                    state.export_status = ExportStatus::Ready;
                    state.payment_state = PaymentState::Paid;
                }
                OrderStatus::New | OrderStatus::Open => {
                    if state.export_status == ExportStatus::NotExported {
                        state.export_status = ExportStatus::Ready;
                    }
                    if state.payment_state != PaymentState::Paid {
                        state.payment_state = PaymentState::Paid;
                    }
                }
                _ => {}
            }
            outcome.payment_auth_success = true;
            outcome.payment_received = true;
        } else if incoming.is_auth_pending() {
            if incoming.grants_auth_success() {
                outcome.payment_auth_success = true;
            }
            if !state.status.is_terminal() {
                state.export_status = ExportStatus::NotExported;
            }
        }
        Ok(())
    }

    /// Picks the gateway instrument the payload belongs to. A payment
    /// notification must match the instrument's transaction id once one is
    /// assigned; refund notifications carry the refund id and match any
    /// gateway instrument on the order.
    async fn select_instrument(
        txn: &DatabaseTransaction,
        order_id: Uuid,
        payload: &StatusPayload,
    ) -> Result<payment_instrument::Model, ServiceError> {
        let instruments = payment_instrument::Entity::find()
            .filter(payment_instrument::Column::OrderId.eq(order_id))
            .all(txn)
            .await?;

        let is_refund = payload.refund_output.is_some() && payload.payment_output.is_none();
        instruments
            .into_iter()
            .filter(|pi| pi.is_gateway_instrument())
            .find(|pi| match pi.transaction_id.as_deref() {
                Some(tid) if !tid.is_empty() && !is_refund => tid == payload.id,
                _ => true,
            })
            .ok_or_else(|| {
                ServiceError::NotFound("No gateway payment instrument for order".to_string())
            })
    }

    /// Keeps the order-level refund-id index a superset of the ledger's ids.
    fn sync_refund_index(
        existing: Option<&str>,
        ledger: &PaymentLedger,
    ) -> Result<String, ServiceError> {
        let mut ids: Vec<String> = match existing {
            None | Some("") => Vec::new(),
            Some(text) => serde_json::from_str(text).unwrap_or_default(),
        };
        for id in ledger.refund_ids() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(serde_json::to_string(&ids)?)
    }

    async fn emit_events(
        &self,
        order: &order::Model,
        status_before: OrderStatus,
        state: &OrderState,
        payload: &StatusPayload,
        status_changed: bool,
    ) {
        let Some(sender) = &self.event_sender else {
            return;
        };

        let mut events = Vec::new();
        if payload.refund_output.is_some() {
            events.push(Event::PaymentRefundUpdated {
                order_id: order.id,
                refund_id: payload.id.clone(),
                status: payload.status.to_string(),
            });
        }
        if payload.payment_output.is_some() {
            if payload.status.is_settled() {
                events.push(Event::PaymentCaptured(order.id));
            } else if payload.status.is_terminal_failure() {
                events.push(Event::PaymentFailed(order.id));
            } else if payload.status.grants_auth_success() {
                events.push(Event::PaymentAuthorized(order.id));
            }
        }
        if status_before != state.status {
            match state.status {
                OrderStatus::New => events.push(Event::OrderPlaced(order.id)),
                OrderStatus::Cancelled => events.push(Event::OrderCancelled(order.id)),
                OrderStatus::Failed => events.push(Event::OrderFailed(order.id)),
                _ => {}
            }
        }
        if status_changed {
            events.push(Event::OrderStatusChanged {
                order_id: order.id,
                old_status: order.gateway_status.clone(),
                new_status: payload.status.to_string(),
            });
        }

        for event in events {
            if let Err(e) = sender.send(event).await {
                warn!(order_id = %order.id, error = %e, "failed to send domain event");
            }
        }
    }
}
