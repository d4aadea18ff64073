#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use payconnect_api::{
    app_router,
    config::{AppConfig, GatewayConfig, NotificationConfig},
    db,
    entities::{order, payment_instrument},
    events::EventSender,
    services::notifications::RecordingEmailSender,
    AppState,
};

pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Application harness over an in-memory SQLite database.
pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub emails: Arc<RecordingEmailSender>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(default_test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let connection = db::establish_connection(&config)
            .await
            .expect("sqlite connection");
        db::run_migrations(&connection).await.expect("migrations");
        let database = Arc::new(connection);

        let (event_tx, event_rx) = mpsc::channel(64);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(payconnect_api::events::process_events(event_rx));

        let emails = Arc::new(RecordingEmailSender::default());
        let state = AppState::build(database, config, emails.clone(), event_sender)
            .expect("app state");
        let router = app_router(state.clone());

        Self {
            state,
            router,
            emails,
            _event_task: event_task,
        }
    }

    /// Inserts an order in the given lifecycle status.
    pub async fn seed_order(&self, order_number: &str, status: &str) -> order::Model {
        let now = Utc::now();
        order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(order_number.to_string()),
            customer_id: Set(None),
            customer_no: Set(Some("C100".to_string())),
            customer_email: Set("shopper@example.com".to_string()),
            customer_locale: Set(Some("en_US".to_string())),
            status: Set(status.to_string()),
            export_status: Set("not_exported".to_string()),
            payment_status: Set("not_paid".to_string()),
            gateway_status: Set(None),
            currency: Set("USD".to_string()),
            total_amount: Set(dec!(50.00)),
            shipping_total: Set(dec!(0.00)),
            tax_total: Set(dec!(0.00)),
            billing_address: Set(None),
            shipping_address: Set(None),
            payment_ledger: Set(None),
            refund_ids: Set(None),
            transaction_log: Set(None),
            notes: Set(None),
            placed_at: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed order")
    }

    /// Attaches a gateway payment instrument to an order.
    pub async fn seed_instrument(
        &self,
        order_id: Uuid,
        transaction_id: Option<&str>,
    ) -> payment_instrument::Model {
        let now = Utc::now();
        payment_instrument::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            processor: Set(payment_instrument::PROCESSOR_CARD.to_string()),
            payment_method: Set(payment_instrument::methods::CREDIT_CARD.to_string()),
            transaction_id: Set(transaction_id.map(str::to_string)),
            processor_reference: Set(None),
            hosted_checkout_id: Set(None),
            amount: Set(Some(dec!(50.00))),
            currency: Set(Some("USD".to_string())),
            card_holder: Set(Some("Test Shopper".to_string())),
            card_number_masked: Set(Some("456735******7977".to_string())),
            card_expiry_month: Set(Some(12)),
            card_expiry_year: Set(Some(2029)),
            card_product_id: Set(Some(1)),
            card_token: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed instrument")
    }

    /// Writes a ledger blob directly onto an order, bypassing the reconciler.
    pub async fn set_ledger(&self, order_id: Uuid, ledger_json: &str) {
        let existing = order::Entity::find_by_id(order_id)
            .one(&*self.state.db)
            .await
            .expect("load order")
            .expect("order exists");
        let mut update: order::ActiveModel = existing.into();
        update.payment_ledger = Set(Some(ledger_json.to_string()));
        update.update(&*self.state.db).await.expect("set ledger");
    }

    pub async fn reload_order(&self, order_id: Uuid) -> order::Model {
        order::Entity::find_by_id(order_id)
            .one(&*self.state.db)
            .await
            .expect("load order")
            .expect("order exists")
    }

    pub async fn reload_instrument(&self, id: Uuid) -> payment_instrument::Model {
        payment_instrument::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("load instrument")
            .expect("instrument exists")
    }
}

pub fn default_test_config() -> AppConfig {
    let mut gateway = GatewayConfig::sandbox("TESTMERCHANT");
    gateway.webhook_secret = Some(WEBHOOK_SECRET.to_string());
    let mut config = AppConfig::new("sqlite::memory:", gateway);
    config.notifications = NotificationConfig {
        from_address: "no-reply@shop.example.com".to_string(),
        fraud_manager_address: Some("fraud@shop.example.com".to_string()),
        send_fraud_manager: true,
        send_on_fraud_pending: true,
        send_on_approval_pending: true,
        send_on_paid: true,
        send_on_redirected: true,
        send_on_waiting_payment: true,
        send_on_rejected: true,
    };
    config
}

/// Card payment notification payload in the gateway's shape.
pub fn payment_payload(tx_id: &str, status: &str, amount_minor: i64, currency: &str) -> Value {
    json!({
        "id": tx_id,
        "status": status,
        "statusOutput": {
            "statusCategory": "COMPLETED",
            "statusCode": 1000,
            "statusCodeChangeDateTime": "20260314120000"
        },
        "paymentOutput": {
            "amountOfMoney": { "amount": amount_minor, "currencyCode": currency },
            "references": { "merchantReference": "ignored-here" },
            "cardPaymentMethodSpecificOutput": {
                "paymentProductId": 1,
                "authorisationCode": "AUTH42"
            }
        }
    })
}

/// Refund notification payload.
pub fn refund_payload(refund_id: &str, status: &str, amount_minor: i64, category: &str) -> Value {
    json!({
        "id": refund_id,
        "status": status,
        "statusOutput": { "statusCategory": category, "statusCode": 800 },
        "refundOutput": {
            "amountOfMoney": { "amount": amount_minor, "currencyCode": "USD" }
        }
    })
}

/// Ledger blob with a captured payment and optional prior refunds.
pub fn ledger_with_payment(amount: Decimal, refunds: &[(&str, Decimal, &str)]) -> String {
    let refund_values: Vec<Value> = refunds
        .iter()
        .map(|(id, amount, category)| {
            json!({
                "amount": amount,
                "status": "REFUNDED",
                "statusOutput": { "statusCategory": category },
                "date": Utc::now(),
                "id": id
            })
        })
        .collect();
    json!({
        "schemaVersion": 1,
        "originalAmount": amount,
        "payment": {
            "amount": amount,
            "status": "CAPTURED",
            "statusOutput": { "statusCategory": "COMPLETED" },
            "date": Utc::now(),
            "method": "1",
            "authCode": "AUTH42",
            "id": "TX-LEDGER"
        },
        "refunds": refund_values
    })
    .to_string()
}
