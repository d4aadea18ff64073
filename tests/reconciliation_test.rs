//! End-to-end reconciliation behaviour over a real (in-memory) database:
//! lifecycle transitions, idempotence, refund dedup and the concurrency
//! guarantees around the ledger.

mod common;

use common::{payment_payload, refund_payload, TestApp};
use payconnect_api::models::ledger::PaymentLedger;
use rust_decimal_macros::dec;

#[tokio::test]
async fn created_order_paid_payload_submits_and_marks_paid() {
    let app = TestApp::new().await;
    let order = app.seed_order("ORD-100", "created").await;
    let instrument = app.seed_instrument(order.id, None).await;

    let payload = payment_payload("TX1", "PAID", 5000, "USD");
    let outcome = app
        .state
        .services
        .reconciler
        .apply_value("ORD-100", payload)
        .await
        .expect("reconciliation succeeds");

    assert!(outcome.payment_auth_success);
    assert!(outcome.payment_received);

    let order = app.reload_order(order.id).await;
    assert_eq!(order.status, "new");
    assert_eq!(order.export_status, "ready");
    assert_eq!(order.payment_status, "paid");
    assert_eq!(order.gateway_status.as_deref(), Some("PAID"));
    assert!(order.placed_at.is_some());

    let ledger = PaymentLedger::parse_or_default(order.payment_ledger.as_deref());
    assert_eq!(ledger.payment.amount, dec!(50.00));
    assert_eq!(ledger.payment.id.as_deref(), Some("TX1"));
    assert_eq!(ledger.payment.auth_code.as_deref(), Some("AUTH42"));

    // transaction id assigned first-write-wins
    let instrument = app.reload_instrument(instrument.id).await;
    assert_eq!(instrument.transaction_id.as_deref(), Some("TX1"));
    assert_eq!(instrument.amount, Some(dec!(50.00)));
}

#[tokio::test]
async fn applying_same_payload_twice_is_idempotent() {
    let app = TestApp::new().await;
    let order = app.seed_order("ORD-101", "created").await;
    app.seed_instrument(order.id, None).await;

    let payload = payment_payload("TX1", "PAID", 5000, "USD");
    app.state
        .services
        .reconciler
        .apply_value("ORD-101", payload.clone())
        .await
        .unwrap();
    let after_first = app.reload_order(order.id).await;
    let ledger_first = PaymentLedger::parse_or_default(after_first.payment_ledger.as_deref());
    let emails_first = app.emails.sent.lock().await.len();

    app.state
        .services
        .reconciler
        .apply_value("ORD-101", payload)
        .await
        .unwrap();
    let after_second = app.reload_order(order.id).await;
    let ledger_second = PaymentLedger::parse_or_default(after_second.payment_ledger.as_deref());

    assert_eq!(after_second.status, after_first.status);
    assert_eq!(after_second.export_status, after_first.export_status);
    assert_eq!(after_second.payment_status, after_first.payment_status);
    assert_eq!(ledger_second.payment.id, ledger_first.payment.id);
    assert_eq!(ledger_second.payment.amount, ledger_first.payment.amount);
    assert_eq!(ledger_second.refunds, ledger_first.refunds);

    // email only fires on an actual status delta
    assert_eq!(app.emails.sent.lock().await.len(), emails_first);
}

#[tokio::test]
async fn repeated_terminal_status_is_noop_without_email() {
    let app = TestApp::new().await;
    let order = app.seed_order("ORD-102", "new").await;
    app.seed_instrument(order.id, Some("TX1")).await;

    app.state
        .services
        .reconciler
        .apply_value("ORD-102", payment_payload("TX1", "CANCELLED", 5000, "USD"))
        .await
        .unwrap();
    let after_first = app.reload_order(order.id).await;
    assert_eq!(after_first.status, "cancelled");
    let emails_after_first = app.emails.sent.lock().await.len();
    assert!(emails_after_first > 0, "first cancellation notifies the customer");

    app.state
        .services
        .reconciler
        .apply_value("ORD-102", payment_payload("TX1", "CANCELLED", 5000, "USD"))
        .await
        .unwrap();
    let after_second = app.reload_order(order.id).await;
    assert_eq!(after_second.status, "cancelled");
    assert_eq!(app.emails.sent.lock().await.len(), emails_after_first);
}

#[tokio::test]
async fn rejected_on_created_order_fails_it() {
    let app = TestApp::new().await;
    let order = app.seed_order("ORD-103", "created").await;
    app.seed_instrument(order.id, None).await;

    app.state
        .services
        .reconciler
        .apply_value("ORD-103", payment_payload("TX1", "REJECTED", 5000, "USD"))
        .await
        .unwrap();
    let order = app.reload_order(order.id).await;
    assert_eq!(order.status, "failed");
    assert_eq!(order.payment_status, "not_paid");
}

#[tokio::test]
async fn pending_fraud_approval_sends_fraud_alert_once() {
    let app = TestApp::new().await;
    let order = app.seed_order("ORD-104", "new").await;
    app.seed_instrument(order.id, Some("TX1")).await;

    let payload = payment_payload("TX1", "PENDING_FRAUD_APPROVAL", 5000, "USD");
    app.state
        .services
        .reconciler
        .apply_value("ORD-104", payload.clone())
        .await
        .unwrap();
    {
        let sent = app.emails.sent.lock().await;
        let fraud_mails = sent.iter().filter(|m| m.to == "fraud@shop.example.com").count();
        assert_eq!(fraud_mails, 1);
        // plus the customer pending email
        assert_eq!(sent.len(), 2);
    }

    // same status again: no delta, no mail
    app.state
        .services
        .reconciler
        .apply_value("ORD-104", payload)
        .await
        .unwrap();
    assert_eq!(app.emails.sent.lock().await.len(), 2);
}

#[tokio::test]
async fn refund_notifications_dedup_by_latest_date() {
    let app = TestApp::new().await;
    let order = app.seed_order("ORD-105", "new").await;
    app.seed_instrument(order.id, Some("TX1")).await;

    app.state
        .services
        .reconciler
        .apply_value("ORD-105", refund_payload("RF1", "REFUND_REQUESTED", 1000, "PENDING"))
        .await
        .unwrap();
    app.state
        .services
        .reconciler
        .apply_value("ORD-105", refund_payload("RF1", "REFUNDED", 1000, "COMPLETED"))
        .await
        .unwrap();

    let order = app.reload_order(order.id).await;
    let ledger = PaymentLedger::parse_or_default(order.payment_ledger.as_deref());
    assert_eq!(ledger.refunds.len(), 1);
    assert_eq!(ledger.refunds[0].id, "RF1");
    assert_eq!(
        ledger.refunds[0].status_output["statusCategory"],
        "COMPLETED",
        "later notification wins"
    );

    let ids: Vec<String> = serde_json::from_str(order.refund_ids.as_deref().unwrap()).unwrap();
    assert_eq!(ids, vec!["RF1".to_string()]);

    // refund branch never emails
    assert!(app.emails.sent.lock().await.is_empty());
}

#[tokio::test]
async fn concurrent_refund_notifications_leave_one_record() {
    let app = std::sync::Arc::new(TestApp::new().await);
    let order = app.seed_order("ORD-106", "new").await;
    app.seed_instrument(order.id, Some("TX1")).await;

    let a = {
        let app = app.clone();
        tokio::spawn(async move {
            app.state
                .services
                .reconciler
                .apply_value("ORD-106", refund_payload("RF9", "REFUND_REQUESTED", 500, "PENDING"))
                .await
        })
    };
    let b = {
        let app = app.clone();
        tokio::spawn(async move {
            app.state
                .services
                .reconciler
                .apply_value("ORD-106", refund_payload("RF9", "REFUND_REQUESTED", 500, "PENDING"))
                .await
        })
    };
    let (a, b) = tokio::join!(a, b);
    a.unwrap().unwrap();
    b.unwrap().unwrap();

    let order = app.reload_order(order.id).await;
    let ledger = PaymentLedger::parse_or_default(order.payment_ledger.as_deref());
    assert_eq!(
        ledger.refunds.iter().filter(|r| r.id == "RF9").count(),
        1,
        "exactly one record for the refund id after both writers finish"
    );
}

#[tokio::test]
async fn late_pending_notification_does_not_resurrect_terminated_payment() {
    let app = TestApp::new().await;
    let order = app.seed_order("ORD-107", "new").await;
    app.seed_instrument(order.id, Some("TX1")).await;

    app.state
        .services
        .reconciler
        .apply_value("ORD-107", payment_payload("TX1", "CANCELLED", 5000, "USD"))
        .await
        .unwrap();
    app.state
        .services
        .reconciler
        .apply_value("ORD-107", payment_payload("TX1", "PENDING_PAYMENT", 5000, "USD"))
        .await
        .unwrap();

    let order = app.reload_order(order.id).await;
    assert_eq!(order.gateway_status.as_deref(), Some("CANCELLED"));
    assert_eq!(order.status, "cancelled");
}

#[tokio::test]
async fn malformed_payload_mutates_nothing() {
    let app = TestApp::new().await;
    let order = app.seed_order("ORD-108", "created").await;
    app.seed_instrument(order.id, None).await;

    // two method-specific outputs: ambiguous, rejected
    let mut payload = payment_payload("TX1", "PAID", 5000, "USD");
    payload["paymentOutput"]["redirectPaymentMethodSpecificOutput"] =
        serde_json::json!({ "paymentProductId": 840 });

    let err = app
        .state
        .services
        .reconciler
        .apply_value("ORD-108", payload)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        payconnect_api::errors::ServiceError::ValidationError(_)
    ));

    let order = app.reload_order(order.id).await;
    assert_eq!(order.status, "created");
    assert!(order.payment_ledger.is_none());
}
