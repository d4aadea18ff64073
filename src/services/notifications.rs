use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::config::NotificationConfig;
use crate::models::status::GatewayStatus;

/// Notification delivery errors. Callers log these; a failed email never
/// fails the operation that triggered it.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Outbound email seam. Production wires an SMTP/provider implementation;
/// tests use [`RecordingEmailSender`].
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), NotificationError>;
}

/// Default sender that records deliveries in the log only. Stands in until
/// a real transport is configured.
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(
        &self,
        _from: &str,
        to: &str,
        subject: &str,
        _html_body: &str,
    ) -> Result<(), NotificationError> {
        info!(to = %to, subject = %subject, "email dispatched (log transport)");
        Ok(())
    }
}

/// Captures sent mail for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

#[derive(Default)]
pub struct RecordingEmailSender {
    pub sent: Mutex<Vec<SentEmail>>,
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), NotificationError> {
        self.sent.lock().await.push(SentEmail {
            from: from.to_string(),
            to: to.to_string(),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
        });
        Ok(())
    }
}

/// Customer-facing templates. One template can serve several statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailTemplate {
    PaymentPending,
    PaymentReceived,
    PaymentRedirected,
    PaymentRejected,
}

impl EmailTemplate {
    fn subject(self, order_number: &str) -> String {
        match self {
            Self::PaymentPending => format!("Your payment for order {order_number} is pending"),
            Self::PaymentReceived => format!("Payment received for order {order_number}"),
            Self::PaymentRedirected => {
                format!("Your payment for order {order_number} is being processed")
            }
            Self::PaymentRejected => format!("Payment unsuccessful for order {order_number}"),
        }
    }

    fn body(self, order_number: &str) -> String {
        let line = match self {
            Self::PaymentPending => "We are waiting for your payment to complete.",
            Self::PaymentReceived => "We have received your payment and will process your order.",
            Self::PaymentRedirected => {
                "Your payment is being completed with your payment provider."
            }
            Self::PaymentRejected => "Unfortunately your payment was not successful.",
        };
        format!("<p>Order {order_number}</p><p>{line}</p>")
    }
}

/// Decides which customer/fraud-manager email a status transition triggers,
/// honoring per-status site configuration flags.
pub struct NotificationDispatcher {
    config: NotificationConfig,
    sender: Arc<dyn EmailSender>,
}

impl NotificationDispatcher {
    pub fn new(config: NotificationConfig, sender: Arc<dyn EmailSender>) -> Self {
        Self { config, sender }
    }

    /// Template and gating flag for a gateway status. `None` means the
    /// status never triggers customer mail.
    fn template_for(&self, status: GatewayStatus) -> Option<(EmailTemplate, bool)> {
        use GatewayStatus::*;
        match status {
            PendingFraudApproval => Some((
                EmailTemplate::PaymentPending,
                self.config.send_on_fraud_pending,
            )),
            PendingApproval | PendingCapture => Some((
                EmailTemplate::PaymentPending,
                self.config.send_on_approval_pending,
            )),
            Paid | Captured => Some((EmailTemplate::PaymentReceived, self.config.send_on_paid)),
            Redirected => Some((
                EmailTemplate::PaymentRedirected,
                self.config.send_on_redirected,
            )),
            CaptureRequested | PendingPayment => Some((
                EmailTemplate::PaymentPending,
                self.config.send_on_waiting_payment,
            )),
            Rejected | Cancelled | RejectedCapture => Some((
                EmailTemplate::PaymentRejected,
                self.config.send_on_rejected,
            )),
            _ => None,
        }
    }

    /// Sends the customer email for a status, if configured. Missing
    /// recipient or order number is a silent no-op; an unmapped status logs
    /// a warning and sends nothing.
    #[instrument(skip(self))]
    pub async fn dispatch_customer_email(
        &self,
        status: GatewayStatus,
        recipient: &str,
        order_number: &str,
    ) -> Result<(), NotificationError> {
        if recipient.is_empty() || order_number.is_empty() {
            return Ok(());
        }
        let Some((template, enabled)) = self.template_for(status) else {
            warn!(status = %status, "no email template for gateway status, nothing sent");
            return Ok(());
        };
        if !enabled {
            return Ok(());
        }
        self.sender
            .send(
                &self.config.from_address,
                recipient,
                &template.subject(order_number),
                &template.body(order_number),
            )
            .await
    }

    /// Alerts the fraud manager about an order entering fraud review.
    #[instrument(skip(self))]
    pub async fn dispatch_fraud_alert(&self, order_number: &str) -> Result<(), NotificationError> {
        if !self.config.send_fraud_manager {
            return Ok(());
        }
        let Some(manager) = self.config.fraud_manager_address.as_deref() else {
            return Ok(());
        };
        let subject = format!("Order with possible fraud detected. Order ID - {order_number}");
        let body = format!(
            "<p>Order {order_number} requires fraud review before the payment can proceed.</p>"
        );
        self.sender
            .send(&self.config.from_address, manager, &subject, &body)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_on() -> NotificationConfig {
        NotificationConfig {
            from_address: "no-reply@shop.example.com".to_string(),
            fraud_manager_address: Some("fraud@shop.example.com".to_string()),
            send_fraud_manager: true,
            send_on_fraud_pending: true,
            send_on_approval_pending: true,
            send_on_paid: true,
            send_on_redirected: true,
            send_on_waiting_payment: true,
            send_on_rejected: true,
        }
    }

    fn dispatcher_with(config: NotificationConfig) -> (NotificationDispatcher, Arc<RecordingEmailSender>) {
        let sender = Arc::new(RecordingEmailSender::default());
        (
            NotificationDispatcher::new(config, sender.clone()),
            sender,
        )
    }

    #[tokio::test]
    async fn paid_status_sends_received_template() {
        let (dispatcher, sender) = dispatcher_with(all_on());
        dispatcher
            .dispatch_customer_email(GatewayStatus::Paid, "a@b.c", "ORD-1")
            .await
            .unwrap();
        let sent = sender.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("Payment received"));
    }

    #[tokio::test]
    async fn disabled_flag_suppresses_send() {
        let mut config = all_on();
        config.send_on_paid = false;
        let (dispatcher, sender) = dispatcher_with(config);
        dispatcher
            .dispatch_customer_email(GatewayStatus::Captured, "a@b.c", "ORD-1")
            .await
            .unwrap();
        assert!(sender.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unmapped_status_sends_nothing() {
        let (dispatcher, sender) = dispatcher_with(all_on());
        dispatcher
            .dispatch_customer_email(GatewayStatus::Chargebacked, "a@b.c", "ORD-1")
            .await
            .unwrap();
        assert!(sender.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn missing_recipient_is_silent_noop() {
        let (dispatcher, sender) = dispatcher_with(all_on());
        dispatcher
            .dispatch_customer_email(GatewayStatus::Paid, "", "ORD-1")
            .await
            .unwrap();
        assert!(sender.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn capture_requested_uses_waiting_payment_flag() {
        let mut config = all_on();
        config.send_on_waiting_payment = false;
        let (dispatcher, sender) = dispatcher_with(config);
        dispatcher
            .dispatch_customer_email(GatewayStatus::CaptureRequested, "a@b.c", "ORD-1")
            .await
            .unwrap();
        assert!(sender.sent.lock().await.is_empty());

        let (dispatcher, sender) = dispatcher_with(all_on());
        dispatcher
            .dispatch_customer_email(GatewayStatus::CaptureRequested, "a@b.c", "ORD-1")
            .await
            .unwrap();
        let sent = sender.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("pending"));
    }

    #[tokio::test]
    async fn fraud_alert_requires_flag_and_address() {
        let (dispatcher, sender) = dispatcher_with(all_on());
        dispatcher.dispatch_fraud_alert("ORD-9").await.unwrap();
        assert_eq!(sender.sent.lock().await.len(), 1);

        let mut config = all_on();
        config.fraud_manager_address = None;
        let (dispatcher, sender) = dispatcher_with(config);
        dispatcher.dispatch_fraud_alert("ORD-9").await.unwrap();
        assert!(sender.sent.lock().await.is_empty());
    }
}
