use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Domain events emitted by the payment services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced(Uuid),
    OrderCancelled(Uuid),
    OrderFailed(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: Option<String>,
        new_status: String,
    },
    PaymentAuthorized(Uuid),
    PaymentCaptured(Uuid),
    PaymentFailed(Uuid),
    PaymentRefundUpdated {
        order_id: Uuid,
        refund_id: String,
        status: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event; callers treat failures as best-effort and log them.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Background consumer draining the event channel. Downstream integrations
/// (exports, analytics) subscribe here; the default implementation records
/// the stream in the log.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(
                    order_id = %order_id,
                    old_status = ?old_status,
                    new_status = %new_status,
                    "order status changed"
                );
            }
            other => debug!(event = ?other, "domain event"),
        }
    }
}
