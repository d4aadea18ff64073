use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;

/// Payment lifecycle statuses returned by the gateway.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayStatus {
    AuthorizationRequested,
    Cancelled,
    CaptureRequested,
    Captured,
    Chargebacked,
    Paid,
    PendingApproval,
    PendingCapture,
    PendingFraudApproval,
    PendingPayment,
    Redirected,
    Reversed,
    Refunded,
    RefundRequested,
    Rejected,
    RejectedCapture,
}

impl GatewayStatus {
    /// Statuses that terminate the payment unsuccessfully.
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, Self::Cancelled | Self::Rejected | Self::RejectedCapture)
    }

    /// Statuses meaning the money has been (or will irrevocably be) collected.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Paid | Self::Captured)
    }

    /// Statuses where the payment is still in flight on the gateway side.
    /// CAPTURE_REQUESTED is classified here consistently for both the order
    /// transition and the email trigger.
    pub fn is_auth_pending(self) -> bool {
        matches!(
            self,
            Self::AuthorizationRequested
                | Self::Redirected
                | Self::CaptureRequested
                | Self::PendingPayment
                | Self::PendingCapture
                | Self::PendingApproval
                | Self::PendingFraudApproval
        )
    }

    /// Pending sub-states that already represent a successful authorization.
    pub fn grants_auth_success(self) -> bool {
        matches!(
            self,
            Self::PendingFraudApproval
                | Self::CaptureRequested
                | Self::PendingApproval
                | Self::PendingCapture
                | Self::PendingPayment
        )
    }
}

/// Platform order lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Created,
    New,
    Open,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ExportStatus {
    NotExported,
    Ready,
    Exported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum PaymentState {
    NotPaid,
    Paid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn wire_format_round_trip() {
        let json = serde_json::to_string(&GatewayStatus::PendingFraudApproval).unwrap();
        assert_eq!(json, "\"PENDING_FRAUD_APPROVAL\"");
        let back: GatewayStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, GatewayStatus::PendingFraudApproval);

        assert_eq!(GatewayStatus::RejectedCapture.to_string(), "REJECTED_CAPTURE");
        assert_eq!(
            GatewayStatus::from_str("CAPTURE_REQUESTED").unwrap(),
            GatewayStatus::CaptureRequested
        );
    }

    #[test]
    fn classification_is_disjoint_for_payment_statuses() {
        for status in [
            GatewayStatus::AuthorizationRequested,
            GatewayStatus::Cancelled,
            GatewayStatus::CaptureRequested,
            GatewayStatus::Captured,
            GatewayStatus::Paid,
            GatewayStatus::PendingApproval,
            GatewayStatus::PendingCapture,
            GatewayStatus::PendingFraudApproval,
            GatewayStatus::PendingPayment,
            GatewayStatus::Redirected,
            GatewayStatus::Rejected,
            GatewayStatus::RejectedCapture,
        ] {
            let buckets = [
                status.is_terminal_failure(),
                status.is_settled(),
                status.is_auth_pending(),
            ];
            assert_eq!(
                buckets.iter().filter(|b| **b).count(),
                1,
                "{status} must land in exactly one bucket"
            );
        }
    }

    #[test]
    fn capture_requested_is_pending_with_auth_success() {
        assert!(GatewayStatus::CaptureRequested.is_auth_pending());
        assert!(GatewayStatus::CaptureRequested.grants_auth_success());
        assert!(!GatewayStatus::CaptureRequested.is_settled());
    }

    #[test]
    fn order_status_codes() {
        assert_eq!(OrderStatus::Created.to_string(), "created");
        assert_eq!(ExportStatus::NotExported.to_string(), "not_exported");
        assert_eq!(PaymentState::NotPaid.to_string(), "not_paid");
        assert_eq!(OrderStatus::from_str("failed").unwrap(), OrderStatus::Failed);
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Open.is_terminal());
    }
}
