/// Known gateway error codes, mapped to explicit recovery strategies instead
/// of ad hoc string comparisons at each call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayErrorCode {
    /// 1100000 - the transaction is not in a state the operation accepts
    PaymentNotInProcessableState,
    /// 410140 - approve amount exceeds the authorized amount
    ApproveAmountTooLarge,
    /// 400210 - payment not found or no longer cancellable
    PaymentNotCancellable,
    /// 300430 - refund amount exceeds the refundable balance
    RefundAmountTooLarge,
    Unknown(String),
}

/// What an admin operation should do when the gateway returns the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Re-fetch the authoritative status and reconcile instead of failing
    Resync,
    /// Resync, then still surface a message to the operator
    ResyncAndReport,
    /// Map to a specific operator-facing message
    Reject,
    /// No special handling; surface the gateway message as-is
    Surface,
}

impl GatewayErrorCode {
    pub fn from_code(code: &str) -> Self {
        match code {
            "1100000" => Self::PaymentNotInProcessableState,
            "410140" => Self::ApproveAmountTooLarge,
            "400210" => Self::PaymentNotCancellable,
            "300430" => Self::RefundAmountTooLarge,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn recovery(&self) -> RecoveryStrategy {
        match self {
            Self::PaymentNotInProcessableState => RecoveryStrategy::Resync,
            Self::ApproveAmountTooLarge => RecoveryStrategy::ResyncAndReport,
            Self::PaymentNotCancellable | Self::RefundAmountTooLarge => RecoveryStrategy::Reject,
            Self::Unknown(_) => RecoveryStrategy::Surface,
        }
    }

    /// Operator-facing message for codes with a fixed meaning.
    pub fn operator_message(&self) -> Option<&'static str> {
        match self {
            Self::ApproveAmountTooLarge => {
                Some("Amount was too large. The order has been resynced with the authorized amount.")
            }
            Self::PaymentNotCancellable => Some("Payment not found or not cancellable."),
            Self::RefundAmountTooLarge => Some("Refund amount was too large."),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_resolve() {
        assert_eq!(
            GatewayErrorCode::from_code("1100000"),
            GatewayErrorCode::PaymentNotInProcessableState
        );
        assert_eq!(
            GatewayErrorCode::from_code("1100000").recovery(),
            RecoveryStrategy::Resync
        );
        assert_eq!(
            GatewayErrorCode::from_code("300430").recovery(),
            RecoveryStrategy::Reject
        );
        assert_eq!(
            GatewayErrorCode::from_code("410140").recovery(),
            RecoveryStrategy::ResyncAndReport
        );
    }

    #[test]
    fn unknown_codes_surface() {
        let code = GatewayErrorCode::from_code("999999");
        assert_eq!(code, GatewayErrorCode::Unknown("999999".to_string()));
        assert_eq!(code.recovery(), RecoveryStrategy::Surface);
        assert!(code.operator_message().is_none());
    }
}
