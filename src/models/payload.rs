use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::status::GatewayStatus;

/// Monetary amount in gateway wire form: integer minor units plus an ISO
/// 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmountOfMoney {
    pub amount: i64,
    pub currency_code: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReferences {
    #[serde(default)]
    pub merchant_reference: Option<String>,
    #[serde(default)]
    pub payment_reference: Option<String>,
}

/// Card sub-object carried on card method output (already masked by the
/// gateway).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardEssentials {
    #[serde(default)]
    pub card_number: Option<String>,
    #[serde(default)]
    pub expiry_date: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardMethodOutput {
    #[serde(default)]
    pub payment_product_id: Option<i64>,
    #[serde(default)]
    pub authorisation_code: Option<String>,
    #[serde(default)]
    pub fraud_results: Option<Value>,
    #[serde(default)]
    pub card: Option<CardEssentials>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductMethodOutput {
    #[serde(default)]
    pub payment_product_id: Option<i64>,
}

/// The gateway reports method-specific details under exactly one
/// `*PaymentMethodSpecificOutput` key. Modeled as an explicit union; a
/// payload matching zero or multiple variants is malformed.
#[derive(Debug, Clone)]
pub enum MethodSpecificOutput {
    Card(CardMethodOutput),
    Cash(ProductMethodOutput),
    Redirect(ProductMethodOutput),
    Mobile(ProductMethodOutput),
    Invoice(ProductMethodOutput),
    BankTransfer(ProductMethodOutput),
    DirectDebit(ProductMethodOutput),
}

impl MethodSpecificOutput {
    pub fn payment_product_id(&self) -> Option<i64> {
        match self {
            Self::Card(c) => c.payment_product_id,
            Self::Cash(p)
            | Self::Redirect(p)
            | Self::Mobile(p)
            | Self::Invoice(p)
            | Self::BankTransfer(p)
            | Self::DirectDebit(p) => p.payment_product_id,
        }
    }

    pub fn authorisation_code(&self) -> Option<&str> {
        match self {
            Self::Card(c) => c.authorisation_code.as_deref(),
            _ => None,
        }
    }

    pub fn card(&self) -> Option<&CardMethodOutput> {
        match self {
            Self::Card(c) => Some(c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutput {
    #[serde(default)]
    pub amount_of_money: Option<AmountOfMoney>,
    #[serde(default)]
    pub references: Option<PaymentReferences>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub card_payment_method_specific_output: Option<CardMethodOutput>,
    #[serde(default)]
    pub cash_payment_method_specific_output: Option<ProductMethodOutput>,
    #[serde(default)]
    pub redirect_payment_method_specific_output: Option<ProductMethodOutput>,
    #[serde(default)]
    pub mobile_payment_method_specific_output: Option<ProductMethodOutput>,
    #[serde(default)]
    pub invoice_payment_method_specific_output: Option<ProductMethodOutput>,
    #[serde(default)]
    pub bank_transfer_payment_method_specific_output: Option<ProductMethodOutput>,
    #[serde(default)]
    pub direct_debit_payment_method_specific_output: Option<ProductMethodOutput>,
}

impl PaymentOutput {
    /// Resolves the method-specific union, rejecting ambiguous payloads.
    pub fn method_output(&self) -> Result<MethodSpecificOutput, PayloadShapeError> {
        let mut found: Option<MethodSpecificOutput> = None;
        let mut count = 0usize;

        let mut take = |candidate: Option<MethodSpecificOutput>| {
            if let Some(c) = candidate {
                count += 1;
                if found.is_none() {
                    found = Some(c);
                }
            }
        };

        take(self
            .card_payment_method_specific_output
            .clone()
            .map(MethodSpecificOutput::Card));
        take(self
            .cash_payment_method_specific_output
            .clone()
            .map(MethodSpecificOutput::Cash));
        take(self
            .redirect_payment_method_specific_output
            .clone()
            .map(MethodSpecificOutput::Redirect));
        take(self
            .mobile_payment_method_specific_output
            .clone()
            .map(MethodSpecificOutput::Mobile));
        take(self
            .invoice_payment_method_specific_output
            .clone()
            .map(MethodSpecificOutput::Invoice));
        take(self
            .bank_transfer_payment_method_specific_output
            .clone()
            .map(MethodSpecificOutput::BankTransfer));
        take(self
            .direct_debit_payment_method_specific_output
            .clone()
            .map(MethodSpecificOutput::DirectDebit));

        match (count, found) {
            (1, Some(output)) => Ok(output),
            (0, _) | (_, None) => Err(PayloadShapeError::NoMethodOutput),
            (n, _) => Err(PayloadShapeError::AmbiguousMethodOutput(n)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundOutput {
    #[serde(default)]
    pub amount_of_money: Option<AmountOfMoney>,
    #[serde(default)]
    pub references: Option<PaymentReferences>,
}

/// A raw gateway status notification: direct API response, webhook push or
/// polled retrieval all share this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub id: String,
    pub status: GatewayStatus,
    #[serde(default)]
    pub status_output: Value,
    #[serde(default)]
    pub payment_output: Option<PaymentOutput>,
    #[serde(default)]
    pub refund_output: Option<RefundOutput>,
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadShapeError {
    #[error("missing status output")]
    MissingStatusOutput,
    #[error("payload carries neither payment nor refund output")]
    NoOutput,
    #[error("payment output carries no method-specific output")]
    NoMethodOutput,
    #[error("payment output carries {0} method-specific outputs")]
    AmbiguousMethodOutput(usize),
}

impl StatusPayload {
    /// Validates the structural invariants reconciliation relies on. Runs
    /// before any mutation; a malformed payload never touches the order.
    pub fn validate_shape(&self) -> Result<(), PayloadShapeError> {
        if self.status_output.is_null() {
            return Err(PayloadShapeError::MissingStatusOutput);
        }
        match (&self.payment_output, &self.refund_output) {
            (None, None) => Err(PayloadShapeError::NoOutput),
            (Some(payment), _) => payment.method_output().map(|_| ()),
            (None, Some(_)) => Ok(()),
        }
    }

    pub fn status_category(&self) -> Option<&str> {
        self.status_output.get("statusCategory").and_then(Value::as_str)
    }

    pub fn status_last_change(&self) -> Option<String> {
        self.status_output
            .get("statusCodeChangeDateTime")
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }
}

/// Webhook envelope pushed by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub payment: Option<Value>,
    #[serde(default)]
    pub refund: Option<Value>,
}
