use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::status::GatewayStatus;

/// Current on-disk schema version for the serialized ledger.
pub const LEDGER_SCHEMA_VERSION: u32 = 1;

/// Upper bound on stored transaction-log entries; oldest entries drop first.
pub const TRANSACTION_LOG_CAP: usize = 100;

/// Status category the gateway assigns to refunds that failed outright.
pub const CATEGORY_UNSUCCESSFUL: &str = "UNSUCCESSFUL";

/// Converts a display amount to the gateway's integer minor units.
/// Rounding happens here, per value, so callers encoding order lines do not
/// accumulate cross-line drift from deriving cents off a total.
pub fn to_minor_units(amount: Decimal) -> i64 {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

/// Converts gateway minor units back to a display amount.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// The payment side of the ledger. Every field is overwritten from the most
/// recent gateway notification; `id` is the gateway transaction id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub amount: Decimal,
    pub status: Option<GatewayStatus>,
    #[serde(default)]
    pub status_output: Value,
    pub date: Option<DateTime<Utc>>,
    pub method: Option<String>,
    pub auth_code: Option<String>,
    pub id: Option<String>,
}

/// One refund as last reported by the gateway, keyed by the gateway refund id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefundRecord {
    pub amount: Decimal,
    pub status: Option<GatewayStatus>,
    #[serde(default)]
    pub status_output: Value,
    pub date: Option<DateTime<Utc>>,
    pub id: String,
}

impl RefundRecord {
    /// Refunds the gateway classified as failed do not consume balance.
    pub fn is_unsuccessful(&self) -> bool {
        self.status_output
            .get("statusCategory")
            .and_then(Value::as_str)
            .map(|c| c == CATEGORY_UNSUCCESSFUL)
            .unwrap_or_else(|| {
                matches!(
                    self.status,
                    Some(GatewayStatus::Rejected) | Some(GatewayStatus::Cancelled)
                )
            })
    }
}

/// Persisted payment/refund status record attached to an order. Stored as a
/// JSON text column; the external format stays backward compatible while the
/// in-memory model is typed and versioned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLedger {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub original_amount: Decimal,
    pub payment: PaymentRecord,
    pub refunds: Vec<RefundRecord>,
}

fn default_schema_version() -> u32 {
    LEDGER_SCHEMA_VERSION
}

impl Default for PaymentLedger {
    fn default() -> Self {
        Self {
            schema_version: LEDGER_SCHEMA_VERSION,
            original_amount: Decimal::ZERO,
            payment: PaymentRecord::default(),
            refunds: Vec::new(),
        }
    }
}

impl PaymentLedger {
    /// Loads the ledger stored on an order. An absent ledger is created
    /// lazily; an unparsable one resets to fresh with a logged warning so a
    /// corrupt blob never wedges reconciliation.
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        match raw {
            None | Some("") => Self::default(),
            Some(text) => serde_json::from_str(text).unwrap_or_else(|e| {
                warn!(error = %e, "stored payment ledger unparsable, starting fresh");
                Self::default()
            }),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Inserts or replaces the refund with the given id, then re-deduplicates.
    pub fn upsert_refund(&mut self, record: RefundRecord) {
        match self.refunds.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => self.refunds.push(record),
        }
        self.dedup_refunds();
    }

    /// Keeps exactly one record per refund id, preferring the most recent
    /// `date`. Duplicate notifications for the same refund replace, never
    /// append.
    pub fn dedup_refunds(&mut self) {
        self.refunds
            .sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.id.cmp(&b.id)));
        let mut seen = std::collections::HashSet::new();
        self.refunds.retain(|r| seen.insert(r.id.clone()));
    }

    pub fn refund_ids(&self) -> Vec<String> {
        self.refunds.iter().map(|r| r.id.clone()).collect()
    }

    /// Amount still refundable: the authorized payment amount minus every
    /// refund the gateway has not classified unsuccessful. Pending refunds
    /// count against the balance; one that later fails frees it again when
    /// its UNSUCCESSFUL notification arrives.
    pub fn available_to_refund(&self) -> Decimal {
        self.refunds
            .iter()
            .filter(|r| !r.is_unsuccessful())
            .fold(self.payment.amount, |acc, r| acc - r.amount)
    }
}

/// One raw notification, kept for merchant-side audit when the transaction
/// log flag is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLogEntry {
    pub transaction_date: DateTime<Utc>,
    pub status: GatewayStatus,
    pub status_last_change: Option<String>,
    pub raw: Value,
}

/// Appends an entry to the serialized log, dropping the oldest entries once
/// the cap is reached. The log is intentionally append-only and
/// non-idempotent; the cap bounds its growth.
pub fn append_log_entry(
    existing: Option<&str>,
    entry: TransactionLogEntry,
) -> serde_json::Result<String> {
    let mut entries: Vec<TransactionLogEntry> = match existing {
        None | Some("") => Vec::new(),
        Some(text) => serde_json::from_str(text).unwrap_or_default(),
    };
    entries.push(entry);
    if entries.len() > TRANSACTION_LOG_CAP {
        let excess = entries.len() - TRANSACTION_LOG_CAP;
        entries.drain(..excess);
    }
    serde_json::to_string(&entries)
}
