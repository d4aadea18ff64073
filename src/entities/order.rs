use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Platform order record. The `id` doubles as the immutable correlation
/// UUID used to authorize admin actions; `order_number` is the guessable
/// human-facing identifier. The payment ledger, refund-id index and
/// transaction log are serialized JSON owned exclusively by the
/// reconciliation engine.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[validate(length(min = 1, max = 50))]
    pub order_number: String,

    pub customer_id: Option<Uuid>,
    pub customer_no: Option<String>,
    pub customer_email: String,
    pub customer_locale: Option<String>,

    /// Lifecycle: created -> new/open -> cancelled/failed
    pub status: String,
    /// not_exported / ready / exported
    pub export_status: String,
    /// not_paid / paid
    pub payment_status: String,
    /// Last recorded gateway status (raw taxonomy string)
    pub gateway_status: Option<String>,

    pub currency: String,
    pub total_amount: Decimal,
    pub shipping_total: Decimal,
    pub tax_total: Decimal,

    /// JSON address blobs, owned by the storefront
    pub billing_address: Option<String>,
    pub shipping_address: Option<String>,

    /// Serialized [`crate::models::ledger::PaymentLedger`]
    pub payment_ledger: Option<String>,
    /// JSON array of known gateway refund ids
    pub refund_ids: Option<String>,
    /// Capped JSON array of transaction-log entries
    pub transaction_log: Option<String>,

    pub notes: Option<String>,
    pub placed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_line::Entity")]
    OrderLines,
    #[sea_orm(has_many = "super::payment_instrument::Entity")]
    PaymentInstruments,
}

impl Related<super::order_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderLines.def()
    }
}

impl Related<super::payment_instrument::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentInstruments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
