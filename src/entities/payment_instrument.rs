use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processor identifier for direct card payments handled by this connector.
pub const PROCESSOR_CARD: &str = "GATEWAY_CARD";
/// Processor identifier for hosted-checkout payments handled by this connector.
pub const PROCESSOR_HOSTED: &str = "GATEWAY_HOSTED";

/// Payment method codes as configured in the platform.
pub mod methods {
    pub const CREDIT_CARD: &str = "CreditCard";
    pub const HOSTED_CARD: &str = "HostedCreditCard";
    pub const PAYPAL: &str = "HostedPayPal";
    pub const IDEAL: &str = "HostediDeal";
}

/// Payment instrument attached to an order. The gateway transaction id is
/// written once (first successful create-payment response); the authorized
/// amount is overwritten on every reconciliation pass from the gateway's
/// authoritative figure.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_instruments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub processor: String,
    pub payment_method: String,

    pub transaction_id: Option<String>,
    pub processor_reference: Option<String>,
    pub hosted_checkout_id: Option<String>,

    pub amount: Option<Decimal>,
    pub currency: Option<String>,

    pub card_holder: Option<String>,
    pub card_number_masked: Option<String>,
    pub card_expiry_month: Option<i32>,
    pub card_expiry_year: Option<i32>,
    pub card_product_id: Option<i32>,
    pub card_token: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether this instrument belongs to the gateway integration.
    pub fn is_gateway_instrument(&self) -> bool {
        self.processor == PROCESSOR_CARD || self.processor == PROCESSOR_HOSTED
    }
}
