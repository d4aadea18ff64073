use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A product line on an order. Prices are per-line so gateway payloads can
/// round each line independently instead of deriving from the order total.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_lines")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub position: i32,
    pub product_code: String,
    pub description: String,
    pub quantity: i32,
    /// Unit price before adjustments
    pub base_unit_price: Decimal,
    /// Line total after adjustments (quantity x discounted unit price)
    pub line_total: Decimal,
    pub tax_amount: Decimal,
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
    /// Unit price after discounts, derived from the adjusted line total.
    pub fn discounted_unit_price(&self) -> Decimal {
        if self.quantity == 0 {
            return Decimal::ZERO;
        }
        self.line_total / Decimal::from(self.quantity)
    }
}
