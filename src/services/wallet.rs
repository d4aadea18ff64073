use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::customer_card;
use crate::errors::ServiceError;
use crate::models::payload::CardMethodOutput;

/// Persists gateway-issued card tokens into the customer wallet after a
/// hosted-checkout flow.
pub struct WalletService {
    db: Arc<DatabaseConnection>,
}

impl WalletService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn tokens_for_customer(&self, customer_id: Uuid) -> Result<Vec<String>, ServiceError> {
        let cards = customer_card::Entity::find()
            .filter(customer_card::Column::CustomerId.eq(customer_id))
            .all(&*self.db)
            .await?;
        Ok(cards.into_iter().filter_map(|c| c.token).filter(|t| !t.is_empty()).collect())
    }

    /// Stores tokens returned by the gateway that the wallet does not hold
    /// yet. A card row matching the masked number and product gets its
    /// missing token back-filled; otherwise a new row is created from the
    /// card data in the hosted-checkout output. Returns how many tokens
    /// were persisted.
    #[instrument(skip(self, tokens_csv, card_output))]
    pub async fn store_hosted_tokens(
        &self,
        customer_id: Uuid,
        tokens_csv: &str,
        card_output: &CardMethodOutput,
    ) -> Result<usize, ServiceError> {
        let existing = customer_card::Entity::find()
            .filter(customer_card::Column::CustomerId.eq(customer_id))
            .all(&*self.db)
            .await?;
        let known: Vec<&str> = existing.iter().filter_map(|c| c.token.as_deref()).collect();

        let new_tokens: Vec<&str> = tokens_csv
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty() && !known.contains(t))
            .collect();
        let Some(token) = new_tokens.first() else {
            return Ok(0);
        };

        let (Some(product_id), Some(card)) = (card_output.payment_product_id, card_output.card.as_ref())
        else {
            return Ok(0);
        };
        let (Some(masked_number), Some(expiry)) = (card.card_number.as_deref(), card.expiry_date.as_deref())
        else {
            return Ok(0);
        };
        if expiry.len() < 4 {
            return Ok(0);
        }
        let month: i32 = expiry[0..2].parse().unwrap_or(0);
        let year: i32 = 2000 + expiry[2..4].parse::<i32>().unwrap_or(0);

        let now = Utc::now();
        let matching = existing.iter().find(|c| {
            c.masked_number == masked_number && c.card_product_id == product_id as i32
        });
        match matching {
            Some(card_row) if card_row.token.is_none() => {
                let mut update: customer_card::ActiveModel = card_row.clone().into();
                update.token = Set(Some(token.to_string()));
                update.updated_at = Set(Some(now));
                update.update(&*self.db).await?;
                info!(customer_id = %customer_id, "back-filled wallet token");
            }
            Some(_) => return Ok(0),
            None => {
                customer_card::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    customer_id: Set(customer_id),
                    card_product_id: Set(product_id as i32),
                    masked_number: Set(masked_number.to_string()),
                    expiry_month: Set(month),
                    expiry_year: Set(year),
                    card_holder: Set(None),
                    token: Set(Some(token.to_string())),
                    created_at: Set(now),
                    updated_at: Set(Some(now)),
                }
                .insert(&*self.db)
                .await?;
                info!(customer_id = %customer_id, "stored new wallet token");
            }
        }
        Ok(1)
    }
}
