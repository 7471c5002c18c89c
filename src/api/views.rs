use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{BlockRequest, BlockRequestStatus, Card, CardStatus, Page, Transaction};
use crate::services::CardRegistry;

/// Card as seen by its holder: masked number only
#[derive(Debug, Serialize)]
pub struct CardView {
    pub id: Uuid,
    pub masked_number: String,
    pub owner: String,
    pub expiry_date: NaiveDate,
    pub status: CardStatus,
    pub balance: Decimal,
    pub owner_user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl CardView {
    pub fn new(registry: &CardRegistry, card: Card) -> Self {
        Self {
            id: card.id,
            masked_number: registry.masked_number(&card),
            owner: card.owner,
            expiry_date: card.expiry_date,
            status: card.status,
            balance: card.balance,
            owner_user_id: card.owner_user_id,
            created_at: card.created_at,
        }
    }

    pub fn page(registry: &CardRegistry, page: Page<Card>) -> Page<Self> {
        page.map(|card| Self::new(registry, card))
    }
}

/// Administrator detail view carrying the disclosed number
#[derive(Debug, Serialize)]
pub struct AdminCardView {
    pub card_number: String,
    #[serde(flatten)]
    pub card: CardView,
}

#[derive(Debug, Serialize)]
pub struct BalanceView {
    pub masked_number: String,
    pub balance: Decimal,
}

#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub id: Uuid,
    pub from_card_id: Option<Uuid>,
    pub to_card_id: Option<Uuid>,
    pub from_masked_number: String,
    pub to_masked_number: String,
    pub amount: Decimal,
    pub description: Option<String>,
    pub transaction_date: DateTime<Utc>,
}

impl From<Transaction> for TransactionView {
    fn from(tx: Transaction) -> Self {
        Self {
            id: tx.id,
            from_card_id: tx.from_card_id,
            to_card_id: tx.to_card_id,
            from_masked_number: tx.from_masked_number,
            to_masked_number: tx.to_masked_number,
            amount: tx.amount,
            description: tx.description,
            transaction_date: tx.transaction_date,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BlockRequestView {
    pub id: Uuid,
    pub card_id: Option<Uuid>,
    pub requesting_user_id: Uuid,
    pub request_date: DateTime<Utc>,
    pub reason: Option<String>,
    pub status: BlockRequestStatus,
    pub processed_date: Option<DateTime<Utc>>,
    pub processed_by_user_id: Option<Uuid>,
}

impl From<BlockRequest> for BlockRequestView {
    fn from(request: BlockRequest) -> Self {
        Self {
            id: request.id,
            card_id: request.card_id,
            requesting_user_id: request.requesting_user_id,
            request_date: request.request_date,
            reason: request.reason,
            status: request.status,
            processed_date: request.processed_date,
            processed_by_user_id: request.processed_by_user_id,
        }
    }
}

/// Body for operations addressed by plaintext card number.
///
/// Numbers travel in request bodies so they never land in access logs.
#[derive(Debug, Deserialize)]
pub struct CardNumberBody {
    pub card_number: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::services::CardNumberCodec;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    #[test]
    fn test_card_view_never_serializes_plaintext_or_ciphertext() {
        let codec = CardNumberCodec::from_secret("view-key");
        let encrypted_number = codec.encrypt("4111111111111111").unwrap();
        let registry = CardRegistry::new(Arc::new(MemoryStore::new()), codec, dec!(0));
        let card = Card {
            id: Uuid::new_v4(),
            encrypted_number: encrypted_number.clone(),
            owner: "Ann Lee".to_string(),
            expiry_date: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
            status: CardStatus::Active,
            balance: dec!(12.50),
            owner_user_id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&CardView::new(&registry, card)).unwrap();

        assert!(json.contains("**** **** **** 1111"));
        assert!(!json.contains("4111111111111111"));
        assert!(!json.contains(&encrypted_number));
        assert!(json.contains("\"status\":\"ACTIVE\""));
    }
}
