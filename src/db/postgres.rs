use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use super::{
    BankStore, BlockRequestOpening, BlockRequestResolution, CardGuard, CardMutation,
    TransferMutation,
};
use crate::error::{AppError, Result};
use crate::models::{
    block_request::{BlockRequest, BlockRequestFilter},
    card::{Card, CardFilter, NewCard},
    page::{Page, PageRequest},
    transaction::{Transaction, TransactionFilter},
};

/// Postgres-backed store; each mutating call runs in its own transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_timeout_ms: u64) -> Self {
        Self {
            pool,
            lock_timeout_ms,
        }
    }

    /// Opens a transaction whose row-lock waits are bounded by the configured timeout
    async fn begin(&self) -> Result<sqlx::Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await?;

        Ok(tx)
    }
}

fn card_not_found(id: Uuid) -> AppError {
    AppError::not_found(format!("Card {} not found", id))
}

fn map_insert_error(err: sqlx::Error, duplicate_message: &str) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return AppError::validation(duplicate_message);
        }
        if db_err.is_foreign_key_violation() {
            return AppError::not_found("User not found");
        }
    }
    AppError::from(err)
}

#[async_trait]
impl BankStore for PgStore {
    async fn insert_card(&self, data: NewCard) -> Result<Card> {
        Card::insert(&self.pool, &data)
            .await
            .map_err(|e| map_insert_error(e, "Card with this number already exists"))
    }

    async fn find_card_by_id(&self, id: Uuid) -> Result<Option<Card>> {
        Ok(Card::find_by_id(&self.pool, id).await?)
    }

    async fn find_card_by_encrypted_number(
        &self,
        encrypted_number: &str,
    ) -> Result<Option<Card>> {
        Ok(Card::find_by_encrypted_number(&self.pool, encrypted_number).await?)
    }

    async fn list_cards(&self, filter: &CardFilter, page: PageRequest) -> Result<Page<Card>> {
        let total = Card::count(&self.pool, filter).await?;
        let items = Card::list(&self.pool, filter, page).await?;

        Ok(Page {
            items,
            page: page.page,
            size: page.size(),
            total,
        })
    }

    async fn update_card(&self, id: Uuid, mutation: CardMutation<'_>) -> Result<Card> {
        let mut tx = self.begin().await?;

        let mut card = Card::lock(&mut *tx, id)
            .await?
            .ok_or_else(|| card_not_found(id))?;
        mutation(&mut card)?;
        let card = Card::save_state(&mut *tx, &card).await?;

        tx.commit().await?;

        Ok(card)
    }

    async fn delete_card(&self, id: Uuid, guard: CardGuard<'_>) -> Result<()> {
        let mut tx = self.begin().await?;

        let card = Card::lock(&mut *tx, id)
            .await?
            .ok_or_else(|| card_not_found(id))?;
        let has_pending = BlockRequest::pending_exists_for_card(&mut *tx, id).await?;
        guard(&card, has_pending)?;
        Card::delete(&mut *tx, id).await?;

        tx.commit().await?;

        Ok(())
    }

    async fn expire_cards(&self, today: NaiveDate) -> Result<u64> {
        Ok(Card::expire_all(&self.pool, today).await?)
    }

    async fn transfer(
        &self,
        from_id: Uuid,
        to_id: Uuid,
        mutation: TransferMutation<'_>,
    ) -> Result<Transaction> {
        let mut tx = self.begin().await?;

        // Fixed lock order keeps opposite-direction transfers from deadlocking
        let (first_id, second_id) = if from_id <= to_id {
            (from_id, to_id)
        } else {
            (to_id, from_id)
        };

        let first = Card::lock(&mut *tx, first_id)
            .await?
            .ok_or_else(|| card_not_found(first_id))?;
        let second = if second_id == first_id {
            first.clone()
        } else {
            Card::lock(&mut *tx, second_id)
                .await?
                .ok_or_else(|| card_not_found(second_id))?
        };

        let (mut from, mut to) = if first_id == from_id {
            (first, second)
        } else {
            (second, first)
        };

        let record = mutation(&mut from, &mut to)?;
        if from.id == to.id {
            return Err(AppError::validation("Cannot transfer to the same card"));
        }

        Card::save_state(&mut *tx, &from).await?;
        Card::save_state(&mut *tx, &to).await?;
        let transaction = Transaction::insert(&mut *tx, &record).await?;

        tx.commit().await?;

        Ok(transaction)
    }

    async fn find_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        Ok(Transaction::find_by_id(&self.pool, id).await?)
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> Result<Page<Transaction>> {
        let total = Transaction::count(&self.pool, filter).await?;
        let items = Transaction::list(&self.pool, filter, page).await?;

        Ok(Page {
            items,
            page: page.page,
            size: page.size(),
            total,
        })
    }

    async fn open_block_request(
        &self,
        card_id: Uuid,
        opening: BlockRequestOpening<'_>,
    ) -> Result<(BlockRequest, Card)> {
        let mut tx = self.begin().await?;

        let mut card = Card::lock(&mut *tx, card_id)
            .await?
            .ok_or_else(|| card_not_found(card_id))?;
        let has_pending = BlockRequest::pending_exists_for_card(&mut *tx, card_id).await?;

        let data = opening(&mut card, has_pending)?;

        // The partial unique index is the last line against a concurrent opener
        let request = BlockRequest::insert(&mut *tx, &data)
            .await
            .map_err(|e| map_insert_error(e, "Block request already exists for this card"))?;
        let card = Card::save_state(&mut *tx, &card).await?;

        tx.commit().await?;

        Ok((request, card))
    }

    async fn resolve_block_request(
        &self,
        id: Uuid,
        resolution: BlockRequestResolution<'_>,
    ) -> Result<(BlockRequest, Card)> {
        let mut tx = self.begin().await?;

        let mut request = BlockRequest::lock(&mut *tx, id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Block request {} not found", id)))?;
        let card_id = request
            .card_id
            .ok_or_else(|| AppError::not_found("Card for block request no longer exists"))?;
        let mut card = Card::lock(&mut *tx, card_id)
            .await?
            .ok_or_else(|| card_not_found(card_id))?;

        resolution(&mut request, &mut card)?;

        let request = BlockRequest::save_state(&mut *tx, &request).await?;
        let card = Card::save_state(&mut *tx, &card).await?;

        tx.commit().await?;

        Ok((request, card))
    }

    async fn find_block_request(&self, id: Uuid) -> Result<Option<BlockRequest>> {
        Ok(BlockRequest::find_by_id(&self.pool, id).await?)
    }

    async fn list_block_requests(
        &self,
        filter: &BlockRequestFilter,
        page: PageRequest,
    ) -> Result<Page<BlockRequest>> {
        let total = BlockRequest::count(&self.pool, filter).await?;
        let items = BlockRequest::list(&self.pool, filter, page).await?;

        Ok(Page {
            items,
            page: page.page,
            size: page.size(),
            total,
        })
    }
}
