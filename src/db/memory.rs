use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    BankStore, BlockRequestOpening, BlockRequestResolution, CardGuard, CardMutation,
    TransferMutation,
};
use crate::error::{AppError, Result};
use crate::models::{
    block_request::{BlockRequest, BlockRequestFilter, BlockRequestStatus},
    card::{Card, CardFilter, CardStatus, NewCard},
    page::{Page, PageRequest},
    transaction::{Transaction, TransactionFilter},
};

#[derive(Default)]
struct State {
    cards: HashMap<Uuid, Card>,
    transactions: Vec<Transaction>,
    block_requests: Vec<BlockRequest>,
}

/// In-process store with the same atomicity contract as [`super::PgStore`].
///
/// A single mutex serialises every unit of work; closures run on copies and
/// nothing is written back unless they succeed.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn card_not_found(id: Uuid) -> AppError {
    AppError::not_found(format!("Card {} not found", id))
}

#[async_trait]
impl BankStore for MemoryStore {
    async fn insert_card(&self, data: NewCard) -> Result<Card> {
        let mut state = self.state.lock().await;

        if state
            .cards
            .values()
            .any(|c| c.encrypted_number == data.encrypted_number)
        {
            return Err(AppError::validation("Card with this number already exists"));
        }

        let now = Utc::now();
        let card = Card {
            id: Uuid::new_v4(),
            encrypted_number: data.encrypted_number,
            owner: data.owner,
            expiry_date: data.expiry_date,
            status: CardStatus::Active,
            balance: data.balance,
            owner_user_id: data.owner_user_id,
            created_at: now,
            updated_at: now,
        };
        state.cards.insert(card.id, card.clone());

        Ok(card)
    }

    async fn find_card_by_id(&self, id: Uuid) -> Result<Option<Card>> {
        Ok(self.state.lock().await.cards.get(&id).cloned())
    }

    async fn find_card_by_encrypted_number(
        &self,
        encrypted_number: &str,
    ) -> Result<Option<Card>> {
        let state = self.state.lock().await;

        Ok(state
            .cards
            .values()
            .find(|c| c.encrypted_number == encrypted_number)
            .cloned())
    }

    async fn list_cards(&self, filter: &CardFilter, page: PageRequest) -> Result<Page<Card>> {
        let state = self.state.lock().await;

        let mut cards: Vec<Card> = state
            .cards
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        cards.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        Ok(page.apply(&cards))
    }

    async fn update_card(&self, id: Uuid, mutation: CardMutation<'_>) -> Result<Card> {
        let mut state = self.state.lock().await;

        let mut card = state.cards.get(&id).cloned().ok_or_else(|| card_not_found(id))?;
        mutation(&mut card)?;
        card.updated_at = Utc::now();
        state.cards.insert(id, card.clone());

        Ok(card)
    }

    async fn delete_card(&self, id: Uuid, guard: CardGuard<'_>) -> Result<()> {
        let mut state = self.state.lock().await;

        let card = state.cards.get(&id).ok_or_else(|| card_not_found(id))?;
        let has_pending = state
            .block_requests
            .iter()
            .any(|r| r.card_id == Some(id) && r.status == BlockRequestStatus::Pending);
        guard(card, has_pending)?;
        state.cards.remove(&id);

        // Mirrors ON DELETE SET NULL
        for tx in state.transactions.iter_mut() {
            if tx.from_card_id == Some(id) {
                tx.from_card_id = None;
            }
            if tx.to_card_id == Some(id) {
                tx.to_card_id = None;
            }
        }
        for request in state.block_requests.iter_mut() {
            if request.card_id == Some(id) {
                request.card_id = None;
            }
        }

        Ok(())
    }

    async fn expire_cards(&self, today: NaiveDate) -> Result<u64> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let mut expired = 0;
        for card in state.cards.values_mut() {
            if card.needs_expiry(today) {
                card.status = CardStatus::Expired;
                card.updated_at = now;
                expired += 1;
            }
        }

        Ok(expired)
    }

    async fn transfer(
        &self,
        from_id: Uuid,
        to_id: Uuid,
        mutation: TransferMutation<'_>,
    ) -> Result<Transaction> {
        let mut state = self.state.lock().await;

        let mut from = state
            .cards
            .get(&from_id)
            .cloned()
            .ok_or_else(|| card_not_found(from_id))?;
        let mut to = state
            .cards
            .get(&to_id)
            .cloned()
            .ok_or_else(|| card_not_found(to_id))?;

        let record = mutation(&mut from, &mut to)?;
        if from.id == to.id {
            return Err(AppError::validation("Cannot transfer to the same card"));
        }

        let now = Utc::now();
        from.updated_at = now;
        to.updated_at = now;

        let transaction = Transaction {
            id: Uuid::new_v4(),
            from_card_id: Some(record.from_card_id),
            to_card_id: Some(record.to_card_id),
            from_user_id: record.from_user_id,
            to_user_id: record.to_user_id,
            from_masked_number: record.from_masked_number,
            to_masked_number: record.to_masked_number,
            amount: record.amount,
            description: record.description,
            transaction_date: now,
        };

        state.cards.insert(from.id, from);
        state.cards.insert(to.id, to);
        state.transactions.push(transaction.clone());

        Ok(transaction)
    }

    async fn find_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        let state = self.state.lock().await;

        Ok(state.transactions.iter().find(|t| t.id == id).cloned())
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> Result<Page<Transaction>> {
        let state = self.state.lock().await;

        // Insertion order is chronological, so reversing gives newest first
        // even when timestamps tie.
        let transactions: Vec<Transaction> = state
            .transactions
            .iter()
            .rev()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();

        Ok(page.apply(&transactions))
    }

    async fn open_block_request(
        &self,
        card_id: Uuid,
        opening: BlockRequestOpening<'_>,
    ) -> Result<(BlockRequest, Card)> {
        let mut state = self.state.lock().await;

        let mut card = state
            .cards
            .get(&card_id)
            .cloned()
            .ok_or_else(|| card_not_found(card_id))?;
        let has_pending = state
            .block_requests
            .iter()
            .any(|r| r.card_id == Some(card_id) && r.status == BlockRequestStatus::Pending);

        let data = opening(&mut card, has_pending)?;
        if has_pending {
            return Err(AppError::validation("Block request already exists for this card"));
        }

        let request = BlockRequest {
            id: Uuid::new_v4(),
            card_id: Some(data.card_id),
            requesting_user_id: data.requesting_user_id,
            request_date: Utc::now(),
            reason: data.reason,
            status: BlockRequestStatus::Pending,
            processed_date: None,
            processed_by_user_id: None,
        };
        card.updated_at = Utc::now();

        state.block_requests.push(request.clone());
        state.cards.insert(card.id, card.clone());

        Ok((request, card))
    }

    async fn resolve_block_request(
        &self,
        id: Uuid,
        resolution: BlockRequestResolution<'_>,
    ) -> Result<(BlockRequest, Card)> {
        let mut state = self.state.lock().await;

        let index = state
            .block_requests
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| AppError::not_found(format!("Block request {} not found", id)))?;
        let mut request = state.block_requests[index].clone();
        let card_id = request
            .card_id
            .ok_or_else(|| AppError::not_found("Card for block request no longer exists"))?;
        let mut card = state
            .cards
            .get(&card_id)
            .cloned()
            .ok_or_else(|| card_not_found(card_id))?;

        resolution(&mut request, &mut card)?;
        card.updated_at = Utc::now();

        state.block_requests[index] = request.clone();
        state.cards.insert(card.id, card.clone());

        Ok((request, card))
    }

    async fn find_block_request(&self, id: Uuid) -> Result<Option<BlockRequest>> {
        let state = self.state.lock().await;

        Ok(state.block_requests.iter().find(|r| r.id == id).cloned())
    }

    async fn list_block_requests(
        &self,
        filter: &BlockRequestFilter,
        page: PageRequest,
    ) -> Result<Page<BlockRequest>> {
        let state = self.state.lock().await;

        let requests: Vec<BlockRequest> = state
            .block_requests
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        Ok(page.apply(&requests))
    }
}
