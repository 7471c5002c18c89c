use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    card::{Card, CardStatus},
    page::{Page, PageRequest},
    transaction::{Direction, NewTransaction, Transaction, TransactionFilter},
};
use crate::services::access::{self, Principal};
use crate::services::card_registry::{normalize_money, validate_text_len, CardRegistry};
use crate::services::encryption::CardNumberCodec;
use crate::services::today;

/// Request to move money between two cards, keyed by plaintext numbers
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub from_card_number: String,
    pub to_card_number: String,
    pub amount: Decimal,
    pub description: Option<String>,
}

/// Whether a card may take part in a transfer today.
///
/// BLOCKED is checked before the expiry date; any other non-ACTIVE status
/// is reported as blocked.
pub fn validate_for_transaction(card: &Card, masked_number: &str, today: NaiveDate) -> Result<()> {
    if card.status == CardStatus::Blocked {
        return Err(AppError::CardBlocked(masked_number.to_string()));
    }
    if card.is_expired_on(today) {
        return Err(AppError::CardExpired(masked_number.to_string()));
    }
    if card.status != CardStatus::Active {
        return Err(AppError::CardBlocked(format!("{} (not active)", masked_number)));
    }
    Ok(())
}

/// Runs the transfer checks in their fixed order against locked cards and,
/// if all pass, moves the money and describes the record to append.
///
/// 1. source eligible, 2. destination eligible, 3. not a self-transfer,
/// 4. positive amount, 5. sufficient funds, 6. debit and credit.
pub fn apply_transfer(
    codec: &CardNumberCodec,
    today: NaiveDate,
    from: &mut Card,
    to: &mut Card,
    amount: Decimal,
    description: Option<String>,
) -> Result<NewTransaction> {
    let from_masked = codec.masked(&from.encrypted_number);
    let to_masked = codec.masked(&to.encrypted_number);

    validate_for_transaction(from, &from_masked, today)?;
    validate_for_transaction(to, &to_masked, today)?;

    if from.encrypted_number == to.encrypted_number {
        return Err(AppError::validation("Cannot transfer to the same card"));
    }

    if amount <= Decimal::ZERO {
        return Err(AppError::validation("Amount must be positive"));
    }
    let amount = normalize_money(amount, "Amount")?;

    if from.balance < amount {
        return Err(AppError::InsufficientFunds {
            masked_number: from_masked,
            balance: from.balance,
            requested: amount,
        });
    }

    let credited = normalize_money(to.balance + amount, "Resulting balance")?;

    from.balance -= amount;
    to.balance = credited;

    Ok(NewTransaction {
        from_card_id: from.id,
        to_card_id: to.id,
        from_user_id: from.owner_user_id,
        to_user_id: to.owner_user_id,
        from_masked_number: from_masked,
        to_masked_number: to_masked,
        amount,
        description,
    })
}

/// Atomic balance moves between cards plus their audit history
#[derive(Clone)]
pub struct TransferEngine {
    registry: CardRegistry,
}

impl TransferEngine {
    pub fn new(registry: CardRegistry) -> Self {
        Self { registry }
    }

    /// Resolves both numbers for the principal, then transfers.
    #[tracing::instrument(skip(self, request), fields(user_id = %principal.user_id, amount = %request.amount))]
    pub async fn transfer_by_numbers(
        &self,
        principal: &Principal,
        request: TransferRequest,
    ) -> Result<Transaction> {
        validate_text_len(request.description.as_deref(), "Description")?;

        let from = self
            .registry
            .find_by_plaintext_number(&request.from_card_number, principal)
            .await?;
        let to = self
            .registry
            .find_by_plaintext_number(&request.to_card_number, principal)
            .await?;

        self.transfer(&from, &to, request.amount, request.description)
            .await
    }

    /// Moves `amount` from one card to another and records it, all or nothing.
    ///
    /// Validation runs on the rows as locked inside the unit of work, not on
    /// the copies passed in.
    pub async fn transfer(
        &self,
        from: &Card,
        to: &Card,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Transaction> {
        let codec = self.registry.codec();
        let today = today();

        let result = self
            .registry
            .store()
            .transfer(from.id, to.id, &|f: &mut Card, t: &mut Card| {
                apply_transfer(codec, today, f, t, amount, description.clone())
            })
            .await;

        match &result {
            Ok(transaction) => tracing::info!(
                transaction_id = %transaction.id,
                from_card_id = %from.id,
                to_card_id = %to.id,
                amount = %transaction.amount,
                "Transfer completed"
            ),
            Err(e) => tracing::warn!(
                from_card_id = %from.id,
                to_card_id = %to.id,
                category = e.category(),
                error = %e,
                "Transfer rejected"
            ),
        }

        result
    }

    async fn history_for(
        &self,
        plaintext_number: &str,
        principal: &Principal,
        direction: Direction,
        between: Option<(DateTime<Utc>, DateTime<Utc>)>,
        page: PageRequest,
    ) -> Result<Page<Transaction>> {
        let card = self
            .registry
            .find_by_plaintext_number(plaintext_number, principal)
            .await?;

        let filter = TransactionFilter {
            between,
            ..TransactionFilter::for_card(card.id, direction)
        };

        self.registry.store().list_transactions(&filter, page).await
    }

    /// Sent and received, newest first
    pub async fn history(
        &self,
        plaintext_number: &str,
        principal: &Principal,
        page: PageRequest,
    ) -> Result<Page<Transaction>> {
        self.history_for(plaintext_number, principal, Direction::Any, None, page)
            .await
    }

    pub async fn sent(
        &self,
        plaintext_number: &str,
        principal: &Principal,
        page: PageRequest,
    ) -> Result<Page<Transaction>> {
        self.history_for(plaintext_number, principal, Direction::Sent, None, page)
            .await
    }

    pub async fn received(
        &self,
        plaintext_number: &str,
        principal: &Principal,
        page: PageRequest,
    ) -> Result<Page<Transaction>> {
        self.history_for(plaintext_number, principal, Direction::Received, None, page)
            .await
    }

    pub async fn by_date_range(
        &self,
        plaintext_number: &str,
        principal: &Principal,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page: PageRequest,
    ) -> Result<Page<Transaction>> {
        if start > end {
            return Err(AppError::validation("Start date must not be after end date"));
        }

        self.history_for(
            plaintext_number,
            principal,
            Direction::Any,
            Some((start, end)),
            page,
        )
        .await
    }

    /// Visible to administrators and to the owner of either card
    pub async fn find_by_id(&self, id: Uuid, principal: &Principal) -> Result<Transaction> {
        let transaction = self
            .registry
            .store()
            .find_transaction(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Transaction {} not found", id)))?;

        access::ensure_transaction_access(principal, &transaction)?;

        Ok(transaction)
    }
}
