use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::BankStore;
use crate::error::{AppError, Result};
use crate::models::{
    card::{Card, CardFilter, CardStatus, NewCard},
    page::{Page, PageRequest},
};
use crate::services::access::{self, Principal};
use crate::services::encryption::{CardNumberCodec, MASKED_PLACEHOLDER};
use crate::services::today;

pub const CARD_NUMBER_DIGITS: usize = 16;
pub const OWNER_MIN_LEN: usize = 2;
pub const OWNER_MAX_LEN: usize = 100;
pub const MAX_TEXT_LEN: usize = 500;

/// Balances are NUMERIC(15, 2): 13 integer digits.
const MAX_INTEGER_DIGITS: u32 = 13;

/// Request to issue a new card
#[derive(Debug, Clone)]
pub struct CreateCardRequest {
    pub card_number: String,
    pub owner: String,
    pub expiry_date: NaiveDate,
    pub opening_balance: Option<Decimal>,
    pub owner_user_id: Uuid,
}

/// Checks a monetary value fits the stored precision and returns it at scale 2.
pub fn normalize_money(value: Decimal, what: &str) -> Result<Decimal> {
    if value.normalize().scale() > 2 {
        return Err(AppError::validation(format!(
            "{} must have at most 2 fractional digits",
            what
        )));
    }

    let limit = Decimal::from(10u64.pow(MAX_INTEGER_DIGITS));
    if value.abs() >= limit {
        return Err(AppError::validation(format!(
            "{} must have at most {} integer digits",
            what, MAX_INTEGER_DIGITS
        )));
    }

    let mut value = value;
    value.rescale(2);
    Ok(value)
}

pub fn validate_text_len(value: Option<&str>, what: &str) -> Result<()> {
    match value {
        Some(text) if text.chars().count() > MAX_TEXT_LEN => Err(AppError::validation(format!(
            "{} must be at most {} characters",
            what, MAX_TEXT_LEN
        ))),
        _ => Ok(()),
    }
}

fn validate_card_number(number: &str) -> Result<()> {
    if number.len() == CARD_NUMBER_DIGITS && number.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(AppError::validation("Card number must be 16 digits"))
    }
}

fn validate_owner(owner: &str) -> Result<()> {
    let len = owner.trim().chars().count();
    if (OWNER_MIN_LEN..=OWNER_MAX_LEN).contains(&len) {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "Owner name must be between {} and {} characters",
            OWNER_MIN_LEN, OWNER_MAX_LEN
        )))
    }
}

/// Status a card ends up in after a direct (non-workflow) status change.
///
/// Blocking an already blocked card, or activating an active one, is a no-op.
/// PENDING_BLOCK only moves through the block-request workflow and EXPIRED is
/// terminal.
pub fn direct_transition(current: CardStatus, target: CardStatus) -> Result<CardStatus> {
    use CardStatus::*;

    match (current, target) {
        (Active, Blocked) | (Blocked, Blocked) => Ok(Blocked),
        (Blocked, Active) | (Active, Active) => Ok(Active),
        (PendingBlock, Blocked | Active) => Err(AppError::validation(
            "Card has a pending block request awaiting administrator review",
        )),
        (Expired, _) => Err(AppError::validation("Expired cards cannot change status")),
        (_, PendingBlock) => Err(AppError::validation(
            "Use a block request to move a card to PENDING_BLOCK",
        )),
        (_, Expired) => Err(AppError::validation(
            "Cards expire automatically on their expiry date",
        )),
    }
}

/// Owns card entities: issuance, lookup by plaintext number, lifecycle and balance.
#[derive(Clone)]
pub struct CardRegistry {
    store: Arc<dyn BankStore>,
    codec: CardNumberCodec,
    default_opening_balance: Decimal,
}

impl CardRegistry {
    pub fn new(
        store: Arc<dyn BankStore>,
        codec: CardNumberCodec,
        default_opening_balance: Decimal,
    ) -> Self {
        Self {
            store,
            codec,
            default_opening_balance,
        }
    }

    pub fn store(&self) -> &Arc<dyn BankStore> {
        &self.store
    }

    pub fn codec(&self) -> &CardNumberCodec {
        &self.codec
    }

    /// Issues a new ACTIVE card. Administrators only.
    #[tracing::instrument(skip(self, request), fields(user_id = %principal.user_id, owner_user_id = %request.owner_user_id))]
    pub async fn create(&self, principal: &Principal, request: CreateCardRequest) -> Result<Card> {
        access::require_admin(principal)?;

        validate_card_number(&request.card_number)?;
        validate_owner(&request.owner)?;

        let balance = match request.opening_balance {
            Some(balance) if balance < Decimal::ZERO => {
                return Err(AppError::validation("Balance must not be negative"))
            }
            Some(balance) => normalize_money(balance, "Balance")?,
            None => self.default_opening_balance,
        };

        let encrypted_number = self.codec.encrypt(&request.card_number)?;

        let card = self
            .store
            .insert_card(NewCard {
                encrypted_number,
                owner: request.owner.trim().to_string(),
                expiry_date: request.expiry_date,
                balance,
                owner_user_id: request.owner_user_id,
            })
            .await?;

        tracing::info!(
            card_id = %card.id,
            masked_number = %self.masked_number(&card),
            "Card issued"
        );

        Ok(card)
    }

    /// Resolves a caller-supplied plaintext number to a card the principal may see.
    ///
    /// Non-owners get `NotFound`, exactly as if the card did not exist.
    pub async fn find_by_plaintext_number(
        &self,
        plaintext_number: &str,
        principal: &Principal,
    ) -> Result<Card> {
        let encrypted_number = self.codec.encrypt(plaintext_number)?;

        let card = self
            .store
            .find_card_by_encrypted_number(&encrypted_number)
            .await?
            .ok_or_else(|| access::card_not_found(plaintext_number))?;

        access::ensure_card_access(principal, &card, plaintext_number)?;

        self.refresh_expiry(card).await
    }

    pub async fn find_by_id(&self, id: Uuid, principal: &Principal) -> Result<Card> {
        let card = self
            .store
            .find_card_by_id(id)
            .await?
            .filter(|card| access::can_access_card(principal, card))
            .ok_or_else(|| AppError::not_found(format!("Card {} not found", id)))?;

        self.refresh_expiry(card).await
    }

    /// Persists the EXPIRED transition for a card read after its expiry date.
    async fn refresh_expiry(&self, card: Card) -> Result<Card> {
        let today = today();
        if !card.needs_expiry(today) {
            return Ok(card);
        }

        let card = self
            .store
            .update_card(card.id, &|c: &mut Card| {
                if c.needs_expiry(today) {
                    c.status = CardStatus::Expired;
                }
                Ok(())
            })
            .await?;

        tracing::info!(card_id = %card.id, expiry_date = %card.expiry_date, "Card expired");

        Ok(card)
    }

    #[tracing::instrument(skip(self, card), fields(card_id = %card.id, user_id = %principal.user_id))]
    pub async fn set_status(
        &self,
        card: &Card,
        new_status: CardStatus,
        principal: &Principal,
    ) -> Result<Card> {
        if !access::can_access_card(principal, card) {
            return Err(AppError::not_found(format!("Card {} not found", card.id)));
        }

        let updated = self
            .store
            .update_card(card.id, &|c: &mut Card| {
                c.status = direct_transition(c.status, new_status)?;
                Ok(())
            })
            .await?;

        tracing::info!(status = ?updated.status, "Card status updated");

        Ok(updated)
    }

    /// Immediate block by the owner or an administrator
    pub async fn block(&self, plaintext_number: &str, principal: &Principal) -> Result<Card> {
        let card = self.find_by_plaintext_number(plaintext_number, principal).await?;
        self.set_status(&card, CardStatus::Blocked, principal).await
    }

    pub async fn activate(&self, plaintext_number: &str, principal: &Principal) -> Result<Card> {
        let card = self.find_by_plaintext_number(plaintext_number, principal).await?;
        self.set_status(&card, CardStatus::Active, principal).await
    }

    #[tracing::instrument(skip(self, card), fields(card_id = %card.id, user_id = %principal.user_id))]
    pub async fn set_balance(
        &self,
        card: &Card,
        new_balance: Decimal,
        principal: &Principal,
    ) -> Result<Card> {
        if !access::can_access_card(principal, card) {
            return Err(AppError::not_found(format!("Card {} not found", card.id)));
        }
        if new_balance < Decimal::ZERO {
            return Err(AppError::validation("Balance must not be negative"));
        }
        let new_balance = normalize_money(new_balance, "Balance")?;

        let updated = self
            .store
            .update_card(card.id, &|c: &mut Card| {
                c.balance = new_balance;
                Ok(())
            })
            .await?;

        tracing::info!(balance = %updated.balance, "Card balance set");

        Ok(updated)
    }

    pub async fn balance(&self, plaintext_number: &str, principal: &Principal) -> Result<Decimal> {
        Ok(self
            .find_by_plaintext_number(plaintext_number, principal)
            .await?
            .balance)
    }

    /// `**** **** **** 1234`, or the fully masked placeholder if the stored
    /// number cannot be decrypted.
    pub fn masked_number(&self, card: &Card) -> String {
        self.codec.masked(&card.encrypted_number)
    }

    /// Full card number for administrators. Undecryptable numbers are never
    /// an error here; they come back as the masked placeholder.
    pub fn disclose_number(&self, card: &Card, principal: &Principal) -> Result<String> {
        access::require_admin(principal)?;

        Ok(match self.codec.decrypt(&card.encrypted_number) {
            Ok(number) => number,
            Err(e) => {
                tracing::warn!(card_id = %card.id, error = %e, "Card number could not be disclosed");
                MASKED_PLACEHOLDER.to_string()
            }
        })
    }

    /// Removes a card. Its transactions survive as historical records.
    ///
    /// Refused while money remains on the card or a block request is open.
    #[tracing::instrument(skip(self, card), fields(card_id = %card.id, user_id = %principal.user_id))]
    pub async fn delete(&self, card: &Card, principal: &Principal) -> Result<()> {
        if !access::can_access_card(principal, card) {
            return Err(AppError::not_found(format!("Card {} not found", card.id)));
        }

        self.store
            .delete_card(card.id, &|c: &Card, has_pending: bool| {
                if !c.balance.is_zero() {
                    return Err(AppError::validation(
                        "Card with a non-zero balance cannot be deleted",
                    ));
                }
                if has_pending || c.status == CardStatus::PendingBlock {
                    return Err(AppError::validation(
                        "Card with a pending block request cannot be deleted",
                    ));
                }
                Ok(())
            })
            .await?;

        tracing::info!("Card deleted");

        Ok(())
    }

    /// The principal's own cards, optionally narrowed by status or owner name
    pub async fn list_own(
        &self,
        principal: &Principal,
        status: Option<CardStatus>,
        owner_name_contains: Option<String>,
        page: PageRequest,
    ) -> Result<Page<Card>> {
        let filter = CardFilter {
            owner_user_id: Some(principal.user_id),
            status,
            owner_name_contains,
        };

        self.store.list_cards(&filter, page).await
    }

    /// Any cards, for administrators
    pub async fn list_all(
        &self,
        principal: &Principal,
        filter: CardFilter,
        page: PageRequest,
    ) -> Result<Page<Card>> {
        access::require_admin(principal)?;

        self.store.list_cards(&filter, page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{card_request, registry, ADMIN};
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(CardStatus::Active, CardStatus::Blocked, Some(CardStatus::Blocked))]
    #[case(CardStatus::Blocked, CardStatus::Blocked, Some(CardStatus::Blocked))]
    #[case(CardStatus::Blocked, CardStatus::Active, Some(CardStatus::Active))]
    #[case(CardStatus::Active, CardStatus::Active, Some(CardStatus::Active))]
    #[case(CardStatus::PendingBlock, CardStatus::Blocked, None)]
    #[case(CardStatus::PendingBlock, CardStatus::Active, None)]
    #[case(CardStatus::Expired, CardStatus::Active, None)]
    #[case(CardStatus::Active, CardStatus::PendingBlock, None)]
    #[case(CardStatus::Active, CardStatus::Expired, None)]
    fn test_direct_transition(
        #[case] current: CardStatus,
        #[case] target: CardStatus,
        #[case] expected: Option<CardStatus>,
    ) {
        let result = direct_transition(current, target);
        match expected {
            Some(status) => assert_eq!(result.unwrap(), status),
            None => assert!(matches!(result, Err(AppError::Validation(_)))),
        }
    }

    #[rstest]
    #[case(dec!(10), dec!(10.00))]
    #[case(dec!(0.1), dec!(0.10))]
    #[case(dec!(12.500), dec!(12.50))]
    fn test_normalize_money(#[case] input: Decimal, #[case] expected: Decimal) {
        let normalized = normalize_money(input, "Amount").unwrap();
        assert_eq!(normalized, expected);
        assert_eq!(normalized.scale(), 2);
    }

    #[rstest]
    #[case(dec!(0.001))]
    #[case(dec!(10000000000000))]
    fn test_normalize_money_rejects_out_of_range(#[case] input: Decimal) {
        assert!(matches!(
            normalize_money(input, "Amount"),
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_create_encrypts_and_defaults_balance() {
        let registry = registry();
        let owner = Uuid::new_v4();

        let card = registry
            .create(&ADMIN, card_request("4111111111111111", owner, None))
            .await
            .unwrap();

        assert_eq!(card.status, CardStatus::Active);
        assert_eq!(card.balance, dec!(1000.00));
        assert_ne!(card.encrypted_number, "4111111111111111");
        assert_eq!(registry.masked_number(&card), "**** **** **** 1111");
    }

    #[tokio::test]
    async fn test_create_requires_admin() {
        let registry = registry();
        let owner = Uuid::new_v4();

        let result = registry
            .create(
                &Principal::user(owner),
                card_request("4111111111111111", owner, None),
            )
            .await;

        assert!(matches!(result, Err(AppError::Forbidden)));
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_number() {
        let registry = registry();
        let owner = Uuid::new_v4();
        registry
            .create(&ADMIN, card_request("4111111111111111", owner, None))
            .await
            .unwrap();

        let result = registry
            .create(&ADMIN, card_request("4111111111111111", Uuid::new_v4(), None))
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[rstest]
    #[case("411111111111111")]
    #[case("41111111111111112")]
    #[case("4111-1111-1111-11")]
    #[tokio::test]
    async fn test_create_rejects_malformed_number(#[case] number: &str) {
        let result = registry()
            .create(&ADMIN, card_request(number, Uuid::new_v4(), None))
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_negative_opening_balance() {
        let result = registry()
            .create(
                &ADMIN,
                card_request("4111111111111111", Uuid::new_v4(), Some(dec!(-0.01))),
            )
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_lookup_hides_foreign_cards() {
        let registry = registry();
        let owner = Uuid::new_v4();
        registry
            .create(&ADMIN, card_request("4111111111111111", owner, None))
            .await
            .unwrap();

        let as_owner = registry
            .find_by_plaintext_number("4111111111111111", &Principal::user(owner))
            .await;
        let as_stranger = registry
            .find_by_plaintext_number("4111111111111111", &Principal::user(Uuid::new_v4()))
            .await;
        let missing = registry
            .find_by_plaintext_number("4000000000000002", &Principal::user(owner))
            .await;
        let as_admin = registry
            .find_by_plaintext_number("4111111111111111", &ADMIN)
            .await;

        assert!(as_owner.is_ok());
        assert!(as_admin.is_ok());
        assert!(matches!(as_stranger, Err(AppError::NotFound(_))));
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_lookup_persists_lazy_expiry() {
        let registry = registry();
        let owner = Uuid::new_v4();
        let mut request = card_request("4111111111111111", owner, None);
        request.expiry_date = NaiveDate::from_ymd_opt(2001, 1, 31).unwrap();
        let created = registry.create(&ADMIN, request).await.unwrap();
        assert_eq!(created.status, CardStatus::Active);

        let card = registry
            .find_by_plaintext_number("4111111111111111", &Principal::user(owner))
            .await
            .unwrap();

        assert_eq!(card.status, CardStatus::Expired);
        let stored = registry.store().find_card_by_id(card.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CardStatus::Expired);
    }

    #[tokio::test]
    async fn test_block_is_idempotent_and_activate_reverses() {
        let registry = registry();
        let owner = Uuid::new_v4();
        let holder = Principal::user(owner);
        registry
            .create(&ADMIN, card_request("4111111111111111", owner, None))
            .await
            .unwrap();

        let blocked = registry.block("4111111111111111", &holder).await.unwrap();
        let blocked_again = registry.block("4111111111111111", &ADMIN).await.unwrap();
        let active = registry.activate("4111111111111111", &holder).await.unwrap();

        assert_eq!(blocked.status, CardStatus::Blocked);
        assert_eq!(blocked_again.status, CardStatus::Blocked);
        assert_eq!(active.status, CardStatus::Active);
    }

    #[tokio::test]
    async fn test_set_balance_rules() {
        let registry = registry();
        let owner = Uuid::new_v4();
        let card = registry
            .create(&ADMIN, card_request("4111111111111111", owner, None))
            .await
            .unwrap();

        let negative = registry
            .set_balance(&card, dec!(-1), &Principal::user(owner))
            .await;
        let stranger = registry
            .set_balance(&card, dec!(5), &Principal::user(Uuid::new_v4()))
            .await;
        let updated = registry
            .set_balance(&card, dec!(42.5), &Principal::user(owner))
            .await
            .unwrap();

        assert!(matches!(negative, Err(AppError::Validation(_))));
        assert!(matches!(stranger, Err(AppError::NotFound(_))));
        assert_eq!(updated.balance, dec!(42.50));
    }

    #[tokio::test]
    async fn test_delete_requires_zero_balance() {
        let registry = registry();
        let owner = Uuid::new_v4();
        let card = registry
            .create(&ADMIN, card_request("4111111111111111", owner, Some(dec!(5))))
            .await
            .unwrap();

        let refused = registry.delete(&card, &ADMIN).await;
        assert!(matches!(refused, Err(AppError::Validation(_))));

        let card = registry.set_balance(&card, dec!(0), &ADMIN).await.unwrap();
        registry.delete(&card, &Principal::user(owner)).await.unwrap();

        let gone = registry
            .find_by_plaintext_number("4111111111111111", &ADMIN)
            .await;
        assert!(matches!(gone, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_disclose_number_is_admin_only() {
        let registry = registry();
        let owner = Uuid::new_v4();
        let card = registry
            .create(&ADMIN, card_request("4111111111111111", owner, None))
            .await
            .unwrap();

        assert_eq!(
            registry.disclose_number(&card, &ADMIN).unwrap(),
            "4111111111111111"
        );
        assert!(matches!(
            registry.disclose_number(&card, &Principal::user(owner)),
            Err(AppError::Forbidden)
        ));

        let mut corrupt = card.clone();
        corrupt.encrypted_number = "corrupt".to_string();
        assert_eq!(registry.masked_number(&corrupt), MASKED_PLACEHOLDER);
        assert_eq!(
            registry.disclose_number(&corrupt, &ADMIN).unwrap(),
            MASKED_PLACEHOLDER
        );
    }

    #[tokio::test]
    async fn test_list_own_scopes_to_principal() {
        let registry = registry();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        registry
            .create(&ADMIN, card_request("4111111111111111", alice, None))
            .await
            .unwrap();
        registry
            .create(&ADMIN, card_request("4222222222222222", alice, None))
            .await
            .unwrap();
        registry
            .create(&ADMIN, card_request("4333333333333333", bob, None))
            .await
            .unwrap();
        registry
            .block("4222222222222222", &Principal::user(alice))
            .await
            .unwrap();

        let all_alice = registry
            .list_own(&Principal::user(alice), None, None, PageRequest::default())
            .await
            .unwrap();
        let blocked_alice = registry
            .list_own(
                &Principal::user(alice),
                Some(CardStatus::Blocked),
                None,
                PageRequest::default(),
            )
            .await
            .unwrap();
        let everything = registry
            .list_all(&ADMIN, CardFilter::default(), PageRequest::default())
            .await
            .unwrap();

        assert_eq!(all_alice.total, 2);
        assert_eq!(blocked_alice.total, 1);
        assert_eq!(everything.total, 3);
        assert!(matches!(
            registry
                .list_all(&Principal::user(alice), CardFilter::default(), PageRequest::default())
                .await,
            Err(AppError::Forbidden)
        ));
    }
}
