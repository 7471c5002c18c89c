use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{BlockRequest, Card, Transaction};
use crate::services::encryption::mask_card_number;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Admin,
}

/// The authenticated actor behind a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::User,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Role gate for administrator-only operations
pub fn require_admin(principal: &Principal) -> Result<()> {
    if principal.is_admin() {
        Ok(())
    } else {
        tracing::warn!(user_id = %principal.user_id, "Administrator privilege required");
        Err(AppError::Forbidden)
    }
}

pub fn can_access_card(principal: &Principal, card: &Card) -> bool {
    principal.is_admin() || card.owner_user_id == principal.user_id
}

/// Same error whether the card is missing or belongs to someone else, so
/// non-owners learn nothing about which numbers exist.
pub fn card_not_found(plaintext_number: &str) -> AppError {
    AppError::not_found(format!(
        "Card not found: {}",
        mask_card_number(plaintext_number)
    ))
}

pub fn ensure_card_access(principal: &Principal, card: &Card, plaintext_number: &str) -> Result<()> {
    if can_access_card(principal, card) {
        Ok(())
    } else {
        tracing::debug!(
            card_id = %card.id,
            user_id = %principal.user_id,
            "Card access denied, reporting as not found"
        );
        Err(card_not_found(plaintext_number))
    }
}

/// A transaction is visible to administrators and to either participant.
pub fn ensure_transaction_access(principal: &Principal, transaction: &Transaction) -> Result<()> {
    if principal.is_admin() || transaction.involves_user(principal.user_id) {
        Ok(())
    } else {
        Err(AppError::not_found(format!(
            "Transaction {} not found",
            transaction.id
        )))
    }
}

pub fn ensure_block_request_access(principal: &Principal, request: &BlockRequest) -> Result<()> {
    if principal.is_admin() || request.requesting_user_id == principal.user_id {
        Ok(())
    } else {
        Err(AppError::not_found(format!(
            "Block request {} not found",
            request.id
        )))
    }
}
