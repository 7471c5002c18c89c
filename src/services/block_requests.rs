use chrono::Utc;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    block_request::{BlockRequest, BlockRequestFilter, BlockRequestStatus, NewBlockRequest},
    card::{Card, CardStatus},
    page::{Page, PageRequest},
};
use crate::services::access::{self, Principal};
use crate::services::card_registry::{validate_text_len, CardRegistry, MAX_TEXT_LEN};

/// Outcome an administrator gives a pending request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject { note: Option<String> },
}

/// Applies an administrator's decision to a locked request and its card.
///
/// An EXPIRED card stays EXPIRED whatever the decision.
pub fn apply_decision(
    request: &mut BlockRequest,
    card: &mut Card,
    decision: &Decision,
    admin_id: Uuid,
) -> Result<()> {
    if request.status != BlockRequestStatus::Pending {
        return Err(AppError::validation("Block request is not pending"));
    }

    let (request_status, card_status) = match decision {
        Decision::Approve => (BlockRequestStatus::Approved, CardStatus::Blocked),
        Decision::Reject { note } => {
            if let Some(note) = note.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
                let reason = match request.reason.as_deref() {
                    Some(reason) if !reason.is_empty() => {
                        format!("{} [REJECTED: {}]", reason, note)
                    }
                    _ => format!("[REJECTED: {}]", note),
                };
                if reason.chars().count() > MAX_TEXT_LEN {
                    return Err(AppError::validation(format!(
                        "Reason with rejection note must be at most {} characters",
                        MAX_TEXT_LEN
                    )));
                }
                request.reason = Some(reason);
            }
            (BlockRequestStatus::Rejected, CardStatus::Active)
        }
    };

    request.status = request_status;
    request.processed_date = Some(Utc::now());
    request.processed_by_user_id = Some(admin_id);

    if card.status != CardStatus::Expired {
        card.status = card_status;
    }

    Ok(())
}

/// Two-step block: a cardholder asks, an administrator approves or rejects.
#[derive(Clone)]
pub struct BlockRequestWorkflow {
    registry: CardRegistry,
}

impl BlockRequestWorkflow {
    pub fn new(registry: CardRegistry) -> Self {
        Self { registry }
    }

    /// Opens a PENDING request and moves the card to PENDING_BLOCK in one unit.
    #[tracing::instrument(skip(self, plaintext_number, reason), fields(user_id = %principal.user_id))]
    pub async fn request(
        &self,
        plaintext_number: &str,
        principal: &Principal,
        reason: Option<String>,
    ) -> Result<BlockRequest> {
        validate_text_len(reason.as_deref(), "Reason")?;

        let card = self
            .registry
            .find_by_plaintext_number(plaintext_number, principal)
            .await?;

        let requesting_user_id = principal.user_id;
        let (request, card) = self
            .registry
            .store()
            .open_block_request(card.id, &|c: &mut Card, has_pending: bool| {
                if c.status != CardStatus::Active {
                    return Err(AppError::validation(
                        "Card is not active or already blocked/pending",
                    ));
                }
                if has_pending {
                    return Err(AppError::validation(
                        "Block request already exists for this card",
                    ));
                }

                c.status = CardStatus::PendingBlock;

                Ok(NewBlockRequest {
                    card_id: c.id,
                    requesting_user_id,
                    reason: reason.clone(),
                })
            })
            .await?;

        tracing::info!(
            request_id = %request.id,
            card_id = %card.id,
            "Block requested, card pending block"
        );

        Ok(request)
    }

    pub async fn approve(&self, request_id: Uuid, admin: &Principal) -> Result<(BlockRequest, Card)> {
        self.decide(request_id, admin, Decision::Approve).await
    }

    pub async fn reject(
        &self,
        request_id: Uuid,
        admin: &Principal,
        rejection_note: Option<String>,
    ) -> Result<(BlockRequest, Card)> {
        validate_text_len(rejection_note.as_deref(), "Rejection note")?;

        self.decide(
            request_id,
            admin,
            Decision::Reject {
                note: rejection_note,
            },
        )
        .await
    }

    #[tracing::instrument(skip(self, decision), fields(admin_id = %admin.user_id))]
    async fn decide(
        &self,
        request_id: Uuid,
        admin: &Principal,
        decision: Decision,
    ) -> Result<(BlockRequest, Card)> {
        access::require_admin(admin)?;

        let admin_id = admin.user_id;
        let (request, card) = self
            .registry
            .store()
            .resolve_block_request(request_id, &|r: &mut BlockRequest, c: &mut Card| {
                apply_decision(r, c, &decision, admin_id)
            })
            .await?;

        tracing::info!(
            status = ?request.status,
            card_id = %card.id,
            card_status = ?card.status,
            "Block request processed"
        );

        Ok((request, card))
    }

    pub async fn find(&self, request_id: Uuid, principal: &Principal) -> Result<BlockRequest> {
        let request = self
            .registry
            .store()
            .find_block_request(request_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Block request {} not found", request_id)))?;

        access::ensure_block_request_access(principal, &request)?;

        Ok(request)
    }

    /// Review queue for administrators
    pub async fn list_pending(
        &self,
        principal: &Principal,
        page: PageRequest,
    ) -> Result<Page<BlockRequest>> {
        access::require_admin(principal)?;

        self.registry
            .store()
            .list_block_requests(&BlockRequestFilter::pending(), page)
            .await
    }

    /// Requests filed by `user_id`; holders may only list their own
    pub async fn list_for_user(
        &self,
        principal: &Principal,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<BlockRequest>> {
        if user_id != principal.user_id {
            access::require_admin(principal)?;
        }

        self.registry
            .store()
            .list_block_requests(&BlockRequestFilter::for_user(user_id), page)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{card_request, registry, ADMIN};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    const NUMBER: &str = "4111111111111111";

    async fn setup() -> (BlockRequestWorkflow, Principal) {
        let registry = registry();
        let owner = Uuid::new_v4();
        registry
            .create(&ADMIN, card_request(NUMBER, owner, None))
            .await
            .unwrap();

        (BlockRequestWorkflow::new(registry), Principal::user(owner))
    }

    async fn card_status(workflow: &BlockRequestWorkflow) -> CardStatus {
        workflow
            .registry
            .find_by_plaintext_number(NUMBER, &ADMIN)
            .await
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn test_request_moves_card_to_pending_block() {
        let (workflow, holder) = setup().await;

        let request = workflow
            .request(NUMBER, &holder, Some("lost".to_string()))
            .await
            .unwrap();

        assert_eq!(request.status, BlockRequestStatus::Pending);
        assert_eq!(request.requesting_user_id, holder.user_id);
        assert_eq!(card_status(&workflow).await, CardStatus::PendingBlock);
    }

    #[tokio::test]
    async fn test_second_request_is_rejected_until_processed() {
        let (workflow, holder) = setup().await;
        let first = workflow.request(NUMBER, &holder, None).await.unwrap();

        let second = workflow.request(NUMBER, &holder, None).await;
        assert!(matches!(second, Err(AppError::Validation(_))));

        workflow.reject(first.id, &ADMIN, None).await.unwrap();

        let third = workflow.request(NUMBER, &holder, None).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn test_approve_blocks_card() {
        let (workflow, holder) = setup().await;
        let request = workflow.request(NUMBER, &holder, None).await.unwrap();

        let (request, card) = workflow.approve(request.id, &ADMIN).await.unwrap();

        assert_eq!(request.status, BlockRequestStatus::Approved);
        assert_eq!(request.processed_by_user_id, Some(ADMIN.user_id));
        assert!(request.processed_date.is_some());
        assert_eq!(card.status, CardStatus::Blocked);
        assert_eq!(card_status(&workflow).await, CardStatus::Blocked);
    }

    #[tokio::test]
    async fn test_reject_restores_card_and_appends_note() {
        let (workflow, holder) = setup().await;
        let request = workflow
            .request(NUMBER, &holder, Some("stolen".to_string()))
            .await
            .unwrap();

        let (request, card) = workflow
            .reject(request.id, &ADMIN, Some("found in drawer".to_string()))
            .await
            .unwrap();

        assert_eq!(request.status, BlockRequestStatus::Rejected);
        assert_eq!(
            request.reason.as_deref(),
            Some("stolen [REJECTED: found in drawer]")
        );
        assert_eq!(card.status, CardStatus::Active);
    }

    #[tokio::test]
    async fn test_reject_note_cannot_push_reason_past_limit() {
        let (workflow, holder) = setup().await;
        let request = workflow
            .request(NUMBER, &holder, Some("r".repeat(MAX_TEXT_LEN)))
            .await
            .unwrap();

        let result = workflow
            .reject(request.id, &ADMIN, Some("n".repeat(MAX_TEXT_LEN)))
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        let stored = workflow.find(request.id, &ADMIN).await.unwrap();
        assert_eq!(stored.status, BlockRequestStatus::Pending);
        assert_eq!(stored.reason.map(|r| r.chars().count()), Some(MAX_TEXT_LEN));
        assert_eq!(card_status(&workflow).await, CardStatus::PendingBlock);

        let (rejected, _) = workflow.reject(request.id, &ADMIN, None).await.unwrap();
        assert_eq!(rejected.status, BlockRequestStatus::Rejected);
    }

    #[tokio::test]
    async fn test_expired_card_with_open_request_cannot_be_deleted() {
        let (workflow, holder) = setup().await;
        let request = workflow.request(NUMBER, &holder, None).await.unwrap();
        let card = workflow
            .registry
            .find_by_plaintext_number(NUMBER, &ADMIN)
            .await
            .unwrap();
        workflow
            .registry
            .set_balance(&card, dec!(0), &ADMIN)
            .await
            .unwrap();
        workflow
            .registry
            .store()
            .expire_cards(NaiveDate::from_ymd_opt(2100, 1, 1).unwrap())
            .await
            .unwrap();
        let card = workflow
            .registry
            .find_by_plaintext_number(NUMBER, &ADMIN)
            .await
            .unwrap();
        assert_eq!(card.status, CardStatus::Expired);

        let refused = workflow.registry.delete(&card, &ADMIN).await;
        assert!(matches!(refused, Err(AppError::Validation(_))));

        let pending = workflow
            .list_pending(&ADMIN, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(pending.total, 1);

        let (request, card) = workflow.approve(request.id, &ADMIN).await.unwrap();
        assert_eq!(request.status, BlockRequestStatus::Approved);
        assert_eq!(card.status, CardStatus::Expired);

        workflow.registry.delete(&card, &ADMIN).await.unwrap();
    }

    #[tokio::test]
    async fn test_processed_request_cannot_be_processed_again() {
        let (workflow, holder) = setup().await;
        let request = workflow.request(NUMBER, &holder, None).await.unwrap();
        workflow.approve(request.id, &ADMIN).await.unwrap();

        let again = workflow.reject(request.id, &ADMIN, None).await;

        assert!(matches!(again, Err(AppError::Validation(_))));
        assert_eq!(card_status(&workflow).await, CardStatus::Blocked);
    }

    #[tokio::test]
    async fn test_request_on_blocked_card_fails() {
        let (workflow, holder) = setup().await;
        workflow.registry.block(NUMBER, &holder).await.unwrap();

        let result = workflow.request(NUMBER, &holder, None).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_only_admins_process_requests() {
        let (workflow, holder) = setup().await;
        let request = workflow.request(NUMBER, &holder, None).await.unwrap();

        let result = workflow.approve(request.id, &holder).await;

        assert!(matches!(result, Err(AppError::Forbidden)));
        assert_eq!(card_status(&workflow).await, CardStatus::PendingBlock);
    }

    #[tokio::test]
    async fn test_listing_and_visibility() {
        let (workflow, holder) = setup().await;
        let request = workflow.request(NUMBER, &holder, None).await.unwrap();
        let stranger = Principal::user(Uuid::new_v4());

        let pending = workflow
            .list_pending(&ADMIN, PageRequest::default())
            .await
            .unwrap();
        let own = workflow
            .list_for_user(&holder, holder.user_id, PageRequest::default())
            .await
            .unwrap();

        assert_eq!(pending.total, 1);
        assert_eq!(own.items, vec![request.clone()]);
        assert!(workflow.find(request.id, &holder).await.is_ok());
        assert!(matches!(
            workflow.find(request.id, &stranger).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            workflow
                .list_for_user(&stranger, holder.user_id, PageRequest::default())
                .await,
            Err(AppError::Forbidden)
        ));
    }
}
