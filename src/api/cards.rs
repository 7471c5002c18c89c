use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::session::AppState;
use crate::api::page_request;
use crate::api::views::{BalanceView, CardNumberBody, CardView};
use crate::error::AppError;
use crate::models::{CardStatus, Page};
use crate::services::Principal;

#[derive(Debug, Deserialize)]
pub struct OwnCardsQuery {
    pub status: Option<CardStatus>,
    pub owner: Option<String>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

/// Lists the caller's cards
async fn list_cards(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<OwnCardsQuery>,
) -> Result<Json<Page<CardView>>, AppError> {
    let owner = query.owner.filter(|o| !o.trim().is_empty());
    let cards = state
        .registry
        .list_own(&principal, query.status, owner, page_request(query.page, query.size))
        .await?;

    Ok(Json(CardView::page(&state.registry, cards)))
}

async fn get_card(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(card_id): Path<Uuid>,
) -> Result<Json<CardView>, AppError> {
    let card = state.registry.find_by_id(card_id, &principal).await?;

    Ok(Json(CardView::new(&state.registry, card)))
}

async fn lookup_card(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CardNumberBody>,
) -> Result<Json<CardView>, AppError> {
    let card = state
        .registry
        .find_by_plaintext_number(&body.card_number, &principal)
        .await?;

    Ok(Json(CardView::new(&state.registry, card)))
}

async fn card_balance(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CardNumberBody>,
) -> Result<Json<BalanceView>, AppError> {
    let card = state
        .registry
        .find_by_plaintext_number(&body.card_number, &principal)
        .await?;

    Ok(Json(BalanceView {
        masked_number: state.registry.masked_number(&card),
        balance: card.balance,
    }))
}

/// Blocks a card immediately, without administrator review
async fn block_card(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CardNumberBody>,
) -> Result<Json<CardView>, AppError> {
    let card = state.registry.block(&body.card_number, &principal).await?;

    Ok(Json(CardView::new(&state.registry, card)))
}

async fn activate_card(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CardNumberBody>,
) -> Result<Json<CardView>, AppError> {
    let card = state.registry.activate(&body.card_number, &principal).await?;

    Ok(Json(CardView::new(&state.registry, card)))
}

async fn delete_card(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(card_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let card = state.registry.find_by_id(card_id, &principal).await?;
    state.registry.delete(&card, &principal).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/cards", get(list_cards))
        .route("/api/cards/lookup", post(lookup_card))
        .route("/api/cards/balance", post(card_balance))
        .route("/api/cards/block", post(block_card))
        .route("/api/cards/activate", post(activate_card))
        .route("/api/cards/:card_id", get(get_card).delete(delete_card))
}
