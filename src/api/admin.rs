use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Extension, Json, Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::session::AppState;
use crate::api::page_request;
use crate::api::views::{AdminCardView, BlockRequestView, CardView};
use crate::error::AppError;
use crate::models::{card::CardFilter, CardStatus, Page, PageRequest};
use crate::services::{access, card_registry::CreateCardRequest, Principal};

#[derive(Debug, Deserialize)]
pub struct CreateCardBody {
    pub card_number: String,
    pub owner: String,
    pub expiry_date: NaiveDate,
    pub balance: Option<Decimal>,
    pub owner_user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct AllCardsQuery {
    pub status: Option<CardStatus>,
    pub owner_user_id: Option<Uuid>,
    pub owner: Option<String>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: CardStatus,
}

#[derive(Debug, Deserialize)]
pub struct BalanceBody {
    pub balance: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub note: Option<String>,
}

async fn create_card(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CreateCardBody>,
) -> Result<(StatusCode, Json<CardView>), AppError> {
    let card = state
        .registry
        .create(
            &principal,
            CreateCardRequest {
                card_number: body.card_number,
                owner: body.owner,
                expiry_date: body.expiry_date,
                opening_balance: body.balance,
                owner_user_id: body.owner_user_id,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(CardView::new(&state.registry, card))))
}

/// All cards, optionally by status, holder or owner-name fragment
async fn list_all_cards(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<AllCardsQuery>,
) -> Result<Json<Page<CardView>>, AppError> {
    let filter = CardFilter {
        owner_user_id: query.owner_user_id,
        status: query.status,
        owner_name_contains: query.owner.filter(|o| !o.trim().is_empty()),
    };

    let cards = state
        .registry
        .list_all(&principal, filter, page_request(query.page, query.size))
        .await?;

    Ok(Json(CardView::page(&state.registry, cards)))
}

async fn card_detail(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(card_id): Path<Uuid>,
) -> Result<Json<AdminCardView>, AppError> {
    access::require_admin(&principal)?;

    let card = state.registry.find_by_id(card_id, &principal).await?;
    let card_number = state.registry.disclose_number(&card, &principal)?;

    Ok(Json(AdminCardView {
        card_number,
        card: CardView::new(&state.registry, card),
    }))
}

async fn set_card_status(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(card_id): Path<Uuid>,
    Json(body): Json<StatusBody>,
) -> Result<Json<CardView>, AppError> {
    access::require_admin(&principal)?;

    let card = state.registry.find_by_id(card_id, &principal).await?;
    let card = state
        .registry
        .set_status(&card, body.status, &principal)
        .await?;

    Ok(Json(CardView::new(&state.registry, card)))
}

async fn set_card_balance(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(card_id): Path<Uuid>,
    Json(body): Json<BalanceBody>,
) -> Result<Json<CardView>, AppError> {
    access::require_admin(&principal)?;

    let card = state.registry.find_by_id(card_id, &principal).await?;
    let card = state
        .registry
        .set_balance(&card, body.balance, &principal)
        .await?;

    Ok(Json(CardView::new(&state.registry, card)))
}

async fn pending_block_requests(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(page): Query<PageRequest>,
) -> Result<Json<Page<BlockRequestView>>, AppError> {
    let requests = state.block_requests.list_pending(&principal, page).await?;

    Ok(Json(requests.map(BlockRequestView::from)))
}

async fn user_block_requests(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<Uuid>,
    Query(page): Query<PageRequest>,
) -> Result<Json<Page<BlockRequestView>>, AppError> {
    access::require_admin(&principal)?;

    let requests = state
        .block_requests
        .list_for_user(&principal, user_id, page)
        .await?;

    Ok(Json(requests.map(BlockRequestView::from)))
}

async fn approve_block_request(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<BlockRequestView>, AppError> {
    let (request, _card) = state.block_requests.approve(request_id, &principal).await?;

    Ok(Json(request.into()))
}

async fn reject_block_request(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(request_id): Path<Uuid>,
    body: Option<Json<RejectBody>>,
) -> Result<Json<BlockRequestView>, AppError> {
    let note = body.and_then(|Json(body)| body.note);
    let (request, _card) = state
        .block_requests
        .reject(request_id, &principal, note)
        .await?;

    Ok(Json(request.into()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/cards", get(list_all_cards).post(create_card))
        .route("/api/admin/cards/:card_id", get(card_detail))
        .route("/api/admin/cards/:card_id/status", put(set_card_status))
        .route("/api/admin/cards/:card_id/balance", put(set_card_balance))
        .route("/api/admin/block-requests", get(pending_block_requests))
        .route(
            "/api/admin/users/:user_id/block-requests",
            get(user_block_requests),
        )
        .route(
            "/api/admin/block-requests/:request_id/approve",
            post(approve_block_request),
        )
        .route(
            "/api/admin/block-requests/:request_id/reject",
            post(reject_block_request),
        )
}
