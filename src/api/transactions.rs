use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::session::AppState;
use crate::api::views::TransactionView;
use crate::error::AppError;
use crate::models::{Page, PageRequest};
use crate::services::{transfers::TransferRequest, Principal};

#[derive(Debug, Deserialize)]
pub struct TransferBody {
    pub from_card_number: String,
    pub to_card_number: String,
    pub amount: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    #[default]
    All,
    Sent,
    Received,
}

/// History query for one card. `start` and `end` must come together.
#[derive(Debug, Deserialize)]
pub struct HistoryBody {
    pub card_number: String,
    #[serde(default)]
    pub kind: HistoryKind,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

async fn create_transfer(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<TransferBody>,
) -> Result<(StatusCode, Json<TransactionView>), AppError> {
    let transaction = state
        .transfers
        .transfer_by_numbers(
            &principal,
            TransferRequest {
                from_card_number: body.from_card_number,
                to_card_number: body.to_card_number,
                amount: body.amount,
                description: body.description,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(transaction.into())))
}

async fn card_history(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(page): Query<PageRequest>,
    Json(body): Json<HistoryBody>,
) -> Result<Json<Page<TransactionView>>, AppError> {
    let number = body.card_number.as_str();
    let transfers = &state.transfers;

    let history = match (body.kind, body.start, body.end) {
        (HistoryKind::All, Some(start), Some(end)) => {
            transfers
                .by_date_range(number, &principal, start, end, page)
                .await?
        }
        (_, Some(_), None) | (_, None, Some(_)) => {
            return Err(AppError::validation(
                "Both start and end are required for a date range",
            ))
        }
        (_, Some(_), Some(_)) => {
            return Err(AppError::validation(
                "Date ranges are only supported for full history",
            ))
        }
        (HistoryKind::All, None, None) => transfers.history(number, &principal, page).await?,
        (HistoryKind::Sent, None, None) => transfers.sent(number, &principal, page).await?,
        (HistoryKind::Received, None, None) => {
            transfers.received(number, &principal, page).await?
        }
    };

    Ok(Json(history.map(TransactionView::from)))
}

async fn get_transaction(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<TransactionView>, AppError> {
    let transaction = state
        .transfers
        .find_by_id(transaction_id, &principal)
        .await?;

    Ok(Json(transaction.into()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/transactions", post(create_transfer))
        .route("/api/transactions/history", post(card_history))
        .route("/api/transactions/:transaction_id", get(get_transaction))
}
