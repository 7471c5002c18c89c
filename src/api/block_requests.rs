use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::session::AppState;
use crate::api::views::BlockRequestView;
use crate::error::AppError;
use crate::models::{Page, PageRequest};
use crate::services::Principal;

#[derive(Debug, Deserialize)]
pub struct NewBlockRequestBody {
    pub card_number: String,
    pub reason: Option<String>,
}

/// Asks an administrator to block a card
async fn create_block_request(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<NewBlockRequestBody>,
) -> Result<(StatusCode, Json<BlockRequestView>), AppError> {
    let request = state
        .block_requests
        .request(&body.card_number, &principal, body.reason)
        .await?;

    Ok((StatusCode::CREATED, Json(request.into())))
}

async fn list_own_requests(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(page): Query<PageRequest>,
) -> Result<Json<Page<BlockRequestView>>, AppError> {
    let requests = state
        .block_requests
        .list_for_user(&principal, principal.user_id, page)
        .await?;

    Ok(Json(requests.map(BlockRequestView::from)))
}

async fn get_block_request(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<BlockRequestView>, AppError> {
    let request = state.block_requests.find(request_id, &principal).await?;

    Ok(Json(request.into()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/block-requests",
            get(list_own_requests).post(create_block_request),
        )
        .route("/api/block-requests/:request_id", get(get_block_request))
}
