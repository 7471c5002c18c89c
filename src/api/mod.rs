// API module - HTTP endpoints

pub mod admin;
pub mod block_requests;
pub mod cards;
pub mod health;
pub mod middleware;
pub mod transactions;
pub mod views;

use axum::{routing::get, Router};

use crate::models::PageRequest;
use middleware::session::AppState;

pub(crate) fn page_request(page: Option<u32>, size: Option<u32>) -> PageRequest {
    let defaults = PageRequest::default();
    PageRequest::new(page.unwrap_or(defaults.page), size.unwrap_or(defaults.size))
}

/// All routes. Everything under `/api` requires an authenticated session.
pub fn router() -> Router<AppState> {
    let authenticated = Router::new()
        .merge(cards::router())
        .merge(transactions::router())
        .merge(block_requests::router())
        .merge(admin::router())
        .route_layer(axum::middleware::from_fn(middleware::auth::require_auth));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(authenticated)
}
