// Services module - Business logic

pub mod access;
pub mod block_requests;
pub mod card_registry;
pub mod encryption;
pub mod transfers;

use chrono::{NaiveDate, Utc};

pub use access::{Principal, Role};
pub use block_requests::BlockRequestWorkflow;
pub use card_registry::CardRegistry;
pub use encryption::CardNumberCodec;
pub use transfers::TransferEngine;

/// Calendar date used for expiry checks (UTC)
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
