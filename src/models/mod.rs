// Models module - Database entity representations

pub mod block_request;
pub mod card;
pub mod page;
pub mod transaction;

pub use block_request::{BlockRequest, BlockRequestStatus};
pub use card::{Card, CardStatus};
pub use page::{Page, PageRequest};
pub use transaction::Transaction;
