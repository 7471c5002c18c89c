use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    block_request::{BlockRequest, BlockRequestFilter, NewBlockRequest},
    card::{Card, CardFilter, NewCard},
    page::{Page, PageRequest},
    transaction::{NewTransaction, Transaction, TransactionFilter},
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub async fn create_pool(database_url: &str) -> std::result::Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> std::result::Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Applied to a locked card; an error aborts the whole unit of work.
pub type CardMutation<'a> = &'a (dyn Fn(&mut Card) -> Result<()> + Send + Sync);

/// Inspects a locked card, and whether a PENDING request is open for it,
/// before the card is removed.
pub type CardGuard<'a> = &'a (dyn Fn(&Card, bool) -> Result<()> + Send + Sync);

/// Receives the locked (from, to) pair and returns the record to append.
pub type TransferMutation<'a> =
    &'a (dyn Fn(&mut Card, &mut Card) -> Result<NewTransaction> + Send + Sync);

/// Receives the locked card and whether a PENDING request already exists for it.
pub type BlockRequestOpening<'a> =
    &'a (dyn Fn(&mut Card, bool) -> Result<NewBlockRequest> + Send + Sync);

/// Receives the locked request and its locked card.
pub type BlockRequestResolution<'a> =
    &'a (dyn Fn(&mut BlockRequest, &mut Card) -> Result<()> + Send + Sync);

/// Persistence seam for the card services.
///
/// Every mutating method is one atomic unit: rows are locked, the supplied
/// closure decides on the fresh copies, and either every write commits or
/// none does. Card rows are always locked in ascending id order.
#[async_trait]
pub trait BankStore: Send + Sync {
    /// Fails with `Validation` if the encrypted number is already taken.
    async fn insert_card(&self, data: NewCard) -> Result<Card>;

    async fn find_card_by_id(&self, id: Uuid) -> Result<Option<Card>>;

    async fn find_card_by_encrypted_number(&self, encrypted_number: &str)
        -> Result<Option<Card>>;

    async fn list_cards(&self, filter: &CardFilter, page: PageRequest) -> Result<Page<Card>>;

    async fn update_card(&self, id: Uuid, mutation: CardMutation<'_>) -> Result<Card>;

    async fn delete_card(&self, id: Uuid, guard: CardGuard<'_>) -> Result<()>;

    /// Persists EXPIRED for every card past its expiry date.
    async fn expire_cards(&self, today: NaiveDate) -> Result<u64>;

    async fn transfer(
        &self,
        from_id: Uuid,
        to_id: Uuid,
        mutation: TransferMutation<'_>,
    ) -> Result<Transaction>;

    async fn find_transaction(&self, id: Uuid) -> Result<Option<Transaction>>;

    /// Newest first.
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> Result<Page<Transaction>>;

    async fn open_block_request(
        &self,
        card_id: Uuid,
        opening: BlockRequestOpening<'_>,
    ) -> Result<(BlockRequest, Card)>;

    async fn resolve_block_request(
        &self,
        id: Uuid,
        resolution: BlockRequestResolution<'_>,
    ) -> Result<(BlockRequest, Card)>;

    async fn find_block_request(&self, id: Uuid) -> Result<Option<BlockRequest>>;

    /// Oldest first.
    async fn list_block_requests(
        &self,
        filter: &BlockRequestFilter,
        page: PageRequest,
    ) -> Result<Page<BlockRequest>>;
}
