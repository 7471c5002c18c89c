use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

use super::page::PageRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "block_request_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockRequestStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BlockRequest {
    pub id: Uuid,
    pub card_id: Option<Uuid>,
    pub requesting_user_id: Uuid,
    pub request_date: DateTime<Utc>,
    pub reason: Option<String>,
    pub status: BlockRequestStatus,
    pub processed_date: Option<DateTime<Utc>>,
    pub processed_by_user_id: Option<Uuid>, // Administrator
}

#[derive(Debug, Clone)]
pub struct NewBlockRequest {
    pub card_id: Uuid,
    pub requesting_user_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BlockRequestFilter {
    pub status: Option<BlockRequestStatus>,
    pub requesting_user_id: Option<Uuid>,
}

impl BlockRequestFilter {
    pub fn pending() -> Self {
        Self {
            status: Some(BlockRequestStatus::Pending),
            requesting_user_id: None,
        }
    }

    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            status: None,
            requesting_user_id: Some(user_id),
        }
    }

    pub fn matches(&self, request: &BlockRequest) -> bool {
        self.status.map_or(true, |s| request.status == s)
            && self
                .requesting_user_id
                .map_or(true, |id| request.requesting_user_id == id)
    }

    fn push_where(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        builder.push(" WHERE TRUE");
        if let Some(status) = self.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(user_id) = self.requesting_user_id {
            builder
                .push(" AND requesting_user_id = ")
                .push_bind(user_id);
        }
    }
}

impl BlockRequest {
    pub async fn insert<'e, E: PgExecutor<'e>>(
        executor: E,
        data: &NewBlockRequest,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO block_requests (card_id, requesting_user_id, reason, status)
            VALUES ($1, $2, $3, 'PENDING')
            RETURNING *
            "#,
        )
        .bind(data.card_id)
        .bind(data.requesting_user_id)
        .bind(&data.reason)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM block_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn lock<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM block_requests WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn pending_exists_for_card<'e, E: PgExecutor<'e>>(
        executor: E,
        card_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM block_requests WHERE card_id = $1 AND status = 'PENDING'
            )
            "#,
        )
        .bind(card_id)
        .fetch_one(executor)
        .await
    }

    /// Persists the processing outcome of a request
    pub async fn save_state<'e, E: PgExecutor<'e>>(
        executor: E,
        request: &BlockRequest,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE block_requests
            SET status = $2, reason = $3, processed_date = $4, processed_by_user_id = $5
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(request.id)
        .bind(request.status)
        .bind(&request.reason)
        .bind(request.processed_date)
        .bind(request.processed_by_user_id)
        .fetch_one(executor)
        .await
    }

    pub async fn count<'e, E: PgExecutor<'e>>(
        executor: E,
        filter: &BlockRequestFilter,
    ) -> Result<i64, sqlx::Error> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM block_requests");
        filter.push_where(&mut builder);

        builder.build_query_scalar::<i64>().fetch_one(executor).await
    }

    /// Oldest first, so administrators work the queue in arrival order
    pub async fn list<'e, E: PgExecutor<'e>>(
        executor: E,
        filter: &BlockRequestFilter,
        page: PageRequest,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut builder = QueryBuilder::new("SELECT * FROM block_requests");
        filter.push_where(&mut builder);
        builder
            .push(" ORDER BY request_date ASC, id LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        builder.build_query_as::<Self>().fetch_all(executor).await
    }
}
