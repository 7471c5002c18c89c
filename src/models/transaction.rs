use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

use super::page::PageRequest;

/// Immutable record of one completed transfer.
///
/// Participant user ids and masked numbers are snapshotted at creation so the
/// record stays readable (and access-checkable) after either card is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub from_card_id: Option<Uuid>, // NULL once the card is deleted
    pub to_card_id: Option<Uuid>,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub from_masked_number: String,
    pub to_masked_number: String,
    pub amount: Decimal,
    pub description: Option<String>,
    pub transaction_date: DateTime<Utc>,
}

impl Transaction {
    pub fn involves_user(&self, user_id: Uuid) -> bool {
        self.from_user_id == user_id || self.to_user_id == user_id
    }
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub from_card_id: Uuid,
    pub to_card_id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub from_masked_number: String,
    pub to_masked_number: String,
    pub amount: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Any,
    Sent,
    Received,
}

#[derive(Debug, Clone)]
pub struct TransactionFilter {
    pub card_id: Uuid,
    pub direction: Direction,
    pub between: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl TransactionFilter {
    pub fn for_card(card_id: Uuid, direction: Direction) -> Self {
        Self {
            card_id,
            direction,
            between: None,
        }
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        let sent = tx.from_card_id == Some(self.card_id);
        let received = tx.to_card_id == Some(self.card_id);

        let direction_ok = match self.direction {
            Direction::Any => sent || received,
            Direction::Sent => sent,
            Direction::Received => received,
        };

        direction_ok
            && self.between.map_or(true, |(start, end)| {
                tx.transaction_date >= start && tx.transaction_date <= end
            })
    }

    fn push_where(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        match self.direction {
            Direction::Any => {
                builder
                    .push(" WHERE (from_card_id = ")
                    .push_bind(self.card_id)
                    .push(" OR to_card_id = ")
                    .push_bind(self.card_id)
                    .push(")");
            }
            Direction::Sent => {
                builder.push(" WHERE from_card_id = ").push_bind(self.card_id);
            }
            Direction::Received => {
                builder.push(" WHERE to_card_id = ").push_bind(self.card_id);
            }
        }

        if let Some((start, end)) = self.between {
            builder
                .push(" AND transaction_date BETWEEN ")
                .push_bind(start)
                .push(" AND ")
                .push_bind(end);
        }
    }
}

impl Transaction {
    /// Inserts a transaction; the timestamp is assigned by the database
    pub async fn insert<'e, E: PgExecutor<'e>>(
        executor: E,
        data: &NewTransaction,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO transactions (
                from_card_id, to_card_id, from_user_id, to_user_id,
                from_masked_number, to_masked_number, amount, description
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(data.from_card_id)
        .bind(data.to_card_id)
        .bind(data.from_user_id)
        .bind(data.to_user_id)
        .bind(&data.from_masked_number)
        .bind(&data.to_masked_number)
        .bind(data.amount)
        .bind(&data.description)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn count<'e, E: PgExecutor<'e>>(
        executor: E,
        filter: &TransactionFilter,
    ) -> Result<i64, sqlx::Error> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM transactions");
        filter.push_where(&mut builder);

        builder.build_query_scalar::<i64>().fetch_one(executor).await
    }

    /// Newest first
    pub async fn list<'e, E: PgExecutor<'e>>(
        executor: E,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut builder = QueryBuilder::new("SELECT * FROM transactions");
        filter.push_where(&mut builder);
        builder
            .push(" ORDER BY transaction_date DESC, id LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        builder.build_query_as::<Self>().fetch_all(executor).await
    }
}
