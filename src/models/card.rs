use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

use super::page::PageRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "card_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardStatus {
    Active,
    Blocked,
    Expired,
    PendingBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Card {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub encrypted_number: String, // Never the plaintext
    pub owner: String,            // Name printed on the card
    pub expiry_date: NaiveDate,
    pub status: CardStatus,
    pub balance: Decimal,
    pub owner_user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// Past expiry date, whatever the stored status says.
    pub fn is_expired_on(&self, today: NaiveDate) -> bool {
        self.expiry_date < today
    }

    /// True when the stored status still needs the lazy EXPIRED transition.
    pub fn needs_expiry(&self, today: NaiveDate) -> bool {
        self.is_expired_on(today) && self.status != CardStatus::Expired
    }
}

#[derive(Debug, Clone)]
pub struct NewCard {
    pub encrypted_number: String,
    pub owner: String,
    pub expiry_date: NaiveDate,
    pub balance: Decimal,
    pub owner_user_id: Uuid,
}

#[derive(Debug, Clone, Default)]
pub struct CardFilter {
    pub owner_user_id: Option<Uuid>,
    pub status: Option<CardStatus>,
    pub owner_name_contains: Option<String>,
}

impl CardFilter {
    pub fn matches(&self, card: &Card) -> bool {
        self.owner_user_id.map_or(true, |id| card.owner_user_id == id)
            && self.status.map_or(true, |s| card.status == s)
            && self.owner_name_contains.as_ref().map_or(true, |needle| {
                card.owner.to_lowercase().contains(&needle.to_lowercase())
            })
    }

    fn push_where(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        builder.push(" WHERE TRUE");
        if let Some(owner_user_id) = self.owner_user_id {
            builder.push(" AND owner_user_id = ").push_bind(owner_user_id);
        }
        if let Some(status) = self.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(needle) = &self.owner_name_contains {
            builder
                .push(" AND owner ILIKE ")
                .push_bind(format!("%{}%", escape_like(needle)));
        }
    }
}

fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

impl Card {
    /// Inserts a new card with status ACTIVE
    pub async fn insert<'e, E: PgExecutor<'e>>(
        executor: E,
        data: &NewCard,
    ) -> Result<Self, sqlx::Error> {
        let card = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO cards (encrypted_number, owner, expiry_date, status, balance, owner_user_id)
            VALUES ($1, $2, $3, 'ACTIVE', $4, $5)
            RETURNING *
            "#,
        )
        .bind(&data.encrypted_number)
        .bind(&data.owner)
        .bind(data.expiry_date)
        .bind(data.balance)
        .bind(data.owner_user_id)
        .fetch_one(executor)
        .await?;

        Ok(card)
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM cards WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_encrypted_number<'e, E: PgExecutor<'e>>(
        executor: E,
        encrypted_number: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM cards WHERE encrypted_number = $1")
            .bind(encrypted_number)
            .fetch_optional(executor)
            .await
    }

    /// Row-locks a card for the rest of the enclosing transaction
    pub async fn lock<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM cards WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Writes back the mutable part of a card (status and balance)
    pub async fn save_state<'e, E: PgExecutor<'e>>(
        executor: E,
        card: &Card,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE cards
            SET status = $2, balance = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(card.id)
        .bind(card.status)
        .bind(card.balance)
        .fetch_one(executor)
        .await
    }

    pub async fn delete<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM cards WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

        Ok(())
    }

    /// Marks every card past its expiry date as EXPIRED; returns the number of rows changed
    pub async fn expire_all<'e, E: PgExecutor<'e>>(
        executor: E,
        today: NaiveDate,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE cards
            SET status = 'EXPIRED', updated_at = NOW()
            WHERE expiry_date < $1 AND status <> 'EXPIRED'
            "#,
        )
        .bind(today)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn count<'e, E: PgExecutor<'e>>(
        executor: E,
        filter: &CardFilter,
    ) -> Result<i64, sqlx::Error> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM cards");
        filter.push_where(&mut builder);

        builder.build_query_scalar::<i64>().fetch_one(executor).await
    }

    pub async fn list<'e, E: PgExecutor<'e>>(
        executor: E,
        filter: &CardFilter,
        page: PageRequest,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut builder = QueryBuilder::new("SELECT * FROM cards");
        filter.push_where(&mut builder);
        builder
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        builder.build_query_as::<Self>().fetch_all(executor).await
    }
}
