//! SQLite SubscriberStore implementation.

use async_trait::async_trait;
use chrono::Utc;
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{decode_time, encode_time};
use crate::model::Subscriber;
use crate::storage::schema::Subscribers;
use crate::storage::{Result, SubscriberStore};

/// SQLite implementation of SubscriberStore.
pub struct SqliteSubscriberStore {
    pool: SqlitePool,
}

impl SqliteSubscriberStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn select() -> sea_query::SelectStatement {
        Query::select()
            .columns([
                Subscribers::PlayerId,
                Subscribers::Filter,
                Subscribers::Endpoint,
                Subscribers::Active,
                Subscribers::RegisteredAt,
                Subscribers::UpdatedAt,
            ])
            .from(Subscribers::Table)
            .to_owned()
    }

    fn decode_row(row: &SqliteRow) -> Result<Subscriber> {
        let filter: String = row.get("filter");
        let active: i64 = row.get("active");
        let registered_at: String = row.get("registered_at");
        let updated_at: String = row.get("updated_at");

        Ok(Subscriber {
            player_id: row.get("player_id"),
            filter: serde_json::from_str(&filter)?,
            endpoint: row.get("endpoint"),
            active: active != 0,
            registered_at: decode_time(&registered_at)?,
            updated_at: decode_time(&updated_at)?,
        })
    }
}

#[async_trait]
impl SubscriberStore for SqliteSubscriberStore {
    async fn upsert(&self, subscriber: Subscriber) -> Result<()> {
        let filter = serde_json::to_string(&subscriber.filter)?;

        let query = Query::insert()
            .into_table(Subscribers::Table)
            .columns([
                Subscribers::PlayerId,
                Subscribers::Filter,
                Subscribers::Endpoint,
                Subscribers::Active,
                Subscribers::RegisteredAt,
                Subscribers::UpdatedAt,
            ])
            .values_panic([
                subscriber.player_id.into(),
                filter.into(),
                subscriber.endpoint.into(),
                i64::from(subscriber.active).into(),
                encode_time(subscriber.registered_at).into(),
                encode_time(subscriber.updated_at).into(),
            ])
            .on_conflict(
                OnConflict::column(Subscribers::PlayerId)
                    .update_columns([
                        Subscribers::Filter,
                        Subscribers::Endpoint,
                        Subscribers::Active,
                        Subscribers::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn get(&self, player_id: &str) -> Result<Option<Subscriber>> {
        let query = Self::select()
            .and_where(Expr::col(Subscribers::PlayerId).eq(player_id))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::decode_row).transpose()
    }

    async fn set_active(&self, player_id: &str, active: bool) -> Result<bool> {
        let query = Query::update()
            .table(Subscribers::Table)
            .value(Subscribers::Active, i64::from(active))
            .value(Subscribers::UpdatedAt, encode_time(Utc::now()))
            .and_where(Expr::col(Subscribers::PlayerId).eq(player_id))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, active_only: bool) -> Result<Vec<Subscriber>> {
        // SelectStatement is not Send; render it before awaiting.
        let query = {
            let mut select = Self::select();
            if active_only {
                select.and_where(Expr::col(Subscribers::Active).eq(1));
            }
            select
                .order_by(Subscribers::PlayerId, Order::Asc)
                .to_string(SqliteQueryBuilder)
        };

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Self::decode_row).collect()
    }
}
