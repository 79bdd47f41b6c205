//! SQLite EventLog implementation.

use async_trait::async_trait;
use chrono::Utc;
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{decode_time, encode_time};
use crate::model::{Event, NewEvent, Sequence};
use crate::storage::schema::Events;
use crate::storage::{EventLog, Result};

/// SQLite implementation of EventLog.
pub struct SqliteEventLog {
    pool: SqlitePool,
}

impl SqliteEventLog {
    /// Create a new SQLite event log. Tables must already exist.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Assign the next sequence and insert, within an already-started transaction.
    async fn insert_event(conn: &mut SqliteConnection, event: NewEvent) -> Result<Event> {
        let query = Query::select()
            .expr(Expr::col(Events::Sequence).max())
            .from(Events::Table)
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_one(&mut *conn).await?;
        let max_seq: Option<i64> = row.get(0);
        let sequence = max_seq.map(|s| s as Sequence + 1).unwrap_or(1);

        let event = event.into_event(sequence, Utc::now());
        let tags = serde_json::to_string(&event.tags)?;

        let query = Query::insert()
            .into_table(Events::Table)
            .columns([
                Events::Sequence,
                Events::GameId,
                Events::Payload,
                Events::Tags,
                Events::CreatedAt,
            ])
            .values_panic([
                (event.id as i64).into(),
                event.game_id.clone().into(),
                event.payload.to_vec().into(),
                tags.into(),
                encode_time(event.created_at).into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(event)
    }

    fn decode_row(row: &SqliteRow) -> Result<Event> {
        let sequence: i64 = row.get("sequence");
        let payload: Vec<u8> = row.get("payload");
        let tags: String = row.get("tags");
        let created_at: String = row.get("created_at");

        Ok(Event {
            id: sequence as Sequence,
            game_id: row.get("game_id"),
            payload: payload.into(),
            tags: serde_json::from_str(&tags)?,
            created_at: decode_time(&created_at)?,
        })
    }
}

#[async_trait]
impl EventLog for SqliteEventLog {
    async fn append(&self, event: NewEvent) -> Result<Event> {
        // BEGIN IMMEDIATE acquires the write lock upfront, so the MAX+1 read
        // and the insert are one atomic step across concurrent appenders.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        match Self::insert_event(&mut conn, event).await {
            Ok(event) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(event)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn read_page(&self, from: Sequence, until: Sequence, limit: usize) -> Result<Vec<Event>> {
        let query = Query::select()
            .columns([
                Events::Sequence,
                Events::GameId,
                Events::Payload,
                Events::Tags,
                Events::CreatedAt,
            ])
            .from(Events::Table)
            .and_where(Expr::col(Events::Sequence).gte(from as i64))
            .and_where(Expr::col(Events::Sequence).lte(until as i64))
            .order_by(Events::Sequence, Order::Asc)
            .limit(limit as u64)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Self::decode_row).collect()
    }

    async fn get(&self, id: Sequence) -> Result<Option<Event>> {
        let query = Query::select()
            .columns([
                Events::Sequence,
                Events::GameId,
                Events::Payload,
                Events::Tags,
                Events::CreatedAt,
            ])
            .from(Events::Table)
            .and_where(Expr::col(Events::Sequence).eq(id as i64))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::decode_row).transpose()
    }

    async fn head(&self) -> Result<Sequence> {
        let query = Query::select()
            .expr(Expr::col(Events::Sequence).max())
            .from(Events::Table)
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        let max_seq: Option<i64> = row.get(0);
        Ok(max_seq.unwrap_or(0) as Sequence)
    }
}
