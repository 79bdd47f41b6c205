//! SQLite WatermarkStore implementation.

use async_trait::async_trait;
use chrono::Utc;
use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};

use super::encode_time;
use crate::model::Sequence;
use crate::storage::schema::Watermarks;
use crate::storage::{Result, WatermarkStore};

/// SQLite implementation of WatermarkStore.
pub struct SqliteWatermarkStore {
    pool: SqlitePool,
}

impl SqliteWatermarkStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WatermarkStore for SqliteWatermarkStore {
    async fn get(&self, name: &str) -> Result<Option<Sequence>> {
        let query = Query::select()
            .column(Watermarks::Sequence)
            .from(Watermarks::Table)
            .and_where(Expr::col(Watermarks::Name).eq(name))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;

        match row {
            Some(row) => {
                let sequence: i64 = row.get("sequence");
                Ok(Some(sequence as Sequence))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, name: &str, sequence: Sequence) -> Result<()> {
        let query = Query::insert()
            .into_table(Watermarks::Table)
            .columns([Watermarks::Name, Watermarks::Sequence, Watermarks::UpdatedAt])
            .values_panic([
                name.into(),
                (sequence as i64).into(),
                encode_time(Utc::now()).into(),
            ])
            .on_conflict(
                OnConflict::column(Watermarks::Name)
                    .update_columns([Watermarks::Sequence, Watermarks::UpdatedAt])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}
