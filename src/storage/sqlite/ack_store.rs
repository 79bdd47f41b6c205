//! SQLite AckStore implementation.

use async_trait::async_trait;
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{decode_optional_time, decode_time, encode_time};
use crate::model::{DeliveryTask, Sequence, TaskCounts, TaskState};
use crate::storage::schema::DeliveryTasks;
use crate::storage::{AckStore, Expected, Result, StorageError, UpsertOutcome};

/// SQLite implementation of AckStore.
///
/// Compare-and-swap is a conditional
/// `UPDATE ... WHERE state = expected AND attempt = expected`;
/// SQLite serializes writers so at most one caller sees a changed row.
pub struct SqliteAckStore {
    pool: SqlitePool,
}

impl SqliteAckStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn select() -> sea_query::SelectStatement {
        Query::select()
            .columns([
                DeliveryTasks::EventId,
                DeliveryTasks::PlayerId,
                DeliveryTasks::State,
                DeliveryTasks::Attempt,
                DeliveryTasks::CreatedAt,
                DeliveryTasks::UpdatedAt,
                DeliveryTasks::NextAttemptAt,
                DeliveryTasks::DeliveredAt,
                DeliveryTasks::LastError,
            ])
            .from(DeliveryTasks::Table)
            .to_owned()
    }

    fn decode_row(row: &SqliteRow) -> Result<DeliveryTask> {
        let event_id: i64 = row.get("event_id");
        let state: String = row.get("state");
        let attempt: i64 = row.get("attempt");
        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");

        Ok(DeliveryTask {
            event_id: event_id as Sequence,
            player_id: row.get("player_id"),
            attempt: attempt as u32,
            state: state.parse().map_err(StorageError::Corrupt)?,
            created_at: decode_time(&created_at)?,
            updated_at: decode_time(&updated_at)?,
            next_attempt_at: decode_optional_time(row.get("next_attempt_at"))?,
            delivered_at: decode_optional_time(row.get("delivered_at"))?,
            last_error: row.get("last_error"),
        })
    }

    async fn insert(&self, task: DeliveryTask) -> Result<UpsertOutcome> {
        let query = Query::insert()
            .into_table(DeliveryTasks::Table)
            .columns([
                DeliveryTasks::EventId,
                DeliveryTasks::PlayerId,
                DeliveryTasks::State,
                DeliveryTasks::Attempt,
                DeliveryTasks::CreatedAt,
                DeliveryTasks::UpdatedAt,
                DeliveryTasks::NextAttemptAt,
                DeliveryTasks::DeliveredAt,
                DeliveryTasks::LastError,
            ])
            .values_panic([
                (task.event_id as i64).into(),
                task.player_id.into(),
                task.state.as_str().into(),
                i64::from(task.attempt).into(),
                encode_time(task.created_at).into(),
                encode_time(task.updated_at).into(),
                task.next_attempt_at.map(encode_time).into(),
                task.delivered_at.map(encode_time).into(),
                task.last_error.into(),
            ])
            .on_conflict(
                OnConflict::columns([DeliveryTasks::EventId, DeliveryTasks::PlayerId])
                    .do_nothing()
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            Ok(UpsertOutcome::Duplicate)
        } else {
            Ok(UpsertOutcome::Applied)
        }
    }

    async fn swap(&self, task: DeliveryTask, expected: Expected) -> Result<UpsertOutcome> {
        let event_id = task.event_id;
        let player_id = task.player_id.clone();

        let query = Query::update()
            .table(DeliveryTasks::Table)
            .value(DeliveryTasks::State, task.state.as_str())
            .value(DeliveryTasks::Attempt, i64::from(task.attempt))
            .value(DeliveryTasks::UpdatedAt, encode_time(task.updated_at))
            .value(DeliveryTasks::NextAttemptAt, task.next_attempt_at.map(encode_time))
            .value(DeliveryTasks::DeliveredAt, task.delivered_at.map(encode_time))
            .value(DeliveryTasks::LastError, task.last_error)
            .and_where(Expr::col(DeliveryTasks::EventId).eq(event_id as i64))
            .and_where(Expr::col(DeliveryTasks::PlayerId).eq(player_id.as_str()))
            .and_where(Expr::col(DeliveryTasks::State).eq(expected.state.as_str()))
            .and_where(Expr::col(DeliveryTasks::Attempt).eq(i64::from(expected.attempt)))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() > 0 {
            return Ok(UpsertOutcome::Applied);
        }

        let actual = self.get(event_id, &player_id).await?.map(|t| t.state);
        Ok(UpsertOutcome::Conflict { actual })
    }
}

#[async_trait]
impl AckStore for SqliteAckStore {
    async fn upsert(&self, task: DeliveryTask, expected: Option<Expected>) -> Result<UpsertOutcome> {
        match expected {
            None => self.insert(task).await,
            Some(expected) => self.swap(task, expected).await,
        }
    }

    async fn get(&self, event_id: Sequence, player_id: &str) -> Result<Option<DeliveryTask>> {
        let query = Self::select()
            .and_where(Expr::col(DeliveryTasks::EventId).eq(event_id as i64))
            .and_where(Expr::col(DeliveryTasks::PlayerId).eq(player_id))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::decode_row).transpose()
    }

    async fn list_by_state(&self, state: TaskState) -> Result<Vec<DeliveryTask>> {
        let query = Self::select()
            .and_where(Expr::col(DeliveryTasks::State).eq(state.as_str()))
            .order_by(DeliveryTasks::EventId, Order::Asc)
            .order_by(DeliveryTasks::PlayerId, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Self::decode_row).collect()
    }

    async fn list_for_event(&self, event_id: Sequence) -> Result<Vec<DeliveryTask>> {
        let query = Self::select()
            .and_where(Expr::col(DeliveryTasks::EventId).eq(event_id as i64))
            .order_by(DeliveryTasks::PlayerId, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Self::decode_row).collect()
    }

    async fn counts(&self) -> Result<TaskCounts> {
        let query = Query::select()
            .columns([DeliveryTasks::State, DeliveryTasks::Attempt])
            .from(DeliveryTasks::Table)
            .and_where(Expr::col(DeliveryTasks::State).ne(TaskState::Delivered.as_str()))
            .to_string(SqliteQueryBuilder);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut counts = TaskCounts::default();
        for row in rows {
            let state: String = row.get("state");
            let attempt: i64 = row.get("attempt");
            match state.parse::<TaskState>().map_err(StorageError::Corrupt)? {
                TaskState::Pending => {
                    counts.pending += 1;
                    if attempt > 0 {
                        counts.retrying += 1;
                    }
                }
                TaskState::InFlight => counts.in_flight += 1,
                TaskState::Abandoned => counts.abandoned += 1,
                TaskState::Delivered => {}
            }
        }

        let query = Query::select()
            .expr(Expr::col(DeliveryTasks::EventId).count())
            .from(DeliveryTasks::Table)
            .and_where(Expr::col(DeliveryTasks::State).eq(TaskState::Delivered.as_str()))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        let delivered: i64 = row.get(0);
        counts.delivered = delivered as usize;

        Ok(counts)
    }
}
