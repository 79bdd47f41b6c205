//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::{ColumnDef, Index, SqliteQueryBuilder, Table};
use sqlx::SqlitePool;
use tracing::info;

use super::Result;

/// Event log table, keyed by sequence number.
#[derive(sea_query::Iden)]
pub enum Events {
    Table,
    #[iden = "sequence"]
    Sequence,
    #[iden = "game_id"]
    GameId,
    #[iden = "payload"]
    Payload,
    #[iden = "tags"]
    Tags,
    #[iden = "created_at"]
    CreatedAt,
}

/// Subscriber registry table, keyed by player id.
#[derive(sea_query::Iden)]
pub enum Subscribers {
    Table,
    #[iden = "player_id"]
    PlayerId,
    #[iden = "filter"]
    Filter,
    #[iden = "endpoint"]
    Endpoint,
    #[iden = "active"]
    Active,
    #[iden = "registered_at"]
    RegisteredAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Delivery task table, keyed by (event_id, player_id).
#[derive(sea_query::Iden)]
pub enum DeliveryTasks {
    Table,
    #[iden = "event_id"]
    EventId,
    #[iden = "player_id"]
    PlayerId,
    #[iden = "state"]
    State,
    #[iden = "attempt"]
    Attempt,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
    #[iden = "next_attempt_at"]
    NextAttemptAt,
    #[iden = "delivered_at"]
    DeliveredAt,
    #[iden = "last_error"]
    LastError,
}

/// Named watermarks table.
#[derive(sea_query::Iden)]
pub enum Watermarks {
    Table,
    #[iden = "name"]
    Name,
    #[iden = "sequence"]
    Sequence,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Create all tables and indexes if they do not exist.
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    let statements = [
        Table::create()
            .table(Events::Table)
            .if_not_exists()
            .col(ColumnDef::new(Events::Sequence).integer().not_null().primary_key())
            .col(ColumnDef::new(Events::GameId).text().not_null())
            .col(ColumnDef::new(Events::Payload).blob().not_null())
            .col(ColumnDef::new(Events::Tags).text().not_null())
            .col(ColumnDef::new(Events::CreatedAt).text().not_null())
            .to_string(SqliteQueryBuilder),
        Table::create()
            .table(Subscribers::Table)
            .if_not_exists()
            .col(ColumnDef::new(Subscribers::PlayerId).text().not_null().primary_key())
            .col(ColumnDef::new(Subscribers::Filter).text().not_null())
            .col(ColumnDef::new(Subscribers::Endpoint).text().not_null())
            .col(ColumnDef::new(Subscribers::Active).integer().not_null())
            .col(ColumnDef::new(Subscribers::RegisteredAt).text().not_null())
            .col(ColumnDef::new(Subscribers::UpdatedAt).text().not_null())
            .to_string(SqliteQueryBuilder),
        Table::create()
            .table(DeliveryTasks::Table)
            .if_not_exists()
            .col(ColumnDef::new(DeliveryTasks::EventId).integer().not_null())
            .col(ColumnDef::new(DeliveryTasks::PlayerId).text().not_null())
            .col(ColumnDef::new(DeliveryTasks::State).text().not_null())
            .col(ColumnDef::new(DeliveryTasks::Attempt).integer().not_null())
            .col(ColumnDef::new(DeliveryTasks::CreatedAt).text().not_null())
            .col(ColumnDef::new(DeliveryTasks::UpdatedAt).text().not_null())
            .col(ColumnDef::new(DeliveryTasks::NextAttemptAt).text())
            .col(ColumnDef::new(DeliveryTasks::DeliveredAt).text())
            .col(ColumnDef::new(DeliveryTasks::LastError).text())
            .primary_key(
                Index::create()
                    .col(DeliveryTasks::EventId)
                    .col(DeliveryTasks::PlayerId),
            )
            .to_string(SqliteQueryBuilder),
        Index::create()
            .if_not_exists()
            .name("idx_delivery_tasks_state")
            .table(DeliveryTasks::Table)
            .col(DeliveryTasks::State)
            .to_string(SqliteQueryBuilder),
        Table::create()
            .table(Watermarks::Table)
            .if_not_exists()
            .col(ColumnDef::new(Watermarks::Name).text().not_null().primary_key())
            .col(ColumnDef::new(Watermarks::Sequence).integer().not_null())
            .col(ColumnDef::new(Watermarks::UpdatedAt).text().not_null())
            .to_string(SqliteQueryBuilder),
    ];

    for statement in statements {
        sqlx::query(&statement).execute(pool).await?;
    }

    info!("Notifier tables initialized (SQLite)");
    Ok(())
}
