use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use quorum_core::domain::chain::{ChainId, ChainUsageStats};
use quorum_core::domain::execution::{ExecutionId, ExecutionStatus};
use quorum_core::errors::StoreError;
use quorum_core::usage::{aggregate_usage, UsageEvent, UsageLog, UsageRecord};

use super::{parse_decimal, parse_timestamp, parse_u32, RepositoryError};
use crate::DbPool;

/// Append-only usage log. Stats are recomputed from the log on every read.
pub struct SqlUsageRepository {
    pool: DbPool,
}

impl SqlUsageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn records_for(
        &self,
        chain_id: &ChainId,
    ) -> Result<Vec<UsageRecord>, RepositoryError> {
        load_records(&self.pool, chain_id).await
    }
}

pub(crate) async fn load_records(
    pool: &DbPool,
    chain_id: &ChainId,
) -> Result<Vec<UsageRecord>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT chain_id, execution_id, kind, status, processing_hours, step_order, recorded_at
         FROM chain_usage_event
         WHERE chain_id = ?
         ORDER BY id ASC",
    )
    .bind(&chain_id.0)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(record_from_row).collect()
}

pub(crate) async fn load_stats(
    pool: &DbPool,
    chain_id: &ChainId,
) -> Result<ChainUsageStats, RepositoryError> {
    let records = load_records(pool, chain_id).await?;
    Ok(aggregate_usage(records.iter().map(|record| &record.event)))
}

#[async_trait]
impl UsageLog for SqlUsageRepository {
    async fn append(&self, record: UsageRecord) -> Result<(), StoreError> {
        let (status, processing_hours, step_order) = match &record.event {
            UsageEvent::Completed { status, processing_hours } => {
                (Some(status.as_str()), Some(processing_hours.to_string()), None)
            }
            UsageEvent::Escalated { step_order } => (None, None, Some(i64::from(*step_order))),
        };

        sqlx::query(
            "INSERT INTO chain_usage_event (
                chain_id,
                execution_id,
                kind,
                status,
                processing_hours,
                step_order,
                recorded_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.chain_id.0)
        .bind(&record.execution_id.0)
        .bind(record.event.kind())
        .bind(status)
        .bind(processing_hours)
        .bind(step_order)
        .bind(record.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn stats(&self, chain_id: &ChainId) -> Result<ChainUsageStats, StoreError> {
        Ok(load_stats(&self.pool, chain_id).await?)
    }
}

fn record_from_row(row: SqliteRow) -> Result<UsageRecord, RepositoryError> {
    let kind = row.try_get::<String, _>("kind")?;
    let event = match kind.as_str() {
        "completed" => {
            let status_raw = row.try_get::<Option<String>, _>("status")?.unwrap_or_default();
            let status = ExecutionStatus::parse(&status_raw).ok_or_else(|| {
                RepositoryError::Decode(format!("unknown completion status `{status_raw}`"))
            })?;
            let hours_raw =
                row.try_get::<Option<String>, _>("processing_hours")?.unwrap_or_default();
            UsageEvent::Completed {
                status,
                processing_hours: parse_decimal("processing_hours", &hours_raw)?,
            }
        }
        "escalated" => {
            let order = row.try_get::<Option<i64>, _>("step_order")?.ok_or_else(|| {
                RepositoryError::Decode("escalated usage event without step_order".to_string())
            })?;
            UsageEvent::Escalated { step_order: parse_u32("step_order", order)? }
        }
        other => return Err(RepositoryError::Decode(format!("unknown usage kind `{other}`"))),
    };

    Ok(UsageRecord {
        chain_id: ChainId(row.try_get("chain_id")?),
        execution_id: ExecutionId(row.try_get("execution_id")?),
        event,
        recorded_at: parse_timestamp("recorded_at", row.try_get("recorded_at")?)?,
    })
}
