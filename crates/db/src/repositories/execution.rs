use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use quorum_core::domain::chain::{AggregationMode, ChainId, TenantId};
use quorum_core::domain::execution::{
    ApprovalExecution, ExecutionId, ExecutionStatus, ExecutionTransition, TransitionId,
    TransitionReason,
};
use quorum_core::domain::request::RequestId;
use quorum_core::errors::StoreError;
use quorum_core::service::ExecutionStore;

use super::{
    from_json, parse_optional_decimal, parse_optional_timestamp, parse_timestamp, parse_u32,
    to_json, RepositoryError,
};
use crate::DbPool;

const EXECUTION_COLUMNS: &str = "id, chain_id, request_id, tenant_id, mode, escalation_json,
    current_step_order, status, started_at, completed_at, total_hours, state_version, steps_json";

pub struct SqlExecutionRepository {
    pool: DbPool,
}

impl SqlExecutionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<ApprovalExecution>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM approval_execution WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(execution_from_row).transpose()
    }

    /// Upserts an execution. A row already at or beyond `state_version` is never overwritten.
    pub async fn save(&self, execution: &ApprovalExecution) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO approval_execution (
                id,
                chain_id,
                request_id,
                tenant_id,
                mode,
                escalation_json,
                current_step_order,
                status,
                started_at,
                completed_at,
                total_hours,
                state_version,
                steps_json
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                current_step_order = excluded.current_step_order,
                status = excluded.status,
                completed_at = excluded.completed_at,
                total_hours = excluded.total_hours,
                state_version = excluded.state_version,
                steps_json = excluded.steps_json
             WHERE approval_execution.state_version < excluded.state_version",
        )
        .bind(&execution.id.0)
        .bind(&execution.chain_id.0)
        .bind(&execution.request_id.0)
        .bind(&execution.tenant_id.0)
        .bind(execution.mode.as_str())
        .bind(to_json("escalation_json", &execution.escalation)?)
        .bind(execution.current_step_order.map(i64::from))
        .bind(execution.status.as_str())
        .bind(execution.started_at.to_rfc3339())
        .bind(execution.completed_at.map(|timestamp| timestamp.to_rfc3339()))
        .bind(execution.total_hours.map(|hours| hours.to_string()))
        .bind(i64::from(execution.state_version))
        .bind(to_json("steps_json", &execution.steps)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "execution `{}` is already at or beyond version {}",
                execution.id.0, execution.state_version
            )));
        }
        Ok(())
    }

    pub async fn list_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<ApprovalExecution>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM approval_execution
             WHERE status = ?
             ORDER BY started_at ASC, id ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(execution_from_row).collect()
    }

    pub async fn append(&self, transition: &ExecutionTransition) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO execution_transition (
                id,
                execution_id,
                chain_id,
                step_order,
                from_status,
                to_status,
                reason,
                actor_id,
                state_version,
                occurred_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&transition.id.0)
        .bind(&transition.execution_id.0)
        .bind(&transition.chain_id.0)
        .bind(transition.step_order.map(i64::from))
        .bind(transition.from_status.as_ref().map(ExecutionStatus::as_str))
        .bind(transition.to_status.as_str())
        .bind(transition.reason.as_str())
        .bind(&transition.actor_id)
        .bind(i64::from(transition.state_version))
        .bind(transition.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn transitions_for(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<ExecutionTransition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                execution_id,
                chain_id,
                step_order,
                from_status,
                to_status,
                reason,
                actor_id,
                state_version,
                occurred_at
             FROM execution_transition
             WHERE execution_id = ?
             ORDER BY state_version ASC, occurred_at ASC",
        )
        .bind(&execution_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(transition_from_row).collect()
    }
}

#[async_trait]
impl ExecutionStore for SqlExecutionRepository {
    async fn find_execution(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<ApprovalExecution>, StoreError> {
        Ok(self.find_by_id(id).await?)
    }

    async fn save_execution(&self, execution: ApprovalExecution) -> Result<(), StoreError> {
        Ok(self.save(&execution).await?)
    }

    async fn append_transition(&self, transition: ExecutionTransition) -> Result<(), StoreError> {
        Ok(self.append(&transition).await?)
    }

    async fn list_transitions(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<ExecutionTransition>, StoreError> {
        Ok(self.transitions_for(execution_id).await?)
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalExecution>, StoreError> {
        Ok(self.list_by_status(ExecutionStatus::Pending).await?)
    }
}

fn parse_status(column: &str, value: &str) -> Result<ExecutionStatus, RepositoryError> {
    ExecutionStatus::parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown status in `{column}`: `{value}`")))
}

fn parse_reason(value: &str) -> Result<TransitionReason, RepositoryError> {
    match value {
        "created" => Ok(TransitionReason::Created),
        "step_approved" => Ok(TransitionReason::StepApproved),
        "step_rejected" => Ok(TransitionReason::StepRejected),
        "step_escalated" => Ok(TransitionReason::StepEscalated),
        "step_timed_out" => Ok(TransitionReason::StepTimedOut),
        other => Err(RepositoryError::Decode(format!("unknown transition reason `{other}`"))),
    }
}

fn execution_from_row(row: SqliteRow) -> Result<ApprovalExecution, RepositoryError> {
    let mode_raw = row.try_get::<String, _>("mode")?;
    let mode = AggregationMode::parse(&mode_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown aggregation mode `{mode_raw}`")))?;

    Ok(ApprovalExecution {
        id: ExecutionId(row.try_get("id")?),
        chain_id: ChainId(row.try_get("chain_id")?),
        request_id: RequestId(row.try_get("request_id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        mode,
        escalation: from_json("escalation_json", &row.try_get::<String, _>("escalation_json")?)?,
        current_step_order: row
            .try_get::<Option<i64>, _>("current_step_order")?
            .map(|order| parse_u32("current_step_order", order))
            .transpose()?,
        status: parse_status("status", &row.try_get::<String, _>("status")?)?,
        started_at: parse_timestamp("started_at", row.try_get("started_at")?)?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        total_hours: parse_optional_decimal("total_hours", row.try_get("total_hours")?)?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        steps: from_json("steps_json", &row.try_get::<String, _>("steps_json")?)?,
    })
}

fn transition_from_row(row: SqliteRow) -> Result<ExecutionTransition, RepositoryError> {
    let from_status = row
        .try_get::<Option<String>, _>("from_status")?
        .map(|value| parse_status("from_status", &value))
        .transpose()?;

    Ok(ExecutionTransition {
        id: TransitionId(row.try_get("id")?),
        execution_id: ExecutionId(row.try_get("execution_id")?),
        chain_id: ChainId(row.try_get("chain_id")?),
        step_order: row
            .try_get::<Option<i64>, _>("step_order")?
            .map(|order| parse_u32("step_order", order))
            .transpose()?,
        from_status,
        to_status: parse_status("to_status", &row.try_get::<String, _>("to_status")?)?,
        reason: parse_reason(&row.try_get::<String, _>("reason")?)?,
        actor_id: row.try_get("actor_id")?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}
