use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use quorum_core::domain::chain::{
    AggregationMode, ApprovalChain, ApprovalType, ChainId, ChainStatus, ChainUsageStats, TenantId,
};
use quorum_core::errors::StoreError;
use quorum_core::service::ChainCatalog;

use super::usage::load_stats;
use super::{
    from_json, parse_decimal, parse_optional_decimal, parse_timestamp, to_json, ChainRepository,
    RepositoryError,
};
use crate::DbPool;

const CHAIN_COLUMNS: &str = "id, tenant_id, code, name, approval_type, mode, status,
    default_timeout_hours, max_timeout_hours, escalation_json, conditions_json, steps_json,
    created_at, updated_at";

pub struct SqlChainRepository {
    pool: DbPool,
}

impl SqlChainRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn with_usage(
        &self,
        chain: Option<ApprovalChain>,
    ) -> Result<Option<ApprovalChain>, RepositoryError> {
        match chain {
            Some(mut chain) => {
                chain.usage = load_stats(&self.pool, &chain.id).await?;
                Ok(Some(chain))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ChainRepository for SqlChainRepository {
    async fn find_by_id(&self, id: &ChainId) -> Result<Option<ApprovalChain>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {CHAIN_COLUMNS} FROM approval_chain WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        let chain = row.map(chain_from_row).transpose()?;
        self.with_usage(chain).await
    }

    async fn find_by_code(
        &self,
        tenant_id: &TenantId,
        code: &str,
    ) -> Result<Option<ApprovalChain>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CHAIN_COLUMNS} FROM approval_chain WHERE tenant_id = ? AND code = ?"
        ))
        .bind(&tenant_id.0)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        let chain = row.map(chain_from_row).transpose()?;
        self.with_usage(chain).await
    }

    async fn save(&self, chain: ApprovalChain) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval_chain (
                id,
                tenant_id,
                code,
                name,
                approval_type,
                mode,
                status,
                default_timeout_hours,
                max_timeout_hours,
                escalation_json,
                conditions_json,
                steps_json,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                code = excluded.code,
                name = excluded.name,
                approval_type = excluded.approval_type,
                mode = excluded.mode,
                status = excluded.status,
                default_timeout_hours = excluded.default_timeout_hours,
                max_timeout_hours = excluded.max_timeout_hours,
                escalation_json = excluded.escalation_json,
                conditions_json = excluded.conditions_json,
                steps_json = excluded.steps_json,
                updated_at = excluded.updated_at",
        )
        .bind(&chain.id.0)
        .bind(&chain.tenant_id.0)
        .bind(&chain.code)
        .bind(&chain.name)
        .bind(chain.approval_type.as_str())
        .bind(chain.mode.as_str())
        .bind(chain.status.as_str())
        .bind(chain.default_timeout_hours.to_string())
        .bind(chain.max_timeout_hours.map(|hours| hours.to_string()))
        .bind(to_json("escalation_json", &chain.escalation)?)
        .bind(to_json("conditions_json", &chain.conditions)?)
        .bind(to_json("steps_json", &chain.steps)?)
        .bind(chain.created_at.to_rfc3339())
        .bind(chain.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<ApprovalChain>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CHAIN_COLUMNS} FROM approval_chain
             WHERE tenant_id = ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(&tenant_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(chain_from_row).collect()
    }
}

#[async_trait]
impl ChainCatalog for SqlChainRepository {
    async fn find_chain(&self, id: &ChainId) -> Result<Option<ApprovalChain>, StoreError> {
        Ok(ChainRepository::find_by_id(self, id).await?)
    }

    async fn list_chains(
        &self,
        tenant_id: &TenantId,
        approval_type: &ApprovalType,
    ) -> Result<Vec<ApprovalChain>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CHAIN_COLUMNS} FROM approval_chain
             WHERE tenant_id = ? AND approval_type = ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(&tenant_id.0)
        .bind(approval_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(chain_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}

fn chain_from_row(row: SqliteRow) -> Result<ApprovalChain, RepositoryError> {
    let type_raw = row.try_get::<String, _>("approval_type")?;
    let approval_type = ApprovalType::parse(&type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown approval type `{type_raw}`")))?;

    let mode_raw = row.try_get::<String, _>("mode")?;
    let mode = AggregationMode::parse(&mode_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown aggregation mode `{mode_raw}`")))?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = ChainStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown chain status `{status_raw}`")))?;

    let default_timeout_raw = row.try_get::<String, _>("default_timeout_hours")?;

    Ok(ApprovalChain {
        id: ChainId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        approval_type,
        mode,
        steps: from_json("steps_json", &row.try_get::<String, _>("steps_json")?)?,
        default_timeout_hours: parse_decimal("default_timeout_hours", &default_timeout_raw)?,
        max_timeout_hours: parse_optional_decimal(
            "max_timeout_hours",
            row.try_get("max_timeout_hours")?,
        )?,
        escalation: from_json("escalation_json", &row.try_get::<String, _>("escalation_json")?)?,
        conditions: from_json("conditions_json", &row.try_get::<String, _>("conditions_json")?)?,
        status,
        usage: ChainUsageStats::default(),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
