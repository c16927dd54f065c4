use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use quorum_core::config::{AppConfig, LoadOptions};
use quorum_core::domain::chain::{ApprovalType, TenantId};
use quorum_core::domain::request::{ApprovalRequest, RequestContext, RequestId};
use quorum_core::engine::ExecutionEngine;
use quorum_core::service::ApprovalService;
use quorum_db::{
    connect_with_config, migrations, DbPool, SqlChainRepository, SqlExecutionRepository,
    SqlUsageRepository,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::runtime::Runtime;
use tracing::debug;

use super::CommandError;

/// Loads configuration and builds the single-threaded runtime every command runs on.
pub(crate) fn prepare(options: &LoadOptions) -> Result<(AppConfig, Runtime), CommandError> {
    let config = AppConfig::load(options.clone()).map_err(|error| {
        CommandError::new("config_validation", format!("configuration issue: {error}"), 2)
    })?;
    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
            CommandError::new(
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            )
        })?;
    Ok((config, runtime))
}

/// Connects to the configured database and applies pending migrations.
pub(crate) async fn open_pool(config: &AppConfig) -> Result<DbPool, CommandError> {
    let pool = connect_with_config(&config.database)
        .await
        .map_err(|error| CommandError::new("db_connectivity", error.to_string(), 4))?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| CommandError::new("migration", error.to_string(), 5))?;
    debug!(event_name = "cli.database.ready", "database connected and migrated");
    Ok(pool)
}

pub(crate) fn approval_service(config: &AppConfig, pool: &DbPool) -> ApprovalService {
    ApprovalService::new(
        ExecutionEngine::with_config(config.engine.engine_config()),
        Arc::new(SqlChainRepository::new(pool.clone())),
        Arc::new(SqlExecutionRepository::new(pool.clone())),
        Arc::new(SqlUsageRepository::new(pool.clone())),
    )
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read `{}`", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("could not parse `{}`", path.display()))
}

/// Request file accepted by `start` and `preview`.
///
/// `id`, `tenant_id` and `submitted_at` are optional; they default to a fresh
/// id, the configured tenant and the current time.
#[derive(Debug, Deserialize)]
struct RequestInput {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    tenant_id: Option<TenantId>,
    approval_type: ApprovalType,
    requester_id: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    context: RequestContext,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
}

impl RequestInput {
    fn into_request(self, default_tenant: &str, now: DateTime<Utc>) -> ApprovalRequest {
        ApprovalRequest {
            id: self.id.unwrap_or_else(|| RequestId(format!("req-{}", uuid::Uuid::new_v4()))),
            tenant_id: self.tenant_id.unwrap_or_else(|| TenantId(default_tenant.to_string())),
            approval_type: self.approval_type,
            requester_id: self.requester_id,
            payload: self.payload,
            context: self.context,
            submitted_at: self.submitted_at.unwrap_or(now),
        }
    }
}

pub(crate) fn read_request(path: &Path, config: &AppConfig) -> anyhow::Result<ApprovalRequest> {
    let input: RequestInput = read_json(path)?;
    Ok(input.into_request(&config.engine.default_tenant, Utc::now()))
}
