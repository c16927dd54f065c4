//! Chain usage statistics derived from an append-only event log.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::domain::chain::{ChainId, ChainUsageStats};
use crate::domain::execution::{ExecutionId, ExecutionStatus};
use crate::errors::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UsageEvent {
    Completed { status: ExecutionStatus, processing_hours: Decimal },
    Escalated { step_order: u32 },
}

impl UsageEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Escalated { .. } => "escalated",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub chain_id: ChainId,
    pub execution_id: ExecutionId,
    pub event: UsageEvent,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait UsageLog: Send + Sync {
    async fn append(&self, record: UsageRecord) -> Result<(), StoreError>;
    async fn stats(&self, chain_id: &ChainId) -> Result<ChainUsageStats, StoreError>;
}

pub fn aggregate_usage<'a>(events: impl IntoIterator<Item = &'a UsageEvent>) -> ChainUsageStats {
    let mut stats = ChainUsageStats::default();
    let mut total_hours = Decimal::ZERO;

    for event in events {
        match event {
            UsageEvent::Completed { status, processing_hours } => {
                stats.usage_count += 1;
                total_hours += *processing_hours;
                match status {
                    ExecutionStatus::Approved => stats.approved_count += 1,
                    ExecutionStatus::Rejected => stats.rejected_count += 1,
                    ExecutionStatus::Timeout | ExecutionStatus::Escalated => {
                        stats.timeout_count += 1
                    }
                    ExecutionStatus::Pending => {}
                }
            }
            UsageEvent::Escalated { .. } => stats.escalation_count += 1,
        }
    }

    if stats.usage_count > 0 {
        stats.average_processing_hours =
            Some((total_hours / Decimal::from(stats.usage_count)).round_dp(2));
    }
    stats
}

#[derive(Default)]
pub struct InMemoryUsageLog {
    records: RwLock<HashMap<String, Vec<UsageRecord>>>,
}

impl InMemoryUsageLog {
    pub async fn records(&self, chain_id: &ChainId) -> Vec<UsageRecord> {
        self.records.read().await.get(&chain_id.0).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl UsageLog for InMemoryUsageLog {
    async fn append(&self, record: UsageRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.entry(record.chain_id.0.clone()).or_default().push(record);
        Ok(())
    }

    async fn stats(&self, chain_id: &ChainId) -> Result<ChainUsageStats, StoreError> {
        let records = self.records.read().await;
        let events = records.get(&chain_id.0).into_iter().flatten().map(|record| &record.event);
        Ok(aggregate_usage(events))
    }
}
