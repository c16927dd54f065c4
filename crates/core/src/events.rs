use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::chain::{ChainId, TenantId};
use crate::domain::execution::{ApprovalExecution, ExecutionId};

pub const EXECUTION_CREATED: &str = "execution.created";
pub const STEP_RESPONDED: &str = "execution.step_responded";
pub const STEP_ESCALATED: &str = "execution.step_escalated";
pub const EXECUTION_COMPLETED: &str = "execution.completed";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub event_id: String,
    pub execution_id: ExecutionId,
    pub chain_id: ChainId,
    pub tenant_id: TenantId,
    pub event_type: String,
    pub outcome: String,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl EngineEvent {
    pub fn for_execution(
        execution: &ApprovalExecution,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            execution_id: execution.id.clone(),
            chain_id: execution.chain_id.clone(),
            tenant_id: execution.tenant_id.clone(),
            event_type: event_type.into(),
            outcome: execution.status.as_str().to_string(),
            metadata: BTreeMap::new(),
            occurred_at,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Receives engine notifications. Delivery is fire-and-forget.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl InMemoryEventSink {
    pub fn events(&self) -> Vec<EngineEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events().into_iter().map(|event| event.event_type).collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn emit(&self, event: EngineEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: EngineEvent) {
        tracing::info!(
            event_name = %event.event_type,
            event_id = %event.event_id,
            execution_id = %event.execution_id.0,
            chain_id = %event.chain_id.0,
            tenant_id = %event.tenant_id.0,
            outcome = %event.outcome,
            metadata = ?event.metadata,
            "approval engine event"
        );
    }
}
