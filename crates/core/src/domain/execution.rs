use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::chain::{
    AggregationMode, ApproverDesignation, ChainId, EscalationPolicy, StepId, TenantId,
};
use crate::domain::request::RequestId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
    Escalated,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "timeout" => Some(Self::Timeout),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
    Skipped,
    Timeout,
    Escalated,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
            Self::Timeout => "timeout",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "skipped" => Some(Self::Skipped),
            "timeout" => Some(Self::Timeout),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }

    /// An escalated step still waits for a response from its widened approver set.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Escalated)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: StepId,
    pub order: u32,
    pub name: String,
    pub approver: ApproverDesignation,
    pub required: bool,
    pub status: StepStatus,
    pub auto_approved: bool,
    pub responded_by: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub comments: Option<String>,
    pub timeout_hours: Decimal,
    pub deadline: DateTime<Utc>,
    pub escalated: bool,
    pub escalated_to: Option<String>,
    pub escalation_role_id: Option<String>,
    pub escalation_timeout_hours: Option<Decimal>,
    pub timed_out_at: Option<DateTime<Utc>>,
}

impl StepExecution {
    /// Skipped and auto-approved steps never count toward group aggregation.
    pub fn participates(&self) -> bool {
        self.status != StepStatus::Skipped && !self.auto_approved
    }

    pub fn accepts(&self, approver_id: &str) -> bool {
        match self.approver.user_id.as_deref().filter(|user| !user.trim().is_empty()) {
            None => true,
            Some(user) => user.trim().eq_ignore_ascii_case(approver_id.trim()) || self.escalated,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalExecution {
    pub id: ExecutionId,
    pub chain_id: ChainId,
    pub request_id: RequestId,
    pub tenant_id: TenantId,
    pub mode: AggregationMode,
    pub escalation: EscalationPolicy,
    pub current_step_order: Option<u32>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_hours: Option<Decimal>,
    pub state_version: u32,
    pub steps: Vec<StepExecution>,
}

impl ApprovalExecution {
    pub fn group(&self, order: u32) -> impl Iterator<Item = &StepExecution> {
        self.steps.iter().filter(move |step| step.order == order)
    }

    /// Distinct step orders, ascending.
    pub fn orders(&self) -> Vec<u32> {
        let mut orders: Vec<u32> = self.steps.iter().map(|step| step.order).collect();
        orders.sort_unstable();
        orders.dedup();
        orders
    }

    pub fn open_steps(&self) -> impl Iterator<Item = &StepExecution> {
        let current = self.current_step_order;
        self.steps
            .iter()
            .filter(move |step| Some(step.order) == current && step.status.is_open())
    }
}

/// Record of one state change, kept for audit and replay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTransition {
    pub id: TransitionId,
    pub execution_id: ExecutionId,
    pub chain_id: ChainId,
    pub step_order: Option<u32>,
    pub from_status: Option<ExecutionStatus>,
    pub to_status: ExecutionStatus,
    pub reason: TransitionReason,
    pub actor_id: String,
    pub state_version: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    Created,
    StepApproved,
    StepRejected,
    StepEscalated,
    StepTimedOut,
}

impl TransitionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::StepApproved => "step_approved",
            Self::StepRejected => "step_rejected",
            Self::StepEscalated => "step_escalated",
            Self::StepTimedOut => "step_timed_out",
        }
    }
}
