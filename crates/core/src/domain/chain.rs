use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::request::RequestContext;
use crate::errors::ConfigurationError;
use crate::validation::validate_configuration;

/// Upper bound for any computed deadline offset (ten years).
const MAX_OFFSET_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

/// Largest timeout, in hours, a chain may configure. Matches `MAX_OFFSET_SECONDS`.
pub const MAX_TIMEOUT_HOURS: i64 = 10 * 365 * 24;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    RoleGrant,
    PurchaseOrder,
    Budget,
    Expense,
    Contract,
    General,
}

impl ApprovalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoleGrant => "role_grant",
            Self::PurchaseOrder => "purchase_order",
            Self::Budget => "budget",
            Self::Expense => "expense",
            Self::Contract => "contract",
            Self::General => "general",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "role_grant" => Some(Self::RoleGrant),
            "purchase_order" => Some(Self::PurchaseOrder),
            "budget" => Some(Self::Budget),
            "expense" => Some(Self::Expense),
            "contract" => Some(Self::Contract),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

/// Rule used to resolve a group of steps that share one order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    Sequential,
    Parallel,
    Majority,
    Unanimous,
    FirstResponse,
}

impl AggregationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Majority => "majority",
            Self::Unanimous => "unanimous",
            Self::FirstResponse => "first_response",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sequential" => Some(Self::Sequential),
            "parallel" => Some(Self::Parallel),
            "majority" => Some(Self::Majority),
            "unanimous" => Some(Self::Unanimous),
            "first_response" => Some(Self::FirstResponse),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    Timeout,
    Rejection,
    TimeoutOrRejection,
}

impl EscalationTrigger {
    pub fn on_timeout(&self) -> bool {
        matches!(self, Self::Timeout | Self::TimeoutOrRejection)
    }

    pub fn on_rejection(&self) -> bool {
        matches!(self, Self::Rejection | Self::TimeoutOrRejection)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub enabled: bool,
    pub trigger: EscalationTrigger,
    pub role_id: Option<String>,
    pub timeout_hours: Option<Decimal>,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger: EscalationTrigger::Timeout,
            role_id: None,
            timeout_hours: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountThresholds {
    pub step1: Option<Decimal>,
    pub step2: Option<Decimal>,
    pub step3: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentRule {
    pub department_id: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRule {
    pub user_id: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Weekly window in UTC. `end_hour` is exclusive; an empty weekday list means every day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRule {
    #[serde(default)]
    pub weekdays: Vec<Weekday>,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl TimeRule {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        if !self.weekdays.is_empty() && !self.weekdays.contains(&instant.weekday()) {
            return false;
        }

        let hour = instant.hour();
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            // window wraps midnight
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConditions {
    #[serde(default)]
    pub department_id: Option<String>,
    #[serde(default)]
    pub amount_thresholds: Option<AmountThresholds>,
    #[serde(default)]
    pub department_rules: Vec<DepartmentRule>,
    #[serde(default)]
    pub user_rules: Vec<UserRule>,
    #[serde(default)]
    pub time_rules: Vec<TimeRule>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipCondition {
    AmountBelow { amount: Decimal },
    DepartmentIn { departments: Vec<String> },
    RoleIn { roles: Vec<String> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequireCondition {
    AmountAtLeast { amount: Decimal },
    DepartmentIn { departments: Vec<String> },
    RoleIn { roles: Vec<String> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AutoApproveCondition {
    AmountBelow { amount: Decimal },
    PreviouslyApproved,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConditions {
    #[serde(default)]
    pub skip: Vec<SkipCondition>,
    #[serde(default)]
    pub require: Vec<RequireCondition>,
    #[serde(default)]
    pub auto_approve: Vec<AutoApproveCondition>,
}

/// Who may act on a step. At least one field must be set for a valid chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverDesignation {
    #[serde(default)]
    pub role_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub department_id: Option<String>,
}

impl ApproverDesignation {
    pub fn is_empty(&self) -> bool {
        blank(self.role_id.as_deref())
            && blank(self.user_id.as_deref())
            && blank(self.department_id.as_deref())
    }
}

fn blank(value: Option<&str>) -> bool {
    value.map(|value| value.trim().is_empty()).unwrap_or(true)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStepConfig {
    pub id: StepId,
    pub order: u32,
    pub name: String,
    pub approver: ApproverDesignation,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub allow_delegation: bool,
    #[serde(default)]
    pub timeout_hours: Option<Decimal>,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub conditions: StepConditions,
    #[serde(default)]
    pub escalation_role_id: Option<String>,
    #[serde(default)]
    pub escalation_timeout_hours: Option<Decimal>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Draft,
    Active,
    Inactive,
}

impl ChainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainUsageStats {
    pub usage_count: u64,
    pub approved_count: u64,
    pub rejected_count: u64,
    pub timeout_count: u64,
    pub escalation_count: u64,
    pub average_processing_hours: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalChain {
    pub id: ChainId,
    pub tenant_id: TenantId,
    pub code: String,
    pub name: String,
    pub approval_type: ApprovalType,
    pub mode: AggregationMode,
    pub steps: Vec<ApprovalStepConfig>,
    pub default_timeout_hours: Decimal,
    #[serde(default)]
    pub max_timeout_hours: Option<Decimal>,
    #[serde(default)]
    pub escalation: EscalationPolicy,
    #[serde(default)]
    pub conditions: ChainConditions,
    pub status: ChainStatus,
    #[serde(default)]
    pub usage: ChainUsageStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalChain {
    pub fn is_active(&self) -> bool {
        self.status == ChainStatus::Active
    }

    /// Moves the chain to `Active` once its configuration validates.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<(), ConfigurationError> {
        let report = validate_configuration(self);
        if !report.is_valid {
            return Err(ConfigurationError { chain_id: self.id.clone(), errors: report.errors });
        }

        self.status = ChainStatus::Active;
        self.updated_at = now;
        Ok(())
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.status = ChainStatus::Inactive;
        self.updated_at = now;
    }

    /// Timeout for a step, falling back to the chain default and capped at the chain maximum.
    pub fn effective_timeout_hours(&self, step: &ApprovalStepConfig) -> Decimal {
        let hours = step.timeout_hours.unwrap_or(self.default_timeout_hours);
        match self.max_timeout_hours {
            Some(max) if hours > max => max,
            _ => hours,
        }
    }

    pub fn escalation_role_for(&self, step: &ApprovalStepConfig) -> Option<String> {
        step.escalation_role_id
            .clone()
            .filter(|role| !role.trim().is_empty())
            .or_else(|| self.escalation.role_id.clone().filter(|role| !role.trim().is_empty()))
    }

    pub fn escalation_timeout_for(&self, step: &ApprovalStepConfig) -> Option<Decimal> {
        step.escalation_timeout_hours.or(self.escalation.timeout_hours)
    }

    pub fn matches_department(&self, context: &RequestContext) -> bool {
        match &self.conditions.department_id {
            None => true,
            Some(required) => context
                .department
                .as_deref()
                .is_some_and(|department| same_key(department, required)),
        }
    }
}

pub(crate) fn same_key(left: &str, right: &str) -> bool {
    left.trim().eq_ignore_ascii_case(right.trim())
}

/// Converts fractional hours into a chrono duration, clamped to a sane range.
pub fn hours_to_duration(hours: Decimal) -> Duration {
    let seconds = hours
        .checked_mul(Decimal::from(3600))
        .and_then(|seconds| seconds.trunc().to_i64())
        .unwrap_or(if hours.is_sign_negative() { 0 } else { MAX_OFFSET_SECONDS });
    Duration::seconds(seconds.clamp(0, MAX_OFFSET_SECONDS))
}
