use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::chain::{AggregationMode, ApprovalChain, MAX_TIMEOUT_HOURS};
use crate::domain::execution::{ExecutionStatus, StepStatus};
use crate::domain::request::ApprovalRequest;
use crate::engine::ExecutionEngine;
use crate::errors::EngineError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    NoSteps,
    NonContiguousOrders { orders: Vec<u32> },
    MissingApprover { step_id: String },
    ShortTimeout { step_id: Option<String>, hours: Decimal },
    TimeoutAboveMaximum { step_id: String, hours: Decimal, max_hours: Decimal },
    TimeoutOutOfRange { field: String, hours: Decimal },
    EscalationWithoutRole,
    EscalationWithoutTimeout,
    AutoApproveWithoutConditions { step_id: String },
    EvenMajorityGroup { order: u32, participants: usize },
}

impl ValidationIssue {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::NoSteps
                | Self::NonContiguousOrders { .. }
                | Self::MissingApprover { .. }
                | Self::TimeoutOutOfRange { .. }
        )
    }

    pub fn reason(&self) -> String {
        match self {
            Self::NoSteps => "chain has no steps".to_string(),
            Self::NonContiguousOrders { orders } => {
                format!("step orders {orders:?} do not form a contiguous sequence starting at 1")
            }
            Self::MissingApprover { step_id } => {
                format!("step `{step_id}` has no role, user or department approver")
            }
            Self::ShortTimeout { step_id: Some(step_id), hours } => {
                format!("step `{step_id}` times out after {hours}h, less than one hour")
            }
            Self::ShortTimeout { step_id: None, hours } => {
                format!("default timeout of {hours}h is less than one hour")
            }
            Self::TimeoutAboveMaximum { step_id, hours, max_hours } => {
                format!(
                    "step `{step_id}` timeout {hours}h is capped by the chain maximum {max_hours}h"
                )
            }
            Self::TimeoutOutOfRange { field, hours } => {
                format!("{field} of {hours}h exceeds the {MAX_TIMEOUT_HOURS}h limit")
            }
            Self::EscalationWithoutRole => {
                "escalation is enabled but no escalation role is configured".to_string()
            }
            Self::EscalationWithoutTimeout => {
                "escalation is enabled but no escalation timeout is configured".to_string()
            }
            Self::AutoApproveWithoutConditions { step_id } => {
                format!(
                    "step `{step_id}` is flagged auto-approve but has no auto-approve condition"
                )
            }
            Self::EvenMajorityGroup { order, participants } => {
                format!(
                    "majority group at order {order} has an even number of approvers \
                     ({participants})"
                )
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub issues: Vec<ValidationIssue>,
}

impl ChainValidationReport {
    fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let (errors, warnings): (Vec<_>, Vec<_>) =
            issues.iter().partition(|issue| issue.is_error());
        Self {
            is_valid: errors.is_empty(),
            errors: errors.into_iter().map(ValidationIssue::reason).collect(),
            warnings: warnings.into_iter().map(ValidationIssue::reason).collect(),
            issues,
        }
    }
}

/// Structural checks on a chain. Errors block activation and execution;
/// warnings are advisory.
pub fn validate_configuration(chain: &ApprovalChain) -> ChainValidationReport {
    let mut issues = Vec::new();

    if chain.steps.is_empty() {
        issues.push(ValidationIssue::NoSteps);
    } else {
        let mut orders: Vec<u32> = chain.steps.iter().map(|step| step.order).collect();
        orders.sort_unstable();
        orders.dedup();
        let contiguous = orders.iter().zip(1u32..).all(|(order, expected)| *order == expected);
        if !contiguous {
            issues.push(ValidationIssue::NonContiguousOrders { orders });
        }
    }

    for step in chain.steps.iter().filter(|step| step.approver.is_empty()) {
        issues.push(ValidationIssue::MissingApprover { step_id: step.id.0.clone() });
    }

    let one_hour = Decimal::ONE;
    if chain.default_timeout_hours < one_hour {
        issues.push(ValidationIssue::ShortTimeout {
            step_id: None,
            hours: chain.default_timeout_hours,
        });
    }
    for step in &chain.steps {
        let Some(hours) = step.timeout_hours else {
            continue;
        };
        if hours < one_hour {
            issues.push(ValidationIssue::ShortTimeout { step_id: Some(step.id.0.clone()), hours });
        }
        if let Some(max_hours) = chain.max_timeout_hours.filter(|max| hours > *max) {
            issues.push(ValidationIssue::TimeoutAboveMaximum {
                step_id: step.id.0.clone(),
                hours,
                max_hours,
            });
        }
    }

    for (field, hours) in configured_timeouts(chain) {
        if hours > Decimal::from(MAX_TIMEOUT_HOURS) {
            issues.push(ValidationIssue::TimeoutOutOfRange { field, hours });
        }
    }

    if chain.escalation.enabled {
        let has_role = chain.steps.iter().any(|step| chain.escalation_role_for(step).is_some());
        if !has_role {
            issues.push(ValidationIssue::EscalationWithoutRole);
        }
        let has_timeout =
            chain.steps.iter().any(|step| chain.escalation_timeout_for(step).is_some());
        if !has_timeout {
            issues.push(ValidationIssue::EscalationWithoutTimeout);
        }
    }

    for step in chain.steps.iter().filter(|step| step.auto_approve) {
        if step.conditions.auto_approve.is_empty() {
            issues.push(ValidationIssue::AutoApproveWithoutConditions {
                step_id: step.id.0.clone(),
            });
        }
    }

    if chain.mode == AggregationMode::Majority {
        let mut groups: BTreeMap<u32, usize> = BTreeMap::new();
        for step in chain.steps.iter().filter(|step| step.required) {
            *groups.entry(step.order).or_default() += 1;
        }
        for (order, participants) in groups {
            if participants % 2 == 0 {
                issues.push(ValidationIssue::EvenMajorityGroup { order, participants });
            }
        }
    }

    ChainValidationReport::from_issues(issues)
}

/// Every timeout a chain configures, labelled for error messages.
fn configured_timeouts(chain: &ApprovalChain) -> Vec<(String, Decimal)> {
    let mut timeouts = vec![("default timeout".to_string(), chain.default_timeout_hours)];
    timeouts.extend(chain.max_timeout_hours.map(|hours| ("maximum timeout".to_string(), hours)));
    timeouts.extend(
        chain.escalation.timeout_hours.map(|hours| ("escalation timeout".to_string(), hours)),
    );
    for step in &chain.steps {
        timeouts.extend(
            step.timeout_hours.map(|hours| (format!("step `{}` timeout", step.id.0), hours)),
        );
        timeouts.extend(step.escalation_timeout_hours.map(|hours| {
            (format!("step `{}` escalation timeout", step.id.0), hours)
        }));
    }
    timeouts
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepPreview {
    pub order: u32,
    pub step_id: String,
    pub name: String,
    pub status: StepStatus,
    pub auto_approved: bool,
    pub deadline: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTestReport {
    pub validation: ChainValidationReport,
    pub status: Option<ExecutionStatus>,
    pub current_step_order: Option<u32>,
    pub participating_steps: usize,
    pub steps: Vec<StepPreview>,
}

/// Dry run: validates `chain` and evaluates `request` against it without
/// touching any store, timer or usage log.
///
/// An invalid chain yields a report with validation errors and no step
/// preview; a request of the wrong type is an error.
pub fn test_chain(
    engine: &ExecutionEngine,
    chain: &ApprovalChain,
    request: &ApprovalRequest,
    now: DateTime<Utc>,
) -> Result<ChainTestReport, EngineError> {
    let validation = validate_configuration(chain);
    if !validation.is_valid {
        return Ok(ChainTestReport {
            validation,
            status: None,
            current_step_order: None,
            participating_steps: 0,
            steps: Vec::new(),
        });
    }

    let execution = engine.create_execution(chain, request, now)?.execution;
    let steps = execution
        .steps
        .iter()
        .map(|step| StepPreview {
            order: step.order,
            step_id: step.step_id.0.clone(),
            name: step.name.clone(),
            status: step.status,
            auto_approved: step.auto_approved,
            deadline: step.deadline,
        })
        .collect();

    Ok(ChainTestReport {
        validation,
        status: Some(execution.status),
        current_step_order: execution.current_step_order,
        participating_steps: execution.steps.iter().filter(|step| step.participates()).count(),
        steps,
    })
}
