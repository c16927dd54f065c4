//! Deterministic approval execution engine.
//!
//! Every operation takes the current execution by value and returns the
//! mutated execution together with the transition that produced it. The
//! engine never performs I/O; persistence, timers and notifications live in
//! [`crate::service`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conditions::{
    disposition, escalation_target, should_escalate, EscalationCause, StepDisposition,
};
use crate::domain::chain::{hours_to_duration, AggregationMode, ApprovalChain};
use crate::domain::execution::{
    ApprovalExecution, ExecutionId, ExecutionStatus, ExecutionTransition, StepExecution,
    StepStatus, TransitionId, TransitionReason,
};
use crate::domain::request::ApprovalRequest;
use crate::errors::{ConfigurationError, EngineError, InvalidTransition};
use crate::validation::validate_configuration;

const SYSTEM_ACTOR: &str = "system";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Extension granted to an escalated step when neither the step nor the chain sets one.
    pub default_escalation_timeout_hours: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { default_escalation_timeout_hours: Decimal::from(24) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResponse {
    pub step_order: u32,
    pub approver_id: String,
    pub approved: bool,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionResult {
    pub execution: ApprovalExecution,
    pub transition: ExecutionTransition,
}

impl TransitionResult {
    /// True when this transition moved the execution out of `pending`.
    pub fn completed(&self) -> bool {
        self.execution.status.is_terminal()
            && self.transition.from_status.map_or(true, |status| !status.is_terminal())
    }

    pub fn escalated(&self) -> bool {
        self.transition.reason == TransitionReason::StepEscalated
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupOutcome {
    Open,
    Approved,
    Rejected,
}

#[derive(Clone, Debug, Default)]
pub struct ExecutionEngine {
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Instantiates an execution for `request` under `chain`.
    ///
    /// Steps are evaluated for skip/auto-approve immediately, and any leading
    /// groups that resolve without a human response are passed over.
    pub fn create_execution(
        &self,
        chain: &ApprovalChain,
        request: &ApprovalRequest,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, EngineError> {
        let report = validate_configuration(chain);
        if !report.is_valid {
            return Err(ConfigurationError { chain_id: chain.id.clone(), errors: report.errors }
                .into());
        }
        if chain.approval_type != request.approval_type {
            return Err(EngineError::RequestTypeMismatch {
                chain_type: chain.approval_type.clone(),
                request_type: request.approval_type.clone(),
            });
        }

        let mut configs: Vec<_> = chain.steps.iter().collect();
        configs.sort_by_key(|step| step.order);

        let steps = configs
            .into_iter()
            .map(|config| {
                let timeout_hours = chain.effective_timeout_hours(config);
                let mut step = StepExecution {
                    step_id: config.id.clone(),
                    order: config.order,
                    name: config.name.clone(),
                    approver: config.approver.clone(),
                    required: config.required,
                    status: StepStatus::Pending,
                    auto_approved: false,
                    responded_by: None,
                    responded_at: None,
                    comments: None,
                    timeout_hours,
                    deadline: now + hours_to_duration(timeout_hours),
                    escalated: false,
                    escalated_to: None,
                    escalation_role_id: chain.escalation_role_for(config),
                    escalation_timeout_hours: chain.escalation_timeout_for(config),
                    timed_out_at: None,
                };
                match disposition(config, &request.context) {
                    StepDisposition::Skip => step.status = StepStatus::Skipped,
                    StepDisposition::AutoApprove => {
                        step.status = StepStatus::Approved;
                        step.auto_approved = true;
                        step.responded_by = Some(SYSTEM_ACTOR.to_string());
                        step.responded_at = Some(now);
                    }
                    StepDisposition::Await => {}
                }
                step
            })
            .collect();

        let mut execution = ApprovalExecution {
            id: ExecutionId(Uuid::new_v4().to_string()),
            chain_id: chain.id.clone(),
            request_id: request.id.clone(),
            tenant_id: chain.tenant_id.clone(),
            mode: chain.mode,
            escalation: chain.escalation.clone(),
            current_step_order: None,
            status: ExecutionStatus::Pending,
            started_at: now,
            completed_at: None,
            total_hours: None,
            state_version: 1,
            steps,
        };

        let first = execution.orders().first().copied();
        self.activate_from(&mut execution, first, now);

        let transition = transition(
            &execution,
            None,
            TransitionReason::Created,
            execution.current_step_order,
            request.requester_id.clone(),
            now,
        );
        Ok(TransitionResult { execution, transition })
    }

    /// Records one approver's decision on the current group.
    pub fn respond(
        &self,
        mut execution: ApprovalExecution,
        response: StepResponse,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, EngineError> {
        let order = response.step_order;
        let invalid = |reason| EngineError::InvalidTransition {
            execution_id: execution.id.clone(),
            reason,
        };

        if execution.status.is_terminal() {
            return Err(invalid(InvalidTransition::ExecutionClosed { status: execution.status }));
        }
        if !execution.orders().contains(&order) {
            return Err(invalid(InvalidTransition::StepOrderNotFound { order }));
        }
        if execution.current_step_order != Some(order) {
            return Err(invalid(InvalidTransition::StepOrderNotCurrent {
                order,
                current: execution.current_step_order,
            }));
        }

        let approver_id = response.approver_id.trim();
        // Auto-approved steps carry the system actor, not a human response.
        let already_responded =
            execution.group(order).filter(|step| !step.auto_approved).any(|step| {
                step.responded_by.as_deref().is_some_and(|by| by.eq_ignore_ascii_case(approver_id))
            });
        if already_responded {
            return Err(invalid(InvalidTransition::DuplicateResponse {
                order,
                approver_id: approver_id.to_string(),
            }));
        }
        if !execution.group(order).any(|step| step.status.is_open()) {
            return Err(invalid(InvalidTransition::StepAlreadyResolved { order }));
        }

        let Some(index) = select_step(&execution, order, approver_id) else {
            return Err(invalid(InvalidTransition::ApproverNotEligible {
                order,
                approver_id: approver_id.to_string(),
            }));
        };

        let from_status = execution.status;
        let escalation_hours = self.escalation_hours(&execution.steps[index]);
        let escalate_on_rejection = !response.approved
            && should_escalate(
                &execution.escalation,
                &execution.steps[index],
                EscalationCause::Rejection,
            );
        let target = escalation_target(&execution.escalation, &execution.steps[index]);

        let step = &mut execution.steps[index];
        step.responded_by = Some(approver_id.to_string());
        step.responded_at = Some(now);
        step.comments = response.comments;

        let reason = if response.approved {
            step.status = StepStatus::Approved;
            TransitionReason::StepApproved
        } else if escalate_on_rejection {
            step.status = StepStatus::Escalated;
            step.escalated = true;
            step.escalated_to = target;
            step.deadline = now + hours_to_duration(escalation_hours);
            TransitionReason::StepEscalated
        } else {
            step.status = StepStatus::Rejected;
            TransitionReason::StepRejected
        };

        if reason != TransitionReason::StepEscalated {
            self.resolve_current_group(&mut execution, now);
        }
        execution.state_version += 1;

        let transition = transition(
            &execution,
            Some(from_status),
            reason,
            Some(order),
            approver_id.to_string(),
            now,
        );
        Ok(TransitionResult { execution, transition })
    }

    /// Applies a deadline event for `step_order`.
    ///
    /// Returns `None` when nothing is due: the execution already closed, the
    /// group is no longer current, or the deadline moved after the timer was
    /// armed.
    pub fn on_timeout(
        &self,
        execution: &ApprovalExecution,
        step_order: u32,
        now: DateTime<Utc>,
    ) -> Option<TransitionResult> {
        if execution.status.is_terminal() || execution.current_step_order != Some(step_order) {
            return None;
        }

        let due: Vec<usize> = execution
            .steps
            .iter()
            .enumerate()
            .filter(|(_, step)| {
                step.order == step_order && step.status.is_open() && step.deadline <= now
            })
            .map(|(index, _)| index)
            .collect();
        if due.is_empty() {
            return None;
        }

        let mut execution = execution.clone();
        let from_status = execution.status;
        let mut outcome: Option<ExecutionStatus> = None;

        for index in due {
            let escalate = should_escalate(
                &execution.escalation,
                &execution.steps[index],
                EscalationCause::Timeout,
            );
            let target = escalation_target(&execution.escalation, &execution.steps[index]);
            let escalation_hours = self.escalation_hours(&execution.steps[index]);
            let step = &mut execution.steps[index];

            if escalate {
                step.status = StepStatus::Escalated;
                step.escalated = true;
                step.escalated_to = target;
                step.deadline = step.deadline + hours_to_duration(escalation_hours);
                continue;
            }

            let exhausted = step.status == StepStatus::Escalated;
            step.status = StepStatus::Timeout;
            step.timed_out_at = Some(now);

            let status =
                if exhausted { ExecutionStatus::Escalated } else { ExecutionStatus::Timeout };
            if outcome != Some(ExecutionStatus::Escalated) {
                outcome = Some(status);
            }
        }

        let reason = match outcome {
            Some(status) => {
                complete(&mut execution, status, now);
                TransitionReason::StepTimedOut
            }
            None => TransitionReason::StepEscalated,
        };
        execution.state_version += 1;

        let transition = transition(
            &execution,
            Some(from_status),
            reason,
            Some(step_order),
            SYSTEM_ACTOR.to_string(),
            now,
        );
        Some(TransitionResult { execution, transition })
    }

    fn escalation_hours(&self, step: &StepExecution) -> Decimal {
        step.escalation_timeout_hours.unwrap_or(self.config.default_escalation_timeout_hours)
    }

    fn resolve_current_group(&self, execution: &mut ApprovalExecution, now: DateTime<Utc>) {
        let Some(order) = execution.current_step_order else {
            return;
        };
        match group_outcome(execution.mode, execution.group(order)) {
            GroupOutcome::Open => {}
            GroupOutcome::Rejected => complete(execution, ExecutionStatus::Rejected, now),
            GroupOutcome::Approved => {
                let next = execution.orders().into_iter().find(|candidate| *candidate > order);
                self.activate_from(execution, next, now);
            }
        }
    }

    /// Makes `order` current, passing over groups that are already resolved.
    fn activate_from(
        &self,
        execution: &mut ApprovalExecution,
        mut order: Option<u32>,
        now: DateTime<Utc>,
    ) {
        let orders = execution.orders();
        while let Some(current) = order {
            match group_outcome(execution.mode, execution.group(current)) {
                GroupOutcome::Open => {
                    execution.current_step_order = Some(current);
                    for step in execution.steps.iter_mut().filter(|step| step.order == current) {
                        if step.status == StepStatus::Pending {
                            step.deadline = now + hours_to_duration(step.timeout_hours);
                        }
                    }
                    return;
                }
                GroupOutcome::Rejected => {
                    execution.current_step_order = Some(current);
                    complete(execution, ExecutionStatus::Rejected, now);
                    return;
                }
                GroupOutcome::Approved => {
                    order = orders.iter().copied().find(|candidate| *candidate > current);
                }
            }
        }

        execution.current_step_order = None;
        complete(execution, ExecutionStatus::Approved, now);
    }
}

/// Resolves one group under `mode`. Skipped and auto-approved steps do not count.
pub fn group_outcome<'a>(
    mode: AggregationMode,
    group: impl IntoIterator<Item = &'a StepExecution>,
) -> GroupOutcome {
    let participants: Vec<&StepExecution> =
        group.into_iter().filter(|step| step.participates()).collect();
    let total = participants.len();
    if total == 0 {
        return GroupOutcome::Approved;
    }

    let approved = participants.iter().filter(|step| step.status == StepStatus::Approved).count();
    let rejected = participants.iter().filter(|step| step.status == StepStatus::Rejected).count();
    let open = participants.iter().filter(|step| step.status.is_open()).count();

    match mode {
        AggregationMode::Sequential | AggregationMode::Unanimous => {
            if rejected > 0 {
                GroupOutcome::Rejected
            } else if approved == total {
                GroupOutcome::Approved
            } else {
                GroupOutcome::Open
            }
        }
        AggregationMode::Parallel => {
            if open > 0 {
                GroupOutcome::Open
            } else if approved == total {
                GroupOutcome::Approved
            } else {
                GroupOutcome::Rejected
            }
        }
        AggregationMode::Majority => {
            if approved * 2 > total {
                GroupOutcome::Approved
            } else if rejected * 2 > total || open == 0 {
                GroupOutcome::Rejected
            } else {
                GroupOutcome::Open
            }
        }
        AggregationMode::FirstResponse => {
            if approved > 0 {
                GroupOutcome::Approved
            } else if rejected == total {
                GroupOutcome::Rejected
            } else {
                GroupOutcome::Open
            }
        }
    }
}

/// Picks the open step an approver acts on: a step assigned to them by user id
/// first, then the first open role or department step, then an escalated step.
fn select_step(execution: &ApprovalExecution, order: u32, approver_id: &str) -> Option<usize> {
    let open: Vec<(usize, &StepExecution)> = execution
        .steps
        .iter()
        .enumerate()
        .filter(|(_, step)| step.order == order && step.status.is_open() && step.participates())
        .collect();

    let assigned = open.iter().find(|(_, step)| {
        step.approver
            .user_id
            .as_deref()
            .is_some_and(|user| user.trim().eq_ignore_ascii_case(approver_id))
    });
    let unassigned = || {
        open.iter().find(|(_, step)| {
            step.approver.user_id.as_deref().map_or(true, |user| user.trim().is_empty())
        })
    };
    let escalated = || open.iter().find(|(_, step)| step.accepts(approver_id));

    assigned.or_else(unassigned).or_else(escalated).map(|(index, _)| *index)
}

fn complete(execution: &mut ApprovalExecution, status: ExecutionStatus, now: DateTime<Utc>) {
    execution.status = status;
    execution.completed_at = Some(now);
    let seconds = (now - execution.started_at).num_seconds().max(0);
    execution.total_hours = Some((Decimal::from(seconds) / Decimal::from(3600)).round_dp(2));
}

fn transition(
    execution: &ApprovalExecution,
    from_status: Option<ExecutionStatus>,
    reason: TransitionReason,
    step_order: Option<u32>,
    actor_id: String,
    now: DateTime<Utc>,
) -> ExecutionTransition {
    ExecutionTransition {
        id: TransitionId(Uuid::new_v4().to_string()),
        execution_id: execution.id.clone(),
        chain_id: execution.chain_id.clone(),
        step_order,
        from_status,
        to_status: execution.status,
        reason,
        actor_id,
        state_version: execution.state_version,
        occurred_at: now,
    }
}
