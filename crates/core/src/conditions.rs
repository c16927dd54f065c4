//! Step condition evaluation.
//!
//! All predicates are total: a context field that is absent means the
//! condition does not apply, never an error.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::chain::{
    same_key, ApprovalStepConfig, AutoApproveCondition, EscalationPolicy, RequireCondition,
    SkipCondition,
};
use crate::domain::execution::StepExecution;
use crate::domain::request::RequestContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationCause {
    Timeout,
    Rejection,
}

/// Initial disposition of a step when an execution is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepDisposition {
    Skip,
    AutoApprove,
    Await,
}

pub fn should_skip(step: &ApprovalStepConfig, context: &RequestContext) -> bool {
    if !step.required {
        return true;
    }

    if step.conditions.skip.iter().any(|condition| skip_matches(condition, context)) {
        return true;
    }

    let require = &step.conditions.require;
    !require.is_empty() && !require.iter().any(|condition| require_matches(condition, context))
}

pub fn should_auto_approve(step: &ApprovalStepConfig, context: &RequestContext) -> bool {
    step.auto_approve
        && step
            .conditions
            .auto_approve
            .iter()
            .any(|condition| auto_approve_matches(condition, context))
}

/// Escalation needs an enabled policy whose trigger covers the cause, a
/// resolvable target, and a step that has not been escalated before.
pub fn should_escalate(
    policy: &EscalationPolicy,
    step: &StepExecution,
    cause: EscalationCause,
) -> bool {
    if !policy.enabled || step.escalated {
        return false;
    }

    let triggered = match cause {
        EscalationCause::Timeout => policy.trigger.on_timeout(),
        EscalationCause::Rejection => policy.trigger.on_rejection(),
    };

    triggered && escalation_target(policy, step).is_some()
}

pub fn escalation_target(policy: &EscalationPolicy, step: &StepExecution) -> Option<String> {
    step.escalation_role_id
        .clone()
        .or_else(|| policy.role_id.clone())
        .filter(|role| !role.trim().is_empty())
}

pub fn disposition(step: &ApprovalStepConfig, context: &RequestContext) -> StepDisposition {
    if should_skip(step, context) {
        StepDisposition::Skip
    } else if should_auto_approve(step, context) {
        StepDisposition::AutoApprove
    } else {
        StepDisposition::Await
    }
}

fn skip_matches(condition: &SkipCondition, context: &RequestContext) -> bool {
    match condition {
        SkipCondition::AmountBelow { amount } => amount_below(context.amount, *amount),
        SkipCondition::DepartmentIn { departments } => {
            contains(departments, context.department.as_deref())
        }
        SkipCondition::RoleIn { roles } => contains(roles, context.role.as_deref()),
    }
}

fn require_matches(condition: &RequireCondition, context: &RequestContext) -> bool {
    match condition {
        RequireCondition::AmountAtLeast { amount } => {
            context.amount.is_some_and(|value| value >= *amount)
        }
        RequireCondition::DepartmentIn { departments } => {
            contains(departments, context.department.as_deref())
        }
        RequireCondition::RoleIn { roles } => contains(roles, context.role.as_deref()),
    }
}

fn auto_approve_matches(condition: &AutoApproveCondition, context: &RequestContext) -> bool {
    match condition {
        AutoApproveCondition::AmountBelow { amount } => amount_below(context.amount, *amount),
        AutoApproveCondition::PreviouslyApproved => context.previously_approved,
    }
}

fn amount_below(value: Option<Decimal>, threshold: Decimal) -> bool {
    value.is_some_and(|value| value < threshold)
}

fn contains(candidates: &[String], value: Option<&str>) -> bool {
    let Some(value) = value else {
        return false;
    };
    candidates.iter().any(|candidate| same_key(candidate, value))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{
        disposition, should_auto_approve, should_escalate, should_skip, EscalationCause,
        StepDisposition,
    };
    use crate::domain::chain::{
        ApprovalStepConfig, ApproverDesignation, AutoApproveCondition, EscalationPolicy,
        EscalationTrigger, RequireCondition, SkipCondition, StepConditions, StepId,
    };
    use crate::domain::execution::{StepExecution, StepStatus};
    use crate::domain::request::RequestContext;

    fn step() -> ApprovalStepConfig {
        ApprovalStepConfig {
            id: StepId("step-1".to_string()),
            order: 1,
            name: "Manager review".to_string(),
            approver: ApproverDesignation {
                role_id: Some("manager".to_string()),
                ..ApproverDesignation::default()
            },
            required: true,
            allow_delegation: false,
            timeout_hours: None,
            auto_approve: false,
            conditions: StepConditions::default(),
            escalation_role_id: None,
            escalation_timeout_hours: None,
        }
    }

    fn pending(escalated: bool) -> StepExecution {
        StepExecution {
            step_id: StepId("step-1".to_string()),
            order: 1,
            name: "Manager review".to_string(),
            approver: ApproverDesignation::default(),
            required: true,
            status: StepStatus::Pending,
            auto_approved: false,
            responded_by: None,
            responded_at: None,
            comments: None,
            timeout_hours: Decimal::from(24),
            deadline: Utc::now(),
            escalated,
            escalated_to: None,
            escalation_role_id: None,
            escalation_timeout_hours: None,
            timed_out_at: None,
        }
    }

    #[test]
    fn optional_steps_are_always_skipped() {
        let mut config = step();
        config.required = false;

        assert!(should_skip(&config, &RequestContext::default()));
    }

    #[test]
    fn skip_conditions_match_amount_department_and_role() {
        let mut config = step();
        config.conditions.skip = vec![
            SkipCondition::AmountBelow { amount: Decimal::from(1_000) },
            SkipCondition::DepartmentIn { departments: vec!["Facilities".to_string()] },
            SkipCondition::RoleIn { roles: vec!["director".to_string()] },
        ];

        let small = RequestContext::default().with_amount(Decimal::from(999));
        let facilities = RequestContext::default().with_department("facilities");
        let director = RequestContext::default().with_role("Director");
        let large = RequestContext::default().with_amount(Decimal::from(5_000));

        assert!(should_skip(&config, &small));
        assert!(should_skip(&config, &facilities));
        assert!(should_skip(&config, &director));
        assert!(!should_skip(&config, &large));
        assert!(!should_skip(&config, &RequestContext::default()));
    }

    #[test]
    fn unmatched_require_conditions_skip_the_step() {
        let mut config = step();
        config.conditions.require =
            vec![RequireCondition::AmountAtLeast { amount: Decimal::from(10_000) }];

        assert!(should_skip(&config, &RequestContext::default().with_amount(Decimal::from(500))));
        assert!(!should_skip(
            &config,
            &RequestContext::default().with_amount(Decimal::from(10_000))
        ));
        assert!(should_skip(&config, &RequestContext::default()));
    }

    #[test]
    fn auto_approve_requires_flag_and_matching_condition() {
        let mut config = step();
        config.conditions.auto_approve = vec![
            AutoApproveCondition::AmountBelow { amount: Decimal::from(100) },
            AutoApproveCondition::PreviouslyApproved,
        ];
        let small = RequestContext::default().with_amount(Decimal::from(50));

        assert!(!should_auto_approve(&config, &small), "flag is off");

        config.auto_approve = true;
        assert!(should_auto_approve(&config, &small));

        let repeat = RequestContext { previously_approved: true, ..RequestContext::default() };
        assert!(should_auto_approve(&config, &repeat));
        assert!(!should_auto_approve(&config, &RequestContext::default()));
    }

    #[test]
    fn disposition_prefers_skip_over_auto_approve() {
        let mut config = step();
        config.auto_approve = true;
        config.conditions.auto_approve = vec![AutoApproveCondition::PreviouslyApproved];
        config.conditions.skip = vec![SkipCondition::RoleIn { roles: vec!["cfo".to_string()] }];

        let context = RequestContext { previously_approved: true, ..RequestContext::default() };
        assert_eq!(disposition(&config, &context), StepDisposition::AutoApprove);
        assert_eq!(disposition(&config, &context.with_role("cfo")), StepDisposition::Skip);
        assert_eq!(disposition(&step(), &RequestContext::default()), StepDisposition::Await);
    }

    #[test]
    fn escalation_depends_on_trigger_target_and_prior_escalation() {
        let policy = EscalationPolicy {
            enabled: true,
            trigger: EscalationTrigger::Timeout,
            role_id: Some("director".to_string()),
            timeout_hours: Some(Decimal::from(4)),
        };

        assert!(should_escalate(&policy, &pending(false), EscalationCause::Timeout));
        assert!(!should_escalate(&policy, &pending(false), EscalationCause::Rejection));
        assert!(!should_escalate(&policy, &pending(true), EscalationCause::Timeout));

        let without_target = EscalationPolicy { role_id: None, ..policy.clone() };
        assert!(!should_escalate(&without_target, &pending(false), EscalationCause::Timeout));

        let disabled = EscalationPolicy { enabled: false, ..policy };
        assert!(!should_escalate(&disabled, &pending(false), EscalationCause::Timeout));
    }
}
