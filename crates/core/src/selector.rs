use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::chain::{same_key, ApprovalChain, ApprovalType, ChainId, TenantId};
use crate::domain::request::RequestContext;
use crate::errors::EngineError;

pub const DEPARTMENT_MATCH_WEIGHT: i64 = 10;
pub const THRESHOLD_WEIGHTS: [i64; 3] = [5, 3, 1];
pub const DEPARTMENT_RULE_WEIGHT: i64 = 8;
pub const USER_RULE_WEIGHT: i64 = 12;
pub const TIME_RULE_WEIGHT: i64 = 2;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainScore {
    pub chain_id: ChainId,
    pub code: String,
    pub score: i64,
    pub reasons: Vec<String>,
}

/// Scores one chain against a request context.
///
/// Returns `None` when the chain declares a department that the context does
/// not match; such chains are never eligible.
pub fn score_chain(chain: &ApprovalChain, context: &RequestContext) -> Option<ChainScore> {
    let mut score = 0;
    let mut reasons = Vec::new();

    if let Some(department) = &chain.conditions.department_id {
        if !chain.matches_department(context) {
            return None;
        }
        score += DEPARTMENT_MATCH_WEIGHT;
        reasons.push(format!("department `{department}` matched"));
    }

    if let (Some(thresholds), Some(amount)) = (&chain.conditions.amount_thresholds, context.amount)
    {
        let levels = [thresholds.step1, thresholds.step2, thresholds.step3];
        for (index, (threshold, weight)) in levels.iter().zip(THRESHOLD_WEIGHTS).enumerate() {
            if let Some(threshold) = threshold {
                if amount >= *threshold {
                    score += weight;
                    reasons.push(format!("amount cleared step{} threshold {threshold}", index + 1));
                }
            }
        }
    }

    if let Some(department) = context.department.as_deref() {
        for rule in &chain.conditions.department_rules {
            if same_key(&rule.department_id, department) {
                score += DEPARTMENT_RULE_WEIGHT;
                reasons.push(format!("department rule `{}` matched", rule.department_id));
            }
        }
    }

    if let Some(user_id) = context.user_id.as_deref() {
        for rule in &chain.conditions.user_rules {
            if same_key(&rule.user_id, user_id) {
                score += USER_RULE_WEIGHT;
                reasons.push(format!("user rule `{}` matched", rule.user_id));
            }
        }
    }

    if let Some(submitted_at) = context.submitted_at {
        let matched =
            chain.conditions.time_rules.iter().filter(|rule| rule.contains(submitted_at)).count();
        if matched > 0 {
            score += TIME_RULE_WEIGHT * matched as i64;
            reasons.push(format!("{matched} time rule(s) matched"));
        }
    }

    Some(ChainScore { chain_id: chain.id.clone(), code: chain.code.clone(), score, reasons })
}

fn is_candidate(chain: &ApprovalChain, approval_type: &ApprovalType, tenant: &TenantId) -> bool {
    chain.is_active() && &chain.approval_type == approval_type && &chain.tenant_id == tenant
}

/// All eligible chains with their scores, best first. Equal scores keep listing order.
pub fn rank_chains(
    chains: &[ApprovalChain],
    approval_type: &ApprovalType,
    context: &RequestContext,
    tenant: &TenantId,
) -> Vec<ChainScore> {
    let mut ranked: Vec<ChainScore> = chains
        .iter()
        .filter(|chain| is_candidate(chain, approval_type, tenant))
        .filter_map(|chain| score_chain(chain, context))
        .collect();
    ranked.sort_by(|left, right| right.score.cmp(&left.score));
    ranked
}

pub fn select_chain<'a>(
    chains: &'a [ApprovalChain],
    approval_type: &ApprovalType,
    context: &RequestContext,
    tenant: &TenantId,
) -> Result<&'a ApprovalChain, EngineError> {
    let mut best: Option<(&ApprovalChain, i64)> = None;

    for chain in chains.iter().filter(|chain| is_candidate(chain, approval_type, tenant)) {
        let Some(scored) = score_chain(chain, context) else {
            continue;
        };
        if best.map_or(true, |(_, score)| scored.score > score) {
            best = Some((chain, scored.score));
        }
    }

    match best {
        Some((chain, score)) => {
            debug!(
                event_name = "chain.selected",
                chain_id = %chain.id.0,
                tenant_id = %tenant.0,
                approval_type = approval_type.as_str(),
                score,
                "approval chain selected"
            );
            Ok(chain)
        }
        None => Err(EngineError::NoMatchingChain {
            tenant_id: tenant.clone(),
            approval_type: approval_type.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{rank_chains, score_chain, select_chain};
    use crate::domain::chain::{
        AggregationMode, AmountThresholds, ApprovalChain, ApprovalStepConfig, ApprovalType,
        ApproverDesignation, ChainConditions, ChainId, ChainStatus, ChainUsageStats,
        DepartmentRule, EscalationPolicy, StepConditions, StepId, TenantId, TimeRule, UserRule,
    };
    use crate::domain::request::RequestContext;
    use crate::errors::EngineError;

    fn chain(id: &str, conditions: ChainConditions) -> ApprovalChain {
        let now = Utc::now();
        ApprovalChain {
            id: ChainId(id.to_string()),
            tenant_id: TenantId("acme".to_string()),
            code: id.to_uppercase(),
            name: format!("Chain {id}"),
            approval_type: ApprovalType::PurchaseOrder,
            mode: AggregationMode::Sequential,
            steps: vec![ApprovalStepConfig {
                id: StepId(format!("{id}-s1")),
                order: 1,
                name: "Review".to_string(),
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
            }],
            default_timeout_hours: Decimal::from(24),
            max_timeout_hours: None,
            escalation: EscalationPolicy::default(),
            conditions,
            status: ChainStatus::Active,
            usage: ChainUsageStats::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn tenant() -> TenantId {
        TenantId("acme".to_string())
    }

    #[test]
    fn threshold_bonuses_accumulate_as_amount_clears_each_level() {
        let tiered = chain(
            "tiered",
            ChainConditions {
                amount_thresholds: Some(AmountThresholds {
                    step1: Some(Decimal::from(1_000_000)),
                    step2: Some(Decimal::from(2_000_000)),
                    step3: Some(Decimal::from(3_000_000)),
                }),
                ..ChainConditions::default()
            },
        );
        let context = RequestContext::default().with_amount(Decimal::from(5_000_000));

        let scored = score_chain(&tiered, &context).expect("eligible");
        assert_eq!(scored.score, 5 + 3 + 1);

        let partial = RequestContext::default().with_amount(Decimal::from(1_500_000));
        assert_eq!(score_chain(&tiered, &partial).expect("eligible").score, 5);
    }

    #[test]
    fn higher_threshold_coverage_beats_unrestricted_chain() {
        let generic = chain(
            "generic",
            ChainConditions {
                amount_thresholds: Some(AmountThresholds {
                    step1: Some(Decimal::from(4_000_000)),
                    ..AmountThresholds::default()
                }),
                ..ChainConditions::default()
            },
        );
        let tiered = chain(
            "tiered",
            ChainConditions {
                amount_thresholds: Some(AmountThresholds {
                    step1: Some(Decimal::from(1_000_000)),
                    step2: Some(Decimal::from(2_000_000)),
                    step3: Some(Decimal::from(3_000_000)),
                }),
                ..ChainConditions::default()
            },
        );
        let chains = vec![generic, tiered];
        let context = RequestContext::default().with_amount(Decimal::from(5_000_000));

        let selected = select_chain(&chains, &ApprovalType::PurchaseOrder, &context, &tenant())
            .expect("a chain should match");
        assert_eq!(selected.id.0, "tiered");
    }

    #[test]
    fn department_restriction_excludes_mismatches_and_rewards_matches() {
        let finance = chain(
            "finance",
            ChainConditions { department_id: Some("finance".to_string()), ..Default::default() },
        );
        let fallback = chain("fallback", ChainConditions::default());
        let chains = vec![fallback, finance];

        let in_finance = RequestContext::default().with_department("Finance");
        let selected = select_chain(&chains, &ApprovalType::PurchaseOrder, &in_finance, &tenant())
            .expect("finance chain");
        assert_eq!(selected.id.0, "finance");

        let in_sales = RequestContext::default().with_department("sales");
        let ranked = rank_chains(&chains, &ApprovalType::PurchaseOrder, &in_sales, &tenant());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].chain_id.0, "fallback");
    }

    #[test]
    fn override_rules_add_fixed_weight() {
        let overrides = chain(
            "overrides",
            ChainConditions {
                department_rules: vec![DepartmentRule {
                    department_id: "it".to_string(),
                    note: None,
                }],
                user_rules: vec![UserRule { user_id: "u-42".to_string(), note: None }],
                time_rules: vec![TimeRule { weekdays: Vec::new(), start_hour: 8, end_hour: 18 }],
                ..ChainConditions::default()
            },
        );
        let context = RequestContext {
            submitted_at: Some(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()),
            ..RequestContext::default().with_department("IT").with_user("u-42")
        };

        assert_eq!(score_chain(&overrides, &context).expect("eligible").score, 8 + 12 + 2);
    }

    #[test]
    fn ties_keep_first_listed_chain() {
        let chains = vec![
            chain("first", ChainConditions::default()),
            chain("second", ChainConditions::default()),
        ];

        let selected = select_chain(
            &chains,
            &ApprovalType::PurchaseOrder,
            &RequestContext::default(),
            &tenant(),
        )
        .expect("tie should still select");
        assert_eq!(selected.id.0, "first");
    }

    #[test]
    fn inactive_other_type_and_other_tenant_chains_are_ignored() {
        let mut inactive = chain("inactive", ChainConditions::default());
        inactive.status = ChainStatus::Inactive;
        let mut budget = chain("budget", ChainConditions::default());
        budget.approval_type = ApprovalType::Budget;
        let mut foreign = chain("foreign", ChainConditions::default());
        foreign.tenant_id = TenantId("globex".to_string());

        let error = select_chain(
            &[inactive, budget, foreign],
            &ApprovalType::PurchaseOrder,
            &RequestContext::default(),
            &tenant(),
        )
        .expect_err("nothing should match");

        assert_eq!(
            error,
            EngineError::NoMatchingChain {
                tenant_id: tenant(),
                approval_type: ApprovalType::PurchaseOrder,
            }
        );
    }
}
