use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;

use crate::domain::chain::{
    AggregationMode, ApprovalChain, ApprovalStepConfig, ApprovalType, ApproverDesignation,
    ChainConditions, ChainId, ChainStatus, ChainUsageStats, EscalationPolicy, StepConditions,
    StepId, TenantId,
};
use crate::domain::request::{ApprovalRequest, RequestContext, RequestId};

pub(crate) fn role_step(order: u32, role: &str) -> ApprovalStepConfig {
    ApprovalStepConfig {
        id: StepId(format!("step-{order}-{role}")),
        order,
        name: format!("{role} review"),
        approver: ApproverDesignation { role_id: Some(role.to_string()), ..Default::default() },
        required: true,
        allow_delegation: false,
        timeout_hours: None,
        auto_approve: false,
        conditions: StepConditions::default(),
        escalation_role_id: None,
        escalation_timeout_hours: None,
    }
}

pub(crate) fn user_step(order: u32, user: &str) -> ApprovalStepConfig {
    ApprovalStepConfig {
        id: StepId(format!("step-{order}-{user}")),
        approver: ApproverDesignation { user_id: Some(user.to_string()), ..Default::default() },
        ..role_step(order, user)
    }
}

/// Active purchase-order chain with one role step per entry in `orders`.
pub(crate) fn chain_with_orders(mode: AggregationMode, orders: &[u32]) -> ApprovalChain {
    let now = Utc::now();
    ApprovalChain {
        id: ChainId("chain-po".to_string()),
        tenant_id: TenantId("acme".to_string()),
        code: "PO-STANDARD".to_string(),
        name: "Standard purchase order".to_string(),
        approval_type: ApprovalType::PurchaseOrder,
        mode,
        steps: orders
            .iter()
            .enumerate()
            .map(|(index, order)| role_step(*order, &format!("approver-{index}")))
            .collect(),
        default_timeout_hours: Decimal::from(24),
        max_timeout_hours: None,
        escalation: EscalationPolicy::default(),
        conditions: ChainConditions::default(),
        status: ChainStatus::Active,
        usage: ChainUsageStats::default(),
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn request_for(chain: &ApprovalChain, context: RequestContext) -> ApprovalRequest {
    ApprovalRequest {
        id: RequestId("req-1".to_string()),
        tenant_id: chain.tenant_id.clone(),
        approval_type: chain.approval_type.clone(),
        requester_id: "requester-1".to_string(),
        payload: json!({ "po_number": "PO-1001" }),
        context,
        submitted_at: Utc::now(),
    }
}
