use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::chain::{ApprovalType, TenantId};

pub const CONTEXT_SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

/// Business context evaluated by step conditions and chain scoring.
///
/// Known fields are typed; anything else travels in `extensions` and is never
/// consulted by the condition evaluator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub previously_approved: bool,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

fn current_schema_version() -> u32 {
    CONTEXT_SCHEMA_VERSION
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            schema_version: CONTEXT_SCHEMA_VERSION,
            amount: None,
            department: None,
            role: None,
            user_id: None,
            previously_approved: false,
            submitted_at: None,
            extensions: BTreeMap::new(),
        }
    }
}

impl RequestContext {
    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: RequestId,
    pub tenant_id: TenantId,
    pub approval_type: ApprovalType,
    pub requester_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub context: RequestContext,
    pub submitted_at: DateTime<Utc>,
}

impl ApprovalRequest {
    /// The context used for chain selection. A context without its own
    /// `submitted_at` takes the request's submission time.
    pub fn selection_context(&self) -> RequestContext {
        let mut context = self.context.clone();
        context.submitted_at.get_or_insert(self.submitted_at);
        context
    }
}
