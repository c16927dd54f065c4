use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::chain::{ApprovalType, ChainId, TenantId};
use crate::domain::execution::{ExecutionId, ExecutionStatus};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("chain `{}` has an invalid configuration: {}", .chain_id.0, .errors.join("; "))]
pub struct ConfigurationError {
    pub chain_id: ChainId,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvalidTransition {
    #[error("execution is already {}", .status.as_str())]
    ExecutionClosed { status: ExecutionStatus },
    #[error("no step is configured at order {order}")]
    StepOrderNotFound { order: u32 },
    #[error("step order {order} is not actionable (current order: {current:?})")]
    StepOrderNotCurrent { order: u32, current: Option<u32> },
    #[error("every step at order {order} is already resolved")]
    StepAlreadyResolved { order: u32 },
    #[error("approver `{approver_id}` already responded at order {order}")]
    DuplicateResponse { order: u32, approver_id: String },
    #[error("approver `{approver_id}` is not eligible for any open step at order {order}")]
    ApproverNotEligible { order: u32, approver_id: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(
        "no matching chain of type `{}` for tenant `{}`",
        .approval_type.as_str(),
        .tenant_id.0
    )]
    NoMatchingChain { tenant_id: TenantId, approval_type: ApprovalType },
    #[error(
        "request type `{}` does not match chain type `{}`",
        .request_type.as_str(),
        .chain_type.as_str()
    )]
    RequestTypeMismatch { chain_type: ApprovalType, request_type: ApprovalType },
    #[error("invalid transition for execution `{}`: {reason}", .execution_id.0)]
    InvalidTransition { execution_id: ExecutionId, reason: InvalidTransition },
    #[error("execution not found: `{}`", .execution_id.0)]
    ExecutionNotFound { execution_id: ExecutionId },
    #[error("chain not found: `{}`", .chain_id.0)]
    ChainNotFound { chain_id: ChainId },
    #[error("chain `{}` is not active", .chain_id.0)]
    ChainInactive { chain_id: ChainId },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("store failure: {0}")]
pub struct StoreError(pub String);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        Self::Persistence(value.0)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "No approval chain or execution matched the request.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Engine(
                error @ (EngineError::NoMatchingChain { .. }
                | EngineError::ExecutionNotFound { .. }
                | EngineError::ChainNotFound { .. }),
            ) => Self::NotFound { message: error.to_string(), correlation_id: unassigned() },
            ApplicationError::Engine(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}
