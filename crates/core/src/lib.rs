pub mod conditions;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod events;
pub mod scheduler;
pub mod selector;
pub mod service;
pub mod usage;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use conditions::{disposition, StepDisposition};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::chain::{
    AggregationMode, ApprovalChain, ApprovalStepConfig, ApprovalType, ChainId, ChainStatus,
    ChainUsageStats, StepId, TenantId,
};
pub use domain::execution::{
    ApprovalExecution, ExecutionId, ExecutionStatus, ExecutionTransition, StepExecution,
    StepStatus, TransitionReason,
};
pub use domain::request::{ApprovalRequest, RequestContext, RequestId};
pub use engine::{EngineConfig, ExecutionEngine, StepResponse, TransitionResult};
pub use errors::{
    ApplicationError, ConfigurationError, EngineError, InterfaceError, InvalidTransition,
    StoreError,
};
pub use events::{EngineEvent, EventSink, InMemoryEventSink, TracingEventSink};
pub use scheduler::spawn_timeout_sweeper;
pub use selector::{rank_chains, select_chain, ChainScore};
pub use service::{
    ApprovalService, ChainCatalog, Clock, ExecutionStore, InMemoryChainCatalog,
    InMemoryExecutionStore, InMemoryTimerService, ManualClock, SystemClock, TimerKey,
    TimerService,
};
pub use usage::{InMemoryUsageLog, UsageEvent, UsageLog, UsageRecord};
pub use validation::{test_chain, validate_configuration, ChainTestReport, ChainValidationReport};
