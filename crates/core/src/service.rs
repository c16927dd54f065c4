//! Approval service: the engine wired to its ports.
//!
//! Every mutation of one execution runs under that execution's async lock:
//! load, transition, save, timer re-sync, usage append and event emission
//! happen as one unit. Timer events that lose the race to a response become
//! no-ops inside the engine.
//!
//! The saved execution is the commit point. Transition and usage records
//! written after it are side records: a failure there is logged and does not
//! fail the call, since the state change cannot be retried.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, info, warn};

use crate::domain::chain::{ApprovalChain, ApprovalType, ChainId, ChainUsageStats, TenantId};
use crate::domain::execution::{
    ApprovalExecution, ExecutionId, ExecutionStatus, ExecutionTransition, TransitionReason,
};
use crate::domain::request::{ApprovalRequest, RequestContext};
use crate::engine::{ExecutionEngine, StepResponse, TransitionResult};
use crate::errors::{ApplicationError, EngineError, StoreError};
use crate::events::{
    EngineEvent, EventSink, TracingEventSink, EXECUTION_COMPLETED, EXECUTION_CREATED,
    STEP_ESCALATED, STEP_RESPONDED,
};
use crate::selector;
use crate::usage::{UsageEvent, UsageLog, UsageRecord};
use crate::validation::{self, ChainTestReport, ChainValidationReport};

#[async_trait]
pub trait ChainCatalog: Send + Sync {
    async fn find_chain(&self, id: &ChainId) -> Result<Option<ApprovalChain>, StoreError>;

    /// Chains of one tenant and type in listing order, active or not.
    async fn list_chains(
        &self,
        tenant_id: &TenantId,
        approval_type: &ApprovalType,
    ) -> Result<Vec<ApprovalChain>, StoreError>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn find_execution(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<ApprovalExecution>, StoreError>;

    async fn save_execution(&self, execution: ApprovalExecution) -> Result<(), StoreError>;

    async fn append_transition(&self, transition: ExecutionTransition) -> Result<(), StoreError>;

    async fn list_transitions(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<ExecutionTransition>, StoreError>;

    async fn list_pending(&self) -> Result<Vec<ApprovalExecution>, StoreError>;
}

/// One armed deadline. Ordering is by deadline first.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerKey {
    pub deadline: DateTime<Utc>,
    pub execution_id: ExecutionId,
    pub step_order: u32,
}

pub trait TimerService: Send + Sync {
    fn schedule(&self, key: TimerKey);
    fn cancel_execution(&self, execution_id: &ExecutionId);
    /// Removes and returns every timer due at or before `now`, earliest first.
    fn take_due(&self, now: DateTime<Utc>) -> Vec<TimerKey>;
    fn pending(&self) -> Vec<TimerKey>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    pub fn advance(&self, by: Duration) {
        match self.now.lock() {
            Ok(mut now) => *now += by,
            Err(poisoned) => *poisoned.into_inner() += by,
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[derive(Default)]
pub struct InMemoryTimerService {
    timers: Mutex<BTreeSet<TimerKey>>,
}

impl InMemoryTimerService {
    fn with_timers<R>(&self, apply: impl FnOnce(&mut BTreeSet<TimerKey>) -> R) -> R {
        match self.timers.lock() {
            Ok(mut timers) => apply(&mut timers),
            Err(poisoned) => apply(&mut poisoned.into_inner()),
        }
    }
}

impl TimerService for InMemoryTimerService {
    fn schedule(&self, key: TimerKey) {
        self.with_timers(|timers| {
            timers.insert(key);
        });
    }

    fn cancel_execution(&self, execution_id: &ExecutionId) {
        self.with_timers(|timers| timers.retain(|key| &key.execution_id != execution_id));
    }

    fn take_due(&self, now: DateTime<Utc>) -> Vec<TimerKey> {
        self.with_timers(|timers| {
            let due: Vec<TimerKey> =
                timers.iter().take_while(|key| key.deadline <= now).cloned().collect();
            for key in &due {
                timers.remove(key);
            }
            due
        })
    }

    fn pending(&self) -> Vec<TimerKey> {
        self.with_timers(|timers| timers.iter().cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryChainCatalog {
    chains: RwLock<Vec<ApprovalChain>>,
}

impl InMemoryChainCatalog {
    pub fn new(chains: Vec<ApprovalChain>) -> Self {
        Self { chains: RwLock::new(chains) }
    }

    pub async fn upsert(&self, chain: ApprovalChain) {
        let mut chains = self.chains.write().await;
        match chains.iter_mut().find(|existing| existing.id == chain.id) {
            Some(existing) => *existing = chain,
            None => chains.push(chain),
        }
    }
}

#[async_trait]
impl ChainCatalog for InMemoryChainCatalog {
    async fn find_chain(&self, id: &ChainId) -> Result<Option<ApprovalChain>, StoreError> {
        let chains = self.chains.read().await;
        Ok(chains.iter().find(|chain| &chain.id == id).cloned())
    }

    async fn list_chains(
        &self,
        tenant_id: &TenantId,
        approval_type: &ApprovalType,
    ) -> Result<Vec<ApprovalChain>, StoreError> {
        let chains = self.chains.read().await;
        Ok(chains
            .iter()
            .filter(|chain| &chain.tenant_id == tenant_id && &chain.approval_type == approval_type)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<String, ApprovalExecution>>,
    transitions: RwLock<Vec<ExecutionTransition>>,
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn find_execution(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<ApprovalExecution>, StoreError> {
        Ok(self.executions.read().await.get(&id.0).cloned())
    }

    async fn save_execution(&self, execution: ApprovalExecution) -> Result<(), StoreError> {
        self.executions.write().await.insert(execution.id.0.clone(), execution);
        Ok(())
    }

    async fn append_transition(&self, transition: ExecutionTransition) -> Result<(), StoreError> {
        self.transitions.write().await.push(transition);
        Ok(())
    }

    async fn list_transitions(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<ExecutionTransition>, StoreError> {
        let transitions = self.transitions.read().await;
        Ok(transitions
            .iter()
            .filter(|transition| &transition.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalExecution>, StoreError> {
        let executions = self.executions.read().await;
        let mut pending: Vec<ApprovalExecution> = executions
            .values()
            .filter(|execution| execution.status == ExecutionStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(pending)
    }
}

pub struct ApprovalService {
    engine: ExecutionEngine,
    catalog: Arc<dyn ChainCatalog>,
    store: Arc<dyn ExecutionStore>,
    usage: Arc<dyn UsageLog>,
    timers: Arc<dyn TimerService>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<ExecutionId, Arc<AsyncMutex<()>>>>,
}

impl ApprovalService {
    pub fn new(
        engine: ExecutionEngine,
        catalog: Arc<dyn ChainCatalog>,
        store: Arc<dyn ExecutionStore>,
        usage: Arc<dyn UsageLog>,
    ) -> Self {
        Self {
            engine,
            catalog,
            store,
            usage,
            timers: Arc::new(InMemoryTimerService::default()),
            events: Arc::new(TracingEventSink),
            clock: Arc::new(SystemClock),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_timers(mut self, timers: Arc<dyn TimerService>) -> Self {
        self.timers = timers;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub async fn select_chain(
        &self,
        tenant_id: &TenantId,
        approval_type: &ApprovalType,
        context: &RequestContext,
    ) -> Result<ApprovalChain, ApplicationError> {
        let chains = self.catalog.list_chains(tenant_id, approval_type).await?;
        let chain = selector::select_chain(&chains, approval_type, context, tenant_id)?;
        Ok(chain.clone())
    }

    /// Selects the best chain for `request` and starts an execution on it.
    pub async fn create_execution(
        &self,
        request: &ApprovalRequest,
    ) -> Result<ApprovalExecution, ApplicationError> {
        let context = request.selection_context();
        let chain = self.select_chain(&request.tenant_id, &request.approval_type, &context).await?;
        self.instantiate(&chain, request).await
    }

    pub async fn create_execution_for_chain(
        &self,
        chain_id: &ChainId,
        request: &ApprovalRequest,
    ) -> Result<ApprovalExecution, ApplicationError> {
        let chain = self.load_chain(chain_id).await?;
        if !chain.is_active() {
            return Err(EngineError::ChainInactive { chain_id: chain.id }.into());
        }
        self.instantiate(&chain, request).await
    }

    pub async fn respond(
        &self,
        execution_id: &ExecutionId,
        response: StepResponse,
    ) -> Result<ApprovalExecution, ApplicationError> {
        let lock = self.execution_lock(execution_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.respond_locked(execution_id, response).await
        };
        self.release_lock(execution_id, lock);
        outcome
    }

    async fn respond_locked(
        &self,
        execution_id: &ExecutionId,
        response: StepResponse,
    ) -> Result<ApprovalExecution, ApplicationError> {
        let execution = self.load_execution(execution_id).await?;
        let result = self.engine.respond(execution, response, self.clock.now())?;
        self.commit(&result).await?;
        Ok(result.execution)
    }

    /// Applies a deadline event. `Ok(None)` means the event was stale.
    pub async fn on_timeout(
        &self,
        execution_id: &ExecutionId,
        step_order: u32,
    ) -> Result<Option<ApprovalExecution>, ApplicationError> {
        let lock = self.execution_lock(execution_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.on_timeout_locked(execution_id, step_order).await
        };
        self.release_lock(execution_id, lock);
        outcome
    }

    async fn on_timeout_locked(
        &self,
        execution_id: &ExecutionId,
        step_order: u32,
    ) -> Result<Option<ApprovalExecution>, ApplicationError> {
        let execution = self.load_execution(execution_id).await?;
        match self.engine.on_timeout(&execution, step_order, self.clock.now()) {
            Some(result) => {
                self.commit(&result).await?;
                Ok(Some(result.execution))
            }
            None => {
                debug!(
                    event_name = "execution.timeout.stale",
                    execution_id = %execution_id.0,
                    step_order,
                    "timeout event ignored"
                );
                Ok(None)
            }
        }
    }

    /// Fires every timer that is due now. Returns how many changed an execution.
    ///
    /// A timer whose handling fails is re-armed so the next sweep retries it.
    pub async fn fire_due_timeouts(&self) -> usize {
        let due = self.timers.take_due(self.clock.now());
        let mut applied = 0;

        for key in due {
            match self.on_timeout(&key.execution_id, key.step_order).await {
                Ok(Some(_)) => applied += 1,
                Ok(None) => {}
                Err(error) => {
                    warn!(
                        event_name = "execution.timeout.failed",
                        execution_id = %key.execution_id.0,
                        step_order = key.step_order,
                        error = %error,
                        "timeout handling failed; timer re-armed"
                    );
                    self.timers.schedule(key);
                }
            }
        }
        applied
    }

    /// Re-arms timers for every pending execution in the store.
    pub async fn restore_timers(&self) -> Result<usize, ApplicationError> {
        let executions = self.resync_timers().await?;
        info!(
            event_name = "execution.timers.restored",
            executions,
            timers = self.timers.pending().len(),
            "pending execution timers restored"
        );
        Ok(executions)
    }

    /// Re-reads pending executions from the store, then fires whatever is due.
    ///
    /// Picks up executions written by other processes sharing the store.
    pub async fn sweep(&self) -> Result<usize, ApplicationError> {
        self.resync_timers().await?;
        Ok(self.fire_due_timeouts().await)
    }

    async fn resync_timers(&self) -> Result<usize, ApplicationError> {
        let pending = self.store.list_pending().await?;
        for execution in &pending {
            self.sync_timers(execution);
        }
        Ok(pending.len())
    }

    pub async fn execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<ApprovalExecution, ApplicationError> {
        self.load_execution(execution_id).await
    }

    pub async fn transitions(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<ExecutionTransition>, ApplicationError> {
        Ok(self.store.list_transitions(execution_id).await?)
    }

    pub async fn chain_stats(
        &self,
        chain_id: &ChainId,
    ) -> Result<ChainUsageStats, ApplicationError> {
        Ok(self.usage.stats(chain_id).await?)
    }

    pub async fn validate_configuration(
        &self,
        chain_id: &ChainId,
    ) -> Result<ChainValidationReport, ApplicationError> {
        let chain = self.load_chain(chain_id).await?;
        Ok(validation::validate_configuration(&chain))
    }

    pub async fn test_chain(
        &self,
        chain_id: &ChainId,
        request: &ApprovalRequest,
    ) -> Result<ChainTestReport, ApplicationError> {
        let chain = self.load_chain(chain_id).await?;
        Ok(validation::test_chain(&self.engine, &chain, request, self.clock.now())?)
    }

    async fn instantiate(
        &self,
        chain: &ApprovalChain,
        request: &ApprovalRequest,
    ) -> Result<ApprovalExecution, ApplicationError> {
        let result = self.engine.create_execution(chain, request, self.clock.now())?;
        let lock = self.execution_lock(&result.execution.id);
        let committed = {
            let _guard = lock.lock().await;
            self.commit(&result).await
        };
        self.release_lock(&result.execution.id, lock);
        committed?;
        info!(
            event_name = "execution.created",
            execution_id = %result.execution.id.0,
            chain_id = %chain.id.0,
            request_id = %request.id.0,
            status = result.execution.status.as_str(),
            current_step_order = ?result.execution.current_step_order,
            "approval execution created"
        );
        Ok(result.execution)
    }

    async fn commit(&self, result: &TransitionResult) -> Result<(), ApplicationError> {
        let execution = &result.execution;
        let transition = &result.transition;

        self.store.save_execution(execution.clone()).await?;
        if let Err(error) = self.store.append_transition(transition.clone()).await {
            warn!(
                event_name = "execution.transition.append_failed",
                execution_id = %execution.id.0,
                reason = transition.reason.as_str(),
                error = %error,
                "transition record lost after execution was saved"
            );
        }
        self.sync_timers(execution);

        let step_order = transition.step_order.map(|order| order.to_string()).unwrap_or_default();
        match transition.reason {
            TransitionReason::Created => self.events.emit(
                EngineEvent::for_execution(execution, EXECUTION_CREATED, transition.occurred_at)
                    .with_metadata("current_step_order", step_order),
            ),
            TransitionReason::StepApproved | TransitionReason::StepRejected => self.events.emit(
                EngineEvent::for_execution(execution, STEP_RESPONDED, transition.occurred_at)
                    .with_metadata("step_order", step_order)
                    .with_metadata("approver_id", transition.actor_id.clone())
                    .with_metadata("decision", transition.reason.as_str()),
            ),
            TransitionReason::StepEscalated => {
                self.record_usage(UsageRecord {
                    chain_id: execution.chain_id.clone(),
                    execution_id: execution.id.clone(),
                    event: UsageEvent::Escalated {
                        step_order: transition.step_order.unwrap_or_default(),
                    },
                    recorded_at: transition.occurred_at,
                })
                .await;
                self.events.emit(
                    EngineEvent::for_execution(execution, STEP_ESCALATED, transition.occurred_at)
                        .with_metadata("step_order", step_order)
                        .with_metadata("actor_id", transition.actor_id.clone()),
                );
                info!(
                    event_name = "execution.step.escalated",
                    execution_id = %execution.id.0,
                    step_order = ?transition.step_order,
                    "approval step escalated"
                );
            }
            TransitionReason::StepTimedOut => {}
        }

        if result.completed() {
            let processing_hours = execution.total_hours.unwrap_or(Decimal::ZERO);
            self.record_usage(UsageRecord {
                chain_id: execution.chain_id.clone(),
                execution_id: execution.id.clone(),
                event: UsageEvent::Completed { status: execution.status, processing_hours },
                recorded_at: transition.occurred_at,
            })
            .await;
            self.events.emit(
                EngineEvent::for_execution(execution, EXECUTION_COMPLETED, transition.occurred_at)
                    .with_metadata("total_hours", processing_hours.to_string()),
            );
            info!(
                event_name = "execution.completed",
                execution_id = %execution.id.0,
                chain_id = %execution.chain_id.0,
                status = execution.status.as_str(),
                total_hours = %processing_hours,
                "approval execution completed"
            );
        }
        Ok(())
    }

    async fn record_usage(&self, record: UsageRecord) {
        let kind = record.event.kind();
        if let Err(error) = self.usage.append(record.clone()).await {
            warn!(
                event_name = "chain.usage.append_failed",
                chain_id = %record.chain_id.0,
                execution_id = %record.execution_id.0,
                kind,
                error = %error,
                "usage event lost after execution was saved"
            );
        }
    }

    fn sync_timers(&self, execution: &ApprovalExecution) {
        self.timers.cancel_execution(&execution.id);
        if execution.status.is_terminal() {
            return;
        }
        for step in execution.open_steps() {
            self.timers.schedule(TimerKey {
                deadline: step.deadline,
                execution_id: execution.id.clone(),
                step_order: step.order,
            });
        }
    }

    async fn load_chain(&self, chain_id: &ChainId) -> Result<ApprovalChain, ApplicationError> {
        self.catalog
            .find_chain(chain_id)
            .await?
            .ok_or_else(|| EngineError::ChainNotFound { chain_id: chain_id.clone() }.into())
    }

    async fn load_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<ApprovalExecution, ApplicationError> {
        self.store.find_execution(execution_id).await?.ok_or_else(|| {
            EngineError::ExecutionNotFound { execution_id: execution_id.clone() }.into()
        })
    }

    fn execution_lock(&self, execution_id: &ExecutionId) -> Arc<AsyncMutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(execution_id.clone()).or_default().clone()
    }

    /// Drops this caller's handle and forgets the entry once nobody else holds it.
    fn release_lock(&self, execution_id: &ExecutionId, lock: Arc<AsyncMutex<()>>) {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        drop(lock);
        if locks.get(execution_id).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(execution_id);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        match self.locks.lock() {
            Ok(locks) => locks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc, Weekday};
    use rust_decimal::Decimal;

    use super::{
        ApprovalService, InMemoryChainCatalog, InMemoryExecutionStore, InMemoryTimerService,
        ManualClock, TimerService,
    };
    use crate::domain::chain::{
        AggregationMode, ApprovalChain, ChainConditions, ChainId, ChainUsageStats,
        EscalationPolicy, EscalationTrigger, TimeRule,
    };
    use crate::domain::execution::{ExecutionId, ExecutionStatus, StepStatus};
    use crate::domain::request::RequestContext;
    use crate::engine::{ExecutionEngine, StepResponse};
    use crate::errors::{ApplicationError, EngineError, InvalidTransition, StoreError};
    use crate::events::{
        InMemoryEventSink, EXECUTION_COMPLETED, EXECUTION_CREATED, STEP_ESCALATED, STEP_RESPONDED,
    };
    use crate::test_support::{chain_with_orders, request_for};
    use crate::usage::{InMemoryUsageLog, UsageLog, UsageRecord};

    struct UnavailableUsageLog;

    #[async_trait]
    impl UsageLog for UnavailableUsageLog {
        async fn append(&self, _record: UsageRecord) -> Result<(), StoreError> {
            Err(StoreError("usage log unavailable".to_string()))
        }

        async fn stats(&self, _chain_id: &ChainId) -> Result<ChainUsageStats, StoreError> {
            Err(StoreError("usage log unavailable".to_string()))
        }
    }

    struct Harness {
        service: Arc<ApprovalService>,
        clock: ManualClock,
        timers: Arc<InMemoryTimerService>,
        events: InMemoryEventSink,
    }

    fn harness(chain: ApprovalChain) -> Harness {
        let clock = ManualClock::new(Utc::now());
        let timers = Arc::new(InMemoryTimerService::default());
        let events = InMemoryEventSink::default();
        let service = ApprovalService::new(
            ExecutionEngine::new(),
            Arc::new(InMemoryChainCatalog::new(vec![chain])),
            Arc::new(InMemoryExecutionStore::default()),
            Arc::new(InMemoryUsageLog::default()),
        )
        .with_timers(timers.clone())
        .with_event_sink(Arc::new(events.clone()))
        .with_clock(Arc::new(clock.clone()));

        Harness { service: Arc::new(service), clock, timers, events }
    }

    fn approve(approver: &str, order: u32) -> StepResponse {
        StepResponse {
            step_order: order,
            approver_id: approver.to_string(),
            approved: true,
            comments: None,
        }
    }

    #[tokio::test]
    async fn full_lifecycle_persists_usage_and_events() {
        let chain = chain_with_orders(AggregationMode::Sequential, &[1, 2]);
        let h = harness(chain.clone());
        let request = request_for(&chain, RequestContext::default());

        let execution = h.service.create_execution(&request).await.expect("created");
        assert_eq!(h.timers.pending().len(), 1);

        h.clock.advance(Duration::hours(2));
        h.service.respond(&execution.id, approve("alice", 1)).await.expect("step 1");
        let pending = h.timers.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].step_order, 2);

        let done = h.service.respond(&execution.id, approve("bob", 2)).await.expect("step 2");
        assert_eq!(done.status, ExecutionStatus::Approved);
        assert!(h.timers.pending().is_empty());

        let stats = h.service.chain_stats(&chain.id).await.expect("stats");
        assert_eq!(stats.usage_count, 1);
        assert_eq!(stats.approved_count, 1);
        assert_eq!(stats.average_processing_hours, Some(Decimal::from(2)));

        let transitions = h.service.transitions(&execution.id).await.expect("transitions");
        assert_eq!(transitions.len(), 3);
        assert_eq!(
            h.events.event_types(),
            vec![EXECUTION_CREATED, STEP_RESPONDED, STEP_RESPONDED, EXECUTION_COMPLETED]
        );
    }

    #[tokio::test]
    async fn sweeper_escalates_then_times_out() {
        let mut chain = chain_with_orders(AggregationMode::Sequential, &[1]);
        chain.steps[0].timeout_hours = Some(Decimal::ONE);
        chain.escalation = EscalationPolicy {
            enabled: true,
            trigger: EscalationTrigger::Timeout,
            role_id: Some("director".to_string()),
            timeout_hours: Some(Decimal::from(4)),
        };
        let h = harness(chain.clone());
        let execution = h
            .service
            .create_execution(&request_for(&chain, RequestContext::default()))
            .await
            .expect("created");

        h.clock.advance(Duration::minutes(30));
        assert_eq!(h.service.fire_due_timeouts().await, 0);

        h.clock.advance(Duration::minutes(30));
        assert_eq!(h.service.fire_due_timeouts().await, 1);
        let escalated = h.service.execution(&execution.id).await.expect("load");
        assert_eq!(escalated.steps[0].status, StepStatus::Escalated);
        assert_eq!(h.timers.pending()[0].deadline, execution.started_at + Duration::hours(5));

        h.clock.advance(Duration::hours(4));
        assert_eq!(h.service.fire_due_timeouts().await, 1);
        let exhausted = h.service.execution(&execution.id).await.expect("load");
        assert_eq!(exhausted.status, ExecutionStatus::Escalated);

        let stats = h.service.chain_stats(&chain.id).await.expect("stats");
        assert_eq!(stats.escalation_count, 1);
        assert_eq!(stats.timeout_count, 1);
        assert!(h.events.event_types().contains(&STEP_ESCALATED.to_string()));
    }

    #[tokio::test]
    async fn stale_timeout_after_response_is_a_no_op() {
        let mut chain = chain_with_orders(AggregationMode::Sequential, &[1]);
        chain.steps[0].timeout_hours = Some(Decimal::ONE);
        let h = harness(chain.clone());
        let execution = h
            .service
            .create_execution(&request_for(&chain, RequestContext::default()))
            .await
            .expect("created");

        h.clock.advance(Duration::hours(2));
        let approved =
            h.service.respond(&execution.id, approve("alice", 1)).await.expect("approve");
        assert_eq!(approved.status, ExecutionStatus::Approved);

        let stale = h.service.on_timeout(&execution.id, 1).await.expect("stale event");
        assert!(stale.is_none());
        assert_eq!(
            h.service.execution(&execution.id).await.expect("load").status,
            ExecutionStatus::Approved
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_responses_resolve_a_group_once() {
        let chain = chain_with_orders(AggregationMode::FirstResponse, &[1, 1, 1, 1]);
        let h = harness(chain.clone());
        let execution = h
            .service
            .create_execution(&request_for(&chain, RequestContext::default()))
            .await
            .expect("created");

        let mut handles = Vec::new();
        for approver in ["a", "b", "c", "d"] {
            let service = h.service.clone();
            let id = execution.id.clone();
            handles.push(tokio::spawn(
                async move { service.respond(&id, approve(approver, 1)).await },
            ));
        }

        let mut accepted = 0;
        for handle in handles {
            match handle.await.expect("task joined") {
                Ok(_) => accepted += 1,
                Err(ApplicationError::Engine(EngineError::InvalidTransition {
                    reason: InvalidTransition::ExecutionClosed { .. },
                    ..
                })) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(accepted, 1);
        let stats = h.service.chain_stats(&chain.id).await.expect("stats");
        assert_eq!(stats.usage_count, 1);
    }

    #[tokio::test]
    async fn unknown_execution_and_chain_are_not_found() {
        let chain = chain_with_orders(AggregationMode::Sequential, &[1]);
        let h = harness(chain.clone());

        let missing = crate::domain::execution::ExecutionId("nope".to_string());
        let error = h.service.respond(&missing, approve("alice", 1)).await.expect_err("missing");
        assert!(matches!(error, ApplicationError::Engine(EngineError::ExecutionNotFound { .. })));

        let unknown = crate::domain::chain::ChainId("other".to_string());
        let error = h.service.validate_configuration(&unknown).await.expect_err("missing chain");
        assert!(matches!(error, ApplicationError::Engine(EngineError::ChainNotFound { .. })));
    }

    #[tokio::test]
    async fn test_chain_leaves_store_and_usage_untouched() {
        let chain = chain_with_orders(AggregationMode::Sequential, &[1]);
        let h = harness(chain.clone());

        let report = h
            .service
            .test_chain(&chain.id, &request_for(&chain, RequestContext::default()))
            .await
            .expect("preview");

        assert_eq!(report.status, Some(ExecutionStatus::Pending));
        assert!(h.timers.pending().is_empty());
        assert!(h.events.events().is_empty());
        assert_eq!(h.service.chain_stats(&chain.id).await.expect("stats").usage_count, 0);
    }

    #[tokio::test]
    async fn restore_timers_rearms_pending_executions() {
        let chain = chain_with_orders(AggregationMode::Sequential, &[1]);
        let h = harness(chain.clone());
        h.service
            .create_execution(&request_for(&chain, RequestContext::default()))
            .await
            .expect("created");
        for key in h.timers.pending() {
            h.timers.cancel_execution(&key.execution_id);
        }

        let restored = h.service.restore_timers().await.expect("restore");

        assert_eq!(restored, 1);
        assert_eq!(h.timers.pending().len(), 1);
    }

    #[tokio::test]
    async fn sweep_fires_timeouts_for_executions_started_elsewhere() {
        let mut chain = chain_with_orders(AggregationMode::Sequential, &[1]);
        chain.steps[0].timeout_hours = Some(Decimal::ONE);
        let clock = ManualClock::new(Utc::now());
        let catalog = Arc::new(InMemoryChainCatalog::new(vec![chain.clone()]));
        let store = Arc::new(InMemoryExecutionStore::default());
        let usage = Arc::new(InMemoryUsageLog::default());
        let writer = ApprovalService::new(
            ExecutionEngine::new(),
            catalog.clone(),
            store.clone(),
            usage.clone(),
        )
        .with_clock(Arc::new(clock.clone()));
        let sweeper = ApprovalService::new(ExecutionEngine::new(), catalog, store, usage)
            .with_clock(Arc::new(clock.clone()));

        let execution = writer
            .create_execution(&request_for(&chain, RequestContext::default()))
            .await
            .expect("created");
        assert_eq!(sweeper.fire_due_timeouts().await, 0);

        clock.advance(Duration::hours(2));
        assert_eq!(sweeper.sweep().await.expect("sweep"), 1);
        let swept = sweeper.execution(&execution.id).await.expect("load");
        assert_eq!(swept.status, ExecutionStatus::Timeout);
        assert_eq!(sweeper.sweep().await.expect("second sweep"), 0);
    }

    #[tokio::test]
    async fn usage_log_failure_does_not_fail_a_saved_response() {
        let chain = chain_with_orders(AggregationMode::Sequential, &[1]);
        let events = InMemoryEventSink::default();
        let service = ApprovalService::new(
            ExecutionEngine::new(),
            Arc::new(InMemoryChainCatalog::new(vec![chain.clone()])),
            Arc::new(InMemoryExecutionStore::default()),
            Arc::new(UnavailableUsageLog),
        )
        .with_event_sink(Arc::new(events.clone()));
        let execution = service
            .create_execution(&request_for(&chain, RequestContext::default()))
            .await
            .expect("created");

        let approved =
            service.respond(&execution.id, approve("alice", 1)).await.expect("saved response");

        assert_eq!(approved.status, ExecutionStatus::Approved);
        assert_eq!(
            service.execution(&execution.id).await.expect("load").status,
            ExecutionStatus::Approved
        );
        let reasons: Vec<_> = service
            .transitions(&execution.id)
            .await
            .expect("transitions")
            .into_iter()
            .map(|transition| transition.reason)
            .collect();
        assert_eq!(reasons.len(), 2);
        assert!(events.event_types().contains(&EXECUTION_COMPLETED.to_string()));
    }

    #[tokio::test]
    async fn execution_locks_are_released_after_each_call() {
        let chain = chain_with_orders(AggregationMode::Sequential, &[1, 2]);
        let h = harness(chain.clone());

        for index in 0..100 {
            let unknown = ExecutionId(format!("missing-{index}"));
            let error = h.service.on_timeout(&unknown, 1).await.expect_err("unknown execution");
            assert!(matches!(
                error,
                ApplicationError::Engine(EngineError::ExecutionNotFound { .. })
            ));
        }
        assert_eq!(h.service.tracked_locks(), 0);

        let execution = h
            .service
            .create_execution(&request_for(&chain, RequestContext::default()))
            .await
            .expect("created");
        assert_eq!(h.service.tracked_locks(), 0);

        h.service.respond(&execution.id, approve("alice", 2)).await.expect_err("not current");
        assert!(h.service.on_timeout(&execution.id, 1).await.expect("not due").is_none());
        h.service.respond(&execution.id, approve("alice", 1)).await.expect("step 1");
        assert_eq!(h.service.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn time_rules_score_the_request_submission_time() {
        let plain = chain_with_orders(AggregationMode::Sequential, &[1]);
        let mut weekday = chain_with_orders(AggregationMode::Sequential, &[1]);
        weekday.id = ChainId("chain-po-monday".to_string());
        weekday.code = "PO-MONDAY".to_string();
        weekday.conditions = ChainConditions {
            time_rules: vec![TimeRule {
                weekdays: vec![Weekday::Mon],
                start_hour: 0,
                end_hour: 24,
            }],
            ..ChainConditions::default()
        };
        let service = ApprovalService::new(
            ExecutionEngine::new(),
            Arc::new(InMemoryChainCatalog::new(vec![plain.clone(), weekday])),
            Arc::new(InMemoryExecutionStore::default()),
            Arc::new(InMemoryUsageLog::default()),
        );

        let mut request = request_for(&plain, RequestContext::default());
        request.submitted_at = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let on_monday = service.create_execution(&request).await.expect("monday request");
        assert_eq!(on_monday.chain_id.0, "chain-po-monday");

        request.submitted_at = Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap();
        let on_wednesday = service.create_execution(&request).await.expect("wednesday request");
        assert_eq!(on_wednesday.chain_id.0, "chain-po");
    }
}
