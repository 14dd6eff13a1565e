//! Trigger service — owns the trigger index and drives executions.
//!
//! ```text
//! EventPoller ──► mpsc queue ──► dispatch loop ──► unit per event ─┐
//! CronScheduler ─────────────────────────────────► on_schedule ────┤
//!                                                                  ▼
//!                          condition ─► execute-with-retry ─► store + metrics
//! ```
//!
//! Every unit of work holds one slot of the concurrency limiter while it runs an
//! attempt. The slot is handed back while an execution waits out its retry delay.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ledgerclaw_core::traits::{
    ActionExecutor, ConditionEvaluator, LedgerClient, MetricsCollector, ScheduleHandler, Scheduler,
    TriggerStore,
};
use ledgerclaw_core::{
    ActionConfig, ActionError, EngineConfig, Event, ExecutionStatus, Hash160, LedgerClawError,
    Result, Trigger, TriggerExecution, TriggerStatus, TriggerType,
};
use ledgerclaw_scheduler::{CronScheduler, MemoryStore, parse_schedule};
use serde_json::{Map, Value};
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::actions::ActionDispatcher;
use crate::condition::{ExprEvaluator, condition_holds};
use crate::metrics::{NoopMetrics, TracingMetrics};
use crate::poller::EventPoller;

/// Shared state of the running pipeline. Also the scheduler's firing handler.
struct Pipeline {
    triggers: RwLock<HashMap<String, Trigger>>,
    store: Arc<dyn TriggerStore>,
    executor: Arc<dyn ActionExecutor>,
    evaluator: Arc<dyn ConditionEvaluator>,
    metrics: Arc<dyn MetricsCollector>,
    limiter: Arc<Semaphore>,
    execution_timeout: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Pipeline {
    /// Wait for a free slot; `None` once shutdown has begun.
    async fn acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = self.limiter.clone().acquire_owned() => permit.ok(),
        }
    }

    fn persistence_failed(&self, what: &str, e: &LedgerClawError) {
        tracing::error!("💾 Failed to {what}: {e}");
        self.metrics.record_error("persistence", e);
    }

    /// One unit of work: run every active trigger matching `event`.
    async fn handle_event(&self, event: Event, permit: OwnedSemaphorePermit) {
        self.metrics.record_event_processed(&event);

        let matching: Vec<Trigger> = self
            .triggers
            .read()
            .await
            .values()
            .filter(|t| t.matches(&event))
            .cloned()
            .collect();
        if matching.is_empty() {
            return;
        }

        let mut context = Map::new();
        context.insert("event".into(), Value::Object(event.data.clone()));

        let mut slot = Some(permit);
        for trigger in matching {
            match condition_holds(self.evaluator.as_ref(), &trigger.condition, &context) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(trigger = %trigger.id, event = %event.id, "Condition not met");
                    continue;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Condition of trigger {} failed: {}", trigger.id, e);
                    self.metrics.record_error("condition_evaluation", &e);
                    continue;
                }
            }
            self.run_execution(&trigger, &event, Some(&event.id), &mut slot)
                .await;
            // a retry abandoned on shutdown gave the slot back for good
            if slot.is_none() || self.cancel.is_cancelled() {
                break;
            }
        }
    }

    async fn run_execution(
        &self,
        trigger: &Trigger,
        event: &Event,
        event_id: Option<&str>,
        slot: &mut Option<OwnedSemaphorePermit>,
    ) -> TriggerExecution {
        let mut execution = TriggerExecution::new(&trigger.id, event_id);
        tracing::info!(
            "▶️ Executing trigger {} on '{}' (execution {})",
            trigger.id,
            event.name,
            execution.id
        );
        self.execute_with_retry(trigger, event, &mut execution, slot)
            .await;
        self.finish(&execution).await;
        execution
    }

    async fn execute_with_retry(
        &self,
        trigger: &Trigger,
        event: &Event,
        execution: &mut TriggerExecution,
        slot: &mut Option<OwnedSemaphorePermit>,
    ) {
        execution.mark_running();
        loop {
            let attempt =
                tokio::time::timeout(self.execution_timeout, self.executor.execute(trigger, event))
                    .await;
            let error = match attempt {
                Ok(Ok(result)) => {
                    execution.complete(result);
                    return;
                }
                Ok(Err(e)) => e,
                Err(_) => ActionError::Timeout(self.execution_timeout.as_secs()),
            };
            tracing::warn!(
                "⚠️ Trigger {} attempt {} failed: {}",
                trigger.id,
                execution.retry_count + 1,
                error
            );

            if execution.retry_count >= self.retry_attempts {
                execution.fail(error.to_string());
                return;
            }

            execution.next_retry_at = chrono::Duration::from_std(self.retry_delay)
                .ok()
                .map(|delay| Utc::now() + delay);
            drop(slot.take());

            let resumed = tokio::select! {
                _ = self.cancel.cancelled() => false,
                _ = tokio::time::sleep(self.retry_delay) => true,
            };
            if resumed {
                *slot = self.acquire_slot().await;
            }
            if !resumed || slot.is_none() {
                tracing::info!("⏹️ Retry of trigger {} abandoned on shutdown", trigger.id);
                execution.fail(error.to_string());
                return;
            }
            execution.retry_count += 1;
        }
    }

    /// Persist the execution and the trigger's bookkeeping, then report.
    async fn finish(&self, execution: &TriggerExecution) {
        if let Err(e) = self.store.save_execution(execution).await {
            self.persistence_failed("save execution", &e);
        }

        {
            let mut triggers = self.triggers.write().await;
            // deleted while running: nothing to update
            if let Some(trigger) = triggers.get_mut(&execution.trigger_id) {
                trigger.last_executed = Some(Utc::now());
                trigger.execution_count += 1;
                if let Err(e) = self.store.save_trigger(trigger).await {
                    self.persistence_failed("save trigger bookkeeping", &e);
                }
            }
        }

        self.metrics.record_execution(execution);
        match execution.status {
            ExecutionStatus::Completed => tracing::info!(
                "✅ Trigger {} completed in {}ms (retries: {})",
                execution.trigger_id,
                execution.duration_ms,
                execution.retry_count
            ),
            _ => tracing::error!(
                "❌ Trigger {} failed after {} retries: {}",
                execution.trigger_id,
                execution.retry_count,
                execution.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

#[async_trait]
impl ScheduleHandler for Pipeline {
    async fn on_schedule(&self, trigger: Trigger) {
        if self.cancel.is_cancelled() {
            return;
        }
        // the index is authoritative; the scheduler's copy may be stale
        let current = self.triggers.read().await.get(&trigger.id).cloned();
        let Some(current) = current.filter(Trigger::wants_schedule) else {
            tracing::debug!("Skipping firing of {}: no longer an active schedule", trigger.id);
            return;
        };

        let mut slot = self.acquire_slot().await;
        if slot.is_none() {
            return;
        }
        let event = Event::scheduled(&current);
        self.run_execution(&current, &event, None, &mut slot).await;
    }
}

async fn dispatch_loop(pipeline: Arc<Pipeline>, mut events: mpsc::Receiver<Event>) {
    tracing::info!("🚦 Dispatch loop started");
    loop {
        let event = tokio::select! {
            _ = pipeline.cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        // saturated limiter blocks the loop; the queue absorbs the burst
        let Some(permit) = pipeline.acquire_slot().await else {
            break;
        };
        let unit = pipeline.clone();
        pipeline.tracker.spawn(async move {
            unit.handle_event(event, permit).await;
        });
    }
    tracing::info!("🚦 Dispatch loop stopped");
}

/// Reject a trigger before anything is persisted.
pub fn validate_trigger(trigger: &Trigger) -> Result<()> {
    if trigger.id.trim().is_empty() {
        return Err(LedgerClawError::Validation("trigger ID is required".into()));
    }
    match trigger.trigger_type {
        TriggerType::Event => {
            if trigger.event_name.trim().is_empty() {
                return Err(LedgerClawError::Validation(
                    "event name is required for event trigger".into(),
                ));
            }
        }
        TriggerType::Schedule => {
            if trigger.schedule.trim().is_empty() {
                return Err(LedgerClawError::Validation(
                    "schedule is required for schedule trigger".into(),
                ));
            }
            parse_schedule(&trigger.schedule)?;
        }
    }
    if trigger.action.trim().is_empty() {
        return Err(LedgerClawError::Validation("action is required".into()));
    }
    ActionConfig::parse(&trigger.action).map_err(|e| LedgerClawError::Validation(e.to_string()))?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceState {
    Idle,
    Running,
    Stopped,
}

/// The automation engine: trigger CRUD plus the event and schedule pipelines.
pub struct TriggerService {
    config: EngineConfig,
    pipeline: Arc<Pipeline>,
    scheduler: Arc<dyn Scheduler>,
    ledger: Option<Arc<dyn LedgerClient>>,
    events: mpsc::Sender<Event>,
    receiver: Mutex<Option<mpsc::Receiver<Event>>>,
    state: Mutex<ServiceState>,
}

impl TriggerService {
    pub fn builder(config: EngineConfig) -> TriggerServiceBuilder {
        TriggerServiceBuilder {
            config,
            store: None,
            scheduler: None,
            executor: None,
            evaluator: None,
            metrics: None,
            ledger: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        *self.lock_state() == ServiceState::Running
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load persisted triggers, start the scheduler and spawn the loops.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.lock_state();
            match *state {
                ServiceState::Running => return Err(LedgerClawError::AlreadyRunning),
                ServiceState::Stopped => return Err(LedgerClawError::Stopped),
                ServiceState::Idle => *state = ServiceState::Running,
            }
        }
        if let Err(e) = self.boot().await {
            *self.lock_state() = ServiceState::Idle;
            return Err(e);
        }

        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(receiver) = receiver else {
            return Err(LedgerClawError::Stopped);
        };
        self.pipeline
            .tracker
            .spawn(dispatch_loop(self.pipeline.clone(), receiver));

        match &self.ledger {
            Some(ledger) => {
                let poller = EventPoller::new(ledger.clone(), self.pipeline.metrics.clone(), &self.config);
                self.pipeline
                    .tracker
                    .spawn(poller.run(self.events.clone(), self.pipeline.cancel.clone()));
            }
            None => tracing::info!("No ledger client bound, event polling disabled"),
        }

        tracing::info!(
            "🚀 Trigger service started ({} workers, {} retries)",
            self.config.max_concurrent_executions,
            self.config.retry_attempts
        );
        Ok(())
    }

    async fn boot(&self) -> Result<()> {
        let persisted = self.pipeline.store.list_triggers(None).await?;
        let count = persisted.len();
        {
            let mut triggers = self.pipeline.triggers.write().await;
            for mut trigger in persisted {
                if trigger.wants_schedule()
                    && let Err(e) = self.scheduler.add_trigger(&trigger).await
                {
                    tracing::error!("❌ Failed to schedule trigger {}: {}", trigger.id, e);
                    self.pipeline.metrics.record_error("scheduler", &e);
                    trigger.status = TriggerStatus::Failed;
                    if let Err(pe) = self.pipeline.store.save_trigger(&trigger).await {
                        self.pipeline.persistence_failed("save trigger", &pe);
                    }
                }
                triggers.insert(trigger.id.clone(), trigger);
            }
        }
        tracing::info!("📂 Loaded {count} triggers");

        self.scheduler.start(self.pipeline.clone()).await
    }

    /// Cancel every loop, stop the scheduler and wait for in-flight work.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.lock_state();
            if *state != ServiceState::Running {
                return Err(LedgerClawError::NotRunning);
            }
            *state = ServiceState::Stopped;
        }
        tracing::info!("🛑 Stopping trigger service...");
        self.pipeline.cancel.cancel();
        if let Err(e) = self.scheduler.stop().await {
            tracing::error!("❌ Scheduler stop failed: {e}");
        }
        self.pipeline.tracker.close();
        self.pipeline.tracker.wait().await;
        tracing::info!("🛑 Trigger service stopped");
        Ok(())
    }

    /// Persist, index and (de)register with the scheduler.
    /// Nothing changes when the store rejects the write. A scheduling failure
    /// leaves the trigger indexed as `failed`.
    async fn commit(
        &self,
        index: &mut HashMap<String, Trigger>,
        mut trigger: Trigger,
    ) -> Result<Trigger> {
        self.pipeline.store.save_trigger(&trigger).await?;

        // add_trigger replaces a prior entry; removal covers kind and status changes
        let scheduled = if trigger.wants_schedule() {
            self.scheduler.add_trigger(&trigger).await
        } else {
            self.scheduler.remove_trigger(&trigger.id).await
        };
        if let Err(e) = scheduled {
            tracing::error!("❌ Failed to schedule trigger {}: {}", trigger.id, e);
            self.pipeline.metrics.record_error("scheduler", &e);
            if let Err(re) = self.scheduler.remove_trigger(&trigger.id).await {
                tracing::warn!("⚠️ Failed to drop stale schedule of {}: {}", trigger.id, re);
            }
            trigger.status = TriggerStatus::Failed;
            if let Err(pe) = self.pipeline.store.save_trigger(&trigger).await {
                self.pipeline.persistence_failed("save trigger", &pe);
            }
            index.insert(trigger.id.clone(), trigger);
            return Err(e);
        }

        index.insert(trigger.id.clone(), trigger.clone());
        Ok(trigger)
    }

    pub async fn create_trigger(&self, mut trigger: Trigger) -> Result<Trigger> {
        validate_trigger(&trigger)?;
        let mut triggers = self.pipeline.triggers.write().await;
        if triggers.contains_key(&trigger.id) {
            return Err(LedgerClawError::AlreadyExists(trigger.id));
        }
        if let Some(limit) = self.config.max_triggers_per_owner {
            let owned = triggers.values().filter(|t| t.owner == trigger.owner).count();
            if owned >= limit {
                return Err(LedgerClawError::QuotaExceeded {
                    owner: trigger.owner.to_string(),
                    limit,
                });
            }
        }

        let now = Utc::now();
        trigger.created_at = now;
        trigger.updated_at = now;
        let trigger = self.commit(&mut triggers, trigger).await?;

        self.pipeline.metrics.record_trigger_created(&trigger);
        tracing::info!("✨ Created {} trigger {}", trigger.trigger_type, trigger.id);
        Ok(trigger)
    }

    /// Replace a trigger's definition. Creation time and execution bookkeeping are kept.
    pub async fn update_trigger(&self, mut trigger: Trigger) -> Result<Trigger> {
        validate_trigger(&trigger)?;
        let mut triggers = self.pipeline.triggers.write().await;
        let existing = triggers
            .get(&trigger.id)
            .cloned()
            .ok_or_else(|| LedgerClawError::TriggerNotFound(trigger.id.clone()))?;

        trigger.created_at = existing.created_at;
        trigger.execution_count = existing.execution_count;
        trigger.last_executed = existing.last_executed;
        trigger.updated_at = Utc::now();
        let trigger = self.commit(&mut triggers, trigger).await?;

        tracing::info!("✏️ Updated {} trigger {}", trigger.trigger_type, trigger.id);
        Ok(trigger)
    }

    pub async fn delete_trigger(&self, id: &str) -> Result<()> {
        let mut triggers = self.pipeline.triggers.write().await;
        let trigger = triggers
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerClawError::TriggerNotFound(id.to_string()))?;

        self.pipeline.store.delete_trigger(id).await?;
        triggers.remove(id);
        if trigger.trigger_type == TriggerType::Schedule
            && let Err(e) = self.scheduler.remove_trigger(id).await
        {
            tracing::warn!("⚠️ Failed to remove schedule of {}: {}", id, e);
        }

        self.pipeline.metrics.record_trigger_deleted(&trigger);
        tracing::info!("🗑️ Deleted trigger {id}");
        Ok(())
    }

    /// Activate, deactivate or re-activate a failed trigger.
    pub async fn set_trigger_status(&self, id: &str, status: TriggerStatus) -> Result<Trigger> {
        let mut triggers = self.pipeline.triggers.write().await;
        let mut trigger = triggers
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerClawError::TriggerNotFound(id.to_string()))?;
        if trigger.status == status {
            return Ok(trigger);
        }

        let previous = trigger.status;
        trigger.status = status;
        trigger.updated_at = Utc::now();
        let trigger = self.commit(&mut triggers, trigger).await?;

        tracing::info!("🔁 Trigger {} {} → {}", id, previous.as_str(), status.as_str());
        Ok(trigger)
    }

    /// Run a trigger now, regardless of its status, event match or condition.
    /// Waits for a free slot like any other execution.
    pub async fn execute_trigger(&self, id: &str) -> Result<TriggerExecution> {
        let trigger = self.get_trigger(id).await?;
        let mut slot = self.pipeline.acquire_slot().await;
        if slot.is_none() {
            return Err(LedgerClawError::Stopped);
        }

        tracing::info!("👆 Manual run of trigger {}", trigger.id);
        let event = Event::manual(&trigger);
        Ok(self
            .pipeline
            .run_execution(&trigger, &event, None, &mut slot)
            .await)
    }

    pub async fn get_trigger(&self, id: &str) -> Result<Trigger> {
        self.pipeline
            .triggers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerClawError::TriggerNotFound(id.to_string()))
    }

    /// Triggers owned by `owner`, or all of them. Oldest first.
    pub async fn list_triggers(&self, owner: Option<&Hash160>) -> Vec<Trigger> {
        let mut triggers: Vec<Trigger> = self
            .pipeline
            .triggers
            .read()
            .await
            .values()
            .filter(|t| owner.is_none_or(|o| &t.owner == o))
            .cloned()
            .collect();
        triggers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        triggers
    }

    pub async fn get_execution(&self, id: &str) -> Result<TriggerExecution> {
        self.pipeline
            .store
            .get_execution(id)
            .await?
            .ok_or_else(|| LedgerClawError::ExecutionNotFound(id.to_string()))
    }

    pub async fn list_executions(&self, trigger_id: &str) -> Result<Vec<TriggerExecution>> {
        self.pipeline.store.list_executions(trigger_id).await
    }

    /// Put an event on the queue, waiting for room when it is full.
    pub async fn publish_event(&self, event: Event) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| LedgerClawError::NotRunning)
    }

    /// A producer handle onto the event queue.
    pub fn event_sender(&self) -> mpsc::Sender<Event> {
        self.events.clone()
    }
}

/// Wires a `TriggerService`; anything not supplied gets the built-in implementation.
pub struct TriggerServiceBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn TriggerStore>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    executor: Option<Arc<dyn ActionExecutor>>,
    evaluator: Option<Arc<dyn ConditionEvaluator>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
    ledger: Option<Arc<dyn LedgerClient>>,
}

impl TriggerServiceBuilder {
    pub fn store(mut self, store: Arc<dyn TriggerStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Enables event polling and, for the default executor, contract calls.
    pub fn ledger(mut self, ledger: Arc<dyn LedgerClient>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn build(self) -> Result<TriggerService> {
        self.config.validate()?;

        let metrics: Arc<dyn MetricsCollector> = match self.metrics {
            Some(metrics) => metrics,
            None if self.config.metrics_enabled => Arc::new(TracingMetrics::new()),
            None => Arc::new(NoopMetrics),
        };
        let executor: Arc<dyn ActionExecutor> = match self.executor {
            Some(executor) => executor,
            None => {
                let mut dispatcher = ActionDispatcher::new(self.config.network_magic);
                if let Some(ledger) = &self.ledger {
                    dispatcher = dispatcher.with_ledger(ledger.clone());
                }
                Arc::new(dispatcher)
            }
        };
        let store: Arc<dyn TriggerStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };
        let scheduler: Arc<dyn Scheduler> = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(CronScheduler::new()),
        };
        let evaluator: Arc<dyn ConditionEvaluator> = match self.evaluator {
            Some(evaluator) => evaluator,
            None => Arc::new(ExprEvaluator::new()),
        };

        let (events, receiver) = mpsc::channel(self.config.max_event_channel_size);
        let pipeline = Arc::new(Pipeline {
            triggers: RwLock::new(HashMap::new()),
            store,
            executor,
            evaluator,
            metrics,
            limiter: Arc::new(Semaphore::new(self.config.max_concurrent_executions)),
            execution_timeout: self.config.execution_timeout,
            retry_attempts: self.config.retry_attempts,
            retry_delay: self.config.retry_delay,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });

        Ok(TriggerService {
            config: self.config,
            pipeline,
            scheduler,
            ledger: self.ledger,
            events,
            receiver: Mutex::new(Some(receiver)),
            state: Mutex::new(ServiceState::Idle),
        })
    }
}
