//! Capability traits — the seams the engine is composed from.
//!
//! Every collaborator of the trigger service is reached through one of these,
//! so the engine runs without a live ledger, HTTP stack or cron driver in tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{ActionError, EvaluationError, Result};
use crate::hash::Hash160;
use crate::types::{
    ContractInvocation, Event, LedgerNotification, Notification, SignedTransaction, Trigger,
    TriggerExecution,
};

/// Persistence for triggers and execution records.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn save_trigger(&self, trigger: &Trigger) -> Result<()>;
    async fn get_trigger(&self, id: &str) -> Result<Option<Trigger>>;
    /// `None` lists every trigger.
    async fn list_triggers(&self, owner: Option<&Hash160>) -> Result<Vec<Trigger>>;
    async fn delete_trigger(&self, id: &str) -> Result<()>;
    async fn save_execution(&self, execution: &TriggerExecution) -> Result<()>;
    async fn get_execution(&self, id: &str) -> Result<Option<TriggerExecution>>;
    async fn list_executions(&self, trigger_id: &str) -> Result<Vec<TriggerExecution>>;
}

/// Observability sink.
pub trait MetricsCollector: Send + Sync {
    fn record_execution(&self, execution: &TriggerExecution);
    fn record_event_processed(&self, event: &Event);
    fn record_trigger_created(&self, trigger: &Trigger);
    fn record_trigger_deleted(&self, trigger: &Trigger);
    fn record_error(&self, category: &str, error: &dyn std::error::Error);
}

/// Pure condition evaluation.
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(
        &self,
        expression: &str,
        context: &Map<String, Value>,
    ) -> std::result::Result<Value, EvaluationError>;

    fn evaluate_comparison(
        &self,
        field: &str,
        operator: &str,
        value: &Value,
        context: &Map<String, Value>,
    ) -> std::result::Result<bool, EvaluationError>;

    fn evaluate_multiple(
        &self,
        conditions: &[String],
        connective: &str,
        context: &Map<String, Value>,
    ) -> std::result::Result<bool, EvaluationError>;
}

/// Performs exactly one attempt of a trigger's action.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, trigger: &Trigger, event: &Event) -> std::result::Result<Value, ActionError>;
}

/// Called by a scheduler each time a schedule trigger fires.
#[async_trait]
pub trait ScheduleHandler: Send + Sync {
    async fn on_schedule(&self, trigger: Trigger);
}

/// Recurring time source for schedule triggers.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Start the timer driver; firings are delivered to `handler`.
    async fn start(&self, handler: Arc<dyn ScheduleHandler>) -> Result<()>;
    /// Stop the driver and wait for in-flight firings.
    async fn stop(&self) -> Result<()>;
    /// Register (or replace) the entry for a schedule trigger. Non-schedule triggers are ignored.
    async fn add_trigger(&self, trigger: &Trigger) -> Result<()>;
    /// Deregister an entry; absence is not an error.
    async fn remove_trigger(&self, id: &str) -> Result<()>;
}

/// Read and write access to the ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn block_count(&self) -> Result<u32>;
    async fn block_hash(&self, height: u32) -> Result<String>;
    async fn block_notifications(&self, block_hash: &str) -> Result<Vec<LedgerNotification>>;
    /// Submit a signed transaction; returns the transaction hash.
    async fn send_raw_transaction(&self, tx: &SignedTransaction) -> Result<String>;
    /// Height of the block that included `tx_hash`, or `None` while unconfirmed.
    async fn transaction_height(&self, tx_hash: &str) -> Result<Option<u32>>;
}

/// Signing identity bound to on-chain actions.
pub trait TransactionSigner: Send + Sync {
    fn account(&self) -> Hash160;
    fn sign(&self, invocation: &ContractInvocation) -> std::result::Result<SignedTransaction, ActionError>;
}

/// Outbound notification delivery (mail, chat, SMS gateways).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &Notification) -> std::result::Result<(), ActionError>;
}
