//! In-process metrics — counters plus a tracing line per record.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use ledgerclaw_core::traits::MetricsCollector;
use ledgerclaw_core::{Event, ExecutionStatus, Trigger, TriggerExecution};
use serde::Serialize;

#[derive(Default)]
pub struct TracingMetrics {
    executions_completed: AtomicU64,
    executions_failed: AtomicU64,
    events_processed: AtomicU64,
    triggers_created: AtomicU64,
    triggers_deleted: AtomicU64,
    errors: Mutex<BTreeMap<String, u64>>,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub executions_completed: u64,
    pub executions_failed: u64,
    pub events_processed: u64,
    pub triggers_created: u64,
    pub triggers_deleted: u64,
    pub errors: BTreeMap<String, u64>,
}

impl TracingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            executions_completed: self.executions_completed.load(Ordering::Relaxed),
            executions_failed: self.executions_failed.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            triggers_created: self.triggers_created.load(Ordering::Relaxed),
            triggers_deleted: self.triggers_deleted.load(Ordering::Relaxed),
            errors: self.errors.lock().map(|e| e.clone()).unwrap_or_default(),
        }
    }
}

impl MetricsCollector for TracingMetrics {
    fn record_execution(&self, execution: &TriggerExecution) {
        match execution.status {
            ExecutionStatus::Completed => {
                self.executions_completed.fetch_add(1, Ordering::Relaxed);
            }
            ExecutionStatus::Failed => {
                self.executions_failed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        tracing::debug!(
            trigger = %execution.trigger_id,
            execution = %execution.id,
            status = execution.status.as_str(),
            retries = execution.retry_count,
            duration_ms = execution.duration_ms,
            "📊 Execution recorded"
        );
    }

    fn record_event_processed(&self, event: &Event) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(event = %event.id, name = %event.name, "📊 Event processed");
    }

    fn record_trigger_created(&self, trigger: &Trigger) {
        self.triggers_created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(trigger = %trigger.id, kind = %trigger.trigger_type, "📊 Trigger created");
    }

    fn record_trigger_deleted(&self, trigger: &Trigger) {
        self.triggers_deleted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(trigger = %trigger.id, "📊 Trigger deleted");
    }

    fn record_error(&self, category: &str, error: &dyn std::error::Error) {
        if let Ok(mut errors) = self.errors.lock() {
            *errors.entry(category.to_string()).or_default() += 1;
        }
        tracing::debug!(category, error = %error, "📊 Error recorded");
    }
}

/// Used when `metrics_enabled = false`.
pub struct NoopMetrics;

impl MetricsCollector for NoopMetrics {
    fn record_execution(&self, _execution: &TriggerExecution) {}
    fn record_event_processed(&self, _event: &Event) {}
    fn record_trigger_created(&self, _trigger: &Trigger) {}
    fn record_trigger_deleted(&self, _trigger: &Trigger) {}
    fn record_error(&self, _category: &str, _error: &dyn std::error::Error) {}
}
