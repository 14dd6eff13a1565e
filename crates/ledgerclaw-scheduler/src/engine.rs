//! Cron scheduler — one tokio driver per schedule trigger.
//! Each driver sleeps until its next firing and hands the trigger to the
//! registered `ScheduleHandler`. No polling tick: idle triggers cost one timer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ledgerclaw_core::traits::{ScheduleHandler, Scheduler};
use ledgerclaw_core::{LedgerClawError, Result, Trigger, TriggerType};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::schedule::{self, ScheduleSpec};

struct CronEntry {
    trigger: Trigger,
    spec: ScheduleSpec,
    cancel: CancellationToken,
}

struct Inner {
    entries: Mutex<HashMap<String, CronEntry>>,
    handler: RwLock<Option<Arc<dyn ScheduleHandler>>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    running: AtomicBool,
}

/// Manages schedule entries and fires them.
#[derive(Clone)]
pub struct CronScheduler {
    inner: Arc<Inner>,
}

impl CronScheduler {
    /// Create a new, stopped scheduler.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                handler: RwLock::new(None),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Number of registered entries.
    pub fn entry_count(&self) -> usize {
        self.entries().len()
    }

    /// Whether an entry exists for `id`.
    pub fn has_entry(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, CronEntry>> {
        self.inner.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn driver_count(&self) -> usize {
        self.inner.tracker.len()
    }

    fn handler(&self) -> Option<Arc<dyn ScheduleHandler>> {
        self.inner
            .handler
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Spawn the driver loop for one entry.
    fn spawn_driver(
        &self,
        trigger: Trigger,
        spec: ScheduleSpec,
        cancel: CancellationToken,
        handler: Arc<dyn ScheduleHandler>,
    ) {
        let tracker = self.inner.tracker.clone();
        self.inner.tracker.spawn(async move {
            let mut last_fired = Utc::now();
            loop {
                let base = last_fired.max(Utc::now());
                let Some(next) = spec.next_after(base) else {
                    tracing::warn!("⏰ Schedule '{}' has no further firings ({})", trigger.schedule, trigger.id);
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                last_fired = next;

                tracing::debug!("🔔 Schedule fired: {} ({})", trigger.id, trigger.schedule);
                let handler = handler.clone();
                let fired = trigger.clone();
                tracker.spawn(async move {
                    handler.on_schedule(fired).await;
                });
            }
            tracing::debug!("⏹️ Schedule driver exited: {}", trigger.id);
        });
    }
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scheduler for CronScheduler {
    async fn start(&self, handler: Arc<dyn ScheduleHandler>) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(LedgerClawError::Scheduler("scheduler has been stopped".into()));
        }
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(LedgerClawError::Scheduler("scheduler already running".into()));
        }

        // handler and snapshot change together under the entries lock, so an
        // entry added concurrently gets exactly one driver
        let pending: Vec<_> = {
            let entries = self.entries();
            *self.inner.handler.write().unwrap_or_else(|e| e.into_inner()) = Some(handler.clone());
            entries
                .values()
                .map(|e| (e.trigger.clone(), e.spec.clone(), e.cancel.clone()))
                .collect()
        };
        let count = pending.len();
        for (trigger, spec, cancel) in pending {
            self.spawn_driver(trigger, spec, cancel, handler.clone());
        }
        tracing::info!("⏰ Scheduler started ({} entries)", count);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        tracing::info!("⏰ Scheduler stopped");
        Ok(())
    }

    async fn add_trigger(&self, trigger: &Trigger) -> Result<()> {
        if trigger.trigger_type != TriggerType::Schedule {
            return Ok(());
        }
        if !trigger.is_active() {
            return self.remove_trigger(&trigger.id).await;
        }
        let spec = schedule::parse_schedule(&trigger.schedule)?;

        let cancel = self.inner.shutdown.child_token();
        let handler = {
            let mut entries = self.entries();
            let replaced = entries.insert(
                trigger.id.clone(),
                CronEntry {
                    trigger: trigger.clone(),
                    spec: spec.clone(),
                    cancel: cancel.clone(),
                },
            );
            if let Some(old) = replaced {
                old.cancel.cancel();
            }
            if self.is_running() {
                self.handler()
            } else {
                None
            }
        };

        if let Some(handler) = handler {
            self.spawn_driver(trigger.clone(), spec, cancel, handler);
        }
        tracing::info!("📅 Schedule registered: '{}' ({})", trigger.schedule, trigger.id);
        Ok(())
    }

    async fn remove_trigger(&self, id: &str) -> Result<()> {
        if let Some(entry) = self.entries().remove(id) {
            entry.cancel.cancel();
            tracing::info!("🗑️ Schedule removed: {}", id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerclaw_core::TriggerStatus;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        fired: AtomicUsize,
        last_schedule: Mutex<String>,
    }

    #[async_trait]
    impl ScheduleHandler for Counter {
        async fn on_schedule(&self, trigger: Trigger) {
            self.fired.fetch_add(1, Ordering::SeqCst);
            *self.last_schedule.lock().unwrap() = trigger.schedule;
        }
    }

    #[tokio::test]
    async fn test_fires_about_once_per_second() {
        let scheduler = CronScheduler::new();
        let counter = Arc::new(Counter::default());
        scheduler
            .add_trigger(&Trigger::schedule("s1", "* * * * * *", "{}"))
            .await
            .unwrap();
        scheduler.start(counter.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let fired = counter.fired.load(Ordering::SeqCst);
        assert!((2..=4).contains(&fired), "fired {fired} times");
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_stops_firings() {
        let scheduler = CronScheduler::new();
        let counter = Arc::new(Counter::default());
        scheduler.start(counter.clone()).await.unwrap();
        scheduler
            .add_trigger(&Trigger::schedule("s1", "@every 1s", "{}"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        scheduler.remove_trigger("s1").await.unwrap();
        scheduler.remove_trigger("s1").await.unwrap();
        let after_remove = counter.fired.load(Ordering::SeqCst);
        assert!(after_remove >= 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.fired.load(Ordering::SeqCst), after_remove);
        assert_eq!(scheduler.entry_count(), 0);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_replaces_entry() {
        let scheduler = CronScheduler::new();
        let counter = Arc::new(Counter::default());
        scheduler.start(counter.clone()).await.unwrap();
        scheduler
            .add_trigger(&Trigger::schedule("s1", "@hourly", "{}"))
            .await
            .unwrap();
        scheduler
            .add_trigger(&Trigger::schedule("s1", "@every 1s", "{}"))
            .await
            .unwrap();
        assert_eq!(scheduler.entry_count(), 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(counter.fired.load(Ordering::SeqCst) >= 1);
        assert_eq!(*counter.last_schedule.lock().unwrap(), "@every 1s");
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_ignores_event_and_inactive_triggers() {
        let scheduler = CronScheduler::new();
        let event = Trigger::event("e1", Default::default(), "Transfer", "{}");
        scheduler.add_trigger(&event).await.unwrap();
        let inactive =
            Trigger::schedule("s1", "@hourly", "{}").with_status(TriggerStatus::Inactive);
        scheduler.add_trigger(&inactive).await.unwrap();
        assert_eq!(scheduler.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_schedule_rejected() {
        let scheduler = CronScheduler::new();
        let err = scheduler
            .add_trigger(&Trigger::schedule("s1", "not a cron", "{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerClawError::InvalidSchedule { .. }));
        assert!(!scheduler.has_entry("s1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_add_during_start_spawns_one_driver_each() {
        let scheduler = CronScheduler::new();
        let counter = Arc::new(Counter::default());

        let adds: Vec<_> = (0..64)
            .map(|i| {
                let scheduler = scheduler.clone();
                tokio::spawn(async move {
                    scheduler
                        .add_trigger(&Trigger::schedule(&format!("s{i}"), "@every 1h", "{}"))
                        .await
                })
            })
            .collect();
        scheduler.start(counter).await.unwrap();
        for add in adds {
            add.await.unwrap().unwrap();
        }

        assert_eq!(scheduler.entry_count(), 64);
        assert_eq!(scheduler.driver_count(), 64);
        scheduler.stop().await.unwrap();
        assert_eq!(scheduler.driver_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_is_terminal() {
        let scheduler = CronScheduler::new();
        let counter = Arc::new(Counter::default());
        scheduler.start(counter.clone()).await.unwrap();
        assert!(scheduler.start(counter.clone()).await.is_err());
        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running());
        assert!(scheduler.start(counter).await.is_err());
    }
}
