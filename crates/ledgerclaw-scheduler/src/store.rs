//! In-memory trigger store — for tests and ephemeral runs.
//! Nothing survives a restart; use `SqliteStore` for that.

use std::collections::HashMap;

use async_trait::async_trait;
use ledgerclaw_core::traits::TriggerStore;
use ledgerclaw_core::{Hash160, Result, Trigger, TriggerExecution};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    triggers: RwLock<HashMap<String, Trigger>>,
    executions: RwLock<HashMap<String, TriggerExecution>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TriggerStore for MemoryStore {
    async fn save_trigger(&self, trigger: &Trigger) -> Result<()> {
        self.triggers
            .write()
            .await
            .insert(trigger.id.clone(), trigger.clone());
        Ok(())
    }

    async fn get_trigger(&self, id: &str) -> Result<Option<Trigger>> {
        Ok(self.triggers.read().await.get(id).cloned())
    }

    async fn list_triggers(&self, owner: Option<&Hash160>) -> Result<Vec<Trigger>> {
        let mut out: Vec<Trigger> = self
            .triggers
            .read()
            .await
            .values()
            .filter(|t| owner.is_none_or(|o| &t.owner == o))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn delete_trigger(&self, id: &str) -> Result<()> {
        self.triggers.write().await.remove(id);
        Ok(())
    }

    async fn save_execution(&self, execution: &TriggerExecution) -> Result<()> {
        self.executions
            .write()
            .await
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> Result<Option<TriggerExecution>> {
        Ok(self.executions.read().await.get(id).cloned())
    }

    async fn list_executions(&self, trigger_id: &str) -> Result<Vec<TriggerExecution>> {
        let mut out: Vec<TriggerExecution> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.trigger_id == trigger_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_owner_filter_and_delete() {
        let store = MemoryStore::new();
        let alice: Hash160 = "0x0000000000000000000000000000000000000001".parse().unwrap();
        store
            .save_trigger(&Trigger::schedule("a", "@hourly", "{}").with_owner(alice))
            .await
            .unwrap();
        store
            .save_trigger(&Trigger::schedule("b", "@hourly", "{}"))
            .await
            .unwrap();

        assert_eq!(store.list_triggers(None).await.unwrap().len(), 2);
        let owned = store.list_triggers(Some(&alice)).await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].id, "a");

        store.delete_trigger("a").await.unwrap();
        store.delete_trigger("missing").await.unwrap();
        assert!(store.get_trigger("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_executions_by_trigger() {
        let store = MemoryStore::new();
        let mut exec = TriggerExecution::new("t1", None);
        exec.fail("boom");
        store.save_execution(&exec).await.unwrap();
        store
            .save_execution(&TriggerExecution::new("t2", Some("e1")))
            .await
            .unwrap();

        let list = store.list_executions("t1").await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].error.as_deref(), Some("boom"));
        assert!(store.get_execution(&exec.id).await.unwrap().is_some());
    }
}
