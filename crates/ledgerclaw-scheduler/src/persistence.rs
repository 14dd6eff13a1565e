//! SQLite-backed persistence for triggers and execution records.
//! Survives restarts; one connection behind a mutex.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerclaw_core::traits::TriggerStore;
use ledgerclaw_core::{
    ExecutionStatus, Hash160, LedgerClawError, Result, Trigger, TriggerExecution, TriggerStatus,
    TriggerType,
};
use serde_json::{Map, Value};

const TRIGGER_COLUMNS: &str = "id, trigger_type, contract_hash, event_name, schedule, condition, action, owner, status, created_at, updated_at, last_executed, execution_count, metadata";

const EXECUTION_COLUMNS: &str = "id, trigger_id, event_id, status, start_time, end_time, duration_ms, result, error, retry_count, next_retry_at";

/// SQLite-backed trigger store.
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open or create the trigger database. Parent directories are created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path).map_err(|e| storage("DB open", e))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        tracing::info!("💾 Trigger store opened at {}", path.display());
        Ok(store)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(|e| storage("DB open", e))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS triggers (
                id TEXT PRIMARY KEY,
                trigger_type TEXT NOT NULL,      -- 'event', 'schedule'
                contract_hash TEXT NOT NULL,     -- 0x-prefixed big-endian
                event_name TEXT NOT NULL DEFAULT '',
                schedule TEXT NOT NULL DEFAULT '',
                condition TEXT NOT NULL DEFAULT '',
                action TEXT NOT NULL,            -- JSON action config
                owner TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_executed TEXT,
                execution_count INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_triggers_owner ON triggers(owner);

            CREATE TABLE IF NOT EXISTS trigger_executions (
                id TEXT PRIMARY KEY,
                trigger_id TEXT NOT NULL,
                event_id TEXT,
                status TEXT NOT NULL,            -- pending, running, completed, failed
                start_time TEXT NOT NULL,
                end_time TEXT,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                result TEXT,                     -- JSON
                error TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                next_retry_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_executions_trigger ON trigger_executions(trigger_id);
         ",
            )
            .map_err(|e| storage("Migration", e))
    }

    // ─── Row mapping ──────────────────────────────────────────

    fn row_to_trigger(row: &rusqlite::Row<'_>) -> rusqlite::Result<Trigger> {
        let trigger_type: String = row.get(1)?;
        let contract_hash: String = row.get(2)?;
        let owner: String = row.get(7)?;
        let status: String = row.get(8)?;
        let created_at: String = row.get(9)?;
        let updated_at: String = row.get(10)?;
        let last_executed: Option<String> = row.get(11)?;
        let execution_count: i64 = row.get(12)?;
        let metadata: String = row.get(13)?;

        Ok(Trigger {
            id: row.get(0)?,
            trigger_type: if trigger_type == "schedule" {
                TriggerType::Schedule
            } else {
                TriggerType::Event
            },
            contract_hash: contract_hash.parse().unwrap_or_default(),
            event_name: row.get(3)?,
            schedule: row.get(4)?,
            condition: row.get(5)?,
            action: row.get(6)?,
            owner: owner.parse().unwrap_or_default(),
            status: TriggerStatus::parse(&status).unwrap_or(TriggerStatus::Failed),
            created_at: parse_time(&created_at),
            updated_at: parse_time(&updated_at),
            last_executed: last_executed.as_deref().map(parse_time),
            execution_count: execution_count.max(0) as u64,
            metadata: serde_json::from_str::<Map<String, Value>>(&metadata).unwrap_or_default(),
        })
    }

    fn row_to_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<TriggerExecution> {
        let status: String = row.get(3)?;
        let start_time: String = row.get(4)?;
        let end_time: Option<String> = row.get(5)?;
        let result: Option<String> = row.get(7)?;
        let retry_count: i64 = row.get(9)?;
        let next_retry_at: Option<String> = row.get(10)?;

        Ok(TriggerExecution {
            id: row.get(0)?,
            trigger_id: row.get(1)?,
            event_id: row.get(2)?,
            status: ExecutionStatus::parse(&status).unwrap_or(ExecutionStatus::Failed),
            start_time: parse_time(&start_time),
            end_time: end_time.as_deref().map(parse_time),
            duration_ms: row.get(6)?,
            result: result.and_then(|r| serde_json::from_str(&r).ok()),
            error: row.get(8)?,
            retry_count: retry_count.max(0) as u32,
            next_retry_at: next_retry_at.as_deref().map(parse_time),
        })
    }
}

#[async_trait]
impl TriggerStore for SqliteStore {
    async fn save_trigger(&self, trigger: &Trigger) -> Result<()> {
        let metadata = serde_json::to_string(&trigger.metadata)?;
        self.conn()
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO triggers ({TRIGGER_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                rusqlite::params![
                    trigger.id,
                    trigger.trigger_type.to_string(),
                    trigger.contract_hash.to_be_string(),
                    trigger.event_name,
                    trigger.schedule,
                    trigger.condition,
                    trigger.action,
                    trigger.owner.to_be_string(),
                    trigger.status.as_str(),
                    trigger.created_at.to_rfc3339(),
                    trigger.updated_at.to_rfc3339(),
                    trigger.last_executed.map(|t| t.to_rfc3339()),
                    trigger.execution_count as i64,
                    metadata,
                ],
            )
            .map_err(|e| storage("Save trigger", e))?;
        Ok(())
    }

    async fn get_trigger(&self, id: &str) -> Result<Option<Trigger>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT {TRIGGER_COLUMNS} FROM triggers WHERE id = ?1"))
            .map_err(|e| storage("Get trigger", e))?;
        let mut rows = stmt
            .query_map([id], Self::row_to_trigger)
            .map_err(|e| storage("Get trigger", e))?;
        rows.next()
            .transpose()
            .map_err(|e| storage("Get trigger", e))
    }

    async fn list_triggers(&self, owner: Option<&Hash160>) -> Result<Vec<Trigger>> {
        let conn = self.conn();
        let rows = match owner {
            Some(owner) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {TRIGGER_COLUMNS} FROM triggers WHERE owner = ?1 ORDER BY created_at, id"
                    ))
                    .map_err(|e| storage("List triggers", e))?;
                stmt.query_map([owner.to_be_string()], Self::row_to_trigger)
                    .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {TRIGGER_COLUMNS} FROM triggers ORDER BY created_at, id"
                    ))
                    .map_err(|e| storage("List triggers", e))?;
                stmt.query_map([], Self::row_to_trigger)
                    .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            }
        };
        rows.map_err(|e| storage("List triggers", e))
    }

    async fn delete_trigger(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM triggers WHERE id = ?1", [id])
            .map_err(|e| storage("Delete trigger", e))?;
        Ok(())
    }

    async fn save_execution(&self, execution: &TriggerExecution) -> Result<()> {
        let result = execution
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn()
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO trigger_executions ({EXECUTION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                rusqlite::params![
                    execution.id,
                    execution.trigger_id,
                    execution.event_id,
                    execution.status.as_str(),
                    execution.start_time.to_rfc3339(),
                    execution.end_time.map(|t| t.to_rfc3339()),
                    execution.duration_ms,
                    result,
                    execution.error,
                    execution.retry_count as i64,
                    execution.next_retry_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(|e| storage("Save execution", e))?;
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> Result<Option<TriggerExecution>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EXECUTION_COLUMNS} FROM trigger_executions WHERE id = ?1"
            ))
            .map_err(|e| storage("Get execution", e))?;
        let mut rows = stmt
            .query_map([id], Self::row_to_execution)
            .map_err(|e| storage("Get execution", e))?;
        rows.next()
            .transpose()
            .map_err(|e| storage("Get execution", e))
    }

    async fn list_executions(&self, trigger_id: &str) -> Result<Vec<TriggerExecution>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EXECUTION_COLUMNS} FROM trigger_executions WHERE trigger_id = ?1 ORDER BY start_time"
            ))
            .map_err(|e| storage("List executions", e))?;
        stmt.query_map([trigger_id], Self::row_to_execution)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| storage("List executions", e))
    }
}

fn storage(context: &str, e: rusqlite::Error) -> LedgerClawError {
    LedgerClawError::Storage(format!("{context}: {e}"))
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_trigger_roundtrip() {
        let dir = std::env::temp_dir().join("ledgerclaw-test-sqlite-trigger");
        std::fs::remove_dir_all(&dir).ok();
        let store = SqliteStore::open(&dir.join("triggers.db")).unwrap();

        let hash: Hash160 = "0xd2a4cff31913016155e38e474a2c06d08be276cf".parse().unwrap();
        let mut trigger = Trigger::event("t1", hash, "Transfer", r#"{"type":"notify"}"#)
            .with_condition("event.amount > 100")
            .with_owner(hash);
        trigger.execution_count = 4;
        trigger.last_executed = Some(Utc::now());
        trigger.metadata.insert("label".into(), json!("whale watch"));
        store.save_trigger(&trigger).await.unwrap();

        let loaded = store.get_trigger("t1").await.unwrap().unwrap();
        assert_eq!(loaded.contract_hash, hash);
        assert_eq!(loaded.condition, "event.amount > 100");
        assert_eq!(loaded.execution_count, 4);
        assert_eq!(loaded.metadata["label"], "whale watch");
        assert_eq!(loaded.trigger_type, TriggerType::Event);

        assert_eq!(store.list_triggers(Some(&hash)).await.unwrap().len(), 1);
        assert!(store.list_triggers(Some(&Hash160::ZERO)).await.unwrap().is_empty());

        store.delete_trigger("t1").await.unwrap();
        assert!(store.get_trigger("t1").await.unwrap().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_execution_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut exec = TriggerExecution::new("t1", Some("evt-1"));
        exec.mark_running();
        exec.retry_count = 2;
        exec.complete(json!({"tx_hash": "0xabc"}));
        store.save_execution(&exec).await.unwrap();

        let loaded = store.get_execution(&exec.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert_eq!(loaded.retry_count, 2);
        assert_eq!(loaded.event_id.as_deref(), Some("evt-1"));
        assert_eq!(loaded.result, Some(json!({"tx_hash": "0xabc"})));

        assert_eq!(store.list_executions("t1").await.unwrap().len(), 1);
        assert!(store.list_executions("t2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_replaces() {
        let store = SqliteStore::open_in_memory().unwrap();
        let trigger = Trigger::schedule("s1", "@hourly", "{}");
        store.save_trigger(&trigger).await.unwrap();
        store
            .save_trigger(&trigger.clone().with_status(TriggerStatus::Inactive))
            .await
            .unwrap();
        let all = store.list_triggers(None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, TriggerStatus::Inactive);
    }
}
