//! Trigger definitions — the core data model for automation rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ActionError;
use crate::hash::Hash160;

/// How a trigger fires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    /// Fires on ledger notifications.
    Event,
    /// Fires on a cron schedule.
    Schedule,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerType::Event => write!(f, "event"),
            TriggerType::Schedule => write!(f, "schedule"),
        }
    }
}

/// Trigger status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerStatus {
    #[default]
    Active,
    Inactive,
    Failed,
}

impl TriggerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerStatus::Active => "active",
            TriggerStatus::Inactive => "inactive",
            TriggerStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Execution status. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A user-owned automation rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trigger {
    /// Unique trigger ID.
    pub id: String,
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    /// Contract whose notifications are monitored (event triggers).
    #[serde(default)]
    pub contract_hash: Hash160,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub event_name: String,
    /// Cron expression (schedule triggers).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schedule: String,
    /// Condition expression; empty means always true.
    #[serde(default)]
    pub condition: String,
    /// JSON-encoded action configuration.
    pub action: String,
    #[serde(default)]
    pub owner: Hash160,
    #[serde(default)]
    pub status: TriggerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Trigger {
    /// Create an active event trigger.
    pub fn event(id: &str, contract_hash: Hash160, event_name: &str, action: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            trigger_type: TriggerType::Event,
            contract_hash,
            event_name: event_name.to_string(),
            schedule: String::new(),
            condition: String::new(),
            action: action.to_string(),
            owner: Hash160::ZERO,
            status: TriggerStatus::Active,
            created_at: now,
            updated_at: now,
            last_executed: None,
            execution_count: 0,
            metadata: Map::new(),
        }
    }

    /// Create an active schedule trigger.
    pub fn schedule(id: &str, schedule: &str, action: &str) -> Self {
        let mut trigger = Self::event(id, Hash160::ZERO, "", action);
        trigger.trigger_type = TriggerType::Schedule;
        trigger.schedule = schedule.to_string();
        trigger
    }

    pub fn with_condition(mut self, condition: &str) -> Self {
        self.condition = condition.to_string();
        self
    }

    pub fn with_owner(mut self, owner: Hash160) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_status(mut self, status: TriggerStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == TriggerStatus::Active
    }

    /// Whether this trigger reacts to the given ledger event.
    pub fn matches(&self, event: &Event) -> bool {
        self.trigger_type == TriggerType::Event
            && self.is_active()
            && self.contract_hash == event.contract_hash
            && self.event_name == event.name
    }

    /// Whether this trigger should hold a live cron entry.
    pub fn wants_schedule(&self) -> bool {
        self.trigger_type == TriggerType::Schedule && self.is_active()
    }
}

/// An observed ledger notification or a synthetic schedule tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub contract_hash: Hash160,
    pub name: String,
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Event name used for synthesized schedule firings.
    pub const SCHEDULED: &'static str = "scheduled";
    /// Event name used for on-demand runs.
    pub const MANUAL: &'static str = "manual";

    pub fn new(contract_hash: Hash160, name: &str, data: Map<String, Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            contract_hash,
            name: name.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Nominal event for a cron firing of `trigger`.
    pub fn scheduled(trigger: &Trigger) -> Self {
        Self::new(trigger.contract_hash, Self::SCHEDULED, Map::new())
    }

    pub fn manual(trigger: &Trigger) -> Self {
        Self::new(trigger.contract_hash, Self::MANUAL, Map::new())
    }

    pub fn is_scheduled(&self) -> bool {
        self.name == Self::SCHEDULED
    }
}

/// One attempt-sequence of a trigger reacting to one event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerExecution {
    pub id: String,
    pub trigger_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl TriggerExecution {
    /// New pending execution with a fresh UUID.
    pub fn new(trigger_id: &str, event_id: Option<&str>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            trigger_id: trigger_id.to_string(),
            event_id: event_id.map(str::to_string),
            status: ExecutionStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: 0,
            result: None,
            error: None,
            retry_count: 0,
            next_retry_at: None,
        }
    }

    /// Pending → Running. Returns false if the transition is not allowed.
    pub fn mark_running(&mut self) -> bool {
        if self.status != ExecutionStatus::Pending {
            return false;
        }
        self.status = ExecutionStatus::Running;
        true
    }

    pub fn complete(&mut self, result: Value) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = ExecutionStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.finish();
        true
    }

    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.into());
        self.finish();
        true
    }

    fn finish(&mut self) {
        let end = Utc::now();
        self.end_time = Some(end);
        self.duration_ms = (end - self.start_time).num_milliseconds();
        self.next_retry_at = None;
    }
}

/// Known action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    ContractCall,
    Webhook,
    Notify,
}

impl ActionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "contract_call" => Some(Self::ContractCall),
            "webhook" => Some(Self::Webhook),
            "notify" => Some(Self::Notify),
            _ => None,
        }
    }
}

/// Decoded `Trigger::action`: `{ "type": ..., "parameters": {...} }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionConfig {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ActionConfig {
    pub fn parse(raw: &str) -> Result<Self, ActionError> {
        serde_json::from_str(raw).map_err(|e| ActionError::InvalidActionConfig(e.to_string()))
    }

    /// The recognised action kind.
    pub fn kind(&self) -> Result<ActionType, ActionError> {
        ActionType::parse(&self.action_type)
            .ok_or_else(|| ActionError::UnsupportedActionType(self.action_type.clone()))
    }

    pub fn str_param(&self, name: &str) -> Result<&str, ActionError> {
        self.parameters
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::MissingParameter(name.to_string()))
    }
}

/// Structured notification payload as stored on the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum StackItem {
    Any,
    Boolean(bool),
    Integer(i128),
    ByteString(Vec<u8>),
    Buffer(Vec<u8>),
    Array(Vec<StackItem>),
    Struct(Vec<StackItem>),
    Map(Vec<(StackItem, StackItem)>),
    Pointer(u32),
    InteropInterface,
}

impl StackItem {
    pub fn type_name(&self) -> &'static str {
        match self {
            StackItem::Any => "Any",
            StackItem::Boolean(_) => "Boolean",
            StackItem::Integer(_) => "Integer",
            StackItem::ByteString(_) => "ByteString",
            StackItem::Buffer(_) => "Buffer",
            StackItem::Array(_) => "Array",
            StackItem::Struct(_) => "Struct",
            StackItem::Map(_) => "Map",
            StackItem::Pointer(_) => "Pointer",
            StackItem::InteropInterface => "InteropInterface",
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            StackItem::ByteString(b) | StackItem::Buffer(b) => Some(b),
            _ => None,
        }
    }
}

/// A raw contract notification read from a block.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerNotification {
    pub contract_hash: Hash160,
    pub event_name: String,
    pub state: StackItem,
    pub container: Option<String>,
}

/// An unsigned on-chain method invocation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContractInvocation {
    pub contract_hash: Hash160,
    pub method: String,
    pub args: Vec<Value>,
    pub signer: Hash160,
    pub network_magic: u32,
}

/// A signed transaction ready for submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    pub hash: String,
    pub raw: Vec<u8>,
}

/// A notification handed to a notification sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Delivery kind requested by the trigger ("email", "telegram", ...).
    pub kind: String,
    pub message: String,
    /// Which trigger produced this.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: &str, message: &str, source: &str) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.to_string(),
            source: source.to_string(),
            event_id: None,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_json_shape() {
        let trigger = Trigger::event("t1", Hash160::ZERO, "Transfer", r#"{"type":"notify"}"#)
            .with_condition("event.amount > 100");
        let json = serde_json::to_value(&trigger).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["status"], "active");
        assert_eq!(json["event_name"], "Transfer");
        assert!(json.get("schedule").is_none());

        let back: Trigger = serde_json::from_value(json).unwrap();
        assert_eq!(back, trigger);
    }

    #[test]
    fn test_execution_terminal_states_are_final() {
        let mut exec = TriggerExecution::new("t1", Some("e1"));
        assert!(exec.mark_running());
        assert!(!exec.mark_running());
        assert!(exec.complete(Value::Null));
        assert!(!exec.fail("late"));
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert!(exec.error.is_none());
        assert!(exec.end_time.is_some());
    }

    #[test]
    fn test_execution_ids_are_unique() {
        let a = TriggerExecution::new("t", None);
        let b = TriggerExecution::new("t", None);
        assert_ne!(a.id, b.id);
        assert!(uuid::Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn test_matches_requires_active_event_trigger() {
        let hash: Hash160 = "0x0000000000000000000000000000000000000abc".parse().unwrap();
        let trigger = Trigger::event("t", hash, "Transfer", "{}");
        let event = Event::new(hash, "Transfer", Map::new());
        assert!(trigger.matches(&event));
        assert!(!trigger.clone().with_status(TriggerStatus::Inactive).matches(&event));
        assert!(!trigger.matches(&Event::new(hash, "Mint", Map::new())));
        assert!(!trigger.matches(&Event::new(Hash160::ZERO, "Transfer", Map::new())));
    }

    #[test]
    fn test_action_config_kind() {
        let cfg = ActionConfig::parse(r#"{"type":"webhook","parameters":{"url":"http://x"}}"#).unwrap();
        assert_eq!(cfg.kind().unwrap(), ActionType::Webhook);
        assert_eq!(cfg.str_param("url").unwrap(), "http://x");
        assert_eq!(
            cfg.str_param("method"),
            Err(ActionError::MissingParameter("method".into()))
        );

        let bad = ActionConfig::parse(r#"{"type":"email"}"#).unwrap();
        assert_eq!(
            bad.kind(),
            Err(ActionError::UnsupportedActionType("email".into()))
        );
        assert!(matches!(
            ActionConfig::parse("not json"),
            Err(ActionError::InvalidActionConfig(_))
        ));
    }
}
