//! # LedgerClaw Core
//!
//! Shared vocabulary for the automation engine: triggers, events, execution
//! records, the capability traits the engine is composed from, the error
//! taxonomy and the engine configuration.

pub mod config;
pub mod error;
pub mod hash;
pub mod traits;
pub mod types;

pub use config::{EngineConfig, NotifyConfig};
pub use error::{ActionError, ErrorKind, EvaluationError, LedgerClawError, Result};
pub use hash::Hash160;
pub use types::{
    ActionConfig, ActionType, ContractInvocation, Event, ExecutionStatus, LedgerNotification,
    Notification, SignedTransaction, StackItem, Trigger, TriggerExecution, TriggerStatus,
    TriggerType,
};
