//! # LedgerClaw Engine
//!
//! The trigger-processing engine: watches the ledger for contract
//! notifications, matches them (or cron firings) against triggers, gates them
//! on a condition and runs the configured action with bounded retry.
//!
//! ## Architecture
//! ```text
//! RpcLedgerClient ─► EventPoller ─► queue ─┐
//! CronScheduler ───────────────────────────┤
//!                                          ▼
//!                                   TriggerService
//!                                   ├── ExprEvaluator   (condition)
//!                                   ├── ActionDispatcher (contract_call | webhook | notify)
//!                                   ├── TriggerStore    (SQLite / memory)
//!                                   └── TracingMetrics
//! ```

pub mod actions;
pub mod condition;
pub mod metrics;
pub mod poller;
pub mod rpc;
pub mod service;

pub use actions::{ActionDispatcher, Confirmation};
pub use condition::{ExprEvaluator, condition_holds};
pub use metrics::{MetricsSnapshot, NoopMetrics, TracingMetrics};
pub use poller::EventPoller;
pub use rpc::RpcLedgerClient;
pub use service::{TriggerService, TriggerServiceBuilder, validate_trigger};
