//! # LedgerClaw Scheduler
//!
//! Time-driven trigger source, trigger persistence and notification routing.
//!
//! ## Architecture
//! ```text
//! CronScheduler (one tokio driver per schedule trigger)
//!   ├── "*/5 * * * *"      → every 5 minutes
//!   ├── "0 0 8 * * Mon-Fri" → weekdays at 08:00:00
//!   ├── "@every 90s"       → fixed interval
//!   └── on firing → ScheduleHandler (trigger service execute-with-retry)
//!
//! Stores
//!   ├── SqliteStore  — survives restarts
//!   └── MemoryStore  — tests and ephemeral runs
//!
//! NotifyRouter (NotificationSink)
//!   ├── Telegram (sendMessage)
//!   ├── Discord (webhook)
//!   ├── Webhook (HTTP POST)
//!   └── Dashboard / log
//! ```

pub mod dispatch;
pub mod engine;
pub mod notify;
pub mod persistence;
pub mod schedule;
pub mod store;

pub use dispatch::NotifyTarget;
pub use engine::CronScheduler;
pub use notify::NotifyRouter;
pub use persistence::SqliteStore;
pub use schedule::{ScheduleSpec, parse_schedule};
pub use store::MemoryStore;
