//! Error taxonomy for LedgerClaw.
//!
//! `LedgerClawError` is what crosses the public service boundary. Condition and
//! action failures have their own enums because they are produced per trigger
//! and never escape the dispatch path.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerClawError>;

/// Coarse classification for callers that map errors onto responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Invalid,
    Internal,
}

#[derive(Debug, Error)]
pub enum LedgerClawError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid trigger: {0}")]
    Validation(String),

    #[error("Trigger not found: {0}")]
    TriggerNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Trigger already exists: {0}")]
    AlreadyExists(String),

    #[error("Owner {owner} already holds the maximum of {limit} triggers")]
    QuotaExceeded { owner: String, limit: usize },

    #[error("Invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Trigger service is already running")]
    AlreadyRunning,

    #[error("Trigger service is not running")]
    NotRunning,

    #[error("Trigger service has been stopped")]
    Stopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LedgerClawError {
    /// Classify the error for a caller-facing layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TriggerNotFound(_) | Self::ExecutionNotFound(_) => ErrorKind::NotFound,
            Self::Config(_)
            | Self::Validation(_)
            | Self::AlreadyExists(_)
            | Self::QuotaExceeded { .. }
            | Self::InvalidSchedule { .. }
            | Self::Evaluation(_) => ErrorKind::Invalid,
            _ => ErrorKind::Internal,
        }
    }

    pub fn invalid_schedule(expression: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failures of the condition evaluator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvaluationError {
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("undefined reference: {0}")]
    UndefinedReference(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("condition did not evaluate to boolean: {0}")]
    NonBooleanResult(String),

    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("unsupported connective: {0}")]
    UnsupportedConnective(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),
}

/// Failures of a single action attempt.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActionError {
    #[error("failed to parse action config: {0}")]
    InvalidActionConfig(String),

    #[error("unsupported action type: {0}")]
    UnsupportedActionType(String),

    #[error("{0} parameter not found")]
    MissingParameter(String),

    #[error("invalid contract hash: {0}")]
    InvalidContractHash(String),

    #[error("transaction {tx_hash} not confirmed after {attempts} attempts")]
    TransactionNotConfirmed { tx_hash: String, attempts: u32 },

    #[error("webhook delivery failed (status {status:?}): {message}")]
    WebhookDelivery { status: Option<u16>, message: String },

    #[error("notification delivery failed: {0}")]
    NotificationDelivery(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("ledger request failed: {0}")]
    Ledger(String),

    #[error("{0} is not available")]
    Unavailable(String),

    #[error("execution timed out after {0}s")]
    Timeout(u64),
}

impl From<LedgerClawError> for ActionError {
    fn from(e: LedgerClawError) -> Self {
        ActionError::Ledger(e.to_string())
    }
}
