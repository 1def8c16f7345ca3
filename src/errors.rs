//! Typed error hierarchy for SplitFair.
//!
//! One enum per subsystem:
//! - `BackendError` - record store and change feed failures
//! - `SyncError` - live list synchronization failures
//! - `PenaltyError` - penalty point bookkeeping
//! - `RegistrationError` - registration wizard validation
//! - `HomeSetupError` - create/join home flows
//! - `ExpenseError` - expense splitting

use thiserror::Error;

use crate::registration::{Field, RegistrationStep};

/// Errors from the backend boundary (storage, RPC, change feed).
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Backend returned status {status} for {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode {table} row: {source}")]
    Decode {
        table: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Row {id} not found in {table}")]
    NotFound { table: String, id: String },

    #[error("Unknown RPC function '{0}'")]
    UnknownRpc(String),

    #[error("Subscription to {table} refused: {reason}")]
    SubscribeRefused { table: String, reason: String },

    #[error("Backend state lock poisoned")]
    LockPoisoned,

    #[error("Injected failure: {0}")]
    Injected(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from live list synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Initial fetch for {scope} failed: {source}")]
    InitialFetch {
        scope: String,
        #[source]
        source: BackendError,
    },

    #[error("Refetch for {scope} failed: {source}")]
    Refetch {
        scope: String,
        #[source]
        source: BackendError,
    },

    #[error("Failed to open channel for {scope}: {source}")]
    Subscribe {
        scope: String,
        #[source]
        source: BackendError,
    },

    #[error("Change payload for {table} could not be decoded: {message}")]
    ChangeDecode { table: String, message: String },
}

/// Errors from penalty point bookkeeping.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PenaltyError {
    #[error("Penalty points must not be negative (got {delta} for {person})")]
    NegativeDelta { person: String, delta: i64 },
}

/// Errors from the registration wizard.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("{} field(s) invalid on the {step} step", .errors.len())]
    Invalid {
        step: RegistrationStep,
        errors: Vec<(Field, String)>,
    },

    #[error("Registration can only be finished from the review step (currently on {0})")]
    NotReady(RegistrationStep),
}

/// Errors from creating or joining a home.
#[derive(Debug, Error)]
pub enum HomeSetupError {
    #[error("Invite code '{0}' is not a valid code")]
    InvalidInviteCode(String),

    #[error("Home name must not be empty")]
    EmptyHomeName,

    #[error("No home uses invite code {0}")]
    UnknownInviteCode(String),

    #[error("All {} strategies for {operation} failed: {}", .attempts.len(), summarize(.attempts))]
    Exhausted {
        operation: String,
        attempts: Vec<(String, BackendError)>,
    },
}

fn summarize(attempts: &[(String, BackendError)]) -> String {
    attempts
        .iter()
        .map(|(name, err)| format!("{}: {}", name, err))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from expense splitting.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExpenseError {
    #[error("Expense has no participants")]
    NoParticipants,

    #[error("Expense amount must be positive (got {0} cents)")]
    NonPositiveAmount(i64),

    #[error("Split shares sum to {actual} cents but the expense is {expected} cents")]
    SumMismatch { expected: i64, actual: i64 },

    #[error("Share for {0} is negative")]
    NegativeShare(String),

    #[error("Invalid amount '{0}'")]
    InvalidAmount(String),
}
