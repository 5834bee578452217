//! Crate-wide error taxonomy.
//!
//! Component modules define their own focused error enums (`store::StoreError`,
//! `credentials::CredentialError`, `drivers::DriverError`) and this module composes
//! them into [`EngineError`] for anything that can legitimately escape an engine
//! invocation. Most component errors never reach this type: per-resource and
//! per-account failures are translated into counted outcomes instead (see
//! `orchestrator`), matching the propagation policy in the specification.

use thiserror::Error;

use crate::credentials::CredentialError;
use crate::store::StoreError;

/// Errors that can escape a single engine invocation.
///
/// Only a narrow slice of failures reach this type: a malformed top-level
/// configuration, or a store failure while inserting the initial execution
/// record. Everything else (credential failures, provider errors, per-resource
/// failures) is captured as data in the `InvocationResult` / `ExecutionRecord`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to load configuration: {0}")]
    ConfigLoad(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("schedule {0:?} not found")]
    ScheduleNotFound(ScheduleLookup),

    #[error("invocation budget exhausted after {0:?}")]
    Deadline(std::time::Duration),

    #[error("invocation was cancelled")]
    Cancelled,
}

/// How a partial-mode invocation tried to resolve its target schedule.
#[derive(Debug, Clone)]
pub enum ScheduleLookup {
    Id(String),
    Name(String),
}
