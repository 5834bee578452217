//! Domain entities: schedules, accounts, execution records, and audit entries.
//!
//! These types carry no behavior beyond small invariant checks — the engine logic
//! that acts on them lives in [`crate::time`], [`crate::drivers`], and
//! [`crate::orchestrator`].

pub mod account;
pub mod audit;
pub mod execution;
pub mod schedule;

pub use account::Account;
pub use audit::{AuditDetails, AuditEntry, Severity};
pub use execution::{
    terminal_status, Action, AsgLastState, DbLastState, EcsLastState, ExecutionRecord, ExecutionStatus,
    LastState, PerResourceResult, ResourceStatus, ScheduleMetadata, TriggeredBy, VmLastState,
};
pub use schedule::{ResourceRef, ResourceType, Schedule, ScheduleError};
