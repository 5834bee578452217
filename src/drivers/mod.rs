//! Resource drivers: one per cloud resource family, sharing a single contract.
//!
//! Every driver: (1) opens a family-specific client bound to the caller's
//! assumed credentials and the resource's region, (2) queries current state,
//! (3) decides whether the requested action is a no-op, (4) on a real mutation
//! captures the *pre-mutation* state in `last_state`, and (5) never propagates
//! an error — failures are reported as a `failed` [`PerResourceResult`] plus a
//! high-severity audit entry, so one bad resource never aborts a schedule.

pub mod asg;
pub mod docdb;
pub mod ecs;
pub mod rds;
pub mod vm;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::credentials::AssumedCredentials;
use crate::model::{Action, AuditDetails, AuditEntry, LastState, PerResourceResult, ResourceRef, ResourceStatus, Severity};

/// The action the orchestrator has already decided on, prior to the driver's own
/// idempotence check. Unlike [`Action`] this type has no `Skip` variant — only
/// the driver decides that, after observing current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredAction {
    Start,
    Stop,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    #[error("provider error: {0}")]
    Provider(String),
}

/// One driver call's outcome plus the audit entries it wants recorded. Drivers
/// don't hold a store handle — the orchestrator persists whatever is returned
/// here, keeping drivers free of I/O concerns beyond their own cloud client.
pub struct DriverOutcome {
    pub result: PerResourceResult,
    pub audit_entries: Vec<AuditEntry>,
}

#[async_trait]
pub trait ResourceDriver: Send + Sync {
    async fn process(
        &self,
        resource: &ResourceRef,
        action: DesiredAction,
        creds: &AssumedCredentials,
        account_id: &str,
        last_state: Option<LastState>,
        cancel: &CancellationToken,
    ) -> DriverOutcome;
}

/// Build the failed outcome + high-severity audit entry shared by every driver's
/// error path (spec: "on any error, emits an audit entry at severity=high").
fn failed_outcome(
    resource: &ResourceRef,
    action: Action,
    account_id: Option<String>,
    error: impl std::fmt::Display,
) -> DriverOutcome {
    let now = Utc::now();
    let message = error.to_string();
    DriverOutcome {
        result: PerResourceResult {
            arn: resource.arn.clone(),
            resource_id: resource.id.clone(),
            action,
            status: ResourceStatus::Failed,
            error: Some(message.clone()),
            last_state: None,
        },
        audit_entries: vec![AuditEntry::for_action(
            now,
            resource.resource_type,
            resource.id.clone(),
            action,
            ResourceStatus::Failed,
            Severity::High,
            AuditDetails::ActionError { message },
            account_id,
            resource.region().map(str::to_string),
        )],
    }
}

/// Build the success outcome + medium-severity audit entry shared by every
/// driver's mutation path.
fn success_outcome(
    resource: &ResourceRef,
    action: Action,
    account_id: Option<String>,
    from_state: Option<String>,
    to_state: String,
    last_state: Option<LastState>,
) -> DriverOutcome {
    let now = Utc::now();
    let severity = if action == Action::Skip { Severity::Low } else { Severity::Medium };
    DriverOutcome {
        result: PerResourceResult {
            arn: resource.arn.clone(),
            resource_id: resource.id.clone(),
            action,
            status: ResourceStatus::Success,
            error: None,
            last_state,
        },
        audit_entries: vec![AuditEntry::for_action(
            now,
            resource.resource_type,
            resource.id.clone(),
            action,
            ResourceStatus::Success,
            severity,
            AuditDetails::StateTransition { from_state, to_state },
            account_id,
            resource.region().map(str::to_string),
        )],
    }
}

/// A driver call that was cancelled mid-flight, per the cancellation contract
/// (spec §5: drivers return promptly with `status=failed, error=cancelled`).
fn cancelled_outcome(resource: &ResourceRef, action: Action, account_id: Option<String>) -> DriverOutcome {
    failed_outcome(resource, action, account_id, "cancelled")
}
