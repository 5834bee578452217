//! Append-only audit trail.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::execution::{Action, ResourceStatus};
use super::schedule::ResourceType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Typed audit payload, one variant per kind of event the engine can record.
///
/// Kept as a tagged enum rather than a free-form string or `serde_json::Value`
/// blob: every event the engine emits is one of a small, known set, and a typed
/// payload means a reader of the audit log never has to guess a field's shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditDetails {
    /// A resource's state was observed to change (or was confirmed unchanged).
    StateTransition {
        from_state: Option<String>,
        to_state: String,
    },
    /// A driver call failed.
    ActionError { message: String },
    /// Credential assumption failed for an account.
    CredentialFailure { role_arn: String, reason: String },
    /// The store's primary index was unavailable or empty; the fallback index was used.
    StoreFallbackUsed { operation: String },
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub action: Option<Action>,
    pub resource_type: Option<ResourceType>,
    pub resource_id: Option<String>,
    pub status: Option<ResourceStatus>,
    pub severity: Severity,
    pub details: AuditDetails,
    pub account_id: Option<String>,
    pub region: Option<String>,
    pub ttl: DateTime<Utc>,
}

impl AuditEntry {
    pub const RETENTION: ChronoDuration = ChronoDuration::days(90);

    /// Build an entry for a successful driver action, event type
    /// `scheduler.<family>.<action>` (e.g. `scheduler.vm.start`).
    pub fn for_action(
        now: DateTime<Utc>,
        resource_type: ResourceType,
        resource_id: String,
        action: Action,
        status: ResourceStatus,
        severity: Severity,
        details: AuditDetails,
        account_id: Option<String>,
        region: Option<String>,
    ) -> Self {
        let family = match resource_type {
            ResourceType::Vm => "vm",
            ResourceType::Rds => "rds",
            ResourceType::Docdb => "docdb",
            ResourceType::Ecs => "ecs",
            ResourceType::Asg => "asg",
        };
        let verb = match action {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Skip => "skip",
        };
        Self {
            id: Uuid::new_v4(),
            timestamp: now,
            event_type: format!("scheduler.{family}.{verb}"),
            action: Some(action),
            resource_type: Some(resource_type),
            resource_id: Some(resource_id),
            status: Some(status),
            severity,
            details,
            account_id,
            region,
            ttl: now + Self::RETENTION,
        }
    }

    /// Build an entry for a failure that is not attached to a specific resource
    /// (e.g. a credential assumption failure for an entire account).
    pub fn for_account_failure(
        now: DateTime<Utc>,
        event_type: impl Into<String>,
        details: AuditDetails,
        account_id: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: now,
            event_type: event_type.into(),
            action: None,
            resource_type: None,
            resource_id: None,
            status: None,
            severity: Severity::High,
            details,
            account_id: Some(account_id),
            region: None,
            ttl: now + Self::RETENTION,
        }
    }
}
