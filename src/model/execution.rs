//! Execution records: the per-schedule outcome document the orchestrator writes
//! once at the start of an invocation and once (merged) at the end.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use super::schedule::ResourceType;

/// The decision made for a single resource in a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Start,
    Stop,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Success,
    Failed,
}

/// Virtual-machine pre-mutation snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmLastState {
    pub instance_state: String,
    pub instance_type: Option<String>,
}

/// Relational DB / document DB pre-mutation snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbLastState {
    pub db_status: String,
}

/// Container service pre-mutation snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcsLastState {
    pub desired_count: i32,
    pub running_count: i32,
}

/// Auto-scaling group pre-mutation snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsgLastState {
    pub min_size: i32,
    pub max_size: i32,
    pub desired_capacity: i32,
}

/// Family-specific resource state, captured immediately before a mutating call.
///
/// Modeled as a tagged variant rather than a dynamically-typed map — each family's
/// shape is fixed and known at compile time, so there is no reason to pay for
/// dynamic field access the way the source system's heterogeneous result blobs do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum LastState {
    Vm(VmLastState),
    Db(DbLastState),
    Ecs(EcsLastState),
    Asg(AsgLastState),
}

/// The outcome of one driver call against one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerResourceResult {
    pub arn: String,
    pub resource_id: String,
    pub action: Action,
    pub status: ResourceStatus,
    pub error: Option<String>,
    /// Present whenever the driver observed the resource's state — on `skip` and
    /// `stop` this is always populated; on `start` it is the state handed in by
    /// the caller, echoed back for the audit trail.
    pub last_state: Option<LastState>,
}

/// Family-keyed arrays of per-resource results, matching the store's
/// `schedule_metadata` column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleMetadata {
    #[serde(default)]
    pub vm: Vec<PerResourceResult>,
    #[serde(default)]
    pub rds: Vec<PerResourceResult>,
    #[serde(default)]
    pub docdb: Vec<PerResourceResult>,
    #[serde(default)]
    pub ecs: Vec<PerResourceResult>,
    #[serde(default)]
    pub asg: Vec<PerResourceResult>,
}

impl ScheduleMetadata {
    pub fn push(&mut self, resource_type: ResourceType, result: PerResourceResult) {
        match resource_type {
            ResourceType::Vm => self.vm.push(result),
            ResourceType::Rds => self.rds.push(result),
            ResourceType::Docdb => self.docdb.push(result),
            ResourceType::Ecs => self.ecs.push(result),
            ResourceType::Asg => self.asg.push(result),
        }
    }

    /// Fold another family-keyed batch of results into this one, preserving order
    /// within each family (used to combine per-account results fanned out
    /// concurrently back into one schedule-level document).
    pub fn merge(&mut self, other: Self) {
        self.vm.extend(other.vm);
        self.rds.extend(other.rds);
        self.docdb.extend(other.docdb);
        self.ecs.extend(other.ecs);
        self.asg.extend(other.asg);
    }

    pub fn all(&self) -> impl Iterator<Item = &PerResourceResult> {
        self.vm
            .iter()
            .chain(self.rds.iter())
            .chain(self.docdb.iter())
            .chain(self.ecs.iter())
            .chain(self.asg.iter())
    }

    pub fn total_count(&self) -> u32 {
        self.all().count() as u32
    }

    pub fn failed_count(&self) -> u32 {
        self.all().filter(|r| r.status == ResourceStatus::Failed).count() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Partial,
}

/// Classify the terminal status of a finished run from its aggregate counts.
/// `total_count == 0` is always `Success` (an empty schedule is a no-op success).
pub fn terminal_status(failed_count: u32, total_count: u32) -> ExecutionStatus {
    if total_count == 0 {
        ExecutionStatus::Success
    } else if failed_count == total_count {
        ExecutionStatus::Failed
    } else if failed_count > 0 {
        ExecutionStatus::Partial
    } else {
        ExecutionStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    System,
    Web,
}

/// The per-schedule outcome document. Written once (`pending`) at the start of an
/// invocation and merge-updated once at the end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub schedule_id: String,
    pub tenant_id: String,
    /// `None` once a schedule spans multiple accounts — the record is keyed by
    /// schedule, not by account (see `DESIGN.md`).
    pub account_id: Option<String>,
    pub status: ExecutionStatus,
    pub triggered_by: TriggeredBy,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub resources_started: u32,
    pub resources_stopped: u32,
    pub resources_failed: u32,
    pub error_message: Option<String>,
    pub schedule_metadata: ScheduleMetadata,
    pub ttl: DateTime<Utc>,
}

impl ExecutionRecord {
    pub const RETENTION: ChronoDuration = ChronoDuration::days(30);

    /// Construct the initial `pending` record for a new invocation.
    pub fn pending(
        execution_id: String,
        schedule_id: String,
        tenant_id: String,
        account_id: Option<String>,
        triggered_by: TriggeredBy,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id,
            schedule_id,
            tenant_id,
            account_id,
            status: ExecutionStatus::Pending,
            triggered_by,
            start_time,
            end_time: None,
            duration_ms: None,
            resources_started: 0,
            resources_stopped: 0,
            resources_failed: 0,
            error_message: None,
            schedule_metadata: ScheduleMetadata::default(),
            ttl: start_time + Self::RETENTION,
        }
    }

    /// Merge in the terminal outcome, deriving `status` from the aggregated counts.
    pub fn finish(
        &mut self,
        end_time: DateTime<Utc>,
        resources_started: u32,
        resources_stopped: u32,
        schedule_metadata: ScheduleMetadata,
        error_message: Option<String>,
    ) {
        let failed_count = schedule_metadata.failed_count();
        let total_count = schedule_metadata.total_count();
        self.status = terminal_status(failed_count, total_count);
        self.end_time = Some(end_time);
        self.duration_ms = Some((end_time - self.start_time).num_milliseconds());
        self.resources_started = resources_started;
        self.resources_stopped = resources_stopped;
        self.resources_failed = failed_count;
        self.schedule_metadata = schedule_metadata;
        self.error_message = error_message;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_run_is_success() {
        assert_eq!(terminal_status(0, 0), ExecutionStatus::Success);
    }

    #[test]
    fn all_failed_is_failed() {
        assert_eq!(terminal_status(3, 3), ExecutionStatus::Failed);
    }

    #[test]
    fn some_failed_is_partial() {
        assert_eq!(terminal_status(1, 3), ExecutionStatus::Partial);
    }

    #[test]
    fn none_failed_is_success() {
        assert_eq!(terminal_status(0, 3), ExecutionStatus::Success);
    }

    #[test]
    fn finish_sets_end_time_ge_start_time() {
        let start = DateTime::parse_from_rfc3339("2026-07-27T09:00:00Z").unwrap().with_timezone(&Utc);
        let mut record = ExecutionRecord::pending(
            "exec-1".into(),
            "sch-1".into(),
            "default".into(),
            None,
            TriggeredBy::System,
            start,
        );
        assert_eq!(record.ttl, start + ExecutionRecord::RETENTION);

        let end = start + ChronoDuration::seconds(5);
        record.finish(end, 1, 0, ScheduleMetadata::default(), None);
        assert!(record.end_time.unwrap() >= record.start_time);
        assert_eq!(record.status, ExecutionStatus::Success);
    }
}
