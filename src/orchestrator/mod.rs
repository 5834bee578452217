//! The top-level engine. Chooses full vs partial mode, fans out over
//! `(schedule × account × resource)`, calls drivers, aggregates results, writes
//! the execution record and audit log, and returns a summary.

mod audit;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::credentials::{AssumedCredentials, CredentialBroker};
use crate::drivers::{asg, docdb, ecs, rds, vm, DesiredAction, DriverOutcome, ResourceDriver};
use crate::error::{EngineError, ScheduleLookup};
use crate::model::{
    Account, Action, AuditDetails, AuditEntry, ExecutionRecord, PerResourceResult, ResourceRef, ResourceStatus,
    ResourceType, Schedule, ScheduleMetadata, TriggeredBy,
};
use crate::store::StoreAdapter;
use crate::time;

use self::audit::AuditWriter;

/// The invocation's selected mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Full,
    Partial,
}

/// Engine invocation input.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvocationPayload {
    pub schedule_id: Option<String>,
    pub schedule_name: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub triggered_by: Option<TriggeredBy>,
    /// Bypasses the time-window gate only; each driver's own desired-state check
    /// is unaffected (DESIGN.md, open question resolution).
    #[serde(default)]
    pub force: bool,
}

impl InvocationPayload {
    fn tenant(&self) -> String {
        self.tenant_id.clone().unwrap_or_else(|| "default".to_string())
    }

    fn triggered_by(&self) -> TriggeredBy {
        self.triggered_by.unwrap_or(TriggeredBy::System)
    }
}

/// Engine invocation summary.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationResult {
    pub success: bool,
    pub execution_id: String,
    pub mode: Mode,
    pub schedules_processed: u32,
    pub resources_started: u32,
    pub resources_stopped: u32,
    pub resources_failed: u32,
    pub duration_ms: i64,
    pub errors: Vec<String>,
}

/// Maps each resource family to the driver that handles it. Injected rather than
/// hardwired so tests can substitute fakes without touching a real cloud provider.
pub type DriverMap = HashMap<ResourceType, Arc<dyn ResourceDriver>>;

/// The five out-of-the-box AWS-backed drivers, keyed by family.
pub fn default_drivers() -> DriverMap {
    let mut map: DriverMap = HashMap::new();
    map.insert(ResourceType::Vm, Arc::new(vm::VmDriver::new()));
    map.insert(ResourceType::Rds, Arc::new(rds::RdsDriver::new()));
    map.insert(ResourceType::Docdb, Arc::new(docdb::DocdbDriver::new()));
    map.insert(ResourceType::Ecs, Arc::new(ecs::EcsDriver::new()));
    map.insert(ResourceType::Asg, Arc::new(asg::AsgDriver::new()));
    map
}

/// The per-schedule outcome accumulated while fanning out over its accounts.
#[derive(Default)]
struct ScheduleOutcome {
    metadata: ScheduleMetadata,
    started: u32,
    stopped: u32,
}

/// The top-level engine.
pub struct Orchestrator {
    store: Arc<dyn StoreAdapter>,
    credentials: Arc<dyn CredentialBroker>,
    drivers: DriverMap,
    config: EngineConfig,
    account_semaphore: Arc<Semaphore>,
    resource_semaphore: Arc<Semaphore>,
}

impl Orchestrator {
    /// Build an engine with an explicit driver map. Production callers should
    /// use [`Orchestrator::with_default_drivers`]; tests substitute fakes here.
    pub fn new(
        store: Arc<dyn StoreAdapter>,
        credentials: Arc<dyn CredentialBroker>,
        drivers: DriverMap,
        config: EngineConfig,
    ) -> Self {
        Self {
            account_semaphore: Arc::new(Semaphore::new(config.max_concurrent_accounts)),
            resource_semaphore: Arc::new(Semaphore::new(config.max_concurrent_resources)),
            store,
            credentials,
            drivers,
            config,
        }
    }

    /// Build an engine wired to the five out-of-the-box AWS-backed drivers.
    pub fn with_default_drivers(
        store: Arc<dyn StoreAdapter>,
        credentials: Arc<dyn CredentialBroker>,
        config: EngineConfig,
    ) -> Self {
        Self::new(store, credentials, default_drivers(), config)
    }

    /// Run one invocation of the engine.
    pub async fn run(&self, payload: InvocationPayload, cancel: CancellationToken) -> Result<InvocationResult, EngineError> {
        let start = Instant::now();
        let tenant = payload.tenant();
        let mode = if payload.schedule_id.is_some() || payload.schedule_name.is_some() {
            Mode::Partial
        } else {
            Mode::Full
        };

        tracing::info!(mode = ?mode, tenant = %tenant, "invocation starting");

        let deadline_token = cancel.child_token();
        let deadline_guard = {
            let deadline_token = deadline_token.clone();
            let budget = self.config.invocation_budget;
            tokio::spawn(async move {
                tokio::time::sleep(budget).await;
                deadline_token.cancel();
            })
        };

        let (audit_writer, audit_handle) = AuditWriter::spawn(self.store.clone());

        let (schedules, accounts) = tokio::try_join!(
            self.resolve_schedules(&payload, &tenant, mode),
            async { self.store.list_active_accounts(&tenant).await.map_err(EngineError::Store) },
        )?;
        let accounts_by_id: HashMap<&str, &Account> = accounts.iter().map(|a| (a.account_id.as_str(), a)).collect();

        let mut errors = Vec::new();
        let mut schedules_processed = 0u32;
        let mut resources_started = 0u32;
        let mut resources_stopped = 0u32;
        let mut resources_failed = 0u32;
        let execution_id = Uuid::new_v4().to_string();

        for schedule in &schedules {
            match self
                .process_schedule(
                    schedule,
                    &tenant,
                    &accounts_by_id,
                    payload.force,
                    payload.triggered_by(),
                    &audit_writer,
                    &deadline_token,
                )
                .await
            {
                Ok(outcome) => {
                    schedules_processed += 1;
                    resources_started += outcome.started;
                    resources_stopped += outcome.stopped;
                    resources_failed += outcome.metadata.failed_count();
                }
                Err(message) => errors.push(message),
            }
        }

        deadline_guard.abort();
        drop(audit_writer);
        let _ = audit_handle.await;

        let duration_ms = start.elapsed().as_millis() as i64;
        tracing::info!(
            schedules_processed,
            resources_started,
            resources_stopped,
            resources_failed,
            duration_ms,
            "invocation finished"
        );

        Ok(InvocationResult {
            success: errors.is_empty() && resources_failed == 0,
            execution_id,
            mode,
            schedules_processed,
            resources_started,
            resources_stopped,
            resources_failed,
            duration_ms,
            errors,
        })
    }

    async fn resolve_schedules(
        &self,
        payload: &InvocationPayload,
        tenant: &str,
        mode: Mode,
    ) -> Result<Vec<Schedule>, EngineError> {
        match mode {
            Mode::Full => self.store.list_active_schedules(tenant).await.map_err(EngineError::Store),
            Mode::Partial => {
                if let Some(id) = &payload.schedule_id {
                    let schedule = self
                        .store
                        .get_schedule(id, tenant)
                        .await
                        .map_err(EngineError::Store)?
                        .ok_or_else(|| EngineError::ScheduleNotFound(ScheduleLookup::Id(id.clone())))?;
                    Ok(vec![schedule])
                } else {
                    let name = payload.schedule_name.as_ref().expect("partial mode requires id or name");
                    let schedule = self
                        .store
                        .get_schedule_by_name(name, tenant)
                        .await
                        .map_err(EngineError::Store)?
                        .ok_or_else(|| EngineError::ScheduleNotFound(ScheduleLookup::Name(name.clone())))?;
                    Ok(vec![schedule])
                }
            }
        }
    }

    /// Process one schedule across all the accounts its resources reference.
    /// Returns `Err(message)` only when the initial execution-record insert
    /// fails — every other failure is captured as per-resource/per-account data.
    async fn process_schedule(
        &self,
        schedule: &Schedule,
        tenant: &str,
        accounts_by_id: &HashMap<&str, &Account>,
        force: bool,
        triggered_by: TriggeredBy,
        audit_writer: &AuditWriter,
        deadline: &CancellationToken,
    ) -> Result<ScheduleOutcome, String> {
        let start_time = Utc::now();
        let execution_id = Uuid::new_v4().to_string();
        let mut record = ExecutionRecord::pending(
            execution_id.clone(),
            schedule.id.clone(),
            tenant.to_string(),
            None,
            triggered_by,
            start_time,
        );

        if let Err(e) = self.store.write_execution_record(&record).await {
            return Err(format!("schedule {}: failed to open execution record: {e}", schedule.id));
        }

        let window = match schedule.time_window() {
            Ok(window) => window,
            Err(e) => {
                audit_writer.record(AuditEntry::for_account_failure(
                    Utc::now(),
                    "scheduler.config.invalid_schedule",
                    AuditDetails::ActionError { message: e.to_string() },
                    tenant.to_string(),
                ));
                return Err(format!("schedule {}: invalid time window: {e}", schedule.id));
            }
        };

        let in_window = force || time::evaluate(&window, Utc::now());
        let action = if in_window { DesiredAction::Start } else { DesiredAction::Stop };
        tracing::debug!(schedule_id = %schedule.id, ?action, force, "time window decision");

        let mut outcome = ScheduleOutcome::default();

        // Across accounts within a schedule: concurrent, bounded by `account_semaphore`
        // (SPEC_FULL.md §5). Each account's resource fan-out runs in its own task so one
        // account's credential wait or driver latency doesn't hold up the next.
        let mut handles = Vec::new();

        for account_id in schedule.account_ids() {
            if deadline.is_cancelled() {
                self.record_deadline_failures(schedule, account_id, action, &mut outcome);
                continue;
            }

            let Some(account) = accounts_by_id.get(account_id).copied() else {
                audit_writer.record(AuditEntry::for_account_failure(
                    Utc::now(),
                    "scheduler.credentials.unknown_account",
                    AuditDetails::CredentialFailure {
                        role_arn: String::new(),
                        reason: "account not found or inactive".into(),
                    },
                    account_id.to_string(),
                ));
                continue;
            };

            let account = account.clone();
            let account_id = account_id.to_string();
            let region = self.region_for(&account);
            let account_semaphore = self.account_semaphore.clone();
            let resource_semaphore = self.resource_semaphore.clone();
            let credentials = self.credentials.clone();
            let drivers = self.drivers.clone();
            let store = self.store.clone();
            let schedule = schedule.clone();
            let audit_writer = audit_writer.clone();
            let deadline = deadline.clone();

            handles.push(tokio::spawn(async move {
                let _permit = account_semaphore.acquire_owned().await.expect("semaphore not closed");

                let creds = match credentials.assume(&account, &region).await {
                    Ok(creds) => creds,
                    Err(e) => {
                        audit_writer.record(AuditEntry::for_account_failure(
                            Utc::now(),
                            "scheduler.credentials.assume_failed",
                            AuditDetails::CredentialFailure {
                                role_arn: account.role_arn.clone(),
                                reason: e.to_string(),
                            },
                            account_id.clone(),
                        ));
                        return ScheduleOutcome::default();
                    }
                };

                Self::process_account(drivers, store, resource_semaphore, &schedule, &account_id, &creds, action, &audit_writer, &deadline)
                    .await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(partial) => {
                    outcome.started += partial.started;
                    outcome.stopped += partial.stopped;
                    outcome.metadata.merge(partial.metadata);
                }
                Err(e) => tracing::error!(error = %e, "account task panicked"),
            }
        }

        let error_message = if outcome.metadata.failed_count() > 0 {
            Some(format!("{} resource(s) failed", outcome.metadata.failed_count()))
        } else {
            None
        };
        record.finish(Utc::now(), outcome.started, outcome.stopped, outcome.metadata.clone(), error_message);
        if let Err(e) = self.store.update_execution_record(&record).await {
            tracing::warn!(schedule_id = %schedule.id, error = %e, "failed to close execution record; left running for TTL collection");
        }

        Ok(outcome)
    }

    fn region_for(&self, account: &Account) -> String {
        account.regions.first().cloned().unwrap_or_else(|| self.config.region.clone())
    }

    fn record_deadline_failures(&self, schedule: &Schedule, account_id: &str, action: DesiredAction, outcome: &mut ScheduleOutcome) {
        for resource in &schedule.resources {
            if resource.account_id() != Some(account_id) {
                continue;
            }
            push_failed(outcome, resource, action, "deadline".to_string());
        }
    }

    /// Dispatch every resource of `schedule` owned by `account_id`, bounded by
    /// `resource_semaphore`, and return the resulting partial outcome. A free
    /// function rather than a `&self` method so it can run inside the
    /// account-level `tokio::spawn` in `process_schedule` without borrowing the
    /// orchestrator across an await point.
    #[allow(clippy::too_many_arguments)]
    async fn process_account(
        drivers: DriverMap,
        store: Arc<dyn StoreAdapter>,
        resource_semaphore: Arc<Semaphore>,
        schedule: &Schedule,
        account_id: &str,
        creds: &AssumedCredentials,
        action: DesiredAction,
        audit_writer: &AuditWriter,
        deadline: &CancellationToken,
    ) -> ScheduleOutcome {
        let mut outcome = ScheduleOutcome::default();
        let mut handles = Vec::new();

        for resource in &schedule.resources {
            if resource.account_id() != Some(account_id) {
                continue;
            }
            if deadline.is_cancelled() {
                push_failed(&mut outcome, resource, action, "deadline".to_string());
                continue;
            }

            let resource_type = resource.resource_type;
            let driver = match drivers.get(&resource_type) {
                Some(driver) => driver.clone(),
                None => {
                    push_failed(
                        &mut outcome,
                        resource,
                        action,
                        format!("no driver registered for resource type {resource_type:?}"),
                    );
                    continue;
                }
            };
            let resource = resource.clone();
            let creds = creds.clone();
            let tenant = schedule.tenant_id.clone();
            let schedule_id = schedule.id.clone();
            let account_id = account_id.to_string();
            let store = store.clone();
            let permit = resource_semaphore.clone();
            let deadline = deadline.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore not closed");

                let last_state = if action == DesiredAction::Start {
                    store
                        .query_last_successful_stop(&schedule_id, &resource.arn, &tenant)
                        .await
                        .ok()
                        .flatten()
                        .and_then(|r| r.last_state)
                } else {
                    None
                };

                let outcome = driver.process(&resource, action, &creds, &account_id, last_state, &deadline).await;
                (resource_type, outcome)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((resource_type, DriverOutcome { result, audit_entries })) => {
                    if result.status == ResourceStatus::Success {
                        match result.action {
                            Action::Start => outcome.started += 1,
                            Action::Stop => outcome.stopped += 1,
                            Action::Skip => {}
                        }
                    }
                    for entry in audit_entries {
                        audit_writer.record(entry);
                    }
                    outcome.metadata.push(resource_type, result);
                }
                Err(e) => {
                    tracing::error!(error = %e, "driver task panicked");
                }
            }
        }

        outcome
    }
}

/// Append a synthetic failed result for `resource`, used for every "we never
/// actually dispatched this resource" path: deadline expiry and a missing
/// driver registration alike.
fn push_failed(outcome: &mut ScheduleOutcome, resource: &ResourceRef, action: DesiredAction, error: String) {
    let desired = match action {
        DesiredAction::Start => Action::Start,
        DesiredAction::Stop => Action::Stop,
    };
    outcome.metadata.push(
        resource.resource_type,
        PerResourceResult {
            arn: resource.arn.clone(),
            resource_id: resource.id.clone(),
            action: desired,
            status: ResourceStatus::Failed,
            error: Some(error),
            last_state: None,
        },
    );
}
