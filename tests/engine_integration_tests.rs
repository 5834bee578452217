//! End-to-end orchestrator tests against the in-memory store, a fake credential
//! broker, and scripted fake drivers. No network access or cloud credentials
//! are touched — the real AWS-backed drivers in `costguard::drivers` are
//! exercised only by their own unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Datelike, Utc, Weekday};
use costguard::config::EngineConfig;
use costguard::credentials::{AssumedCredentials, CredentialBroker, CredentialError};
use costguard::drivers::{DesiredAction, DriverOutcome, ResourceDriver};
use costguard::model::{
    Account, Action, AsgLastState, AuditDetails, AuditEntry, DbLastState, ExecutionRecord, LastState,
    PerResourceResult, ResourceRef, ResourceStatus, ResourceType, Schedule, ScheduleMetadata, Severity,
    TriggeredBy, VmLastState,
};
use costguard::orchestrator::Mode;
use costguard::store::memory::MemoryStore;
use costguard::store::StoreAdapter;
use costguard::time::WeekdaySet;
use costguard::{DriverMap, InvocationPayload, Orchestrator};
use tokio_util::sync::CancellationToken;

// ---- fixtures -------------------------------------------------------------

fn all_days() -> WeekdaySet {
    WeekdaySet::parse(&["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"]).unwrap()
}

/// A non-overnight window's activity depends only on whether *today's* weekday
/// is a member of `active_days` — excluding today guarantees `evaluate()` is
/// false no matter what time of day the test happens to run.
fn all_days_except_today() -> WeekdaySet {
    let today = Utc::now().weekday();
    let all = [
        ("Mon", Weekday::Mon),
        ("Tue", Weekday::Tue),
        ("Wed", Weekday::Wed),
        ("Thu", Weekday::Thu),
        ("Fri", Weekday::Fri),
        ("Sat", Weekday::Sat),
        ("Sun", Weekday::Sun),
    ];
    let kept: Vec<&str> = all.iter().filter(|(_, day)| *day != today).map(|(name, _)| *name).collect();
    WeekdaySet::parse(&kept).unwrap()
}

fn account(account_id: &str) -> Account {
    Account {
        account_id: account_id.to_string(),
        tenant_id: "default".to_string(),
        role_arn: format!("arn:aws:iam::{account_id}:role/costguard"),
        external_id: None,
        regions: vec!["us-east-1".to_string()],
        active: true,
    }
}

fn vm_resource(id: &str, account_id: &str) -> ResourceRef {
    ResourceRef {
        id: id.to_string(),
        resource_type: ResourceType::Vm,
        arn: format!("arn:aws:ec2:us-east-1:{account_id}:instance/{id}"),
        name: None,
        cluster_arn: None,
    }
}

fn rds_resource(id: &str, account_id: &str) -> ResourceRef {
    ResourceRef {
        id: id.to_string(),
        resource_type: ResourceType::Rds,
        arn: format!("arn:aws:rds:us-east-1:{account_id}:db:{id}"),
        name: None,
        cluster_arn: None,
    }
}

fn asg_resource(id: &str, account_id: &str) -> ResourceRef {
    ResourceRef {
        id: id.to_string(),
        resource_type: ResourceType::Asg,
        arn: format!("arn:aws:autoscaling:us-east-1:{account_id}:autoScalingGroup:uuid:autoScalingGroupName/{id}"),
        name: None,
        cluster_arn: None,
    }
}

fn schedule(id: &str, active: bool, active_days: WeekdaySet, resources: Vec<ResourceRef>) -> Schedule {
    Schedule {
        id: id.to_string(),
        name: format!("{id}-name"),
        tenant_id: "default".to_string(),
        start_hhmmss: "09:00:00".to_string(),
        end_hhmmss: "17:00:00".to_string(),
        timezone: "UTC".to_string(),
        active_days,
        active,
        resources,
    }
}

// ---- fake credential broker ------------------------------------------------

struct FakeCredentialBroker {
    unreachable: HashSet<String>,
}

impl FakeCredentialBroker {
    fn new() -> Self {
        Self { unreachable: HashSet::new() }
    }

    fn with_unreachable(ids: &[&str]) -> Self {
        Self { unreachable: ids.iter().map(|s| s.to_string()).collect() }
    }
}

#[async_trait]
impl CredentialBroker for FakeCredentialBroker {
    async fn assume(&self, account: &Account, region: &str) -> Result<AssumedCredentials, CredentialError> {
        if self.unreachable.contains(&account.account_id) {
            return Err(CredentialError::AccountUnreachable {
                account_id: account.account_id.clone(),
                reason: "simulated assume-role failure".to_string(),
            });
        }
        Ok(AssumedCredentials {
            access_key_id: "AKIAFAKE".to_string(),
            secret_access_key: "fake-secret".to_string(),
            session_token: "fake-token".to_string(),
            region: region.to_string(),
        })
    }
}

// ---- shared outcome builders (mirroring costguard::drivers' private helpers) ----

fn action_of(desired: DesiredAction) -> Action {
    match desired {
        DesiredAction::Start => Action::Start,
        DesiredAction::Stop => Action::Stop,
    }
}

fn outcome_skip(resource: &ResourceRef, label: String, last_state: LastState) -> DriverOutcome {
    DriverOutcome {
        result: PerResourceResult {
            arn: resource.arn.clone(),
            resource_id: resource.id.clone(),
            action: Action::Skip,
            status: ResourceStatus::Success,
            error: None,
            last_state: Some(last_state),
        },
        audit_entries: vec![AuditEntry::for_action(
            Utc::now(),
            resource.resource_type,
            resource.id.clone(),
            Action::Skip,
            ResourceStatus::Success,
            Severity::Low,
            AuditDetails::StateTransition { from_state: Some(label.clone()), to_state: label },
            None,
            resource.region().map(str::to_string),
        )],
    }
}

fn outcome_success(
    resource: &ResourceRef,
    desired: DesiredAction,
    from_state: String,
    to_state: String,
    last_state: LastState,
) -> DriverOutcome {
    let action = action_of(desired);
    DriverOutcome {
        result: PerResourceResult {
            arn: resource.arn.clone(),
            resource_id: resource.id.clone(),
            action,
            status: ResourceStatus::Success,
            error: None,
            last_state: Some(last_state),
        },
        audit_entries: vec![AuditEntry::for_action(
            Utc::now(),
            resource.resource_type,
            resource.id.clone(),
            action,
            ResourceStatus::Success,
            Severity::Medium,
            AuditDetails::StateTransition { from_state: Some(from_state), to_state },
            None,
            resource.region().map(str::to_string),
        )],
    }
}

fn outcome_failed(resource: &ResourceRef, desired: DesiredAction, message: String) -> DriverOutcome {
    let action = action_of(desired);
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
            Utc::now(),
            resource.resource_type,
            resource.id.clone(),
            action,
            ResourceStatus::Failed,
            Severity::High,
            AuditDetails::ActionError { message },
            None,
            resource.region().map(str::to_string),
        )],
    }
}

// ---- fake drivers, each holding its own simulated provider-side state ------

struct FakeVmDriver {
    states: Mutex<HashMap<String, String>>,
    fail_ids: HashSet<String>,
}

impl FakeVmDriver {
    fn new(initial: &[(&str, &str)]) -> Self {
        Self {
            states: Mutex::new(initial.iter().map(|(id, s)| (id.to_string(), s.to_string())).collect()),
            fail_ids: HashSet::new(),
        }
    }

    fn with_failures(initial: &[(&str, &str)], fail_ids: &[&str]) -> Self {
        Self {
            states: Mutex::new(initial.iter().map(|(id, s)| (id.to_string(), s.to_string())).collect()),
            fail_ids: fail_ids.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ResourceDriver for FakeVmDriver {
    async fn process(
        &self,
        resource: &ResourceRef,
        action: DesiredAction,
        _creds: &AssumedCredentials,
        _account_id: &str,
        _last_state: Option<LastState>,
        _cancel: &CancellationToken,
    ) -> DriverOutcome {
        let current = self.states.lock().unwrap().get(&resource.id).cloned().unwrap_or_else(|| "stopped".into());
        let should_act = match action {
            DesiredAction::Start => !matches!(current.as_str(), "running" | "pending"),
            DesiredAction::Stop => current == "running",
        };
        let snapshot = LastState::Vm(VmLastState { instance_state: current.clone(), instance_type: None });

        if !should_act {
            return outcome_skip(resource, current, snapshot);
        }
        if self.fail_ids.contains(&resource.id) {
            return outcome_failed(resource, action, "simulated provider error".to_string());
        }

        let to_state = match action {
            DesiredAction::Start => "running",
            DesiredAction::Stop => "stopped",
        };
        self.states.lock().unwrap().insert(resource.id.clone(), to_state.to_string());
        outcome_success(resource, action, current, to_state.to_string(), snapshot)
    }
}

struct FakeRdsDriver {
    states: Mutex<HashMap<String, String>>,
}

impl FakeRdsDriver {
    fn new(initial: &[(&str, &str)]) -> Self {
        Self { states: Mutex::new(initial.iter().map(|(id, s)| (id.to_string(), s.to_string())).collect()) }
    }
}

#[async_trait]
impl ResourceDriver for FakeRdsDriver {
    async fn process(
        &self,
        resource: &ResourceRef,
        action: DesiredAction,
        _creds: &AssumedCredentials,
        _account_id: &str,
        _last_state: Option<LastState>,
        _cancel: &CancellationToken,
    ) -> DriverOutcome {
        let current = self.states.lock().unwrap().get(&resource.id).cloned().unwrap_or_else(|| "stopped".into());
        let should_act = match action {
            DesiredAction::Start => !matches!(current.as_str(), "available" | "starting"),
            DesiredAction::Stop => current == "available",
        };
        let snapshot = LastState::Db(DbLastState { db_status: current.clone() });

        if !should_act {
            return outcome_skip(resource, current, snapshot);
        }

        let to_state = match action {
            DesiredAction::Start => "available",
            DesiredAction::Stop => "stopped",
        };
        self.states.lock().unwrap().insert(resource.id.clone(), to_state.to_string());
        outcome_success(resource, action, current, to_state.to_string(), snapshot)
    }
}

struct FakeAsgDriver {
    states: Mutex<HashMap<String, (i32, i32, i32)>>,
}

impl FakeAsgDriver {
    fn new(initial: &[(&str, (i32, i32, i32))]) -> Self {
        Self { states: Mutex::new(initial.iter().map(|(id, t)| (id.to_string(), *t)).collect()) }
    }
}

fn triple_label(t: (i32, i32, i32)) -> String {
    format!("({},{},{})", t.0, t.1, t.2)
}

#[async_trait]
impl ResourceDriver for FakeAsgDriver {
    async fn process(
        &self,
        resource: &ResourceRef,
        action: DesiredAction,
        _creds: &AssumedCredentials,
        _account_id: &str,
        last_state: Option<LastState>,
        _cancel: &CancellationToken,
    ) -> DriverOutcome {
        let current = self.states.lock().unwrap().get(&resource.id).copied().unwrap_or((0, 0, 0));
        let target = match action {
            DesiredAction::Stop => (0, 0, 0),
            DesiredAction::Start => match last_state {
                Some(LastState::Asg(prior)) => (prior.min_size, prior.max_size, prior.desired_capacity),
                _ => (1, 1, 1),
            },
        };
        let snapshot =
            LastState::Asg(AsgLastState { min_size: current.0, max_size: current.1, desired_capacity: current.2 });

        if current == target {
            return outcome_skip(resource, triple_label(current), snapshot);
        }

        self.states.lock().unwrap().insert(resource.id.clone(), target);
        outcome_success(resource, action, triple_label(current), triple_label(target), snapshot)
    }
}

/// Every resource family gets an entry so the orchestrator never hits its
/// "no driver registered" panic, even when a given test only exercises one family.
fn driver_map(vm: FakeVmDriver, rds: FakeRdsDriver, asg: FakeAsgDriver) -> DriverMap {
    let mut map: DriverMap = HashMap::new();
    map.insert(ResourceType::Vm, Arc::new(vm) as Arc<dyn ResourceDriver>);
    map.insert(ResourceType::Rds, Arc::new(rds) as Arc<dyn ResourceDriver>);
    map.insert(ResourceType::Asg, Arc::new(asg) as Arc<dyn ResourceDriver>);
    map
}

fn orchestrator(store: &MemoryStore, credentials: Arc<dyn CredentialBroker>, drivers: DriverMap) -> Orchestrator {
    let store: Arc<dyn StoreAdapter> = Arc::new(store.clone());
    Orchestrator::new(store, credentials, drivers, EngineConfig::default())
}

fn partial_payload(schedule_id: &str, force: bool) -> InvocationPayload {
    InvocationPayload {
        schedule_id: Some(schedule_id.to_string()),
        force,
        ..Default::default()
    }
}

// ---- scenario 1: start a stopped vm ---------------------------------------

#[tokio::test]
async fn start_a_stopped_vm() {
    let store = MemoryStore::new();
    store.put_account(account("111122223333"));
    let resource = vm_resource("i-001", "111122223333");
    store.put_schedule(schedule("S1", true, all_days(), vec![resource]));

    let vm = FakeVmDriver::new(&[("i-001", "stopped")]);
    let engine = orchestrator(
        &store,
        Arc::new(FakeCredentialBroker::new()),
        driver_map(vm, FakeRdsDriver::new(&[]), FakeAsgDriver::new(&[])),
    );

    let result = engine.run(partial_payload("S1", true), CancellationToken::new()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.mode, Mode::Partial);
    assert_eq!(result.resources_started, 1);
    assert_eq!(result.resources_stopped, 0);
    assert_eq!(result.resources_failed, 0);

    let audit = store.audit_log();
    assert!(audit.iter().any(|e| e.event_type == "scheduler.vm.start" && e.status == Some(ResourceStatus::Success)));
}

// ---- scenario 2: stop a running db, capturing its state -------------------

#[tokio::test]
async fn stop_a_running_db_captures_state() {
    let store = MemoryStore::new();
    store.put_account(account("111122223333"));
    let resource = rds_resource("db-01", "111122223333");
    // active_days excludes today so the window evaluator is false without `force`.
    store.put_schedule(schedule("S2", true, all_days_except_today(), vec![resource.clone()]));

    let rds = FakeRdsDriver::new(&[("db-01", "available")]);
    let engine = orchestrator(
        &store,
        Arc::new(FakeCredentialBroker::new()),
        driver_map(FakeVmDriver::new(&[]), rds, FakeAsgDriver::new(&[])),
    );

    let result = engine.run(partial_payload("S2", false), CancellationToken::new()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.resources_stopped, 1);
    assert_eq!(result.resources_started, 0);

    let captured = store
        .query_last_successful_stop("S2", &resource.arn, "default")
        .await
        .unwrap()
        .expect("a successful stop result should be queryable");
    match captured.last_state {
        Some(LastState::Db(db)) => assert_eq!(db.db_status, "available"),
        other => panic!("expected a captured db last_state, got {other:?}"),
    }
}

// ---- scenario 3: restart with prior scale ---------------------------------

#[tokio::test]
async fn restart_asg_with_prior_scale() {
    let store = MemoryStore::new();
    store.put_account(account("111122223333"));
    let resource = asg_resource("asg-web", "111122223333");
    store.put_schedule(schedule("S3", true, all_days(), vec![resource.clone()]));

    // Seed a prior execution recording a successful stop that captured (2,6,4).
    let mut prior = ExecutionRecord::pending(
        "exec-prior".to_string(),
        "S3".to_string(),
        "default".to_string(),
        None,
        TriggeredBy::System,
        Utc::now(),
    );
    let mut metadata = ScheduleMetadata::default();
    metadata.push(
        ResourceType::Asg,
        PerResourceResult {
            arn: resource.arn.clone(),
            resource_id: resource.id.clone(),
            action: Action::Stop,
            status: ResourceStatus::Success,
            error: None,
            last_state: Some(LastState::Asg(AsgLastState { min_size: 2, max_size: 6, desired_capacity: 4 })),
        },
    );
    prior.finish(Utc::now(), 0, 1, metadata, None);
    store.write_execution_record(&prior).await.unwrap();

    let asg = FakeAsgDriver::new(&[("asg-web", (0, 0, 0))]);
    let engine = orchestrator(
        &store,
        Arc::new(FakeCredentialBroker::new()),
        driver_map(FakeVmDriver::new(&[]), FakeRdsDriver::new(&[]), asg),
    );

    let result = engine.run(partial_payload("S3", true), CancellationToken::new()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.resources_started, 1);

    let audit = store.audit_log();
    assert!(audit.iter().any(|e| {
        e.event_type == "scheduler.asg.start"
            && matches!(&e.details, AuditDetails::StateTransition { to_state, .. } if to_state == "(2,6,4)")
    }));
}

// ---- scenario 4: skip when already in the desired state -------------------

#[tokio::test]
async fn skip_when_already_in_desired_state() {
    let store = MemoryStore::new();
    store.put_account(account("111122223333"));
    let resource = vm_resource("i-002", "111122223333");
    store.put_schedule(schedule("S4", true, all_days(), vec![resource]));

    let vm = FakeVmDriver::new(&[("i-002", "running")]);
    let engine = orchestrator(
        &store,
        Arc::new(FakeCredentialBroker::new()),
        driver_map(vm, FakeRdsDriver::new(&[]), FakeAsgDriver::new(&[])),
    );

    let result = engine.run(partial_payload("S4", true), CancellationToken::new()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.resources_started, 0);
    assert_eq!(result.resources_stopped, 0);
    assert_eq!(result.resources_failed, 0);

    let audit = store.audit_log();
    assert!(audit.iter().any(|e| e.event_type == "scheduler.vm.skip"));
}

// ---- scenario 5: a mixed failure yields a partial outcome ------------------

#[tokio::test]
async fn mixed_failure_yields_partial() {
    let store = MemoryStore::new();
    store.put_account(account("111122223333"));
    let ok_resource = vm_resource("i-010", "111122223333");
    let bad_resource = vm_resource("i-011", "111122223333");
    store.put_schedule(schedule("S5", true, all_days(), vec![ok_resource, bad_resource]));

    let vm = FakeVmDriver::with_failures(&[("i-010", "stopped"), ("i-011", "stopped")], &["i-011"]);
    let engine = orchestrator(
        &store,
        Arc::new(FakeCredentialBroker::new()),
        driver_map(vm, FakeRdsDriver::new(&[]), FakeAsgDriver::new(&[])),
    );

    let result = engine.run(partial_payload("S5", true), CancellationToken::new()).await.unwrap();

    assert!(!result.success, "a resource failure should surface as an unsuccessful invocation");
    assert_eq!(result.resources_started, 1);
    assert_eq!(result.resources_failed, 1);

    let audit = store.audit_log();
    assert_eq!(audit.iter().filter(|e| e.severity == Severity::Medium).count(), 1);
    assert_eq!(audit.iter().filter(|e| e.severity == Severity::High).count(), 1);
}

// ---- scenario 6: partial mode over an inactive schedule --------------------

#[tokio::test]
async fn partial_mode_over_inactive_schedule() {
    let store = MemoryStore::new();
    store.put_account(account("111122223333"));
    let resource = vm_resource("i-020", "111122223333");
    store.put_schedule(schedule("S6", false, all_days(), vec![resource]));

    let vm = FakeVmDriver::new(&[("i-020", "stopped")]);
    let engine = orchestrator(
        &store,
        Arc::new(FakeCredentialBroker::new()),
        driver_map(vm, FakeRdsDriver::new(&[]), FakeAsgDriver::new(&[])),
    );

    let result = engine.run(partial_payload("S6", true), CancellationToken::new()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.mode, Mode::Partial);
    assert_eq!(result.resources_started, 1);
}

// ---- boundary: partial mode can also target an inactive schedule by name --

#[tokio::test]
async fn partial_mode_by_name_over_inactive_schedule() {
    let store = MemoryStore::new();
    store.put_account(account("111122223333"));
    let resource = vm_resource("i-021", "111122223333");
    store.put_schedule(schedule("S7", false, all_days(), vec![resource]));

    let vm = FakeVmDriver::new(&[("i-021", "stopped")]);
    let engine = orchestrator(
        &store,
        Arc::new(FakeCredentialBroker::new()),
        driver_map(vm, FakeRdsDriver::new(&[]), FakeAsgDriver::new(&[])),
    );

    let payload = InvocationPayload {
        schedule_name: Some("S7-name".to_string()),
        force: true,
        ..Default::default()
    };
    let result = engine.run(payload, CancellationToken::new()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.mode, Mode::Partial);
    assert_eq!(result.resources_started, 1);
}

// ---- boundary: credential failure skips only the failing account ----------

#[tokio::test]
async fn credential_failure_skips_only_that_account() {
    let store = MemoryStore::new();
    store.put_account(account("111122223333"));
    store.put_account(account("444455556666"));
    let good_resource = vm_resource("i-030", "111122223333");
    let bad_resource = vm_resource("i-031", "444455556666");
    store.put_schedule(schedule("S7", true, all_days(), vec![good_resource, bad_resource]));

    let vm = FakeVmDriver::new(&[("i-030", "stopped"), ("i-031", "stopped")]);
    let engine = orchestrator(
        &store,
        Arc::new(FakeCredentialBroker::with_unreachable(&["444455556666"])),
        driver_map(vm, FakeRdsDriver::new(&[]), FakeAsgDriver::new(&[])),
    );

    let result = engine.run(partial_payload("S7", true), CancellationToken::new()).await.unwrap();

    // The reachable account's resource still starts; the invocation as a whole
    // reports success since no resource actually failed (the other account's
    // resource was never attempted).
    assert!(result.success);
    assert_eq!(result.resources_started, 1);

    let audit = store.audit_log();
    let failure = audit
        .iter()
        .find(|e| e.event_type == "scheduler.credentials.assume_failed")
        .expect("a credential failure audit entry should be recorded");
    assert_eq!(failure.severity, Severity::High);
    assert_eq!(failure.account_id.as_deref(), Some("444455556666"));
}

// ---- boundary: an empty schedule is a zero-count success -------------------

#[tokio::test]
async fn empty_schedule_succeeds_with_zero_counts() {
    let store = MemoryStore::new();
    store.put_schedule(schedule("S8", true, all_days(), vec![]));

    let engine = orchestrator(
        &store,
        Arc::new(FakeCredentialBroker::new()),
        driver_map(FakeVmDriver::new(&[]), FakeRdsDriver::new(&[]), FakeAsgDriver::new(&[])),
    );

    let result = engine.run(partial_payload("S8", true), CancellationToken::new()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.resources_started, 0);
    assert_eq!(result.resources_stopped, 0);
    assert_eq!(result.resources_failed, 0);
}

// ---- round-trip / idempotence: a second back-to-back run only skips -------

#[tokio::test]
async fn idempotent_rerun_only_skips() {
    let store = MemoryStore::new();
    store.put_account(account("111122223333"));
    let resource = vm_resource("i-040", "111122223333");
    store.put_schedule(schedule("S9", true, all_days(), vec![resource]));

    let vm = FakeVmDriver::new(&[("i-040", "stopped")]);
    let engine = orchestrator(
        &store,
        Arc::new(FakeCredentialBroker::new()),
        driver_map(vm, FakeRdsDriver::new(&[]), FakeAsgDriver::new(&[])),
    );

    let first = engine.run(partial_payload("S9", true), CancellationToken::new()).await.unwrap();
    assert_eq!(first.resources_started, 1);

    let second = engine.run(partial_payload("S9", true), CancellationToken::new()).await.unwrap();
    assert_eq!(second.resources_started + second.resources_stopped, 0);
    assert_eq!(second.resources_failed, 0);
}
