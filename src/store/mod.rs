//! Store adapter: a read/write facade over a single-table key-value store.
//!
//! Mirrors the teacher's repository-trait-plus-factory split, minus the module-
//! global singleton the teacher wraps it in (`db::repository_manager`) — callers
//! construct a store explicitly per invocation and pass it down, so two tenants
//! (or two test cases) never share process-global state.

#[cfg(feature = "dynamo-store")]
pub mod dynamo;
pub mod error;
pub mod memory;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

pub use error::{StoreError, StoreResult};

use crate::model::{Account, AuditEntry, ExecutionRecord, PerResourceResult, Schedule};

/// The number of most-recent execution records scanned by
/// [`StoreAdapter::query_last_successful_stop`] (spec: `horizon=10_records`).
pub const LAST_STOP_LOOKUP_HORIZON: usize = 10;

/// Read/write facade the orchestrator depends on. See SPEC_FULL.md §4.2 for the
/// contract each method must honor (fallback index paths, TTL application, etc).
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    async fn health_check(&self) -> StoreResult<bool>;

    /// All schedules with `active=true` for `tenant`.
    async fn list_active_schedules(&self, tenant: &str) -> StoreResult<Vec<Schedule>>;

    /// A schedule by id, searching both active and inactive status views.
    async fn get_schedule(&self, schedule_id: &str, tenant: &str) -> StoreResult<Option<Schedule>>;

    /// A schedule by name, searching both active and inactive status views — the
    /// same both-view guarantee `get_schedule` makes, since a partial-mode
    /// invocation may target an inactive schedule by either key.
    async fn get_schedule_by_name(&self, name: &str, tenant: &str) -> StoreResult<Option<Schedule>>;

    /// All accounts with `active=true` for `tenant`.
    async fn list_active_accounts(&self, tenant: &str) -> StoreResult<Vec<Account>>;

    /// Insert a new execution record. Must not overwrite an existing record with
    /// the same `execution_id`.
    async fn write_execution_record(&self, record: &ExecutionRecord) -> StoreResult<()>;

    /// Merge-update an existing execution record with its terminal fields.
    async fn update_execution_record(&self, record: &ExecutionRecord) -> StoreResult<()>;

    /// Fire-and-forget insert. Callers must not fail the invocation when this
    /// errors — see `crate::orchestrator::audit`.
    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()>;

    /// The most recent successful `stop` result for `resource_arn` under
    /// `schedule_id`, scanning at most [`LAST_STOP_LOOKUP_HORIZON`] records
    /// newest-first.
    async fn query_last_successful_stop(
        &self,
        schedule_id: &str,
        resource_arn: &str,
        tenant: &str,
    ) -> StoreResult<Option<PerResourceResult>>;
}

/// Which store backend to construct. Selected at runtime via config/environment,
/// not at compile time — unlike the teacher's Cargo-feature-gated repository
/// choice, this contract is a single trait object and the choice genuinely
/// belongs in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Dynamo,
}

impl FromStr for StoreBackend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "local" => Ok(Self::Memory),
            "dynamo" | "dynamodb" => Ok(Self::Dynamo),
            other => Err(StoreError::Configuration(format!(
                "unknown store backend '{other}', expected 'memory' or 'dynamo'"
            ))),
        }
    }
}

/// Build the configured store backend. This is the one place allowed to know
/// about concrete backend types; everything downstream holds `Arc<dyn StoreAdapter>`.
pub async fn build_store(
    backend: StoreBackend,
    table_name: Option<&str>,
    region: &str,
) -> StoreResult<Arc<dyn StoreAdapter>> {
    match backend {
        StoreBackend::Memory => Ok(Arc::new(memory::MemoryStore::new())),
        #[cfg(feature = "dynamo-store")]
        StoreBackend::Dynamo => {
            let table_name = table_name.ok_or_else(|| {
                StoreError::Configuration("dynamo backend requires a table name".into())
            })?;
            let store = dynamo::DynamoStore::connect(table_name, region).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "dynamo-store"))]
        StoreBackend::Dynamo => Err(StoreError::Configuration(
            "this binary was built without the 'dynamo-store' feature".into(),
        )),
    }
}
