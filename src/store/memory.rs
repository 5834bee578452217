//! In-memory store adapter.
//!
//! Suitable for local development and the test suite, the same role the
//! teacher's `LocalRepository` plays there. All data lives behind a single
//! `RwLock` — there is no secondary-index fallback path to exercise here since
//! both "indices" are really the same `HashMap`, but the trait contract is
//! honored faithfully so tests against this backend generalize to `DynamoStore`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::model::{Account, AuditEntry, ExecutionRecord, PerResourceResult, Schedule};

use super::error::{StoreError, StoreResult};
use super::{StoreAdapter, LAST_STOP_LOOKUP_HORIZON};

#[derive(Default)]
struct MemoryData {
    schedules: HashMap<(String, String), Schedule>,
    accounts: HashMap<(String, String), Account>,
    /// Execution records keyed by (tenant, schedule_id), newest-last.
    executions: HashMap<(String, String), Vec<ExecutionRecord>>,
    audit_log: Vec<AuditEntry>,
}

/// In-memory implementation of [`StoreAdapter`].
#[derive(Clone)]
pub struct MemoryStore {
    data: Arc<RwLock<MemoryData>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(MemoryData::default())),
        }
    }

    /// Seed a schedule, overwriting any existing one with the same id.
    pub fn put_schedule(&self, schedule: Schedule) {
        let mut data = self.data.write().expect("memory store lock poisoned");
        data.schedules
            .insert((schedule.tenant_id.clone(), schedule.id.clone()), schedule);
    }

    /// Seed an account, overwriting any existing one with the same id.
    pub fn put_account(&self, account: Account) {
        let mut data = self.data.write().expect("memory store lock poisoned");
        data.accounts
            .insert((account.tenant_id.clone(), account.account_id.clone()), account);
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.data.read().expect("memory store lock poisoned").audit_log.clone()
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn health_check(&self) -> StoreResult<bool> {
        Ok(true)
    }

    async fn list_active_schedules(&self, tenant: &str) -> StoreResult<Vec<Schedule>> {
        let data = self.data.read().map_err(|_| StoreError::Internal("lock poisoned".into()))?;
        Ok(data
            .schedules
            .values()
            .filter(|s| s.tenant_id == tenant && s.active)
            .cloned()
            .collect())
    }

    async fn get_schedule(&self, schedule_id: &str, tenant: &str) -> StoreResult<Option<Schedule>> {
        let data = self.data.read().map_err(|_| StoreError::Internal("lock poisoned".into()))?;
        Ok(data.schedules.get(&(tenant.to_string(), schedule_id.to_string())).cloned())
    }

    async fn get_schedule_by_name(&self, name: &str, tenant: &str) -> StoreResult<Option<Schedule>> {
        let data = self.data.read().map_err(|_| StoreError::Internal("lock poisoned".into()))?;
        Ok(data
            .schedules
            .values()
            .find(|s| s.tenant_id == tenant && s.name == name)
            .cloned())
    }

    async fn list_active_accounts(&self, tenant: &str) -> StoreResult<Vec<Account>> {
        let data = self.data.read().map_err(|_| StoreError::Internal("lock poisoned".into()))?;
        Ok(data
            .accounts
            .values()
            .filter(|a| a.tenant_id == tenant && a.active)
            .cloned()
            .collect())
    }

    async fn write_execution_record(&self, record: &ExecutionRecord) -> StoreResult<()> {
        let mut data = self.data.write().map_err(|_| StoreError::Internal("lock poisoned".into()))?;
        let key = (record.tenant_id.clone(), record.schedule_id.clone());
        let bucket = data.executions.entry(key).or_default();
        if bucket.iter().any(|r| r.execution_id == record.execution_id) {
            return Err(StoreError::Validation(format!(
                "execution record {} already exists",
                record.execution_id
            )));
        }
        bucket.push(record.clone());
        Ok(())
    }

    async fn update_execution_record(&self, record: &ExecutionRecord) -> StoreResult<()> {
        let mut data = self.data.write().map_err(|_| StoreError::Internal("lock poisoned".into()))?;
        let key = (record.tenant_id.clone(), record.schedule_id.clone());
        let bucket = data
            .executions
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(format!("execution record {}", record.execution_id)))?;
        let existing = bucket
            .iter_mut()
            .find(|r| r.execution_id == record.execution_id)
            .ok_or_else(|| StoreError::NotFound(format!("execution record {}", record.execution_id)))?;
        *existing = record.clone();
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        let mut data = self.data.write().map_err(|_| StoreError::Internal("lock poisoned".into()))?;
        data.audit_log.push(entry.clone());
        Ok(())
    }

    async fn query_last_successful_stop(
        &self,
        schedule_id: &str,
        resource_arn: &str,
        tenant: &str,
    ) -> StoreResult<Option<PerResourceResult>> {
        use crate::model::{Action, ResourceStatus};

        let data = self.data.read().map_err(|_| StoreError::Internal("lock poisoned".into()))?;
        let key = (tenant.to_string(), schedule_id.to_string());
        let Some(bucket) = data.executions.get(&key) else {
            return Ok(None);
        };

        let mut newest_first: Vec<&ExecutionRecord> = bucket.iter().collect();
        newest_first.sort_by(|a, b| b.start_time.cmp(&a.start_time));

        for record in newest_first.into_iter().take(LAST_STOP_LOOKUP_HORIZON) {
            if let Some(result) = record
                .schedule_metadata
                .all()
                .find(|r| r.arn == resource_arn && r.action == Action::Stop && r.status == ResourceStatus::Success)
            {
                return Ok(Some(result.clone()));
            }
        }
        Ok(None)
    }
}
