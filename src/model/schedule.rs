//! Schedules and the resources they govern.
//!
//! Schedules are owned by the external configuration surface: the engine reads
//! them through [`crate::store::StoreAdapter`] but never mutates them.

use serde::{Deserialize, Serialize};

use crate::time::{TimeWindow, TimeWindowError, WeekdaySet};

/// The cloud resource families the engine knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Vm,
    Rds,
    Docdb,
    Ecs,
    Asg,
}

/// A single resource governed by a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Native resource identifier (instance id, cluster id, service name, group name).
    pub id: String,
    pub resource_type: ResourceType,
    pub arn: String,
    pub name: Option<String>,
    /// Required for `ecs`: the cluster the service belongs to.
    pub cluster_arn: Option<String>,
}

impl ResourceRef {
    /// The AWS region embedded in this resource's ARN (`arn:partition:service:region:...`).
    pub fn region(&self) -> Option<&str> {
        self.arn.splitn(6, ':').nth(3).filter(|s| !s.is_empty())
    }

    /// The account-id component of this resource's ARN.
    pub fn account_id(&self) -> Option<&str> {
        self.arn.splitn(6, ':').nth(4).filter(|s| !s.is_empty())
    }
}

/// Error constructing a [`Schedule`] from its stored representation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid time window: {0}")]
    InvalidWindow(#[from] TimeWindowError),
}

/// A time-window schedule governing a set of resources within one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
    pub start_hhmmss: String,
    pub end_hhmmss: String,
    pub timezone: String,
    pub active_days: WeekdaySet,
    pub active: bool,
    pub resources: Vec<ResourceRef>,
}

impl Schedule {
    /// Build the pure [`TimeWindow`] this schedule evaluates against, surfacing a
    /// `ConfigError`-shaped failure (per spec §7) for a malformed timezone or an
    /// empty active-day set rather than panicking.
    pub fn time_window(&self) -> Result<TimeWindow, ScheduleError> {
        let start = chrono::NaiveTime::parse_from_str(&self.start_hhmmss, "%H:%M:%S")
            .map_err(|_| TimeWindowError::InvalidTimeOfDay(self.start_hhmmss.clone()))?;
        let end = chrono::NaiveTime::parse_from_str(&self.end_hhmmss, "%H:%M:%S")
            .map_err(|_| TimeWindowError::InvalidTimeOfDay(self.end_hhmmss.clone()))?;
        Ok(TimeWindow::from_parts(
            start,
            end,
            &self.timezone,
            self.active_days.clone(),
        )?)
    }

    /// Distinct account ids referenced by this schedule's resources, derived from
    /// the account-component of each resource's ARN.
    pub fn account_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.resources.iter().filter_map(|r| r.account_id()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Resources belonging to a single family, preserving schedule order.
    pub fn resources_of(&self, resource_type: ResourceType) -> impl Iterator<Item = &ResourceRef> {
        self.resources.iter().filter(move |r| r.resource_type == resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schedule {
        Schedule {
            id: "sch-1".into(),
            name: "business-hours".into(),
            tenant_id: "default".into(),
            start_hhmmss: "09:00:00".into(),
            end_hhmmss: "17:00:00".into(),
            timezone: "UTC".into(),
            active_days: WeekdaySet::parse(&["Mon", "Tue", "Wed", "Thu", "Fri"]).unwrap(),
            active: true,
            resources: vec![ResourceRef {
                id: "i-001".into(),
                resource_type: ResourceType::Vm,
                arn: "arn:aws:ec2:us-east-1:111122223333:instance/i-001".into(),
                name: None,
                cluster_arn: None,
            }],
        }
    }

    #[test]
    fn time_window_parses_from_hhmmss() {
        let schedule = sample();
        let window = schedule.time_window().unwrap();
        assert!(!window.is_overnight());
    }

    #[test]
    fn account_ids_extracted_from_resource_arns() {
        let schedule = sample();
        assert_eq!(schedule.account_ids(), vec!["111122223333"]);
    }

    #[test]
    fn resources_of_filters_by_family() {
        let schedule = sample();
        assert_eq!(schedule.resources_of(ResourceType::Vm).count(), 1);
        assert_eq!(schedule.resources_of(ResourceType::Rds).count(), 0);
    }
}
