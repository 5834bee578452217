//! Virtual machine driver (AWS EC2).
//!
//! Desired-state rule: start iff `current ∉ {running, pending}`; stop iff
//! `current == running`. No first-time safeguard — a resource newly added to a
//! schedule may be started even with no prior stop record.

use async_trait::async_trait;
use aws_sdk_ec2::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_ec2::Client;
use tokio_util::sync::CancellationToken;

use crate::credentials::AssumedCredentials;
use crate::model::{Action, LastState, ResourceRef, VmLastState};

use super::{cancelled_outcome, failed_outcome, success_outcome, DesiredAction, DriverOutcome, ResourceDriver};

pub struct VmDriver;

impl VmDriver {
    pub fn new() -> Self {
        Self
    }

    fn client(creds: &AssumedCredentials) -> Client {
        let credentials = Credentials::new(
            &creds.access_key_id,
            &creds.secret_access_key,
            Some(creds.session_token.clone()),
            None,
            "costguard-assumed",
        );
        let config = aws_sdk_ec2::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(creds.region.clone()))
            .credentials_provider(credentials)
            .build();
        Client::from_conf(config)
    }
}

impl Default for VmDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceDriver for VmDriver {
    async fn process(
        &self,
        resource: &ResourceRef,
        action: DesiredAction,
        creds: &AssumedCredentials,
        account_id: &str,
        _last_state: Option<LastState>,
        cancel: &CancellationToken,
    ) -> DriverOutcome {
        let client = Self::client(creds);
        let desired = match action {
            DesiredAction::Start => Action::Start,
            DesiredAction::Stop => Action::Stop,
        };

        let describe = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled_outcome(resource, desired, Some(account_id.to_string())),
            result = client.describe_instances().instance_ids(resource.id.clone()).send() => result,
        };

        let describe = match describe {
            Ok(output) => output,
            Err(e) => return failed_outcome(resource, desired, Some(account_id.to_string()), e),
        };

        let instance = describe
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .find(|i| i.instance_id() == Some(resource.id.as_str()));

        let Some(instance) = instance else {
            return failed_outcome(
                resource,
                desired,
                Some(account_id.to_string()),
                format!("instance {} not found", resource.id),
            );
        };

        let current_state = instance
            .state()
            .and_then(|s| s.name())
            .map(|n| n.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let instance_type = instance.instance_type().map(|t| t.as_str().to_string());

        let snapshot = LastState::Vm(VmLastState {
            instance_state: current_state.clone(),
            instance_type: instance_type.clone(),
        });

        let should_act = match action {
            DesiredAction::Start => !matches!(current_state.as_str(), "running" | "pending"),
            DesiredAction::Stop => current_state == "running",
        };

        if !should_act {
            return success_outcome(
                resource,
                Action::Skip,
                Some(account_id.to_string()),
                Some(current_state.clone()),
                current_state,
                Some(snapshot),
            );
        }

        let mutate = match action {
            DesiredAction::Start => tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled_outcome(resource, desired, Some(account_id.to_string())),
                result = client.start_instances().instance_ids(resource.id.clone()).send() => result.map(|_| ()),
            },
            DesiredAction::Stop => tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled_outcome(resource, desired, Some(account_id.to_string())),
                result = client.stop_instances().instance_ids(resource.id.clone()).send() => result.map(|_| ()),
            },
        };

        if let Err(e) = mutate {
            return failed_outcome(resource, desired, Some(account_id.to_string()), e);
        }

        let to_state = match action {
            DesiredAction::Start => "running",
            DesiredAction::Stop => "stopped",
        };

        success_outcome(
            resource,
            desired,
            Some(account_id.to_string()),
            Some(current_state),
            to_state.to_string(),
            Some(snapshot),
        )
    }
}

#[cfg(test)]
mod tests {
    fn should_act(action: super::DesiredAction, current_state: &str) -> bool {
        match action {
            super::DesiredAction::Start => !matches!(current_state, "running" | "pending"),
            super::DesiredAction::Stop => current_state == "running",
        }
    }

    #[test]
    fn start_is_noop_when_already_running_or_pending() {
        assert!(!should_act(super::DesiredAction::Start, "running"));
        assert!(!should_act(super::DesiredAction::Start, "pending"));
        assert!(should_act(super::DesiredAction::Start, "stopped"));
    }

    #[test]
    fn stop_acts_only_when_running() {
        assert!(should_act(super::DesiredAction::Stop, "running"));
        assert!(!should_act(super::DesiredAction::Stop, "stopped"));
    }
}
