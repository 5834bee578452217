//! Auto-scaling group driver (AWS Auto Scaling).
//!
//! Stop sets `(min, max, desired) = (0, 0, 0)`, capturing the prior triple.
//! Start restores the triple from `last_state` (the most recent stop record,
//! looked up by the orchestrator), defaulting to `(1, 1, 1)` if absent. Skip
//! iff the current triple already matches the target.

use async_trait::async_trait;
use aws_sdk_autoscaling::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_autoscaling::Client;
use tokio_util::sync::CancellationToken;

use crate::credentials::AssumedCredentials;
use crate::model::{Action, AsgLastState, LastState, ResourceRef};

use super::{cancelled_outcome, failed_outcome, success_outcome, DesiredAction, DriverOutcome, ResourceDriver};

const DEFAULT_TRIPLE: (i32, i32, i32) = (1, 1, 1);

pub struct AsgDriver;

impl AsgDriver {
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
        let config = aws_sdk_autoscaling::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(creds.region.clone()))
            .credentials_provider(credentials)
            .build();
        Client::from_conf(config)
    }
}

impl Default for AsgDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn format_triple(min: i32, max: i32, desired: i32) -> String {
    format!("({min},{max},{desired})")
}

#[async_trait]
impl ResourceDriver for AsgDriver {
    async fn process(
        &self,
        resource: &ResourceRef,
        action: DesiredAction,
        creds: &AssumedCredentials,
        account_id: &str,
        last_state: Option<LastState>,
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
            result = client
                .describe_auto_scaling_groups()
                .auto_scaling_group_names(resource.id.clone())
                .send() => result,
        };

        let describe = match describe {
            Ok(output) => output,
            Err(e) => return failed_outcome(resource, desired, Some(account_id.to_string()), e),
        };

        let Some(group) = describe.auto_scaling_groups().first() else {
            return failed_outcome(
                resource,
                desired,
                Some(account_id.to_string()),
                format!("autoscaling group {} not found", resource.id),
            );
        };

        let current = (group.min_size(), group.max_size(), group.desired_capacity().unwrap_or(0));
        let current_snapshot = LastState::Asg(AsgLastState {
            min_size: current.0,
            max_size: current.1,
            desired_capacity: current.2,
        });

        let target = match action {
            DesiredAction::Stop => (0, 0, 0),
            DesiredAction::Start => match &last_state {
                Some(LastState::Asg(prior)) => (prior.min_size, prior.max_size, prior.desired_capacity),
                _ => DEFAULT_TRIPLE,
            },
        };

        if current == target {
            let label = format_triple(current.0, current.1, current.2);
            return success_outcome(
                resource,
                Action::Skip,
                Some(account_id.to_string()),
                Some(label.clone()),
                label,
                Some(current_snapshot),
            );
        }

        let mutate = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled_outcome(resource, desired, Some(account_id.to_string())),
            result = client
                .update_auto_scaling_group()
                .auto_scaling_group_name(resource.id.clone())
                .min_size(target.0)
                .max_size(target.1)
                .desired_capacity(target.2)
                .send() => result,
        };

        if let Err(e) = mutate {
            return failed_outcome(resource, desired, Some(account_id.to_string()), e);
        }

        success_outcome(
            resource,
            desired,
            Some(account_id.to_string()),
            Some(format_triple(current.0, current.1, current.2)),
            format_triple(target.0, target.1, target.2),
            Some(current_snapshot),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_triple_is_one_one_one() {
        assert_eq!(DEFAULT_TRIPLE, (1, 1, 1));
    }

    #[test]
    fn format_triple_renders_as_tuple() {
        assert_eq!(format_triple(2, 6, 4), "(2,6,4)");
    }
}
