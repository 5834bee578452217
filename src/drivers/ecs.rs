//! Container service driver (AWS ECS).
//!
//! Stop sets `desired_count = 0`, capturing the prior `desired_count` and the
//! observed `running_count`. Start restores the prior `desired_count` — read
//! from execution history by the orchestrator via `query_last_successful_stop`
//! and handed in as `last_state` — defaulting to `1` if no prior stop is on
//! record. Requires `cluster_arn`.

use async_trait::async_trait;
use aws_sdk_ecs::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_ecs::Client;
use tokio_util::sync::CancellationToken;

use crate::credentials::AssumedCredentials;
use crate::model::{Action, EcsLastState, LastState, ResourceRef};

use super::{cancelled_outcome, failed_outcome, success_outcome, DesiredAction, DriverOutcome, ResourceDriver};

/// Desired count restored on `start` when no prior stop record exists.
const DEFAULT_DESIRED_COUNT: i32 = 1;

pub struct EcsDriver;

impl EcsDriver {
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
        let config = aws_sdk_ecs::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(creds.region.clone()))
            .credentials_provider(credentials)
            .build();
        Client::from_conf(config)
    }
}

impl Default for EcsDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceDriver for EcsDriver {
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

        let Some(cluster_arn) = &resource.cluster_arn else {
            return failed_outcome(
                resource,
                desired,
                Some(account_id.to_string()),
                "ecs resource missing cluster_arn",
            );
        };

        let describe = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled_outcome(resource, desired, Some(account_id.to_string())),
            result = client.describe_services().cluster(cluster_arn).services(resource.id.clone()).send() => result,
        };

        let describe = match describe {
            Ok(output) => output,
            Err(e) => return failed_outcome(resource, desired, Some(account_id.to_string()), e),
        };

        let Some(service) = describe.services().first() else {
            return failed_outcome(
                resource,
                desired,
                Some(account_id.to_string()),
                format!("ecs service {} not found", resource.id),
            );
        };

        let current_desired = service.desired_count();
        let current_running = service.running_count();
        let current_snapshot = LastState::Ecs(EcsLastState {
            desired_count: current_desired,
            running_count: current_running,
        });

        let target_desired = match action {
            DesiredAction::Stop => 0,
            DesiredAction::Start => match &last_state {
                Some(LastState::Ecs(prior)) => prior.desired_count,
                _ => DEFAULT_DESIRED_COUNT,
            },
        };

        if current_desired == target_desired {
            return success_outcome(
                resource,
                Action::Skip,
                Some(account_id.to_string()),
                Some(current_desired.to_string()),
                current_desired.to_string(),
                Some(current_snapshot),
            );
        }

        let mutate = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled_outcome(resource, desired, Some(account_id.to_string())),
            result = client
                .update_service()
                .cluster(cluster_arn)
                .service(resource.id.clone())
                .desired_count(target_desired)
                .send() => result,
        };

        if let Err(e) = mutate {
            return failed_outcome(resource, desired, Some(account_id.to_string()), e);
        }

        success_outcome(
            resource,
            desired,
            Some(account_id.to_string()),
            Some(current_desired.to_string()),
            target_desired.to_string(),
            Some(current_snapshot),
        )
    }
}
