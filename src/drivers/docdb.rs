//! Document database driver (AWS DocumentDB clusters).
//!
//! Same desired-state rule as the relational driver, applied to cluster status
//! rather than instance status: start iff `current ∉ {available, starting}`;
//! stop iff `current == available`.

use async_trait::async_trait;
use aws_sdk_docdb::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_docdb::Client;
use tokio_util::sync::CancellationToken;

use crate::credentials::AssumedCredentials;
use crate::model::{Action, DbLastState, LastState, ResourceRef};

use super::{cancelled_outcome, failed_outcome, success_outcome, DesiredAction, DriverOutcome, ResourceDriver};

pub struct DocdbDriver;

impl DocdbDriver {
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
        let config = aws_sdk_docdb::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(creds.region.clone()))
            .credentials_provider(credentials)
            .build();
        Client::from_conf(config)
    }
}

impl Default for DocdbDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceDriver for DocdbDriver {
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
            result = client.describe_db_clusters().db_cluster_identifier(resource.id.clone()).send() => result,
        };

        let describe = match describe {
            Ok(output) => output,
            Err(e) => return failed_outcome(resource, desired, Some(account_id.to_string()), e),
        };

        let Some(cluster) = describe.db_clusters().first() else {
            return failed_outcome(
                resource,
                desired,
                Some(account_id.to_string()),
                format!("docdb cluster {} not found", resource.id),
            );
        };

        let current_status = cluster.status().unwrap_or("unknown").to_string();
        let snapshot = LastState::Db(DbLastState {
            db_status: current_status.clone(),
        });

        let should_act = match action {
            DesiredAction::Start => !matches!(current_status.as_str(), "available" | "starting"),
            DesiredAction::Stop => current_status == "available",
        };

        if !should_act {
            return success_outcome(
                resource,
                Action::Skip,
                Some(account_id.to_string()),
                Some(current_status.clone()),
                current_status,
                Some(snapshot),
            );
        }

        let mutate = match action {
            DesiredAction::Start => tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled_outcome(resource, desired, Some(account_id.to_string())),
                result = client.start_db_cluster().db_cluster_identifier(resource.id.clone()).send() => result.map(|_| ()),
            },
            DesiredAction::Stop => tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled_outcome(resource, desired, Some(account_id.to_string())),
                result = client.stop_db_cluster().db_cluster_identifier(resource.id.clone()).send() => result.map(|_| ()),
            },
        };

        if let Err(e) = mutate {
            return failed_outcome(resource, desired, Some(account_id.to_string()), e);
        }

        let to_state = match action {
            DesiredAction::Start => "available",
            DesiredAction::Stop => "stopped",
        };

        success_outcome(
            resource,
            desired,
            Some(account_id.to_string()),
            Some(current_status),
            to_state.to_string(),
            Some(snapshot),
        )
    }
}
