//! STS-backed credential broker: one `sts:AssumeRole` call per account per invocation.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sts::Client;
use uuid::Uuid;

use crate::model::Account;

use super::{AssumedCredentials, CredentialBroker, CredentialError};

/// Session names are capped at 64 chars by STS; this prefix plus a short uuid
/// suffix keeps every assumed session individually identifiable in CloudTrail.
const SESSION_NAME_PREFIX: &str = "costguard";

pub struct StsCredentialBroker {
    client: Client,
}

impl StsCredentialBroker {
    pub async fn new(region: &str) -> Self {
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: Client::new(&shared_config),
        }
    }
}

#[async_trait]
impl CredentialBroker for StsCredentialBroker {
    async fn assume(&self, account: &Account, region: &str) -> Result<AssumedCredentials, CredentialError> {
        if account.role_arn.is_empty() {
            return Err(CredentialError::AccountUnreachable {
                account_id: account.account_id.clone(),
                reason: "account has no role_arn configured".into(),
            });
        }

        let session_name = format!("{SESSION_NAME_PREFIX}-{}", Uuid::new_v4().simple());

        let mut request = self
            .client
            .assume_role()
            .role_arn(&account.role_arn)
            .role_session_name(session_name);
        if let Some(external_id) = &account.external_id {
            request = request.external_id(external_id);
        }

        let response = request.send().await.map_err(|e| CredentialError::AccountUnreachable {
            account_id: account.account_id.clone(),
            reason: e.to_string(),
        })?;

        let creds = response.credentials().ok_or_else(|| CredentialError::AccountUnreachable {
            account_id: account.account_id.clone(),
            reason: "assume_role response had no credentials".into(),
        })?;

        Ok(AssumedCredentials {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().to_string(),
            region: region.to_string(),
        })
    }
}
