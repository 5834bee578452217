//! Cross-account credential broker.
//!
//! Given an account descriptor, produces short-lived assumed-role credentials
//! scoped to a region. Nothing here is cached across invocations — engine runs
//! are short-lived and credentials are scoped per engine run (SPEC_FULL.md §4.3).

pub mod sts;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Account;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("account {account_id} is unreachable: {reason}")]
    AccountUnreachable { account_id: String, reason: String },
}

/// Short-lived credentials scoped to one region, ready to hand to a resource driver.
#[derive(Debug, Clone)]
pub struct AssumedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub region: String,
}

/// Broker contract. A single failure for one account must never abort processing
/// of other accounts — callers translate `Err` into a skipped (schedule, account)
/// pair, not a propagated error.
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    async fn assume(&self, account: &Account, region: &str) -> Result<AssumedCredentials, CredentialError>;
}
