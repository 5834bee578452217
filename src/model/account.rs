//! Tenant-owned cloud accounts the engine is permitted to act against.

use serde::{Deserialize, Serialize};

/// A cloud account the credential broker can assume a role into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub tenant_id: String,
    pub role_arn: String,
    pub external_id: Option<String>,
    pub regions: Vec<String>,
    pub active: bool,
}
