//! Engine configuration.
//!
//! Configuration is layered the way the teacher codebase layers its database
//! configuration: required infrastructure selection comes from the environment,
//! an optional TOML file supplies defaults, and environment variables always win
//! over the file so secrets and per-deployment overrides never have to live on
//! disk.
//!
//! # Environment Variables
//! - `SCHEDULER_STORE_BACKEND` (optional, default `memory`): `memory` | `dynamo`
//! - `SCHEDULER_TABLE_NAME` (required when `SCHEDULER_STORE_BACKEND=dynamo`)
//! - `SCHEDULER_MAX_CONCURRENT_ACCOUNTS` (optional, default 8)
//! - `SCHEDULER_MAX_CONCURRENT_RESOURCES` (optional, default 16)
//! - `SCHEDULER_INVOCATION_BUDGET` (optional, default `240s`, parsed with `humantime`)
//! - `AWS_REGION` (optional, default `us-east-1`)

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::store::StoreBackend;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {field}: {message}")]
    Invalid { field: String, message: String },
}

/// Resolved engine configuration for one invocation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub store_backend: StoreBackend,
    pub table_name: Option<String>,
    pub region: String,
    pub max_concurrent_accounts: usize,
    pub max_concurrent_resources: usize,
    pub invocation_budget: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            table_name: None,
            region: default_region(),
            max_concurrent_accounts: default_max_concurrent_accounts(),
            max_concurrent_resources: default_max_concurrent_resources(),
            invocation_budget: default_invocation_budget(),
        }
    }
}

/// File-sourced overrides. Every field is optional; environment variables
/// take precedence when both are present.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    store_backend: Option<String>,
    #[serde(default)]
    table_name: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    max_concurrent_accounts: Option<usize>,
    #[serde(default)]
    max_concurrent_resources: Option<usize>,
    #[serde(default)]
    invocation_budget: Option<String>,
}

impl EngineConfig {
    /// Build configuration from environment variables alone.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_and_file(None)
    }

    /// Build configuration from an optional TOML file, then apply environment
    /// overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_env_and_file(path)
    }

    fn from_env_and_file(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => Some(read_file_config(p)?),
            None => None,
        };

        let store_backend = env_var("SCHEDULER_STORE_BACKEND")
            .or_else(|| file.as_ref().and_then(|f| f.store_backend.clone()))
            .map(|raw| parse_store_backend(&raw))
            .transpose()?
            .unwrap_or(StoreBackend::Memory);

        let table_name =
            env_var("SCHEDULER_TABLE_NAME").or_else(|| file.as_ref().and_then(|f| f.table_name.clone()));

        if matches!(store_backend, StoreBackend::Dynamo) && table_name.is_none() {
            return Err(ConfigError::Invalid {
                field: "table_name".into(),
                message: "SCHEDULER_TABLE_NAME is required when store_backend=dynamo".into(),
            });
        }

        let region = env_var("AWS_REGION")
            .or_else(|| file.as_ref().and_then(|f| f.region.clone()))
            .unwrap_or_else(default_region);

        let max_concurrent_accounts = parse_env_usize("SCHEDULER_MAX_CONCURRENT_ACCOUNTS")?
            .or(file.as_ref().and_then(|f| f.max_concurrent_accounts))
            .unwrap_or_else(default_max_concurrent_accounts);

        let max_concurrent_resources = parse_env_usize("SCHEDULER_MAX_CONCURRENT_RESOURCES")?
            .or(file.as_ref().and_then(|f| f.max_concurrent_resources))
            .unwrap_or_else(default_max_concurrent_resources);

        let invocation_budget_raw = env_var("SCHEDULER_INVOCATION_BUDGET")
            .or_else(|| file.as_ref().and_then(|f| f.invocation_budget.clone()));
        let invocation_budget = match invocation_budget_raw {
            Some(raw) => humantime::parse_duration(&raw).map_err(|e| ConfigError::Invalid {
                field: "invocation_budget".into(),
                message: e.to_string(),
            })?,
            None => default_invocation_budget(),
        };

        Ok(Self {
            store_backend,
            table_name,
            region,
            max_concurrent_accounts,
            max_concurrent_resources,
            invocation_budget,
        })
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn parse_store_backend(raw: &str) -> Result<StoreBackend, ConfigError> {
    raw.parse().map_err(|e| ConfigError::Invalid {
        field: "store_backend".into(),
        message: format!("{e}"),
    })
}

fn parse_env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    match env_var(key) {
        Some(raw) => raw
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                field: key.to_string(),
                message: format!("'{raw}' is not a positive integer"),
            }),
        None => Ok(None),
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_concurrent_accounts() -> usize {
    8
}

fn default_max_concurrent_resources() -> usize {
    16
}

fn default_invocation_budget() -> Duration {
    Duration::from_secs(240)
}
