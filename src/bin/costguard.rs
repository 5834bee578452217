//! Command-line entry point. `run` executes one engine invocation (full or
//! partial mode, selected by whether a schedule id/name is given); `validate`
//! loads configuration and checks store connectivity without driving any
//! resources.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use costguard::config::EngineConfig;
use costguard::credentials::sts::StsCredentialBroker;
use costguard::credentials::CredentialBroker;
use costguard::store::{build_store, StoreAdapter};
use costguard::{InvocationPayload, Orchestrator};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "costguard", version, about = "Cost-optimization resource scheduler")]
struct Cli {
    /// Path to a TOML configuration file. Environment variables always take precedence.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one engine invocation.
    Run(RunArgs),
    /// Load configuration and check store connectivity, without driving any resources.
    Validate,
}

#[derive(Args)]
struct RunArgs {
    /// Run a single schedule by id instead of every active schedule for the tenant.
    #[arg(long, conflicts_with = "schedule_name")]
    schedule_id: Option<String>,

    /// Run a single schedule by name instead of every active schedule for the tenant.
    #[arg(long)]
    schedule_name: Option<String>,

    /// Tenant to operate on.
    #[arg(long, default_value = "default")]
    tenant: String,

    /// Bypass the time-window gate; each driver's own desired-state check still applies.
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run(args) => run(config, args).await,
        Command::Validate => validate(config).await,
    }
}

async fn run(config: EngineConfig, args: RunArgs) -> anyhow::Result<()> {
    let store = build_store(config.store_backend, config.table_name.as_deref(), &config.region).await?;
    let credentials: Arc<dyn CredentialBroker> = Arc::new(StsCredentialBroker::new(&config.region).await);
    let orchestrator = Orchestrator::with_default_drivers(store, credentials, config);

    let payload = InvocationPayload {
        schedule_id: args.schedule_id,
        schedule_name: args.schedule_name,
        tenant_id: Some(args.tenant),
        triggered_by: None,
        force: args.force,
    };

    let result = orchestrator.run(payload, CancellationToken::new()).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn validate(config: EngineConfig) -> anyhow::Result<()> {
    let store = build_store(config.store_backend, config.table_name.as_deref(), &config.region).await?;
    let healthy = store.health_check().await?;
    if !healthy {
        anyhow::bail!("store health check reported unhealthy");
    }
    println!("configuration valid, store reachable (backend={:?})", config.store_backend);
    Ok(())
}
