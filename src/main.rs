//! # LedgerClaw — ledger automation engine
//!
//! Usage:
//!   ledgerclaw run                          # Start the engine (Ctrl-C to stop)
//!   ledgerclaw run --config ./config.toml   # Custom config file
//!   ledgerclaw check-config                 # Validate and print the effective config
//!   ledgerclaw schedule "*/5 * * * *" -n 3  # Preview the next firings of a schedule

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use ledgerclaw_core::EngineConfig;
use ledgerclaw_core::traits::MetricsCollector;
use ledgerclaw_engine::{ActionDispatcher, NoopMetrics, RpcLedgerClient, TracingMetrics, TriggerService};
use ledgerclaw_scheduler::{NotifyRouter, SqliteStore, parse_schedule};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ledgerclaw",
    version,
    about = "⛓️ LedgerClaw — event- and schedule-driven ledger automation"
)]
struct Cli {
    /// Config file (default: ~/.ledgerclaw/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the trigger engine
    Run,
    /// Validate the configuration and print it
    CheckConfig,
    /// Print the next firings of a schedule expression
    Schedule {
        /// Cron expression, descriptor or "every N minutes"
        expression: String,
        /// How many firings to show
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };
    Ok(config)
}

fn init_logging(level: &str, verbose: bool) {
    let filter = if verbose {
        "ledgerclaw=debug,ledgerclaw_engine=debug,ledgerclaw_scheduler=debug".to_string()
    } else {
        level.to_string()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run => {
            let config = load_config(cli.config.as_ref())?;
            init_logging(&config.log_level, cli.verbose);
            run(config).await
        }
        Command::CheckConfig => {
            let config = load_config(cli.config.as_ref())?;
            config.validate()?;
            println!("{}", config.to_toml()?);
            println!("✅ Configuration is valid");
            Ok(())
        }
        Command::Schedule { expression, count } => {
            let spec = parse_schedule(&expression)?;
            let upcoming = spec.upcoming(Utc::now(), count);
            if upcoming.is_empty() {
                println!("⚠️  '{expression}' has no upcoming firings");
            }
            for (i, at) in upcoming.iter().enumerate() {
                println!("{:>3}. {}", i + 1, at.to_rfc3339());
            }
            Ok(())
        }
    }
}

async fn run(config: EngineConfig) -> Result<()> {
    config.validate()?;
    tracing::info!("⛓️ LedgerClaw v{}", env!("CARGO_PKG_VERSION"));

    let store_path = config.resolved_store_path();
    let store = Arc::new(
        SqliteStore::open(&store_path)
            .with_context(|| format!("opening trigger store {}", store_path.display()))?,
    );
    tracing::info!("💾 Trigger store: {}", store_path.display());

    let ledger = Arc::new(RpcLedgerClient::new(&config.rpc_endpoint)?);
    tracing::info!("🔗 Ledger RPC: {}", ledger.endpoint());

    let router = NotifyRouter::from_config(&config.notify);
    tracing::info!("📣 Notification targets: {}", router.target_names().join(", "));

    // no signing identity is bound here; contract_call actions report it as unavailable
    let executor = ActionDispatcher::new(config.network_magic)
        .with_ledger(ledger.clone())
        .with_notifier(Arc::new(router));

    let tracing_metrics = config.metrics_enabled.then(|| Arc::new(TracingMetrics::new()));
    let metrics: Arc<dyn MetricsCollector> = match &tracing_metrics {
        Some(m) => m.clone(),
        None => Arc::new(NoopMetrics),
    };

    let service = TriggerService::builder(config)
        .store(store)
        .ledger(ledger)
        .executor(Arc::new(executor))
        .metrics(metrics)
        .build()?;

    service.start().await?;
    tracing::info!(
        "📋 {} triggers loaded. Press Ctrl-C to stop.",
        service.list_triggers(None).await.len()
    );

    tokio::signal::ctrl_c().await?;
    service.stop().await?;

    if let Some(metrics) = tracing_metrics {
        tracing::info!(
            "📊 Final metrics: {}",
            serde_json::to_string(&metrics.snapshot())?
        );
    }
    Ok(())
}
