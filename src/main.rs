use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;

use polaris_core::events::AgentEvent;
use polaris_core::provider::{GenerateOptions, LlmProvider};
use polaris_engine::{JobConfig, MessageJob, RetryPolicy, RouterConfig, StepJournal};
use polaris_llm::gateway::HttpGatewayProvider;
use polaris_llm::reliable::{ReliableConfig, ReliableProvider};
use polaris_server::{Dispatcher, LocalJobBus, ServerConfig};
use polaris_settings::PolarisSettings;
use polaris_store::{Database, SystemStore};
use polaris_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "polaris", about = "Agentic message pipeline for coding projects")]
struct Cli {
    /// Settings file. Defaults to ~/.polaris/settings.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and the job bus.
    Serve,
    /// Redeliver unacknowledged triggers, wait for them, then exit.
    Recover,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => polaris_settings::load_settings_from_path(path),
        None => polaris_settings::load_settings(),
    }
    .context("failed to load settings")?;

    let _telemetry = init_telemetry(TelemetryConfig::from_level_name(
        &settings.logging.level,
        settings.logging.json,
    ));

    if settings.internal_key.is_none() {
        tracing::warn!("POLARIS_INTERNAL_KEY is not set, every message job will fail");
    }

    let db_path = settings.database.resolved_path();
    let db = Database::open(&db_path).context("failed to open database")?;
    let store = Arc::new(SystemStore::new(db, settings.internal_key.clone()));

    let (event_tx, _) = broadcast::channel::<AgentEvent>(1024);
    let job = Arc::new(build_job(&settings, &store, event_tx)?);
    let bus = Arc::new(LocalJobBus::new(job, store.jobs()));
    let _event_log = bus.spawn_event_log();

    match cli.command {
        Command::Serve => serve(settings, store, bus).await,
        Command::Recover => recover(bus).await,
    }
}

fn build_job(
    settings: &PolarisSettings,
    store: &Arc<SystemStore>,
    events: broadcast::Sender<AgentEvent>,
) -> anyhow::Result<MessageJob> {
    let gateway = &settings.gateway;
    let timeout = Duration::from_millis(gateway.timeout_ms);
    // Each model turn is a journaled step and the step runner owns retries.
    let agent: Arc<dyn LlmProvider> = Arc::new(ReliableProvider::new(
        HttpGatewayProvider::new(&gateway.base_url, &gateway.agent_model, timeout)
            .context("failed to build agent provider")?,
        ReliableConfig::breaker_only(),
    ));
    let titler: Arc<dyn LlmProvider> = Arc::new(ReliableProvider::new(
        HttpGatewayProvider::new(&gateway.base_url, &gateway.title_model, timeout)
            .context("failed to build title provider")?,
        ReliableConfig::breaker_only(),
    ));

    let config = JobConfig {
        settle_delay: Duration::from_millis(settings.agent.settle_delay_ms),
        history_limit: settings.agent.history_limit,
        retry: RetryPolicy {
            max_attempts: settings.steps.max_attempts,
            base_delay: Duration::from_millis(settings.steps.base_delay_ms),
            max_delay: Duration::from_millis(settings.steps.max_delay_ms),
        },
        router: RouterConfig {
            max_iterations: settings.agent.max_iterations,
            generate_options: GenerateOptions {
                max_tokens: Some(settings.agent.max_tokens),
                ..GenerateOptions::default()
            },
            tool_output_limit: settings.agent.tool_output_limit_bytes,
            ..RouterConfig::default()
        },
    };

    let journal: Arc<dyn StepJournal> = Arc::new(store.jobs());
    Ok(MessageJob::new(
        store.clone(),
        store.clone(),
        agent,
        titler,
        journal,
        settings.internal_key.clone(),
        config,
        events,
    ))
}

async fn serve(
    settings: PolarisSettings,
    store: Arc<SystemStore>,
    bus: Arc<LocalJobBus>,
) -> anyhow::Result<()> {
    let redelivered = bus.recover().await.context("failed to redeliver pending triggers")?;
    if redelivered > 0 {
        tracing::info!(redelivered, "resumed interrupted message jobs");
    }

    let dispatcher = Arc::new(Dispatcher::new(store, bus, settings.internal_key.clone()));
    let config = ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
    };
    let handle = polaris_server::start(config, dispatcher)
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port, "polaris server ready");

    tokio::select! {
        () = handle.wait() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl+c")?;
        }
    }

    tracing::info!("shutting down");
    Ok(())
}

async fn recover(bus: Arc<LocalJobBus>) -> anyhow::Result<()> {
    let started = bus.recover().await.context("failed to redeliver pending triggers")?;
    tracing::info!(started, "redelivered pending triggers");
    while bus.in_flight() > 0 {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    tracing::info!("all redelivered jobs finished");
    Ok(())
}
