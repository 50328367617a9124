//! Binary entry point: loads config, wires adapters into an `EngineContext`,
//! and dispatches the CLI subcommand. Kept thin on purpose — the way the
//! teacher's own `main.rs` hands everything off to `cli.rs`/`config.rs`
//! immediately.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal::ctrl_c;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use syncbridge::cli::{CdcAction, Cli, Commands};
use syncbridge::config::EngineConfig;
use syncbridge::context::{
    EngineContext, SingleInstanceListBackendResolver, SingleInstanceSourceDbResolver,
};
use syncbridge::definition_repository::PostgresDefinitionRepository;
use syncbridge::engine::orchestrator::Orchestrator;
use syncbridge::engine::{cdc_consumer, cdc_ingest, drift, move_manager};
use syncbridge::ledger_store::PostgresLedgerStore;
use syncbridge::list_backend::HttpListBackend;
use syncbridge::queue::RedisStreamQueue;
use syncbridge::run_store::PostgresRunStore;
use syncbridge::source_db::PostgresSourceDb;
use syncbridge::{clock::SystemClock, EngineError};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Commands::ConfigCheck = cli.command {
        match syncbridge::cli::config_check(&cli.config) {
            Ok(()) => {
                println!("{} is valid", cli.config.display());
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
    }

    let config = match EngineConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };
    init_tracing(&config);

    if let Err(e) = run(config, cli.command).await {
        error!(error = %e, "fatal error");
        std::process::exit(1);
    }
}

fn init_tracing(config: &EngineConfig) {
    let filter = EnvFilter::try_new(&config.logging.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn build_context(config: EngineConfig) -> Result<EngineContext, EngineError> {
    let config = Arc::new(config);

    let source_db = PostgresSourceDb::connect(&config.database_url).await?;
    let definitions = PostgresDefinitionRepository::connect(&config.database_url).await?;
    let ledger = PostgresLedgerStore::connect(&config.database_url).await?;
    let runs = PostgresRunStore::connect(&config.database_url).await?;

    let list_backend_url = config.list_backend_url.clone();
    let list_backend = HttpListBackend::new(list_backend_url, fetch_graph_token);

    let queue = RedisStreamQueue::connect(&config.redis_url).await?;
    queue.ensure_group(&config.cdc.stream_key, &config.cdc.group_name).await?;

    Ok(EngineContext::new(
        config,
        Arc::new(definitions),
        Arc::new(ledger),
        Arc::new(runs),
        Arc::new(queue),
        Arc::new(SingleInstanceSourceDbResolver(Arc::new(source_db))),
        Arc::new(SingleInstanceListBackendResolver(Arc::new(list_backend))),
        Arc::new(SystemClock),
    ))
}

/// OAuth2 client-credentials token fetch against Azure AD, reading the
/// tenant/client id+secret from the environment the way the original
/// `GraphClient` construction in
/// `examples/original_source/backend/app/services/drift.py` does.
async fn fetch_graph_token() -> Result<(String, Duration), EngineError> {
    let tenant_id = std::env::var("AZURE_TENANT_ID").map_err(|_| {
        EngineError::Config("AZURE_TENANT_ID is not set".to_string())
    })?;
    let client_id = std::env::var("AZURE_CLIENT_ID").map_err(|_| {
        EngineError::Config("AZURE_CLIENT_ID is not set".to_string())
    })?;
    let client_secret = std::env::var("AZURE_CLIENT_SECRET").map_err(|_| {
        EngineError::Config("AZURE_CLIENT_SECRET is not set".to_string())
    })?;
    let authority_host = std::env::var("AZURE_AUTHORITY_HOST")
        .unwrap_or_else(|_| "https://login.microsoftonline.com".to_string());

    let url = format!("{authority_host}/{tenant_id}/oauth2/v2.0/token");
    let params = [
        ("client_id", client_id.as_str()),
        ("client_secret", client_secret.as_str()),
        ("scope", "https://graph.microsoft.com/.default"),
        ("grant_type", "client_credentials"),
    ];

    let client = reqwest::Client::new();
    let response = client
        .post(&url)
        .form(&params)
        .send()
        .await
        .map_err(|e| EngineError::Transport(e.to_string()))?;

    #[derive(serde::Deserialize)]
    struct TokenResponse {
        access_token: String,
        expires_in: u64,
    }

    let body: TokenResponse = response
        .error_for_status()
        .map_err(|e| EngineError::Transport(e.to_string()))?
        .json()
        .await
        .map_err(|e| EngineError::Transport(e.to_string()))?;

    Ok((body.access_token, Duration::from_secs(body.expires_in)))
}

async fn run(config: EngineConfig, command: Commands) -> Result<(), EngineError> {
    let health_port = config.health.port;
    let metrics_port = config.health.metrics_port;

    let ctx = build_context(config).await?;
    let ctx = Arc::new(ctx);

    match command {
        Commands::ConfigCheck => unreachable!("handled before context construction"),

        Commands::Run { sync_def_id, kind } => {
            let orchestrator = Orchestrator::new();
            let run = orchestrator.dispatch(&ctx, sync_def_id, kind.into()).await?;
            info!(run_id = %run.id, status = ?run.status, "run complete");
            Ok(())
        }

        Commands::Move { sync_def_id, source_identity_hash, new_target_list_id, item_file } => {
            let item = syncbridge::cli::load_item_file(&item_file)
                .map_err(|e| EngineError::Config(e.to_string()))?;
            let outcome =
                move_manager::move_item(&ctx, sync_def_id, &source_identity_hash, new_target_list_id, &item)
                    .await?;
            info!(ok = outcome.ok, status = ?outcome.status, new_item_id = ?outcome.new_item_id, "move complete");
            Ok(())
        }

        Commands::Report { sync_def_id, kind } => {
            let report = drift::report(&ctx, sync_def_id, kind.into()).await?;
            println!("{} issue(s) found", report.items.len());
            for issue in &report.items {
                println!("- {} item {}: {}", issue.issue, issue.target_item_id, issue.details);
            }
            Ok(())
        }

        Commands::Cdc { action } => {
            spawn_ambient_servers(health_port, metrics_port, ctx.clone());

            let (stop_tx, stop_rx) = watch::channel(false);
            tokio::spawn(async move {
                if ctrl_c().await.is_ok() {
                    let _ = stop_tx.send(true);
                }
            });

            match action {
                CdcAction::Ingest { instance_id, slot_name } => {
                    cdc_ingest::run_cdc_ingest(&ctx, instance_id, &slot_name, stop_rx).await
                }
                CdcAction::Consume { consumer_name } => {
                    cdc_consumer::run_cdc_consumer(&ctx, &consumer_name, stop_rx).await
                }
            }
        }
    }
}

fn spawn_ambient_servers(health_port: Option<u16>, metrics_port: Option<u16>, ctx: Arc<EngineContext>) {
    if let Some(port) = health_port {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = syncbridge::health::server(port, ctx).await {
                error!(error = %e, "healthcheck server exited");
            }
        });
    }
    if let Some(port) = metrics_port {
        tokio::spawn(async move {
            if let Err(e) = syncbridge::metrics::server(port, ctx).await {
                error!(error = %e, "metrics server exited");
            }
        });
    }
}
