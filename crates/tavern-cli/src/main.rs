mod config;

use clap::{Parser, Subcommand};
use config::{StoreBackend, TavernConfig, API_KEY_ENV};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tavern_agent::{GenerationGateway, GeneratorProvider};
use tavern_gateway::{
    spawn_sweeper, GatewayServer, LocalPushEndpoint, MemoryConnectionRegistry, OrchestratorConfig,
    SessionOrchestrator,
};
use tavern_session::{FileSessionStore, MemorySessionStore, SessionStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tavern", about = "Tavern: shared storytelling sessions with a streamed narrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "tavern.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print the resolved configuration with secrets redacted
    Config,
}

fn seconds(value: u64) -> anyhow::Result<chrono::Duration> {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| anyhow::anyhow!("Duration of {value}s is out of range"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let config = TavernConfig::load(&cli.config)
        .await?
        .with_api_key_fallback(std::env::var(API_KEY_ENV).ok());

    match cli.command {
        Commands::Serve { host, port } => serve(config, host, port).await?,
        Commands::Config => println!("{}", config.redacted().to_toml_string()?),
    }

    Ok(())
}

async fn serve(config: TavernConfig, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let host = host.unwrap_or(config.server.host);
    let port = port.unwrap_or(config.server.port);

    info!("Starting Tavern gateway on {host}:{port}");

    if config.model.api_key.is_empty() {
        warn!("No API key configured, generation requests will fail");
    }
    if config.model.provider == GeneratorProvider::Assistants && config.model.assistant_id.is_none() {
        warn!("Assistants provider selected without an assistant_id");
    }

    // Initialize sessions
    let sessions: Arc<dyn SessionStore> = match config.sessions.backend {
        StoreBackend::File => {
            let dir = config.sessions.data_dir.join("sessions");
            info!(dir = %dir.display(), "Using file session store");
            Arc::new(FileSessionStore::new(dir).await?)
        }
        StoreBackend::Memory => {
            info!("Using in-memory session store");
            Arc::new(MemorySessionStore::new())
        }
    };

    let connections = Arc::new(MemoryConnectionRegistry::new(seconds(
        config.connections.ttl_secs,
    )?));
    let generator = Arc::new(
        GenerationGateway::new(config.model)
            .with_timeout(Duration::from_secs(config.orchestrator.generation_timeout_secs)),
    );
    let push = LocalPushEndpoint::new();

    let orchestrator = Arc::new(SessionOrchestrator::new(
        sessions,
        connections,
        generator,
        push.clone(),
        OrchestratorConfig {
            narrator_name: config.orchestrator.narrator_name,
            processing_lease: seconds(config.sessions.processing_lease_secs)?,
            session_ttl: seconds(config.sessions.ttl_secs)?,
        },
    ));

    let sweeper = spawn_sweeper(
        orchestrator.clone(),
        Duration::from_secs(config.connections.sweep_interval_secs),
    );

    let app = GatewayServer::build(orchestrator, push);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Tavern gateway listening on {addr}");
    axum::serve(listener, app).await?;

    sweeper.abort();
    Ok(())
}
