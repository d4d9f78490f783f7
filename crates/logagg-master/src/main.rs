//! logagg-master — the logagg coordination server.
//!
//! Single binary that assembles:
//! - Tenant store (redb)
//! - Registry + queue resource pool
//! - Poller supervisor (one heartbeat poller per cluster)
//! - Log tail fan-out
//! - REST API
//!
//! # Usage
//!
//! ```text
//! logagg-master runserver --port 1088 --data-dir /var/lib/logagg --auth key=admin:secret=...
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use logagg_api::{ApiState, build_router};
use logagg_bridge::{HttpTailSource, TailSource};
use logagg_registry::{PollerSupervisor, Registry, TailFanout};
use logagg_state::StateStore;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{AdminConfig, MasterConfig};

#[derive(Parser)]
#[command(name = "logagg-master", about = "logagg master server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server and heartbeat pollers.
    Runserver(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Path to master.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for persistent state.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Admin credentials, as key=<key>:secret=<secret>.
    #[arg(long, value_parser = crate::config::parse_auth)]
    auth: Option<AdminConfig>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Runserver(args) => {
            init_tracing(args.log_json);
            run_server(args).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,logagg=debug"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run_server(args: RunArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => MasterConfig::from_file(path)?,
        None => MasterConfig::default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }
    if let Some(auth) = args.auth {
        config.admin = Some(auth);
    }

    let poller_config = config.poller_config()?;
    let tail_config = config.tail_config()?;

    info!("logagg master starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.storage.data_dir)?;
    let db_path = config.storage.data_dir.join("logagg.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "tenant store opened");

    let registry = Registry::new(store.clone());
    let source: Arc<dyn TailSource> = Arc::new(HttpTailSource::default());
    let supervisor = PollerSupervisor::new(store, source.clone(), poller_config);
    let tail = TailFanout::new(registry.clone(), source, tail_config);

    if config.admin.is_none() {
        info!("no admin credentials configured, admin routes disabled");
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tails_shutdown = CancellationToken::new();

    // ── Start background tasks ─────────────────────────────────

    let supervisor_handle = tokio::spawn({
        let supervisor = supervisor.clone();
        async move {
            supervisor.run(shutdown_rx).await;
        }
    });

    // ── Start API server ───────────────────────────────────────

    let state = ApiState {
        registry,
        tail,
        supervisor,
        admin: config.admin_credentials(),
        shutdown: tails_shutdown.clone(),
    };
    let router = build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, "API server listening");

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
        // Streaming tails never finish on their own.
        tails_shutdown.cancel();
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for the supervisor to stop its pollers.
    let _ = supervisor_handle.await;

    info!("logagg master stopped");
    Ok(())
}
