//! mcsd: the multi-cloud scheduler daemon.
//!
//! Single binary that assembles the scheduler:
//! - State store (redb)
//! - Static cloud inventory from `mcs.toml`
//! - Scheduler + placement algorithms
//! - Periodic GC of idle auto-scheduled VMs
//! - REST API (`/doNewAppGroup`, `/api/v1/...`)
//!
//! # Usage
//!
//! ```text
//! mcsd standalone --config /etc/mcs/mcs.toml --data-dir /var/lib/mcs
//! mcsd default-config > mcs.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use mcs_core::SchedulerConfig;
use mcs_scheduler::{CloudProvider, Infra, KubeCluster, Scheduler, StaticCloud, StaticCluster};
use mcs_state::StateStore;

#[derive(Parser)]
#[command(name = "mcsd", about = "Multi-cloud scheduler daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and its API in one process.
    Standalone {
        /// Path to mcs.toml. Built-in defaults are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on; overrides `server.port`.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state; overrides `server.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print the default configuration as TOML.
    DefaultConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Standalone {
            config,
            port,
            data_dir,
        } => {
            let mut config = match config {
                Some(path) => SchedulerConfig::from_file(&path)?,
                None => SchedulerConfig::default(),
            };
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            run_standalone(config).await
        }
        Command::DefaultConfig => {
            print!("{}", SchedulerConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,mcsd=debug,mcs_scheduler=debug,mcs_api=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Clouds and cluster backing this process.
fn build_infra(config: &SchedulerConfig) -> anyhow::Result<Infra> {
    let mut clouds: Vec<Arc<dyn CloudProvider>> = Vec::with_capacity(config.clouds.len());
    for (i, cloud) in config.clouds.iter().enumerate() {
        // Each cloud gets its own 10.<n>.0.0/16 for VM addresses.
        let subnet = u8::try_from(i + 1)
            .map_err(|_| anyhow::anyhow!("at most 255 clouds are supported, got {}", config.clouds.len()))?;
        info!(cloud = %cloud.name, cloud_type = %cloud.cloud_type, "cloud registered");
        clouds.push(Arc::new(StaticCloud::from_config(cloud, subnet)));
    }
    if clouds.is_empty() {
        warn!("no clouds configured, every application will be rejected");
    }
    let kube: Arc<dyn KubeCluster> = Arc::new(StaticCluster::new());
    Ok(Infra::new(clouds, kube))
}

async fn run_standalone(config: SchedulerConfig) -> anyhow::Result<()> {
    info!("multi-cloud scheduler starting in standalone mode");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("mcs.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let infra = build_infra(&config)?;
    let port = config.server.port;
    let gc_config = config.gc.clone();
    let scheduler = Arc::new(Scheduler::new(infra, state, config));
    info!(
        algorithm = %scheduler.config().ga.default_algorithm,
        dry_run = scheduler.config().deploy.dry_run,
        "scheduler initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let gc_handle = if gc_config.enabled {
        let gc_scheduler = Arc::clone(&scheduler);
        let mut shutdown = shutdown_rx.clone();
        let period = Duration::from_secs(gc_config.interval_secs.max(1));
        info!(interval = gc_config.interval_secs, "GC loop enabled");
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick fires immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match gc_scheduler.gc().await {
                            Ok(report) if !report.deleted_vms.is_empty() => {
                                info!(count = report.deleted_vms.len(), "idle VMs removed");
                            }
                            Err(e) => {
                                error!(error = %e, "GC sweep failed");
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }))
    } else {
        info!("GC loop disabled");
        None
    };

    // ── Start API server ───────────────────────────────────────

    let router = mcs_api::build_router(Arc::clone(&scheduler));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    if let Some(handle) = gc_handle {
        let _ = handle.await;
    }

    info!("multi-cloud scheduler stopped");
    Ok(())
}
