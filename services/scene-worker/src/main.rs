// scene-worker: stateless replica of the scene generation pool (spec's C4+C5).
//
// Startup order mirrors the teacher's `main.rs`: load config, init tracing,
// connect dependencies, then run. A configuration or store error exits 1;
// an unrecoverable bus failure at startup exits 3 (spec.md §6).

use clap::Parser;
use scene_bus::{Bus, BusConfig, NatsBus};
use scene_config::{PipelineConfig, StoreBackendKind};
use scene_generator::{Generator, PlaceholderGenerator};
use scene_store::{MemoryStore, SqlStore, StoreBackend};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Spec.md §4.9 step 3: workers finish in-flight jobs bounded by 10s.
const WORKER_DRAIN_BUDGET: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "scene-worker", version, about = "Holographic scene generation worker")]
struct Cli {
    /// Overrides LOG_LEVEL for this run.
    #[arg(long)]
    log_level: Option<String>,
    /// Identity used in metrics/tracing attributes and `producedBy`. Defaults
    /// to a generated id so replicas don't collide.
    #[arg(long)]
    worker_id: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match PipelineConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };
    let log_level = cli.log_level.unwrap_or_else(|| config.log_level.clone());
    let _tracing_guard = scene_telemetry::init_tracing(
        &config.service_name,
        &log_level,
        config.otel_exporter_otlp_endpoint.as_deref(),
    );

    let worker_id = cli.worker_id.unwrap_or_else(|| format!("scene-worker-{}", uuid::Uuid::new_v4()));
    info!(version = env!("CARGO_PKG_VERSION"), worker_id = %worker_id, "scene-worker starting");

    if config.export_prom {
        let addr = ([0, 0, 0, 0], config.prom_port).into();
        if let Err(e) = scene_telemetry::metrics::install_prometheus_exporter(addr) {
            eprintln!("FATAL: failed to install prometheus exporter: {e}");
            std::process::exit(1);
        }
    }

    let bus: Arc<dyn Bus> = match NatsBus::connect(BusConfig::from_env()).await {
        Ok(bus) => Arc::new(bus),
        Err(e) => {
            eprintln!("FATAL: unrecoverable bus failure at startup: {e}");
            std::process::exit(3);
        }
    };

    let store: Arc<dyn StoreBackend> = match config.store_backend {
        StoreBackendKind::Memory => Arc::new(MemoryStore::new()),
        StoreBackendKind::Sql => {
            let Some(database_url) = &config.database_url else {
                eprintln!("FATAL: STORE_BACKEND=sql requires DATABASE_URL");
                std::process::exit(1);
            };
            match SqlStore::connect(database_url).await {
                Ok(store) => {
                    if let Err(e) = store.run_migrations().await {
                        eprintln!("FATAL: store migration failed: {e}");
                        std::process::exit(1);
                    }
                    Arc::new(store)
                }
                Err(e) => {
                    eprintln!("FATAL: failed to connect to store: {e}");
                    std::process::exit(1);
                }
            }
        }
    };

    let generator: Arc<dyn Generator> = Arc::new(PlaceholderGenerator);
    let worker = Arc::new(scene_worker::Worker::new(
        bus,
        store,
        generator,
        worker_id,
        config.generator_max_ms,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let run_handle = tokio::spawn(worker.run(config.worker_concurrency, shutdown_rx));

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received, draining in-flight jobs");
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(WORKER_DRAIN_BUDGET, run_handle).await.is_err() {
        error!("in-flight job drain exceeded its budget, force-exiting");
        std::process::exit(2);
    }
    info!("scene-worker shut down gracefully");
}
