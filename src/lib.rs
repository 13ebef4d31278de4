//! Shared test harness for the top-level `tests/integration/*.rs` suite
//! (spec.md §8): wires a full in-process pipeline -- bus, store, worker,
//! correlator, broadcast engine, gateway router -- over the in-memory/mock
//! doubles, the way the teacher's own root crate backs its
//! `tests/integration/*.rs` convention. No network dependency (NATS/Postgres)
//! is required to exercise the pipeline's properties end to end.

use broadcast_gateway::auth::StaticKeyVerifier;
use broadcast_gateway::broadcast::{BroadcastConfig, BroadcastEngine};
use broadcast_gateway::GatewayState;
use scene_bus::{Bus, MockBus};
use scene_correlator::Correlator;
use scene_generator::{Generator, PlaceholderGenerator};
use scene_snapshotter::{ObjectStore, Snapshotter};
use scene_store::{MemoryStore, StoreBackend};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Knobs a test can override; everything else defaults to spec.md §6 values
/// (scaled down where a test suite would otherwise need to wait minutes).
pub struct PipelineOpts {
    pub generator: Arc<dyn Generator>,
    pub fps: u32,
    pub queue_cap: usize,
    pub soft_backlog_bytes: u64,
    pub hard_backlog_bytes: u64,
    pub worker_concurrency: usize,
    pub worker_count: usize,
    pub generator_max_ms: Duration,
    pub correlator_timeout: Duration,
    pub max_conn_per_ip: usize,
    pub max_conn_per_tenant: usize,
    pub snapshot_interval: Duration,
    pub object_store: Option<Arc<dyn ObjectStore>>,
    pub token_key: Vec<u8>,
}

impl Default for PipelineOpts {
    fn default() -> Self {
        Self {
            generator: Arc::new(PlaceholderGenerator),
            fps: 30,
            queue_cap: 16,
            soft_backlog_bytes: 4 * 1024 * 1024,
            hard_backlog_bytes: 16 * 1024 * 1024,
            worker_concurrency: 4,
            worker_count: 1,
            generator_max_ms: Duration::from_secs(10),
            correlator_timeout: Duration::from_secs(5),
            max_conn_per_ip: 32,
            max_conn_per_tenant: 256,
            // Long enough that no test accidentally exercises a real tick;
            // tests that care about snapshotting call `Pipeline::snapshot_once`.
            snapshot_interval: Duration::from_secs(3600),
            object_store: None,
            token_key: b"integration-test-key".to_vec(),
        }
    }
}

/// A fully wired pipeline over in-process doubles, with handles a test needs
/// to drive or assert against it.
pub struct Pipeline {
    pub addr: SocketAddr,
    pub bus: Arc<dyn Bus>,
    pub store: Arc<dyn StoreBackend>,
    pub broadcast: BroadcastEngine,
    pub verifier: Arc<StaticKeyVerifier>,
    worker_shutdown_tx: tokio::sync::watch::Sender<bool>,
    snapshot_shutdown_tx: tokio::sync::watch::Sender<bool>,
    server_handle: tokio::task::JoinHandle<()>,
}

impl Pipeline {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws/v1/stream", self.addr)
    }

    pub fn token(&self, sub: &str, tenant_id: &str, scopes: &[&str]) -> String {
        self.verifier.sign(sub, tenant_id, scopes)
    }

    /// Step 3 of the Supervisor's shutdown sequence (spec.md §4.9), isolated
    /// here so a test can simulate a worker replica going away without
    /// tearing down the rest of the pipeline.
    pub fn stop_worker(&self) {
        let _ = self.worker_shutdown_tx.send(true);
    }

    pub fn stop_snapshotter(&self) {
        let _ = self.snapshot_shutdown_tx.send(true);
    }

    /// Stops the gateway's axum listener, simulating a gateway process
    /// restart (spec.md §9's topological startup/shutdown applies per
    /// process; the bus and store outlive this).
    pub fn stop_gateway(&self) {
        self.server_handle.abort();
    }
}

pub async fn spawn(opts: PipelineOpts) -> Pipeline {
    let bus: Arc<dyn Bus> = Arc::new(MockBus::new());
    let store: Arc<dyn StoreBackend> = Arc::new(MemoryStore::new());
    let correlator = Arc::new(Correlator::new(bus.clone(), opts.correlator_timeout).await.unwrap());
    let verifier = Arc::new(StaticKeyVerifier::new(opts.token_key.clone()));
    let (broadcast, _broadcast_handle) = BroadcastEngine::spawn(BroadcastConfig {
        fps: opts.fps,
        queue_cap: opts.queue_cap,
        soft_backlog_bytes: opts.soft_backlog_bytes,
        hard_backlog_bytes: opts.hard_backlog_bytes,
    });

    let (worker_shutdown_tx, worker_shutdown_rx) = tokio::sync::watch::channel(false);
    for i in 0..opts.worker_count {
        let worker = Arc::new(scene_worker::Worker::new(
            bus.clone(),
            store.clone(),
            opts.generator.clone(),
            format!("integration-worker-{i}"),
            opts.generator_max_ms,
        ));
        tokio::spawn(worker.run(opts.worker_concurrency, worker_shutdown_rx.clone()));
    }

    let (snapshot_shutdown_tx, snapshot_shutdown_rx) = tokio::sync::watch::channel(false);
    let snapshotter = Snapshotter::new(store.clone(), opts.object_store.clone(), opts.snapshot_interval);
    tokio::spawn(snapshotter.run(snapshot_shutdown_rx));

    let state = GatewayState::new(
        bus.clone(),
        store.clone(),
        correlator,
        verifier.clone(),
        broadcast.clone(),
        opts.max_conn_per_ip,
        opts.max_conn_per_tenant,
    );
    let router = broadcast_gateway::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await;
    });

    Pipeline { addr, bus, store, broadcast, verifier, worker_shutdown_tx, snapshot_shutdown_tx, server_handle }
}

/// Re-binds a gateway router to a *new* listener over the same bus/store,
/// simulating the gateway process coming back up after a restart while the
/// bus and store (owned by the surrounding system, not this process) persist.
pub async fn respawn_gateway(pipeline: &Pipeline) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let correlator = Arc::new(Correlator::new(pipeline.bus.clone(), Duration::from_secs(5)).await.unwrap());
    let (broadcast, _handle) = BroadcastEngine::spawn(BroadcastConfig::default());
    let state = GatewayState::new(
        pipeline.bus.clone(),
        pipeline.store.clone(),
        correlator,
        pipeline.verifier.clone(),
        broadcast,
        32,
        256,
    );
    let router = broadcast_gateway::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await;
    });
    (addr, handle)
}
