//! Broadcast engine (spec's C7 core): a single-threaded actor owning the
//! per-socket subscription table, generalizing the teacher's
//! `ForwarderCommand`/`cmd_tx`/`cmd_rx` idiom (`state.rs`, `ws_forwarder.rs`)
//! from one channel per forwarder into one channel for the whole fan-out
//! engine. Ticks at `fpsTarget`, applies drop-oldest backpressure per
//! spec.md §4.6.4, and reports every drop/close reason to `scene-telemetry`.

use scene_protocol::{close_codes, Frame, REALITY_STREAM_SCOPE};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::instrument;

pub type SocketId = u64;

pub const DEFAULT_QUEUE_CAP: usize = 16;
pub const DEFAULT_SOFT_BACKLOG_BYTES: u64 = 4 * 1024 * 1024;
pub const DEFAULT_HARD_BACKLOG_BYTES: u64 = 16 * 1024 * 1024;
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(200);
/// Consecutive over-hard-cap ticks before a socket is force-closed
/// (spec.md §4.6.4).
const MAX_HARD_CAP_TICKS: u32 = 3;

/// Monotonic id generator for sockets registering with the engine.
pub fn next_socket_id() -> SocketId {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone)]
pub enum WsOutbound {
    Frame(Frame),
    Close(u16),
}

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub fps: u32,
    pub queue_cap: usize,
    pub soft_backlog_bytes: u64,
    pub hard_backlog_bytes: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            queue_cap: DEFAULT_QUEUE_CAP,
            soft_backlog_bytes: DEFAULT_SOFT_BACKLOG_BYTES,
            hard_backlog_bytes: DEFAULT_HARD_BACKLOG_BYTES,
        }
    }
}

enum Command {
    Register {
        socket_id: SocketId,
        tenant_id: String,
        scopes: Vec<String>,
        writer_tx: mpsc::Sender<WsOutbound>,
        reply: oneshot::Sender<()>,
    },
    Unregister {
        socket_id: SocketId,
    },
    Produce {
        tenant_id: String,
        frame: Frame,
    },
    ReportWrite {
        socket_id: SocketId,
        bytes_confirmed: u64,
        ok: bool,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct SocketState {
    tenant_id: String,
    scopes: Vec<String>,
    writer_tx: mpsc::Sender<WsOutbound>,
    queue: VecDeque<Frame>,
    /// Bytes handed to the writer task but not yet confirmed flushed -- the
    /// closest approximation to a real `bufferedAmount` this stack can get
    /// without a raw socket handle (axum/tokio-tungstenite don't expose one).
    backlog_bytes: u64,
    consecutive_over_hard_cap: u32,
}

#[derive(Clone)]
pub struct BroadcastEngine {
    cmd_tx: mpsc::Sender<Command>,
}

impl BroadcastEngine {
    pub fn spawn(config: BroadcastConfig) -> (Self, tokio::task::JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(1024);
        let handle = tokio::spawn(run_loop(config, cmd_rx));
        (Self { cmd_tx }, handle)
    }

    /// Registers a new socket and returns the receiver its connection task
    /// should drain for outbound frames.
    pub async fn register(&self, tenant_id: String, scopes: Vec<String>) -> (SocketId, mpsc::Receiver<WsOutbound>) {
        let socket_id = next_socket_id();
        let (writer_tx, writer_rx) = mpsc::channel(4);
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(Command::Register { socket_id, tenant_id, scopes, writer_tx, reply: reply_tx })
            .await;
        let _ = reply_rx.await;
        (socket_id, writer_rx)
    }

    pub async fn unregister(&self, socket_id: SocketId) {
        let _ = self.cmd_tx.send(Command::Unregister { socket_id }).await;
    }

    pub async fn produce(&self, tenant_id: String, frame: Frame) {
        let _ = self.cmd_tx.send(Command::Produce { tenant_id, frame }).await;
    }

    /// Connection task feedback after attempting a write: `ok = false` means
    /// the socket is gone and should be torn down; `ok = true` confirms
    /// `bytes_confirmed` left the backlog.
    pub async fn report_write(&self, socket_id: SocketId, bytes_confirmed: u64, ok: bool) {
        let _ = self.cmd_tx.send(Command::ReportWrite { socket_id, bytes_confirmed, ok }).await;
    }

    /// Step 2 of the Supervisor's shutdown sequence (spec.md §4.9): stop
    /// accepting new frames and close every socket `going_away`, bounded by
    /// `budget`.
    pub async fn shutdown(&self, budget: Duration) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Shutdown { reply: reply_tx }).await;
        let _ = tokio::time::timeout(budget, reply_rx).await;
    }
}

#[instrument(name = "broadcast.deliver", skip(config, cmd_rx))]
async fn run_loop(config: BroadcastConfig, mut cmd_rx: mpsc::Receiver<Command>) {
    let mut sockets: HashMap<SocketId, SocketState> = HashMap::new();
    let tick_interval = Duration::from_millis(1000 / u64::from(config.fps.max(1)));
    let mut ticker = tokio::time::interval(tick_interval);
    let mut draining = false;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break; };
                match cmd {
                    Command::Register { socket_id, tenant_id, scopes, writer_tx, reply } => {
                        sockets.insert(socket_id, SocketState {
                            tenant_id,
                            scopes,
                            writer_tx,
                            queue: VecDeque::with_capacity(config.queue_cap),
                            backlog_bytes: 0,
                            consecutive_over_hard_cap: 0,
                        });
                        let _ = reply.send(());
                    }
                    Command::Unregister { socket_id } => {
                        if sockets.remove(&socket_id).is_some() {
                            scene_telemetry::metrics::record_subscription_closed("unregistered");
                        }
                    }
                    Command::Produce { tenant_id, frame } => {
                        if draining { continue; }
                        for state in sockets.values_mut().filter(|s| {
                            s.tenant_id == tenant_id && s.scopes.iter().any(|sc| sc == REALITY_STREAM_SCOPE)
                        }) {
                            if state.queue.len() >= config.queue_cap {
                                state.queue.pop_front();
                                scene_telemetry::metrics::record_frame_drop("queue_full");
                            }
                            state.queue.push_back(frame.clone());
                        }
                    }
                    Command::ReportWrite { socket_id, bytes_confirmed, ok } => {
                        if !ok {
                            if sockets.remove(&socket_id).is_some() {
                                scene_telemetry::metrics::record_subscription_closed("write_error");
                            }
                            continue;
                        }
                        if let Some(state) = sockets.get_mut(&socket_id) {
                            state.backlog_bytes = state.backlog_bytes.saturating_sub(bytes_confirmed);
                        }
                    }
                    Command::Shutdown { reply } => {
                        draining = true;
                        for (_, state) in sockets.iter() {
                            let _ = state.writer_tx.try_send(WsOutbound::Close(close_codes::GOING_AWAY));
                        }
                        let _ = reply.send(());
                    }
                }
            }
            _ = ticker.tick() => {
                let mut total_queue_len: u64 = 0;
                let mut closed = Vec::new();
                for (&socket_id, state) in sockets.iter_mut() {
                    total_queue_len += state.queue.len() as u64;

                    if state.backlog_bytes > config.hard_backlog_bytes {
                        state.consecutive_over_hard_cap += 1;
                        if state.consecutive_over_hard_cap >= MAX_HARD_CAP_TICKS {
                            let _ = state.writer_tx.try_send(WsOutbound::Close(close_codes::GOING_AWAY));
                            closed.push(socket_id);
                            scene_telemetry::metrics::record_subscription_closed("hard_backlog");
                            continue;
                        }
                    } else {
                        state.consecutive_over_hard_cap = 0;
                    }

                    if state.backlog_bytes > config.soft_backlog_bytes {
                        scene_telemetry::metrics::record_frame_drop("tcp_backlog");
                        continue;
                    }

                    let Some(frame) = state.queue.pop_front() else { continue };
                    let frame_bytes = serde_json::to_vec(&frame).map(|v| v.len() as u64).unwrap_or(0);
                    match state.writer_tx.try_send(WsOutbound::Frame(frame)) {
                        Ok(()) => state.backlog_bytes += frame_bytes,
                        Err(_) => scene_telemetry::metrics::record_frame_drop("write_timeout"),
                    }
                }
                for socket_id in closed {
                    sockets.remove(&socket_id);
                }
                scene_telemetry::metrics::set_broadcast_queue_len(total_queue_len);
                scene_telemetry::metrics::set_broadcast_fps(f64::from(config.fps));
                let max_backlog = sockets.values().map(|s| s.backlog_bytes).max().unwrap_or(0);
                scene_telemetry::metrics::set_ws_backlog_bytes(max_backlog);

                if draining && sockets.is_empty() {
                    break;
                }
            }
        }
    }
}
