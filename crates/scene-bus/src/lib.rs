//! Thin pub/sub bus client (spec's C1): publish, queue-group subscribe, and
//! request/reply over a closed set of subjects, with JSON envelope framing.
//!
//! Backed by core NATS pub/sub rather than JetStream -- the at-least-once
//! semantics this spec asks for (reconnect-redelivery, queue groups) map
//! directly onto `subscribe`/`queue_subscribe`/`request` without needing a
//! durable-stream layer.

mod config;
mod mock;
mod nats;

pub use config::BusConfig;
pub use mock::MockBus;
pub use nats::NatsBus;

use scene_error::{ErrorKind, Result, ScenePipelineError};
use scene_protocol::Subject;
use std::time::Duration;
use tokio::sync::mpsc;

/// A single delivered message: the raw envelope bytes plus its subject.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    /// Set only for messages delivered via [`Bus::request`]; a harness that
    /// wants to answer calls back through the bus's reply mechanism (see
    /// `MockBus::respond` for the in-memory implementation).
    pub reply_to: Option<String>,
}

/// A live subscription. Dropping it stops delivery.
pub struct Subscription {
    rx: mpsc::Receiver<BusMessage>,
    _guard: Option<tokio::task::JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<BusMessage>, guard: Option<tokio::task::JoinHandle<()>>) -> Self {
        Self { rx, _guard: guard }
    }

    pub async fn next(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

/// Connection state, observable so callers can await reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    Closed,
}

/// Capability the rest of the pipeline depends on -- implementations are
/// chosen at wire-up by the Supervisor (spec.md §9: capability traits over
/// ambient globals).
#[async_trait::async_trait]
pub trait Bus: Send + Sync + 'static {
    /// Fire-and-forget publish. Fails with `Backpressure` if disconnected
    /// and the local outbound buffer is full.
    async fn publish(&self, subject: &Subject, payload: Vec<u8>) -> Result<()>;

    /// Start a background consumer. `queue_group` set means exactly one
    /// consumer per group receives each message.
    async fn subscribe(&self, subject: &Subject, queue_group: Option<&str>) -> Result<Subscription>;

    /// Send-and-wait via an inbox subject. Fails with `Timeout` on deadline.
    async fn request(&self, subject: &Subject, payload: Vec<u8>, timeout: Duration) -> Result<Vec<u8>>;

    /// Current connection state, updated as the client reconnects.
    fn connection_state(&self) -> tokio::sync::watch::Receiver<ConnectionState>;
}

pub(crate) fn backpressure(msg: impl Into<String>) -> ScenePipelineError {
    ScenePipelineError::new(ErrorKind::Backpressure, msg)
}

pub(crate) fn transient(msg: impl Into<String>) -> ScenePipelineError {
    ScenePipelineError::new(ErrorKind::Transient, msg)
}

pub(crate) fn timeout(msg: impl Into<String>) -> ScenePipelineError {
    ScenePipelineError::new(ErrorKind::Timeout, msg)
}
