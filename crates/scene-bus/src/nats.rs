use crate::{backpressure, timeout, transient, Bus, BusMessage, BusConfig, ConnectionState, Subscription};
use futures_util::StreamExt;
use scene_error::Result;
use scene_protocol::Subject;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, instrument, warn};

/// Core-NATS backed [`Bus`].
pub struct NatsBus {
    client: async_nats::Client,
    config: BusConfig,
    /// Tracks bytes handed to `async_nats` while the client is not
    /// `Connected`, as a stand-in for the real outbound-buffer accounting
    /// spec.md §4.1 describes (the underlying library does not expose its
    /// internal buffer occupancy).
    buffered_bytes: Arc<AtomicUsize>,
    state_tx: watch::Sender<ConnectionState>,
}

impl NatsBus {
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn connect(config: BusConfig) -> Result<Self> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| transient(format!("failed to connect to bus: {e}")))?;

        let (state_tx, _) = watch::channel(ConnectionState::Connected);
        let bus = Self {
            client,
            config,
            buffered_bytes: Arc::new(AtomicUsize::new(0)),
            state_tx,
        };
        bus.spawn_state_watcher();
        Ok(bus)
    }

    fn spawn_state_watcher(&self) {
        let client = self.client.clone();
        let state_tx = self.state_tx.clone();
        let buffered = self.buffered_bytes.clone();
        tokio::spawn(async move {
            let mut last = ConnectionState::Connected;
            loop {
                let current = map_state(client.connection_state());
                if current != last {
                    if current == ConnectionState::Connected {
                        buffered.store(0, Ordering::SeqCst);
                        if last == ConnectionState::Reconnecting {
                            scene_telemetry::metrics::record_bus_reconnect();
                        }
                    }
                    let _ = state_tx.send(current);
                    last = current;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        });
    }
}

fn map_state(state: async_nats::connection::State) -> ConnectionState {
    match state {
        async_nats::connection::State::Connected => ConnectionState::Connected,
        async_nats::connection::State::Pending => ConnectionState::Reconnecting,
        async_nats::connection::State::Disconnected => ConnectionState::Reconnecting,
    }
}

#[async_trait::async_trait]
impl Bus for NatsBus {
    #[instrument(skip(self, payload), fields(subject = %subject.render()))]
    async fn publish(&self, subject: &Subject, payload: Vec<u8>) -> Result<()> {
        if map_state(self.client.connection_state()) != ConnectionState::Connected {
            let pending = self.buffered_bytes.fetch_add(payload.len(), Ordering::SeqCst) + payload.len();
            if pending > self.config.max_outbound_buffer_bytes {
                warn!(pending, cap = self.config.max_outbound_buffer_bytes, "outbound buffer full");
                return Err(backpressure("outbound buffer full while bus is reconnecting"));
            }
        }
        self.client
            .publish(subject.render(), payload.into())
            .await
            .map_err(|e| transient(format!("publish failed: {e}")))?;
        debug!("published");
        Ok(())
    }

    async fn subscribe(&self, subject: &Subject, queue_group: Option<&str>) -> Result<Subscription> {
        let mut subscriber = match queue_group {
            Some(group) => self
                .client
                .queue_subscribe(subject.render(), group.to_owned())
                .await
                .map_err(|e| transient(format!("subscribe failed: {e}")))?,
            None => self
                .client
                .subscribe(subject.render())
                .await
                .map_err(|e| transient(format!("subscribe failed: {e}")))?,
        };

        let (tx, rx) = mpsc::channel(256);
        let handle = tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                let forwarded = BusMessage {
                    subject: msg.subject.to_string(),
                    payload: msg.payload.to_vec(),
                    reply_to: msg.reply.as_ref().map(|s| s.to_string()),
                };
                if tx.send(forwarded).await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, Some(handle)))
    }

    async fn request(&self, subject: &Subject, payload: Vec<u8>, timeout_dur: Duration) -> Result<Vec<u8>> {
        let fut = self.client.request(subject.render(), payload.into());
        match tokio::time::timeout(timeout_dur, fut).await {
            Ok(Ok(reply)) => Ok(reply.payload.to_vec()),
            Ok(Err(e)) => Err(transient(format!("request failed: {e}"))),
            Err(_) => Err(timeout(format!(
                "request on {} exceeded {:?}",
                subject.render(),
                timeout_dur
            ))),
        }
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}
