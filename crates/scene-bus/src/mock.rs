use crate::{timeout, transient, Bus, BusMessage, ConnectionState, Subscription};
use scene_error::Result;
use scene_protocol::Subject;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use uuid::Uuid;

struct Subscriber {
    queue_group: Option<String>,
    tx: mpsc::Sender<BusMessage>,
}

struct Inner {
    subscribers: HashMap<String, Vec<Subscriber>>,
    /// Round-robin cursor per (subject, queue group).
    round_robin: HashMap<(String, String), usize>,
    pending_replies: HashMap<String, oneshot::Sender<Vec<u8>>>,
}

/// An in-process [`Bus`] with the same queue-group and request/reply
/// semantics as [`crate::NatsBus`], for tests and the mock wiring the
/// Supervisor can fall back to when `BUS_URL` is unset.
pub struct MockBus {
    inner: Arc<Mutex<Inner>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBus {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connected);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                subscribers: HashMap::new(),
                round_robin: HashMap::new(),
                pending_replies: HashMap::new(),
            })),
            state_tx,
        }
    }

    /// Test hook: flip the reported connection state without touching
    /// delivery, to exercise reconnect-observing code paths (S5).
    pub fn set_connection_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }

    /// Fulfil a pending [`Bus::request`] that was delivered with
    /// `reply_to == Some(inbox)`.
    pub async fn respond(&self, inbox: &str, payload: Vec<u8>) -> bool {
        let mut inner = self.inner.lock().await;
        if let Some(tx) = inner.pending_replies.remove(inbox) {
            let _ = tx.send(payload);
            true
        } else {
            false
        }
    }

    async fn deliver(inner: &mut Inner, subject: &str, msg: BusMessage) {
        let Some(subs) = inner.subscribers.get(subject) else { return };
        // Ungrouped subscribers get a fan-out copy; grouped ones get exactly
        // one round-robin winner per distinct queue group.
        let groups: std::collections::HashSet<String> =
            subs.iter().filter_map(|s| s.queue_group.clone()).collect();
        let mut winners: HashMap<String, usize> = HashMap::new();
        for group in groups {
            let members: Vec<usize> = subs
                .iter()
                .enumerate()
                .filter(|(_, s)| s.queue_group.as_deref() == Some(group.as_str()))
                .map(|(i, _)| i)
                .collect();
            let key = (subject.to_owned(), group.clone());
            let cursor = inner.round_robin.entry(key).or_insert(0);
            let pick = members[*cursor % members.len()];
            *cursor = cursor.wrapping_add(1);
            winners.insert(group, pick);
        }
        let winner_indices: std::collections::HashSet<usize> = winners.values().copied().collect();

        for (idx, sub) in subs.iter().enumerate() {
            let deliver_here = match &sub.queue_group {
                Some(_) => winner_indices.contains(&idx),
                None => true,
            };
            if deliver_here {
                let _ = sub.tx.send(msg.clone()).await;
            }
        }
    }
}

#[async_trait::async_trait]
impl Bus for MockBus {
    async fn publish(&self, subject: &Subject, payload: Vec<u8>) -> Result<()> {
        let rendered = subject.render();
        let mut inner = self.inner.lock().await;
        Self::deliver(
            &mut inner,
            &rendered,
            BusMessage { subject: rendered.clone(), payload, reply_to: None },
        )
        .await;
        Ok(())
    }

    async fn subscribe(&self, subject: &Subject, queue_group: Option<&str>) -> Result<Subscription> {
        let rendered = subject.render();
        let (tx, rx) = mpsc::channel(256);
        let mut inner = self.inner.lock().await;
        inner.subscribers.entry(rendered).or_default().push(Subscriber {
            queue_group: queue_group.map(str::to_owned),
            tx,
        });
        Ok(Subscription::new(rx, None))
    }

    async fn request(&self, subject: &Subject, payload: Vec<u8>, timeout_dur: Duration) -> Result<Vec<u8>> {
        let rendered = subject.render();
        let inbox = format!("_inbox.{}", Uuid::new_v4());
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().await;
            inner.pending_replies.insert(inbox.clone(), tx);
            Self::deliver(
                &mut inner,
                &rendered,
                BusMessage { subject: rendered.clone(), payload, reply_to: Some(inbox.clone()) },
            )
            .await;
        }
        match tokio::time::timeout(timeout_dur, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(transient("reply sender dropped without responding")),
            Err(_) => {
                self.inner.lock().await.pending_replies.remove(&inbox);
                Err(timeout(format!("request on {rendered} exceeded {timeout_dur:?}")))
            }
        }
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}
