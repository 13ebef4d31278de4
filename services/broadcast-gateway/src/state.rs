//! Shared gateway state (spec's C7/C8 wiring): the capability trait objects
//! the Supervisor constructs, plus the per-IP/per-tenant connection-count
//! registries, in the shape of the teacher's `AppState` -- a plain struct of
//! `Arc`s, cloned cheaply into every handler via axum's `State` extractor.

use crate::auth::TokenVerifier;
use crate::broadcast::BroadcastEngine;
use scene_bus::Bus;
use scene_correlator::Correlator;
use scene_store::StoreBackend;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

pub const DEFAULT_MAX_CONN_PER_IP: usize = 32;
pub const DEFAULT_MAX_CONN_PER_TENANT: usize = 256;

type ConnCounts = Arc<RwLock<HashMap<String, usize>>>;

#[derive(Clone)]
pub struct GatewayState {
    pub bus: Arc<dyn Bus>,
    pub store: Arc<dyn StoreBackend>,
    pub correlator: Arc<Correlator>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub broadcast: BroadcastEngine,
    pub max_conn_per_ip: usize,
    pub max_conn_per_tenant: usize,
    conns_by_ip: ConnCounts,
    conns_by_tenant: ConnCounts,
    active_sockets: Arc<AtomicUsize>,
}

impl GatewayState {
    pub fn new(
        bus: Arc<dyn Bus>,
        store: Arc<dyn StoreBackend>,
        correlator: Arc<Correlator>,
        verifier: Arc<dyn TokenVerifier>,
        broadcast: BroadcastEngine,
        max_conn_per_ip: usize,
        max_conn_per_tenant: usize,
    ) -> Self {
        Self {
            bus,
            store,
            correlator,
            verifier,
            broadcast,
            max_conn_per_ip,
            max_conn_per_tenant,
            conns_by_ip: Arc::new(RwLock::new(HashMap::new())),
            conns_by_tenant: Arc::new(RwLock::new(HashMap::new())),
            active_sockets: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Attempts to reserve a connection slot for `ip`/`tenant_id`. Returns
    /// `false` (and reserves nothing) if either cap is already at its limit
    /// (spec.md §4.7).
    pub async fn try_reserve_connection(&self, ip: &str, tenant_id: &str) -> bool {
        let mut by_ip = self.conns_by_ip.write().await;
        let mut by_tenant = self.conns_by_tenant.write().await;
        let ip_count = by_ip.get(ip).copied().unwrap_or(0);
        let tenant_count = by_tenant.get(tenant_id).copied().unwrap_or(0);
        if ip_count >= self.max_conn_per_ip || tenant_count >= self.max_conn_per_tenant {
            return false;
        }
        *by_ip.entry(ip.to_owned()).or_insert(0) += 1;
        *by_tenant.entry(tenant_id.to_owned()).or_insert(0) += 1;
        self.active_sockets.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub async fn release_connection(&self, ip: &str, tenant_id: &str) {
        let mut by_ip = self.conns_by_ip.write().await;
        if let Some(count) = by_ip.get_mut(ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                by_ip.remove(ip);
            }
        }
        drop(by_ip);
        let mut by_tenant = self.conns_by_tenant.write().await;
        if let Some(count) = by_tenant.get_mut(tenant_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                by_tenant.remove(tenant_id);
            }
        }
        self.active_sockets.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_socket_count(&self) -> usize {
        self.active_sockets.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticKeyVerifier;
    use crate::broadcast::BroadcastConfig;
    use scene_bus::MockBus;
    use scene_store::MemoryStore;
    use std::time::Duration;

    async fn state(max_ip: usize, max_tenant: usize) -> GatewayState {
        let bus: Arc<dyn Bus> = Arc::new(MockBus::new());
        let correlator = Arc::new(Correlator::new(bus.clone(), Duration::from_secs(1)).await.unwrap());
        let (broadcast, _handle) = BroadcastEngine::spawn(BroadcastConfig::default());
        GatewayState::new(
            bus,
            Arc::new(MemoryStore::new()),
            correlator,
            Arc::new(StaticKeyVerifier::new(b"k".to_vec())),
            broadcast,
            max_ip,
            max_tenant,
        )
    }

    #[tokio::test]
    async fn reservations_respect_the_per_ip_cap() {
        let s = state(1, 100).await;
        assert!(s.try_reserve_connection("1.2.3.4", "acme").await);
        assert!(!s.try_reserve_connection("1.2.3.4", "acme").await);
        s.release_connection("1.2.3.4", "acme").await;
        assert!(s.try_reserve_connection("1.2.3.4", "acme").await);
    }

    #[tokio::test]
    async fn reservations_respect_the_per_tenant_cap() {
        let s = state(100, 1);
        let s = s.await;
        assert!(s.try_reserve_connection("1.1.1.1", "acme").await);
        assert!(!s.try_reserve_connection("2.2.2.2", "acme").await);
    }
}
