//! Metric names (spec.md §4.8/§6) and Prometheus export wiring. Names are
//! normative; labels are informative. Buckets for `scene_gen_latency_ms` are
//! fixed by the spec, not tunable.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

pub const SCENE_GEN_TOTAL: &str = "scene_gen_total";
pub const SCENE_GEN_LATENCY_MS: &str = "scene_gen_latency_ms";
pub const FRAME_DROP_TOTAL: &str = "frame_drop_total";
pub const BROADCAST_QUEUE_LEN: &str = "broadcast_queue_len";
pub const BROADCAST_FPS: &str = "broadcast_fps";
pub const WS_BACKLOG_BYTES: &str = "ws_backlog_bytes";
pub const BUS_PUBLISH_ERRORS_TOTAL: &str = "bus_publish_errors_total";
pub const BUS_RECONNECTS_TOTAL: &str = "bus_reconnects_total";
pub const BROADCAST_SUBSCRIPTION_CLOSED_TOTAL: &str = "broadcast_subscription_closed_total";

pub const SCENE_GEN_LATENCY_BUCKETS: &[f64] = &[50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0];

/// Installs the global `metrics` recorder and serves `/metrics` on `addr`.
/// Called once at startup when `EXPORT_PROM=true`; a no-op build error here
/// is fatal the way any other startup precondition is (spec.md §6 exit code 1).
pub fn install_prometheus_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(SCENE_GEN_LATENCY_MS.to_owned()),
            SCENE_GEN_LATENCY_BUCKETS,
        )?
        .install()
}

/// Records a completed generation attempt (§4.4: emitted per message).
pub fn record_scene_gen(success: bool, latency_ms: u64) {
    metrics::counter!(SCENE_GEN_TOTAL, "success" => success.to_string()).increment(1);
    metrics::histogram!(SCENE_GEN_LATENCY_MS).record(latency_ms as f64);
}

/// Records a frame drop with its reason (§4.6.4/§4.6.6: queue_full,
/// tcp_backlog, write_timeout).
pub fn record_frame_drop(reason: &'static str) {
    metrics::counter!(FRAME_DROP_TOTAL, "reason" => reason).increment(1);
}

pub fn record_subscription_closed(reason: &'static str) {
    metrics::counter!(BROADCAST_SUBSCRIPTION_CLOSED_TOTAL, "reason" => reason).increment(1);
}

pub fn set_broadcast_queue_len(len: u64) {
    metrics::gauge!(BROADCAST_QUEUE_LEN).set(len as f64);
}

pub fn set_broadcast_fps(fps: f64) {
    metrics::gauge!(BROADCAST_FPS).set(fps);
}

pub fn set_ws_backlog_bytes(bytes: u64) {
    metrics::gauge!(WS_BACKLOG_BYTES).set(bytes as f64);
}

pub fn record_bus_publish_error() {
    metrics::counter!(BUS_PUBLISH_ERRORS_TOTAL).increment(1);
}

pub fn record_bus_reconnect() {
    metrics::counter!(BUS_RECONNECTS_TOTAL).increment(1);
}
