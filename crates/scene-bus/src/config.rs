use std::time::Duration;

/// Bus client configuration, read from the environment (spec.md §6).
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub url: String,
    /// Soft cap on buffered-but-unsent publish bytes while reconnecting.
    /// Crossing it fails further publishes with `ErrorKind::Backpressure`.
    pub max_outbound_buffer_bytes: usize,
    pub request_reply_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_owned(),
            max_outbound_buffer_bytes: 1024 * 1024,
            request_reply_timeout: Duration::from_secs(30),
        }
    }
}

impl BusConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            url: std::env::var("BUS_URL").unwrap_or(default.url),
            max_outbound_buffer_bytes: default.max_outbound_buffer_bytes,
            request_reply_timeout: std::env::var("REQUEST_REPLY_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.request_reply_timeout),
        }
    }
}
