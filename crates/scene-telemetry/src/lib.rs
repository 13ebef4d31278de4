//! Metrics and tracing (spec's C9): the one crate every other component
//! reaches into rather than rolling its own `println!`/ad-hoc counters.

pub mod metrics;
mod tracing_init;

pub use tracing_init::{init_tracing, TracingGuard};

/// Span names used across the pipeline (spec.md §4.8).
pub mod spans {
    pub const SCENE_GENERATE: &str = "scene.generate";
    pub const SCENE_PERSIST: &str = "scene.persist";
    pub const BROADCAST_DELIVER: &str = "broadcast.deliver";
}
