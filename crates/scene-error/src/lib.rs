//! Error taxonomy shared by every component of the pipeline.
//!
//! Every error carries an [`ErrorKind`] -- one of a fixed, small set -- plus
//! a human-readable message. Kinds, not types: callers branch on `kind()`,
//! not on `downcast`/variant matching against a sprawling enum-of-causes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error taxonomy (spec.md §7). Policy for each kind lives with the
/// component that raises it; this crate only names the kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed envelope, bad UUID, payload too large. Not retried.
    InvalidRequest,
    /// Request deadline passed before/while generating. Not retried.
    Expired,
    /// Generator exceeded its cap. Caller may retry with a new jobID.
    Timeout,
    /// Store/bus connectivity issue. Retried locally with backoff.
    Transient,
    /// Outbound buffer or socket queue saturated. Dropped with accounting.
    Backpressure,
    /// Auth/authorization failure.
    Policy,
    /// Corrupted state or invariant violation. Process terminates.
    Fatal,
}

impl ErrorKind {
    /// Whether this kind is recovered locally (retried) rather than
    /// surfaced to the originating caller.
    pub fn is_retried_locally(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Expired => "expired",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Transient => "transient",
            ErrorKind::Backpressure => "backpressure",
            ErrorKind::Policy => "policy",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error type used across `scene-*` crates.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ScenePipelineError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ScenePipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self { kind, message: message.into(), source: Some(Box::new(source)) }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn expired(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Expired, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn backpressure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Backpressure, message)
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Policy, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type Result<T> = std::result::Result<T, ScenePipelineError>;
