// scene-protocol: wire types for the holographic-scene pipeline.
//
// Everything that crosses a process boundary -- bus envelopes and WebSocket
// frames -- is defined here so the worker, gateway, and test harnesses share
// one serialization surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Size caps (§3 invariants)
// ---------------------------------------------------------------------------

pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;
pub const MAX_SCENE_BYTES: usize = 256 * 1024;

/// Envelope version this build understands. Any other `v` fails decode.
pub const ENVELOPE_VERSION: u8 = 1;

// ---------------------------------------------------------------------------
// Data model (spec.md §3)
// ---------------------------------------------------------------------------

/// A scene-generation request, as submitted by a client through the gateway
/// or directly onto `reality.gen.request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRequest {
    pub job_id: Uuid,
    pub tenant_id: String,
    /// Opaque JSON payload, capped at `MAX_PAYLOAD_BYTES`.
    pub payload: serde_json::Value,
    pub deadline: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
}

impl SceneRequest {
    /// Validates size caps and the `deadline > submitted_at` invariant.
    /// Does not validate `jobID` uniqueness -- that is a dedup-window
    /// concern for the consumer, not a property of the message itself.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let payload_len = serde_json::to_vec(&self.payload)
            .map(|v| v.len())
            .unwrap_or(usize::MAX);
        if payload_len > MAX_PAYLOAD_BYTES {
            return Err(ValidationError::PayloadTooLarge(payload_len));
        }
        if self.deadline <= self.submitted_at {
            return Err(ValidationError::DeadlineNotAfterSubmission);
        }
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }
}

/// The outcome of a generation attempt, as published to `reality.gen.result`.
///
/// Invariant: exactly one of `scene`/`error` is set, mirroring `success`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneResult {
    pub job_id: Uuid,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub produced_at: DateTime<Utc>,
    pub worker_id: String,
    pub latency_ms: u64,
}

impl SceneResult {
    pub fn success(
        job_id: Uuid,
        scene_id: Uuid,
        scene: serde_json::Value,
        worker_id: impl Into<String>,
        latency_ms: u64,
        produced_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            success: true,
            scene_id: Some(scene_id),
            scene: Some(scene),
            error: None,
            produced_at,
            worker_id: worker_id.into(),
            latency_ms,
        }
    }

    pub fn failure(
        job_id: Uuid,
        error: impl Into<String>,
        worker_id: impl Into<String>,
        latency_ms: u64,
        produced_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            success: false,
            scene_id: None,
            scene: None,
            error: Some(error.into()),
            produced_at,
            worker_id: worker_id.into(),
            latency_ms,
        }
    }

    /// Validates the size cap on `scene` and the success/payload invariant.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.success {
            if self.scene_id.is_none() || self.scene.is_none() {
                return Err(ValidationError::InconsistentResult);
            }
            if let Some(scene) = &self.scene {
                let len = serde_json::to_vec(scene).map(|v| v.len()).unwrap_or(usize::MAX);
                if len > MAX_SCENE_BYTES {
                    return Err(ValidationError::SceneTooLarge(len));
                }
            }
        } else if self.error.is_none() {
            return Err(ValidationError::InconsistentResult);
        }
        Ok(())
    }
}

/// The row type persisted by `scene-store`. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub scene_id: Uuid,
    pub tenant_id: String,
    pub scene: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub produced_by: String,
}

/// A scene packaged for live delivery over the broadcast engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub scene_id: Uuid,
    pub tenant_id: String,
    /// Monotonic per tenant; assigned by the producer (the worker, today).
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("payload is {0} bytes, exceeds cap of {MAX_PAYLOAD_BYTES}")]
    PayloadTooLarge(usize),
    #[error("scene is {0} bytes, exceeds cap of {MAX_SCENE_BYTES}")]
    SceneTooLarge(usize),
    #[error("deadline must be after submittedAt")]
    DeadlineNotAfterSubmission,
    #[error("success and scene/error fields are inconsistent")]
    InconsistentResult,
}

// ---------------------------------------------------------------------------
// Bus envelope and subjects (§4.1)
// ---------------------------------------------------------------------------

/// Generic bus envelope. `T` is the JSON-decoded `body`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub v: u8,
    #[serde(rename = "type")]
    pub kind: String,
    pub id: Uuid,
    /// Milliseconds since epoch.
    pub ts: i64,
    pub body: T,
    /// W3C traceparent, propagated alongside `body` so OTLP spans can be
    /// stitched across the bus hop. Absent when tracing is not configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceparent: Option<String>,
}

impl<T> Envelope<T> {
    pub fn new(subject: &Subject, body: T) -> Self {
        Self {
            v: ENVELOPE_VERSION,
            kind: subject.render(),
            id: Uuid::new_v4(),
            ts: Utc::now().timestamp_millis(),
            body,
            traceparent: None,
        }
    }

    pub fn with_traceparent(mut self, traceparent: impl Into<String>) -> Self {
        self.traceparent = Some(traceparent.into());
        self
    }
}

impl<T: Serialize> Envelope<T> {
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(EnvelopeError::Encode)
    }
}

impl<T: for<'de> Deserialize<'de>> Envelope<T> {
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let raw: RawEnvelope = serde_json::from_slice(bytes).map_err(EnvelopeError::Decode)?;
        if raw.v != ENVELOPE_VERSION {
            return Err(EnvelopeError::IncompatibleVersion(raw.v));
        }
        serde_json::from_slice(bytes).map_err(EnvelopeError::Decode)
    }
}

/// Used only to peek at `v` before committing to a concrete body type.
#[derive(Deserialize)]
struct RawEnvelope {
    v: u8,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope version {0} is not supported (expected {ENVELOPE_VERSION})")]
    IncompatibleVersion(u8),
    #[error("failed to decode envelope: {0}")]
    Decode(serde_json::Error),
    #[error("failed to encode envelope: {0}")]
    Encode(serde_json::Error),
}

/// The closed set of bus subjects (spec.md §4.1). Publishing to anything
/// else does not type-check.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    GenRequest,
    GenResult,
    Frame { tenant_id: String },
}

impl Subject {
    pub fn render(&self) -> String {
        match self {
            Subject::GenRequest => "reality.gen.request".to_owned(),
            Subject::GenResult => "reality.gen.result".to_owned(),
            Subject::Frame { tenant_id } => format!("reality.frame.{tenant_id}"),
        }
    }

    /// Parses a concrete bus subject back into a `Subject`. Rejects anything
    /// outside the closed set -- this is the enforcement point spec.md §9
    /// calls for in place of the source's ~200 ad-hoc subjects.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "reality.gen.request" => Some(Subject::GenRequest),
            "reality.gen.result" => Some(Subject::GenResult),
            other => other
                .strip_prefix("reality.frame.")
                .filter(|t| !t.is_empty())
                .map(|tenant_id| Subject::Frame {
                    tenant_id: tenant_id.to_owned(),
                }),
        }
    }
}

// ---------------------------------------------------------------------------
// WebSocket protocol (spec.md §6)
// ---------------------------------------------------------------------------

/// Inbound (client -> gateway) control messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Ping { ts: i64 },
    GenRequest {
        #[serde(rename = "jobID")]
        job_id: Uuid,
        payload: serde_json::Value,
        #[serde(rename = "deadlineMs")]
        deadline_ms: i64,
    },
}

/// Outbound (gateway -> client) messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        #[serde(rename = "tenantID")]
        tenant_id: String,
        #[serde(rename = "serverTs")]
        server_ts: i64,
    },
    Frame {
        #[serde(rename = "sceneID")]
        scene_id: Uuid,
        seq: u64,
        body: serde_json::Value,
    },
    GenResult {
        #[serde(rename = "jobID")]
        job_id: Uuid,
        success: bool,
        #[serde(rename = "sceneID", default, skip_serializing_if = "Option::is_none")]
        scene_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Pong {
        ts: i64,
    },
    Error {
        code: String,
        message: String,
    },
}

/// The channel name clients subscribe to for live frames.
pub const REALITY_STREAM_CHANNEL: &str = "reality.stream";
/// The scope a verified token must carry to receive frames on that channel.
pub const REALITY_STREAM_SCOPE: &str = "reality.stream";

/// WS error codes used in `ServerMessage::Error.code` (distinct from the
/// bus-facing `ErrorKind` taxonomy in `scene-error`, but deliberately named
/// the same way so the two surfaces read as one vocabulary).
pub mod error_codes {
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const EXPIRED: &str = "EXPIRED";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const BACKPRESSURE: &str = "BACKPRESSURE";
    pub const POLICY: &str = "POLICY";
    pub const INTERNAL: &str = "INTERNAL";
}

/// WebSocket close codes (spec.md §6).
pub mod close_codes {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const BACKPRESSURE: u16 = 1013;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn subject_render_and_parse_round_trip() {
        let s = Subject::Frame { tenant_id: "acme".to_owned() };
        assert_eq!(s.render(), "reality.frame.acme");
        assert_eq!(Subject::parse(&s.render()), Some(s));
        assert_eq!(Subject::parse("reality.gen.request"), Some(Subject::GenRequest));
        assert_eq!(Subject::parse("reality.gen.result"), Some(Subject::GenResult));
        assert_eq!(Subject::parse("reality.frame."), None);
        assert_eq!(Subject::parse("bogus.subject"), None);
    }

    #[test]
    fn envelope_round_trips_and_rejects_bad_version() {
        let req = SceneRequest {
            job_id: Uuid::new_v4(),
            tenant_id: "acme".to_owned(),
            payload: serde_json::json!({"scene": "alpha"}),
            deadline: now() + Duration::seconds(5),
            submitted_at: now(),
        };
        let env = Envelope::new(&Subject::GenRequest, req.clone());
        let bytes = env.encode().unwrap();
        let decoded: Envelope<SceneRequest> = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded.body, req);
        assert_eq!(decoded.kind, "reality.gen.request");

        let mut bad = serde_json::from_slice::<serde_json::Value>(&bytes).unwrap();
        bad["v"] = serde_json::json!(99);
        let bad_bytes = serde_json::to_vec(&bad).unwrap();
        let err = Envelope::<SceneRequest>::decode(&bad_bytes).unwrap_err();
        assert!(matches!(err, EnvelopeError::IncompatibleVersion(99)));
    }

    #[test]
    fn scene_request_rejects_deadline_before_submission() {
        let req = SceneRequest {
            job_id: Uuid::new_v4(),
            tenant_id: "acme".to_owned(),
            payload: serde_json::json!({}),
            deadline: now() - Duration::seconds(1),
            submitted_at: now(),
        };
        assert_eq!(req.validate(), Err(ValidationError::DeadlineNotAfterSubmission));
    }

    #[test]
    fn scene_request_rejects_oversized_payload() {
        let req = SceneRequest {
            job_id: Uuid::new_v4(),
            tenant_id: "acme".to_owned(),
            payload: serde_json::json!({ "blob": "x".repeat(MAX_PAYLOAD_BYTES + 1) }),
            deadline: now() + Duration::seconds(5),
            submitted_at: now(),
        };
        assert!(matches!(req.validate(), Err(ValidationError::PayloadTooLarge(_))));
    }

    #[test]
    fn scene_result_success_and_failure_constructors_validate() {
        let ok = SceneResult::success(
            Uuid::new_v4(),
            Uuid::new_v4(),
            serde_json::json!({"scene": "alpha"}),
            "worker-1",
            42,
            now(),
        );
        assert!(ok.validate().is_ok());

        let err = SceneResult::failure(Uuid::new_v4(), "expired", "worker-1", 0, now());
        assert!(err.validate().is_ok());
    }

    #[test]
    fn scene_result_inconsistent_state_is_rejected() {
        let mut r = SceneResult::success(
            Uuid::new_v4(),
            Uuid::new_v4(),
            serde_json::json!({}),
            "worker-1",
            0,
            now(),
        );
        r.scene = None;
        assert_eq!(r.validate(), Err(ValidationError::InconsistentResult));
    }

    #[test]
    fn client_message_gen_request_uses_camel_case_fields() {
        let json = serde_json::json!({
            "type": "gen_request",
            "jobID": "11111111-1111-1111-1111-111111111111",
            "payload": {"scene": "alpha"},
            "deadlineMs": 5000,
        });
        let msg: ClientMessage = serde_json::from_value(json).unwrap();
        match msg {
            ClientMessage::GenRequest { job_id, deadline_ms, .. } => {
                assert_eq!(deadline_ms, 5000);
                assert_eq!(job_id.to_string(), "11111111-1111-1111-1111-111111111111");
            }
            other => panic!("expected GenRequest, got {other:?}"),
        }
    }

    #[test]
    fn server_message_frame_serializes_with_scene_id_key() {
        let msg = ServerMessage::Frame {
            scene_id: Uuid::nil(),
            seq: 7,
            body: serde_json::json!({"x": 1}),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["sceneID"], serde_json::json!(Uuid::nil().to_string()));
        assert_eq!(json["seq"], 7);
    }
}
