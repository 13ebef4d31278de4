//! Token verification (spec's C7 seam): the gateway only ever consumes a
//! verified `{sub, tenantID, scopes}` triple. A real deployment is expected
//! to plug in a JWT verifier (spec.md §4.7); `StaticKeyVerifier` is the
//! HMAC-signed-token implementation this repo ships, grounded the same way
//! the teacher's `auth::validate_token` turns a bearer token into
//! `TokenClaims` -- a single lookup, no session state.

use hmac::{Hmac, Mac};
use scene_error::{ErrorKind, Result, ScenePipelineError};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub tenant_id: String,
    pub scopes: Vec<String>,
}

impl Claims {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Capability the gateway depends on -- chosen at wire-up by the Supervisor,
/// same as `Bus`/`StoreBackend` (spec.md §9).
#[async_trait::async_trait]
pub trait TokenVerifier: Send + Sync + 'static {
    async fn verify(&self, raw_token: &str) -> Result<Claims>;
}

/// Token shape: `<sub>.<tenantID>.<scopes-comma-joined>.<hex hmac>`. Stands
/// in for the JWT verifier spec.md §4.7 assumes is available -- enough
/// structure to exercise the auth seam without vendoring a JWT library the
/// rest of the stack has no other use for.
pub struct StaticKeyVerifier {
    key: Vec<u8>,
}

impl StaticKeyVerifier {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    pub fn sign(&self, sub: &str, tenant_id: &str, scopes: &[&str]) -> String {
        let scopes_joined = scopes.join(",");
        let body = format!("{sub}.{tenant_id}.{scopes_joined}");
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(body.as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        format!("{body}.{sig}")
    }
}

#[async_trait::async_trait]
impl TokenVerifier for StaticKeyVerifier {
    async fn verify(&self, raw_token: &str) -> Result<Claims> {
        let mut parts = raw_token.rsplitn(2, '.');
        let sig_hex = parts.next().ok_or_else(|| policy("malformed token"))?;
        let body = parts.next().ok_or_else(|| policy("malformed token"))?;

        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(body.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());
        if expected != sig_hex {
            return Err(policy("token signature mismatch"));
        }

        let mut fields = body.splitn(3, '.');
        let sub = fields.next().ok_or_else(|| policy("malformed token"))?.to_owned();
        let tenant_id = fields.next().ok_or_else(|| policy("malformed token"))?.to_owned();
        let scopes = fields
            .next()
            .unwrap_or("")
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();

        if sub.is_empty() || tenant_id.is_empty() {
            return Err(policy("token missing sub/tenantID"));
        }
        Ok(Claims { sub, tenant_id, scopes })
    }
}

fn policy(message: &str) -> ScenePipelineError {
    ScenePipelineError::new(ErrorKind::Policy, message)
}

pub fn extract_bearer(authorization: &str) -> Option<&str> {
    authorization.strip_prefix("Bearer ")
}
