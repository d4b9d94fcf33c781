//! Stage token codec
//!
//! Serializes typed stage claims into the opaque sealed token and back,
//! enforcing the issuance-age window on parse. `Expired` is distinct from
//! `Malformed` so the web layer can answer "session expired" instead of a
//! generic rejection.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::{GateError, GateResult};
use crate::token_cipher::{open, seal};

/// Tokens whose issuance timestamp sits further than this ahead of "now"
/// are rejected as malformed rather than treated as fresh.
const MAX_FUTURE_SKEW_SECS: i64 = 30;

/// Claims carried inside an opaque stage token.
///
/// `subject` is the session id: the token is bound to one session of one
/// gateway at one stage. The nonce makes two mints of identical logical
/// claims distinct on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageClaims {
    pub gateway_id: String,
    pub subject: String,
    pub stage: u32,
    pub issued_at: DateTime<Utc>,
    pub nonce: String,
}

impl StageClaims {
    pub fn new(gateway_id: &str, subject: &str, stage: u32, issued_at: DateTime<Utc>) -> Self {
        Self {
            gateway_id: gateway_id.to_string(),
            subject: subject.to_string(),
            stage,
            issued_at,
            nonce: Uuid::new_v4().to_string(),
        }
    }
}

/// Mints and parses stage tokens under one derived key.
pub struct TokenCodec {
    key: [u8; 32],
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(key: [u8; 32], max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            key,
            max_age,
            clock,
        }
    }

    /// Serialize claims and seal them into an opaque token string.
    pub fn mint(&self, claims: &StageClaims) -> GateResult<String> {
        let payload = serde_json::to_vec(claims)
            .map_err(|e| GateError::serialization("stage claims", e))?;
        seal(&payload, &self.key).map_err(|_| GateError::encryption("token seal"))
    }

    /// Open and validate a token, returning its claims.
    ///
    /// Decryption or deserialization failure is `TokenMalformed`; a token
    /// older than `max_age` is `TokenExpired`.
    pub fn parse(&self, token: &str) -> GateResult<StageClaims> {
        let payload = open(token, &self.key).map_err(GateError::token_malformed)?;
        let claims: StageClaims = serde_json::from_slice(&payload)
            .map_err(|_| GateError::token_malformed("invalid claims payload"))?;

        let age = self.clock.now().signed_duration_since(claims.issued_at);
        if age < -Duration::seconds(MAX_FUTURE_SKEW_SECS) {
            return Err(GateError::token_malformed("issuance timestamp in the future"));
        }
        if age > self.max_age {
            return Err(GateError::token_expired(claims.issued_at));
        }
        Ok(claims)
    }

    /// Instant at which a token with these claims stops parsing.
    pub fn expires_at(&self, claims: &StageClaims) -> DateTime<Utc> {
        claims.issued_at + self.max_age
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }
}
