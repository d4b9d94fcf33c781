//! Stage progression protocol
//!
//! The state of a visitor's run is the session's `current_stage` plus the
//! claims inside the presented token. Advancing is strictly sequential:
//! the only legal transition is to `token.stage + 1`, validated within a
//! short window of the token's issuance. Every successful advance mints a
//! brand-new token; the old one is spent the moment the session moves.
//!
//! Nothing here mutates state on a failed validation; the caller keeps
//! the previous token as the only valid credential at the previous stage.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::clock::Clock;
use crate::errors::{GateError, GateResult};
use crate::gateway::GatewayDirectory;
use crate::session::{GatewaySession, SessionPatch};
use crate::session_store::SessionStore;
use crate::stage_token::{StageClaims, TokenCodec};

/// Result of opening a gateway: the new session and its stage-0 token.
#[derive(Debug, Clone)]
pub struct StartedSession {
    pub session: GatewaySession,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a successful advance.
#[derive(Debug, Clone)]
pub struct AdvanceOutcome {
    pub session: GatewaySession,
    pub token: String,
    pub completed: bool,
}

pub struct ProgressionEngine {
    store: Arc<dyn SessionStore>,
    directory: Arc<dyn GatewayDirectory>,
    codec: TokenCodec,
    advance_window: Duration,
    clock: Arc<dyn Clock>,
}

impl ProgressionEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        directory: Arc<dyn GatewayDirectory>,
        codec: TokenCodec,
        advance_window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            directory,
            codec,
            advance_window,
            clock,
        }
    }

    /// Open a gateway for a visitor: create the session record and mint
    /// the stage-0 token.
    pub fn begin(&self, gateway_id: &str, user_id: Option<&str>) -> GateResult<StartedSession> {
        let gateway = self
            .directory
            .lookup(gateway_id)?
            .ok_or_else(|| GateError::gateway_not_found(gateway_id))?;

        let session = self.store.create(&gateway.id, user_id)?;
        let claims = StageClaims::new(&gateway.id, &session.id, 0, self.clock.now());
        let token = self.codec.mint(&claims)?;

        tracing::info!(
            gateway = %gateway.id,
            session = %session.id,
            "gateway session started"
        );
        Ok(StartedSession {
            expires_at: self.codec.expires_at(&claims),
            session,
            token,
        })
    }

    /// Validate a token against a claimed next stage and, if every check
    /// passes, move the session forward and mint the replacement token.
    pub fn advance(
        &self,
        session_id: Option<&str>,
        token: &str,
        claimed_next: u32,
    ) -> GateResult<AdvanceOutcome> {
        // 1. fail closed on anything the codec rejects
        let claims = self.codec.parse(token)?;

        // 2. identity binding: the token speaks for exactly one session
        if let Some(id) = session_id {
            if id != claims.subject {
                return Err(GateError::token_malformed("token not bound to this session"));
            }
        }

        let session = self
            .store
            .get(&claims.subject)?
            .ok_or_else(|| GateError::session_not_found(&claims.subject))?;
        if claims.gateway_id != session.gateway_id {
            return Err(GateError::token_malformed("token gateway mismatch"));
        }

        // 3. terminal state rejects idempotently, before any arithmetic
        if session.completed {
            return Err(GateError::already_completed(session.id));
        }

        let gateway = self
            .directory
            .lookup(&session.gateway_id)?
            .ok_or_else(|| GateError::gateway_not_found(&session.gateway_id))?;

        // 4. strictly +1, from the stage the session is actually on; a
        //    token minted for an earlier stage is already spent
        let expected = session.current_stage + 1;
        if claims.stage != session.current_stage
            || claimed_next != claims.stage + 1
            || claimed_next > gateway.total_stages
        {
            return Err(GateError::invalid_progression(expected, claimed_next));
        }

        // 5. the advance must happen close to token issuance, much tighter
        //    than the token's own lifetime
        let age = self.clock.now().signed_duration_since(claims.issued_at);
        if age > self.advance_window {
            return Err(GateError::token_expired(claims.issued_at));
        }

        // 6. commit, then mint the replacement token at the new stage
        let completed = claimed_next == gateway.total_stages;
        let patch = if completed {
            SessionPatch::complete(claimed_next)
        } else {
            SessionPatch::set_stage(claimed_next)
        };
        let session = self.store.update(&session.id, &patch)?;

        let claims = StageClaims::new(&session.gateway_id, &session.id, claimed_next, self.clock.now());
        let token = self.codec.mint(&claims)?;

        tracing::info!(
            gateway = %session.gateway_id,
            session = %session.id,
            stage = claimed_next,
            completed,
            "stage advanced"
        );
        Ok(AdvanceOutcome {
            session,
            token,
            completed,
        })
    }

    /// Fetch a live session; logical expiry surfaces as `SessionNotFound`.
    pub fn session(&self, id: &str) -> GateResult<GatewaySession> {
        self.store
            .get(id)?
            .ok_or_else(|| GateError::session_not_found(id))
    }
}
