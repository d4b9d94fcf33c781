//! Session store interface
//!
//! The progression engine and the completion recorder only ever see this
//! trait; backends decide persistence. The one hard requirement is that
//! `update` is an atomic per-id read-modify-write so concurrent task
//! merges never lose entries.

use crate::errors::GateResult;
use crate::session::{GatewaySession, SessionPatch};

pub trait SessionStore: Send + Sync {
    /// Create a fresh session at stage 0 for the given gateway.
    fn create(&self, gateway_id: &str, user_id: Option<&str>) -> GateResult<GatewaySession>;

    /// Fetch a session. Returns `None` for unknown ids AND for sessions
    /// idle past the TTL, even if the backend still physically holds them.
    fn get(&self, id: &str) -> GateResult<Option<GatewaySession>>;

    /// Merge a patch into a session. Fails with `SessionNotFound` for
    /// unknown or expired ids. The merge must be serialized per id.
    fn update(&self, id: &str, patch: &SessionPatch) -> GateResult<GatewaySession>;

    /// Physically remove expired records; returns how many were dropped.
    /// Logical expiry via `get` never depends on this running.
    fn purge_expired(&self) -> GateResult<usize>;
}
