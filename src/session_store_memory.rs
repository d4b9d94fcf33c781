//! In-memory session store
//!
//! Backs tests and ephemeral deployments. The map write lock is held
//! across the whole merge, which is what makes concurrent task-completion
//! updates land without losing entries.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::clock::Clock;
use crate::errors::{GateError, GateResult, SafeReadLock, SafeWriteLock};
use crate::session::{GatewaySession, SessionPatch};
use crate::session_store::SessionStore;

pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, GatewaySession>>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl MemorySessionStore {
    pub fn new(ttl: chrono::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, gateway_id: &str, user_id: Option<&str>) -> GateResult<GatewaySession> {
        let session = GatewaySession::new(gateway_id, user_id, self.clock.now());
        let mut sessions = self.sessions.safe_write()?;
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    fn get(&self, id: &str) -> GateResult<Option<GatewaySession>> {
        let sessions = self.sessions.safe_read()?;
        let now = self.clock.now();
        Ok(sessions
            .get(id)
            .filter(|session| !session.is_expired(now, self.ttl))
            .cloned())
    }

    fn update(&self, id: &str, patch: &SessionPatch) -> GateResult<GatewaySession> {
        let mut sessions = self.sessions.safe_write()?;
        let now = self.clock.now();
        let session = sessions
            .get_mut(id)
            .filter(|session| !session.is_expired(now, self.ttl))
            .ok_or_else(|| GateError::session_not_found(id))?;
        session.apply(patch, now);
        Ok(session.clone())
    }

    fn purge_expired(&self) -> GateResult<usize> {
        let mut sessions = self.sessions.safe_write()?;
        let now = self.clock.now();
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(now, self.ttl));
        Ok(before - sessions.len())
    }
}
