//! Sled-backed session store
//!
//! Sessions are JSON blobs in a dedicated tree, keyed by session id. The
//! merge path rides sled's `update_and_fetch`, which serializes
//! read-modify-write per key; that is the whole concurrency contract.

use sled::Db;
use std::sync::Arc;

use crate::clock::Clock;
use crate::errors::{GateError, GateResult};
use crate::session::{GatewaySession, SessionPatch};
use crate::session_store::SessionStore;

pub struct SledSessionStore {
    db: Db,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl SledSessionStore {
    /// Open (or create) the session database at `path`.
    pub fn open(path: &str, ttl: chrono::Duration, clock: Arc<dyn Clock>) -> GateResult<Self> {
        let db = sled::open(path).map_err(|e| GateError::store("open session db", e))?;
        Ok(Self { db, ttl, clock })
    }

    fn tree(&self) -> GateResult<sled::Tree> {
        self.db
            .open_tree("sessions")
            .map_err(|e| GateError::store("open sessions tree", e))
    }

    fn serialize_session(session: &GatewaySession) -> GateResult<Vec<u8>> {
        serde_json::to_vec(session).map_err(|e| GateError::serialization("session record", e))
    }

    fn deserialize_session(bytes: &[u8]) -> GateResult<GatewaySession> {
        serde_json::from_slice(bytes).map_err(|e| GateError::serialization("session record", e))
    }
}

impl SessionStore for SledSessionStore {
    fn create(&self, gateway_id: &str, user_id: Option<&str>) -> GateResult<GatewaySession> {
        let session = GatewaySession::new(gateway_id, user_id, self.clock.now());
        let data = Self::serialize_session(&session)?;
        let tree = self.tree()?;
        tree.insert(session.id.as_bytes(), data)
            .map_err(|e| GateError::store("insert session", e))?;
        tree.flush().map_err(|e| GateError::store("flush sessions", e))?;
        Ok(session)
    }

    fn get(&self, id: &str) -> GateResult<Option<GatewaySession>> {
        let tree = self.tree()?;
        match tree
            .get(id.as_bytes())
            .map_err(|e| GateError::store("read session", e))?
        {
            Some(bytes) => {
                let session = Self::deserialize_session(&bytes)?;
                if session.is_expired(self.clock.now(), self.ttl) {
                    Ok(None)
                } else {
                    Ok(Some(session))
                }
            }
            None => Ok(None),
        }
    }

    fn update(&self, id: &str, patch: &SessionPatch) -> GateResult<GatewaySession> {
        let tree = self.tree()?;
        let now = self.clock.now();
        let ttl = self.ttl;

        // update_and_fetch serializes this closure per key; a failure inside
        // leaves the stored bytes untouched and is reported afterwards.
        let mut failure: Option<GateError> = None;
        let updated = tree
            .update_and_fetch(id.as_bytes(), |old| {
                let bytes = old?;
                match Self::deserialize_session(bytes) {
                    Ok(mut session) => {
                        if session.is_expired(now, ttl) {
                            failure = Some(GateError::session_not_found(id));
                            return Some(bytes.to_vec());
                        }
                        session.apply(patch, now);
                        match Self::serialize_session(&session) {
                            Ok(data) => Some(data),
                            Err(e) => {
                                failure = Some(e);
                                Some(bytes.to_vec())
                            }
                        }
                    }
                    Err(e) => {
                        failure = Some(e);
                        Some(bytes.to_vec())
                    }
                }
            })
            .map_err(|e| GateError::store("update session", e))?;

        if let Some(err) = failure {
            return Err(err);
        }
        let bytes = updated.ok_or_else(|| GateError::session_not_found(id))?;
        tree.flush().map_err(|e| GateError::store("flush sessions", e))?;
        Self::deserialize_session(&bytes)
    }

    fn purge_expired(&self) -> GateResult<usize> {
        let tree = self.tree()?;
        let now = self.clock.now();
        let mut purged = 0;

        for entry in tree.iter() {
            let (key, bytes) = entry.map_err(|e| GateError::store("scan sessions", e))?;
            let expired = match Self::deserialize_session(&bytes) {
                Ok(session) => session.is_expired(now, self.ttl),
                // undecodable records are dead weight either way
                Err(_) => true,
            };
            if expired {
                tree.remove(&key)
                    .map_err(|e| GateError::store("remove session", e))?;
                purged += 1;
            }
        }
        if purged > 0 {
            tree.flush().map_err(|e| GateError::store("flush sessions", e))?;
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{Duration, Utc};

    fn store_with_clock() -> (SledSessionStore, Arc<FixedClock>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("temp dir");
        let clock = Arc::new(FixedClock::at(Utc::now()));
        let store = SledSessionStore::open(
            dir.path().to_str().unwrap(),
            Duration::minutes(45),
            clock.clone(),
        )
        .expect("open store");
        (store, clock, dir)
    }

    #[test]
    fn create_then_get() {
        let (store, _clock, _dir) = store_with_clock();
        let session = store.create("gw-1", Some("user-9")).unwrap();
        let fetched = store.get(&session.id).unwrap().expect("present");
        assert_eq!(fetched, session);
        assert_eq!(fetched.current_stage, 0);
        assert!(fetched.completed_tasks.is_empty());
    }

    #[test]
    fn logical_expiry_hides_stale_sessions() {
        let (store, clock, _dir) = store_with_clock();
        let session = store.create("gw-1", None).unwrap();

        clock.advance(Duration::minutes(44));
        assert!(store.get(&session.id).unwrap().is_some());

        clock.advance(Duration::minutes(2));
        assert!(store.get(&session.id).unwrap().is_none());
        assert!(matches!(
            store.update(&session.id, &SessionPatch::add_task("late")),
            Err(GateError::SessionNotFound { .. })
        ));
    }

    #[test]
    fn update_merges_tasks() {
        let (store, _clock, _dir) = store_with_clock();
        let session = store.create("gw-1", None).unwrap();

        store
            .update(&session.id, &SessionPatch::add_task("task-1"))
            .unwrap();
        let after = store
            .update(&session.id, &SessionPatch::add_task("task-1"))
            .unwrap();
        assert_eq!(after.completed_tasks.len(), 1);

        let after = store
            .update(&session.id, &SessionPatch::add_task("task-2"))
            .unwrap();
        assert_eq!(after.completed_tasks.len(), 2);
    }

    #[test]
    fn update_unknown_id_is_not_found() {
        let (store, _clock, _dir) = store_with_clock();
        assert!(matches!(
            store.update("missing", &SessionPatch::set_stage(1)),
            Err(GateError::SessionNotFound { .. })
        ));
    }

    #[test]
    fn purge_drops_only_expired() {
        let (store, clock, _dir) = store_with_clock();
        let stale = store.create("gw-1", None).unwrap();
        clock.advance(Duration::minutes(50));
        let fresh = store.create("gw-1", None).unwrap();

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert!(store.get(&fresh.id).unwrap().is_some());
        assert!(store.get(&stale.id).unwrap().is_none());
    }
}
