//! Gateway session record
//!
//! The mutable, server-held record of one visitor's progress through a
//! gateway. Updates go through `SessionPatch`, which is a merge: task ids
//! union into the set, scalar fields replace.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Per-visitor gateway progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySession {
    pub id: String,
    pub gateway_id: String,
    pub user_id: Option<String>,
    pub completed_tasks: BTreeSet<String>,
    pub current_stage: u32,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GatewaySession {
    /// Fresh session at stage 0 with an empty task set.
    pub fn new(gateway_id: &str, user_id: Option<&str>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            gateway_id: gateway_id.to_string(),
            user_id: user_id.map(str::to_string),
            completed_tasks: BTreeSet::new(),
            current_stage: 0,
            completed: false,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Logical expiry: stores must report a session as missing once it has
    /// been idle past the TTL, whether or not the bytes still exist.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.updated_at) > ttl
    }

    /// Apply a merge patch and refresh `updated_at`.
    pub fn apply(&mut self, patch: &SessionPatch, now: DateTime<Utc>) {
        if let Some(tasks) = &patch.completed_tasks {
            for task in tasks {
                self.completed_tasks.insert(task.clone());
            }
        }
        if let Some(stage) = patch.current_stage {
            self.current_stage = stage;
        }
        if patch.mark_completed {
            self.completed = true;
            self.completed_at = Some(now);
        }
        self.updated_at = now;
    }
}

/// Merge patch for a session update. Task ids are ADDED to the stored set,
/// never used to overwrite it; stage and completion replace when present.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub completed_tasks: Option<Vec<String>>,
    pub current_stage: Option<u32>,
    pub mark_completed: bool,
}

impl SessionPatch {
    /// Patch adding one completed task.
    pub fn add_task(task_id: &str) -> Self {
        Self {
            completed_tasks: Some(vec![task_id.to_string()]),
            ..Self::default()
        }
    }

    /// Patch moving the session to a new stage.
    pub fn set_stage(stage: u32) -> Self {
        Self {
            current_stage: Some(stage),
            ..Self::default()
        }
    }

    /// Patch marking the terminal stage reached.
    pub fn complete(stage: u32) -> Self {
        Self {
            current_stage: Some(stage),
            mark_completed: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_deduplicates_tasks() {
        let now = Utc::now();
        let mut session = GatewaySession::new("gw-1", None, now);
        session.apply(&SessionPatch::add_task("task-1"), now);
        session.apply(&SessionPatch::add_task("task-1"), now);
        session.apply(&SessionPatch::add_task("task-2"), now);
        assert_eq!(session.completed_tasks.len(), 2);
    }

    #[test]
    fn patch_refreshes_updated_at() {
        let now = Utc::now();
        let mut session = GatewaySession::new("gw-1", Some("user-7"), now);
        let later = now + Duration::minutes(5);
        session.apply(&SessionPatch::set_stage(1), later);
        assert_eq!(session.current_stage, 1);
        assert_eq!(session.updated_at, later);
        assert_eq!(session.created_at, now);
    }

    #[test]
    fn expiry_is_relative_to_last_update() {
        let now = Utc::now();
        let mut session = GatewaySession::new("gw-1", None, now);
        let ttl = Duration::minutes(45);
        assert!(!session.is_expired(now + Duration::minutes(44), ttl));
        assert!(session.is_expired(now + Duration::minutes(46), ttl));

        // activity keeps it alive
        session.apply(&SessionPatch::add_task("task-1"), now + Duration::minutes(40));
        assert!(!session.is_expired(now + Duration::minutes(80), ttl));
    }

    #[test]
    fn complete_patch_sets_flag_and_timestamp() {
        let now = Utc::now();
        let mut session = GatewaySession::new("gw-1", None, now);
        session.apply(&SessionPatch::complete(3), now);
        assert!(session.completed);
        assert_eq!(session.completed_at, Some(now));
        assert_eq!(session.current_stage, 3);
    }
}
