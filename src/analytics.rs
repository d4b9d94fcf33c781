//! Task and stage completion recording
//!
//! Events are appended to a hash-linked JSONL log; each line carries the
//! hash of its predecessor so after-the-fact edits are detectable. The
//! append is best-effort and never fails the caller's primary operation.
//! The session-set merge on task completion IS a session mutation and
//! keeps store failures fatal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::GateResult;
use crate::session::{GatewaySession, SessionPatch};
use crate::session_store::SessionStore;

/// Global mutex serializing event log appends across handlers.
static RECORD_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskAction {
    TaskStart,
    TaskComplete,
}

/// Free-form request context attached to an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub creator_id: Option<String>,
}

/// One append-only completion record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub id: String,
    pub session_id: Option<String>,
    pub gateway_id: String,
    pub task_id: String,
    pub action: TaskAction,
    pub timestamp: DateTime<Utc>,
    pub metadata: EventMetadata,
}

impl TaskEvent {
    pub fn new(gateway_id: &str, task_id: &str, action: TaskAction, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: None,
            gateway_id: gateway_id.to_string(),
            task_id: task_id.to_string(),
            action,
            timestamp,
            metadata: EventMetadata::default(),
        }
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A hash-linked line in the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainedEventLine {
    line: String,
    hash: String,
    prev_hash: Option<String>,
}

/// Last hash in the log file, for chaining the next line.
fn read_last_hash(log_path: &Path) -> Option<String> {
    let file = File::open(log_path).ok()?;
    let reader = BufReader::new(file);
    let last_line = reader.lines().map_while(Result::ok).last()?;
    let parsed: Result<ChainedEventLine, _> = serde_json::from_str(&last_line);
    parsed.ok().map(|r| r.hash)
}

/// Append one hash-linked line to the event log.
fn append_chained(log_path: &Path, line: &str, prev_hash: Option<String>) -> std::io::Result<()> {
    let mut hasher = Sha256::new();
    if let Some(prev) = &prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(line.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let record = ChainedEventLine {
        line: line.to_string(),
        hash,
        prev_hash,
    };

    let json_line = serde_json::to_string(&record)?;
    let mut file = OpenOptions::new().create(true).append(true).open(log_path)?;
    writeln!(file, "{json_line}")?;
    Ok(())
}

/// Appends completion events and applies the idempotent task merge.
pub struct CompletionRecorder {
    log_path: PathBuf,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
}

impl CompletionRecorder {
    pub fn new(log_path: impl Into<PathBuf>, store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            log_path: log_path.into(),
            store,
            clock,
        }
    }

    /// Fire-and-forget append. Failures are logged and swallowed; recording
    /// must never abort the user-facing flow.
    pub fn record(&self, event: &TaskEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("completion event serialization failed: {e}");
                return;
            }
        };

        let _guard = RECORD_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let prev_hash = read_last_hash(&self.log_path);
        if let Err(e) = append_chained(&self.log_path, &line, prev_hash) {
            tracing::warn!("completion event append failed: {e}");
        }
    }

    /// Append an event without touching any session state. Used for task
    /// starts and for completions that carry no session id.
    pub fn record_event(
        &self,
        session_id: Option<&str>,
        gateway_id: &str,
        task_id: &str,
        action: TaskAction,
        metadata: EventMetadata,
    ) {
        let mut event =
            TaskEvent::new(gateway_id, task_id, action, self.clock.now()).with_metadata(metadata);
        if let Some(id) = session_id {
            event = event.with_session(id);
        }
        self.record(&event);
    }

    /// Record a task completion: merge the task id into the session's set
    /// (idempotent, the set deduplicates), then append the event.
    pub fn record_completion(
        &self,
        session_id: &str,
        gateway_id: &str,
        task_id: &str,
        metadata: EventMetadata,
    ) -> GateResult<GatewaySession> {
        let session = self
            .store
            .update(session_id, &SessionPatch::add_task(task_id))?;

        let event = TaskEvent::new(gateway_id, task_id, TaskAction::TaskComplete, self.clock.now())
            .with_session(session_id)
            .with_metadata(metadata);
        self.record(&event);
        Ok(session)
    }
}
