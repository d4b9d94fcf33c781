//! Protocol-level tests for the stage progression engine.

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::analytics::{CompletionRecorder, EventMetadata};
use crate::clock::{Clock, FixedClock};
use crate::errors::GateError;
use crate::gateway::{GatewayDefinition, StaticGatewayDirectory};
use crate::progression::ProgressionEngine;
use crate::session_store::SessionStore;
use crate::session_store_memory::MemorySessionStore;
use crate::stage_token::TokenCodec;
use crate::token_cipher::derive_token_key;

struct Fixture {
    engine: ProgressionEngine,
    clock: Arc<FixedClock>,
    store: Arc<MemorySessionStore>,
}

fn fixture(total_stages: u32) -> Fixture {
    let clock = Arc::new(FixedClock::at(Utc::now()));
    let store = Arc::new(MemorySessionStore::new(Duration::minutes(45), clock.clone()));
    let directory = Arc::new(StaticGatewayDirectory::new());
    directory
        .register(GatewayDefinition {
            id: "gw-1".to_string(),
            creator_id: "creator-1".to_string(),
            name: "Test gateway".to_string(),
            total_stages,
            reward_url: None,
        })
        .expect("register gateway");

    let codec = TokenCodec::new(
        derive_token_key("flow-secret", "flow-salt"),
        Duration::minutes(30),
        clock.clone(),
    );
    let engine = ProgressionEngine::new(
        store.clone(),
        directory,
        codec,
        Duration::seconds(30),
        clock.clone(),
    );
    Fixture {
        engine,
        clock,
        store,
    }
}

#[test]
fn begin_rejects_unknown_gateway() {
    let f = fixture(3);
    assert!(matches!(
        f.engine.begin("gw-missing", None),
        Err(GateError::GatewayNotFound { .. })
    ));
}

#[test]
fn begin_issues_stage_zero_session() {
    let f = fixture(3);
    let started = f.engine.begin("gw-1", Some("user-1")).unwrap();
    assert_eq!(started.session.current_stage, 0);
    assert!(!started.session.completed);
    assert_eq!(started.expires_at, f.clock.now() + Duration::minutes(30));
}

#[test]
fn advance_is_strictly_sequential() {
    let f = fixture(3);
    let started = f.engine.begin("gw-1", None).unwrap();

    // skip-ahead, replay of the current stage, and regression all fail
    for bad in [0, 2, 3] {
        assert!(
            matches!(
                f.engine.advance(None, &started.token, bad),
                Err(GateError::InvalidProgression { .. })
            ),
            "claimed stage {bad} was accepted"
        );
    }

    // exactly +1 succeeds
    let outcome = f.engine.advance(None, &started.token, 1).unwrap();
    assert_eq!(outcome.session.current_stage, 1);
    assert!(!outcome.completed);
}

#[test]
fn a_token_advances_exactly_once() {
    let f = fixture(3);
    let started = f.engine.begin("gw-1", None).unwrap();

    assert!(f.engine.advance(None, &started.token, 1).is_ok());
    // the stage-0 token is spent once the session moved to stage 1
    assert!(matches!(
        f.engine.advance(None, &started.token, 1),
        Err(GateError::InvalidProgression { .. })
    ));
}

#[test]
fn failed_advance_leaves_session_untouched() {
    let f = fixture(3);
    let started = f.engine.begin("gw-1", None).unwrap();

    let _ = f.engine.advance(None, &started.token, 2);
    let session = f.store.get(&started.session.id).unwrap().unwrap();
    assert_eq!(session.current_stage, 0);
}

#[test]
fn advance_window_is_tighter_than_token_lifetime() {
    let f = fixture(3);
    let started = f.engine.begin("gw-1", None).unwrap();

    // still well inside the 30-minute token lifetime, but past the 30s
    // advance window
    f.clock.advance(Duration::seconds(31));
    assert!(matches!(
        f.engine.advance(None, &started.token, 1),
        Err(GateError::TokenExpired { .. })
    ));
}

#[test]
fn token_is_bound_to_its_session() {
    let f = fixture(3);
    let a = f.engine.begin("gw-1", None).unwrap();
    let b = f.engine.begin("gw-1", None).unwrap();

    assert!(matches!(
        f.engine.advance(Some(&b.session.id), &a.token, 1),
        Err(GateError::TokenMalformed { .. })
    ));
    // bound correctly, the same token works
    assert!(f.engine.advance(Some(&a.session.id), &a.token, 1).is_ok());
}

#[test]
fn terminal_stage_completes_and_then_rejects_idempotently() {
    let f = fixture(2);
    let started = f.engine.begin("gw-1", None).unwrap();

    let first = f.engine.advance(None, &started.token, 1).unwrap();
    assert!(!first.completed);

    let terminal = f.engine.advance(None, &first.token, 2).unwrap();
    assert!(terminal.completed);
    assert!(terminal.session.completed);
    assert!(terminal.session.completed_at.is_some());

    // every further advance, with any of the tokens, is AlreadyCompleted
    for token in [&started.token, &first.token, &terminal.token] {
        for claimed in [1, 2, 3] {
            assert!(matches!(
                f.engine.advance(None, token, claimed),
                Err(GateError::AlreadyCompleted { .. })
            ));
        }
    }
}

#[test]
fn expired_session_is_not_found() {
    let f = fixture(3);
    let started = f.engine.begin("gw-1", None).unwrap();

    f.clock.advance(Duration::minutes(46));
    assert!(matches!(
        f.engine.session(&started.session.id),
        Err(GateError::SessionNotFound { .. })
    ));
}

#[test]
fn garbage_token_fails_closed() {
    let f = fixture(3);
    let _ = f.engine.begin("gw-1", None).unwrap();
    assert!(matches!(
        f.engine.advance(None, "definitely-not-a-token", 1),
        Err(GateError::TokenMalformed { .. })
    ));
}

#[test]
fn full_gateway_run_with_task_tracking() {
    let f = fixture(2);
    let dir = tempfile::tempdir().unwrap();
    let recorder = CompletionRecorder::new(
        dir.path().join("events.jsonl"),
        f.store.clone() as Arc<dyn SessionStore>,
        f.clock.clone(),
    );

    // visitor lands, completes a task, advances through both stages
    let started = f.engine.begin("gw-1", Some("user-42")).unwrap();
    recorder
        .record_completion(
            &started.session.id,
            "gw-1",
            "task-1",
            EventMetadata::default(),
        )
        .unwrap();
    // a retry of the same task does not duplicate it
    recorder
        .record_completion(
            &started.session.id,
            "gw-1",
            "task-1",
            EventMetadata::default(),
        )
        .unwrap();

    let mid = f.engine.advance(None, &started.token, 1).unwrap();
    // claiming past the next stage is rejected
    assert!(matches!(
        f.engine.advance(None, &mid.token, 3),
        Err(GateError::InvalidProgression { .. })
    ));

    let done = f.engine.advance(None, &mid.token, 2).unwrap();
    assert!(done.completed);
    assert_eq!(done.session.completed_tasks.len(), 1);

    assert!(matches!(
        f.engine.advance(None, &done.token, 2),
        Err(GateError::AlreadyCompleted { .. })
    ));
}
