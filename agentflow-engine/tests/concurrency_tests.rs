//! Race-Safety Tests for Session Start
//!
//! The "at most one non-stopped session per agent" invariant must hold
//! under concurrent invocation: the store performs the uniqueness check
//! and the insert under one lock, so two racing starts can never both
//! observe zero open sessions.

use agentflow_engine::LifecycleEngine;
use agentflow_storage::StorageTrait;
use agentflow_test_utils::{fixtures, ConflictCode, EngineConfig, EngineError, MockStorage};
use std::sync::Arc;
use std::thread;

#[test]
fn concurrent_session_starts_admit_exactly_one() {
    let storage = Arc::new(MockStorage::new());
    let engine = Arc::new(
        LifecycleEngine::new(
            Arc::clone(&storage) as Arc<dyn StorageTrait>,
            EngineConfig::standard(),
        )
        .unwrap(),
    );
    let project = fixtures::project(&storage);
    let agent = fixtures::agent(&storage, &project, "racer");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let agent_id = agent.agent_id;
            let project_id = project.project_id;
            thread::spawn(move || engine.start_session(agent_id, project_id))
        })
        .collect();

    let mut started = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => started += 1,
            Err(EngineError::Conflict { code, .. }) => {
                assert_eq!(code, ConflictCode::SessionActive);
                conflicts += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(started, 1);
    assert_eq!(conflicts, 7);
    assert!(storage
        .session_active_for_agent(agent.agent_id)
        .unwrap()
        .is_some());
}

#[test]
fn abandoned_session_stays_open_without_timeout() {
    // There is no timeout for a session that is never stopped; the
    // engine applies none. This test documents that deliberately open
    // question: the session stays open and keeps blocking new starts
    // until someone stops it.
    let storage = Arc::new(MockStorage::new());
    let engine = LifecycleEngine::new(
        Arc::clone(&storage) as Arc<dyn StorageTrait>,
        EngineConfig::standard(),
    )
    .unwrap();
    let project = fixtures::project(&storage);
    let agent = fixtures::agent(&storage, &project, "forgetful");
    let abandoned = fixtures::open_session(&storage, &agent, &project, 90 * 24 * 3600);

    let result = engine.start_session(agent.agent_id, project.project_id);
    match result {
        Err(EngineError::Conflict {
            code,
            blocking_session,
            ..
        }) => {
            // Default policy reports plain SESSION_ACTIVE however old the
            // blocker is; FlagStale is an explicit opt-in.
            assert_eq!(code, ConflictCode::SessionActive);
            assert_eq!(blocking_session, Some(abandoned.session_id));
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    engine
        .stop_session(abandoned.session_id, agent.agent_id, Vec::new(), None)
        .unwrap();
    engine
        .start_session(agent.agent_id, project.project_id)
        .unwrap();
}