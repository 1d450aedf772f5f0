//! AgentFlow Storage - Storage Trait and Mock Implementation
//!
//! Defines the Entity Store abstraction the lifecycle engine reads from
//! and writes to. Implementations must uphold three invariants the
//! engine's correctness depends on:
//!
//! 1. At most one non-stopped session per agent, enforced by a single
//!    conditional insert rather than a read-then-write sequence.
//! 2. Events and performance records are append-only; neither is ever
//!    mutated or deleted.
//! 3. Performance records for one agent are only creatable in
//!    non-decreasing `recorded_at` order.
//!
//! `MockStorage` is the in-memory reference implementation used by tests
//! and by embedders that do not need durability.

use agentflow_core::{
    Agent, AgentId, AgentStatus, ConflictCode, EngineError, EntityType, Event, EventType,
    FlowResult, PerformanceRecord, Project, ProjectId, RoleSnapshot, Session, SessionId,
    SessionStatus, StorageError, Task, TaskId, TaskStatus, Timestamp,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

// ============================================================================
// UPDATE TYPES
// ============================================================================

/// Update payload for agents. Status and trust score are the status
/// controller's write path; capabilities and settings are the
/// administrative one. The two sets are disjoint and must not race.
#[derive(Debug, Clone, Default)]
pub struct AgentUpdate {
    /// New status
    pub status: Option<AgentStatus>,
    /// New trust score
    pub trust_score: Option<f64>,
    /// Replacement capability list
    pub capabilities: Option<Vec<String>>,
    /// Replacement settings map
    pub settings: Option<std::collections::BTreeMap<String, String>>,
}

/// Update payload for tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    /// New status
    pub status: Option<TaskStatus>,
    /// New assignee
    pub assigned_agent_id: Option<AgentId>,
    /// Assignment timestamp
    pub assigned_at: Option<Timestamp>,
    /// Start timestamp
    pub started_at: Option<Timestamp>,
    /// Completion timestamp
    pub completed_at: Option<Timestamp>,
}

/// Update payload for sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    /// New status
    pub status: Option<SessionStatus>,
    /// Stop timestamp
    pub stopped_at: Option<Timestamp>,
    /// Derived duration in whole seconds
    pub duration_seconds: Option<i64>,
    /// Tasks the caller reports having worked on
    pub tasks_worked_on: Option<Vec<TaskId>>,
    /// Caller-supplied summary
    pub summary: Option<String>,
    /// Role snapshot captured at stop
    pub role_snapshot: Option<RoleSnapshot>,
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Storage trait for AgentFlow entities.
/// Implementations provide persistence for agents, projects, tasks,
/// sessions, events, and performance records.
pub trait StorageTrait: Send + Sync {
    // === Agent Operations ===

    /// Insert a new agent.
    fn agent_insert(&self, a: &Agent) -> FlowResult<()>;

    /// Get an agent by ID.
    fn agent_get(&self, id: Uuid) -> FlowResult<Option<Agent>>;

    /// Get an agent by its unique code.
    fn agent_get_by_code(&self, code: &str) -> FlowResult<Option<Agent>>;

    /// Update an agent's status/trust fields.
    fn agent_update(&self, id: Uuid, update: AgentUpdate) -> FlowResult<()>;

    // === Project Operations ===

    /// Insert a new project.
    fn project_insert(&self, p: &Project) -> FlowResult<()>;

    /// Get a project by ID.
    fn project_get(&self, id: Uuid) -> FlowResult<Option<Project>>;

    // === Task Operations ===

    /// Insert a new task.
    fn task_insert(&self, t: &Task) -> FlowResult<()>;

    /// Get a task by ID.
    fn task_get(&self, id: Uuid) -> FlowResult<Option<Task>>;

    /// Update a task.
    fn task_update(&self, id: Uuid, update: TaskUpdate) -> FlowResult<()>;

    /// List every task currently or previously assigned to an agent.
    fn task_list_by_assignee(&self, agent_id: AgentId) -> FlowResult<Vec<Task>>;

    /// List tasks in a project assigned to an agent in a pullable status
    /// (assigned, in progress, or blocked). Unordered; the engine sorts.
    fn task_list_pullable(&self, project_id: ProjectId, agent_id: AgentId)
        -> FlowResult<Vec<Task>>;

    /// List completed tasks attributed to an agent. Unordered.
    fn task_list_completed(&self, agent_id: AgentId) -> FlowResult<Vec<Task>>;

    // === Session Operations ===

    /// Conditionally insert a session in `Started` status. Fails with a
    /// `Conflict` naming the blocking session if the agent already has a
    /// non-stopped session. The check and the insert happen under one
    /// lock; two concurrent starts can never both succeed.
    fn session_insert_active(&self, s: &Session) -> FlowResult<()>;

    /// Get a session by ID.
    fn session_get(&self, id: Uuid) -> FlowResult<Option<Session>>;

    /// Update a session. Stopped sessions are immutable and reject all
    /// updates; `duration_seconds` can only ever be set once.
    fn session_update(&self, id: Uuid, update: SessionUpdate) -> FlowResult<()>;

    /// The agent's current non-stopped session, if any.
    fn session_active_for_agent(&self, agent_id: AgentId) -> FlowResult<Option<Session>>;

    /// The agent's most recently stopped session, if any.
    fn session_last_stopped(&self, agent_id: AgentId) -> FlowResult<Option<Session>>;

    // === Event Operations ===

    /// Append an event to the audit log. Events are never updated.
    fn event_append(&self, e: &Event) -> FlowResult<()>;

    /// Events mentioning an agent with `created_at` strictly after the
    /// boundary, oldest first.
    fn event_list_mentioning(&self, agent_id: AgentId, after: Timestamp)
        -> FlowResult<Vec<Event>>;

    /// Events of one type authored by an agent, newest first, optionally
    /// bounded to `created_at >= since`.
    fn event_list_by_type(
        &self,
        agent_id: AgentId,
        event_type: EventType,
        since: Option<Timestamp>,
    ) -> FlowResult<Vec<Event>>;

    /// Events referencing a session, oldest first.
    fn event_list_by_session(&self, session_id: SessionId) -> FlowResult<Vec<Event>>;

    // === Performance Record Operations ===

    /// Append a performance record. Rejects `recorded_at` regressions for
    /// the same agent; history is strictly append-only.
    fn record_append(&self, r: &PerformanceRecord) -> FlowResult<()>;

    /// Up to `limit` most recent records for an agent, newest first.
    fn record_list_recent(&self, agent_id: AgentId, limit: usize)
        -> FlowResult<Vec<PerformanceRecord>>;

    /// The most recent record for an agent, if any.
    fn record_latest(&self, agent_id: AgentId) -> FlowResult<Option<PerformanceRecord>>;
}

// ============================================================================
// MOCK STORAGE
// ============================================================================

/// In-memory storage for tests and embedders without durability needs.
#[derive(Debug, Default)]
pub struct MockStorage {
    agents: Arc<RwLock<HashMap<Uuid, Agent>>>,
    projects: Arc<RwLock<HashMap<Uuid, Project>>>,
    tasks: Arc<RwLock<HashMap<Uuid, Task>>>,
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
    events: Arc<RwLock<Vec<Event>>>,
    records: Arc<RwLock<Vec<PerformanceRecord>>>,
}

impl MockStorage {
    /// Create a new mock storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        self.agents.write().unwrap().clear();
        self.projects.write().unwrap().clear();
        self.tasks.write().unwrap().clear();
        self.sessions.write().unwrap().clear();
        self.events.write().unwrap().clear();
        self.records.write().unwrap().clear();
    }

    /// Get count of stored agents.
    pub fn agent_count(&self) -> usize {
        self.agents.read().unwrap().len()
    }

    /// Get count of stored sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Get count of appended events.
    pub fn event_count(&self) -> usize {
        self.events.read().unwrap().len()
    }

    /// Get count of appended performance records.
    pub fn record_count(&self) -> usize {
        self.records.read().unwrap().len()
    }
}

impl StorageTrait for MockStorage {
    // === Agent Operations ===

    fn agent_insert(&self, a: &Agent) -> FlowResult<()> {
        let mut agents = self.agents.write().unwrap();
        if agents.contains_key(&a.agent_id) {
            return Err(EngineError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Agent,
                reason: "already exists".to_string(),
            }));
        }
        if agents.values().any(|existing| existing.code == a.code) {
            return Err(EngineError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Agent,
                reason: format!("duplicate code: {}", a.code),
            }));
        }
        agents.insert(a.agent_id, a.clone());
        Ok(())
    }

    fn agent_get(&self, id: Uuid) -> FlowResult<Option<Agent>> {
        let agents = self.agents.read().unwrap();
        Ok(agents.get(&id).cloned())
    }

    fn agent_get_by_code(&self, code: &str) -> FlowResult<Option<Agent>> {
        let agents = self.agents.read().unwrap();
        Ok(agents.values().find(|a| a.code == code).cloned())
    }

    fn agent_update(&self, id: Uuid, update: AgentUpdate) -> FlowResult<()> {
        let mut agents = self.agents.write().unwrap();
        let agent = agents
            .get_mut(&id)
            .ok_or(EngineError::Storage(StorageError::NotFound {
                entity_type: EntityType::Agent,
                id,
            }))?;

        if let Some(status) = update.status {
            agent.status = status;
        }
        if let Some(trust_score) = update.trust_score {
            agent.trust_score = trust_score;
        }
        if let Some(capabilities) = update.capabilities {
            agent.capabilities = capabilities;
        }
        if let Some(settings) = update.settings {
            agent.settings = settings;
        }
        agent.updated_at = chrono::Utc::now();

        Ok(())
    }

    // === Project Operations ===

    fn project_insert(&self, p: &Project) -> FlowResult<()> {
        let mut projects = self.projects.write().unwrap();
        if projects.contains_key(&p.project_id) {
            return Err(EngineError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Project,
                reason: "already exists".to_string(),
            }));
        }
        projects.insert(p.project_id, p.clone());
        Ok(())
    }

    fn project_get(&self, id: Uuid) -> FlowResult<Option<Project>> {
        let projects = self.projects.read().unwrap();
        Ok(projects.get(&id).cloned())
    }

    // === Task Operations ===

    fn task_insert(&self, t: &Task) -> FlowResult<()> {
        let mut tasks = self.tasks.write().unwrap();
        if tasks.contains_key(&t.task_id) {
            return Err(EngineError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Task,
                reason: "already exists".to_string(),
            }));
        }
        tasks.insert(t.task_id, t.clone());
        Ok(())
    }

    fn task_get(&self, id: Uuid) -> FlowResult<Option<Task>> {
        let tasks = self.tasks.read().unwrap();
        Ok(tasks.get(&id).cloned())
    }

    fn task_update(&self, id: Uuid, update: TaskUpdate) -> FlowResult<()> {
        let mut tasks = self.tasks.write().unwrap();
        let task = tasks
            .get_mut(&id)
            .ok_or(EngineError::Storage(StorageError::NotFound {
                entity_type: EntityType::Task,
                id,
            }))?;

        if let Some(status) = update.status {
            if !task.status.can_transition_to(status) {
                return Err(EngineError::Storage(StorageError::UpdateFailed {
                    entity_type: EntityType::Task,
                    id,
                    reason: format!("illegal transition {} -> {}", task.status, status),
                }));
            }
            task.status = status;
        }
        if let Some(agent_id) = update.assigned_agent_id {
            task.assigned_agent_id = Some(agent_id);
        }
        if let Some(assigned_at) = update.assigned_at {
            task.assigned_at = Some(assigned_at);
        }
        if let Some(started_at) = update.started_at {
            task.started_at = Some(started_at);
        }
        if let Some(completed_at) = update.completed_at {
            task.completed_at = Some(completed_at);
        }

        Ok(())
    }

    fn task_list_by_assignee(&self, agent_id: AgentId) -> FlowResult<Vec<Task>> {
        let tasks = self.tasks.read().unwrap();
        Ok(tasks
            .values()
            .filter(|t| t.assigned_agent_id == Some(agent_id))
            .cloned()
            .collect())
    }

    fn task_list_pullable(
        &self,
        project_id: ProjectId,
        agent_id: AgentId,
    ) -> FlowResult<Vec<Task>> {
        let tasks = self.tasks.read().unwrap();
        Ok(tasks
            .values()
            .filter(|t| t.project_id == project_id && t.is_pullable_by(agent_id))
            .cloned()
            .collect())
    }

    fn task_list_completed(&self, agent_id: AgentId) -> FlowResult<Vec<Task>> {
        let tasks = self.tasks.read().unwrap();
        Ok(tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Completed && t.assigned_agent_id == Some(agent_id)
            })
            .cloned()
            .collect())
    }

    // === Session Operations ===

    fn session_insert_active(&self, s: &Session) -> FlowResult<()> {
        // Single write lock covers both the uniqueness check and the
        // insert; concurrent starts serialize here.
        let mut sessions = self.sessions.write().unwrap();
        if sessions.contains_key(&s.session_id) {
            return Err(EngineError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Session,
                reason: "already exists".to_string(),
            }));
        }
        if s.status != SessionStatus::Started {
            return Err(EngineError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Session,
                reason: format!("new sessions must be in started status, got {}", s.status),
            }));
        }
        if let Some(open) = sessions
            .values()
            .find(|existing| existing.agent_id == s.agent_id && !existing.is_stopped())
        {
            return Err(EngineError::Conflict {
                code: ConflictCode::SessionActive,
                blocking_session: Some(open.session_id),
                reason: format!(
                    "agent {} already has non-stopped session {}",
                    s.agent_id, open.session_id
                ),
            });
        }
        sessions.insert(s.session_id, s.clone());
        Ok(())
    }

    fn session_get(&self, id: Uuid) -> FlowResult<Option<Session>> {
        let sessions = self.sessions.read().unwrap();
        Ok(sessions.get(&id).cloned())
    }

    fn session_update(&self, id: Uuid, update: SessionUpdate) -> FlowResult<()> {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions
            .get_mut(&id)
            .ok_or(EngineError::Storage(StorageError::NotFound {
                entity_type: EntityType::Session,
                id,
            }))?;

        if session.is_stopped() {
            return Err(EngineError::Storage(StorageError::UpdateFailed {
                entity_type: EntityType::Session,
                id,
                reason: "session is immutable once stopped".to_string(),
            }));
        }

        if let Some(status) = update.status {
            if !session.status.can_transition_to(status) {
                return Err(EngineError::Storage(StorageError::UpdateFailed {
                    entity_type: EntityType::Session,
                    id,
                    reason: format!("illegal transition {} -> {}", session.status, status),
                }));
            }
            session.status = status;
        }
        if let Some(stopped_at) = update.stopped_at {
            session.stopped_at = Some(stopped_at);
        }
        if let Some(duration_seconds) = update.duration_seconds {
            if session.duration_seconds.is_some() {
                return Err(EngineError::Storage(StorageError::UpdateFailed {
                    entity_type: EntityType::Session,
                    id,
                    reason: "duration_seconds is set exactly once".to_string(),
                }));
            }
            session.duration_seconds = Some(duration_seconds);
        }
        if let Some(tasks_worked_on) = update.tasks_worked_on {
            session.tasks_worked_on = tasks_worked_on;
        }
        if let Some(summary) = update.summary {
            session.summary = Some(summary);
        }
        if let Some(role_snapshot) = update.role_snapshot {
            session.role_snapshot = Some(role_snapshot);
        }

        Ok(())
    }

    fn session_active_for_agent(&self, agent_id: AgentId) -> FlowResult<Option<Session>> {
        let sessions = self.sessions.read().unwrap();
        Ok(sessions
            .values()
            .find(|s| s.agent_id == agent_id && !s.is_stopped())
            .cloned())
    }

    fn session_last_stopped(&self, agent_id: AgentId) -> FlowResult<Option<Session>> {
        let sessions = self.sessions.read().unwrap();
        Ok(sessions
            .values()
            .filter(|s| s.agent_id == agent_id && s.is_stopped())
            .max_by_key(|s| s.stopped_at)
            .cloned())
    }

    // === Event Operations ===

    fn event_append(&self, e: &Event) -> FlowResult<()> {
        let mut events = self.events.write().unwrap();
        if events.iter().any(|existing| existing.event_id == e.event_id) {
            return Err(EngineError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Event,
                reason: "already exists".to_string(),
            }));
        }
        events.push(e.clone());
        Ok(())
    }

    fn event_list_mentioning(
        &self,
        agent_id: AgentId,
        after: Timestamp,
    ) -> FlowResult<Vec<Event>> {
        let events = self.events.read().unwrap();
        let mut matching: Vec<Event> = events
            .iter()
            .filter(|e| e.mentions.contains(&agent_id) && e.created_at > after)
            .cloned()
            .collect();
        matching.sort_by_key(|e| (e.created_at, e.event_id));
        Ok(matching)
    }

    fn event_list_by_type(
        &self,
        agent_id: AgentId,
        event_type: EventType,
        since: Option<Timestamp>,
    ) -> FlowResult<Vec<Event>> {
        let events = self.events.read().unwrap();
        let mut matching: Vec<Event> = events
            .iter()
            .filter(|e| {
                e.agent_id == Some(agent_id)
                    && e.event_type == event_type
                    && since.map_or(true, |bound| e.created_at >= bound)
            })
            .cloned()
            .collect();
        matching.sort_by_key(|e| std::cmp::Reverse((e.created_at, e.event_id)));
        Ok(matching)
    }

    fn event_list_by_session(&self, session_id: SessionId) -> FlowResult<Vec<Event>> {
        let events = self.events.read().unwrap();
        let mut matching: Vec<Event> = events
            .iter()
            .filter(|e| e.session_id == Some(session_id))
            .cloned()
            .collect();
        matching.sort_by_key(|e| (e.created_at, e.event_id));
        Ok(matching)
    }

    // === Performance Record Operations ===

    fn record_append(&self, r: &PerformanceRecord) -> FlowResult<()> {
        let mut records = self.records.write().unwrap();
        if records.iter().any(|existing| existing.record_id == r.record_id) {
            return Err(EngineError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::PerformanceRecord,
                reason: "already exists".to_string(),
            }));
        }
        if let Some(latest) = records
            .iter()
            .filter(|existing| existing.agent_id == r.agent_id)
            .map(|existing| existing.recorded_at)
            .max()
        {
            if r.recorded_at < latest {
                return Err(EngineError::Storage(StorageError::InsertFailed {
                    entity_type: EntityType::PerformanceRecord,
                    reason: format!(
                        "recorded_at regression: {} is before latest {}",
                        r.recorded_at, latest
                    ),
                }));
            }
        }
        records.push(r.clone());
        Ok(())
    }

    fn record_list_recent(
        &self,
        agent_id: AgentId,
        limit: usize,
    ) -> FlowResult<Vec<PerformanceRecord>> {
        let records = self.records.read().unwrap();
        let mut matching: Vec<PerformanceRecord> = records
            .iter()
            .filter(|r| r.agent_id == agent_id)
            .cloned()
            .collect();
        matching.sort_by_key(|r| std::cmp::Reverse((r.recorded_at, r.record_id)));
        matching.truncate(limit);
        Ok(matching)
    }

    fn record_latest(&self, agent_id: AgentId) -> FlowResult<Option<PerformanceRecord>> {
        Ok(self.record_list_recent(agent_id, 1)?.into_iter().next())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::{PerformanceMetrics, TaskPriority, TrendLabels};
    use chrono::{Duration as ChronoDuration, Utc};

    fn make_test_agent() -> Agent {
        Agent::new("ada-7", "Ada", Uuid::now_v7())
    }

    fn make_test_task(project_id: ProjectId, agent_id: AgentId) -> Task {
        let mut task = Task::new(project_id, "wire the codec", TaskPriority::P1);
        task.status = TaskStatus::Assigned;
        task.assigned_agent_id = Some(agent_id);
        task.assigned_at = Some(Utc::now());
        task
    }

    fn make_test_record(agent_id: AgentId) -> PerformanceRecord {
        PerformanceRecord::new(
            agent_id,
            PerformanceMetrics {
                tasks_completed: 3,
                code_quality_score: 70.0,
                feature_completion_rate: 1.0,
                ..Default::default()
            },
            TrendLabels::default(),
        )
    }

    // ========================================================================
    // Agent Tests
    // ========================================================================

    #[test]
    fn test_agent_insert_get() {
        let storage = MockStorage::new();
        let agent = make_test_agent();

        storage.agent_insert(&agent).unwrap();
        let retrieved = storage.agent_get(agent.agent_id).unwrap();

        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().agent_id, agent.agent_id);
    }

    #[test]
    fn test_agent_insert_duplicate_code() {
        let storage = MockStorage::new();
        let agent = make_test_agent();
        let clone_code = Agent::new("ada-7", "Other Ada", Uuid::now_v7());

        storage.agent_insert(&agent).unwrap();
        let result = storage.agent_insert(&clone_code);
        assert!(matches!(
            result,
            Err(EngineError::Storage(StorageError::InsertFailed { .. }))
        ));
    }

    #[test]
    fn test_agent_get_by_code() {
        let storage = MockStorage::new();
        let agent = make_test_agent();
        storage.agent_insert(&agent).unwrap();

        let found = storage.agent_get_by_code("ada-7").unwrap();
        assert_eq!(found.map(|a| a.agent_id), Some(agent.agent_id));
        assert!(storage.agent_get_by_code("nobody").unwrap().is_none());
    }

    #[test]
    fn test_agent_update_status_and_trust() {
        let storage = MockStorage::new();
        let agent = make_test_agent();
        storage.agent_insert(&agent).unwrap();

        storage
            .agent_update(
                agent.agent_id,
                AgentUpdate {
                    status: Some(AgentStatus::Probation),
                    trust_score: Some(27.5),
                    ..Default::default()
                },
            )
            .unwrap();

        let updated = storage.agent_get(agent.agent_id).unwrap().unwrap();
        assert_eq!(updated.status, AgentStatus::Probation);
        assert_eq!(updated.trust_score, 27.5);
    }

    // ========================================================================
    // Session Tests
    // ========================================================================

    #[test]
    fn test_session_conditional_insert_conflict() {
        let storage = MockStorage::new();
        let agent_id = Uuid::now_v7();
        let project_id = Uuid::now_v7();
        let first = Session::new(agent_id, project_id);
        let second = Session::new(agent_id, project_id);

        storage.session_insert_active(&first).unwrap();
        let result = storage.session_insert_active(&second);

        match result {
            Err(EngineError::Conflict {
                code,
                blocking_session,
                ..
            }) => {
                assert_eq!(code, ConflictCode::SessionActive);
                assert_eq!(blocking_session, Some(first.session_id));
            }
            other => panic!("expected session conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_session_insert_allowed_after_stop() {
        let storage = MockStorage::new();
        let agent_id = Uuid::now_v7();
        let project_id = Uuid::now_v7();
        let first = Session::new(agent_id, project_id);
        storage.session_insert_active(&first).unwrap();

        let stopped_at = Utc::now();
        storage
            .session_update(
                first.session_id,
                SessionUpdate {
                    status: Some(SessionStatus::Stopped),
                    stopped_at: Some(stopped_at),
                    duration_seconds: Some(42),
                    ..Default::default()
                },
            )
            .unwrap();

        let second = Session::new(agent_id, project_id);
        storage.session_insert_active(&second).unwrap();
        assert_eq!(storage.session_count(), 2);
    }

    #[test]
    fn test_session_stopped_is_immutable() {
        let storage = MockStorage::new();
        let session = Session::new(Uuid::now_v7(), Uuid::now_v7());
        storage.session_insert_active(&session).unwrap();

        storage
            .session_update(
                session.session_id,
                SessionUpdate {
                    status: Some(SessionStatus::Stopped),
                    stopped_at: Some(Utc::now()),
                    duration_seconds: Some(10),
                    ..Default::default()
                },
            )
            .unwrap();

        let result = storage.session_update(
            session.session_id,
            SessionUpdate {
                summary: Some("late edit".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(
            result,
            Err(EngineError::Storage(StorageError::UpdateFailed { .. }))
        ));
    }

    #[test]
    fn test_session_rejects_reentering_started() {
        let storage = MockStorage::new();
        let session = Session::new(Uuid::now_v7(), Uuid::now_v7());
        storage.session_insert_active(&session).unwrap();

        storage
            .session_update(
                session.session_id,
                SessionUpdate {
                    status: Some(SessionStatus::Logging),
                    ..Default::default()
                },
            )
            .unwrap();

        let result = storage.session_update(
            session.session_id,
            SessionUpdate {
                status: Some(SessionStatus::Started),
                ..Default::default()
            },
        );
        assert!(matches!(
            result,
            Err(EngineError::Storage(StorageError::UpdateFailed { .. }))
        ));
    }

    #[test]
    fn test_session_last_stopped_picks_latest() {
        let storage = MockStorage::new();
        let agent_id = Uuid::now_v7();
        let project_id = Uuid::now_v7();

        let mut stopped_ids = Vec::new();
        for age_minutes in [30i64, 10] {
            let session = Session::new(agent_id, project_id);
            storage.session_insert_active(&session).unwrap();
            storage
                .session_update(
                    session.session_id,
                    SessionUpdate {
                        status: Some(SessionStatus::Stopped),
                        stopped_at: Some(Utc::now() - ChronoDuration::minutes(age_minutes)),
                        duration_seconds: Some(60),
                        ..Default::default()
                    },
                )
                .unwrap();
            stopped_ids.push(session.session_id);
        }

        let last = storage.session_last_stopped(agent_id).unwrap().unwrap();
        assert_eq!(last.session_id, stopped_ids[1]);
    }

    // ========================================================================
    // Task Tests
    // ========================================================================

    #[test]
    fn test_task_list_pullable_filters_status_and_project() {
        let storage = MockStorage::new();
        let project_id = Uuid::now_v7();
        let agent_id = Uuid::now_v7();

        let assigned = make_test_task(project_id, agent_id);
        let mut completed = make_test_task(project_id, agent_id);
        completed.status = TaskStatus::Completed;
        completed.completed_at = Some(Utc::now());
        let elsewhere = make_test_task(Uuid::now_v7(), agent_id);

        storage.task_insert(&assigned).unwrap();
        storage.task_insert(&completed).unwrap();
        storage.task_insert(&elsewhere).unwrap();

        let pullable = storage.task_list_pullable(project_id, agent_id).unwrap();
        assert_eq!(pullable.len(), 1);
        assert_eq!(pullable[0].task_id, assigned.task_id);
    }

    #[test]
    fn test_task_update_rejects_illegal_transition() {
        let storage = MockStorage::new();
        let mut task = Task::new(Uuid::now_v7(), "done already", TaskPriority::P2);
        task.status = TaskStatus::Completed;
        storage.task_insert(&task).unwrap();

        let result = storage.task_update(
            task.task_id,
            TaskUpdate {
                status: Some(TaskStatus::InProgress),
                ..Default::default()
            },
        );
        assert!(matches!(
            result,
            Err(EngineError::Storage(StorageError::UpdateFailed { .. }))
        ));
    }

    // ========================================================================
    // Event Tests
    // ========================================================================

    #[test]
    fn test_event_list_mentioning_orders_and_bounds() {
        let storage = MockStorage::new();
        let agent_id = Uuid::now_v7();
        let boundary = Utc::now() - ChronoDuration::hours(1);

        let old = Event::new(EventType::TaskAssigned)
            .with_mention(agent_id)
            .with_created_at(boundary - ChronoDuration::minutes(5));
        let newer = Event::new(EventType::TaskCompleted)
            .with_mention(agent_id)
            .with_created_at(boundary + ChronoDuration::minutes(20));
        let newest = Event::new(EventType::TaskAssigned)
            .with_mention(agent_id)
            .with_created_at(boundary + ChronoDuration::minutes(40));
        let unrelated = Event::new(EventType::TaskAssigned)
            .with_mention(Uuid::now_v7())
            .with_created_at(boundary + ChronoDuration::minutes(30));

        // Deliberately append out of order.
        for event in [&newest, &old, &unrelated, &newer] {
            storage.event_append(event).unwrap();
        }

        let mentions = storage.event_list_mentioning(agent_id, boundary).unwrap();
        let ids: Vec<Uuid> = mentions.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![newer.event_id, newest.event_id]);
    }

    #[test]
    fn test_event_list_by_type_newest_first() {
        let storage = MockStorage::new();
        let agent_id = Uuid::now_v7();

        let first = Event::review_completed(agent_id, true, 0)
            .with_created_at(Utc::now() - ChronoDuration::minutes(10));
        let second = Event::review_completed(agent_id, false, 2);
        storage.event_append(&first).unwrap();
        storage.event_append(&second).unwrap();

        let reviews = storage
            .event_list_by_type(agent_id, EventType::ReviewCompleted, None)
            .unwrap();
        assert_eq!(reviews.len(), 2);
        assert_eq!(reviews[0].event_id, second.event_id);
    }

    #[test]
    fn test_event_append_duplicate_rejected() {
        let storage = MockStorage::new();
        let event = Event::new(EventType::SessionStart);
        storage.event_append(&event).unwrap();
        assert!(storage.event_append(&event).is_err());
    }

    // ========================================================================
    // Performance Record Tests
    // ========================================================================

    #[test]
    fn test_record_append_and_latest() {
        let storage = MockStorage::new();
        let agent_id = Uuid::now_v7();

        let record = make_test_record(agent_id);
        storage.record_append(&record).unwrap();

        let latest = storage.record_latest(agent_id).unwrap().unwrap();
        assert_eq!(latest.record_id, record.record_id);
        assert!(storage.record_latest(Uuid::now_v7()).unwrap().is_none());
    }

    #[test]
    fn test_record_append_rejects_regression() {
        let storage = MockStorage::new();
        let agent_id = Uuid::now_v7();

        let current = make_test_record(agent_id);
        storage.record_append(&current).unwrap();

        let mut stale = make_test_record(agent_id);
        stale.recorded_at = current.recorded_at - ChronoDuration::minutes(5);
        let result = storage.record_append(&stale);
        assert!(matches!(
            result,
            Err(EngineError::Storage(StorageError::InsertFailed { .. }))
        ));
    }

    #[test]
    fn test_record_list_recent_limits_and_orders() {
        let storage = MockStorage::new();
        let agent_id = Uuid::now_v7();

        let mut appended = Vec::new();
        for minutes_ago in [50i64, 40, 30, 20, 10] {
            let mut record = make_test_record(agent_id);
            record.recorded_at = Utc::now() - ChronoDuration::minutes(minutes_ago);
            // Regenerate the id so recorded_at and id sort agree.
            record.record_id = Uuid::now_v7();
            storage.record_append(&record).unwrap();
            appended.push(record.record_id);
        }

        let recent = storage.record_list_recent(agent_id, 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].record_id, appended[4]);
        assert_eq!(recent[2].record_id, appended[2]);
    }
}
