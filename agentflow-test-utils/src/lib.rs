//! AgentFlow Test Utilities
//!
//! Centralized test infrastructure for the AgentFlow workspace:
//! - Proptest generators for entity and metric types
//! - Test fixtures for common lifecycle scenarios

// Re-export mock storage from its source crate
pub use agentflow_storage::MockStorage;

// Re-export core types for convenience
pub use agentflow_core::{
    Agent, AgentId, AgentStatus, ConflictCode, EngineConfig, EngineError, Event, EventType,
    FlowResult, MetricTrend, OverallTrend, PerformanceMetrics, PerformanceRecord, Project,
    ProjectId, RoleSnapshot, Session, SessionId, SessionStatus, Task, TaskId, TaskPriority,
    TaskStatus, Timestamp, TrendLabels,
};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for AgentFlow types.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate a UUIDv7 (the id scheme every entity uses).
    pub fn arb_entity_id() -> impl Strategy<Value = Uuid> {
        Just(()).prop_map(|_| Uuid::now_v7())
    }

    /// Generate a task priority.
    pub fn arb_priority() -> impl Strategy<Value = TaskPriority> {
        prop_oneof![
            Just(TaskPriority::P0),
            Just(TaskPriority::P1),
            Just(TaskPriority::P2),
            Just(TaskPriority::P3),
        ]
    }

    /// Generate a pullable task status.
    pub fn arb_pullable_status() -> impl Strategy<Value = TaskStatus> {
        prop_oneof![
            Just(TaskStatus::Assigned),
            Just(TaskStatus::InProgress),
            Just(TaskStatus::Blocked),
        ]
    }

    /// Generate an in-range metrics snapshot.
    pub fn arb_metrics() -> impl Strategy<Value = PerformanceMetrics> {
        (
            0u32..50,
            0.0f64..=100.0,
            0u32..30,
            0.0f64..=1.0,
            0u32..15,
            0u32..8,
            0u64..100_000,
            0.0f64..600.0,
        )
            .prop_map(
                |(
                    tasks_completed,
                    code_quality_score,
                    positive_feedback_count,
                    feature_completion_rate,
                    bugs_introduced,
                    deployment_failures,
                    code_churn,
                    average_task_duration_minutes,
                )| PerformanceMetrics {
                    tasks_completed,
                    code_quality_score,
                    positive_feedback_count,
                    feature_completion_rate,
                    bugs_introduced,
                    deployment_failures,
                    code_churn,
                    average_task_duration_minutes,
                },
            )
    }

    /// Generate per-metric trend labels.
    pub fn arb_metric_trend() -> impl Strategy<Value = MetricTrend> {
        prop_oneof![
            Just(MetricTrend::Up),
            Just(MetricTrend::Down),
            Just(MetricTrend::Stable),
        ]
    }

    /// Generate an overall trend label.
    pub fn arb_overall_trend() -> impl Strategy<Value = OverallTrend> {
        prop_oneof![
            Just(OverallTrend::Improving),
            Just(OverallTrend::Declining),
            Just(OverallTrend::Stable),
        ]
    }

    /// Generate a full set of trend labels.
    pub fn arb_trend_labels() -> impl Strategy<Value = TrendLabels> {
        (
            arb_metric_trend(),
            arb_metric_trend(),
            arb_metric_trend(),
            arb_metric_trend(),
            arb_overall_trend(),
        )
            .prop_map(|(quality, tasks_completed, completion_rate, bugs, overall)| TrendLabels {
                quality,
                tasks_completed,
                completion_rate,
                bugs,
                overall,
            })
    }

    /// Generate a record history of the given length: metrics with
    /// arbitrary trend labels, in append order (oldest first).
    pub fn arb_history(len: std::ops::Range<usize>) -> impl Strategy<Value = Vec<(PerformanceMetrics, TrendLabels)>> {
        proptest::collection::vec((arb_metrics(), arb_trend_labels()), len)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common lifecycle scenarios.

    use super::*;
    use agentflow_storage::StorageTrait;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    /// A seeded active project.
    pub fn project(storage: &MockStorage) -> Project {
        let project = Project::new(Uuid::now_v7(), "Apollo", "apollo");
        storage.project_insert(&project).unwrap();
        project
    }

    /// A seeded active agent placed in the project.
    pub fn agent(storage: &MockStorage, project: &Project, code: &str) -> Agent {
        let agent = Agent::new(code, "Test Agent", project.project_id);
        storage.agent_insert(&agent).unwrap();
        agent
    }

    /// A seeded task in a pullable status assigned to the agent.
    pub fn assigned_task(
        storage: &MockStorage,
        project: &Project,
        agent: &Agent,
        priority: TaskPriority,
        deadline: Option<Timestamp>,
    ) -> Task {
        let mut task = Task::new(project.project_id, "open work", priority);
        task.status = TaskStatus::Assigned;
        task.assigned_agent_id = Some(agent.agent_id);
        task.assigned_at = Some(Utc::now());
        task.deadline = deadline;
        storage.task_insert(&task).unwrap();
        task
    }

    /// Append a record history for an agent, oldest first, one minute
    /// apart, ending just before now.
    pub fn record_history(
        storage: &MockStorage,
        agent_id: AgentId,
        history: &[(PerformanceMetrics, TrendLabels)],
    ) -> Vec<PerformanceRecord> {
        let now = Utc::now();
        let mut appended = Vec::new();
        for (index, (metrics, trends)) in history.iter().enumerate() {
            let mut record = PerformanceRecord::new(agent_id, metrics.clone(), *trends);
            record.recorded_at = now - Duration::minutes((history.len() - index) as i64);
            record.record_id = Uuid::now_v7();
            storage.record_append(&record).unwrap();
            appended.push(record);
        }
        appended
    }

    /// An open session inserted with a backdated start, for duration
    /// control in stop tests.
    pub fn open_session(
        storage: &MockStorage,
        agent: &Agent,
        project: &Project,
        started_seconds_ago: i64,
    ) -> Session {
        let mut session = Session::new(agent.agent_id, project.project_id);
        session.started_at = Utc::now() - Duration::seconds(started_seconds_ago);
        storage.session_insert_active(&session).unwrap();
        session
    }
}
