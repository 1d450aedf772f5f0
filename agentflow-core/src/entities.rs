//! Core entity structures
//!
//! Pure data with constructors and small predicates. Business rules live in
//! `agentflow-engine`; persistence lives behind `agentflow-storage`.

use crate::{
    AgentId, AgentStatus, EventId, EventType, MetricTrend, OverallTrend, ProjectId, RecordId,
    SessionId, SessionStatus, TaskId, TaskPriority, TaskStatus, Timestamp, ValidationError,
    new_entity_id,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Trust score assigned to an agent before any performance history exists.
pub const DEFAULT_TRUST_SCORE: f64 = 50.0;

/// Hard bounds on the trust score. Floors and ceilings, no glass ceiling:
/// a perfect history reaches exactly 100, a catastrophic one exactly 0.
pub const TRUST_SCORE_MIN: f64 = 0.0;
pub const TRUST_SCORE_MAX: f64 = 100.0;

// ============================================================================
// AGENT
// ============================================================================

/// A tracked worker entity with identity, status, and a trust score.
///
/// `status` and `trust_score` are mutated only by the status controller;
/// identity fields only by administrative record edits. The two write
/// paths are disjoint and must not race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: AgentId,
    /// Unique human-readable handle, e.g. "ada-7".
    pub code: String,
    pub display_name: String,
    /// Workspace placement.
    pub project_id: ProjectId,
    pub status: AgentStatus,
    pub trust_score: f64,
    pub capabilities: Vec<String>,
    pub settings: BTreeMap<String, String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Agent {
    /// Create a new active agent with the default trust score.
    pub fn new(code: &str, display_name: &str, project_id: ProjectId) -> Self {
        let now = Utc::now();
        Self {
            agent_id: new_entity_id(),
            code: code.to_string(),
            display_name: display_name.to_string(),
            project_id,
            status: AgentStatus::Active,
            trust_score: DEFAULT_TRUST_SCORE,
            capabilities: Vec::new(),
            settings: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the capability list.
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set a settings key.
    pub fn with_setting(mut self, key: &str, value: &str) -> Self {
        self.settings.insert(key.to_string(), value.to_string());
        self
    }

    /// Current capabilities/settings as a role snapshot.
    pub fn role_snapshot(&self) -> RoleSnapshot {
        RoleSnapshot {
            capabilities: self.capabilities.clone(),
            settings: self.settings.clone(),
        }
    }
}

// ============================================================================
// PROJECT
// ============================================================================

/// A project inside an organization. The engine only reads projects
/// (existence and active checks at session start).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: ProjectId,
    pub organization_id: crate::EntityId,
    pub name: String,
    pub slug: String,
    pub is_active: bool,
    pub created_at: Timestamp,
}

impl Project {
    /// Create a new active project.
    pub fn new(organization_id: crate::EntityId, name: &str, slug: &str) -> Self {
        Self {
            project_id: new_entity_id(),
            organization_id,
            name: name.to_string(),
            slug: slug.to_string(),
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// TASK
// ============================================================================

/// A unit of work inside exactly one project.
///
/// `assigned_at`, `started_at`, and `completed_at` are set only on the
/// corresponding transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub project_id: ProjectId,
    pub title: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assigned_agent_id: Option<AgentId>,
    pub deadline: Option<Timestamp>,
    pub created_at: Timestamp,
    pub assigned_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl Task {
    /// Create a new backlog task.
    pub fn new(project_id: ProjectId, title: &str, priority: TaskPriority) -> Self {
        Self {
            task_id: new_entity_id(),
            project_id,
            title: title.to_string(),
            status: TaskStatus::Backlog,
            priority,
            assigned_agent_id: None,
            deadline: None,
            created_at: Utc::now(),
            assigned_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Set a deadline.
    pub fn with_deadline(mut self, deadline: Timestamp) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Whether this task belongs in `agent_id`'s session-start pull.
    pub fn is_pullable_by(&self, agent_id: AgentId) -> bool {
        self.status.is_pullable() && self.assigned_agent_id == Some(agent_id)
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// Capabilities and settings of an agent at a point in time. Captured at
/// session stop; the baseline for the next session's role deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RoleSnapshot {
    pub capabilities: Vec<String>,
    pub settings: BTreeMap<String, String>,
}

impl RoleSnapshot {
    /// Differences between `previous` and `self` (the current snapshot).
    pub fn delta_from(&self, previous: &RoleSnapshot) -> RoleDelta {
        let added_capabilities = self
            .capabilities
            .iter()
            .filter(|c| !previous.capabilities.contains(c))
            .cloned()
            .collect();
        let removed_capabilities = previous
            .capabilities
            .iter()
            .filter(|c| !self.capabilities.contains(c))
            .cloned()
            .collect();
        let mut changed_settings: Vec<String> = self
            .settings
            .iter()
            .filter(|(k, v)| previous.settings.get(*k) != Some(v))
            .map(|(k, _)| k.clone())
            .collect();
        for key in previous.settings.keys() {
            if !self.settings.contains_key(key) {
                changed_settings.push(key.clone());
            }
        }
        changed_settings.sort();
        RoleDelta {
            added_capabilities,
            removed_capabilities,
            changed_settings,
        }
    }
}

/// Capability and settings changes since the previous session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RoleDelta {
    pub added_capabilities: Vec<String>,
    pub removed_capabilities: Vec<String>,
    /// Settings keys added, removed, or changed in value.
    pub changed_settings: Vec<String>,
}

impl RoleDelta {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added_capabilities.is_empty()
            && self.removed_capabilities.is_empty()
            && self.changed_settings.is_empty()
    }

    /// Total number of individual changes.
    pub fn len(&self) -> usize {
        self.added_capabilities.len()
            + self.removed_capabilities.len()
            + self.changed_settings.len()
    }
}

/// A work session belonging to exactly one agent and one project.
///
/// At most one non-stopped session exists per agent at any time; the store
/// enforces this with a conditional insert. Immutable once stopped except
/// for appended log events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub agent_id: AgentId,
    pub project_id: ProjectId,
    pub status: SessionStatus,
    pub started_at: Timestamp,
    pub stopped_at: Option<Timestamp>,
    /// Whole seconds between `started_at` and `stopped_at`; set exactly
    /// once, at stop.
    pub duration_seconds: Option<i64>,
    /// Caller-supplied at stop.
    pub tasks_worked_on: Vec<TaskId>,
    pub summary: Option<String>,
    /// Captured at stop; read by the next session's pull.
    pub role_snapshot: Option<RoleSnapshot>,
}

impl Session {
    /// Create a new started session.
    pub fn new(agent_id: AgentId, project_id: ProjectId) -> Self {
        Self {
            session_id: new_entity_id(),
            agent_id,
            project_id,
            status: SessionStatus::Started,
            started_at: Utc::now(),
            stopped_at: None,
            duration_seconds: None,
            tasks_worked_on: Vec::new(),
            summary: None,
            role_snapshot: None,
        }
    }

    /// Whether this session has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.status.is_terminal()
    }
}

// ============================================================================
// EVENT
// ============================================================================

/// Append-only audit record of a state change. Never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub event_type: EventType,
    /// Author agent, when the change was caused by one.
    pub agent_id: Option<AgentId>,
    pub session_id: Option<SessionId>,
    pub task_id: Option<TaskId>,
    /// Agents this event should be surfaced to during pull.
    pub mentions: Vec<AgentId>,
    pub payload: serde_json::Value,
    pub created_at: Timestamp,
}

impl Event {
    /// Create a new event with an empty payload.
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_id: new_entity_id(),
            event_type,
            agent_id: None,
            session_id: None,
            task_id: None,
            mentions: Vec::new(),
            payload: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Set the author agent.
    pub fn with_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    /// Set the session reference.
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Set the task reference.
    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Add a mentioned agent.
    pub fn with_mention(mut self, agent_id: AgentId) -> Self {
        self.mentions.push(agent_id);
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Backdate the event. Test and import tooling only; production events
    /// carry their creation time.
    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = created_at;
        self
    }

    // === Typed work-history constructors ===
    //
    // Surrounding services write these; the indicator calculator parses
    // the payloads back out. Using the constructors keeps the payload
    // shapes well-formed.

    /// A completed code review for `agent_id`'s work.
    pub fn review_completed(agent_id: AgentId, approved: bool, change_request_rounds: u32) -> Self {
        Self::new(EventType::ReviewCompleted)
            .with_agent(agent_id)
            .with_payload(serde_json::json!({
                "approved": approved,
                "change_request_rounds": change_request_rounds,
            }))
    }

    /// A lint/style failure attributed to `agent_id`.
    pub fn lint_failed(agent_id: AgentId) -> Self {
        Self::new(EventType::LintFailed).with_agent(agent_id)
    }

    /// A defect attributed to `agent_id`, optionally linked to the task it
    /// was introduced in.
    pub fn defect_reported(agent_id: AgentId, task_id: Option<TaskId>) -> Self {
        let event = Self::new(EventType::DefectReported).with_agent(agent_id);
        match task_id {
            Some(id) => event.with_task(id),
            None => event,
        }
    }

    /// A failed deployment attributed to `agent_id`.
    pub fn deploy_failed(agent_id: AgentId) -> Self {
        Self::new(EventType::DeployFailed).with_agent(agent_id)
    }

    /// A commit by `agent_id` with its churn counts.
    pub fn commit_recorded(agent_id: AgentId, lines_added: u64, lines_removed: u64) -> Self {
        Self::new(EventType::CommitRecorded)
            .with_agent(agent_id)
            .with_payload(serde_json::json!({
                "lines_added": lines_added,
                "lines_removed": lines_removed,
            }))
    }
}

// ============================================================================
// PERFORMANCE RECORD
// ============================================================================

/// The fixed set of numeric metrics in one indicator snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PerformanceMetrics {
    pub tasks_completed: u32,
    /// 0-100, clamped.
    pub code_quality_score: f64,
    /// First-pass-approved review count.
    pub positive_feedback_count: u32,
    /// 0-1. Defaults to 1.0 when no task is old enough to judge.
    pub feature_completion_rate: f64,
    pub bugs_introduced: u32,
    pub deployment_failures: u32,
    /// Added + removed lines over the trailing observation window.
    pub code_churn: u64,
    /// Mean completed-task duration in minutes; 0 when none qualify.
    pub average_task_duration_minutes: f64,
}

impl PerformanceMetrics {
    /// Weighted composite used for overall-trend comparison and the
    /// consistency bonus:
    /// `0.4*quality/100 + 0.3*fcr + 0.2*max(0, 1 - bugs/10) + 0.1*max(0, 1 - deploys/3)`.
    pub fn composite_score(&self) -> f64 {
        0.4 * self.code_quality_score / 100.0
            + 0.3 * self.feature_completion_rate
            + 0.2 * (1.0 - f64::from(self.bugs_introduced) / 10.0).max(0.0)
            + 0.1 * (1.0 - f64::from(self.deployment_failures) / 3.0).max(0.0)
    }

    /// Reject out-of-range values before any write.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(0.0..=100.0).contains(&self.code_quality_score) {
            return Err(ValidationError::InvalidValue {
                field: "code_quality_score".to_string(),
                reason: format!("must be within [0, 100], got {}", self.code_quality_score),
            });
        }
        if !(0.0..=1.0).contains(&self.feature_completion_rate) {
            return Err(ValidationError::InvalidValue {
                field: "feature_completion_rate".to_string(),
                reason: format!("must be within [0, 1], got {}", self.feature_completion_rate),
            });
        }
        if self.average_task_duration_minutes < 0.0 {
            return Err(ValidationError::InvalidValue {
                field: "average_task_duration_minutes".to_string(),
                reason: format!(
                    "must be non-negative, got {}",
                    self.average_task_duration_minutes
                ),
            });
        }
        Ok(())
    }
}

/// Per-metric and overall trend labels for one snapshot, relative to the
/// immediately preceding record for the same agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TrendLabels {
    pub quality: MetricTrend,
    pub tasks_completed: MetricTrend,
    pub completion_rate: MetricTrend,
    pub bugs: MetricTrend,
    pub overall: OverallTrend,
}

/// A timestamped snapshot of derived performance metrics for one agent.
/// Immutable once created; history is append-only, ordered by `recorded_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub record_id: RecordId,
    pub agent_id: AgentId,
    pub recorded_at: Timestamp,
    pub metrics: PerformanceMetrics,
    pub trends: TrendLabels,
    /// The weighted composite at recording time, persisted so later
    /// consistency computations never re-derive it.
    pub composite_score: f64,
}

impl PerformanceRecord {
    /// Create a snapshot with the given trend labels.
    pub fn new(agent_id: AgentId, metrics: PerformanceMetrics, trends: TrendLabels) -> Self {
        let composite_score = metrics.composite_score();
        Self {
            record_id: new_entity_id(),
            agent_id,
            recorded_at: Utc::now(),
            metrics,
            trends,
            composite_score,
        }
    }
}
