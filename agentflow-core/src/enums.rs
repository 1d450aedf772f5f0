//! Enum types for AgentFlow entities
//!
//! Every status field is a closed enumeration with an explicit transition
//! table. Illegal transitions are rejected at the type level rather than
//! tracked through ad hoc boolean flags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ENTITY TYPE
// ============================================================================

/// Entity type discriminator for polymorphic references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Agent,
    Project,
    Task,
    Session,
    Event,
    PerformanceRecord,
}

// ============================================================================
// AGENT STATUS
// ============================================================================

/// Status of an agent in the system.
///
/// `Terminated` is absorbing: no transition leaves it. Agents are never
/// hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Agent is in good standing and may work
    #[default]
    Active,
    /// Agent is restricted after poor indicators; exits only via the
    /// multi-condition recovery gate
    Probation,
    /// Agent is deactivated but may be reactivated
    Inactive,
    /// Agent is permanently retired
    Terminated,
}

impl AgentStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Probation => "probation",
            AgentStatus::Inactive => "inactive",
            AgentStatus::Terminated => "terminated",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, AgentStatusParseError> {
        match s.to_lowercase().as_str() {
            "active" => Ok(AgentStatus::Active),
            "probation" => Ok(AgentStatus::Probation),
            "inactive" => Ok(AgentStatus::Inactive),
            "terminated" => Ok(AgentStatus::Terminated),
            _ => Err(AgentStatusParseError(s.to_string())),
        }
    }

    /// Whether the transition `self -> next` is legal.
    pub fn can_transition_to(&self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        match (self, next) {
            // Terminated is absorbing
            (Terminated, _) => false,
            // Self-transitions are not transitions
            (a, b) if *a == b => false,
            // Everything else may move between the live states or terminate
            (Active, Probation) | (Active, Inactive) | (Active, Terminated) => true,
            (Probation, Active) | (Probation, Inactive) | (Probation, Terminated) => true,
            (Inactive, Active) | (Inactive, Probation) | (Inactive, Terminated) => true,
            _ => false,
        }
    }

    /// Whether an agent in this status may start a work session.
    pub fn can_work(&self) -> bool {
        matches!(self, AgentStatus::Active | AgentStatus::Probation)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for AgentStatus {
    type Err = AgentStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid agent status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatusParseError(pub String);

impl fmt::Display for AgentStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid agent status: {}", self.0)
    }
}

impl std::error::Error for AgentStatusParseError {}

// ============================================================================
// TASK STATUS
// ============================================================================

/// Status of a task within a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not yet assigned
    #[default]
    Backlog,
    /// Assigned to an agent, not yet started
    Assigned,
    /// Actively being worked on
    InProgress,
    /// Waiting on an external dependency
    Blocked,
    /// Finished and approved
    Completed,
    /// Abandoned without completion
    Cancelled,
}

impl TaskStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, TaskStatusParseError> {
        match s.to_lowercase().as_str() {
            "backlog" => Ok(TaskStatus::Backlog),
            "assigned" => Ok(TaskStatus::Assigned),
            "in_progress" => Ok(TaskStatus::InProgress),
            "blocked" => Ok(TaskStatus::Blocked),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(TaskStatusParseError(s.to_string())),
        }
    }

    /// Whether the transition `self -> next` is legal.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Completed, _) | (Cancelled, _) => false,
            (a, b) if *a == b => false,
            (Backlog, Assigned) | (Backlog, Cancelled) => true,
            (Assigned, InProgress) | (Assigned, Blocked) | (Assigned, Backlog) => true,
            (Assigned, Cancelled) => true,
            (InProgress, Blocked) | (InProgress, Completed) | (InProgress, Cancelled) => true,
            (Blocked, InProgress) | (Blocked, Assigned) | (Blocked, Cancelled) => true,
            _ => false,
        }
    }

    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// Whether a task in this status belongs in an agent's session-start pull.
    pub fn is_pullable(&self) -> bool {
        matches!(
            self,
            TaskStatus::Assigned | TaskStatus::InProgress | TaskStatus::Blocked
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid task status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid task status: {}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ============================================================================
// TASK PRIORITY
// ============================================================================

/// Priority level for tasks. P0 is most urgent and sorts first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum TaskPriority {
    /// Drop everything
    P0,
    /// Urgent
    P1,
    /// Normal
    #[default]
    P2,
    /// Whenever
    P3,
}

impl TaskPriority {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TaskPriority::P0 => "P0",
            TaskPriority::P1 => "P1",
            TaskPriority::P2 => "P2",
            TaskPriority::P3 => "P3",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, TaskPriorityParseError> {
        match s.to_uppercase().as_str() {
            "P0" => Ok(TaskPriority::P0),
            "P1" => Ok(TaskPriority::P1),
            "P2" => Ok(TaskPriority::P2),
            "P3" => Ok(TaskPriority::P3),
            _ => Err(TaskPriorityParseError(s.to_string())),
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for TaskPriority {
    type Err = TaskPriorityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid task priority string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPriorityParseError(pub String);

impl fmt::Display for TaskPriorityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid task priority: {}", self.0)
    }
}

impl std::error::Error for TaskPriorityParseError {}

// ============================================================================
// SESSION STATUS
// ============================================================================

/// Status of a work session.
///
/// `Started -> Logging` happens automatically on the first log event;
/// `-> Stopped` only via explicit stop. Nothing re-enters `Started` or
/// leaves `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, no log events yet
    Started,
    /// At least one log event appended
    Logging,
    /// Explicitly stopped; terminal
    Stopped,
}

impl SessionStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SessionStatus::Started => "started",
            SessionStatus::Logging => "logging",
            SessionStatus::Stopped => "stopped",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, SessionStatusParseError> {
        match s.to_lowercase().as_str() {
            "started" => Ok(SessionStatus::Started),
            "logging" => Ok(SessionStatus::Logging),
            "stopped" => Ok(SessionStatus::Stopped),
            _ => Err(SessionStatusParseError(s.to_string())),
        }
    }

    /// Whether the transition `self -> next` is legal.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Started, Logging) | (Started, Stopped) | (Logging, Stopped)
        )
    }

    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Stopped)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for SessionStatus {
    type Err = SessionStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid session status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatusParseError(pub String);

impl fmt::Display for SessionStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid session status: {}", self.0)
    }
}

impl std::error::Error for SessionStatusParseError {}

// ============================================================================
// EVENT TYPE
// ============================================================================

/// Type of an audit event.
///
/// The first block are lifecycle events emitted by the engine itself; the
/// second block are work-history records written by surrounding services
/// (code review, CI, deploy tooling) and consumed by the indicator
/// calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Lifecycle events
    SessionStart,
    SessionLog,
    SessionStop,
    TaskAssigned,
    TaskCompleted,
    KpiUpdated,
    TrustScoreChanged,
    AgentStatusChanged,
    // Work-history records
    ReviewCompleted,
    LintFailed,
    DefectReported,
    DeployFailed,
    CommitRecorded,
}

impl EventType {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            EventType::SessionStart => "session_start",
            EventType::SessionLog => "session_log",
            EventType::SessionStop => "session_stop",
            EventType::TaskAssigned => "task_assigned",
            EventType::TaskCompleted => "task_completed",
            EventType::KpiUpdated => "kpi_updated",
            EventType::TrustScoreChanged => "trust_score_changed",
            EventType::AgentStatusChanged => "agent_status_changed",
            EventType::ReviewCompleted => "review_completed",
            EventType::LintFailed => "lint_failed",
            EventType::DefectReported => "defect_reported",
            EventType::DeployFailed => "deploy_failed",
            EventType::CommitRecorded => "commit_recorded",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EventTypeParseError> {
        match s.to_lowercase().as_str() {
            "session_start" => Ok(EventType::SessionStart),
            "session_log" => Ok(EventType::SessionLog),
            "session_stop" => Ok(EventType::SessionStop),
            "task_assigned" => Ok(EventType::TaskAssigned),
            "task_completed" => Ok(EventType::TaskCompleted),
            "kpi_updated" => Ok(EventType::KpiUpdated),
            "trust_score_changed" => Ok(EventType::TrustScoreChanged),
            "agent_status_changed" => Ok(EventType::AgentStatusChanged),
            "review_completed" => Ok(EventType::ReviewCompleted),
            "lint_failed" => Ok(EventType::LintFailed),
            "defect_reported" => Ok(EventType::DefectReported),
            "deploy_failed" => Ok(EventType::DeployFailed),
            "commit_recorded" => Ok(EventType::CommitRecorded),
            _ => Err(EventTypeParseError(s.to_string())),
        }
    }

    /// Session-internal event types are excluded from pull messages.
    pub fn is_session_internal(&self) -> bool {
        matches!(
            self,
            EventType::SessionStart | EventType::SessionLog | EventType::SessionStop
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for EventType {
    type Err = EventTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid event type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTypeParseError(pub String);

impl fmt::Display for EventTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid event type: {}", self.0)
    }
}

impl std::error::Error for EventTypeParseError {}

// ============================================================================
// TREND LABELS
// ============================================================================

/// Tolerance for float comparisons when labeling trends. Exact f64
/// equality would make `Stable` unreachable for derived metrics.
pub const TREND_EPSILON: f64 = 1e-9;

/// Direction of a single metric between two consecutive snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetricTrend {
    Up,
    Down,
    #[default]
    Stable,
}

impl MetricTrend {
    /// Label the movement from `previous` to `current`.
    pub fn of(current: f64, previous: f64) -> Self {
        if current > previous + TREND_EPSILON {
            MetricTrend::Up
        } else if current < previous - TREND_EPSILON {
            MetricTrend::Down
        } else {
            MetricTrend::Stable
        }
    }

    /// Label the movement between two counts.
    pub fn of_counts(current: u32, previous: u32) -> Self {
        use std::cmp::Ordering::*;
        match current.cmp(&previous) {
            Greater => MetricTrend::Up,
            Less => MetricTrend::Down,
            Equal => MetricTrend::Stable,
        }
    }
}

impl fmt::Display for MetricTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricTrend::Up => "up",
            MetricTrend::Down => "down",
            MetricTrend::Stable => "stable",
        };
        write!(f, "{s}")
    }
}

/// Direction of the weighted composite between two consecutive snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverallTrend {
    Improving,
    Declining,
    #[default]
    Stable,
}

impl OverallTrend {
    /// Label the movement from `previous` to `current` composite score.
    pub fn of(current: f64, previous: f64) -> Self {
        if current > previous + TREND_EPSILON {
            OverallTrend::Improving
        } else if current < previous - TREND_EPSILON {
            OverallTrend::Declining
        } else {
            OverallTrend::Stable
        }
    }
}

impl fmt::Display for OverallTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverallTrend::Improving => "improving",
            OverallTrend::Declining => "declining",
            OverallTrend::Stable => "stable",
        };
        write!(f, "{s}")
    }
}
