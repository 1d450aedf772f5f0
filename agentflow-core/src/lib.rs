//! AgentFlow Core - Entity Types
//!
//! Pure data structures with no behavior. All other crates depend on this.
//! This crate contains ONLY data types - no business logic.
//!
//! The lifecycle engine (`agentflow-engine`) recomputes trust scores from
//! the append-only `PerformanceRecord` history defined here; the storage
//! abstraction (`agentflow-storage`) persists these types.

mod config;
mod entities;
mod enums;
mod error;
mod identity;

pub use config::{AbandonedSessionPolicy, EngineConfig};
pub use entities::{
    Agent, Event, PerformanceMetrics, PerformanceRecord, Project, RoleDelta, RoleSnapshot,
    Session, Task, TrendLabels, DEFAULT_TRUST_SCORE, TRUST_SCORE_MAX, TRUST_SCORE_MIN,
};
pub use enums::{
    AgentStatus, AgentStatusParseError, EntityType, EventType, EventTypeParseError, MetricTrend,
    OverallTrend, SessionStatus, SessionStatusParseError, TaskPriority, TaskPriorityParseError,
    TaskStatus, TaskStatusParseError, TREND_EPSILON,
};
pub use error::{
    ConfigError, ConflictCode, EngineError, FlowResult, StorageError, ValidationError,
};
pub use identity::{
    new_entity_id, AgentId, EntityId, EventId, ProjectId, RecordId, SessionId, TaskId, Timestamp,
};

// ============================================================================
// TESTS
// ============================================================================
