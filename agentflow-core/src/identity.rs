//! Identity types for AgentFlow entities

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
/// UUIDv7 embeds a Unix timestamp, making IDs naturally sortable by creation time.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identifier for an agent.
pub type AgentId = EntityId;

/// Identifier for a project.
pub type ProjectId = EntityId;

/// Identifier for a task.
pub type TaskId = EntityId;

/// Identifier for a work session.
pub type SessionId = EntityId;

/// Identifier for an audit event.
pub type EventId = EntityId;

/// Identifier for a performance record.
pub type RecordId = EntityId;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}
