//! Error types for AgentFlow engine operations
//!
//! Taxonomy: NotFound is surfaced with no retry; Conflict carries a
//! distinguishing code so a caller can decide to force-close or retry;
//! PreconditionFailed is fatal to the requested operation; Validation is
//! rejected before any write. Nothing is recovered locally by swallowing.

use crate::{EntityType, SessionId};
use thiserror::Error;
use uuid::Uuid;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: Uuid },

    #[error("Insert failed for {entity_type:?}: {reason}")]
    InsertFailed {
        entity_type: EntityType,
        reason: String,
    },

    #[error("Update failed for {entity_type:?} with id {id}: {reason}")]
    UpdateFailed {
        entity_type: EntityType,
        id: Uuid,
        reason: String,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors. Raised before any write reaches the store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Malformed payload on event {event_id}: {reason}")]
    MalformedPayload { event_id: Uuid, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Stable codes distinguishing conflict causes so callers can branch
/// without parsing the reason string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictCode {
    /// Another non-stopped session exists for the agent.
    SessionActive,
    /// As `SessionActive`, but the blocking session is older than the
    /// configured stale age; force-closing it is a reasonable next step.
    SessionStale,
    /// A recalculation raced a concurrent write and read stale history.
    StaleRecalculation,
}

impl ConflictCode {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictCode::SessionActive => "SESSION_ACTIVE",
            ConflictCode::SessionStale => "SESSION_STALE",
            ConflictCode::StaleRecalculation => "STALE_RECALCULATION",
        }
    }
}

impl std::fmt::Display for ConflictCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Master error type for all engine operations.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: Uuid },

    #[error("Conflict [{code}]: {reason}")]
    Conflict {
        code: ConflictCode,
        /// The blocking session, when the conflict is session-shaped.
        blocking_session: Option<SessionId>,
        reason: String,
    },

    #[error("Precondition failed for {operation}: {reason}")]
    PreconditionFailed { operation: String, reason: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type alias for engine operations.
pub type FlowResult<T> = Result<T, EngineError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            entity_type: EntityType::Agent,
            id: Uuid::nil(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains("Agent"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_conflict_display_carries_code() {
        let err = EngineError::Conflict {
            code: ConflictCode::SessionActive,
            blocking_session: Some(Uuid::nil()),
            reason: "agent already has a running session".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("SESSION_ACTIVE"));
        assert!(msg.contains("running session"));
    }

    #[test]
    fn test_validation_error_display_invalid_value() {
        let err = ValidationError::InvalidValue {
            field: "feature_completion_rate".to_string(),
            reason: "must be within [0, 1], got 1.5".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("feature_completion_rate"));
        assert!(msg.contains("1.5"));
    }

    #[test]
    fn test_engine_error_from_variants() {
        let storage = EngineError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, EngineError::Storage(_)));

        let validation = EngineError::from(ValidationError::RequiredFieldMissing {
            field: "approved".to_string(),
        });
        assert!(matches!(validation, EngineError::Validation(_)));

        let config = EngineError::from(ConfigError::MissingRequired {
            field: "trust_window".to_string(),
        });
        assert!(matches!(config, EngineError::Config(_)));
    }
}
