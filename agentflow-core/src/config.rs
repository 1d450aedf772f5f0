//! Configuration types

use crate::{ConfigError, EngineError, FlowResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Policy for sessions that are started and never stopped.
///
/// The engine never closes a session on its own; the source material
/// specifies no timeout. This knob only changes how the conflict is
/// reported to the next caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbandonedSessionPolicy {
    /// An open session blocks new starts indefinitely and conflicts are
    /// reported as `SESSION_ACTIVE`.
    LeaveOpen,
    /// Conflicts caused by a session older than the given age are
    /// reported as `SESSION_STALE` instead, signaling the caller that
    /// force-closing the prior session is a reasonable next step.
    FlagStale {
        /// Age beyond which the blocking session counts as stale.
        older_than: Duration,
    },
}

/// Master configuration for the lifecycle engine.
/// ALL values are required - no defaults anywhere. `standard()` is the
/// documented baseline used by surrounding services and tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Trailing window for bug/deploy counts and code churn.
    pub observation_window: Duration,
    /// Minimum age before an assigned task counts against the feature
    /// completion rate.
    pub stale_task_age: Duration,
    /// Sessions at or under this duration do not trigger indicator
    /// recalculation unless tasks were worked on.
    pub kpi_min_session_duration: Duration,
    /// Number of recent performance records considered by the trust
    /// score engine.
    pub trust_window: usize,
    /// Standard-deviation divisor in the consistency bonus
    /// (`bonus = max(0, 5 - sigma/divisor)`).
    pub consistency_divisor: f64,
    /// Page cap for pull messages.
    pub pull_message_limit: usize,
    /// What to report when a new start collides with an open session.
    pub abandoned_session_policy: AbandonedSessionPolicy,
}

impl EngineConfig {
    /// The documented baseline: 30-day observation window, 7-day stale
    /// task age, 300-second KPI threshold, 10-record trust window.
    pub fn standard() -> Self {
        Self {
            observation_window: Duration::from_secs(30 * 24 * 3600),
            stale_task_age: Duration::from_secs(7 * 24 * 3600),
            kpi_min_session_duration: Duration::from_secs(300),
            trust_window: 10,
            consistency_divisor: 0.06,
            pull_message_limit: 100,
            abandoned_session_policy: AbandonedSessionPolicy::LeaveOpen,
        }
    }

    /// Validate all fields.
    pub fn validate(&self) -> FlowResult<()> {
        if self.observation_window.is_zero() {
            return Err(EngineError::Config(ConfigError::InvalidValue {
                field: "observation_window".to_string(),
                value: "0s".to_string(),
                reason: "observation window must be positive".to_string(),
            }));
        }
        if self.stale_task_age.is_zero() {
            return Err(EngineError::Config(ConfigError::InvalidValue {
                field: "stale_task_age".to_string(),
                value: "0s".to_string(),
                reason: "stale task age must be positive".to_string(),
            }));
        }
        if self.trust_window == 0 {
            return Err(EngineError::Config(ConfigError::InvalidValue {
                field: "trust_window".to_string(),
                value: self.trust_window.to_string(),
                reason: "trust window must hold at least one record".to_string(),
            }));
        }
        if self.consistency_divisor <= 0.0 {
            return Err(EngineError::Config(ConfigError::InvalidValue {
                field: "consistency_divisor".to_string(),
                value: self.consistency_divisor.to_string(),
                reason: "divisor must be positive".to_string(),
            }));
        }
        if self.pull_message_limit == 0 {
            return Err(EngineError::Config(ConfigError::InvalidValue {
                field: "pull_message_limit".to_string(),
                value: self.pull_message_limit.to_string(),
                reason: "pull page size must be positive".to_string(),
            }));
        }
        if let AbandonedSessionPolicy::FlagStale { older_than } = self.abandoned_session_policy {
            if older_than.is_zero() {
                return Err(EngineError::Config(ConfigError::InvalidValue {
                    field: "abandoned_session_policy.older_than".to_string(),
                    value: "0s".to_string(),
                    reason: "stale age must be positive".to_string(),
                }));
            }
        }
        Ok(())
    }
}
