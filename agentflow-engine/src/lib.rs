//! AgentFlow Engine - Agent Lifecycle & Performance
//!
//! The engine behind agent trust and work sessions:
//! - Indicator calculation: derives a performance snapshot from an agent's
//!   task, session, and review history.
//! - Trust scoring: folds indicator history into a bounded [0,100] score
//!   with trend and consistency adjustments, and owns the
//!   probation/recovery decision.
//! - Status control: the single write path for `Agent.status` and
//!   `Agent.trust_score`, with lifecycle events for every change.
//! - Session lifecycle: the started -> logging -> stopped state machine
//!   and the session-start pull that assembles an agent's backlog,
//!   pending messages, and role deltas.
//!
//! Every operation runs synchronously to completion against the storage
//! abstraction and writes append-only records before touching mutable
//! agent fields, so each one is safe to retry on transient failure.

use agentflow_core::{
    AbandonedSessionPolicy, Agent, AgentId, AgentStatus, ConflictCode, EngineConfig, EngineError,
    EntityType, Event, EventType, FlowResult, MetricTrend, OverallTrend, PerformanceMetrics,
    PerformanceRecord, ProjectId, RoleDelta, Session, SessionId, SessionStatus, Task, TaskId,
    TaskStatus, Timestamp, TrendLabels, ValidationError, DEFAULT_TRUST_SCORE, TRUST_SCORE_MAX,
    TRUST_SCORE_MIN,
};
use agentflow_storage::{AgentUpdate, SessionUpdate, StorageTrait};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// THRESHOLDS
// ============================================================================

/// Trust score below which an agent is placed on probation.
const PROBATION_SCORE_FLOOR: f64 = 30.0;
/// Quality score below which an agent is placed on probation.
const PROBATION_QUALITY_FLOOR: f64 = 20.0;
/// Leading rejected-review streak that triggers probation.
const PROBATION_REJECTED_STREAK: u32 = 3;
/// Defect count across the recent-task window that triggers probation.
const PROBATION_BUG_SPIKE: u32 = 5;
/// How many of the most recently completed tasks the bug-spike check spans.
const PROBATION_BUG_TASK_WINDOW: usize = 10;

/// Recovery gate: all four must hold simultaneously.
const RECOVERY_SCORE_FLOOR: f64 = 50.0;
const RECOVERY_QUALITY_FLOOR: f64 = 60.0;
const RECOVERY_TASKS_COMPLETED_FLOOR: u32 = 5;
const RECOVERY_IMPROVING_STREAK: usize = 3;

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Everything assembled for an agent at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulledUpdates {
    /// Open tasks assigned to the agent in the target project, ordered by
    /// priority ascending (P0 first) then deadline ascending, nulls last.
    pub tasks: Vec<Task>,
    /// Events mentioning the agent since its last stopped session,
    /// oldest first, capped at the configured page size.
    pub messages: Vec<Event>,
    /// Capability/settings changes since the previous session.
    pub role_deltas: RoleDelta,
}

/// Result of `start_session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStarted {
    pub session: Session,
    pub pulled: PulledUpdates,
    /// Present when the agent is on probation: work is allowed but the
    /// caller should surface the warning.
    pub probation_warning: Option<String>,
}

/// Result of `stop_session`. The indicator and trust fields are present
/// only when the session met the scoring threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStopped {
    pub session: Session,
    pub indicator_update: Option<PerformanceRecord>,
    pub trust_update: Option<TrustOutcome>,
}

/// Why the trust score came out the way it did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrustReason {
    /// No performance history exists; the default score stands.
    NoHistory,
    /// Recalculated from stored history.
    Recalculated {
        base: f64,
        trend_modifier: f64,
        consistency_bonus: f64,
        records_considered: usize,
    },
}

impl fmt::Display for TrustReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustReason::NoHistory => write!(f, "no performance history"),
            TrustReason::Recalculated {
                base,
                trend_modifier,
                consistency_bonus,
                records_considered,
            } => write!(
                f,
                "recalculated from {records_considered} records (base {base:.2}, trend {trend_modifier:+.1}, consistency {consistency_bonus:.2})"
            ),
        }
    }
}

/// The specific condition that forced an agent onto probation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProbationReason {
    TrustScoreBelowFloor { score: f64 },
    QualityBelowFloor { quality: f64 },
    ConsecutiveRejectedReviews { count: u32 },
    RecentBugSpike { bugs: u32 },
}

impl fmt::Display for ProbationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbationReason::TrustScoreBelowFloor { score } => {
                write!(f, "trust score {score:.2} below floor {PROBATION_SCORE_FLOOR}")
            }
            ProbationReason::QualityBelowFloor { quality } => {
                write!(f, "quality score {quality:.2} below floor {PROBATION_QUALITY_FLOOR}")
            }
            ProbationReason::ConsecutiveRejectedReviews { count } => {
                write!(f, "{count} consecutive reviews rejected")
            }
            ProbationReason::RecentBugSpike { bugs } => write!(
                f,
                "{bugs} bugs across the {PROBATION_BUG_TASK_WINDOW} most recent completed tasks"
            ),
        }
    }
}

/// What drove a status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransitionTrigger {
    Probation(ProbationReason),
    Recovery,
    Administrative,
}

impl fmt::Display for TransitionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionTrigger::Probation(reason) => write!(f, "probation: {reason}"),
            TransitionTrigger::Recovery => write!(f, "probation recovery gate passed"),
            TransitionTrigger::Administrative => write!(f, "administrative"),
        }
    }
}

/// An applied agent status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: AgentStatus,
    pub to: AgentStatus,
    pub trigger: TransitionTrigger,
}

/// Result of a trust recalculation, after the status controller applied it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustOutcome {
    pub agent_id: AgentId,
    pub previous_score: f64,
    pub score: f64,
    pub reason: TrustReason,
    pub transition: Option<StatusTransition>,
}

/// Trust computation before the controller applies it. The decision is a
/// recommendation; the controller validates it against the transition
/// table and performs the write.
#[derive(Debug, Clone, PartialEq)]
pub struct TrustComputation {
    pub previous_score: f64,
    pub score: f64,
    pub reason: TrustReason,
    pub decision: Option<StatusDecision>,
}

/// Probation decision owned by the trust score engine.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusDecision {
    EnterProbation(ProbationReason),
    ExitProbation,
}

// ============================================================================
// PAYLOAD PARSING
// ============================================================================

/// Parsed `review_completed` payload.
struct ReviewOutcome {
    approved: bool,
    change_request_rounds: u32,
}

fn parse_review(event: &Event) -> FlowResult<ReviewOutcome> {
    let approved = event
        .payload
        .get("approved")
        .and_then(serde_json::Value::as_bool)
        .ok_or(ValidationError::MalformedPayload {
            event_id: event.event_id,
            reason: "missing boolean field: approved".to_string(),
        })?;
    let change_request_rounds = event
        .payload
        .get("change_request_rounds")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0) as u32;
    Ok(ReviewOutcome {
        approved,
        change_request_rounds,
    })
}

fn parse_churn(event: &Event) -> FlowResult<u64> {
    let added = event
        .payload
        .get("lines_added")
        .and_then(serde_json::Value::as_u64)
        .ok_or(ValidationError::MalformedPayload {
            event_id: event.event_id,
            reason: "missing numeric field: lines_added".to_string(),
        })?;
    let removed = event
        .payload
        .get("lines_removed")
        .and_then(serde_json::Value::as_u64)
        .ok_or(ValidationError::MalformedPayload {
            event_id: event.event_id,
            reason: "missing numeric field: lines_removed".to_string(),
        })?;
    Ok(added + removed)
}

// ============================================================================
// INDICATOR CALCULATOR
// ============================================================================

/// Derives a performance snapshot for one agent from its work history.
/// Reads tasks, sessions, and linked review outcomes; never mutates them.
/// The only side effect is appending the new record (and its audit event).
pub struct IndicatorCalculator {
    storage: Arc<dyn StorageTrait>,
    config: EngineConfig,
}

impl IndicatorCalculator {
    /// Create a calculator over the given store.
    pub fn new(storage: Arc<dyn StorageTrait>, config: EngineConfig) -> Self {
        Self { storage, config }
    }

    /// Compute, persist, and return a new performance record.
    pub fn compute_indicators(&self, agent_id: AgentId) -> FlowResult<PerformanceRecord> {
        let agent = require_agent(self.storage.as_ref(), agent_id)?;
        let now = Utc::now();
        let window_start = window_floor(now, self.config.observation_window);

        let completed = self.storage.task_list_completed(agent_id)?;
        let tasks_completed = completed.len() as u32;
        let average_task_duration_minutes = mean_duration_minutes(&completed);

        let (code_quality_score, positive_feedback_count) = self.quality_from_reviews(agent_id)?;
        let feature_completion_rate = self.completion_rate(agent_id, now)?;

        let bugs_introduced = self
            .storage
            .event_list_by_type(agent_id, EventType::DefectReported, Some(window_start))?
            .len() as u32;
        let deployment_failures = self
            .storage
            .event_list_by_type(agent_id, EventType::DeployFailed, Some(window_start))?
            .len() as u32;
        let code_churn = self
            .storage
            .event_list_by_type(agent_id, EventType::CommitRecorded, Some(window_start))?
            .iter()
            .map(parse_churn)
            .sum::<FlowResult<u64>>()?;

        let metrics = PerformanceMetrics {
            tasks_completed,
            code_quality_score,
            positive_feedback_count,
            feature_completion_rate,
            bugs_introduced,
            deployment_failures,
            code_churn,
            average_task_duration_minutes,
        };
        metrics.validate()?;

        let previous = self.storage.record_latest(agent_id)?;
        let trends = match &previous {
            None => TrendLabels::default(),
            Some(prev) => TrendLabels {
                quality: MetricTrend::of(
                    metrics.code_quality_score,
                    prev.metrics.code_quality_score,
                ),
                tasks_completed: MetricTrend::of_counts(
                    metrics.tasks_completed,
                    prev.metrics.tasks_completed,
                ),
                completion_rate: MetricTrend::of(
                    metrics.feature_completion_rate,
                    prev.metrics.feature_completion_rate,
                ),
                bugs: MetricTrend::of_counts(
                    metrics.bugs_introduced,
                    prev.metrics.bugs_introduced,
                ),
                overall: OverallTrend::of(metrics.composite_score(), prev.composite_score),
            },
        };

        let record = PerformanceRecord::new(agent_id, metrics, trends);
        self.storage.record_append(&record)?;
        self.storage.event_append(
            &Event::new(EventType::KpiUpdated)
                .with_agent(agent_id)
                .with_mention(agent_id)
                .with_payload(serde_json::json!({
                    "record_id": record.record_id,
                    "tasks_completed": record.metrics.tasks_completed,
                    "code_quality_score": record.metrics.code_quality_score,
                    "overall_trend": record.trends.overall,
                })),
        )?;
        debug!(
            agent = %agent.code,
            quality = record.metrics.code_quality_score,
            completed = record.metrics.tasks_completed,
            trend = %record.trends.overall,
            "indicators recalculated"
        );
        Ok(record)
    }

    /// Quality score and first-pass approval count from review history.
    /// Base 50; +10 per first-pass approval; -5 per change-request round;
    /// -10 per lint failure; clamped to [0, 100].
    fn quality_from_reviews(&self, agent_id: AgentId) -> FlowResult<(f64, u32)> {
        let reviews = self
            .storage
            .event_list_by_type(agent_id, EventType::ReviewCompleted, None)?;
        let mut quality = 50.0;
        let mut first_pass = 0u32;
        for review in &reviews {
            let outcome = parse_review(review)?;
            if outcome.approved && outcome.change_request_rounds == 0 {
                quality += 10.0;
                first_pass += 1;
            }
            quality -= 5.0 * f64::from(outcome.change_request_rounds);
        }
        let lint_failures = self
            .storage
            .event_list_by_type(agent_id, EventType::LintFailed, None)?
            .len();
        quality -= 10.0 * lint_failures as f64;
        Ok((quality.clamp(0.0, 100.0), first_pass))
    }

    /// Completed / assigned among tasks old enough to judge. Defaults to
    /// 1.0 when no task is old enough, so new agents are not penalized.
    fn completion_rate(&self, agent_id: AgentId, now: Timestamp) -> FlowResult<f64> {
        let cutoff = window_floor(now, self.config.stale_task_age);
        let assigned = self.storage.task_list_by_assignee(agent_id)?;
        let old_enough: Vec<_> = assigned
            .iter()
            .filter(|t| t.assigned_at.is_some_and(|at| at <= cutoff))
            .collect();
        if old_enough.is_empty() {
            return Ok(1.0);
        }
        let completed = old_enough
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        Ok(completed as f64 / old_enough.len() as f64)
    }
}

/// Mean completed-task duration in minutes; 0.0 when no completed task
/// has both timestamps.
fn mean_duration_minutes(completed: &[Task]) -> f64 {
    let durations: Vec<f64> = completed
        .iter()
        .filter_map(|t| match (t.started_at, t.completed_at) {
            (Some(started), Some(finished)) => {
                Some((finished - started).num_seconds() as f64 / 60.0)
            }
            _ => None,
        })
        .collect();
    if durations.is_empty() {
        return 0.0;
    }
    durations.iter().sum::<f64>() / durations.len() as f64
}

// ============================================================================
// TRUST SCORE ENGINE
// ============================================================================

/// Folds indicator history into a bounded trust score and decides
/// probation entry/exit. The score is a pure function of stored history:
/// recalculating twice over identical records yields identical output.
pub struct TrustScoreEngine {
    storage: Arc<dyn StorageTrait>,
    config: EngineConfig,
}

impl TrustScoreEngine {
    /// Create a trust engine over the given store.
    pub fn new(storage: Arc<dyn StorageTrait>, config: EngineConfig) -> Self {
        Self { storage, config }
    }

    /// Recompute the agent's trust score from its record history and
    /// decide whether a status transition is warranted. Performs no
    /// writes; the status controller applies the result.
    pub fn recalculate(&self, agent: &Agent) -> FlowResult<TrustComputation> {
        let records = self
            .storage
            .record_list_recent(agent.agent_id, self.config.trust_window)?;
        if records.is_empty() {
            return Ok(TrustComputation {
                previous_score: agent.trust_score,
                score: DEFAULT_TRUST_SCORE,
                reason: TrustReason::NoHistory,
                decision: None,
            });
        }

        let newest = &records[0];
        let base = base_score(&newest.metrics);
        let trend_modifier = if records.len() >= 2 {
            trend_modifier(&newest.trends)
        } else {
            0.0
        };
        let consistency_bonus = if records.len() >= 3 {
            consistency_bonus(&records, self.config.consistency_divisor)
        } else {
            0.0
        };
        let score = round2(
            (base + trend_modifier + consistency_bonus).clamp(TRUST_SCORE_MIN, TRUST_SCORE_MAX),
        );

        let decision = self.evaluate_status(agent, score, &records)?;
        Ok(TrustComputation {
            previous_score: agent.trust_score,
            score,
            reason: TrustReason::Recalculated {
                base,
                trend_modifier,
                consistency_bonus,
                records_considered: records.len(),
            },
            decision,
        })
    }

    /// One-way decision per recalculation: an agent on probation is only
    /// checked against the recovery gate, everyone else only against the
    /// probation triggers. No oscillation inside a single call.
    fn evaluate_status(
        &self,
        agent: &Agent,
        score: f64,
        records: &[PerformanceRecord],
    ) -> FlowResult<Option<StatusDecision>> {
        let newest = &records[0];
        match agent.status {
            AgentStatus::Terminated => Ok(None),
            AgentStatus::Probation => {
                let improving_streak = records.len() >= RECOVERY_IMPROVING_STREAK
                    && records[..RECOVERY_IMPROVING_STREAK]
                        .iter()
                        .all(|r| r.trends.overall == OverallTrend::Improving);
                let recovered = score >= RECOVERY_SCORE_FLOOR
                    && newest.metrics.code_quality_score >= RECOVERY_QUALITY_FLOOR
                    && newest.metrics.tasks_completed >= RECOVERY_TASKS_COMPLETED_FLOOR
                    && improving_streak;
                Ok(recovered.then_some(StatusDecision::ExitProbation))
            }
            AgentStatus::Active | AgentStatus::Inactive => {
                if score < PROBATION_SCORE_FLOOR {
                    return Ok(Some(StatusDecision::EnterProbation(
                        ProbationReason::TrustScoreBelowFloor { score },
                    )));
                }
                if newest.metrics.code_quality_score < PROBATION_QUALITY_FLOOR {
                    return Ok(Some(StatusDecision::EnterProbation(
                        ProbationReason::QualityBelowFloor {
                            quality: newest.metrics.code_quality_score,
                        },
                    )));
                }
                let rejected = self.rejected_review_streak(agent.agent_id)?;
                if rejected >= PROBATION_REJECTED_STREAK {
                    return Ok(Some(StatusDecision::EnterProbation(
                        ProbationReason::ConsecutiveRejectedReviews { count: rejected },
                    )));
                }
                let bugs = self.recent_task_bug_count(agent.agent_id)?;
                if bugs >= PROBATION_BUG_SPIKE {
                    return Ok(Some(StatusDecision::EnterProbation(
                        ProbationReason::RecentBugSpike { bugs },
                    )));
                }
                Ok(None)
            }
        }
    }

    /// Length of the leading run of rejected reviews, newest first.
    fn rejected_review_streak(&self, agent_id: AgentId) -> FlowResult<u32> {
        let reviews = self
            .storage
            .event_list_by_type(agent_id, EventType::ReviewCompleted, None)?;
        let mut streak = 0u32;
        for review in &reviews {
            if parse_review(review)?.approved {
                break;
            }
            streak += 1;
        }
        Ok(streak)
    }

    /// Defects linked to the agent's most recently completed tasks.
    fn recent_task_bug_count(&self, agent_id: AgentId) -> FlowResult<u32> {
        let mut completed = self.storage.task_list_completed(agent_id)?;
        completed.sort_by_key(|t| Reverse(t.completed_at));
        let recent: HashSet<TaskId> = completed
            .iter()
            .take(PROBATION_BUG_TASK_WINDOW)
            .map(|t| t.task_id)
            .collect();
        let defects = self
            .storage
            .event_list_by_type(agent_id, EventType::DefectReported, None)?;
        Ok(defects
            .iter()
            .filter(|d| d.task_id.is_some_and(|id| recent.contains(&id)))
            .count() as u32)
    }
}

/// Base score from the newest snapshot:
/// `40*quality/100 + 30*fcr + max(0, 20 - 4*bugs) + max(0, 10 - 3.33*deploys)`,
/// clamped to [0, 100]. A perfect snapshot reaches exactly 100.
fn base_score(metrics: &PerformanceMetrics) -> f64 {
    let quality_term = 40.0 * metrics.code_quality_score / 100.0;
    let completion_term = 30.0 * metrics.feature_completion_rate;
    let bug_term = (20.0 - 4.0 * f64::from(metrics.bugs_introduced)).max(0.0);
    let deploy_term = (10.0 - 3.33 * f64::from(metrics.deployment_failures)).max(0.0);
    (quality_term + completion_term + bug_term + deploy_term)
        .clamp(TRUST_SCORE_MIN, TRUST_SCORE_MAX)
}

/// Summed trend modifier from the newest record's labels, roughly -8..+8.
fn trend_modifier(trends: &TrendLabels) -> f64 {
    let overall = match trends.overall {
        OverallTrend::Improving => 5.0,
        OverallTrend::Declining => -5.0,
        OverallTrend::Stable => 0.0,
    };
    let quality = match trends.quality {
        MetricTrend::Up => 2.0,
        MetricTrend::Down => -2.0,
        MetricTrend::Stable => 0.0,
    };
    let throughput = match trends.tasks_completed {
        MetricTrend::Up => 1.0,
        MetricTrend::Down => -1.0,
        MetricTrend::Stable => 0.0,
    };
    overall + quality + throughput
}

/// Consistency bonus: `max(0, 5 - sigma/divisor)` over the stored
/// composite scores. Steadier performance earns a higher bonus.
fn consistency_bonus(records: &[PerformanceRecord], divisor: f64) -> f64 {
    let composites: Vec<f64> = records.iter().map(|r| r.composite_score).collect();
    let mean = composites.iter().sum::<f64>() / composites.len() as f64;
    let variance = composites
        .iter()
        .map(|c| (c - mean).powi(2))
        .sum::<f64>()
        / composites.len() as f64;
    let sigma = variance.sqrt();
    (5.0 - sigma / divisor).max(0.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// AGENT STATUS CONTROLLER
// ============================================================================

/// The only write path for `Agent.status` and `Agent.trust_score`.
/// Validates every transition against the status transition table and
/// emits the corresponding lifecycle events.
pub struct StatusController {
    storage: Arc<dyn StorageTrait>,
}

impl StatusController {
    /// Create a controller over the given store.
    pub fn new(storage: Arc<dyn StorageTrait>) -> Self {
        Self { storage }
    }

    /// Apply a trust computation: persist the score, perform any decided
    /// transition, and emit `trust_score_changed` (plus
    /// `agent_status_changed` when the status moved).
    pub fn apply(&self, agent: &Agent, computation: TrustComputation) -> FlowResult<TrustOutcome> {
        if computation.reason == TrustReason::NoHistory {
            // Nothing recorded, nothing to write; the default stands.
            return Ok(TrustOutcome {
                agent_id: agent.agent_id,
                previous_score: computation.previous_score,
                score: computation.score,
                reason: computation.reason,
                transition: None,
            });
        }

        let transition = match &computation.decision {
            None => None,
            Some(StatusDecision::EnterProbation(reason)) => Some(self.transition_for(
                agent,
                AgentStatus::Probation,
                TransitionTrigger::Probation(reason.clone()),
            )?),
            Some(StatusDecision::ExitProbation) => Some(self.transition_for(
                agent,
                AgentStatus::Active,
                TransitionTrigger::Recovery,
            )?),
        };

        self.storage.agent_update(
            agent.agent_id,
            AgentUpdate {
                status: transition.as_ref().map(|t| t.to),
                trust_score: Some(computation.score),
                ..Default::default()
            },
        )?;

        let new_status = transition.as_ref().map_or(agent.status, |t| t.to);
        self.storage.event_append(
            &Event::new(EventType::TrustScoreChanged)
                .with_agent(agent.agent_id)
                .with_mention(agent.agent_id)
                .with_payload(serde_json::json!({
                    "previous_score": computation.previous_score,
                    "new_score": computation.score,
                    "previous_status": agent.status,
                    "new_status": new_status,
                    "reason": transition
                        .as_ref()
                        .map_or_else(|| computation.reason.to_string(), |t| t.trigger.to_string()),
                })),
        )?;

        if let Some(t) = &transition {
            self.storage.event_append(
                &Event::new(EventType::AgentStatusChanged)
                    .with_agent(agent.agent_id)
                    .with_mention(agent.agent_id)
                    .with_payload(serde_json::json!({
                        "from": t.from,
                        "to": t.to,
                        "trigger": t.trigger.to_string(),
                    })),
            )?;
            warn!(
                agent = %agent.code,
                from = %t.from,
                to = %t.to,
                trigger = %t.trigger,
                "agent status transition"
            );
        }

        Ok(TrustOutcome {
            agent_id: agent.agent_id,
            previous_score: computation.previous_score,
            score: computation.score,
            reason: computation.reason,
            transition,
        })
    }

    /// Administrative transition (deactivate, reactivate, terminate).
    pub fn set_status(&self, agent_id: AgentId, next: AgentStatus) -> FlowResult<StatusTransition> {
        let agent = require_agent(self.storage.as_ref(), agent_id)?;
        let transition = self.transition_for(&agent, next, TransitionTrigger::Administrative)?;
        self.storage.agent_update(
            agent_id,
            AgentUpdate {
                status: Some(next),
                ..Default::default()
            },
        )?;
        self.storage.event_append(
            &Event::new(EventType::AgentStatusChanged)
                .with_agent(agent_id)
                .with_mention(agent_id)
                .with_payload(serde_json::json!({
                    "from": transition.from,
                    "to": transition.to,
                    "trigger": transition.trigger.to_string(),
                })),
        )?;
        info!(agent = %agent.code, from = %transition.from, to = %transition.to, "administrative status change");
        Ok(transition)
    }

    fn transition_for(
        &self,
        agent: &Agent,
        to: AgentStatus,
        trigger: TransitionTrigger,
    ) -> FlowResult<StatusTransition> {
        if !agent.status.can_transition_to(to) {
            return Err(EngineError::PreconditionFailed {
                operation: "agent status transition".to_string(),
                reason: format!(
                    "agent {} cannot move from {} to {}",
                    agent.code, agent.status, to
                ),
            });
        }
        Ok(StatusTransition {
            from: agent.status,
            to,
            trigger,
        })
    }
}

// ============================================================================
// LIFECYCLE ENGINE
// ============================================================================

/// Facade wiring the components over one store. This is the callable
/// surface exposed to surrounding workflow code.
pub struct LifecycleEngine {
    storage: Arc<dyn StorageTrait>,
    config: EngineConfig,
    indicators: IndicatorCalculator,
    trust: TrustScoreEngine,
    controller: StatusController,
}

impl LifecycleEngine {
    /// Create an engine over the given store, validating the config.
    pub fn new(storage: Arc<dyn StorageTrait>, config: EngineConfig) -> FlowResult<Self> {
        config.validate()?;
        Ok(Self {
            indicators: IndicatorCalculator::new(Arc::clone(&storage), config.clone()),
            trust: TrustScoreEngine::new(Arc::clone(&storage), config.clone()),
            controller: StatusController::new(Arc::clone(&storage)),
            storage,
            config,
        })
    }

    /// Start a work session for an agent in a project and execute the
    /// pull. Rejects inactive/terminated agents and never auto-closes a
    /// conflicting session; the caller must stop the prior session
    /// explicitly and retry.
    pub fn start_session(
        &self,
        agent_id: AgentId,
        project_id: ProjectId,
    ) -> FlowResult<SessionStarted> {
        let agent = require_agent(self.storage.as_ref(), agent_id)?;
        if !agent.status.can_work() {
            return Err(EngineError::PreconditionFailed {
                operation: "start_session".to_string(),
                reason: format!("agent {} is {}", agent.code, agent.status),
            });
        }
        let project = self
            .storage
            .project_get(project_id)?
            .ok_or(EngineError::NotFound {
                entity_type: EntityType::Project,
                id: project_id,
            })?;
        if !project.is_active {
            return Err(EngineError::PreconditionFailed {
                operation: "start_session".to_string(),
                reason: format!("project {} is not active", project.slug),
            });
        }

        let probation_warning = (agent.status == AgentStatus::Probation).then(|| {
            warn!(agent = %agent.code, "session start while on probation");
            format!(
                "agent {} is on probation; work is allowed but performance is monitored",
                agent.code
            )
        });

        let session = Session::new(agent_id, project_id);
        if let Err(err) = self.storage.session_insert_active(&session) {
            return Err(self.classify_session_conflict(err));
        }

        let pulled = self.pull_updates(&agent, project_id)?;
        self.storage.event_append(
            &Event::new(EventType::SessionStart)
                .with_agent(agent_id)
                .with_session(session.session_id)
                .with_payload(serde_json::json!({
                    "tasks": pulled.tasks.len(),
                    "messages": pulled.messages.len(),
                    "role_changes": pulled.role_deltas.len(),
                })),
        )?;
        info!(
            agent = %agent.code,
            session = %session.session_id,
            tasks = pulled.tasks.len(),
            messages = pulled.messages.len(),
            "session started"
        );
        Ok(SessionStarted {
            session,
            pulled,
            probation_warning,
        })
    }

    /// Append a log event to a session. Advances `started -> logging` on
    /// the first log. Logs are append-only: later logs may reference
    /// earlier ones but nothing is ever edited or removed.
    pub fn log_session(
        &self,
        session_id: SessionId,
        caller: AgentId,
        message: &str,
        context: Option<serde_json::Value>,
    ) -> FlowResult<Event> {
        let session = require_session(self.storage.as_ref(), session_id)?;
        check_session_owner(&session, caller, "log_session")?;
        if session.is_stopped() {
            return Err(EngineError::PreconditionFailed {
                operation: "log_session".to_string(),
                reason: format!("session {session_id} is already stopped"),
            });
        }

        let mut payload = serde_json::json!({ "message": message });
        if let Some(context) = context {
            payload["context"] = context;
        }
        let event = Event::new(EventType::SessionLog)
            .with_agent(caller)
            .with_session(session_id)
            .with_payload(payload);
        self.storage.event_append(&event)?;

        if session.status == SessionStatus::Started {
            self.storage.session_update(
                session_id,
                SessionUpdate {
                    status: Some(SessionStatus::Logging),
                    ..Default::default()
                },
            )?;
        }
        Ok(event)
    }

    /// Stop a session: set the stop timestamp, derive the duration,
    /// record the tasks worked on, and capture the role snapshot for the
    /// next pull. Runs the performance pipeline iff the session exceeded
    /// the scoring threshold or reported worked-on tasks, so short idle
    /// sessions do not churn the scoring history.
    pub fn stop_session(
        &self,
        session_id: SessionId,
        caller: AgentId,
        tasks_worked_on: Vec<TaskId>,
        summary: Option<String>,
    ) -> FlowResult<SessionStopped> {
        let session = require_session(self.storage.as_ref(), session_id)?;
        check_session_owner(&session, caller, "stop_session")?;
        if session.is_stopped() {
            return Err(EngineError::PreconditionFailed {
                operation: "stop_session".to_string(),
                reason: format!("session {session_id} is already stopped"),
            });
        }
        // Reject unresolvable task references before any write.
        for task_id in &tasks_worked_on {
            self.storage
                .task_get(*task_id)?
                .ok_or(EngineError::NotFound {
                    entity_type: EntityType::Task,
                    id: *task_id,
                })?;
        }
        let agent = require_agent(self.storage.as_ref(), session.agent_id)?;

        let stopped_at = Utc::now();
        let duration_seconds = (stopped_at - session.started_at).num_seconds();
        self.storage.session_update(
            session_id,
            SessionUpdate {
                status: Some(SessionStatus::Stopped),
                stopped_at: Some(stopped_at),
                duration_seconds: Some(duration_seconds),
                tasks_worked_on: Some(tasks_worked_on.clone()),
                summary,
                role_snapshot: Some(agent.role_snapshot()),
            },
        )?;
        self.storage.event_append(
            &Event::new(EventType::SessionStop)
                .with_agent(caller)
                .with_session(session_id)
                .with_payload(serde_json::json!({
                    "duration_seconds": duration_seconds,
                    "tasks_worked_on": tasks_worked_on.len(),
                })),
        )?;
        let session = require_session(self.storage.as_ref(), session_id)?;
        info!(
            agent = %agent.code,
            session = %session_id,
            duration_seconds,
            "session stopped"
        );

        let threshold = self.config.kpi_min_session_duration.as_secs() as i64;
        if duration_seconds <= threshold && tasks_worked_on.is_empty() {
            return Ok(SessionStopped {
                session,
                indicator_update: None,
                trust_update: None,
            });
        }

        let record = self.indicators.compute_indicators(agent.agent_id)?;
        let trust = self.recalculate_trust(agent.agent_id)?;
        Ok(SessionStopped {
            session,
            indicator_update: Some(record),
            trust_update: Some(trust),
        })
    }

    /// Recompute the agent's trust score from stored history and apply
    /// the outcome. Safe to invoke manually or to retry after a partial
    /// failure between record-append and trust-update.
    pub fn recalculate_trust(&self, agent_id: AgentId) -> FlowResult<TrustOutcome> {
        let agent = require_agent(self.storage.as_ref(), agent_id)?;
        let computation = self.trust.recalculate(&agent)?;
        debug!(
            agent = %agent.code,
            previous = computation.previous_score,
            score = computation.score,
            "trust recalculated"
        );
        self.controller.apply(&agent, computation)
    }

    /// Compute and persist a fresh performance record for an agent.
    pub fn compute_indicators(&self, agent_id: AgentId) -> FlowResult<PerformanceRecord> {
        self.indicators.compute_indicators(agent_id)
    }

    /// Administrative status transition, validated against the
    /// transition table.
    pub fn set_agent_status(
        &self,
        agent_id: AgentId,
        next: AgentStatus,
    ) -> FlowResult<StatusTransition> {
        self.controller.set_status(agent_id, next)
    }

    /// Assemble the pull: open assigned tasks, pending messages since the
    /// last stopped session, and role deltas against its snapshot.
    fn pull_updates(&self, agent: &Agent, project_id: ProjectId) -> FlowResult<PulledUpdates> {
        let mut tasks = self
            .storage
            .task_list_pullable(project_id, agent.agent_id)?;
        tasks.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| compare_deadlines(a.deadline, b.deadline))
                .then_with(|| a.task_id.cmp(&b.task_id))
        });

        let last_stopped = self.storage.session_last_stopped(agent.agent_id)?;
        let boundary = last_stopped
            .as_ref()
            .and_then(|s| s.stopped_at)
            .unwrap_or(agent.created_at);
        let mut messages: Vec<Event> = self
            .storage
            .event_list_mentioning(agent.agent_id, boundary)?
            .into_iter()
            .filter(|e| !e.event_type.is_session_internal())
            .collect();
        messages.truncate(self.config.pull_message_limit);

        let role_deltas = match last_stopped.and_then(|s| s.role_snapshot) {
            Some(previous) => agent.role_snapshot().delta_from(&previous),
            None => RoleDelta::default(),
        };

        Ok(PulledUpdates {
            tasks,
            messages,
            role_deltas,
        })
    }

    /// Rewrite a session conflict to `SESSION_STALE` when the configured
    /// policy flags old blocking sessions. Reporting only; the engine
    /// never force-closes a session on its own.
    fn classify_session_conflict(&self, err: EngineError) -> EngineError {
        let EngineError::Conflict {
            code: ConflictCode::SessionActive,
            blocking_session: Some(blocking),
            reason,
        } = &err
        else {
            return err;
        };
        let AbandonedSessionPolicy::FlagStale { older_than } = self.config.abandoned_session_policy
        else {
            return err;
        };
        let Ok(Some(open)) = self.storage.session_get(*blocking) else {
            return err;
        };
        let stale_age =
            chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::MAX);
        if Utc::now() - open.started_at >= stale_age {
            return EngineError::Conflict {
                code: ConflictCode::SessionStale,
                blocking_session: Some(*blocking),
                reason: format!("{reason} (stale; open since {})", open.started_at),
            };
        }
        err
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn require_agent(storage: &dyn StorageTrait, agent_id: AgentId) -> FlowResult<Agent> {
    storage.agent_get(agent_id)?.ok_or(EngineError::NotFound {
        entity_type: EntityType::Agent,
        id: agent_id,
    })
}

fn require_session(storage: &dyn StorageTrait, session_id: SessionId) -> FlowResult<Session> {
    storage
        .session_get(session_id)?
        .ok_or(EngineError::NotFound {
            entity_type: EntityType::Session,
            id: session_id,
        })
}

fn check_session_owner(session: &Session, caller: AgentId, operation: &str) -> FlowResult<()> {
    if session.agent_id != caller {
        return Err(EngineError::PreconditionFailed {
            operation: operation.to_string(),
            reason: format!(
                "session {} belongs to agent {}, not {}",
                session.session_id, session.agent_id, caller
            ),
        });
    }
    Ok(())
}

/// `now` minus a trailing window, saturating at the epoch floor for
/// pathological window sizes.
fn window_floor(now: Timestamp, window: std::time::Duration) -> Timestamp {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC)
}

/// Deadline ordering for the pull: ascending, tasks without a deadline
/// last.
fn compare_deadlines(a: Option<Timestamp>, b: Option<Timestamp>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// ============================================================================
// TESTS
// ============================================================================
