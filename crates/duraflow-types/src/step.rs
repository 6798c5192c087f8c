//! Step records, retry policies, and timers.
//!
//! A `StepRecord` is the durable memo of one named step's outcome within one
//! instance. Once `Succeeded`, its `result` is immutable and is returned
//! verbatim on every replay -- the step body is never re-executed after
//! success.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// StepState / StepKind
// ---------------------------------------------------------------------------

/// Durable state of a step within an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Attempted at least once (or sleeping), not yet resolved.
    Pending,
    /// Resolved successfully; `result` is frozen.
    Succeeded,
    /// Retry budget exhausted; `last_error` holds the final error.
    Failed,
}

/// What kind of step a record memoizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// A `step.do`-style body invocation.
    Compute,
    /// A `step.sleep` marker.
    Sleep,
}

// ---------------------------------------------------------------------------
// StepRecord
// ---------------------------------------------------------------------------

/// Durable memo of one step's outcome within one instance.
///
/// Keyed by `(instance_id, step_name)`; step names must be unique within an
/// instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Owning instance.
    pub instance_id: Uuid,
    /// Author-chosen step name, unique within the instance.
    pub step_name: String,
    /// Compute step or sleep marker.
    pub kind: StepKind,
    /// Current durable state.
    pub state: StepState,
    /// Attempts made so far (1-based once the first attempt resolves).
    pub attempt: u32,
    /// Memoized result. Present only when `Succeeded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Most recent error message. Present on `Pending` retries and `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// For `Pending` sleep markers: when the sleep elapses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_at: Option<DateTime<Utc>>,
    /// When the first attempt started.
    pub started_at: DateTime<Utc>,
    /// When the record reached a resolved state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// How delays grow between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Constant `initial_delay` between attempts.
    None,
    /// `initial_delay * attempt`.
    Linear,
    /// `initial_delay * 2^(attempt - 1)`.
    Exponential,
}

/// Per-step retry configuration, attached at call time.
///
/// `limit = 0` means no retries: the step fails on its first error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub limit: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Delay growth strategy.
    pub backoff: Backoff,
    /// Optional cap on the computed delay.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 3,
            initial_delay: Duration::from_secs(1),
            backoff: Backoff::Exponential,
            max_delay: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retries() -> Self {
        Self {
            limit: 0,
            ..Self::default()
        }
    }

    /// Total attempts this policy allows (initial attempt + retries).
    pub fn max_attempts(&self) -> u32 {
        self.limit.saturating_add(1)
    }
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

/// A scheduled future wake-up for an instance, consumed exactly once when due.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timer {
    /// Opaque token identifying this timer; used for cancellation and dedup.
    pub token: Uuid,
    /// The instance to wake.
    pub instance_id: Uuid,
    /// Earliest moment the wake may be delivered (never before).
    pub fire_at: DateTime<Utc>,
}

impl Timer {
    /// Create a timer waking `instance_id` at `fire_at`.
    pub fn new(instance_id: Uuid, fire_at: DateTime<Utc>) -> Self {
        Self {
            token: Uuid::now_v7(),
            instance_id,
            fire_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
