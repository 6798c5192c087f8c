//! Workflow instance types.
//!
//! An `Instance` is one execution of a registered workflow definition. Its
//! lifecycle is driven exclusively by the Workflow Runner that owns it; the
//! terminal states (`Complete`, `Failed`, `Terminated`) are absorbing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// InstanceStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow instance.
///
/// State machine:
/// `Queued -> Running <-> Sleeping <-> ErroredRetrying -> {Complete | Failed}`,
/// plus `Running -> Terminated` on explicit external cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Created but never run.
    Queued,
    /// A Runner invocation is currently driving the program.
    Running,
    /// Suspended on a `step.sleep` marker, waiting for a timer.
    Sleeping,
    /// Suspended on a retry delay after a step failure.
    ErroredRetrying,
    /// The program returned successfully; `output` is set.
    Complete,
    /// A step exhausted its retry budget; `error` is set.
    Failed,
    /// Externally cancelled; no future Runner re-entry.
    Terminated,
}

impl InstanceStatus {
    /// Whether this status is absorbing (no further transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Complete | InstanceStatus::Failed | InstanceStatus::Terminated
        )
    }
}

// ---------------------------------------------------------------------------
// Instance
// ---------------------------------------------------------------------------

/// One execution of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// UUIDv7 assigned at creation, never reused.
    pub id: Uuid,
    /// Which registered program this instance runs.
    pub definition_id: String,
    /// Caller-supplied input, immutable for the instance's lifetime.
    pub params: Value,
    /// Current lifecycle status.
    pub status: InstanceStatus,
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
    /// Touched on every status transition.
    pub updated_at: DateTime<Utc>,
    /// Program return value. Present only when `Complete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Terminal error message. Present only when `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Instance {
    /// Create a fresh `Queued` instance for the given definition and params.
    pub fn new(definition_id: impl Into<String>, params: Value, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            definition_id: definition_id.into(),
            params,
            status: InstanceStatus::Queued,
            created_at: now,
            updated_at: now,
            output: None,
            error: None,
        }
    }

    /// Snapshot of the externally visible status.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.status,
            output: self.output.clone(),
            error: self.error.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// The answer to a `status(id)` query: latest durably-recorded state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// WorkflowEvent
// ---------------------------------------------------------------------------

/// The author-facing view of an instance's creation: its input params and
/// creation time. Handed to the workflow program on every replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// The instance's `params`.
    pub payload: Value,
    /// The instance's creation time.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
