//! The step executor.
//!
//! [`StepHandle`] is the API a workflow program sees: `run` a closure as a
//! durably memoized step, or `sleep` without holding a task alive. Both are
//! built on the same replay discipline: consult the log first, and when the
//! program cannot make progress right now, unwind it with a
//! [`StepInterrupt`] instead of blocking. The runner catches the interrupt,
//! parks the instance, and a timer wake replays the program from the top --
//! finished steps short-circuit to their recorded results, so replay is
//! cheap and side effects never repeat after success.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use duraflow_types::error::StoreError;
use duraflow_types::step::{RetryPolicy, StepKind, StepRecord, StepState};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::{Clock, TimerService};
use crate::repository::LogStore;
use crate::workflow::retry;

/// Steps that never set an explicit timeout are cut off after five minutes.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// ---------------------------------------------------------------------------
// StepInterrupt
// ---------------------------------------------------------------------------

/// Why a suspended instance will resume later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendKind {
    /// Waiting out a durable sleep.
    Sleep,
    /// Waiting out a retry backoff delay.
    Retry,
}

/// Control-flow signal that unwinds a workflow program mid-replay.
///
/// Programs propagate this with `?` and never construct or catch it
/// themselves. `Suspended` is not an error at all: it means "park the
/// instance, a timer will bring it back".
#[derive(Debug, Error)]
pub enum StepInterrupt {
    /// A step exhausted its retries or hit a non-retryable problem. The
    /// instance is about to be marked `Failed`.
    #[error("step '{step}' failed permanently: {error}")]
    Failed { step: String, error: String },

    /// The program cannot make progress until a scheduled wake.
    #[error("instance suspended ({0:?})")]
    Suspended(SuspendKind),

    /// The log store itself failed; the instance keeps its current status
    /// and the attempt is retried on the next wake or restart.
    #[error("log store unavailable: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// StepOptions
// ---------------------------------------------------------------------------

/// Per-step overrides for retry policy and timeout.
#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    /// Retry policy; `None` means [`RetryPolicy::default`].
    pub retries: Option<RetryPolicy>,
    /// Wall-clock cap on a single attempt; `None` means
    /// [`DEFAULT_STEP_TIMEOUT`].
    pub timeout: Option<Duration>,
}

impl StepOptions {
    pub fn with_retries(mut self, policy: RetryPolicy) -> Self {
        self.retries = Some(policy);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ---------------------------------------------------------------------------
// StepHandle
// ---------------------------------------------------------------------------

/// Capability handed to a workflow program for running durable steps.
///
/// Cheap to clone; clones share the per-replay duplicate-name set.
pub struct StepHandle<S, C> {
    instance_id: Uuid,
    store: Arc<S>,
    clock: Arc<C>,
    timers: Arc<TimerService<S, C>>,
    /// Step names seen during this replay. Names must be unique per
    /// instance; reusing one would alias two steps onto one log record.
    seen: Arc<Mutex<HashSet<String>>>,
}

impl<S, C> Clone for StepHandle<S, C> {
    fn clone(&self) -> Self {
        Self {
            instance_id: self.instance_id,
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            timers: Arc::clone(&self.timers),
            seen: Arc::clone(&self.seen),
        }
    }
}

impl<S, C> StepHandle<S, C>
where
    S: LogStore + 'static,
    C: Clock,
{
    pub fn new(
        instance_id: Uuid,
        store: Arc<S>,
        clock: Arc<C>,
        timers: Arc<TimerService<S, C>>,
    ) -> Self {
        Self {
            instance_id,
            store,
            clock,
            timers,
            seen: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Run `body` as a durable step with default options.
    pub async fn run<T, F, Fut>(&self, name: &str, body: F) -> Result<T, StepInterrupt>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, anyhow::Error>>,
    {
        self.run_with(name, StepOptions::default(), body).await
    }

    /// Run `body` as a durable step.
    ///
    /// If the log already holds a succeeded record for `name`, the body is
    /// not invoked and the recorded result is returned. Otherwise one
    /// attempt is made under the configured timeout; failure either
    /// schedules a backoff wake and suspends, or, once attempts are
    /// exhausted, records a permanent failure.
    pub async fn run_with<T, F, Fut>(
        &self,
        name: &str,
        options: StepOptions,
        body: F,
    ) -> Result<T, StepInterrupt>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, anyhow::Error>>,
    {
        self.claim_name(name)?;

        let now = self.clock.now();
        let (prior_attempts, started_at) = match self.store.get_step_record(self.instance_id, name).await? {
            Some(record) => match record.state {
                StepState::Succeeded => return decode_result(name, record.result),
                StepState::Failed => {
                    return Err(StepInterrupt::Failed {
                        step: name.to_string(),
                        error: record
                            .last_error
                            .unwrap_or_else(|| "unknown failure".to_string()),
                    });
                }
                StepState::Pending => {
                    // Woken early (or by an unrelated timer) while a backoff
                    // delay is still running. The original timer is still
                    // scheduled, so just park again.
                    if let Some(wake_at) = record.wake_at
                        && wake_at > now
                    {
                        return Err(StepInterrupt::Suspended(SuspendKind::Retry));
                    }
                    (record.attempt, record.started_at)
                }
            },
            None => (0, now),
        };

        let policy = options.retries.clone().unwrap_or_default();
        let timeout = options.timeout.unwrap_or(DEFAULT_STEP_TIMEOUT);
        let attempt = prior_attempts.saturating_add(1);

        debug!(
            instance_id = %self.instance_id,
            step = name,
            attempt,
            "running step"
        );

        let outcome = match tokio::time::timeout(timeout, body()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
        };

        match outcome {
            Ok(value) => {
                let result = serde_json::to_value(&value).map_err(|e| StepInterrupt::Failed {
                    step: name.to_string(),
                    error: format!("result not serializable: {e}"),
                })?;
                let record = StepRecord {
                    instance_id: self.instance_id,
                    step_name: name.to_string(),
                    kind: StepKind::Compute,
                    state: StepState::Succeeded,
                    attempt,
                    result: Some(result),
                    last_error: None,
                    wake_at: None,
                    started_at,
                    completed_at: Some(self.clock.now()),
                };
                match self.store.put_step_record(&record).await {
                    Ok(()) => Ok(value),
                    // Another writer recorded success first; its result wins.
                    Err(StoreError::Conflict(_)) => {
                        let stored = self.store.get_step_record(self.instance_id, name).await?;
                        decode_result(name, stored.and_then(|r| r.result))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(error) => self.record_failure(name, attempt, started_at, &policy, error).await,
        }
    }

    /// Handle a failed attempt: either schedule a retry wake or record the
    /// permanent failure.
    async fn record_failure<T>(
        &self,
        name: &str,
        attempt: u32,
        started_at: DateTime<Utc>,
        policy: &RetryPolicy,
        error: String,
    ) -> Result<T, StepInterrupt> {
        let mut record = StepRecord {
            instance_id: self.instance_id,
            step_name: name.to_string(),
            kind: StepKind::Compute,
            state: StepState::Pending,
            attempt,
            result: None,
            last_error: Some(error.clone()),
            wake_at: None,
            started_at,
            completed_at: None,
        };

        if attempt >= policy.max_attempts() {
            record.state = StepState::Failed;
            record.completed_at = Some(self.clock.now());
            self.store.put_step_record(&record).await?;
            warn!(
                instance_id = %self.instance_id,
                step = name,
                attempt,
                error = %error,
                "step failed permanently"
            );
            return Err(StepInterrupt::Failed {
                step: name.to_string(),
                error,
            });
        }

        let delay = retry::next_delay(policy, attempt);
        let fire_at = far_future_checked(self.clock.now(), delay);
        record.wake_at = Some(fire_at);
        self.store.put_step_record(&record).await?;
        self.timers.schedule_wake(self.instance_id, fire_at).await?;
        debug!(
            instance_id = %self.instance_id,
            step = name,
            attempt,
            wake_at = %fire_at,
            error = %error,
            "step failed, retry scheduled"
        );
        Err(StepInterrupt::Suspended(SuspendKind::Retry))
    }

    /// Durable sleep with a human-readable duration such as `"20 seconds"`.
    pub async fn sleep(&self, name: &str, duration: &str) -> Result<(), StepInterrupt> {
        let parsed =
            duraflow_types::duration::parse_duration(duration).map_err(|e| StepInterrupt::Failed {
                step: name.to_string(),
                error: format!("invalid sleep duration {duration:?}: {e}"),
            })?;
        self.sleep_for(name, parsed).await
    }

    /// Durable sleep. Suspends the program until `duration` has elapsed
    /// since the sleep was first recorded; on replay after the deadline it
    /// returns immediately.
    pub async fn sleep_for(&self, name: &str, duration: Duration) -> Result<(), StepInterrupt> {
        self.claim_name(name)?;
        let now = self.clock.now();

        match self.store.get_step_record(self.instance_id, name).await? {
            Some(record) if record.state == StepState::Succeeded => Ok(()),
            Some(record) => {
                let wake_at = record.wake_at.unwrap_or(now);
                if wake_at > now {
                    return Err(StepInterrupt::Suspended(SuspendKind::Sleep));
                }
                // Deadline has passed: memoize the sleep so later replays
                // skip it entirely.
                let done = StepRecord {
                    state: StepState::Succeeded,
                    result: Some(Value::Null),
                    completed_at: Some(now),
                    ..record
                };
                match self.store.put_step_record(&done).await {
                    Ok(()) | Err(StoreError::Conflict(_)) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            None => {
                let fire_at = far_future_checked(now, duration);
                let record = StepRecord {
                    instance_id: self.instance_id,
                    step_name: name.to_string(),
                    kind: StepKind::Sleep,
                    state: StepState::Pending,
                    attempt: 0,
                    result: None,
                    last_error: None,
                    wake_at: Some(fire_at),
                    started_at: now,
                    completed_at: None,
                };
                self.store.put_step_record(&record).await?;
                self.timers.schedule_wake(self.instance_id, fire_at).await?;
                debug!(
                    instance_id = %self.instance_id,
                    step = name,
                    wake_at = %fire_at,
                    "sleeping"
                );
                Err(StepInterrupt::Suspended(SuspendKind::Sleep))
            }
        }
    }

    /// Reject a step name already used during this replay.
    fn claim_name(&self, name: &str) -> Result<(), StepInterrupt> {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        if !seen.insert(name.to_string()) {
            return Err(StepInterrupt::Failed {
                step: name.to_string(),
                error: "duplicate step name within one instance".to_string(),
            });
        }
        Ok(())
    }
}

/// `now + delay`, clamped instead of panicking on absurd delays.
fn far_future_checked(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn decode_result<T: DeserializeOwned>(
    name: &str,
    result: Option<Value>,
) -> Result<T, StepInterrupt> {
    let value = result.unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| StepInterrupt::Failed {
        step: name.to_string(),
        error: format!("recorded result does not match expected type: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
