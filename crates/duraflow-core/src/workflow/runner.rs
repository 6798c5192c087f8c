//! Replays workflow programs and maps their outcome onto the instance
//! lifecycle.
//!
//! The runner owns every status transition except instance creation and
//! termination: it flips the instance to `Running`, replays the program from
//! the top, and parks or finishes the instance based on how the program's
//! future resolved. It holds no state of its own, so a crashed runner loses
//! nothing -- the next wake replays the same log.

use std::sync::Arc;

use duraflow_types::error::StoreError;
use duraflow_types::instance::{InstanceStatus, WorkflowEvent};
use futures_util::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, TimerService};
use crate::repository::LogStore;
use crate::workflow::step::{StepHandle, StepInterrupt, SuspendKind};

// ---------------------------------------------------------------------------
// WorkflowProgram
// ---------------------------------------------------------------------------

/// User-authored workflow code.
///
/// A program must be deterministic given its event plus the step results the
/// handle replays to it: all side effects, randomness, and clock reads
/// belong inside `step.run` bodies. The returned value becomes the
/// instance's recorded output.
///
/// Returns a boxed future so programs can live in a heterogeneous registry;
/// any `Fn` with the matching shape implements this trait.
pub trait WorkflowProgram<S, C>: Send + Sync
where
    S: LogStore + 'static,
    C: Clock,
{
    fn run(
        &self,
        event: WorkflowEvent,
        step: StepHandle<S, C>,
    ) -> BoxFuture<'static, Result<Value, StepInterrupt>>;
}

impl<S, C, F> WorkflowProgram<S, C> for F
where
    S: LogStore + 'static,
    C: Clock,
    F: Fn(WorkflowEvent, StepHandle<S, C>) -> BoxFuture<'static, Result<Value, StepInterrupt>>
        + Send
        + Sync,
{
    fn run(
        &self,
        event: WorkflowEvent,
        step: StepHandle<S, C>,
    ) -> BoxFuture<'static, Result<Value, StepInterrupt>> {
        self(event, step)
    }
}

// ---------------------------------------------------------------------------
// WorkflowRunner
// ---------------------------------------------------------------------------

/// How a single replay of an instance ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The program returned; the instance is `Complete`.
    Completed(Value),
    /// A step failed permanently; the instance is `Failed`.
    Failed(String),
    /// The program parked on a sleep or retry delay; a timer will wake it.
    Suspended(SuspendKind),
    /// The instance was already in a terminal status; nothing ran.
    AlreadyTerminal(InstanceStatus),
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("instance {0} not found")]
    NotFound(Uuid),
    #[error("log store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Drives one replay of one instance at a time.
pub struct WorkflowRunner<S, C> {
    store: Arc<S>,
    clock: Arc<C>,
    timers: Arc<TimerService<S, C>>,
}

impl<S, C> WorkflowRunner<S, C>
where
    S: LogStore + 'static,
    C: Clock,
{
    pub fn new(store: Arc<S>, clock: Arc<C>, timers: Arc<TimerService<S, C>>) -> Self {
        Self {
            store,
            clock,
            timers,
        }
    }

    /// Replay `program` against the instance's log, from the top.
    ///
    /// The caller must hold the instance's execution lease; the runner
    /// itself only guards against terminal statuses.
    pub async fn run_instance(
        &self,
        instance_id: Uuid,
        program: &dyn WorkflowProgram<S, C>,
    ) -> Result<RunOutcome, RunnerError> {
        let instance = self
            .store
            .get_instance(instance_id)
            .await?
            .ok_or(RunnerError::NotFound(instance_id))?;

        if instance.status.is_terminal() {
            debug!(instance_id = %instance_id, status = ?instance.status, "wake for terminal instance ignored");
            return Ok(RunOutcome::AlreadyTerminal(instance.status));
        }

        match self
            .store
            .update_instance(instance_id, InstanceStatus::Running, None, None)
            .await
        {
            Ok(()) => {}
            // Terminated between the read above and this write.
            Err(StoreError::Conflict(_)) => {
                return self.reread_terminal(instance_id).await;
            }
            Err(e) => return Err(e.into()),
        }

        let event = WorkflowEvent {
            payload: instance.params.clone(),
            timestamp: instance.created_at,
        };
        let handle = StepHandle::new(
            instance_id,
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            Arc::clone(&self.timers),
        );

        match program.run(event, handle).await {
            Ok(output) => {
                match self
                    .store
                    .update_instance(instance_id, InstanceStatus::Complete, Some(&output), None)
                    .await
                {
                    Ok(()) => {
                        info!(instance_id = %instance_id, "instance complete");
                        Ok(RunOutcome::Completed(output))
                    }
                    Err(StoreError::Conflict(_)) => self.reread_terminal(instance_id).await,
                    Err(e) => Err(e.into()),
                }
            }
            Err(StepInterrupt::Suspended(kind)) => {
                let status = match kind {
                    SuspendKind::Sleep => InstanceStatus::Sleeping,
                    SuspendKind::Retry => InstanceStatus::ErroredRetrying,
                };
                match self
                    .store
                    .update_instance(instance_id, status, None, None)
                    .await
                {
                    Ok(()) => {
                        debug!(instance_id = %instance_id, status = ?status, "instance suspended");
                        Ok(RunOutcome::Suspended(kind))
                    }
                    Err(StoreError::Conflict(_)) => self.reread_terminal(instance_id).await,
                    Err(e) => Err(e.into()),
                }
            }
            Err(StepInterrupt::Failed { step, error }) => {
                let message = format!("step '{step}' failed: {error}");
                match self
                    .store
                    .update_instance(instance_id, InstanceStatus::Failed, None, Some(&message))
                    .await
                {
                    Ok(()) => {
                        warn!(instance_id = %instance_id, error = %message, "instance failed");
                        Ok(RunOutcome::Failed(message))
                    }
                    Err(StoreError::Conflict(_)) => self.reread_terminal(instance_id).await,
                    Err(e) => Err(e.into()),
                }
            }
            // Storage trouble mid-replay: leave the status alone, the next
            // wake or restart retries the same attempt.
            Err(StepInterrupt::Store(e)) => {
                warn!(instance_id = %instance_id, error = %e, "replay aborted by store error");
                Err(e.into())
            }
        }
    }

    /// A status write lost a race with `terminate`; report the new terminal
    /// status instead of an error.
    async fn reread_terminal(&self, instance_id: Uuid) -> Result<RunOutcome, RunnerError> {
        let instance = self
            .store
            .get_instance(instance_id)
            .await?
            .ok_or(RunnerError::NotFound(instance_id))?;
        debug!(instance_id = %instance_id, status = ?instance.status, "replay outcome discarded, instance already terminal");
        Ok(RunOutcome::AlreadyTerminal(instance.status))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
