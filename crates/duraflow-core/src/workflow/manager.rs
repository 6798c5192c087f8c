//! Instance manager: the engine's public surface.
//!
//! Owns the program registry, creates instances, answers status queries,
//! terminates instances, and drives replays on wake. The manager also
//! enforces the single-writer rule: an in-process lease per instance ID
//! guarantees at most one replay of an instance runs at a time, and the
//! store's absorbing terminal statuses back that up across processes.

use std::sync::Arc;

use dashmap::DashMap;
use duraflow_types::error::StoreError;
use duraflow_types::instance::{Instance, InstanceStatus, StatusSnapshot};
use duraflow_types::step::{StepRecord, StepState};
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::clock::{Clock, TimerService, WakeCallback};
use crate::repository::LogStore;
use crate::workflow::runner::{RunOutcome, RunnerError, WorkflowProgram, WorkflowRunner};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("instance {0} not found")]
    NotFound(Uuid),
    #[error("no workflow registered under '{0}'")]
    UnknownDefinition(String),
    #[error("log store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl From<RunnerError> for ManagerError {
    fn from(e: RunnerError) -> Self {
        match e {
            RunnerError::NotFound(id) => ManagerError::NotFound(id),
            RunnerError::Store(e) => ManagerError::Store(e),
        }
    }
}

/// Coordinates workflow programs, instances, and timers.
///
/// One manager per process; cheap to share behind an `Arc`. The generic
/// parameters pick the storage backend and clock, so production code runs on
/// SQLite plus the system clock while tests swap in the in-memory store and
/// a manual clock without touching engine code.
pub struct InstanceManager<S, C> {
    store: Arc<S>,
    clock: Arc<C>,
    timers: Arc<TimerService<S, C>>,
    runner: WorkflowRunner<S, C>,
    registry: DashMap<String, Arc<dyn WorkflowProgram<S, C>>>,
    /// Instance IDs currently being replayed in this process.
    leases: Arc<DashMap<Uuid, ()>>,
}

/// Releases the instance lease when a replay finishes, however it exits.
struct LeaseGuard {
    leases: Arc<DashMap<Uuid, ()>>,
    id: Uuid,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.leases.remove(&self.id);
    }
}

impl<S, C> InstanceManager<S, C>
where
    S: LogStore + 'static,
    C: Clock,
{
    pub fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        let timers = Arc::new(TimerService::new(Arc::clone(&store), Arc::clone(&clock)));
        let runner = WorkflowRunner::new(Arc::clone(&store), Arc::clone(&clock), Arc::clone(&timers));
        Self {
            store,
            clock,
            timers,
            runner,
            registry: DashMap::new(),
            leases: Arc::new(DashMap::new()),
        }
    }

    /// Register a workflow program under a definition ID.
    pub fn register<P>(&self, definition_id: impl Into<String>, program: P) -> Result<(), ManagerError>
    where
        P: WorkflowProgram<S, C> + 'static,
    {
        let definition_id = definition_id.into();
        if self.registry.contains_key(&definition_id) {
            return Err(ManagerError::Validation(format!(
                "workflow '{definition_id}' is already registered"
            )));
        }
        self.registry.insert(definition_id, Arc::new(program));
        Ok(())
    }

    /// Create an instance of a registered workflow and start its first
    /// replay in the background.
    pub async fn create(
        self: &Arc<Self>,
        definition_id: &str,
        params: Value,
    ) -> Result<Instance, ManagerError> {
        if !self.registry.contains_key(definition_id) {
            return Err(ManagerError::UnknownDefinition(definition_id.to_string()));
        }
        let instance = Instance::new(definition_id, params, self.clock.now());
        self.store.append_instance(&instance).await?;
        info!(
            instance_id = %instance.id,
            definition_id,
            "instance created"
        );
        self.spawn_replay(instance.id);
        Ok(instance)
    }

    /// Fetch an instance.
    pub async fn get(&self, id: Uuid) -> Result<Instance, ManagerError> {
        self.store
            .get_instance(id)
            .await?
            .ok_or(ManagerError::NotFound(id))
    }

    /// Current status, plus final output or error once terminal.
    pub async fn status(&self, id: Uuid) -> Result<StatusSnapshot, ManagerError> {
        Ok(self.get(id).await?.snapshot())
    }

    /// Step records for an instance, ordered by first start time.
    pub async fn steps(&self, id: Uuid) -> Result<Vec<StepRecord>, ManagerError> {
        self.get(id).await?;
        Ok(self.store.list_step_records(id).await?)
    }

    /// Stop an instance for good. Idempotent; an instance that already
    /// reached `Complete` or `Failed` keeps that status.
    pub async fn terminate(&self, id: Uuid) -> Result<StatusSnapshot, ManagerError> {
        match self
            .store
            .update_instance(id, InstanceStatus::Terminated, None, None)
            .await
        {
            Ok(()) => info!(instance_id = %id, "instance terminated"),
            Err(StoreError::Conflict(_)) => {
                debug!(instance_id = %id, "terminate on terminal instance ignored")
            }
            Err(StoreError::NotFound) => return Err(ManagerError::NotFound(id)),
            Err(e) => return Err(e.into()),
        }
        self.status(id).await
    }

    /// Drive one replay of `id` now, if no other replay of it is running.
    ///
    /// Returns `Ok(None)` when the lease is held elsewhere; the holder picks
    /// up any wake that came due meanwhile, so a skipped call loses nothing.
    pub async fn run_once(&self, id: Uuid) -> Result<Option<RunOutcome>, ManagerError> {
        let Some(_guard) = self.try_lease(id) else {
            debug!(instance_id = %id, "replay lease busy, skipping");
            return Ok(None);
        };

        let program = {
            let instance = self.get(id).await?;
            self.registry
                .get(&instance.definition_id)
                .map(|p| Arc::clone(p.value()))
                .ok_or_else(|| ManagerError::UnknownDefinition(instance.definition_id.clone()))?
        };

        loop {
            let outcome = self.runner.run_instance(id, program.as_ref()).await?;
            // A wake that arrived during the replay was skipped by its
            // sender; before releasing the lease, check whether anything is
            // already due and absorb it here.
            if matches!(outcome, RunOutcome::Suspended(_)) && self.has_due_wake(id).await? {
                continue;
            }
            return Ok(Some(outcome));
        }
    }

    /// Wake an instance, typically from a fired timer.
    pub async fn wake(&self, id: Uuid) -> Result<Option<RunOutcome>, ManagerError> {
        self.run_once(id).await
    }

    /// Re-enter instances a previous process left mid-replay.
    ///
    /// `Queued` and `Running` instances have no pending timer to bring them
    /// back, so a crash would otherwise strand them. Call once at startup,
    /// after registering programs; sleeping and retrying instances are
    /// covered by their durable timers and are left alone. Returns the
    /// number of replays started.
    pub async fn resume_incomplete(self: &Arc<Self>) -> Result<usize, ManagerError> {
        let mut resumed = 0;
        for status in [InstanceStatus::Queued, InstanceStatus::Running] {
            for instance in self.store.list_instances_by_status(status).await? {
                info!(
                    instance_id = %instance.id,
                    status = ?status,
                    "resuming instance left over from a previous run"
                );
                self.spawn_replay(instance.id);
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    /// Start the background timer worker that wakes sleeping and retrying
    /// instances. Runs until `shutdown` is cancelled.
    pub fn spawn_timer_worker(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        self.timers.spawn(self.wake_callback(), shutdown)
    }

    /// Timer delivery handler. Reports the wake unhandled when the replay
    /// hit a store error or found the lease busy, which keeps the timer in
    /// the store for a later poll.
    fn wake_callback(self: &Arc<Self>) -> WakeCallback {
        let mgr = Arc::clone(self);
        Arc::new(move |id| {
            let mgr = Arc::clone(&mgr);
            Box::pin(async move {
                match mgr.run_once(id).await {
                    Ok(Some(_)) => true,
                    Ok(None) => false,
                    Err(e) => {
                        error!(instance_id = %id, error = %e, "wake failed");
                        false
                    }
                }
            })
        })
    }

    fn spawn_replay(self: &Arc<Self>, id: Uuid) {
        let mgr = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = mgr.run_once(id).await {
                error!(instance_id = %id, error = %e, "replay failed");
            }
        });
    }

    fn try_lease(&self, id: Uuid) -> Option<LeaseGuard> {
        use dashmap::mapref::entry::Entry;
        match self.leases.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(LeaseGuard {
                    leases: Arc::clone(&self.leases),
                    id,
                })
            }
        }
    }

    /// Whether any pending step of `id` has a wake deadline in the past.
    async fn has_due_wake(&self, id: Uuid) -> Result<bool, ManagerError> {
        let now = self.clock.now();
        let records = self.store.list_step_records(id).await?;
        Ok(records.iter().any(|r| {
            r.state == StepState::Pending && r.wake_at.is_some_and(|wake_at| wake_at <= now)
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
