//! Durable log store trait definition.
//!
//! Defines the storage interface for workflow instances, step records, and
//! pending timers. The infrastructure layer (duraflow-infra) implements this
//! trait with SQLite persistence; [`super::MemoryLogStore`] implements it
//! in-process for tests and embedded use.

use chrono::{DateTime, Utc};
use duraflow_types::error::StoreError;
use duraflow_types::instance::{Instance, InstanceStatus};
use duraflow_types::step::{StepRecord, Timer};
use serde_json::Value;
use uuid::Uuid;

/// Storage trait for the durable execution log.
///
/// Covers three entity families:
/// - **Instances:** one row per workflow instance, carrying its lifecycle
///   status and final output or error.
/// - **Step records:** the memoization log, keyed by `(instance_id, step_name)`.
/// - **Timers:** pending wake-ups consumed by the timer service.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait LogStore: Send + Sync {
    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    /// Insert a newly created instance.
    fn append_instance(
        &self,
        instance: &Instance,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Transition an instance to a new status, optionally recording its final
    /// output or error message.
    ///
    /// Terminal statuses are absorbing: once an instance is `Complete`,
    /// `Failed`, or `Terminated`, any further transition is rejected with
    /// [`StoreError::Conflict`].
    fn update_instance(
        &self,
        id: Uuid,
        status: InstanceStatus,
        output: Option<&Value>,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Fetch an instance by ID.
    fn get_instance(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Instance>, StoreError>> + Send;

    /// List every instance currently in `status`, oldest first.
    ///
    /// Used at startup to find instances a crashed process left `Queued` or
    /// `Running` with no timer to bring them back.
    fn list_instances_by_status(
        &self,
        status: InstanceStatus,
    ) -> impl std::future::Future<Output = Result<Vec<Instance>, StoreError>> + Send;

    // -----------------------------------------------------------------------
    // Step records
    // -----------------------------------------------------------------------

    /// Fetch a single step record by instance and step name.
    fn get_step_record(
        &self,
        instance_id: Uuid,
        step_name: &str,
    ) -> impl std::future::Future<Output = Result<Option<StepRecord>, StoreError>> + Send;

    /// Upsert a step record.
    ///
    /// A record whose stored state is `Succeeded` can never be overwritten;
    /// such a write is rejected with [`StoreError::Conflict`]. This is the
    /// backstop that makes memoized results immutable even if two runners
    /// race on the same instance.
    fn put_step_record(
        &self,
        record: &StepRecord,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// List all step records for an instance, ordered by first start time.
    fn list_step_records(
        &self,
        instance_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepRecord>, StoreError>> + Send;

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// Persist a pending wake-up.
    fn schedule_timer(
        &self,
        timer: &Timer,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Fetch up to `limit` timers whose `fire_at` is at or before `now`,
    /// ordered soonest first. Timers stay in the store until removed, so a
    /// crash between delivery and removal re-delivers the wake.
    fn due_timers(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Timer>, StoreError>> + Send;

    /// Remove a timer by token. Returns `true` if a timer was removed,
    /// `false` if it had already been consumed or cancelled.
    fn cancel_timer(
        &self,
        token: Uuid,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;
}
