//! In-process implementation of [`LogStore`].
//!
//! Backs the engine with concurrent maps instead of a database. Durability is
//! limited to the process lifetime, which is exactly what embedded use and
//! the engine's own tests need. The conditional-write rules (absorbing
//! terminal statuses, immutable succeeded records) match the SQLite
//! implementation in duraflow-infra.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use duraflow_types::error::StoreError;
use duraflow_types::instance::{Instance, InstanceStatus};
use duraflow_types::step::{StepRecord, StepState, Timer};
use serde_json::Value;
use uuid::Uuid;

use super::LogStore;

/// In-memory durable log, safe for concurrent use.
#[derive(Default)]
pub struct MemoryLogStore {
    instances: DashMap<Uuid, Instance>,
    steps: DashMap<(Uuid, String), StepRecord>,
    /// Pending timers ordered by fire time. Keyed by `(fire_at, token)` so
    /// `due_timers` is a range scan off the front of the map.
    timers: Mutex<BTreeMap<(DateTime<Utc>, Uuid), Timer>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_timers(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<(DateTime<Utc>, Uuid), Timer>>, StoreError> {
        self.timers.lock().map_err(|_| StoreError::Connection)
    }
}

impl LogStore for MemoryLogStore {
    async fn append_instance(&self, instance: &Instance) -> Result<(), StoreError> {
        match self.instances.entry(instance.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "instance {} already exists",
                instance.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(instance.clone());
                Ok(())
            }
        }
    }

    async fn update_instance(
        &self,
        id: Uuid,
        status: InstanceStatus,
        output: Option<&Value>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut entry = self.instances.get_mut(&id).ok_or(StoreError::NotFound)?;
        if entry.status.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "instance {id} is already {:?}",
                entry.status
            )));
        }
        entry.status = status;
        entry.updated_at = Utc::now();
        if let Some(output) = output {
            entry.output = Some(output.clone());
        }
        if let Some(error) = error {
            entry.error = Some(error.to_string());
        }
        Ok(())
    }

    async fn get_instance(&self, id: Uuid) -> Result<Option<Instance>, StoreError> {
        Ok(self.instances.get(&id).map(|entry| entry.clone()))
    }

    async fn list_instances_by_status(
        &self,
        status: InstanceStatus,
    ) -> Result<Vec<Instance>, StoreError> {
        let mut matching: Vec<Instance> = self
            .instances
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.clone())
            .collect();
        matching.sort_by_key(|i| i.created_at);
        Ok(matching)
    }

    async fn get_step_record(
        &self,
        instance_id: Uuid,
        step_name: &str,
    ) -> Result<Option<StepRecord>, StoreError> {
        Ok(self
            .steps
            .get(&(instance_id, step_name.to_string()))
            .map(|entry| entry.clone()))
    }

    async fn put_step_record(&self, record: &StepRecord) -> Result<(), StoreError> {
        let key = (record.instance_id, record.step_name.clone());
        match self.steps.entry(key) {
            Entry::Occupied(mut slot) => {
                if slot.get().state == StepState::Succeeded {
                    return Err(StoreError::Conflict(format!(
                        "step '{}' already succeeded",
                        record.step_name
                    )));
                }
                slot.insert(record.clone());
                Ok(())
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn list_step_records(&self, instance_id: Uuid) -> Result<Vec<StepRecord>, StoreError> {
        let mut records: Vec<StepRecord> = self
            .steps
            .iter()
            .filter(|entry| entry.key().0 == instance_id)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|r| r.started_at);
        Ok(records)
    }

    async fn schedule_timer(&self, timer: &Timer) -> Result<(), StoreError> {
        self.lock_timers()?
            .insert((timer.fire_at, timer.token), timer.clone());
        Ok(())
    }

    async fn due_timers(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Timer>, StoreError> {
        let timers = self.lock_timers()?;
        Ok(timers
            .values()
            .take_while(|t| t.fire_at <= now)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn cancel_timer(&self, token: Uuid) -> Result<bool, StoreError> {
        let mut timers = self.lock_timers()?;
        let key = timers
            .iter()
            .find(|(_, t)| t.token == token)
            .map(|(key, _)| *key);
        match key {
            Some(key) => {
                timers.remove(&key);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
