//! SQLite durable log implementation.
//!
//! Implements `LogStore` from `duraflow-core` using sqlx with split
//! read/write pools. JSON payloads are stored as text; timestamps are
//! RFC 3339 text, which compares chronologically. The two conditional-write
//! rules the engine relies on are enforced in SQL: a terminal instance
//! status absorbs every later transition, and a succeeded step record can
//! never be overwritten.

use chrono::{DateTime, Utc};
use duraflow_core::repository::LogStore;
use duraflow_types::error::StoreError;
use duraflow_types::instance::{Instance, InstanceStatus};
use duraflow_types::step::{StepKind, StepRecord, StepState, Timer};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `LogStore`.
pub struct SqliteLogStore {
    pool: DatabasePool,
}

impl SqliteLogStore {
    /// Create a new log store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct InstanceRow {
    id: String,
    definition_id: String,
    params: String,
    status: String,
    created_at: String,
    updated_at: String,
    output: Option<String>,
    error: Option<String>,
}

impl InstanceRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            definition_id: row.try_get("definition_id")?,
            params: row.try_get("params")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
        })
    }

    fn into_instance(self) -> Result<Instance, StoreError> {
        let status: InstanceStatus =
            serde_json::from_value(Value::String(self.status.clone()))
                .map_err(|_| StoreError::Query(format!("invalid instance status: {}", self.status)))?;

        let params: Value = serde_json::from_str(&self.params)
            .map_err(|e| StoreError::Query(format!("invalid params JSON: {e}")))?;

        let output = self
            .output
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| StoreError::Query(format!("invalid output JSON: {e}")))
            })
            .transpose()?;

        Ok(Instance {
            id: parse_uuid(&self.id)?,
            definition_id: self.definition_id,
            params,
            status,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            output,
            error: self.error,
        })
    }
}

struct StepRow {
    instance_id: String,
    step_name: String,
    kind: String,
    state: String,
    attempt: i64,
    result: Option<String>,
    last_error: Option<String>,
    wake_at: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl StepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            instance_id: row.try_get("instance_id")?,
            step_name: row.try_get("step_name")?,
            kind: row.try_get("kind")?,
            state: row.try_get("state")?,
            attempt: row.try_get("attempt")?,
            result: row.try_get("result")?,
            last_error: row.try_get("last_error")?,
            wake_at: row.try_get("wake_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_record(self) -> Result<StepRecord, StoreError> {
        let kind: StepKind = serde_json::from_value(Value::String(self.kind.clone()))
            .map_err(|_| StoreError::Query(format!("invalid step kind: {}", self.kind)))?;
        let state: StepState = serde_json::from_value(Value::String(self.state.clone()))
            .map_err(|_| StoreError::Query(format!("invalid step state: {}", self.state)))?;

        let result = self
            .result
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| StoreError::Query(format!("invalid result JSON: {e}")))
            })
            .transpose()?;

        Ok(StepRecord {
            instance_id: parse_uuid(&self.instance_id)?,
            step_name: self.step_name,
            kind,
            state,
            attempt: self.attempt as u32,
            result,
            last_error: self.last_error,
            wake_at: self.wake_at.as_deref().map(parse_datetime).transpose()?,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    s.parse::<Uuid>()
        .map_err(|e| StoreError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Render a unit enum (status, state, kind) as its snake_case text form.
fn enum_text<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    let v = serde_json::to_value(value).map_err(|e| StoreError::Query(e.to_string()))?;
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| StoreError::Query("enum did not serialize to a string".to_string()))
}

fn json_text(value: &Value) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Query(e.to_string()))
}

// ---------------------------------------------------------------------------
// LogStore impl
// ---------------------------------------------------------------------------

impl LogStore for SqliteLogStore {
    async fn append_instance(&self, instance: &Instance) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO instances
               (id, definition_id, params, status, created_at, updated_at, output, error)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(instance.id.to_string())
        .bind(&instance.definition_id)
        .bind(json_text(&instance.params)?)
        .bind(enum_text(&instance.status)?)
        .bind(format_datetime(&instance.created_at))
        .bind(format_datetime(&instance.updated_at))
        .bind(
            instance
                .output
                .as_ref()
                .map(json_text)
                .transpose()?,
        )
        .bind(&instance.error)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "instance {} already exists",
                instance.id
            )));
        }
        Ok(())
    }

    async fn update_instance(
        &self,
        id: Uuid,
        status: InstanceStatus,
        output: Option<&Value>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let status_str = enum_text(&status)?;
        let now = format_datetime(&Utc::now());
        let output_str = output.map(json_text).transpose()?;

        let result = sqlx::query(
            r#"UPDATE instances
               SET status = ?,
                   updated_at = ?,
                   output = COALESCE(?, output),
                   error = COALESCE(?, error)
               WHERE id = ?
                 AND status NOT IN ('complete', 'failed', 'terminated')"#,
        )
        .bind(&status_str)
        .bind(&now)
        .bind(&output_str)
        .bind(error)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            // Either the row is missing or a terminal status absorbed the write.
            let current: Option<(String,)> =
                sqlx::query_as("SELECT status FROM instances WHERE id = ?")
                    .bind(id.to_string())
                    .fetch_optional(&self.pool.reader)
                    .await
                    .map_err(|e| StoreError::Query(e.to_string()))?;
            return match current {
                None => Err(StoreError::NotFound),
                Some((status,)) => Err(StoreError::Conflict(format!(
                    "instance {id} is already {status}"
                ))),
            };
        }
        Ok(())
    }

    async fn get_instance(&self, id: Uuid) -> Result<Option<Instance>, StoreError> {
        let row = sqlx::query(
            "SELECT id, definition_id, params, status, created_at, updated_at, output, error \
             FROM instances WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = InstanceRow::from_row(&row).map_err(|e| StoreError::Query(e.to_string()))?;
                Ok(Some(r.into_instance()?))
            }
            None => Ok(None),
        }
    }

    async fn list_instances_by_status(
        &self,
        status: InstanceStatus,
    ) -> Result<Vec<Instance>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, definition_id, params, status, created_at, updated_at, output, error \
             FROM instances WHERE status = ? ORDER BY created_at ASC",
        )
        .bind(enum_text(&status)?)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                InstanceRow::from_row(row)
                    .map_err(|e| StoreError::Query(e.to_string()))?
                    .into_instance()
            })
            .collect()
    }

    async fn get_step_record(
        &self,
        instance_id: Uuid,
        step_name: &str,
    ) -> Result<Option<StepRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT instance_id, step_name, kind, state, attempt, result, last_error, wake_at, started_at, completed_at \
             FROM step_records WHERE instance_id = ? AND step_name = ?",
        )
        .bind(instance_id.to_string())
        .bind(step_name)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = StepRow::from_row(&row).map_err(|e| StoreError::Query(e.to_string()))?;
                Ok(Some(r.into_record()?))
            }
            None => Ok(None),
        }
    }

    async fn put_step_record(&self, record: &StepRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO step_records
               (instance_id, step_name, kind, state, attempt, result, last_error, wake_at, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(instance_id, step_name) DO UPDATE SET
                 kind = excluded.kind,
                 state = excluded.state,
                 attempt = excluded.attempt,
                 result = excluded.result,
                 last_error = excluded.last_error,
                 wake_at = excluded.wake_at,
                 completed_at = excluded.completed_at
               WHERE step_records.state != 'succeeded'"#,
        )
        .bind(record.instance_id.to_string())
        .bind(&record.step_name)
        .bind(enum_text(&record.kind)?)
        .bind(enum_text(&record.state)?)
        .bind(record.attempt as i64)
        .bind(record.result.as_ref().map(json_text).transpose()?)
        .bind(&record.last_error)
        .bind(record.wake_at.as_ref().map(format_datetime))
        .bind(format_datetime(&record.started_at))
        .bind(record.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "step '{}' already succeeded",
                record.step_name
            )));
        }
        Ok(())
    }

    async fn list_step_records(&self, instance_id: Uuid) -> Result<Vec<StepRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT instance_id, step_name, kind, state, attempt, result, last_error, wake_at, started_at, completed_at \
             FROM step_records WHERE instance_id = ? ORDER BY started_at ASC",
        )
        .bind(instance_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                StepRow::from_row(row)
                    .map_err(|e| StoreError::Query(e.to_string()))?
                    .into_record()
            })
            .collect()
    }

    async fn schedule_timer(&self, timer: &Timer) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO timers (token, instance_id, fire_at) VALUES (?, ?, ?)")
            .bind(timer.token.to_string())
            .bind(timer.instance_id.to_string())
            .bind(format_datetime(&timer.fire_at))
            .execute(&self.pool.writer)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn due_timers(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Timer>, StoreError> {
        let rows = sqlx::query(
            "SELECT token, instance_id, fire_at FROM timers WHERE fire_at <= ? \
             ORDER BY fire_at ASC LIMIT ?",
        )
        .bind(format_datetime(&now))
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| -> Result<Timer, StoreError> {
                let token: String = row.try_get("token").map_err(|e| StoreError::Query(e.to_string()))?;
                let instance_id: String = row
                    .try_get("instance_id")
                    .map_err(|e| StoreError::Query(e.to_string()))?;
                let fire_at: String = row
                    .try_get("fire_at")
                    .map_err(|e| StoreError::Query(e.to_string()))?;
                Ok(Timer {
                    token: parse_uuid(&token)?,
                    instance_id: parse_uuid(&instance_id)?,
                    fire_at: parse_datetime(&fire_at)?,
                })
            })
            .collect()
    }

    async fn cancel_timer(&self, token: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM timers WHERE token = ?")
            .bind(token.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration as ChronoDuration;
    use duraflow_core::clock::ManualClock;
    use duraflow_core::workflow::manager::InstanceManager;
    use duraflow_core::workflow::runner::RunOutcome;
    use duraflow_core::workflow::step::{StepHandle, StepInterrupt};
    use duraflow_types::instance::{InstanceStatus, WorkflowEvent};
    use futures_util::future::BoxFuture;
    use serde_json::json;

    use super::*;

    async fn test_store() -> SqliteLogStore {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        SqliteLogStore::new(DatabasePool::new(&url).await.unwrap())
    }

    fn sample_instance() -> Instance {
        Instance::new("demo-workflow", json!({"name": "Andrii"}), Utc::now())
    }

    fn sample_record(instance_id: Uuid, name: &str, state: StepState) -> StepRecord {
        StepRecord {
            instance_id,
            step_name: name.to_string(),
            kind: StepKind::Compute,
            state,
            attempt: 1,
            result: None,
            last_error: None,
            wake_at: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn instance_round_trips_all_fields() {
        let store = test_store().await;
        let instance = sample_instance();
        store.append_instance(&instance).await.unwrap();

        let fetched = store.get_instance(instance.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, instance.id);
        assert_eq!(fetched.definition_id, "demo-workflow");
        assert_eq!(fetched.params, json!({"name": "Andrii"}));
        assert_eq!(fetched.status, InstanceStatus::Queued);
        assert_eq!(fetched.created_at, instance.created_at);
        assert!(fetched.output.is_none());
        assert!(fetched.error.is_none());

        assert!(store.get_instance(Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_instance_is_conflict() {
        let store = test_store().await;
        let instance = sample_instance();
        store.append_instance(&instance).await.unwrap();
        let err = store.append_instance(&instance).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn update_instance_enforces_absorbing_terminals() {
        let store = test_store().await;
        let instance = sample_instance();
        store.append_instance(&instance).await.unwrap();

        store
            .update_instance(instance.id, InstanceStatus::Running, None, None)
            .await
            .unwrap();
        store
            .update_instance(
                instance.id,
                InstanceStatus::Failed,
                None,
                Some("step 'flaky' failed: out of retries"),
            )
            .await
            .unwrap();

        let err = store
            .update_instance(instance.id, InstanceStatus::Running, None, None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let fetched = store.get_instance(instance.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, InstanceStatus::Failed);
        assert_eq!(
            fetched.error.as_deref(),
            Some("step 'flaky' failed: out of retries")
        );

        let err = store
            .update_instance(Uuid::now_v7(), InstanceStatus::Running, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn list_instances_by_status_finds_stranded_work() {
        let store = test_store().await;
        let queued = sample_instance();
        let running = sample_instance();
        let done = sample_instance();
        for instance in [&queued, &running, &done] {
            store.append_instance(instance).await.unwrap();
        }
        store
            .update_instance(running.id, InstanceStatus::Running, None, None)
            .await
            .unwrap();
        store
            .update_instance(done.id, InstanceStatus::Complete, Some(&json!("ok")), None)
            .await
            .unwrap();

        let found = store
            .list_instances_by_status(InstanceStatus::Queued)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, queued.id);

        let found = store
            .list_instances_by_status(InstanceStatus::Running)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, running.id);

        assert!(
            store
                .list_instances_by_status(InstanceStatus::Failed)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn step_record_round_trips_and_protects_success() {
        let store = test_store().await;
        let instance_id = Uuid::now_v7();

        let mut record = sample_record(instance_id, "flaky write", StepState::Pending);
        record.last_error = Some("connection reset".to_string());
        record.wake_at = Some(Utc::now() + ChronoDuration::seconds(5));
        store.put_step_record(&record).await.unwrap();

        let fetched = store
            .get_step_record(instance_id, "flaky write")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.state, StepState::Pending);
        assert_eq!(fetched.attempt, 1);
        assert_eq!(fetched.wake_at, record.wake_at);
        assert_eq!(fetched.last_error.as_deref(), Some("connection reset"));

        record.state = StepState::Succeeded;
        record.attempt = 2;
        record.result = Some(json!([1, 2, 3]));
        record.wake_at = None;
        record.completed_at = Some(Utc::now());
        store.put_step_record(&record).await.unwrap();

        record.state = StepState::Failed;
        let err = store.put_step_record(&record).await.unwrap_err();
        assert!(err.is_conflict());

        let fetched = store
            .get_step_record(instance_id, "flaky write")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.state, StepState::Succeeded);
        assert_eq!(fetched.result, Some(json!([1, 2, 3])));
    }

    #[tokio::test]
    async fn list_step_records_is_ordered_and_scoped() {
        let store = test_store().await;
        let instance_id = Uuid::now_v7();

        let mut first = sample_record(instance_id, "first", StepState::Succeeded);
        first.started_at = Utc::now() - ChronoDuration::seconds(30);
        let second = sample_record(instance_id, "second", StepState::Pending);
        let other = sample_record(Uuid::now_v7(), "other", StepState::Pending);

        store.put_step_record(&second).await.unwrap();
        store.put_step_record(&first).await.unwrap();
        store.put_step_record(&other).await.unwrap();

        let records = store.list_step_records(instance_id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].step_name, "first");
        assert_eq!(records[1].step_name, "second");
    }

    #[tokio::test]
    async fn timers_fire_in_order_and_delete_once() {
        let store = test_store().await;
        let now = Utc::now();
        let instance_id = Uuid::now_v7();

        let early = Timer::new(instance_id, now - ChronoDuration::seconds(10));
        let late = Timer::new(instance_id, now - ChronoDuration::seconds(2));
        let future = Timer::new(instance_id, now + ChronoDuration::minutes(5));
        store.schedule_timer(&late).await.unwrap();
        store.schedule_timer(&early).await.unwrap();
        store.schedule_timer(&future).await.unwrap();

        let due = store.due_timers(now, 16).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].token, early.token);
        assert_eq!(due[1].token, late.token);

        assert!(store.cancel_timer(early.token).await.unwrap());
        assert!(!store.cancel_timer(early.token).await.unwrap());

        let due = store.due_timers(now, 16).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].token, late.token);
    }

    /// The whole engine running over SQLite: sleep, retry with backoff, and
    /// memoized completion, driven by a manual clock.
    #[tokio::test]
    async fn engine_completes_demo_workflow_over_sqlite() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let store = Arc::new(test_store().await);
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mgr = Arc::new(InstanceManager::new(store, Arc::clone(&clock)));

        let failures = Arc::new(AtomicU32::new(1));
        mgr.register(
            "demo",
            move |_event: WorkflowEvent,
                  step: StepHandle<SqliteLogStore, ManualClock>|
                  -> BoxFuture<'static, Result<Value, StepInterrupt>> {
                let failures = Arc::clone(&failures);
                Box::pin(async move {
                    let data: Vec<u32> = step
                        .run("my first step", || async { Ok(vec![1, 2, 3]) })
                        .await?;
                    step.sleep("wait on something", "20 seconds").await?;
                    step.run("flaky write", move || async move {
                        if failures
                            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                            .is_ok()
                        {
                            anyhow::bail!("transient failure");
                        }
                        Ok(())
                    })
                    .await?;
                    Ok(json!({ "completed": data }))
                })
            },
        )
        .unwrap();

        let instance = mgr.create("demo", json!({"name": "Andrii"})).await.unwrap();

        // First replay parks on the sleep.
        let mut status = mgr.status(instance.id).await.unwrap().status;
        for _ in 0..400 {
            if status == InstanceStatus::Sleeping {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            status = mgr.status(instance.id).await.unwrap().status;
        }
        assert_eq!(status, InstanceStatus::Sleeping);

        // Retries until the first replay's lease is released.
        async fn wake_through(
            mgr: &Arc<InstanceManager<SqliteLogStore, ManualClock>>,
            id: Uuid,
        ) -> RunOutcome {
            for _ in 0..400 {
                if let Some(outcome) = mgr.wake(id).await.unwrap() {
                    return outcome;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            panic!("lease for {id} never freed");
        }

        // Sleep elapses; the write fails once and schedules a retry.
        clock.advance(ChronoDuration::seconds(20));
        let outcome = wake_through(&mgr, instance.id).await;
        assert!(matches!(outcome, RunOutcome::Suspended(_)));
        assert_eq!(
            mgr.status(instance.id).await.unwrap().status,
            InstanceStatus::ErroredRetrying
        );

        // Backoff elapses; the retry succeeds and the instance completes.
        clock.advance(ChronoDuration::seconds(2));
        let outcome = wake_through(&mgr, instance.id).await;
        assert_eq!(
            outcome,
            RunOutcome::Completed(json!({"completed": [1, 2, 3]}))
        );

        let snapshot = mgr.status(instance.id).await.unwrap();
        assert_eq!(snapshot.status, InstanceStatus::Complete);
        assert_eq!(snapshot.output, Some(json!({"completed": [1, 2, 3]})));
    }
}
