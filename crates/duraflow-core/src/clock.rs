//! Clock abstraction and the timer service that wakes sleeping instances.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use duraflow_types::error::StoreError;
use duraflow_types::step::Timer;
use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::repository::LogStore;

/// Source of the current wall-clock time.
///
/// The engine never calls `Utc::now()` directly; everything time-dependent
/// goes through this trait so tests can drive sleeps and retry delays with a
/// [`ManualClock`] instead of waiting in real time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Advance the clock by `delta`.
    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += delta;
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Callback invoked with the instance ID of every fired timer.
///
/// Returns whether the wake was fully handled. `false` (lease busy, store
/// error) leaves the durable timer in place so the wake is re-delivered on
/// a later poll.
pub type WakeCallback = Arc<dyn Fn(Uuid) -> BoxFuture<'static, bool> + Send + Sync>;

/// How often the timer worker polls the store for due timers.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How many due timers a single poll drains at most.
const POLL_BATCH: u32 = 16;

/// Persists wake-up requests and delivers them when they come due.
///
/// Delivery is at-least-once: a timer is removed from the store only after
/// its callback reports the wake as handled, so a crash, a store error, or
/// a skipped delivery leaves the timer due and a later poll fires it again.
/// Wake handlers tolerate the resulting duplicates because waking an
/// instance that has nothing to do is a no-op.
pub struct TimerService<S, C> {
    store: Arc<S>,
    clock: Arc<C>,
    poll_interval: Duration,
}

impl<S, C> TimerService<S, C>
where
    S: LogStore + 'static,
    C: Clock,
{
    pub fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self {
            store,
            clock,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Durably request that `instance_id` be woken at `fire_at`.
    pub async fn schedule_wake(
        &self,
        instance_id: Uuid,
        fire_at: DateTime<Utc>,
    ) -> Result<Timer, StoreError> {
        let timer = Timer::new(instance_id, fire_at);
        self.store.schedule_timer(&timer).await?;
        debug!(instance_id = %instance_id, fire_at = %fire_at, "scheduled wake");
        Ok(timer)
    }

    /// Remove a pending timer. Returns `false` if it already fired.
    pub async fn cancel(&self, timer: &Timer) -> Result<bool, StoreError> {
        self.store.cancel_timer(timer.token).await
    }

    /// Spawn the polling worker. Runs until `shutdown` is cancelled.
    pub fn spawn(
        self: &Arc<Self>,
        on_wake: WakeCallback,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut poll = interval(service.poll_interval);
            poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!("timer worker started");
            loop {
                tokio::select! {
                    _ = poll.tick() => {
                        if let Err(e) = service.fire_due(&on_wake).await {
                            error!(error = %e, "timer poll failed");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("timer worker shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Dispatch every timer that is due as of the clock's current reading.
    ///
    /// Each wake runs on its own task so one long replay cannot hold up the
    /// rest of the batch. The timer is removed only once its callback
    /// reports the wake handled; otherwise it stays due for the next poll.
    ///
    /// Exposed so deterministic tests can drive delivery without the polling
    /// task. Returns how many wakes were dispatched.
    pub async fn fire_due(&self, on_wake: &WakeCallback) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let due = self.store.due_timers(now, POLL_BATCH).await?;
        let dispatched = due.len();
        for timer in due {
            debug!(instance_id = %timer.instance_id, token = %timer.token, "timer fired");
            let store = Arc::clone(&self.store);
            let on_wake = Arc::clone(on_wake);
            tokio::spawn(async move {
                if !on_wake(timer.instance_id).await {
                    debug!(instance_id = %timer.instance_id, "wake not handled, timer kept");
                    return;
                }
                if let Err(e) = store.cancel_timer(timer.token).await {
                    error!(instance_id = %timer.instance_id, error = %e, "failed to remove fired timer");
                }
            });
        }
        Ok(dispatched)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::repository::MemoryLogStore;

    fn counting_callback(handled: bool) -> (WakeCallback, Arc<AtomicU32>) {
        let count = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&count);
        let cb: WakeCallback = Arc::new(move |_| {
            let seen = Arc::clone(&seen);
            Box::pin(async move {
                seen.fetch_add(1, Ordering::SeqCst);
                handled
            })
        });
        (cb, count)
    }

    async fn wait_for_count(fired: &AtomicU32, expected: u32) {
        for _ in 0..200 {
            if fired.load(Ordering::SeqCst) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("callback never reached {expected} invocations");
    }

    #[tokio::test]
    async fn fire_due_delivers_and_consumes() {
        let store = Arc::new(MemoryLogStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service = Arc::new(TimerService::new(Arc::clone(&store), Arc::clone(&clock)));

        let id = Uuid::now_v7();
        service
            .schedule_wake(id, clock.now() + ChronoDuration::seconds(20))
            .await
            .unwrap();

        let (cb, fired) = counting_callback(true);

        // Not due yet.
        assert_eq!(service.fire_due(&cb).await.unwrap(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        clock.advance(ChronoDuration::seconds(20));
        assert_eq!(service.fire_due(&cb).await.unwrap(), 1);
        wait_for_count(&fired, 1).await;

        // Consumed: once removal lands, a later pass dispatches nothing.
        for _ in 0..200 {
            if service.fire_due(&cb).await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(service.fire_due(&cb).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unhandled_wake_keeps_the_timer_due() {
        let store = Arc::new(MemoryLogStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service = Arc::new(TimerService::new(Arc::clone(&store), Arc::clone(&clock)));

        let id = Uuid::now_v7();
        service
            .schedule_wake(id, clock.now() + ChronoDuration::seconds(1))
            .await
            .unwrap();
        clock.advance(ChronoDuration::seconds(1));

        let (rejecting, fired) = counting_callback(false);
        assert_eq!(service.fire_due(&rejecting).await.unwrap(), 1);
        wait_for_count(&fired, 1).await;

        // The rejected wake left the timer in place for re-delivery.
        assert_eq!(
            store.due_timers(clock.now(), 16).await.unwrap().len(),
            1,
            "unhandled wake must not consume the timer"
        );

        let (accepting, fired) = counting_callback(true);
        assert_eq!(service.fire_due(&accepting).await.unwrap(), 1);
        wait_for_count(&fired, 1).await;
        for _ in 0..200 {
            if store.due_timers(clock.now(), 16).await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(store.due_timers(clock.now(), 16).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let store = Arc::new(MemoryLogStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service = Arc::new(TimerService::new(Arc::clone(&store), Arc::clone(&clock)));

        let timer = service
            .schedule_wake(Uuid::now_v7(), clock.now() + ChronoDuration::seconds(1))
            .await
            .unwrap();
        assert!(service.cancel(&timer).await.unwrap());

        clock.advance(ChronoDuration::seconds(5));
        let (cb, fired) = counting_callback(true);
        assert_eq!(service.fire_due(&cb).await.unwrap(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn polling_worker_fires_with_system_clock() {
        let store = Arc::new(MemoryLogStore::new());
        let clock = Arc::new(SystemClock);
        let service = Arc::new(
            TimerService::new(Arc::clone(&store), Arc::clone(&clock))
                .with_poll_interval(Duration::from_millis(5)),
        );

        service
            .schedule_wake(Uuid::now_v7(), Utc::now() + ChronoDuration::milliseconds(10))
            .await
            .unwrap();

        let (cb, fired) = counting_callback(true);
        let shutdown = CancellationToken::new();
        let handle = service.spawn(cb, shutdown.clone());

        for _ in 0..100 {
            if fired.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Delivery is at-least-once, so a fast poll may re-fire before the
        // handled timer is removed.
        assert!(fired.load(Ordering::SeqCst) >= 1);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
