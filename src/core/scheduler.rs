//! Named periodic callbacks on a fixed cadence.
//!
//! A registered job fires once immediately, then on each interval boundary.
//! The immediate first fire is load-bearing: analytics and model-refresh
//! jobs seed their caches on registration before relying on the periodic
//! cadence. Missed ticks (system sleep, long stalls) are skipped, not
//! backfilled.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error};

use crate::core::error::{AppResult, RuntimeError};

/// Timing snapshot for one scheduled job.
#[derive(Debug, Clone, Default)]
pub struct JobMetrics {
    /// Completed invocations, including the immediate first fire.
    pub runs: u64,
    /// Wall-clock duration of the most recent invocation.
    pub last_duration: Option<Duration>,
    /// Wall-clock timestamp (ms since epoch) of the most recent invocation.
    pub last_run_ms: Option<u128>,
    /// Projected next invocation time.
    pub next_run: Option<Instant>,
}

/// A periodic data source that knows its own refresh cadence.
///
/// The narrow contract periodic-job owners implement instead of hand-writing
/// a closure: the scheduler polls [`refresh`](Self::refresh) every
/// [`poll_interval`](Self::poll_interval).
#[async_trait]
pub trait Pollable: Send + Sync + 'static {
    /// How often [`refresh`](Self::refresh) should run.
    fn poll_interval(&self) -> Duration;

    /// Refresh the source; `elapsed` is the time since the previous call.
    async fn refresh(&self, elapsed: Duration) -> AppResult<()>;
}

struct ScheduledJob {
    handle: JoinHandle<()>,
    interval: Duration,
}

/// Registry of named periodic callbacks.
///
/// At most one active job per name: re-registering a name atomically
/// replaces the prior job with no window where both fire. The scheduler's
/// timing loops never perform real work; callbacks must return quickly and
/// delegate to a task queue.
#[derive(Default)]
pub struct PollScheduler {
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    metrics: Arc<Mutex<HashMap<String, JobMetrics>>>,
}

impl PollScheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` to run every `period`, firing once immediately.
    ///
    /// The callback receives the elapsed time since its previous invocation
    /// (near zero for the first fire). A failing callback is logged and the
    /// cadence continues; the timing loop never dies with the job.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidInterval`] if `period` is zero.
    pub fn schedule<F, Fut>(
        &self,
        name: &str,
        mut callback: F,
        period: Duration,
    ) -> Result<(), RuntimeError>
    where
        F: FnMut(Duration) -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        if period.is_zero() {
            return Err(RuntimeError::InvalidInterval(period));
        }

        let job_name = name.to_owned();
        let metrics = Arc::clone(&self.metrics);

        // Replace-and-insert happens under the registry lock, but abort()
        // only lands at the old runner's next yield point; a callback that
        // is mid-execution keeps going until then. The new runner waits the
        // predecessor out before its first fire so the old and new job for
        // a name never run concurrently.
        let mut jobs = self.jobs.lock();
        let predecessor = jobs.remove(name).map(|old| {
            old.handle.abort();
            debug!(job = name, "replacing scheduled job");
            old.handle
        });

        let runner = async move {
            if let Some(old) = predecessor {
                let _ = old.await;
            }
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last = Instant::now();
            loop {
                // First tick completes immediately: fire on registration.
                ticker.tick().await;
                let elapsed = last.elapsed();
                last = Instant::now();

                let started = Instant::now();
                if let Err(err) = callback(elapsed).await {
                    error!(job = %job_name, error = %err, "scheduled job failed");
                }

                let mut map = metrics.lock();
                if let Some(entry) = map.get_mut(&job_name) {
                    entry.runs += 1;
                    entry.last_duration = Some(started.elapsed());
                    entry.last_run_ms = Some(crate::util::now_ms());
                    entry.next_run = Some(last + period);
                }
            }
        };

        self.metrics.lock().insert(name.to_owned(), JobMetrics::default());
        jobs.insert(
            name.to_owned(),
            ScheduledJob {
                handle: tokio::spawn(runner),
                interval: period,
            },
        );
        Ok(())
    }

    /// Register a [`Pollable`] source under `name` at its own interval.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidInterval`] if the source reports a zero
    /// interval.
    pub fn register_source(
        &self,
        name: &str,
        source: Arc<dyn Pollable>,
    ) -> Result<(), RuntimeError> {
        let period = source.poll_interval();
        self.schedule(
            name,
            move |elapsed| {
                let source = Arc::clone(&source);
                async move { source.refresh(elapsed).await }
            },
            period,
        )
    }

    /// Unregister the named job. A no-op if the name is unknown.
    pub fn cancel(&self, name: &str) {
        if let Some(job) = self.jobs.lock().remove(name) {
            job.handle.abort();
            debug!(job = name, "cancelled scheduled job");
        }
        self.metrics.lock().remove(name);
    }

    /// Unregister every job.
    pub fn cancel_all(&self) {
        let names: Vec<String> = self.jobs.lock().keys().cloned().collect();
        for name in names {
            self.cancel(&name);
        }
    }

    /// True if a job is currently registered under `name`.
    #[must_use]
    pub fn is_scheduled(&self, name: &str) -> bool {
        self.jobs.lock().contains_key(name)
    }

    /// Configured interval of the named job, if registered.
    #[must_use]
    pub fn interval_of(&self, name: &str) -> Option<Duration> {
        self.jobs.lock().get(name).map(|job| job.interval)
    }

    /// Snapshot of timing metrics for every registered job.
    #[must_use]
    pub fn metrics(&self) -> HashMap<String, JobMetrics> {
        self.metrics.lock().clone()
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        for job in self.jobs.lock().values() {
            job.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(counter: &Arc<AtomicUsize>) -> impl FnMut(Duration) -> TestFut + Send {
        let counter = Arc::clone(counter);
        move |_elapsed| -> TestFut {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    type TestFut = std::pin::Pin<Box<dyn Future<Output = AppResult<()>> + Send>>;

    #[tokio::test]
    async fn fires_immediately_on_registration() {
        let scheduler = PollScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule("seed", counting_job(&count), Duration::from_secs(3600))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let metrics = scheduler.metrics();
        let seed = metrics.get("seed").unwrap();
        assert_eq!(seed.runs, 1);
        assert!(seed.last_duration.is_some());
        assert!(seed.last_run_ms.is_some());
        assert!(seed.next_run.is_some());
    }

    #[tokio::test]
    async fn fires_periodically_after_the_first_tick() {
        let scheduler = PollScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule("poll", counting_job(&count), Duration::from_millis(40))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(count.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn rescheduling_replaces_rather_than_duplicates() {
        let scheduler = PollScheduler::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        scheduler
            .schedule("refresh", counting_job(&first), Duration::from_millis(30))
            .unwrap();
        scheduler
            .schedule("refresh", counting_job(&second), Duration::from_millis(30))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        scheduler.cancel("refresh");

        let first_runs = first.load(Ordering::SeqCst);
        let second_runs = second.load(Ordering::SeqCst);
        // The replaced job stops firing; only the replacement keeps counting.
        assert!(first_runs <= 1);
        assert!(second_runs >= 2);
        assert!(!scheduler.is_scheduled("refresh"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn replacement_waits_out_a_mid_poll_predecessor() {
        let scheduler = PollScheduler::new();
        let old_end: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
        let new_start: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));

        let end = Arc::clone(&old_end);
        scheduler
            .schedule(
                "radio",
                move |_| {
                    let end = Arc::clone(&end);
                    async move {
                        // No yield point, so an abort cannot land mid-run.
                        std::thread::sleep(Duration::from_millis(200));
                        *end.lock() = Some(Instant::now());
                        Ok(())
                    }
                },
                Duration::from_secs(3600),
            )
            .unwrap();

        // Re-register while the first callback is mid-execution.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let start = Arc::clone(&new_start);
        scheduler
            .schedule(
                "radio",
                move |_| {
                    let start = Arc::clone(&start);
                    async move {
                        start.lock().get_or_insert_with(Instant::now);
                        Ok(())
                    }
                },
                Duration::from_secs(3600),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        scheduler.cancel("radio");

        let old_end = old_end.lock().expect("old callback ran to completion");
        let new_start = new_start.lock().expect("replacement fired");
        assert!(new_start >= old_end);
    }

    #[tokio::test]
    async fn cancel_unknown_name_is_a_noop() {
        let scheduler = PollScheduler::new();
        scheduler.cancel("never-registered");
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let scheduler = PollScheduler::new();
        let result = scheduler.schedule(
            "bad",
            |_| async { Ok(()) },
            Duration::ZERO,
        );
        assert!(matches!(result, Err(RuntimeError::InvalidInterval(_))));
        assert!(!scheduler.is_scheduled("bad"));
    }

    #[tokio::test]
    async fn failing_callback_keeps_the_cadence() {
        let scheduler = PollScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        scheduler
            .schedule(
                "flaky",
                move |_| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(anyhow::anyhow!("sensor read failed"))
                    }
                },
                Duration::from_millis(30),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(count.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn cancel_all_clears_every_job() {
        let scheduler = PollScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule("a", counting_job(&count), Duration::from_millis(500))
            .unwrap();
        scheduler
            .schedule("b", counting_job(&count), Duration::from_millis(500))
            .unwrap();

        scheduler.cancel_all();
        assert!(!scheduler.is_scheduled("a"));
        assert!(!scheduler.is_scheduled("b"));
        assert!(scheduler.metrics().is_empty());
    }

    struct FakeSensor {
        polls: AtomicUsize,
    }

    #[async_trait]
    impl Pollable for FakeSensor {
        fn poll_interval(&self) -> Duration {
            Duration::from_millis(40)
        }

        async fn refresh(&self, _elapsed: Duration) -> AppResult<()> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn register_source_polls_at_the_source_interval() {
        let scheduler = PollScheduler::new();
        let sensor = Arc::new(FakeSensor {
            polls: AtomicUsize::new(0),
        });
        scheduler
            .register_source("sensor", Arc::clone(&sensor) as Arc<dyn Pollable>)
            .unwrap();

        assert_eq!(
            scheduler.interval_of("sensor"),
            Some(Duration::from_millis(40))
        );
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(sensor.polls.load(Ordering::SeqCst) >= 3);
    }
}
