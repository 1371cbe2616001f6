//! Recurring and delayed jobs.
//!
//! Jobs are synchronous closures. Each run happens on the blocking pool,
//! one at a time across the whole scheduler, so a job never overlaps
//! another. A failing or panicking job is logged and does not affect the
//! scheduler or other jobs.

use crate::error::{SchedulerError, ServiceError};
use chrono::Local;
use dashmap::DashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

/// Identifier of a scheduled job.
pub type JobId = u64;

type Job = Arc<dyn Fn() -> Result<(), ServiceError> + Send + Sync>;

/// Owned scheduler handle. Clones share the same jobs.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    handle: Handle,
    jobs: DashMap<JobId, JoinHandle<()>>,
    next_id: AtomicU64,
    run_lock: Mutex<()>,
    running: AtomicBool,
}

impl Scheduler {
    /// Creates a running scheduler spawning onto `handle`.
    pub fn new(handle: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                handle,
                jobs: DashMap::new(),
                next_id: AtomicU64::new(1),
                run_lock: Mutex::new(()),
                running: AtomicBool::new(true),
            }),
        }
    }

    /// Creates a scheduler on the current tokio runtime.
    pub fn current() -> Result<Self, SchedulerError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| SchedulerError::NoRuntime(e.to_string()))
    }

    /// Runs `job` on every tick of a cron expression (local time).
    pub fn every<F>(&self, name: &str, expression: &str, job: F) -> Result<JobId, SchedulerError>
    where
        F: Fn() -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.ensure_running()?;
        let schedule = parse_cron(expression)?;
        if schedule.upcoming(Local).next().is_none() {
            return Err(SchedulerError::NoUpcomingRun(expression.to_string()));
        }

        let job: Job = Arc::new(job);
        let name = name.to_string();
        let inner = Arc::clone(&self.inner);

        let id = self.spawn(move |id| async move {
            tracing::debug!("Recurring job {} ({}) scheduled", name, id);
            loop {
                let next = match schedule.upcoming(Local).next() {
                    Some(next) => next,
                    None => break,
                };
                let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;
                run_job(&inner, &name, &job).await;
            }
            inner.jobs.remove(&id);
        });

        tracing::info!("Scheduled recurring job {} ({})", expression, id);
        Ok(id)
    }

    /// Runs `job` once after `delay`.
    pub fn after<F>(&self, name: &str, delay: Duration, job: F) -> Result<JobId, SchedulerError>
    where
        F: Fn() -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.ensure_running()?;

        let job: Job = Arc::new(job);
        let name = name.to_string();
        let inner = Arc::clone(&self.inner);

        let id = self.spawn(move |id| async move {
            tokio::time::sleep(delay).await;
            run_job(&inner, &name, &job).await;
            inner.jobs.remove(&id);
        });

        tracing::debug!("Scheduled job {} in {:?}", id, delay);
        Ok(id)
    }

    /// Cancels one job. Returns whether it was still pending.
    pub fn cancel(&self, id: JobId) -> bool {
        match self.inner.jobs.remove(&id) {
            Some((_, task)) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Cancels every pending job.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<JobId> = self.inner.jobs.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// Cancels everything, then accepts new jobs again.
    pub fn restart(&self) {
        self.cancel_all();
        self.inner.running.store(true, Ordering::SeqCst);
    }

    /// Cancels everything and refuses new jobs until [`Scheduler::restart`].
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let cancelled = self.cancel_all();
        tracing::info!("Scheduler stopped ({} jobs cancelled)", cancelled);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Number of jobs not yet finished or cancelled.
    pub fn pending(&self) -> usize {
        self.inner.jobs.len()
    }

    fn ensure_running(&self) -> Result<(), SchedulerError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(SchedulerError::Stopped)
        }
    }

    /// Spawns a job task and registers it before the task may start.
    fn spawn<F, Fut>(&self, make: F) -> JobId
    where
        F: FnOnce(JobId) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let body = make(id);

        let task = self.inner.handle.spawn(async move {
            if registered_rx.await.is_err() {
                return;
            }
            body.await;
        });

        self.inner.jobs.insert(id, task);
        let _ = registered_tx.send(());
        id
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run_job(inner: &Inner, name: &str, job: &Job) {
    let _serial = inner.run_lock.lock().await;
    let job = Arc::clone(job);

    match tokio::task::spawn_blocking(move || job()).await {
        Ok(Ok(())) => tracing::debug!("Job {} finished", name),
        Ok(Err(e)) => tracing::warn!("Job {} failed [{}]: {}", name, e.error_code(), e),
        Err(e) if e.is_panic() => tracing::warn!("Job {} panicked", name),
        Err(e) => tracing::warn!("Job {} did not complete: {}", name, e),
    }
}

/// Parses a five-field (minute precision) or six/seven-field cron expression.
pub fn parse_cron(expression: &str) -> Result<cron::Schedule, SchedulerError> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };

    cron::Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use casegraph_core::CoreError;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn test_parse_cron() {
        assert!(parse_cron("0 0 * * *").is_ok());
        assert!(parse_cron("*/5 * * * * *").is_ok());
        assert!(matches!(
            parse_cron("not a cron"),
            Err(SchedulerError::InvalidCron { .. })
        ));
    }

    #[test]
    fn test_daily_cron_runs_at_midnight() {
        let schedule = parse_cron("0 0 * * *").unwrap();
        let next = schedule.upcoming(Local).next().unwrap();
        assert_eq!(next.format("%H:%M:%S").to_string(), "00:00:00");
    }

    #[tokio::test]
    async fn test_after_runs_once() {
        let scheduler = Scheduler::current().unwrap();
        let runs = counter();
        let seen = Arc::clone(&runs);

        scheduler
            .after("once", Duration::from_millis(10), move || {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_every_runs_repeatedly() {
        let scheduler = Scheduler::current().unwrap();
        let runs = counter();
        let seen = Arc::clone(&runs);

        scheduler
            .every("tick", "* * * * * *", move || {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(2300)).await;
        assert!(runs.load(Ordering::SeqCst) >= 2);
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_failing_job_does_not_stop_others() {
        let scheduler = Scheduler::current().unwrap();
        let runs = counter();
        let seen = Arc::clone(&runs);

        scheduler
            .after("fails", Duration::from_millis(5), || {
                Err(ServiceError::Core(CoreError::Callback {
                    reason: "boom".to_string(),
                }))
            })
            .unwrap();
        scheduler
            .after("panics", Duration::from_millis(5), || panic!("job panicked"))
            .unwrap();
        scheduler
            .after("succeeds", Duration::from_millis(20), move || {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
        assert!(scheduler.is_running());
    }

    #[tokio::test]
    async fn test_cancel_and_stop() {
        let scheduler = Scheduler::current().unwrap();
        let runs = counter();

        let seen = Arc::clone(&runs);
        let id = scheduler
            .after("cancelled", Duration::from_millis(50), move || {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));

        let seen = Arc::clone(&runs);
        scheduler
            .after("stopped", Duration::from_millis(50), move || {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        scheduler.stop();

        assert!(matches!(
            scheduler.after("late", Duration::ZERO, || Ok(())),
            Err(SchedulerError::Stopped)
        ));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        scheduler.restart();
        assert!(scheduler.is_running());
        assert!(scheduler.after("again", Duration::ZERO, || Ok(())).is_ok());
    }

    #[tokio::test]
    async fn test_jobs_do_not_overlap() {
        let scheduler = Scheduler::current().unwrap();
        let active = counter();
        let overlapped = Arc::new(AtomicBool::new(false));

        for _ in 0..3 {
            let active = Arc::clone(&active);
            let overlapped = Arc::clone(&overlapped);
            scheduler
                .after("serial", Duration::from_millis(5), move || {
                    if active.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlapped.store(true, Ordering::SeqCst);
                    }
                    std::thread::sleep(Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!overlapped.load(Ordering::SeqCst));
        assert_eq!(scheduler.pending(), 0);
    }
}
