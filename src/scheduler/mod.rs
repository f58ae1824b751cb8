// Cron-driven job registry: per-job mutual exclusion, wall-clock budget, failures reported.

use chrono::{DateTime, TimeZone, Utc};
use cron::Schedule;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::json;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{PanelError, Result};
use crate::models::{NotificationKind, ScheduledJob};
use crate::notifier::Notifier;

/// A job body. The returned string is a one-line summary for the log.
pub type JobHandler = Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Boxes an async closure into a `JobHandler`.
pub fn handler<F, Fut>(f: F) -> JobHandler
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Parses a cron expression. Five-field (minute-first) expressions get a `0` seconds field.
pub fn parse_schedule(expr: &str) -> std::result::Result<Schedule, cron::error::Error> {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        Schedule::from_str(&format!("0 {}", trimmed))
    } else {
        Schedule::from_str(trimmed)
    }
}

#[derive(Debug, Default)]
struct JobState {
    last_run: Option<DateTime<Utc>>,
    running: bool,
}

struct Job {
    name: String,
    expression: String,
    schedule: Schedule,
    budget: Duration,
    handler: JobHandler,
    state: Mutex<JobState>,
}

impl Job {
    fn lock(&self) -> std::sync::MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_due(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.schedule
            .after(&since)
            .next()
            .is_some_and(|next| next <= now)
    }

    /// Sets `running` unless already set. Returns false when the job is busy.
    fn try_start(&self) -> bool {
        let mut state = self.lock();
        if state.running {
            return false;
        }
        state.running = true;
        true
    }
}

/// Clears `running` even if the job body panics.
struct RunGuard(Arc<Job>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.lock().running = false;
    }
}

pub struct Scheduler {
    jobs: RwLock<Vec<Arc<Job>>>,
    last_tick: Mutex<DateTime<Utc>>,
    notifier: Arc<Notifier>,
}

impl Scheduler {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self {
            jobs: RwLock::new(Vec::new()),
            last_tick: Mutex::new(Utc::now()),
            notifier,
        }
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        expression: &str,
        budget: Duration,
        handler: JobHandler,
    ) -> Result<()> {
        let name = name.into();
        let schedule = parse_schedule(expression).map_err(|e| {
            PanelError::Validation(format!("invalid cron expression {:?}: {}", expression, e))
        })?;
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.iter().any(|j| j.name == name) {
            return Err(PanelError::Conflict(format!("job {} already registered", name)));
        }
        tracing::info!(job = %name, schedule = %expression, "scheduled job registered");
        jobs.push(Arc::new(Job {
            name,
            expression: expression.to_string(),
            schedule,
            budget,
            handler,
            state: Mutex::new(JobState::default()),
        }));
        Ok(())
    }

    pub fn jobs(&self) -> Vec<ScheduledJob> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.iter()
            .map(|job| {
                let state = job.lock();
                ScheduledJob {
                    name: job.name.clone(),
                    cron_expression: job.expression.clone(),
                    last_run: state.last_run,
                    running: state.running,
                }
            })
            .collect()
    }

    /// Starts every job due in `(last tick, now]`. Busy jobs are skipped, not queued.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<JoinHandle<Result<String>>> {
        let since = {
            let mut last = self.last_tick.lock().unwrap_or_else(PoisonError::into_inner);
            let since = *last;
            *last = now;
            since
        };
        let due: Vec<Arc<Job>> = {
            let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
            jobs.iter()
                .filter(|job| job.is_due(since, now))
                .cloned()
                .collect()
        };
        due.into_iter()
            .filter_map(|job| self.start(job))
            .collect()
    }

    /// Runs `name` now, outside its schedule. `Ok(None)` when it is already running.
    pub fn trigger(&self, name: &str) -> Result<Option<JoinHandle<Result<String>>>> {
        let job = {
            let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
            jobs.iter().find(|j| j.name == name).cloned()
        };
        let job = job.ok_or_else(|| PanelError::NotFound(format!("job {}", name)))?;
        Ok(self.start(job))
    }

    fn start(&self, job: Arc<Job>) -> Option<JoinHandle<Result<String>>> {
        if !job.try_start() {
            tracing::debug!(job = %job.name, "job still running; tick skipped");
            return None;
        }
        let notifier = self.notifier.clone();
        Some(tokio::spawn(async move {
            let guard = RunGuard(job.clone());
            tracing::debug!(job = %job.name, "job started");

            // Dropping the timed-out future kills any child processes it owns.
            let run = AssertUnwindSafe((job.handler)()).catch_unwind();
            let result = match tokio::time::timeout(job.budget, run).await {
                Ok(Ok(result)) => result,
                Ok(Err(payload)) => Err(PanelError::Panicked {
                    task: format!("job {}", job.name),
                    message: panic_message(payload.as_ref()),
                }),
                Err(_) => Err(PanelError::Timeout(format!("job {}", job.name))),
            };

            match &result {
                Ok(summary) => tracing::info!(job = %job.name, summary = %summary, "job completed"),
                Err(e) => {
                    tracing::error!(job = %job.name, error = %e, kind = e.kind(), "job failed");
                    notifier
                        .emit(
                            NotificationKind::Error,
                            format!("Scheduled job {} failed", job.name),
                            json!({ "job": job.name, "kind": e.kind(), "error": e.to_string() }),
                        )
                        .await;
                }
            }
            job.lock().last_run = Some(Utc::now());
            drop(guard);
            result
        }))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}

/// Time until the next multiple of `resolution` since the epoch, so ticks do not drift.
pub fn until_next_boundary(now: DateTime<Utc>, resolution: Duration) -> Duration {
    let step = resolution.as_millis().max(1) as i64;
    let now_ms = now.timestamp_millis();
    let next = (now_ms.div_euclid(step) + 1) * step;
    Duration::from_millis((next - now_ms) as u64)
}

/// Drives `scheduler.tick` on `resolution` boundaries until `shutdown_rx` fires.
pub fn spawn(
    scheduler: Arc<Scheduler>,
    resolution: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(resolution_secs = resolution.as_secs(), "scheduler started");
        loop {
            let wait = until_next_boundary(Utc::now(), resolution);
            tokio::select! {
                _ = &mut shutdown_rx => {
                    tracing::info!("scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    let started = scheduler.tick(Utc::now());
                    if !started.is_empty() {
                        tracing::debug!(jobs = started.len(), "scheduler tick");
                    }
                }
            }
        }
    })
}

/// Next fire time of `expression` after `after`, for display and tests.
pub fn next_fire<Tz: TimeZone>(expression: &str, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    parse_schedule(expression).ok()?.after(after).next()
}
