//! Queue workers.
//!
//! A [`Worker`] polls the queue, runs due jobs concurrently and settles each
//! attempt: success and skips complete the job, retriable failures re-queue
//! the next attempt with its backoff, and everything else hands the service
//! to an operator through [`jobs::on_exhausted`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use vps_lifecycle_store::Store;

use crate::error::{LifecycleError, Result};
use crate::jobs::{self, JobContext, JobOutcome};
use crate::queue::QueuedJob;
use crate::types::Job;

/// Smallest delay before a retry.
///
/// The queue keys jobs by due time and id, so a retry must not become due at
/// the same instant as the attempt it replaces.
const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How an attempt was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The job did its work.
    Completed,
    /// The job had nothing to do.
    Skipped(String),
    /// The attempt failed and the next one is queued.
    Retrying {
        /// 0-based number of the queued attempt.
        attempt: u32,
        /// Delay before it runs.
        delay: Duration,
    },
    /// The job failed for good.
    Abandoned(String),
}

/// Runs queued lifecycle jobs.
pub struct Worker<S: Store> {
    ctx: Arc<JobContext<S>>,
}

impl<S: Store + 'static> Worker<S> {
    /// Create a worker over a job context.
    #[must_use]
    pub fn new(ctx: Arc<JobContext<S>>) -> Self {
        Self { ctx }
    }

    /// Run one attempt of a queued job and settle it.
    ///
    /// The job is removed from the queue only after its retry or failure has
    /// been recorded, so a crash in between delivers it again.
    ///
    /// # Errors
    ///
    /// Returns an error if the retry or the failure cannot be recorded. The
    /// job then stays queued.
    pub async fn process(&self, queued: &QueuedJob) -> Result<Disposition> {
        let job = &queued.job;

        let disposition = match jobs::run(&self.ctx, job).await {
            Ok(JobOutcome::Completed) => Disposition::Completed,
            Ok(JobOutcome::Skipped(why)) => Disposition::Skipped(why),
            Err(e) => self.settle_failure(job, e).await?,
        };

        self.ctx.queue.complete(queued)?;
        Ok(disposition)
    }

    async fn settle_failure(&self, job: &Job, error: LifecycleError) -> Result<Disposition> {
        let delay = if error.is_retriable() {
            job.retry_delay()
        } else {
            None
        };

        match delay {
            Some(delay) => {
                let delay = delay.max(MIN_RETRY_DELAY);
                let next = job.next_attempt();
                let attempt = next.attempt;

                tracing::warn!(
                    job_id = %job.id,
                    job = %job.kind,
                    service_id = %job.service_id,
                    attempt = attempt + 1,
                    max_attempts = job.max_attempts,
                    retry_in_secs = delay.as_secs(),
                    error = %error,
                    "Lifecycle job failed, retrying"
                );

                self.ctx.queue.enqueue_delayed(next, delay)?;
                Ok(Disposition::Retrying { attempt, delay })
            }
            None => {
                jobs::on_exhausted(&self.ctx, job, &error).await?;
                Ok(Disposition::Abandoned(error.to_string()))
            }
        }
    }

    /// Fetch the jobs that are due and run them concurrently, up to the
    /// configured number of workers. Returns how many were settled.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub async fn run_once(self: &Arc<Self>) -> Result<usize> {
        let batch = self.ctx.queue.fetch_due(self.ctx.config.workers.max(1))?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut tasks = JoinSet::new();
        for queued in batch {
            let worker = Arc::clone(self);
            tasks.spawn(async move {
                let result = worker.process(&queued).await;
                (queued, result)
            });
        }

        let mut settled = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => settled += 1,
                Ok((queued, Err(e))) => {
                    tracing::error!(
                        job_id = %queued.job.id,
                        service_id = %queued.job.service_id,
                        error = %e,
                        "Could not settle lifecycle job, it stays queued"
                    );
                }
                Err(e) => tracing::error!(error = %e, "Lifecycle job task panicked"),
            }
        }

        Ok(settled)
    }

    /// Poll the queue until `shutdown` turns true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.ctx.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            workers = self.ctx.config.workers,
            poll_interval_ms = self.ctx.config.poll_interval_ms,
            "Lifecycle worker started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::warn!(error = %e, "Failed to poll job queue");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Lifecycle worker stopped");
    }
}
