//! Job queue with delayed scheduling.
//!
//! Delivery is at-least-once: [`JobQueue::fetch_due`] leaves jobs in place
//! and a job disappears only when [`JobQueue::complete`] is called after its
//! attempt has been handled.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use vps_lifecycle_store::{PendingJob, Store};

use crate::clock::{self, Clock};
use crate::error::{LifecycleError, Result};
use crate::types::Job;

/// A job together with the time it became due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    /// The job.
    pub job: Job,
    /// Earliest time it may run.
    pub due_at: DateTime<Utc>,
}

/// Injected queue interface used by the observer, the jobs and the workers.
pub trait JobQueue: Send + Sync {
    /// Queue a job to run as soon as possible.
    ///
    /// # Errors
    ///
    /// Returns an error if the job cannot be stored.
    fn enqueue(&self, job: Job) -> Result<()> {
        self.enqueue_delayed(job, Duration::ZERO)
    }

    /// Queue a job to run no earlier than `delay` from now.
    ///
    /// # Errors
    ///
    /// Returns an error if the job cannot be stored.
    fn enqueue_delayed(&self, job: Job, delay: Duration) -> Result<()>;

    /// Up to `limit` jobs that are due now, earliest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    fn fetch_due(&self, limit: usize) -> Result<Vec<QueuedJob>>;

    /// Remove a job whose attempt has been handled.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be updated.
    fn complete(&self, queued: &QueuedJob) -> Result<()>;

    /// Number of queued jobs, due or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    fn len(&self) -> Result<usize>;

    /// Returns true if nothing is queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

// =============================================================================
// In-memory queue
// =============================================================================

/// A queue held in memory. Jobs are lost on restart.
pub struct MemoryJobQueue {
    jobs: Mutex<Vec<QueuedJob>>,
    clock: Arc<dyn Clock>,
}

impl MemoryJobQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            clock,
        }
    }

    /// Every queued job, earliest first.
    #[must_use]
    pub fn scheduled(&self) -> Vec<QueuedJob> {
        self.jobs.lock().clone()
    }
}

impl JobQueue for MemoryJobQueue {
    fn enqueue_delayed(&self, job: Job, delay: Duration) -> Result<()> {
        let due_at = clock::after(self.clock.now(), delay);
        let mut jobs = self.jobs.lock();
        let position = jobs.partition_point(|q| q.due_at <= due_at);
        jobs.insert(position, QueuedJob { job, due_at });
        Ok(())
    }

    fn fetch_due(&self, limit: usize) -> Result<Vec<QueuedJob>> {
        let now = self.clock.now();
        Ok(self
            .jobs
            .lock()
            .iter()
            .take_while(|q| q.due_at <= now)
            .take(limit)
            .cloned()
            .collect())
    }

    fn complete(&self, queued: &QueuedJob) -> Result<()> {
        self.jobs
            .lock()
            .retain(|q| !(q.job.id == queued.job.id && q.due_at == queued.due_at));
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.jobs.lock().len())
    }
}

// =============================================================================
// Durable queue
// =============================================================================

/// A queue persisted in the store's pending-job column family, so delayed
/// jobs survive restarts.
pub struct StoreJobQueue<S: Store> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> StoreJobQueue<S> {
    /// Create a queue on top of a store.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn encode(job: &Job) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(job, &mut buf).map_err(|e| LifecycleError::Codec(e.to_string()))?;
        Ok(buf)
    }

    fn decode(data: &[u8]) -> Result<Job> {
        ciborium::from_reader(data).map_err(|e| LifecycleError::Codec(e.to_string()))
    }
}

impl<S: Store> JobQueue for StoreJobQueue<S> {
    fn enqueue_delayed(&self, job: Job, delay: Duration) -> Result<()> {
        let record = PendingJob {
            job_id: job.id,
            due_at: clock::after(self.clock.now(), delay),
            payload: Self::encode(&job)?,
        };
        self.store.put_pending_job(&record)?;
        Ok(())
    }

    fn fetch_due(&self, limit: usize) -> Result<Vec<QueuedJob>> {
        let records = self.store.due_pending_jobs(self.clock.now(), limit)?;

        let mut due = Vec::with_capacity(records.len());
        for record in records {
            match Self::decode(&record.payload) {
                Ok(job) => due.push(QueuedJob {
                    job,
                    due_at: record.due_at,
                }),
                Err(e) => {
                    // An undecodable record would otherwise block the head of the queue
                    tracing::error!(job_id = %record.job_id, error = %e, "Dropping corrupt job");
                    self.store.delete_pending_job(record.due_at, &record.job_id)?;
                }
            }
        }
        Ok(due)
    }

    fn complete(&self, queued: &QueuedJob) -> Result<()> {
        self.store
            .delete_pending_job(queued.due_at, &queued.job.id)?;
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.store.count_pending_jobs()?)
    }
}
