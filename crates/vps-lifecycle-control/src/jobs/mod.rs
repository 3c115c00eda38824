//! Lifecycle jobs.
//!
//! Every job starts by re-reading the service and checking that it is still
//! in one of the statuses its [`TransitionSpec`](crate::lifecycle::TransitionSpec)
//! accepts. A job that finds nothing to do reports [`JobOutcome::Skipped`],
//! which counts as success. This makes repeated delivery safe.
//!
//! Inside a job, hypervisor state changes and status writes are propagated
//! with `?` and decide the outcome. Backups, notifications and snapshot
//! pruning go through [`best_effort`], which can only log.

mod cleanup;
mod suspend;
mod terminate;
mod unsuspend;

use std::fmt::Display;
use std::sync::Arc;

use vps_lifecycle_core::ServiceId;
use vps_lifecycle_hypervisor::{vm_name, ControlPlaneClient, ControlPlaneError};
use vps_lifecycle_store::{ChangeOrigin, Service, ServiceStatus, StatusChanged, Store};

use crate::billing::BillingLedger;
use crate::clock::Clock;
use crate::config::LifecycleConfig;
use crate::error::{LifecycleError, Result};
use crate::lifecycle;
use crate::notify::{self, Notification, Notifier, Severity};
use crate::queue::JobQueue;
use crate::types::{Job, JobKind, JobRequest};

/// Everything a job needs to run.
pub struct JobContext<S: Store> {
    /// Service records.
    pub store: Arc<S>,
    /// Hypervisor control plane.
    pub control_plane: Arc<dyn ControlPlaneClient>,
    /// Invoice queries.
    pub billing: Arc<dyn BillingLedger>,
    /// Owner notifications.
    pub notifier: Arc<dyn Notifier>,
    /// Queue for follow-up jobs and retries.
    pub queue: Arc<dyn JobQueue>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Settings.
    pub config: LifecycleConfig,
}

/// How a job attempt ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job did its work.
    Completed,
    /// The guard found nothing to do.
    Skipped(String),
}

impl<S: Store> JobContext<S> {
    /// Build a job from a request using the configured retry policy.
    #[must_use]
    pub fn job(&self, request: JobRequest) -> Job {
        let policy = self.config.retry_policy(request.kind);
        Job::new(request, policy)
    }

    fn load(&self, service_id: ServiceId) -> Result<Service> {
        self.store
            .get_service(service_id)?
            .ok_or(LifecycleError::ServiceNotFound(service_id))
    }

    /// Record a new status for a service on behalf of a job.
    fn commit(&self, service: &mut Service, status: ServiceStatus) -> Result<StatusChanged> {
        lifecycle::record_status(
            self.store.as_ref(),
            service,
            status,
            ChangeOrigin::Job,
            self.clock.now(),
        )
    }

    /// Find the control-plane uuid of a service's VM.
    ///
    /// Uses the recorded reference when there is one, otherwise looks the VM
    /// up by its generated name.
    async fn resolve_vm(&self, service: &Service) -> std::result::Result<String, ControlPlaneError> {
        if let Some(uuid) = &service.hypervisor_ref {
            return Ok(uuid.clone());
        }
        let name = service
            .config
            .vm_name
            .clone()
            .unwrap_or_else(|| vm_name(service.service_id, &service.product_name));
        self.control_plane
            .find_vm_by_name(&name)
            .await
            .map(|vm| vm.uuid)
    }

    async fn notify_owner(
        &self,
        service: &Service,
        title: &str,
        message: String,
        severity: Severity,
    ) {
        let notification = Notification {
            user_id: service.user_id,
            service_id: service.service_id,
            title: title.to_string(),
            message,
            severity,
            action_url: self.config.service_url(service.service_id),
        };
        notify::dispatch(self.notifier.as_ref(), &notification).await;
    }
}

/// Log and discard the error of a side effect that must not fail the job.
pub fn best_effort<T, E: Display>(
    service_id: ServiceId,
    action: &str,
    result: std::result::Result<T, E>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(service_id = %service_id, action, error = %e, "Best-effort step failed");
            None
        }
    }
}

/// Run one attempt of a job.
///
/// # Errors
///
/// Returns the error of the first must-succeed step that failed.
pub async fn run<S: Store>(ctx: &JobContext<S>, job: &Job) -> Result<JobOutcome> {
    tracing::debug!(
        job_id = %job.id,
        job = %job.kind,
        service_id = %job.service_id,
        attempt = job.attempt,
        tags = ?job.tags(),
        "Running lifecycle job"
    );

    let service = match ctx.load(job.service_id) {
        Ok(service) => service,
        Err(LifecycleError::ServiceNotFound(id)) => {
            return Ok(JobOutcome::Skipped(format!("service {id} no longer exists")));
        }
        Err(e) => return Err(e),
    };

    let outcome = match job.kind {
        JobKind::Suspend => suspend::run(ctx, job, service).await?,
        JobKind::Unsuspend => unsuspend::run(ctx, job, service).await?,
        JobKind::Terminate { create_backup } => {
            terminate::run(ctx, job, service, create_backup).await?
        }
        JobKind::Cleanup => cleanup::run(ctx, job, service).await?,
    };

    match &outcome {
        JobOutcome::Completed => tracing::info!(
            job_id = %job.id,
            job = %job.kind,
            service_id = %job.service_id,
            reason = %job.reason,
            "Lifecycle job completed"
        ),
        JobOutcome::Skipped(why) => tracing::info!(
            job_id = %job.id,
            job = %job.kind,
            service_id = %job.service_id,
            skipped = %why,
            "Lifecycle job skipped"
        ),
    }

    Ok(outcome)
}

/// Hand a service to an operator after its job ran out of attempts.
///
/// Records the last error and, where the job declares one, the failure
/// status. The owner is told only while the service is still in a status
/// the job acts on; a service that has moved on meanwhile keeps its status
/// and gets no failure notice.
///
/// # Errors
///
/// Returns an error if the service record cannot be updated.
pub async fn on_exhausted<S: Store>(
    ctx: &JobContext<S>,
    job: &Job,
    error: &LifecycleError,
) -> Result<()> {
    tracing::error!(
        job_id = %job.id,
        job = %job.kind,
        service_id = %job.service_id,
        attempts = job.attempt + 1,
        error = %error,
        "Lifecycle job abandoned, operator attention required"
    );

    let Some(mut service) = ctx.store.get_service(job.service_id)? else {
        return Ok(());
    };

    let spec = lifecycle::transition_spec(job.kind);
    let applies = spec.accepts(service.status) || unsuspend::starts_only(job, &service);
    service.config.last_error = Some(error.to_string());

    let status = match spec.failure {
        Some(failure) if spec.accepts(service.status) => failure,
        _ => service.status,
    };
    ctx.commit(&mut service, status)?;

    if !applies {
        tracing::info!(
            job_id = %job.id,
            service_id = %job.service_id,
            status = %service.status,
            "Service moved on, no failure notice sent"
        );
        return Ok(());
    }

    let (title, message) = match job.kind {
        JobKind::Suspend => (
            "VPS Suspension Failed",
            format!(
                "We could not suspend your VPS '{}' ({}). Our team has been notified.",
                service.product_name, job.reason
            ),
        ),
        JobKind::Unsuspend => (
            "VPS Reactivation Failed",
            format!(
                "We could not restart your VPS '{}'. Our team has been notified and will bring it back online.",
                service.product_name
            ),
        ),
        JobKind::Terminate { .. } => (
            "VPS Termination Failed",
            format!(
                "We could not terminate your VPS '{}' ({}). Our team has been notified.",
                service.product_name, job.reason
            ),
        ),
        JobKind::Cleanup => return Ok(()),
    };
    ctx.notify_owner(&service, title, message, Severity::Error).await;

    Ok(())
}
