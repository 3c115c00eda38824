//! Terminate: take a final backup, delete the VM, schedule cleanup.

use vps_lifecycle_hypervisor::final_backup_name;
use vps_lifecycle_store::{Service, ServiceStatus, Store};

use super::{best_effort, JobContext, JobOutcome};
use crate::clock;
use crate::error::Result;
use crate::lifecycle;
use crate::notify::Severity;
use crate::types::{Job, JobKind, JobRequest};

pub(super) async fn run<S: Store>(
    ctx: &JobContext<S>,
    job: &Job,
    mut service: Service,
    create_backup: bool,
) -> Result<JobOutcome> {
    let spec = lifecycle::transition_spec(job.kind);
    if !spec.accepts(service.status) {
        return Ok(JobOutcome::Skipped(format!("service is {}", service.status)));
    }

    // Paid up and still active: the overdue termination no longer applies
    if service.status == ServiceStatus::Active && job.reason.is_overdue() {
        let cutoff = clock::before(ctx.clock.now(), ctx.config.extended_overdue());
        let overdue = ctx
            .billing
            .count_unpaid_due_before(service.service_id, cutoff, None)
            .await?;
        if overdue == 0 {
            return Ok(JobOutcome::Skipped(
                "service was reactivated after payment".to_string(),
            ));
        }
    }

    let uuid = match ctx.resolve_vm(&service).await {
        Ok(uuid) => Some(uuid),
        Err(e) if e.is_not_found() => {
            tracing::info!(
                service_id = %service.service_id,
                "No VM found for service, treating it as already deleted"
            );
            None
        }
        Err(e) => return Err(e.into()),
    };

    let mut backup = None;
    if let (Some(uuid), true) = (&uuid, create_backup) {
        let taken_at = ctx.clock.now();
        let name = final_backup_name(taken_at);
        let description = format!("Final backup before termination: {}", job.reason);
        let created = ctx
            .control_plane
            .create_snapshot(uuid, &name, &description)
            .await;
        if best_effort(service.service_id, "final backup", created).is_some() {
            tracing::info!(service_id = %service.service_id, snapshot = %name, "Final backup created");
            backup = Some((name, taken_at));
        }
    }

    if let Some(uuid) = &uuid {
        ctx.control_plane.delete_vm(uuid, true).await?;
    }

    let now = ctx.clock.now();
    if let Some(uuid) = uuid {
        service.hypervisor_ref.get_or_insert(uuid);
    }
    service.config.terminated_at = Some(now);
    service.config.terminate_reason = Some(job.reason.to_string());
    service.config.last_error = None;
    if let Some((name, taken_at)) = &backup {
        service.config.final_backup_snapshot = Some(name.clone());
        service.config.final_backup_created_at = Some(*taken_at);
    }
    ctx.commit(&mut service, ServiceStatus::Terminated)?;

    let backup_note = if backup.is_some() {
        " A final backup was created for recovery purposes."
    } else {
        ""
    };
    ctx.notify_owner(
        &service,
        "VPS Service Terminated",
        format!(
            "Your VPS '{}' has been terminated due to: {}.{backup_note}",
            service.product_name, job.reason
        ),
        Severity::Error,
    )
    .await;

    let cleanup = ctx.job(JobRequest::new(
        JobKind::Cleanup,
        service.service_id,
        job.reason.clone(),
    ));
    let cleanup_id = cleanup.id;
    if best_effort(
        service.service_id,
        "schedule cleanup",
        ctx.queue.enqueue_delayed(cleanup, ctx.config.cleanup_delay()),
    )
    .is_some()
    {
        tracing::info!(
            service_id = %service.service_id,
            job_id = %cleanup_id,
            delay_days = ctx.config.cleanup_delay_days,
            "Cleanup scheduled"
        );
    }

    Ok(JobOutcome::Completed)
}
