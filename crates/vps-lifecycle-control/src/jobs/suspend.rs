//! Suspend: power the VM off and mark the service suspended.

use vps_lifecycle_hypervisor::VmAction;
use vps_lifecycle_store::{Service, ServiceStatus, Store};

use super::{JobContext, JobOutcome};
use crate::error::Result;
use crate::lifecycle;
use crate::notify::Severity;
use crate::types::{Job, TransitionReason};

pub(super) async fn run<S: Store>(
    ctx: &JobContext<S>,
    job: &Job,
    mut service: Service,
) -> Result<JobOutcome> {
    let spec = lifecycle::transition_spec(job.kind);
    if !spec.accepts(service.status) {
        return Ok(JobOutcome::Skipped(format!("service is {}", service.status)));
    }

    // The customer may have paid between enqueue and now
    if job.reason == TransitionReason::PaymentOverdue {
        let overdue = ctx
            .billing
            .count_unpaid_due_before(service.service_id, ctx.clock.now(), None)
            .await?;
        if overdue == 0 {
            return Ok(JobOutcome::Skipped("no overdue invoices remain".to_string()));
        }
    }

    let uuid = ctx.resolve_vm(&service).await?;
    ctx.control_plane.vm_action(&uuid, VmAction::Stop).await?;

    let now = ctx.clock.now();
    service.hypervisor_ref.get_or_insert(uuid);
    service.config.suspended_at = Some(now);
    service.config.suspend_reason = Some(job.reason.to_string());
    service.config.last_error = None;
    ctx.commit(&mut service, ServiceStatus::Suspended)?;

    ctx.notify_owner(
        &service,
        "VPS Service Suspended",
        format!(
            "Your VPS '{}' has been suspended due to: {}. Please pay any outstanding invoices to reactivate your service.",
            service.product_name, job.reason
        ),
        Severity::Warning,
    )
    .await;

    Ok(JobOutcome::Completed)
}
