//! Unsuspend: power the VM back on and mark the service active.

use vps_lifecycle_hypervisor::VmAction;
use vps_lifecycle_store::{Service, ServiceStatus, Store};

use super::{JobContext, JobOutcome};
use crate::error::Result;
use crate::lifecycle;
use crate::notify::Severity;
use crate::types::{Job, JobKind, TransitionReason};

pub(super) async fn run<S: Store>(
    ctx: &JobContext<S>,
    job: &Job,
    mut service: Service,
) -> Result<JobOutcome> {
    let spec = lifecycle::transition_spec(job.kind);
    let start_only = starts_only(job, &service);

    if !start_only && !spec.accepts(service.status) {
        return Ok(JobOutcome::Skipped(format!("service is {}", service.status)));
    }

    let uuid = ctx.resolve_vm(&service).await?;
    ctx.control_plane.vm_action(&uuid, VmAction::Start).await?;

    service.hypervisor_ref.get_or_insert(uuid);
    service.config.last_error = None;
    ctx.commit(&mut service, spec.success)?;

    ctx.notify_owner(
        &service,
        "VPS Service Reactivated",
        format!("Your VPS '{}' is running again.", service.product_name),
        Severity::Success,
    )
    .await;

    Ok(JobOutcome::Completed)
}

/// A payment already set the record active; only the VM is left to start.
pub(super) fn starts_only(job: &Job, service: &Service) -> bool {
    job.kind == JobKind::Unsuspend
        && job.reason == TransitionReason::PaymentReceived
        && service.status == ServiceStatus::Active
}
