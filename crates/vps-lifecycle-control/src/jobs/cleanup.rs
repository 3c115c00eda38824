//! Cleanup: prune old snapshots of a terminated service and scrub its record.

use vps_lifecycle_store::{Service, Store};

use super::{best_effort, JobContext, JobOutcome};
use crate::clock;
use crate::error::Result;
use crate::lifecycle;
use crate::types::Job;

pub(super) async fn run<S: Store>(
    ctx: &JobContext<S>,
    job: &Job,
    mut service: Service,
) -> Result<JobOutcome> {
    let spec = lifecycle::transition_spec(job.kind);
    if !spec.accepts(service.status) {
        return Ok(JobOutcome::Skipped(format!("service is {}", service.status)));
    }

    let deleted = match ctx.resolve_vm(&service).await {
        Ok(uuid) => prune_snapshots(ctx, &service, &uuid).await?,
        Err(e) if e.is_not_found() => 0,
        Err(e) => return Err(e.into()),
    };

    service.config = service.config.scrubbed();
    service.updated_at = ctx.clock.now();
    ctx.store.put_service(&service)?;

    tracing::info!(
        service_id = %service.service_id,
        snapshots_deleted = deleted,
        "VPS cleanup finished"
    );

    Ok(JobOutcome::Completed)
}

/// Delete snapshots older than the retention window, except the final backup.
/// Returns how many were deleted.
async fn prune_snapshots<S: Store>(
    ctx: &JobContext<S>,
    service: &Service,
    uuid: &str,
) -> Result<usize> {
    let snapshots = match ctx.control_plane.list_snapshots(uuid).await {
        Ok(snapshots) => snapshots,
        Err(e) if e.is_not_found() => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let cutoff = clock::before(ctx.clock.now(), ctx.config.snapshot_retention());
    let final_backup = service.config.final_backup_snapshot.as_deref();
    let mut deleted = 0;

    for snapshot in snapshots {
        if final_backup == Some(snapshot.name.as_str()) {
            continue;
        }
        // Snapshots without a creation time are kept
        if !snapshot.created_at.is_some_and(|at| at < cutoff) {
            continue;
        }

        let result = ctx.control_plane.delete_snapshot(uuid, &snapshot.name).await;
        if best_effort(service.service_id, "delete snapshot", result).is_some() {
            deleted += 1;
        }
    }

    Ok(deleted)
}
