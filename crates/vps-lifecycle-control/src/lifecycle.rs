//! Service status state machine.
//!
//! All status changes, whether requested by an administrator or recorded by
//! a job, are validated against one table. Each job kind declares the
//! statuses it may start from and the statuses it leaves behind.
//!
//! # State Machine
//!
//! ```text
//!   pending ──provision──▶ active ◀──unsuspend── suspended
//!      │                  │   ▲                    ▲
//!      │                  │   └────────┐           │
//!      │                  └──suspend──▶│───────────┘
//!      │                               │
//!      │                     suspension_failed
//!      │
//!      └──▶ cancelled ──terminate──▶ terminated ◀── termination_failed
//! ```
//!
//! Any non-terminal status can be cancelled or terminated. `terminated` is
//! final. The `*_failed` statuses are only ever written by jobs.
//!
//! Status writes go through [`record_status`], whoever makes them.

use chrono::{DateTime, Utc};
use vps_lifecycle_core::ServiceId;
use vps_lifecycle_store::{ChangeOrigin, Service, ServiceStatus, StatusChanged, Store};

use crate::error::{LifecycleError, Result};
use crate::types::JobKind;

/// Validates a status transition and returns the target status if valid.
///
/// # Errors
///
/// Returns `LifecycleError::InvalidTransition` if the transition is not allowed.
pub fn validate_transition(
    service_id: ServiceId,
    from: ServiceStatus,
    to: ServiceStatus,
) -> Result<ServiceStatus> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(LifecycleError::InvalidTransition {
            service_id,
            from,
            to,
        })
    }
}

/// Check if a status transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: ServiceStatus, to: ServiceStatus) -> bool {
    use ServiceStatus::{
        Active, Cancelled, Pending, Suspended, SuspensionFailed, Terminated, TerminationFailed,
    };

    if from as u8 == to as u8 {
        return false;
    }

    matches!(
        (from, to),
        // Provisioning finished
        (Pending, Active)
            // Suspend job outcomes, including a manual retry after a failure
            | (Active | SuspensionFailed, Suspended | SuspensionFailed)
            // Unsuspend, or an operator clearing a failed suspension
            | (Suspended | SuspensionFailed, Active)
            | (Pending | Active | Suspended | SuspensionFailed, Cancelled)
            // Terminate job outcomes
            | (
                Pending | Active | Suspended | SuspensionFailed | Cancelled | TerminationFailed,
                Terminated | TerminationFailed
            )
    )
}

/// Returns true for statuses only a job may record.
#[must_use]
pub const fn is_job_only(status: ServiceStatus) -> bool {
    matches!(
        status,
        ServiceStatus::SuspensionFailed | ServiceStatus::TerminationFailed
    )
}

/// Returns true if reaching `to` from `from` needs a hypervisor action.
///
/// Such transitions are requested, not written: the job records the status
/// once the VM has actually changed.
#[must_use]
pub const fn requires_job(from: ServiceStatus, to: ServiceStatus) -> bool {
    matches!(
        (from, to),
        (_, ServiceStatus::Suspended | ServiceStatus::Terminated)
            | (ServiceStatus::Suspended, ServiceStatus::Active)
    )
}

/// Set `status` on `service`, stamp it with `at` and persist the record.
///
/// A change of status is checked against the transition table first.
/// Writing the current status again only saves the record, which lets jobs
/// persist bookkeeping alongside an unchanged status.
///
/// # Errors
///
/// Returns `LifecycleError::InvalidTransition` if the change is not allowed,
/// or an error if the store fails. Nothing is written on error.
pub fn record_status<S: Store + ?Sized>(
    store: &S,
    service: &mut Service,
    status: ServiceStatus,
    origin: ChangeOrigin,
    at: DateTime<Utc>,
) -> Result<StatusChanged> {
    let old = service.status;
    if old != status {
        validate_transition(service.service_id, old, status)?;
    }
    service.status = status;
    service.updated_at = at;
    store.put_service(service)?;

    Ok(StatusChanged {
        service_id: service.service_id,
        old,
        new: status,
        origin,
    })
}

/// The statuses a job may run from and the statuses it records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionSpec {
    /// Statuses the job acts on. Anything else makes the job a no-op.
    pub sources: &'static [ServiceStatus],
    /// Status recorded on success.
    pub success: ServiceStatus,
    /// Status recorded once retries are exhausted, if any.
    pub failure: Option<ServiceStatus>,
}

impl TransitionSpec {
    /// Returns true if the job may act on a service in `status`.
    #[must_use]
    pub fn accepts(&self, status: ServiceStatus) -> bool {
        self.sources.contains(&status)
    }
}

/// The transition declared by a job kind.
#[must_use]
pub const fn transition_spec(kind: JobKind) -> TransitionSpec {
    use ServiceStatus::{
        Active, Cancelled, Pending, Suspended, SuspensionFailed, Terminated, TerminationFailed,
    };

    match kind {
        JobKind::Suspend => TransitionSpec {
            sources: &[Active, SuspensionFailed],
            success: Suspended,
            failure: Some(SuspensionFailed),
        },
        JobKind::Unsuspend => TransitionSpec {
            sources: &[Suspended],
            success: Active,
            failure: None,
        },
        JobKind::Terminate { .. } => TransitionSpec {
            sources: &[
                Pending,
                Active,
                Suspended,
                SuspensionFailed,
                Cancelled,
                TerminationFailed,
            ],
            success: Terminated,
            failure: Some(TerminationFailed),
        },
        JobKind::Cleanup => TransitionSpec {
            sources: &[Terminated],
            success: Terminated,
            failure: None,
        },
    }
}
