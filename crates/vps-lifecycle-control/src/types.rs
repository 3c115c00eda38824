//! Lifecycle job types.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vps_lifecycle_core::{InvoiceId, JobId, ServiceId};

use crate::retry::{self, RetryPolicy};

/// Why a lifecycle transition was requested.
///
/// The display strings are shown to customers in notifications and stored
/// on the service record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// Suspended with unpaid invoices past their due date.
    PaymentOverdue,
    /// Suspended by an administrator with no overdue invoices.
    ManualSuspension,
    /// Reactivated by an administrator.
    ManualUnsuspension,
    /// Cancelled or terminated without long-overdue invoices.
    ServiceCancelled,
    /// Terminated with invoices more than 14 days overdue.
    ExtendedPaymentOverdue,
    /// A payment cleared the suspension.
    PaymentReceived,
}

impl TransitionReason {
    /// True for reasons caused by unpaid invoices.
    #[must_use]
    pub const fn is_overdue(&self) -> bool {
        matches!(self, Self::PaymentOverdue | Self::ExtendedPaymentOverdue)
    }
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PaymentOverdue => "Payment overdue",
            Self::ManualSuspension => "Manual suspension",
            Self::ManualUnsuspension => "Manual unsuspension",
            Self::ServiceCancelled => "Service cancelled",
            Self::ExtendedPaymentOverdue => "Extended payment overdue (14+ days)",
            Self::PaymentReceived => "Payment received",
        })
    }
}

/// The bounded set of lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Stop the VM and mark the service suspended.
    Suspend,
    /// Start the VM and mark the service active.
    Unsuspend,
    /// Delete the VM, optionally after a final backup.
    Terminate {
        /// Snapshot the VM before deleting it.
        create_backup: bool,
    },
    /// Prune old snapshots and scrub the record of a terminated service.
    Cleanup,
}

impl JobKind {
    /// Short name used in logs and tags.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Suspend => "suspend",
            Self::Unsuspend => "unsuspend",
            Self::Terminate { .. } => "terminate",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the observer asks the queue to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Operation to run.
    pub kind: JobKind,
    /// Target service.
    pub service_id: ServiceId,
    /// Why the operation was requested.
    pub reason: TransitionReason,
}

impl JobRequest {
    /// Create a request.
    #[must_use]
    pub const fn new(kind: JobKind, service_id: ServiceId, reason: TransitionReason) -> Self {
        Self {
            kind,
            service_id,
            reason,
        }
    }
}

/// One retryable lifecycle operation, as stored in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Stable across retries of the same job.
    pub id: JobId,
    /// Operation to run.
    pub kind: JobKind,
    /// Target service.
    pub service_id: ServiceId,
    /// Why the operation was requested.
    pub reason: TransitionReason,
    /// 0-based attempt number.
    pub attempt: u32,
    /// Total attempts allowed.
    pub max_attempts: u32,
    /// Delay before each retry.
    pub backoff: Vec<Duration>,
}

impl Job {
    /// Build the first attempt of a job from a request and its retry policy.
    #[must_use]
    pub fn new(request: JobRequest, policy: &RetryPolicy) -> Self {
        Self {
            id: JobId::generate(),
            kind: request.kind,
            service_id: request.service_id,
            reason: request.reason,
            attempt: 0,
            max_attempts: policy.max_attempts,
            backoff: policy.backoff(),
        }
    }

    /// Delay before the next attempt, or `None` if this is the last one.
    #[must_use]
    pub fn retry_delay(&self) -> Option<Duration> {
        retry::next_delay(self.attempt, self.max_attempts, &self.backoff)
    }

    /// The next attempt of this job.
    #[must_use]
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    /// Tags attached to the job's log lines.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        vec![
            "vps".to_string(),
            self.kind.name().to_string(),
            format!("service:{}", self.service_id),
        ]
    }
}

/// A payment cleared on an invoice tied to a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceived {
    /// Service the invoice belongs to.
    pub service_id: ServiceId,
    /// The invoice that was paid.
    pub invoice_id: InvoiceId,
}
