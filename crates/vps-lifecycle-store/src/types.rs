//! Domain types stored in the database.
//!
//! These types represent the persisted state of VPS services and of the
//! lifecycle jobs waiting to run against them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vps_lifecycle_core::{InvoiceId, JobId, ServiceId, UserId};

/// A provisioned virtual-server subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Billing identifier of the service.
    pub service_id: ServiceId,
    /// Owning billing user.
    pub user_id: UserId,
    /// Product name, used to derive the VM name.
    pub product_name: String,
    /// Current lifecycle status.
    pub status: ServiceStatus,
    /// Resource plan.
    pub plan: Plan,
    /// Opaque VM identifier assigned by the control plane, once provisioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypervisor_ref: Option<String>,
    /// Lifecycle bookkeeping.
    #[serde(default)]
    pub config: ServiceConfig,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Service {
    /// Create a `pending` service record for a subscription purchased at `now`.
    #[must_use]
    pub fn new(
        service_id: ServiceId,
        user_id: UserId,
        product_name: impl Into<String>,
        plan: Plan,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            service_id,
            user_id,
            product_name: product_name.into(),
            status: ServiceStatus::Pending,
            plan,
            hypervisor_ref: None,
            config: ServiceConfig {
                created_at: Some(now),
                ..ServiceConfig::default()
            },
            created_at: now,
            updated_at: now,
        }
    }
}

/// Resource plan for a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Virtual CPU cores.
    pub cpu_cores: u32,
    /// Memory in megabytes.
    pub memory_mb: u32,
    /// Root disk size in gigabytes.
    pub disk_gb: u32,
    /// Operating system image name.
    pub os_image: String,
}

impl Default for Plan {
    fn default() -> Self {
        Self {
            cpu_cores: 1,
            memory_mb: 1024,
            disk_gb: 25,
            os_image: "ubuntu-24.04".to_string(),
        }
    }
}

/// Lifecycle states for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ServiceStatus {
    /// Purchased, VM not yet provisioned.
    Pending = 1,
    /// VM provisioned and in good standing.
    Active = 2,
    /// VM stopped by a suspend job.
    Suspended = 3,
    /// Suspend job exhausted its retries; needs an operator.
    SuspensionFailed = 4,
    /// VM deleted. Terminal; the record is retained.
    Terminated = 5,
    /// Terminate job exhausted its retries; needs an operator.
    TerminationFailed = 6,
    /// Subscription cancelled in billing, termination pending.
    Cancelled = 7,
}

impl ServiceStatus {
    /// All statuses, in numeric order.
    pub const ALL: [Self; 7] = [
        Self::Pending,
        Self::Active,
        Self::Suspended,
        Self::SuspensionFailed,
        Self::Terminated,
        Self::TerminationFailed,
        Self::Cancelled,
    ];

    /// Convert the status to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert a numeric value to a `ServiceStatus`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Pending),
            2 => Some(Self::Active),
            3 => Some(Self::Suspended),
            4 => Some(Self::SuspensionFailed),
            5 => Some(Self::Terminated),
            6 => Some(Self::TerminationFailed),
            7 => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// The billing-platform spelling of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::SuspensionFailed => "suspension_failed",
            Self::Terminated => "terminated",
            Self::TerminationFailed => "termination_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle bookkeeping attached to a service.
///
/// Everything except the audit subset kept by [`ServiceConfig::scrubbed`] is
/// operational and discarded by the cleanup job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// When the VM was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// When the service was last suspended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_at: Option<DateTime<Utc>>,
    /// Why the service was last suspended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_reason: Option<String>,
    /// When the VM was deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated_at: Option<DateTime<Utc>>,
    /// Why the service was terminated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate_reason: Option<String>,
    /// Last error recorded by a failed lifecycle job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Name of the snapshot taken right before the VM was deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_backup_snapshot: Option<String>,
    /// When the final backup was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_backup_created_at: Option<DateTime<Utc>>,
    /// OS image the VM was built from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_image: Option<String>,
    /// Generated VM name on the control plane.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_name: Option<String>,
    /// Invoice whose payment lifted the last suspension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsuspended_by_invoice: Option<InvoiceId>,
    /// Free-form operational settings (network, storage pool, addresses).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub operational: BTreeMap<String, String>,
}

impl ServiceConfig {
    /// The audit-safe subset retained after cleanup: creation and termination
    /// timestamps, OS image, and the final-backup reference.
    #[must_use]
    pub fn scrubbed(&self) -> Self {
        Self {
            created_at: self.created_at,
            terminated_at: self.terminated_at,
            os_image: self.os_image.clone(),
            final_backup_snapshot: self.final_backup_snapshot.clone(),
            final_backup_created_at: self.final_backup_created_at,
            ..Self::default()
        }
    }
}

/// Who caused a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// An administrator or the billing platform's admin surface.
    Admin,
    /// A billing event such as a payment.
    Billing,
    /// A lifecycle job recording the outcome of a hypervisor action.
    Job,
}

/// A typed status-change event for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    /// The service whose status changed.
    pub service_id: ServiceId,
    /// Status before the change.
    pub old: ServiceStatus,
    /// Status after the change.
    pub new: ServiceStatus,
    /// Who made the change.
    pub origin: ChangeOrigin,
}

/// A lifecycle job persisted until it is due.
///
/// The payload is opaque to the store; the job queue owns its encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingJob {
    /// Job identifier.
    pub job_id: JobId,
    /// Earliest time the job may run.
    pub due_at: DateTime<Utc>,
    /// Encoded job.
    pub payload: Vec<u8>,
}
