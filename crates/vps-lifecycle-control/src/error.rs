//! Error types for lifecycle orchestration.

use thiserror::Error;
use vps_lifecycle_core::ServiceId;
use vps_lifecycle_hypervisor::ControlPlaneError;
use vps_lifecycle_store::{ServiceStatus, StoreError};

/// A result type using `LifecycleError`.
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Errors that can occur while orchestrating service lifecycles.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The requested service was not found.
    #[error("service not found: {0}")]
    ServiceNotFound(ServiceId),

    /// The requested status change is not in the transition table.
    #[error("invalid status transition for service {service_id}: {from} -> {to}")]
    InvalidTransition {
        /// The service being transitioned.
        service_id: ServiceId,
        /// The current status.
        from: ServiceStatus,
        /// The requested status.
        to: ServiceStatus,
    },

    /// A VM already exists for the service.
    #[error("service {service_id} already has a VM named {vm_name}")]
    AlreadyProvisioned {
        /// The service being provisioned.
        service_id: ServiceId,
        /// The name that is already taken.
        vm_name: String,
    },

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Hypervisor control plane error.
    #[error("control plane error: {0}")]
    ControlPlane(#[from] ControlPlaneError),

    /// The billing ledger could not be queried.
    #[error("billing error: {0}")]
    Billing(String),

    /// A notification could not be delivered.
    #[error("notification error: {0}")]
    Notification(String),

    /// A job could not be encoded or decoded.
    #[error("job codec error: {0}")]
    Codec(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl LifecycleError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::ServiceNotFound(_) => 404,
            Self::InvalidTransition { .. } | Self::AlreadyProvisioned { .. } => 409,
            Self::ControlPlane(_) | Self::Billing(_) | Self::Notification(_) => 502,
            Self::Store(_) | Self::Codec(_) | Self::Config(_) => 500,
        }
    }

    /// Returns true if a job failing with this error should be retried.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::ControlPlane(e) => e.is_retriable(),
            Self::Store(_) | Self::Billing(_) | Self::Notification(_) => true,
            Self::ServiceNotFound(_)
            | Self::InvalidTransition { .. }
            | Self::AlreadyProvisioned { .. }
            | Self::Codec(_)
            | Self::Config(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_plane_errors_keep_their_taxonomy() {
        let transient = LifecycleError::from(ControlPlaneError::Api {
            status: 503,
            message: "busy".to_string(),
        });
        let validation = LifecycleError::from(ControlPlaneError::Api {
            status: 422,
            message: "unknown image".to_string(),
        });

        assert!(transient.is_retriable());
        assert!(!validation.is_retriable());
        assert_eq!(transient.http_status_code(), 502);
    }

    #[test]
    fn error_status_codes() {
        let service_id = ServiceId::new(9);
        assert_eq!(LifecycleError::ServiceNotFound(service_id).http_status_code(), 404);
        assert_eq!(
            LifecycleError::InvalidTransition {
                service_id,
                from: ServiceStatus::Terminated,
                to: ServiceStatus::Active,
            }
            .http_status_code(),
            409
        );
        assert!(LifecycleError::Store(StoreError::Database("io".to_string())).is_retriable());
        assert!(!LifecycleError::Codec("truncated".to_string()).is_retriable());
    }

    #[test]
    fn transition_error_message_uses_status_names() {
        let err = LifecycleError::InvalidTransition {
            service_id: ServiceId::new(4),
            from: ServiceStatus::Terminated,
            to: ServiceStatus::Suspended,
        };
        assert_eq!(
            err.to_string(),
            "invalid status transition for service 4: terminated -> suspended"
        );
    }
}
