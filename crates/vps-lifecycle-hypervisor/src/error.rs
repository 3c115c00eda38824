//! Control-plane error types.

use thiserror::Error;

/// A result type using `ControlPlaneError`.
pub type Result<T> = std::result::Result<T, ControlPlaneError>;

/// Errors returned by the hypervisor control plane or the transport to it.
#[derive(Debug, Clone, Error)]
pub enum ControlPlaneError {
    /// The control plane answered with a non-2xx status.
    #[error("control plane returned HTTP {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body, or a fallback.
        message: String,
    },

    /// The request never produced a response (connect failure, timeout).
    #[error("control plane request failed: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("invalid control plane response: {0}")]
    Decode(String),

    /// The configured API root cannot carry a request path.
    #[error("invalid control plane URL: {0}")]
    InvalidUrl(String),

    /// No VM matches the service.
    #[error("VM not found: {0}")]
    VmNotFound(String),
}

impl ControlPlaneError {
    /// Returns true unless this is a validation error.
    ///
    /// Validation errors are 4xx responses other than 404, 408 and 429, plus
    /// undecodable responses and an unusable API root. A missing VM is
    /// retried because the control plane may not have caught up yet; callers
    /// that delete treat it as success instead.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Api { status, .. } => {
                *status < 400 || *status >= 500 || matches!(*status, 404 | 408 | 429)
            }
            Self::Transport(_) | Self::VmNotFound(_) => true,
            Self::Decode(_) | Self::InvalidUrl(_) => false,
        }
    }

    /// Returns true if the control plane reported the resource as missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. } | Self::VmNotFound(_))
    }
}

impl From<reqwest::Error> for ControlPlaneError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> ControlPlaneError {
        ControlPlaneError::Api {
            status,
            message: "x".to_string(),
        }
    }

    #[test]
    fn retry_taxonomy() {
        assert!(api(500).is_retriable());
        assert!(api(503).is_retriable());
        assert!(api(429).is_retriable());
        assert!(api(408).is_retriable());
        assert!(api(404).is_retriable());
        assert!(ControlPlaneError::Transport("timeout".to_string()).is_retriable());
        assert!(ControlPlaneError::VmNotFound("vps-1-basic".to_string()).is_retriable());

        assert!(!api(400).is_retriable());
        assert!(!api(401).is_retriable());
        assert!(!api(422).is_retriable());
        assert!(!ControlPlaneError::Decode("bad json".to_string()).is_retriable());
        assert!(!ControlPlaneError::InvalidUrl("mailto:ops".to_string()).is_retriable());
    }

    #[test]
    fn not_found_detection() {
        assert!(api(404).is_not_found());
        assert!(ControlPlaneError::VmNotFound("vps-1".to_string()).is_not_found());
        assert!(!api(500).is_not_found());
    }
}
