//! Lifecycle service configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{LifecycleError, Result};
use crate::retry::RetryPolicy;
use crate::types::JobKind;

/// Configuration for the lifecycle service and its workers.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Listen address (e.g., "0.0.0.0:8080").
    #[serde(default = "LifecycleConfig::default_listen_addr")]
    pub listen_addr: String,

    /// RocksDB data directory.
    #[serde(default = "LifecycleConfig::default_data_dir")]
    pub data_dir: String,

    /// Hypervisor control-plane API root.
    #[serde(default = "LifecycleConfig::default_control_plane_url")]
    pub control_plane_url: String,

    /// Bearer token for the control plane.
    #[serde(default)]
    pub control_plane_token: String,

    /// Billing API root used for overdue-invoice queries.
    #[serde(default = "LifecycleConfig::default_billing_url")]
    pub billing_url: String,

    /// Notification webhook root. Notifications are only logged when unset.
    #[serde(default)]
    pub notify_url: Option<String>,

    /// Customer portal root prefixed to notification links.
    #[serde(default)]
    pub portal_url: String,

    /// Jobs run concurrently per poll.
    #[serde(default = "LifecycleConfig::default_workers")]
    pub workers: usize,

    /// Queue poll interval in milliseconds.
    #[serde(default = "LifecycleConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Retry policy for suspend jobs.
    #[serde(default = "RetryPolicy::lifecycle")]
    pub suspend_retry: RetryPolicy,

    /// Retry policy for unsuspend jobs.
    #[serde(default = "RetryPolicy::lifecycle")]
    pub unsuspend_retry: RetryPolicy,

    /// Retry policy for terminate jobs.
    #[serde(default = "RetryPolicy::lifecycle")]
    pub terminate_retry: RetryPolicy,

    /// Retry policy for cleanup jobs.
    #[serde(default = "RetryPolicy::cleanup")]
    pub cleanup_retry: RetryPolicy,

    /// Days between termination and cleanup.
    #[serde(default = "LifecycleConfig::default_thirty_days")]
    pub cleanup_delay_days: u32,

    /// Snapshots older than this many days are pruned by cleanup.
    #[serde(default = "LifecycleConfig::default_thirty_days")]
    pub snapshot_retention_days: u32,

    /// Invoices overdue by more than this many days make a termination
    /// "extended payment overdue".
    #[serde(default = "LifecycleConfig::default_extended_overdue_days")]
    pub extended_overdue_days: u32,

    /// Also start the VM when a payment lifts a suspension.
    #[serde(default)]
    pub start_vm_on_auto_unsuspend: bool,
}

impl LifecycleConfig {
    fn default_listen_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    fn default_data_dir() -> String {
        "/data".to_string()
    }

    fn default_control_plane_url() -> String {
        "http://localhost:5550/api".to_string()
    }

    fn default_billing_url() -> String {
        "http://localhost:8000/api".to_string()
    }

    const fn default_workers() -> usize {
        4
    }

    const fn default_poll_interval_ms() -> u64 {
        1000
    }

    const fn default_thirty_days() -> u32 {
        30
    }

    const fn default_extended_overdue_days() -> u32 {
        14
    }

    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::Config` if a numeric or boolean variable
    /// cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::Config` if a numeric or boolean variable
    /// cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("LISTEN_ADDR") {
            config.listen_addr = v;
        }
        if let Some(v) = lookup("DATA_DIR") {
            config.data_dir = v;
        }
        if let Some(v) = lookup("CONTROL_PLANE_URL") {
            config.control_plane_url = v;
        }
        if let Some(v) = lookup("CONTROL_PLANE_TOKEN") {
            config.control_plane_token = v;
        }
        if let Some(v) = lookup("BILLING_URL") {
            config.billing_url = v;
        }
        config.notify_url = lookup("NOTIFY_URL").filter(|v| !v.is_empty());
        if let Some(v) = lookup("PORTAL_URL") {
            config.portal_url = v;
        }
        if let Some(v) = lookup("WORKERS") {
            config.workers = v
                .parse()
                .map_err(|_| LifecycleError::Config(format!("WORKERS must be a number: {v}")))?;
        }
        if let Some(v) = lookup("START_VM_ON_AUTO_UNSUSPEND") {
            config.start_vm_on_auto_unsuspend = parse_bool(&v).ok_or_else(|| {
                LifecycleError::Config(format!("START_VM_ON_AUTO_UNSUSPEND must be a boolean: {v}"))
            })?;
        }

        Ok(config)
    }

    /// The retry policy for a job kind.
    #[must_use]
    pub const fn retry_policy(&self, kind: JobKind) -> &RetryPolicy {
        match kind {
            JobKind::Suspend => &self.suspend_retry,
            JobKind::Unsuspend => &self.unsuspend_retry,
            JobKind::Terminate { .. } => &self.terminate_retry,
            JobKind::Cleanup => &self.cleanup_retry,
        }
    }

    /// Get the poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get the cleanup delay as a `Duration`.
    #[must_use]
    pub const fn cleanup_delay(&self) -> Duration {
        days(self.cleanup_delay_days)
    }

    /// Get the snapshot retention window as a `Duration`.
    #[must_use]
    pub const fn snapshot_retention(&self) -> Duration {
        days(self.snapshot_retention_days)
    }

    /// Get the extended-overdue threshold as a `Duration`.
    #[must_use]
    pub const fn extended_overdue(&self) -> Duration {
        days(self.extended_overdue_days)
    }

    /// Link to a service page in the customer portal.
    #[must_use]
    pub fn service_url(&self, service_id: impl std::fmt::Display) -> String {
        format!("{}/services/{service_id}", self.portal_url.trim_end_matches('/'))
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            data_dir: Self::default_data_dir(),
            control_plane_url: Self::default_control_plane_url(),
            control_plane_token: String::new(),
            billing_url: Self::default_billing_url(),
            notify_url: None,
            portal_url: String::new(),
            workers: Self::default_workers(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            suspend_retry: RetryPolicy::lifecycle(),
            unsuspend_retry: RetryPolicy::lifecycle(),
            terminate_retry: RetryPolicy::lifecycle(),
            cleanup_retry: RetryPolicy::cleanup(),
            cleanup_delay_days: Self::default_thirty_days(),
            snapshot_retention_days: Self::default_thirty_days(),
            extended_overdue_days: Self::default_extended_overdue_days(),
            start_vm_on_auto_unsuspend: false,
        }
    }
}

const fn days(n: u32) -> Duration {
    Duration::from_secs(n as u64 * 24 * 60 * 60)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config() {
        let config = LifecycleConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.workers, 4);
        assert_eq!(config.suspend_retry.max_attempts, 3);
        assert_eq!(config.cleanup_retry.max_attempts, 2);
        assert!(!config.start_vm_on_auto_unsuspend);
        assert!(config.notify_url.is_none());
    }

    #[test]
    fn durations() {
        let config = LifecycleConfig::default();
        assert_eq!(config.cleanup_delay(), Duration::from_secs(30 * 86_400));
        assert_eq!(config.snapshot_retention(), Duration::from_secs(30 * 86_400));
        assert_eq!(config.extended_overdue(), Duration::from_secs(14 * 86_400));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn env_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("CONTROL_PLANE_URL", "http://flint:5550/api"),
            ("CONTROL_PLANE_TOKEN", "tok"),
            ("WORKERS", "8"),
            ("START_VM_ON_AUTO_UNSUSPEND", "true"),
            ("NOTIFY_URL", ""),
        ]
        .into_iter()
        .collect();

        let config =
            LifecycleConfig::from_lookup(|k| vars.get(k).map(ToString::to_string)).unwrap();
        assert_eq!(config.control_plane_url, "http://flint:5550/api");
        assert_eq!(config.control_plane_token, "tok");
        assert_eq!(config.workers, 8);
        assert!(config.start_vm_on_auto_unsuspend);
        assert!(config.notify_url.is_none());
        assert_eq!(config.data_dir, "/data");
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = LifecycleConfig::from_lookup(|k| (k == "WORKERS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Config(_)));
    }

    #[test]
    fn retry_policy_per_kind() {
        let config = LifecycleConfig::default();
        assert_eq!(config.retry_policy(JobKind::Cleanup), &RetryPolicy::cleanup());
        assert_eq!(
            config.retry_policy(JobKind::Terminate { create_backup: false }),
            &RetryPolicy::lifecycle()
        );
    }

    #[test]
    fn service_links() {
        let mut config = LifecycleConfig::default();
        assert_eq!(config.service_url(7), "/services/7");
        config.portal_url = "https://portal.example.com/".to_string();
        assert_eq!(config.service_url(7), "https://portal.example.com/services/7");
    }
}
