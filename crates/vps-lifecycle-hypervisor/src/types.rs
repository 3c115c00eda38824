//! Wire types for the control-plane HTTP API.
//!
//! Field names follow the control plane's camelCase JSON.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vps_lifecycle_core::ServiceId;

/// Request body for `POST /vms`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVmRequest {
    /// VM name, see [`vm_name`].
    pub name: String,
    /// Memory in megabytes.
    #[serde(rename = "memoryMB")]
    pub memory_mb: u32,
    /// Virtual CPUs.
    pub vcpus: u32,
    /// Root disk size in gigabytes.
    #[serde(rename = "diskSizeGB")]
    pub disk_size_gb: u32,
    /// Base image.
    pub image_name: String,
    /// Power the VM on once created.
    pub start_on_create: bool,
    /// First-boot configuration.
    pub cloud_init: CloudInit,
}

/// Cloud-init payload attached to VM creation.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudInit {
    /// Hostname and login user.
    pub common_fields: CloudInitCommon,
    /// Authorized SSH public keys.
    pub ssh_keys: Vec<String>,
}

/// Fields common to every cloud-init payload.
#[derive(Debug, Clone, Serialize)]
pub struct CloudInitCommon {
    /// Guest hostname.
    pub hostname: String,
    /// Login user.
    pub username: String,
}

impl Default for CloudInitCommon {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            username: "root".to_string(),
        }
    }
}

/// A VM as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vm {
    /// Control-plane identifier.
    pub uuid: String,
    /// VM name.
    pub name: String,
    /// Power state as reported (`running`, `stopped`, ...).
    #[serde(default)]
    pub status: String,
    /// Assigned IP addresses.
    #[serde(default)]
    pub ip_addresses: Vec<String>,
}

/// Host summary returned by `GET /host/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatus {
    /// Hypervisor host name.
    pub hostname: String,
    /// Hypervisor version string.
    #[serde(default)]
    pub hypervisor_version: Option<String>,
    /// VMs defined on the host.
    #[serde(default)]
    pub total_vms: u32,
    /// VMs currently running.
    #[serde(default)]
    pub running_vms: u32,
}

/// Power action for `POST /vms/{uuid}/action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmAction {
    /// Power on.
    Start,
    /// Power off.
    Stop,
}

impl fmt::Display for VmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Stop => "stop",
        })
    }
}

/// A point-in-time backup of a VM's disks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Snapshot name, unique per VM.
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Creation time; older control planes send `created_at`.
    #[serde(default, alias = "created_at")]
    pub created_at: Option<DateTime<Utc>>,
}

const FINAL_BACKUP_PREFIX: &str = "final-backup";

/// Name of the final backup taken at `at`: `final-backup-<YYYY-mm-dd-HH-MM-SS>`.
///
/// The name is derived from the time alone, so a retried termination within
/// the same second asks for the same snapshot again.
#[must_use]
pub fn final_backup_name(at: DateTime<Utc>) -> String {
    format!("{FINAL_BACKUP_PREFIX}-{}", at.format("%Y-%m-%d-%H-%M-%S"))
}

/// Generate the control-plane VM name for a service:
/// `vps-<service_id>-<product-slug>`.
#[must_use]
pub fn vm_name(service_id: ServiceId, product_name: &str) -> String {
    let slug = product_name.trim().to_lowercase().replace(' ', "-");
    let slug = if slug.is_empty() { "server".to_string() } else { slug };
    format!("vps-{service_id}-{slug}")
}
