//! Client for the hypervisor control plane.
//!
//! The lifecycle engine drives VMs through the [`ControlPlaneClient`] trait:
//! power actions, deletion and snapshots. [`HttpControlPlaneClient`] talks to
//! the control plane's REST API; [`MockControlPlane`] (behind the
//! `test-utils` feature) keeps everything in memory.
//!
//! VMs are addressed by name, derived from the service with [`vm_name`], and
//! resolved to a uuid through [`ControlPlaneClient::find_vm_by_name`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod types;

pub use client::{ControlPlaneClient, HttpControlPlaneClient};
pub use error::{ControlPlaneError, Result};
pub use types::{
    final_backup_name, vm_name, CloudInit, CloudInitCommon, CreateVmRequest, HostStatus, Snapshot,
    Vm, VmAction,
};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{Call, MockControlPlane, Operation};
