//! In-memory control plane for tests.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::client::ControlPlaneClient;
use crate::error::{ControlPlaneError, Result};
use crate::types::{CreateVmRequest, HostStatus, Snapshot, Vm, VmAction};

/// Control-plane operations, used to inject failures and inspect calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `host_status`
    HostStatus,
    /// `create_vm`
    CreateVm,
    /// `list_vms`
    ListVms,
    /// `vm_action`
    VmAction,
    /// `delete_vm`
    DeleteVm,
    /// `create_snapshot`
    CreateSnapshot,
    /// `list_snapshots`
    ListSnapshots,
    /// `delete_snapshot`
    DeleteSnapshot,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Which operation was invoked.
    pub op: Operation,
    /// VM uuid or name the call targeted; empty for `list_vms`.
    pub target: String,
    /// Action, snapshot name or disk flag, when the operation has one.
    pub detail: Option<String>,
}

struct MockVm {
    vm: Vm,
    running: bool,
    snapshots: Vec<Snapshot>,
}

enum Failure {
    Once(VecDeque<ControlPlaneError>),
    Always(ControlPlaneError),
}

/// A control plane that keeps VMs and snapshots in memory.
///
/// Behaves like the HTTP client with respect to idempotent outcomes, records
/// every call, and can be told to fail specific operations. Snapshots are
/// stamped with the time given to [`Self::set_now`].
#[derive(Default)]
pub struct MockControlPlane {
    vms: Mutex<HashMap<String, MockVm>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<Operation, Failure>>,
    next_uuid: Mutex<u64>,
    now: Mutex<DateTime<Utc>>,
    snapshot_conflicts: Mutex<usize>,
}

impl MockControlPlane {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time recorded on snapshots created from now on.
    pub fn set_now(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// How many snapshot creations hit an existing name and were accepted as no-ops.
    #[must_use]
    pub fn snapshot_conflicts(&self) -> usize {
        *self.snapshot_conflicts.lock()
    }

    /// Add a VM and return its uuid.
    pub fn add_vm(&self, name: &str, running: bool) -> String {
        let uuid = self.allocate_uuid();
        self.vms.lock().insert(
            uuid.clone(),
            MockVm {
                vm: Vm {
                    uuid: uuid.clone(),
                    name: name.to_string(),
                    status: power_label(running).to_string(),
                    ip_addresses: Vec::new(),
                },
                running,
                snapshots: Vec::new(),
            },
        );
        uuid
    }

    /// Attach a pre-existing snapshot to a VM.
    pub fn add_snapshot(&self, vm_uuid: &str, snapshot: Snapshot) {
        if let Some(vm) = self.vms.lock().get_mut(vm_uuid) {
            vm.snapshots.push(snapshot);
        }
    }

    /// Fail the next call to `op` with `err`. Queued failures are consumed in order.
    pub fn fail_next(&self, op: Operation, err: ControlPlaneError) {
        let mut failures = self.failures.lock();
        match failures.get_mut(&op) {
            Some(Failure::Once(queue)) => queue.push_back(err),
            _ => {
                failures.insert(op, Failure::Once(VecDeque::from([err])));
            }
        }
    }

    /// Fail every call to `op` with `err` until [`Self::clear_failures`].
    pub fn fail_always(&self, op: Operation, err: ControlPlaneError) {
        self.failures.lock().insert(op, Failure::Always(err));
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Whether the VM exists and is powered on.
    #[must_use]
    pub fn is_running(&self, vm_uuid: &str) -> bool {
        self.vms.lock().get(vm_uuid).is_some_and(|vm| vm.running)
    }

    /// Whether a VM with this uuid exists.
    #[must_use]
    pub fn has_vm(&self, vm_uuid: &str) -> bool {
        self.vms.lock().contains_key(vm_uuid)
    }

    /// Snapshot names currently held for a VM.
    #[must_use]
    pub fn snapshot_names(&self, vm_uuid: &str) -> Vec<String> {
        self.vms
            .lock()
            .get(vm_uuid)
            .map(|vm| vm.snapshots.iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// How many times `op` was invoked.
    #[must_use]
    pub fn call_count(&self, op: Operation) -> usize {
        self.calls.lock().iter().filter(|c| c.op == op).count()
    }

    fn allocate_uuid(&self) -> String {
        let mut next = self.next_uuid.lock();
        *next += 1;
        format!("vm-{next:04}")
    }

    fn record(&self, op: Operation, target: &str, detail: Option<String>) -> Result<()> {
        self.calls.lock().push(Call {
            op,
            target: target.to_string(),
            detail,
        });

        let mut failures = self.failures.lock();
        match failures.get_mut(&op) {
            Some(Failure::Always(err)) => Err(err.clone()),
            Some(Failure::Once(queue)) => queue.pop_front().map_or(Ok(()), Err),
            None => Ok(()),
        }
    }
}

fn power_label(running: bool) -> &'static str {
    if running {
        "running"
    } else {
        "stopped"
    }
}

fn missing(what: &str) -> ControlPlaneError {
    ControlPlaneError::Api {
        status: 404,
        message: format!("{what} not found"),
    }
}

#[async_trait]
impl ControlPlaneClient for MockControlPlane {
    async fn host_status(&self) -> Result<HostStatus> {
        self.record(Operation::HostStatus, "", None)?;
        let vms = self.vms.lock();
        Ok(HostStatus {
            hostname: "mock-host".to_string(),
            hypervisor_version: None,
            total_vms: u32::try_from(vms.len()).unwrap_or(u32::MAX),
            running_vms: u32::try_from(vms.values().filter(|vm| vm.running).count())
                .unwrap_or(u32::MAX),
        })
    }

    async fn create_vm(&self, request: &CreateVmRequest) -> Result<Vm> {
        self.record(Operation::CreateVm, &request.name, None)?;

        if self.vms.lock().values().any(|vm| vm.vm.name == request.name) {
            return Err(ControlPlaneError::Api {
                status: 409,
                message: format!("VM {} already exists", request.name),
            });
        }

        let uuid = self.add_vm(&request.name, request.start_on_create);
        Ok(self.vms.lock()[&uuid].vm.clone())
    }

    async fn list_vms(&self) -> Result<Vec<Vm>> {
        self.record(Operation::ListVms, "", None)?;
        let mut vms: Vec<Vm> = self.vms.lock().values().map(|vm| vm.vm.clone()).collect();
        vms.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        Ok(vms)
    }

    async fn vm_action(&self, vm_uuid: &str, action: VmAction) -> Result<()> {
        self.record(Operation::VmAction, vm_uuid, Some(action.to_string()))?;

        let mut vms = self.vms.lock();
        let vm = vms.get_mut(vm_uuid).ok_or_else(|| missing("VM"))?;
        vm.running = action == VmAction::Start;
        vm.vm.status = power_label(vm.running).to_string();
        Ok(())
    }

    async fn delete_vm(&self, vm_uuid: &str, delete_disks: bool) -> Result<()> {
        self.record(Operation::DeleteVm, vm_uuid, Some(delete_disks.to_string()))?;
        self.vms.lock().remove(vm_uuid);
        Ok(())
    }

    async fn create_snapshot(&self, vm_uuid: &str, name: &str, description: &str) -> Result<()> {
        self.record(Operation::CreateSnapshot, vm_uuid, Some(name.to_string()))?;

        let mut vms = self.vms.lock();
        let vm = vms.get_mut(vm_uuid).ok_or_else(|| missing("VM"))?;
        // The HTTP client answers a 409 for a taken name with success
        if vm.snapshots.iter().any(|s| s.name == name) {
            *self.snapshot_conflicts.lock() += 1;
            return Ok(());
        }
        vm.snapshots.push(Snapshot {
            name: name.to_string(),
            description: Some(description.to_string()),
            created_at: Some(*self.now.lock()),
        });
        Ok(())
    }

    async fn list_snapshots(&self, vm_uuid: &str) -> Result<Vec<Snapshot>> {
        self.record(Operation::ListSnapshots, vm_uuid, None)?;
        self.vms
            .lock()
            .get(vm_uuid)
            .map(|vm| vm.snapshots.clone())
            .ok_or_else(|| missing("VM"))
    }

    async fn delete_snapshot(&self, vm_uuid: &str, name: &str) -> Result<()> {
        self.record(Operation::DeleteSnapshot, vm_uuid, Some(name.to_string()))?;
        if let Some(vm) = self.vms.lock().get_mut(vm_uuid) {
            vm.snapshots.retain(|s| s.name != name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn power_actions_and_lookup() {
        let mock = MockControlPlane::new();
        let uuid = mock.add_vm("vps-1-basic", true);

        let vm = mock.find_vm_by_name("vps-1-basic").await.unwrap();
        assert_eq!(vm.uuid, uuid);

        mock.vm_action(&uuid, VmAction::Stop).await.unwrap();
        assert!(!mock.is_running(&uuid));
        // Stopping twice is not an error.
        mock.vm_action(&uuid, VmAction::Stop).await.unwrap();
        assert_eq!(mock.call_count(Operation::VmAction), 2);
    }

    #[tokio::test]
    async fn snapshots_carry_the_mock_time() {
        use chrono::TimeZone;

        let mock = MockControlPlane::new();
        let at = Utc.with_ymd_and_hms(2026, 4, 10, 9, 30, 0).unwrap();
        mock.set_now(at);
        let uuid = mock.add_vm("vps-1-basic", true);
        mock.create_snapshot(&uuid, "final-backup-x", "d").await.unwrap();

        let snapshots = mock.list_snapshots(&uuid).await.unwrap();
        assert_eq!(snapshots[0].created_at, Some(at));

        let host = mock.host_status().await.unwrap();
        assert_eq!((host.total_vms, host.running_vms), (1, 1));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let mock = MockControlPlane::new();
        let uuid = mock.add_vm("vps-1-basic", true);
        mock.fail_next(Operation::VmAction, ControlPlaneError::Transport("reset".into()));

        assert!(mock.vm_action(&uuid, VmAction::Stop).await.is_err());
        assert!(mock.vm_action(&uuid, VmAction::Stop).await.is_ok());

        mock.fail_always(Operation::ListVms, ControlPlaneError::Transport("down".into()));
        assert!(mock.list_vms().await.is_err());
        assert!(mock.list_vms().await.is_err());
        mock.clear_failures();
        assert_eq!(mock.list_vms().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deletes_are_idempotent() {
        let mock = MockControlPlane::new();
        let uuid = mock.add_vm("vps-1-basic", false);
        mock.create_snapshot(&uuid, "final-backup-x", "d").await.unwrap();
        mock.create_snapshot(&uuid, "final-backup-x", "d").await.unwrap();
        assert_eq!(mock.snapshot_names(&uuid), vec!["final-backup-x".to_string()]);
        assert_eq!(mock.snapshot_conflicts(), 1);

        mock.delete_snapshot(&uuid, "nope").await.unwrap();
        mock.delete_vm(&uuid, true).await.unwrap();
        mock.delete_vm(&uuid, true).await.unwrap();
        assert!(!mock.has_vm(&uuid));
    }
}
