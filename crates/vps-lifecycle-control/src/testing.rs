//! Shared fixture for job, worker and service tests.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use vps_lifecycle_core::{ServiceId, UserId};
use vps_lifecycle_hypervisor::{vm_name, ControlPlaneError, MockControlPlane};
use vps_lifecycle_store::{Plan, RocksStore, Service, ServiceStatus, Store};

use crate::billing::MemoryBillingLedger;
use crate::clock::{Clock, FixedClock};
use crate::config::LifecycleConfig;
use crate::jobs::JobContext;
use crate::notify::RecordingNotifier;
use crate::queue::MemoryJobQueue;
use crate::types::{Job, JobKind, JobRequest, TransitionReason};

pub(crate) const PRODUCT: &str = "Basic VPS";

pub(crate) struct Harness {
    pub ctx: Arc<JobContext<RocksStore>>,
    pub store: Arc<RocksStore>,
    pub hypervisor: Arc<MockControlPlane>,
    pub ledger: Arc<MemoryBillingLedger>,
    pub notifier: Arc<RecordingNotifier>,
    pub queue: Arc<MemoryJobQueue>,
    pub clock: Arc<FixedClock>,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(LifecycleConfig::default())
    }

    pub fn with_config(config: LifecycleConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let hypervisor = Arc::new(MockControlPlane::new());
        let ledger = Arc::new(MemoryBillingLedger::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 4, 10, 9, 30, 0).unwrap(),
        ));
        let queue = Arc::new(MemoryJobQueue::new(clock.clone()));
        hypervisor.set_now(clock.now());

        let ctx = Arc::new(JobContext {
            store: store.clone(),
            control_plane: hypervisor.clone(),
            billing: ledger.clone(),
            notifier: notifier.clone(),
            queue: queue.clone(),
            clock: clock.clone(),
            config,
        });

        Self {
            ctx,
            store,
            hypervisor,
            ledger,
            notifier,
            queue,
            clock,
            _dir: dir,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Store a service in `status` without a VM.
    pub fn add_service(&self, id: u64, status: ServiceStatus) -> Service {
        let mut service = Service::new(
            ServiceId::new(id),
            UserId::new(100 + id),
            PRODUCT,
            Plan::default(),
            self.now(),
        );
        service.status = status;
        service.config.os_image = Some(service.plan.os_image.clone());
        self.store.put_service(&service).unwrap();
        service
    }

    /// Store a service in `status` with a VM named after it, and record the
    /// VM's uuid on the service. Returns the uuid.
    pub fn add_service_with_vm(&self, id: u64, status: ServiceStatus) -> String {
        let mut service = self.add_service(id, status);
        let running = status != ServiceStatus::Suspended;
        let uuid = self
            .hypervisor
            .add_vm(&vm_name(service.service_id, PRODUCT), running);
        service.hypervisor_ref = Some(uuid.clone());
        self.store.put_service(&service).unwrap();
        uuid
    }

    pub fn service(&self, id: u64) -> Service {
        self.store.get_service(ServiceId::new(id)).unwrap().unwrap()
    }

    pub fn job(&self, kind: JobKind, id: u64, reason: TransitionReason) -> Job {
        self.ctx
            .job(JobRequest::new(kind, ServiceId::new(id), reason))
    }
}

pub(crate) fn server_error() -> ControlPlaneError {
    ControlPlaneError::Api {
        status: 500,
        message: "internal error".to_string(),
    }
}
