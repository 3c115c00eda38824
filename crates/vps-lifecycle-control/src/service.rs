//! Lifecycle service.
//!
//! The entry point for the billing platform. Administrative status changes
//! and payments come in here, are validated and recorded, and turn into
//! queued jobs through the [`LifecycleObserver`].

use std::sync::Arc;

use vps_lifecycle_core::{JobId, ServiceId};
use vps_lifecycle_hypervisor::{vm_name, CloudInit, CloudInitCommon, CreateVmRequest};
use vps_lifecycle_store::{ChangeOrigin, Service, ServiceStatus, StatusChanged, Store};

use crate::error::{LifecycleError, Result};
use crate::jobs::JobContext;
use crate::lifecycle;
use crate::observer::{LifecycleObserver, PaymentOutcome};
use crate::types::{JobRequest, PaymentReceived};

/// Coordinates status changes, payments and provisioning.
pub struct LifecycleService<S: Store> {
    ctx: Arc<JobContext<S>>,
    observer: LifecycleObserver<S>,
}

impl<S: Store> LifecycleService<S> {
    /// Create a service sharing the job context used by the workers.
    #[must_use]
    pub fn new(ctx: Arc<JobContext<S>>) -> Self {
        let observer = LifecycleObserver::new(
            Arc::clone(&ctx.store),
            Arc::clone(&ctx.billing),
            Arc::clone(&ctx.clock),
            ctx.config.extended_overdue(),
            ctx.config.start_vm_on_auto_unsuspend,
        );
        Self { ctx, observer }
    }

    /// Get the shared job context.
    #[must_use]
    pub const fn context(&self) -> &Arc<JobContext<S>> {
        &self.ctx
    }

    /// Get a service by ID.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::ServiceNotFound` if the service doesn't exist.
    pub fn get_service(&self, service_id: ServiceId) -> Result<Service> {
        self.ctx
            .store
            .get_service(service_id)?
            .ok_or(LifecycleError::ServiceNotFound(service_id))
    }

    /// List services in `status`, ordered by service ID.
    ///
    /// Operators use this to find services stuck in a `*_failed` status.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn list_services(&self, status: ServiceStatus) -> Result<Vec<Service>> {
        Ok(self.ctx.store.list_services_by_status(status)?)
    }

    /// Apply an administrative status change.
    ///
    /// Targets that need the VM to change (`suspended`, `terminated`, and
    /// `active` from `suspended`) are only validated here; the job records
    /// them once the hypervisor has acted. Other targets are written
    /// immediately. Returns the id of the job queued in response, if any.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::ServiceNotFound` for an unknown service,
    /// `LifecycleError::InvalidTransition` if the change is not allowed, or
    /// an error if the store, ledger or queue fails.
    pub async fn request_status_change(
        &self,
        service_id: ServiceId,
        target: ServiceStatus,
    ) -> Result<Option<JobId>> {
        let service = self.get_service(service_id)?;
        let current = service.status;

        if current == target {
            tracing::debug!(service_id = %service_id, status = %current, "Status unchanged");
            return Ok(None);
        }
        if lifecycle::is_job_only(target) {
            return Err(LifecycleError::InvalidTransition {
                service_id,
                from: current,
                to: target,
            });
        }
        lifecycle::validate_transition(service_id, current, target)?;

        let event = if lifecycle::requires_job(current, target) {
            StatusChanged {
                service_id,
                old: current,
                new: target,
                origin: ChangeOrigin::Admin,
            }
        } else {
            let mut service = service;
            lifecycle::record_status(
                self.ctx.store.as_ref(),
                &mut service,
                target,
                ChangeOrigin::Admin,
                self.ctx.clock.now(),
            )?
        };

        tracing::info!(
            service_id = %service_id,
            old_status = %event.old,
            new_status = %event.new,
            "Status change requested"
        );

        self.on_status_changed(&event).await
    }

    /// Queue the job a status change calls for, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger or queue fails.
    pub async fn on_status_changed(&self, event: &StatusChanged) -> Result<Option<JobId>> {
        match self.observer.on_status_changed(event).await? {
            Some(request) => self.enqueue(request).map(Some),
            None => Ok(None),
        }
    }

    /// Handle a payment-received event. Returns the id of the start job
    /// queued when auto-unsuspend also powers the VM on.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::ServiceNotFound` for an unknown service, or
    /// an error if the ledger, store or queue fails.
    pub async fn payment_received(&self, event: &PaymentReceived) -> Result<Option<JobId>> {
        match self.observer.on_payment_received(event).await? {
            PaymentOutcome::Unsuspended {
                job: Some(request), ..
            } => self.enqueue(request).map(Some),
            PaymentOutcome::Unsuspended { job: None, .. }
            | PaymentOutcome::StillOverdue { .. }
            | PaymentOutcome::NotSuspended(_) => Ok(None),
        }
    }

    /// Queue a job using the configured retry policy for its kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot store the job.
    pub fn enqueue(&self, request: JobRequest) -> Result<JobId> {
        let job = self.ctx.job(request);
        let job_id = job.id;

        tracing::info!(
            job_id = %job_id,
            job = %job.kind,
            service_id = %job.service_id,
            reason = %job.reason,
            "Lifecycle job queued"
        );

        self.ctx.queue.enqueue(job)?;
        Ok(job_id)
    }

    /// Create the VM of a pending service and mark the service active.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::InvalidTransition` if the service is not
    /// pending, `LifecycleError::AlreadyProvisioned` if a VM with its name
    /// already exists, or an error if the control plane or store fails.
    pub async fn provision(&self, service_id: ServiceId) -> Result<Service> {
        let mut service = self.get_service(service_id)?;
        if service.status != ServiceStatus::Pending {
            return Err(LifecycleError::InvalidTransition {
                service_id,
                from: service.status,
                to: ServiceStatus::Active,
            });
        }

        let name = vm_name(service_id, &service.product_name);
        match self.ctx.control_plane.find_vm_by_name(&name).await {
            Ok(_) => {
                return Err(LifecycleError::AlreadyProvisioned {
                    service_id,
                    vm_name: name,
                })
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let request = CreateVmRequest {
            name: name.clone(),
            memory_mb: service.plan.memory_mb,
            vcpus: service.plan.cpu_cores,
            disk_size_gb: service.plan.disk_gb,
            image_name: service.plan.os_image.clone(),
            start_on_create: true,
            cloud_init: CloudInit {
                common_fields: CloudInitCommon {
                    hostname: name.clone(),
                    ..CloudInitCommon::default()
                },
                ssh_keys: Vec::new(),
            },
        };
        let vm = self.ctx.control_plane.create_vm(&request).await?;

        let now = self.ctx.clock.now();
        service.hypervisor_ref = Some(vm.uuid.clone());
        service.config.vm_name = Some(name);
        service.config.os_image = Some(service.plan.os_image.clone());
        service.config.created_at = Some(now);
        lifecycle::record_status(
            self.ctx.store.as_ref(),
            &mut service,
            ServiceStatus::Active,
            ChangeOrigin::Admin,
            now,
        )?;

        tracing::info!(
            service_id = %service_id,
            vm_uuid = %vm.uuid,
            vm_name = %vm.name,
            "VPS provisioned"
        );

        Ok(service)
    }
}
