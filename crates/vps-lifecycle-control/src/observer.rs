//! Lifecycle observer.
//!
//! Turns domain events into job requests. Status changes are mapped by the
//! pure function [`job_for_status_change`] once the billing standing of the
//! service is known; [`LifecycleObserver`] fetches that standing and handles
//! payments, which may lift a suspension directly.

use std::sync::Arc;

use vps_lifecycle_store::{ChangeOrigin, ServiceStatus, StatusChanged, Store};

use crate::billing::BillingLedger;
use crate::clock::{self, Clock};
use crate::error::{LifecycleError, Result};
use crate::lifecycle;
use crate::types::{JobKind, JobRequest, PaymentReceived, TransitionReason};

/// Overdue invoice counts for one service at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BillingStanding {
    /// Unpaid invoices due before now.
    pub overdue: u64,
    /// Unpaid invoices due before the extended-overdue threshold.
    pub extended_overdue: u64,
}

/// Decide which job, if any, a status change calls for.
///
/// Only administrative changes trigger jobs; changes recorded by jobs or by
/// billing are outcomes, not requests.
#[must_use]
pub fn job_for_status_change(
    event: &StatusChanged,
    standing: BillingStanding,
) -> Option<JobRequest> {
    if event.origin != ChangeOrigin::Admin || event.old == event.new {
        return None;
    }

    match (event.old, event.new) {
        (_, ServiceStatus::Suspended) => {
            let reason = if standing.overdue > 0 {
                TransitionReason::PaymentOverdue
            } else {
                TransitionReason::ManualSuspension
            };
            Some(JobRequest::new(JobKind::Suspend, event.service_id, reason))
        }
        (ServiceStatus::Suspended, ServiceStatus::Active) => Some(JobRequest::new(
            JobKind::Unsuspend,
            event.service_id,
            TransitionReason::ManualUnsuspension,
        )),
        (_, ServiceStatus::Cancelled | ServiceStatus::Terminated) => {
            let reason = if standing.extended_overdue > 0 {
                TransitionReason::ExtendedPaymentOverdue
            } else {
                TransitionReason::ServiceCancelled
            };
            Some(JobRequest::new(
                JobKind::Terminate {
                    create_backup: true,
                },
                event.service_id,
                reason,
            ))
        }
        _ => None,
    }
}

/// What a payment did to its service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The service was suspended and nothing else is overdue: it is active again.
    Unsuspended {
        /// The recorded `suspended` to `active` change.
        change: StatusChanged,
        /// Start job to run, when auto-unsuspend also powers the VM on.
        job: Option<JobRequest>,
    },
    /// Other overdue invoices keep the service suspended.
    StillOverdue {
        /// Remaining overdue invoices.
        remaining: u64,
    },
    /// The service was not suspended; nothing to do.
    NotSuspended(ServiceStatus),
}

/// Maps events to job requests.
pub struct LifecycleObserver<S: Store> {
    store: Arc<S>,
    billing: Arc<dyn BillingLedger>,
    clock: Arc<dyn Clock>,
    extended_overdue: std::time::Duration,
    start_vm_on_auto_unsuspend: bool,
}

impl<S: Store> LifecycleObserver<S> {
    /// Create an observer.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        billing: Arc<dyn BillingLedger>,
        clock: Arc<dyn Clock>,
        extended_overdue: std::time::Duration,
        start_vm_on_auto_unsuspend: bool,
    ) -> Self {
        Self {
            store,
            billing,
            clock,
            extended_overdue,
            start_vm_on_auto_unsuspend,
        }
    }

    /// Billing standing of a service right now.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be queried.
    pub async fn standing(&self, event: &StatusChanged) -> Result<BillingStanding> {
        let now = self.clock.now();
        let mut standing = BillingStanding::default();

        match event.new {
            ServiceStatus::Suspended => {
                standing.overdue = self
                    .billing
                    .count_unpaid_due_before(event.service_id, now, None)
                    .await?;
            }
            ServiceStatus::Cancelled | ServiceStatus::Terminated => {
                let cutoff = clock::before(now, self.extended_overdue);
                standing.extended_overdue = self
                    .billing
                    .count_unpaid_due_before(event.service_id, cutoff, None)
                    .await?;
            }
            _ => {}
        }

        Ok(standing)
    }

    /// Handle a status change.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be queried.
    pub async fn on_status_changed(&self, event: &StatusChanged) -> Result<Option<JobRequest>> {
        if event.origin != ChangeOrigin::Admin {
            return Ok(None);
        }

        let standing = self.standing(event).await?;
        let request = job_for_status_change(event, standing);

        if let Some(request) = &request {
            tracing::info!(
                service_id = %event.service_id,
                old_status = %event.old,
                new_status = %event.new,
                job = %request.kind,
                reason = %request.reason,
                "Lifecycle job requested"
            );
        }

        Ok(request)
    }

    /// Handle a payment. A suspended service with no other overdue invoice
    /// is set back to `active` without a hypervisor call.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::ServiceNotFound` for an unknown service, or
    /// an error if the ledger or store fails.
    pub async fn on_payment_received(&self, event: &PaymentReceived) -> Result<PaymentOutcome> {
        let mut service = self
            .store
            .get_service(event.service_id)?
            .ok_or(LifecycleError::ServiceNotFound(event.service_id))?;

        tracing::info!(
            service_id = %event.service_id,
            invoice_id = %event.invoice_id,
            status = %service.status,
            "Payment processed for VPS service"
        );

        if service.status != ServiceStatus::Suspended {
            return Ok(PaymentOutcome::NotSuspended(service.status));
        }

        let now = self.clock.now();
        let remaining = self
            .billing
            .count_unpaid_due_before(event.service_id, now, Some(event.invoice_id))
            .await?;
        if remaining > 0 {
            tracing::info!(
                service_id = %event.service_id,
                remaining,
                "Service stays suspended, other invoices overdue"
            );
            return Ok(PaymentOutcome::StillOverdue { remaining });
        }

        service.config.unsuspended_by_invoice = Some(event.invoice_id);
        let change = lifecycle::record_status(
            self.store.as_ref(),
            &mut service,
            ServiceStatus::Active,
            ChangeOrigin::Billing,
            now,
        )?;

        tracing::info!(
            service_id = %event.service_id,
            invoice_id = %event.invoice_id,
            "VPS service auto-unsuspended after payment"
        );

        let job = self.start_vm_on_auto_unsuspend.then(|| {
            JobRequest::new(
                JobKind::Unsuspend,
                event.service_id,
                TransitionReason::PaymentReceived,
            )
        });
        Ok(PaymentOutcome::Unsuspended { change, job })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::MemoryBillingLedger;
    use crate::clock::FixedClock;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;
    use vps_lifecycle_core::{InvoiceId, ServiceId, UserId};
    use vps_lifecycle_store::{Plan, RocksStore, Service};

    fn admin(old: ServiceStatus, new: ServiceStatus) -> StatusChanged {
        StatusChanged {
            service_id: ServiceId::new(1),
            old,
            new,
            origin: ChangeOrigin::Admin,
        }
    }

    #[test]
    fn suspension_reason_follows_overdue_invoices() {
        let event = admin(ServiceStatus::Active, ServiceStatus::Suspended);

        let overdue = job_for_status_change(
            &event,
            BillingStanding {
                overdue: 1,
                extended_overdue: 0,
            },
        )
        .unwrap();
        assert_eq!(overdue.kind, JobKind::Suspend);
        assert_eq!(overdue.reason, TransitionReason::PaymentOverdue);

        let manual = job_for_status_change(&event, BillingStanding::default()).unwrap();
        assert_eq!(manual.reason, TransitionReason::ManualSuspension);
    }

    #[test]
    fn unsuspend_only_from_suspended() {
        let request = job_for_status_change(
            &admin(ServiceStatus::Suspended, ServiceStatus::Active),
            BillingStanding::default(),
        )
        .unwrap();
        assert_eq!(request.kind, JobKind::Unsuspend);

        assert!(job_for_status_change(
            &admin(ServiceStatus::Pending, ServiceStatus::Active),
            BillingStanding::default()
        )
        .is_none());
    }

    #[test]
    fn termination_always_backs_up() {
        for target in [ServiceStatus::Cancelled, ServiceStatus::Terminated] {
            let request = job_for_status_change(
                &admin(ServiceStatus::Active, target),
                BillingStanding::default(),
            )
            .unwrap();
            assert_eq!(
                request.kind,
                JobKind::Terminate {
                    create_backup: true
                }
            );
            assert_eq!(request.reason, TransitionReason::ServiceCancelled);
        }

        let extended = job_for_status_change(
            &admin(ServiceStatus::Suspended, ServiceStatus::Terminated),
            BillingStanding {
                overdue: 2,
                extended_overdue: 1,
            },
        )
        .unwrap();
        assert_eq!(extended.reason, TransitionReason::ExtendedPaymentOverdue);
    }

    #[test]
    fn job_and_billing_changes_are_ignored() {
        for origin in [ChangeOrigin::Job, ChangeOrigin::Billing] {
            let event = StatusChanged {
                origin,
                ..admin(ServiceStatus::Active, ServiceStatus::Suspended)
            };
            assert!(job_for_status_change(&event, BillingStanding::default()).is_none());
        }
        assert!(job_for_status_change(
            &admin(ServiceStatus::Suspended, ServiceStatus::Suspended),
            BillingStanding::default()
        )
        .is_none());
    }

    struct Fixture {
        store: Arc<RocksStore>,
        ledger: Arc<MemoryBillingLedger>,
        clock: Arc<FixedClock>,
        _dir: TempDir,
    }

    fn fixture(status: ServiceStatus) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap(),
        ));
        let mut service = Service::new(
            ServiceId::new(1),
            UserId::new(7),
            "Basic",
            Plan::default(),
            clock.now(),
        );
        service.status = status;
        store.put_service(&service).unwrap();

        Fixture {
            store,
            ledger: Arc::new(MemoryBillingLedger::new()),
            clock,
            _dir: dir,
        }
    }

    fn observer(f: &Fixture, start_vm: bool) -> LifecycleObserver<RocksStore> {
        LifecycleObserver::new(
            f.store.clone(),
            f.ledger.clone(),
            f.clock.clone(),
            std::time::Duration::from_secs(14 * 86_400),
            start_vm,
        )
    }

    #[tokio::test]
    async fn extended_overdue_uses_fourteen_day_cutoff() {
        let f = fixture(ServiceStatus::Active);
        let now = f.clock.now();
        f.ledger
            .add_unpaid(ServiceId::new(1), InvoiceId::new(1), now - Duration::days(10));

        let observer = observer(&f, false);
        let event = admin(ServiceStatus::Active, ServiceStatus::Cancelled);
        let request = observer.on_status_changed(&event).await.unwrap().unwrap();
        assert_eq!(request.reason, TransitionReason::ServiceCancelled);

        f.clock.advance(Duration::days(5));
        let request = observer.on_status_changed(&event).await.unwrap().unwrap();
        assert_eq!(request.reason, TransitionReason::ExtendedPaymentOverdue);
    }

    #[tokio::test]
    async fn payment_lifts_suspension_without_a_job() {
        let f = fixture(ServiceStatus::Suspended);
        let now = f.clock.now();
        f.ledger
            .add_unpaid(ServiceId::new(1), InvoiceId::new(5), now - Duration::days(3));

        let payment = PaymentReceived {
            service_id: ServiceId::new(1),
            invoice_id: InvoiceId::new(5),
        };
        let outcome = observer(&f, false).on_payment_received(&payment).await.unwrap();
        assert_eq!(
            outcome,
            PaymentOutcome::Unsuspended {
                change: StatusChanged {
                    service_id: ServiceId::new(1),
                    old: ServiceStatus::Suspended,
                    new: ServiceStatus::Active,
                    origin: ChangeOrigin::Billing,
                },
                job: None,
            }
        );

        let service = f.store.get_service(ServiceId::new(1)).unwrap().unwrap();
        assert_eq!(service.status, ServiceStatus::Active);
        assert_eq!(service.updated_at, now);
        assert_eq!(service.config.unsuspended_by_invoice, Some(InvoiceId::new(5)));
    }

    #[tokio::test]
    async fn payment_with_other_overdue_invoices_keeps_suspension() {
        let f = fixture(ServiceStatus::Suspended);
        let now = f.clock.now();
        f.ledger
            .add_unpaid(ServiceId::new(1), InvoiceId::new(5), now - Duration::days(3));
        f.ledger
            .add_unpaid(ServiceId::new(1), InvoiceId::new(6), now - Duration::days(1));

        let payment = PaymentReceived {
            service_id: ServiceId::new(1),
            invoice_id: InvoiceId::new(5),
        };
        let outcome = observer(&f, false).on_payment_received(&payment).await.unwrap();
        assert_eq!(outcome, PaymentOutcome::StillOverdue { remaining: 1 });

        let service = f.store.get_service(ServiceId::new(1)).unwrap().unwrap();
        assert_eq!(service.status, ServiceStatus::Suspended);
    }

    #[tokio::test]
    async fn payment_can_request_vm_start() {
        let f = fixture(ServiceStatus::Suspended);
        let payment = PaymentReceived {
            service_id: ServiceId::new(1),
            invoice_id: InvoiceId::new(5),
        };
        let outcome = observer(&f, true).on_payment_received(&payment).await.unwrap();
        let PaymentOutcome::Unsuspended { job: Some(job), .. } = outcome else {
            panic!("expected an unsuspend job, got {outcome:?}");
        };
        assert_eq!(job.kind, JobKind::Unsuspend);
        assert_eq!(job.reason, TransitionReason::PaymentReceived);
    }

    #[tokio::test]
    async fn payment_for_active_service_is_noop() {
        let f = fixture(ServiceStatus::Active);
        let payment = PaymentReceived {
            service_id: ServiceId::new(1),
            invoice_id: InvoiceId::new(5),
        };
        let outcome = observer(&f, false).on_payment_received(&payment).await.unwrap();
        assert_eq!(outcome, PaymentOutcome::NotSuspended(ServiceStatus::Active));
    }
}
