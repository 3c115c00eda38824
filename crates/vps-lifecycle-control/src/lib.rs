//! Lifecycle orchestration for VPS services.
//!
//! This crate reconciles billing state (paid, overdue, cancelled) with
//! hypervisor state (running, stopped, deleted). Status changes and payments
//! arrive through [`LifecycleService`]; the [`LifecycleObserver`] turns them
//! into jobs; [`Worker`]s run the jobs against the control plane with bounded
//! retries.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Billing platform (HTTP api)                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     LifecycleService                        │
//! │   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐    │
//! │   │  Transition  │   │  Lifecycle   │   │  Provision   │    │
//! │   │  validation  │   │  Observer    │   │              │    │
//! │   └──────────────┘   └──────────────┘   └──────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ JobQueue
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │    Workers: suspend / unsuspend / terminate / cleanup       │
//! └─────────────────────────────────────────────────────────────┘
//!               │              │              │
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────┐   ┌──────────────┐
//!        │  Store   │   │ Billing  │   │ Control plane│
//!        │ (RocksDB)│   │  ledger  │   │ (hypervisor) │
//!        └──────────┘   └──────────┘   └──────────────┘
//! ```
//!
//! # Status machine
//!
//! - `pending` → `active` (provisioned) or `cancelled`
//! - `active` → `suspended`, `cancelled` or `terminated`
//! - `suspended` → `active`, `cancelled` or `terminated`
//! - `suspension_failed` / `termination_failed` are written only by jobs
//! - `terminated` is final
//!
//! See the [`lifecycle`] module for the full table and the job transition
//! specs.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod api;
pub mod billing;
pub mod clock;
pub mod config;
pub mod error;
pub mod jobs;
pub mod lifecycle;
pub mod notify;
pub mod observer;
pub mod queue;
pub mod retry;
pub mod service;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use billing::{BillingLedger, HttpBillingLedger};
pub use clock::{Clock, SystemClock};
pub use config::LifecycleConfig;
pub use error::{LifecycleError, Result};
pub use jobs::{JobContext, JobOutcome};
pub use notify::{LogNotifier, Notification, Notifier, Severity, WebhookNotifier};
pub use observer::{LifecycleObserver, PaymentOutcome};
pub use queue::{JobQueue, MemoryJobQueue, QueuedJob, StoreJobQueue};
pub use retry::RetryPolicy;
pub use service::LifecycleService;
pub use types::{Job, JobKind, JobRequest, PaymentReceived, TransitionReason};
pub use worker::{Disposition, Worker};

#[cfg(any(test, feature = "test-utils"))]
pub use billing::MemoryBillingLedger;
#[cfg(any(test, feature = "test-utils"))]
pub use clock::FixedClock;
#[cfg(any(test, feature = "test-utils"))]
pub use notify::RecordingNotifier;

// Re-export commonly used types from dependencies for convenience
pub use vps_lifecycle_core::{InvoiceId, JobId, ServiceId, UserId};
pub use vps_lifecycle_store::{Service, ServiceStatus, StatusChanged};
