//! `RocksDB` service record store for the VPS lifecycle orchestrator.
//!
//! This crate persists service records and the lifecycle jobs waiting to run
//! against them, using `RocksDB` column families for indexing.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `services`: Primary service records, keyed by `service_id`
//! - `services_by_status`: Index for listing services by status
//! - `pending_jobs`: Queued jobs, ordered by due time
//!
//! Service records are never deleted; `terminated` is a retained terminal state.
//!
//! # Example
//!
//! ```no_run
//! use vps_lifecycle_store::{RocksStore, ServiceStatus, Store};
//!
//! let store = RocksStore::open("/tmp/vps-lifecycle-db").unwrap();
//!
//! // Services waiting for an operator
//! let stuck = store.list_services_by_status(ServiceStatus::SuspensionFailed).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{
    ChangeOrigin, PendingJob, Plan, Service, ServiceConfig, ServiceStatus, StatusChanged,
};

use chrono::{DateTime, Utc};
use vps_lifecycle_core::{JobId, ServiceId};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer so lifecycle code can be written
/// against any backend.
pub trait Store: Send + Sync {
    // =========================================================================
    // Service Operations
    // =========================================================================

    /// Insert or update a service record.
    ///
    /// This also maintains the status index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_service(&self, service: &Service) -> Result<()>;

    /// Get a service by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_service(&self, service_id: ServiceId) -> Result<Option<Service>>;

    /// List all services with a given status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_services_by_status(&self, status: ServiceStatus) -> Result<Vec<Service>>;

    // =========================================================================
    // Pending Job Operations
    // =========================================================================

    /// Persist a job until it is due.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_pending_job(&self, job: &PendingJob) -> Result<()>;

    /// Return up to `limit` jobs due at or before `now`, earliest first.
    ///
    /// Jobs stay stored until [`Store::delete_pending_job`] is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn due_pending_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<PendingJob>>;

    /// Remove a job once it has been handled. Removing an absent job is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete_pending_job(&self, due_at: DateTime<Utc>, job_id: &JobId) -> Result<()>;

    /// Count all stored jobs regardless of due time.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count_pending_jobs(&self) -> Result<usize>;
}
