//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use vps_lifecycle_core::{JobId, ServiceId};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{PendingJob, Service, ServiceStatus};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Resolve the service IDs of an index prefix scan.
    fn scan_index(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<Service>> {
        let cf_index = self.cf(cf_name)?;

        let mut services = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf_index, IteratorMode::From(prefix, Direction::Forward));

        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            // Stop if we're past the prefix
            if !key.starts_with(prefix) {
                break;
            }

            let Some(service_id) = keys::extract_trailing_service_id(&key) else {
                tracing::warn!(cf = cf_name, "Skipping malformed index key");
                continue;
            };
            if let Some(service) = self.get_service(service_id)? {
                services.push(service);
            }
        }

        Ok(services)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Service Operations
    // =========================================================================

    fn put_service(&self, service: &Service) -> Result<()> {
        let cf_services = self.cf(cf::SERVICES)?;
        let cf_by_status = self.cf(cf::SERVICES_BY_STATUS)?;

        let service_key = keys::service_key(service.service_id);
        let status_service_key =
            keys::status_service_key(service.status.as_u8(), service.service_id);
        let value = Self::serialize(service)?;

        // Check if the service exists to handle status index updates
        let old_status = self
            .db
            .get_cf(&cf_services, &service_key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize::<Service>(&data))
            .transpose()?
            .map(|s| s.status);

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_services, &service_key, &value);

        if let Some(old) = old_status {
            if old != service.status {
                let old_status_key = keys::status_service_key(old.as_u8(), service.service_id);
                batch.delete_cf(&cf_by_status, &old_status_key);
            }
        }
        batch.put_cf(&cf_by_status, &status_service_key, []);

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_service(&self, service_id: ServiceId) -> Result<Option<Service>> {
        let cf = self.cf(cf::SERVICES)?;
        let key = keys::service_key(service_id);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_services_by_status(&self, status: ServiceStatus) -> Result<Vec<Service>> {
        self.scan_index(cf::SERVICES_BY_STATUS, &keys::status_prefix(status.as_u8()))
    }

    // =========================================================================
    // Pending Job Operations
    // =========================================================================

    fn put_pending_job(&self, job: &PendingJob) -> Result<()> {
        let cf = self.cf(cf::PENDING_JOBS)?;
        let key = keys::pending_job_key(job.due_at, &job.job_id);
        let value = Self::serialize(job)?;

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn due_pending_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<PendingJob>> {
        let cf = self.cf(cf::PENDING_JOBS)?;
        let cutoff = keys::due_millis(now);

        let mut jobs = Vec::new();
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);

        for item in iter {
            if jobs.len() >= limit {
                break;
            }

            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            // Keys are ordered by due time, so the first future job ends the scan
            match keys::pending_job_due_millis(&key) {
                Some(due) if due <= cutoff => jobs.push(Self::deserialize(&value)?),
                _ => break,
            }
        }

        Ok(jobs)
    }

    fn delete_pending_job(&self, due_at: DateTime<Utc>, job_id: &JobId) -> Result<()> {
        let cf = self.cf(cf::PENDING_JOBS)?;
        let key = keys::pending_job_key(due_at, job_id);

        self.db
            .delete_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn count_pending_jobs(&self) -> Result<usize> {
        let cf = self.cf(cf::PENDING_JOBS)?;

        let mut count = 0usize;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            item.map_err(|e| StoreError::Database(e.to_string()))?;
            count += 1;
        }

        Ok(count)
    }
}
