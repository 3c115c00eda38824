//! Database schema definitions and column families.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary service records, keyed by `service_id`.
    pub const SERVICES: &str = "services";

    /// Index: services by status, keyed by `status || service_id`.
    pub const SERVICES_BY_STATUS: &str = "services_by_status";

    /// Queued lifecycle jobs, keyed by `due_at_millis || job_id`.
    pub const PENDING_JOBS: &str = "pending_jobs";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::SERVICES,
        cf::SERVICES_BY_STATUS,
        cf::PENDING_JOBS,
    ]
}
