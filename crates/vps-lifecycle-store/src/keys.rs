//! Key encoding utilities for `RocksDB`.
//!
//! Numeric identifiers are stored big-endian and timestamps as unsigned
//! milliseconds so that lexicographic key order equals numeric order.

use chrono::{DateTime, Utc};
use vps_lifecycle_core::{JobId, ServiceId};

/// Encode a service key (the big-endian service ID).
#[must_use]
pub fn service_key(service_id: ServiceId) -> Vec<u8> {
    service_id.to_be_bytes().to_vec()
}

/// Encode a status-service index key: `status || service_id`.
#[must_use]
pub fn status_service_key(status: u8, service_id: ServiceId) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(status);
    key.extend_from_slice(&service_id.to_be_bytes());
    key
}

/// Encode a status prefix for scanning all services with a given status.
#[must_use]
pub fn status_prefix(status: u8) -> Vec<u8> {
    vec![status]
}

/// Extract the service ID from the trailing eight bytes of an index key.
///
/// Returns `None` if the key is shorter than eight bytes.
#[must_use]
pub fn extract_trailing_service_id(key: &[u8]) -> Option<ServiceId> {
    let start = key.len().checked_sub(8)?;
    let bytes: [u8; 8] = key[start..].try_into().ok()?;
    Some(ServiceId::from_be_bytes(bytes))
}

/// Milliseconds since the epoch, clamped at zero.
#[must_use]
pub fn due_millis(at: DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp_millis()).unwrap_or(0)
}

/// Encode a pending-job key: `due_at_millis || job_id`.
#[must_use]
pub fn pending_job_key(due_at: DateTime<Utc>, job_id: &JobId) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(&due_millis(due_at).to_be_bytes());
    key.extend_from_slice(job_id.as_bytes());
    key
}

/// Decode the due time (in milliseconds) from a pending-job key.
#[must_use]
pub fn pending_job_due_millis(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}
