//! Core types and utilities for the VPS lifecycle orchestrator.
//!
//! This crate provides the foundational types shared by the store, the
//! control-plane client, and the lifecycle jobs:
//!
//! - **Identifiers**: Strongly-typed IDs for services, users, invoices, and jobs
//! - **Parse errors**: [`IdError`] for identifiers arriving as strings
//!
//! # Example
//!
//! ```
//! use vps_lifecycle_core::{JobId, ServiceId};
//!
//! let service_id: ServiceId = "1042".parse().unwrap();
//! assert_eq!(service_id.get(), 1042);
//!
//! let job_id = JobId::generate();
//! println!("job {job_id} targets service {service_id}");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ids;

pub use ids::{IdError, InvoiceId, JobId, ServiceId, UserId};
