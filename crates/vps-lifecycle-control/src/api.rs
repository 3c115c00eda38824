//! HTTP ingestion surface.
//!
//! # Routes
//!
//! - `GET /health` - Liveness
//! - `GET /ready` - Readiness (store and control plane reachable)
//! - `GET /v1/services?status=<status>` - Services in one status, for operators
//! - `POST /v1/services/:service_id/status` - Administrative status change
//! - `POST /v1/services/:service_id/provision` - Provision a pending service
//! - `POST /v1/billing/payments` - Payment received

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vps_lifecycle_core::{JobId, ServiceId};
use vps_lifecycle_store::{Service, ServiceStatus, Store};

use crate::error::LifecycleError;
use crate::service::LifecycleService;
use crate::types::PaymentReceived;

/// State shared across handlers.
pub struct ApiState<S: Store> {
    /// The lifecycle service.
    pub lifecycle: Arc<LifecycleService<S>>,
}

impl<S: Store> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

/// Query of the service listing.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Status to list.
    pub status: ServiceStatus,
}

/// Body of an administrative status change.
#[derive(Debug, Deserialize)]
pub struct StatusChangeBody {
    /// Requested status.
    pub status: ServiceStatus,
}

/// Response for requests that may queue a job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    /// Service the request applied to.
    pub service_id: ServiceId,
    /// Job queued in response, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

/// A service as returned by provisioning.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponse {
    /// Service ID.
    pub service_id: ServiceId,
    /// Current status.
    pub status: ServiceStatus,
    /// Control-plane VM uuid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hypervisor_ref: Option<String>,
    /// VM name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_name: Option<String>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl From<Service> for ServiceResponse {
    fn from(service: Service) -> Self {
        Self {
            service_id: service.service_id,
            status: service.status,
            hypervisor_ref: service.hypervisor_ref,
            vm_name: service.config.vm_name,
            updated_at: service.updated_at,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// A lifecycle error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(LifecycleError);

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.0.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Get the error code string for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match &self.0 {
            LifecycleError::ServiceNotFound(_) => "not_found",
            LifecycleError::InvalidTransition { .. } => "invalid_transition",
            LifecycleError::AlreadyProvisioned { .. } => "already_provisioned",
            LifecycleError::ControlPlane(_) => "control_plane_error",
            LifecycleError::Billing(_) => "billing_error",
            LifecycleError::Notification(_) => "notification_error",
            LifecycleError::Store(_) | LifecycleError::Codec(_) | LifecycleError::Config(_) => {
                "internal_error"
            }
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "vps-lifecycle-control",
    })
}

async fn ready<S: Store + 'static>(State(state): State<ApiState<S>>) -> impl IntoResponse {
    let ctx = state.lifecycle.context();

    if let Err(e) = ctx.queue.len() {
        tracing::warn!(error = %e, "Readiness check failed: job queue");
        return (StatusCode::SERVICE_UNAVAILABLE, "not ready");
    }

    match ctx.control_plane.host_status().await {
        Ok(host) => {
            tracing::debug!(hostname = %host.hostname, "Control plane reachable");
            (StatusCode::OK, "ready")
        }
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed: control plane");
            (StatusCode::SERVICE_UNAVAILABLE, "not ready")
        }
    }
}

async fn list_services<S: Store + 'static>(
    State(state): State<ApiState<S>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ServiceResponse>>, ApiError> {
    let services = state.lifecycle.list_services(query.status)?;
    Ok(Json(services.into_iter().map(Into::into).collect()))
}

async fn change_status<S: Store + 'static>(
    State(state): State<ApiState<S>>,
    Path(service_id): Path<ServiceId>,
    Json(body): Json<StatusChangeBody>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = state
        .lifecycle
        .request_status_change(service_id, body.status)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse { service_id, job_id }),
    ))
}

async fn record_payment<S: Store + 'static>(
    State(state): State<ApiState<S>>,
    Json(event): Json<PaymentReceived>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = state.lifecycle.payment_received(&event).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            service_id: event.service_id,
            job_id,
        }),
    ))
}

async fn provision<S: Store + 'static>(
    State(state): State<ApiState<S>>,
    Path(service_id): Path<ServiceId>,
) -> Result<Json<ServiceResponse>, ApiError> {
    let service = state.lifecycle.provision(service_id).await?;
    Ok(Json(service.into()))
}

/// Build the router.
pub fn create_router<S: Store + 'static>(state: ApiState<S>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready::<S>))
        .route("/v1/services", get(list_services::<S>))
        .route(
            "/v1/services/:service_id/status",
            post(change_status::<S>),
        )
        .route(
            "/v1/services/:service_id/provision",
            post(provision::<S>),
        )
        .route("/v1/billing/payments", post(record_payment::<S>))
        .with_state(state)
}
