//! Control-plane client trait and its HTTP implementation.
//!
//! VM uuids and snapshot names are appended to the API root as
//! percent-encoded path segments, so names containing `/`, `?` or `#`
//! address the right resource.
//!
//! Operations that move a resource into a state it already has are reported
//! as success: deleting a missing VM or snapshot (404), powering a VM into
//! its current power state (409), and creating a snapshot whose name is
//! taken (409). Retried jobs rely on this.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::error::{ControlPlaneError, Result};
use crate::types::{CreateVmRequest, HostStatus, Snapshot, Vm, VmAction};

/// Operations the lifecycle engine needs from the hypervisor control plane.
///
/// Abstracted so jobs can run against [`crate::MockControlPlane`] in tests.
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// Report the hypervisor host's status. Used as a connectivity check.
    ///
    /// # Errors
    ///
    /// Returns an error if the control plane is unreachable, rejects the
    /// token, or answers without a host name.
    async fn host_status(&self) -> Result<HostStatus>;

    /// Create a VM.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the control plane rejects it.
    async fn create_vm(&self, request: &CreateVmRequest) -> Result<Vm>;

    /// List every VM known to the control plane.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body cannot be decoded.
    async fn list_vms(&self) -> Result<Vec<Vm>>;

    /// Find a VM by its exact name.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError::VmNotFound`] when no VM carries `name`,
    /// or any error from [`ControlPlaneClient::list_vms`].
    async fn find_vm_by_name(&self, name: &str) -> Result<Vm> {
        self.list_vms()
            .await?
            .into_iter()
            .find(|vm| vm.name == name)
            .ok_or_else(|| ControlPlaneError::VmNotFound(name.to_string()))
    }

    /// Power a VM on or off.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, unless the VM is already in
    /// the requested power state.
    async fn vm_action(&self, vm_uuid: &str, action: VmAction) -> Result<()>;

    /// Delete a VM, optionally with its disks.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails. A VM that is already gone is
    /// not an error.
    async fn delete_vm(&self, vm_uuid: &str, delete_disks: bool) -> Result<()>;

    /// Snapshot a VM's disks.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails. A snapshot with the same name
    /// that already exists is not an error.
    async fn create_snapshot(&self, vm_uuid: &str, name: &str, description: &str) -> Result<()>;

    /// List a VM's snapshots.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body cannot be decoded.
    async fn list_snapshots(&self, vm_uuid: &str) -> Result<Vec<Snapshot>>;

    /// Delete one snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails. A snapshot that is already
    /// gone is not an error.
    async fn delete_snapshot(&self, vm_uuid: &str, name: &str) -> Result<()>;
}

/// HTTP client for the control plane's REST API.
///
/// Every request carries the API token as a bearer credential.
#[derive(Debug, Clone)]
pub struct HttpControlPlaneClient {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl HttpControlPlaneClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root, e.g. `http://flint:5550/api`
    /// * `api_token` - bearer token for the control plane
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");

        Self::with_client(client, base_url, api_token)
    }

    /// Create a client around an existing reqwest client.
    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
        }
    }

    /// The API root this client talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The API root with `segments` appended, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ControlPlaneError::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| ControlPlaneError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request and turn non-2xx responses into [`ControlPlaneError::Api`].
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.bearer_auth(&self.api_token).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(api_error(response).await)
        }
    }

    /// Like [`Self::send`], but treats `tolerated` as success.
    async fn send_tolerating(&self, request: RequestBuilder, tolerated: StatusCode) -> Result<()> {
        match self.send(request).await {
            Ok(_) => Ok(()),
            Err(ControlPlaneError::Api { status, message }) if status == tolerated.as_u16() => {
                tracing::debug!(status, message = %message, "Control plane reported no-op");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Error body returned by the control plane.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

async fn api_error(response: Response) -> ControlPlaneError {
    let status = response.status();
    let message = response
        .json::<ErrorResponse>()
        .await
        .map(|e| e.error)
        .unwrap_or_else(|_| format!("Control plane returned status {status}"));

    ControlPlaneError::Api {
        status: status.as_u16(),
        message,
    }
}

#[derive(Debug, Serialize)]
struct ActionRequest {
    action: VmAction,
}

#[derive(Debug, Serialize)]
struct CreateSnapshotRequest<'a> {
    name: &'a str,
    description: &'a str,
}

#[async_trait]
impl ControlPlaneClient for HttpControlPlaneClient {
    async fn host_status(&self) -> Result<HostStatus> {
        let url = self.url(&["host", "status"])?;
        let response = self.send(self.client.get(url)).await?;
        Ok(response.json().await?)
    }

    async fn create_vm(&self, request: &CreateVmRequest) -> Result<Vm> {
        let url = self.url(&["vms"])?;
        let response = self.send(self.client.post(url).json(request)).await?;
        let vm: Vm = response.json().await?;
        tracing::debug!(vm = %vm.name, uuid = %vm.uuid, "Created VM");
        Ok(vm)
    }

    async fn list_vms(&self) -> Result<Vec<Vm>> {
        let url = self.url(&["vms"])?;
        let response = self.send(self.client.get(url)).await?;
        Ok(response.json().await?)
    }

    async fn vm_action(&self, vm_uuid: &str, action: VmAction) -> Result<()> {
        let url = self.url(&["vms", vm_uuid, "action"])?;
        let request = self.client.post(url).json(&ActionRequest { action });
        self.send_tolerating(request, StatusCode::CONFLICT).await?;
        tracing::debug!(uuid = %vm_uuid, action = %action, "VM action accepted");
        Ok(())
    }

    async fn delete_vm(&self, vm_uuid: &str, delete_disks: bool) -> Result<()> {
        let url = self.url(&["vms", vm_uuid])?;
        let request = self
            .client
            .delete(url)
            .query(&[("deleteDisks", delete_disks)]);
        self.send_tolerating(request, StatusCode::NOT_FOUND).await?;
        tracing::debug!(uuid = %vm_uuid, delete_disks, "Deleted VM");
        Ok(())
    }

    async fn create_snapshot(&self, vm_uuid: &str, name: &str, description: &str) -> Result<()> {
        let url = self.url(&["vms", vm_uuid, "snapshots"])?;
        let request = self
            .client
            .post(url)
            .json(&CreateSnapshotRequest { name, description });
        self.send_tolerating(request, StatusCode::CONFLICT).await?;
        tracing::debug!(uuid = %vm_uuid, snapshot = %name, "Created snapshot");
        Ok(())
    }

    async fn list_snapshots(&self, vm_uuid: &str) -> Result<Vec<Snapshot>> {
        let url = self.url(&["vms", vm_uuid, "snapshots"])?;
        let response = self.send(self.client.get(url)).await?;
        Ok(response.json().await?)
    }

    async fn delete_snapshot(&self, vm_uuid: &str, name: &str) -> Result<()> {
        let url = self.url(&["vms", vm_uuid, "snapshots", name])?;
        self.send_tolerating(self.client.delete(url), StatusCode::NOT_FOUND).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpControlPlaneClient {
        HttpControlPlaneClient::new(format!("{}/api/", server.uri()), "secret")
    }

    #[test]
    fn base_url_is_normalized() {
        let client = HttpControlPlaneClient::new("http://localhost:5550/api/", "t");
        assert_eq!(client.base_url(), "http://localhost:5550/api");
    }

    #[tokio::test]
    async fn find_vm_by_name_scans_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/vms"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"uuid": "u-1", "name": "vps-1-basic", "status": "running"},
                {"uuid": "u-2", "name": "vps-2-basic", "status": "stopped"}
            ])))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let vm = client.find_vm_by_name("vps-2-basic").await.unwrap();
        assert_eq!(vm.uuid, "u-2");

        let err = client.find_vm_by_name("vps-3-basic").await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::VmNotFound(ref n) if n == "vps-3-basic"));
    }

    #[tokio::test]
    async fn vm_action_posts_lowercase_action() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/vms/u-1/action"))
            .and(body_json(json!({"action": "stop"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .vm_action("u-1", VmAction::Stop)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn vm_action_conflict_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/vms/u-1/action"))
            .respond_with(
                ResponseTemplate::new(409).set_body_json(json!({"error": "already stopped"})),
            )
            .mount(&server)
            .await;

        let result = client_for(&server)
            .vm_action("u-1", VmAction::Stop)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn delete_vm_sends_disk_flag_and_ignores_missing() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/vms/u-1"))
            .and(query_param("deleteDisks", "true"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .delete_vm("u-1", true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn server_error_carries_body_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/vms/u-1/snapshots"))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(json!({"error": "storage busy"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .create_snapshot("u-1", "final-backup-x", "desc")
            .await
            .unwrap_err();
        assert!(err.is_retriable());
        assert!(matches!(
            err,
            ControlPlaneError::Api { status: 503, ref message } if message == "storage busy"
        ));
    }

    #[tokio::test]
    async fn validation_error_falls_back_to_status_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/vms"))
            .respond_with(ResponseTemplate::new(422).set_body_string("nope"))
            .mount(&server)
            .await;

        let request = CreateVmRequest {
            name: "vps-1-basic".to_string(),
            memory_mb: 1024,
            vcpus: 1,
            disk_size_gb: 25,
            image_name: "ubuntu-24.04".to_string(),
            start_on_create: true,
            cloud_init: crate::types::CloudInit::default(),
        };
        let err = client_for(&server).create_vm(&request).await.unwrap_err();
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("422"));
    }

    #[tokio::test]
    async fn list_snapshots_decodes_both_timestamp_keys() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/vms/u-1/snapshots"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "final-backup-2026-01-01-00-00-00", "createdAt": "2026-01-01T00:00:00Z"},
                {"name": "pre-upgrade-2025-06-01-00-00-00", "created_at": "2025-06-01T00:00:00Z"}
            ])))
            .mount(&server)
            .await;

        let snapshots = client_for(&server).list_snapshots("u-1").await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots.iter().all(|s| s.created_at.is_some()));
    }

    #[tokio::test]
    async fn host_status_checks_connectivity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/host/status"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hostname": "flint-01",
                "hypervisor_version": "libvirt 10.0.0",
                "total_vms": 12,
                "running_vms": 9
            })))
            .expect(1)
            .mount(&server)
            .await;

        let status = client_for(&server).host_status().await.unwrap();
        assert_eq!(status.hostname, "flint-01");
        assert_eq!(status.total_vms, 12);
    }

    #[tokio::test]
    async fn host_status_rejects_bad_token_and_bad_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/host/status"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/host/status"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "bad token"})))
            .mount(&server)
            .await;

        let err = client_for(&server).host_status().await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::Decode(_)));

        let wrong_token = HttpControlPlaneClient::new(format!("{}/api", server.uri()), "other");
        let err = wrong_token.host_status().await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::Api { status: 401, .. }));
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn snapshot_conflict_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/vms/u-1/snapshots"))
            .and(body_json(json!({
                "name": "final-backup-2026-04-10-09-30-00",
                "description": "Final backup before termination"
            })))
            .respond_with(
                ResponseTemplate::new(409).set_body_json(json!({"error": "snapshot exists"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .create_snapshot(
                "u-1",
                "final-backup-2026-04-10-09-30-00",
                "Final backup before termination",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn snapshot_names_are_path_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/vms/u-1/snapshots/weekly%232"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/vms/u-1/snapshots/nightly%3Fa%2Fb"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.delete_snapshot("u-1", "weekly#2").await.unwrap();
        client.delete_snapshot("u-1", "nightly?a/b").await.unwrap();

        let paths: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| r.url.path().to_string())
            .collect();
        assert_eq!(
            paths,
            vec![
                "/api/vms/u-1/snapshots/weekly%232",
                "/api/vms/u-1/snapshots/nightly%3Fa%2Fb"
            ]
        );
    }

    #[tokio::test]
    async fn api_root_without_path_is_rejected() {
        let client = HttpControlPlaneClient::new("mailto:ops@example.com", "t");
        let err = client.list_vms().await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::InvalidUrl(_)));
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn connection_failure_is_transport_error() {
        let client = HttpControlPlaneClient::new("http://127.0.0.1:1", "t");
        let err = client.list_vms().await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::Transport(_)));
        assert!(err.is_retriable());
    }
}
