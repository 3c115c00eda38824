//! Owner notifications.
//!
//! Jobs tell the owning user about suspensions, reactivations, terminations
//! and terminal failures. Delivery is fire-and-forget: [`dispatch`] logs
//! failures and never returns them, so a broken notifier cannot fail a job.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vps_lifecycle_core::{ServiceId, UserId};

use crate::error::{LifecycleError, Result};

/// Notification severity, as shown in the customer portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Info,
    /// Something good happened.
    Success,
    /// Action may be needed.
    Warning,
    /// Something was lost or failed.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// A message for the owner of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Recipient.
    pub user_id: UserId,
    /// Service the message is about.
    pub service_id: ServiceId,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Severity.
    #[serde(rename = "type")]
    pub severity: Severity,
    /// Link to the service page.
    pub action_url: String,
}

/// Delivery channel for owner notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Record an in-portal notification.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::Notification` if delivery fails.
    async fn notify(&self, notification: &Notification) -> Result<()>;

    /// Email the same payload to the owner.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::Notification` if delivery fails.
    async fn email(&self, notification: &Notification) -> Result<()>;
}

/// Send a notification and its email, logging failures instead of returning them.
pub async fn dispatch(notifier: &dyn Notifier, notification: &Notification) {
    if let Err(e) = notifier.notify(notification).await {
        tracing::warn!(
            service_id = %notification.service_id,
            title = %notification.title,
            error = %e,
            "Failed to record notification"
        );
    }
    if let Err(e) = notifier.email(notification).await {
        tracing::warn!(
            service_id = %notification.service_id,
            title = %notification.title,
            error = %e,
            "Failed to send notification email"
        );
    }
}

/// A notifier that only writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        tracing::info!(
            user_id = %notification.user_id,
            service_id = %notification.service_id,
            severity = %notification.severity,
            title = %notification.title,
            "Notification"
        );
        Ok(())
    }

    async fn email(&self, notification: &Notification) -> Result<()> {
        tracing::debug!(
            user_id = %notification.user_id,
            title = %notification.title,
            "Email skipped, no notification endpoint configured"
        );
        Ok(())
    }
}

/// Posts notifications to the billing platform's webhook endpoints.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    base_url: String,
}

impl WebhookNotifier {
    /// Create a new webhook notifier.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, path: &str, notification: &Notification) -> Result<()> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(notification)
            .send()
            .await
            .map_err(|e| LifecycleError::Notification(format!("Webhook request failed: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LifecycleError::Notification(format!(
                "Webhook returned status {}",
                response.status()
            )))
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.post("/notifications", notification).await
    }

    async fn email(&self, notification: &Notification) -> Result<()> {
        self.post("/emails", notification).await
    }
}

/// A notifier that keeps everything it is given, for tests.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: parking_lot::Mutex<Vec<Notification>>,
    emails: parking_lot::Mutex<Vec<Notification>>,
    fail: std::sync::atomic::AtomicBool,
}

#[cfg(any(test, feature = "test-utils"))]
impl RecordingNotifier {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery fail from now on.
    pub fn fail_all(&self) {
        self.fail.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Notifications recorded so far.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    /// Emails sent so far.
    #[must_use]
    pub fn emails(&self) -> Vec<Notification> {
        self.emails.lock().clone()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            Err(LifecycleError::Notification("recorder set to fail".to_string()))
        } else {
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.check()?;
        self.notifications.lock().push(notification.clone());
        Ok(())
    }

    async fn email(&self, notification: &Notification) -> Result<()> {
        self.check()?;
        self.emails.lock().push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample() -> Notification {
        Notification {
            user_id: UserId::new(2),
            service_id: ServiceId::new(1),
            title: "VPS Service Suspended".to_string(),
            message: "suspended".to_string(),
            severity: Severity::Warning,
            action_url: "/services/1".to_string(),
        }
    }

    #[tokio::test]
    async fn webhook_posts_both_channels() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notifications"))
            .and(body_partial_json(serde_json::json!({
                "userId": 2,
                "type": "warning",
                "actionUrl": "/services/1"
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri());
        dispatch(&notifier, &sample()).await;
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let notifier = RecordingNotifier::new();
        notifier.fail_all();
        dispatch(&notifier, &sample()).await;
        assert!(notifier.notifications().is_empty());

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let webhook = WebhookNotifier::new(server.uri());
        assert!(webhook.notify(&sample()).await.is_err());
        dispatch(&webhook, &sample()).await;
    }

    #[tokio::test]
    async fn recorder_keeps_both_channels() {
        let notifier = RecordingNotifier::new();
        dispatch(&notifier, &sample()).await;
        assert_eq!(notifier.notifications(), vec![sample()]);
        assert_eq!(notifier.emails().len(), 1);
    }
}
