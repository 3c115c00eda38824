//! Billing ledger interface.
//!
//! The lifecycle engine never owns invoices. It only asks how many unpaid
//! invoices a service has with a due date before some instant.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use vps_lifecycle_core::{InvoiceId, ServiceId};

use crate::error::{LifecycleError, Result};

/// Read access to a service's invoices.
#[async_trait]
pub trait BillingLedger: Send + Sync {
    /// Count unpaid invoices of `service_id` due strictly before `due_before`,
    /// ignoring `exclude` if given.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::Billing` if the ledger cannot be queried.
    async fn count_unpaid_due_before(
        &self,
        service_id: ServiceId,
        due_before: DateTime<Utc>,
        exclude: Option<InvoiceId>,
    ) -> Result<u64>;
}

/// HTTP adapter for the billing platform's invoice API.
#[derive(Debug, Clone)]
pub struct HttpBillingLedger {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBillingLedger {
    /// Create a new billing client.
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

    /// Get the base URL of the billing API.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[async_trait]
impl BillingLedger for HttpBillingLedger {
    async fn count_unpaid_due_before(
        &self,
        service_id: ServiceId,
        due_before: DateTime<Utc>,
        exclude: Option<InvoiceId>,
    ) -> Result<u64> {
        let url = format!(
            "{}/services/{service_id}/invoices/unpaid-count",
            self.base_url
        );

        let mut query = vec![(
            "dueBefore",
            due_before.to_rfc3339_opts(SecondsFormat::Secs, true),
        )];
        if let Some(invoice_id) = exclude {
            query.push(("exclude", invoice_id.to_string()));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| LifecycleError::Billing(format!("Billing request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(LifecycleError::Billing(format!(
                "Billing returned status {}",
                response.status()
            )));
        }

        response
            .json::<CountResponse>()
            .await
            .map(|r| r.count)
            .map_err(|e| LifecycleError::Billing(format!("Failed to parse response: {e}")))
    }
}

/// An invoice held by [`MemoryBillingLedger`].
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone)]
struct MemoryInvoice {
    invoice_id: InvoiceId,
    service_id: ServiceId,
    due_at: DateTime<Utc>,
    paid: bool,
}

/// An in-memory ledger for tests.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct MemoryBillingLedger {
    invoices: parking_lot::Mutex<Vec<MemoryInvoice>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MemoryBillingLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an unpaid invoice.
    pub fn add_unpaid(&self, service_id: ServiceId, invoice_id: InvoiceId, due_at: DateTime<Utc>) {
        self.invoices.lock().push(MemoryInvoice {
            invoice_id,
            service_id,
            due_at,
            paid: false,
        });
    }

    /// Mark an invoice paid.
    pub fn mark_paid(&self, invoice_id: InvoiceId) {
        for invoice in self
            .invoices
            .lock()
            .iter_mut()
            .filter(|i| i.invoice_id == invoice_id)
        {
            invoice.paid = true;
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl BillingLedger for MemoryBillingLedger {
    async fn count_unpaid_due_before(
        &self,
        service_id: ServiceId,
        due_before: DateTime<Utc>,
        exclude: Option<InvoiceId>,
    ) -> Result<u64> {
        let count = self
            .invoices
            .lock()
            .iter()
            .filter(|i| i.service_id == service_id && !i.paid && i.due_at < due_before)
            .filter(|i| Some(i.invoice_id) != exclude)
            .count();
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn http_ledger_sends_cutoff_and_exclusion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/4/invoices/unpaid-count"))
            .and(query_param("dueBefore", "2026-02-01T00:00:00Z"))
            .and(query_param("exclude", "9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"count": 2})))
            .expect(1)
            .mount(&server)
            .await;

        let ledger = HttpBillingLedger::new(server.uri());
        let cutoff = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let count = ledger
            .count_unpaid_due_before(ServiceId::new(4), cutoff, Some(InvoiceId::new(9)))
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn http_ledger_maps_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let ledger = HttpBillingLedger::new(server.uri());
        let err = ledger
            .count_unpaid_due_before(ServiceId::new(4), Utc::now(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Billing(_)));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn memory_ledger_counts_overdue_unpaid() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let ledger = MemoryBillingLedger::new();
        let service = ServiceId::new(1);
        ledger.add_unpaid(service, InvoiceId::new(10), now - chrono::Duration::days(20));
        ledger.add_unpaid(service, InvoiceId::new(11), now - chrono::Duration::days(2));
        ledger.add_unpaid(service, InvoiceId::new(12), now + chrono::Duration::days(5));
        ledger.add_unpaid(ServiceId::new(2), InvoiceId::new(13), now - chrono::Duration::days(30));

        assert_eq!(ledger.count_unpaid_due_before(service, now, None).await.unwrap(), 2);
        assert_eq!(
            ledger
                .count_unpaid_due_before(service, now - chrono::Duration::days(14), None)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            ledger
                .count_unpaid_due_before(service, now, Some(InvoiceId::new(10)))
                .await
                .unwrap(),
            1
        );

        ledger.mark_paid(InvoiceId::new(11));
        assert_eq!(ledger.count_unpaid_due_before(service, now, None).await.unwrap(), 1);
    }
}
