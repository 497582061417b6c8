//! Destinations for status reports.

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::report::{StatusMethod, StatusReport};
use crate::context::Credential;
use crate::engine::EngineConfig;
use crate::error::ReportingError;

/// Receives the final status report of a run.
///
/// Sinks are shared between runs and must not keep per-run state.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn send(&self, report: &StatusReport, credential: &Credential) -> Result<(), ReportingError>;
}

/// Sends reports to the ingest API. Never retries.
#[derive(Debug, Clone)]
pub struct HttpStatusSink {
    client: Client,
    url: String,
    method: StatusMethod,
}

impl HttpStatusSink {
    pub fn new(config: &EngineConfig) -> Result<Self, ReportingError> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self {
            client,
            url: config.api_url(&config.status_endpoint),
            method: config.status_method,
        })
    }
}

#[async_trait]
impl StatusSink for HttpStatusSink {
    async fn send(&self, report: &StatusReport, credential: &Credential) -> Result<(), ReportingError> {
        debug!(
            url = %self.url,
            method = ?self.method,
            authorization = %format!("Bearer {}", credential),
            content_type = "application/json",
            "Sending status report"
        );

        let request = match self.method {
            StatusMethod::Put => self.client.put(&self.url),
            StatusMethod::Post => self.client.post(&self.url),
        };
        let response = request
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", credential.expose()))
            .json(report)
            .send()
            .await?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read response".to_string());
        if !status.is_success() {
            return Err(ReportingError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(
            dataset_id = %report.dataset_id,
            status = %report.status,
            "Status report accepted"
        );
        debug!(response = %body, "Status endpoint response");
        Ok(())
    }
}

/// Keeps reports in memory; used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<StatusReport>>,
    reject_with: Option<u16>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that records nothing and rejects every report with `status`.
    pub fn rejecting(status: u16) -> Self {
        Self {
            reports: Mutex::new(Vec::new()),
            reject_with: Some(status),
        }
    }

    pub async fn reports(&self) -> Vec<StatusReport> {
        self.reports.lock().await.clone()
    }
}

#[async_trait]
impl StatusSink for MemorySink {
    async fn send(&self, report: &StatusReport, _credential: &Credential) -> Result<(), ReportingError> {
        if let Some(status) = self.reject_with {
            return Err(ReportingError::Rejected {
                status,
                body: "rejected by memory sink".to_string(),
            });
        }
        info!(dataset_id = %report.dataset_id, status = %report.status, "Status report recorded");
        self.reports.lock().await.push(report.clone());
        Ok(())
    }
}
