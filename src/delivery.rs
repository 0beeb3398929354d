//! Webhook delivery of conversion results.
//!
//! Artifacts are posted as `multipart/form-data`: a `job_id` field, a
//! `metadata` field holding the JSON-serialized [`ConversionOutput`], and one
//! `file` part per artifact.

use std::time::Duration;

use mf_core::config::DeliveryConfig;
use mf_core::ConversionOutput;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed to encode metadata: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DeliveryError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Encode(_) => false,
        }
    }
}

/// Outcome of a successful delivery.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReceipt {
    pub status: u16,
    pub attempts: u32,
}

/// Posts conversion outputs to a caller-supplied URL.
pub struct WebhookDelivery {
    client: Client,
    max_attempts: u32,
    backoff: Duration,
}

impl WebhookDelivery {
    pub fn new(config: &DeliveryConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client: {}", e);
                Client::new()
            });

        Self {
            client,
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(500),
        }
    }

    /// Base delay between attempts; doubled after each failure.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn deliver(
        &self,
        url: &str,
        output: &ConversionOutput,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let metadata = serde_json::to_string(output)?;
        let mut delay = self.backoff;
        let mut attempt = 1;

        loop {
            match self.post(url, output, &metadata).await {
                Ok(status) => {
                    tracing::info!(
                        job_id = %output.job_id,
                        "Delivered {} artifacts to {} ({})",
                        output.artifacts.len(),
                        url,
                        status
                    );
                    return Ok(DeliveryReceipt {
                        status: status.as_u16(),
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    tracing::warn!(
                        job_id = %output.job_id,
                        "Delivery attempt {} failed: {}; retrying in {:?}",
                        attempt,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(job_id = %output.job_id, "Delivery failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    async fn post(
        &self,
        url: &str,
        output: &ConversionOutput,
        metadata: &str,
    ) -> Result<StatusCode, DeliveryError> {
        let mut form = Form::new()
            .text("job_id", output.job_id.to_string())
            .text("metadata", metadata.to_string());
        for artifact in &output.artifacts {
            let part = Part::bytes(artifact.content.to_vec())
                .file_name(artifact.name.clone())
                .mime_str(artifact.format.mime())?;
            form = form.part("file", part);
        }

        let response = self.client.post(url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Status { status, body });
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses() {
        let status = |code: u16| DeliveryError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            body: String::new(),
        };
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(404).is_transient());
    }

    #[test]
    fn at_least_one_attempt() {
        let delivery = WebhookDelivery::new(&DeliveryConfig {
            timeout_secs: 5,
            max_attempts: 0,
        });
        assert_eq!(delivery.max_attempts, 1);
    }
}
