//! Webhook delivery.
//!
//! A single best-effort POST per record. There is no retry: a failed
//! delivery is reported as `DispatchFailed` and the archived document stays
//! where it is.

use crate::error::{DispatchStage, IntakeError, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Receives JSON payloads.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    /// Deliver `payload` and return the receiver's reply.
    ///
    /// A reply that is not JSON comes back as a JSON string.
    async fn post(&self, payload: &Value) -> Result<Value>;
}

/// [`WebhookSink`] POSTing JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpWebhook {
    client: reqwest::Client,
    url: String,
}

impl HttpWebhook {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl WebhookSink for HttpWebhook {
    async fn post(&self, payload: &Value) -> Result<Value> {
        let failed = |detail: String| IntakeError::DispatchFailed {
            stage: DispatchStage::Webhook,
            detail,
        };

        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| failed(format!("{}: {}", self.url, e)))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| failed(format!("{}: unreadable reply: {}", self.url, e)))?;

        debug!("Webhook {} answered {} ({} bytes)", self.url, status, body.len());
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn url_is_kept_verbatim() {
        let hook = HttpWebhook::new("http://jobs.internal/hooks/intake?src=wo");
        assert_eq!(hook.url(), "http://jobs.internal/hooks/intake?src=wo");
    }

    #[tokio::test]
    async fn unreachable_receiver_names_the_url() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        drop(listener);

        let hook = HttpWebhook::new(url.clone());
        let err = hook.post(&json!({ "job": 1 })).await.unwrap_err();
        assert!(
            matches!(
                err,
                IntakeError::DispatchFailed {
                    stage: DispatchStage::Webhook,
                    ..
                }
            ),
            "{err}"
        );
        assert!(err.to_string().contains(hook.url()), "{err}");
    }
}
