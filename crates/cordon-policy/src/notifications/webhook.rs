//! Generic webhook notification channel.
//!
//! Posts decision requests as JSON to an arbitrary HTTP endpoint. The
//! payload carries the approval token so the receiving system can build a
//! decision link back to the approval callback.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, error};

use cordon_core::{DecisionRequest, NotificationError, Notifier};

/// A notifier that sends JSON payloads to a webhook URL.
pub struct WebhookNotifier {
    /// The webhook URL to send decision requests to.
    url: String,
    /// Additional headers to include in the request.
    headers: HashMap<String, String>,
    /// HTTP client for sending requests.
    #[cfg(not(test))]
    client: reqwest::Client,
    /// Payloads captured instead of sent, under test.
    #[cfg(test)]
    sent: std::sync::Mutex<Vec<WebhookPayload>>,
}

/// The JSON body posted to the webhook.
#[derive(Debug, Clone, Serialize)]
struct WebhookPayload {
    incident_id: String,
    severity: String,
    summary: String,
    approval_token: String,
    requested_at: String,
}

impl WebhookNotifier {
    /// Creates a new webhook notifier.
    pub fn new(url: impl Into<String>) -> Result<Self, NotificationError> {
        let url = url.into();
        if url.is_empty() {
            return Err(NotificationError::InvalidConfig(
                "webhook URL cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            url,
            headers: HashMap::new(),
            #[cfg(not(test))]
            client: reqwest::Client::new(),
            #[cfg(test)]
            sent: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Adds a header to be included in webhook requests.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Adds an authorization header with a bearer token.
    pub fn with_bearer_token(self, token: impl Into<String>) -> Self {
        self.with_header("Authorization", format!("Bearer {}", token.into()))
    }

    fn create_payload(&self, request: &DecisionRequest) -> WebhookPayload {
        WebhookPayload {
            incident_id: request.incident_id.to_string(),
            severity: request.severity.to_string(),
            summary: request.summary.clone(),
            approval_token: request.approval_token.clone(),
            requested_at: request.requested_at.to_rfc3339(),
        }
    }

    /// Sends the payload to the webhook URL (actual HTTP call).
    #[cfg(not(test))]
    async fn send_to_webhook(&self, payload: &WebhookPayload) -> Result<(), NotificationError> {
        let mut request = self.client.post(&self.url).json(payload);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotificationError::SendFailed(format!("HTTP request failed: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(NotificationError::RateLimited(
                "webhook rate limit exceeded".to_string(),
            ))
        } else {
            Err(NotificationError::SendFailed(format!(
                "webhook returned status {}",
                response.status()
            )))
        }
    }

    /// Captures the payload instead of sending it, under test.
    #[cfg(test)]
    async fn send_to_webhook(&self, payload: &WebhookPayload) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .expect("webhook test lock poisoned")
            .push(payload.clone());
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, request: &DecisionRequest) -> Result<(), NotificationError> {
        let payload = self.create_payload(request);
        debug!(
            incident_id = %request.incident_id,
            url = %self.url,
            "posting decision request to webhook"
        );

        if let Err(e) = self.send_to_webhook(&payload).await {
            error!(
                incident_id = %request.incident_id,
                url = %self.url,
                error = %e,
                "webhook delivery failed"
            );
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cordon_core::Severity;
    use uuid::Uuid;

    fn request() -> DecisionRequest {
        DecisionRequest {
            incident_id: Uuid::new_v4(),
            severity: Severity::Critical,
            summary: "quarantine 10.0.0.50".to_string(),
            approval_token: "tok".to_string(),
            requested_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_url_is_invalid() {
        assert!(matches!(
            WebhookNotifier::new(""),
            Err(NotificationError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_payload_carries_the_token() {
        let notifier = WebhookNotifier::new("https://hooks.example.com/cordon").unwrap();
        let request = request();
        notifier.notify(&request).await.unwrap();

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].approval_token, "tok");
        assert_eq!(sent[0].severity, "critical");
        assert_eq!(sent[0].incident_id, request.incident_id.to_string());
    }

    #[test]
    fn test_builder_headers() {
        let notifier = WebhookNotifier::new("https://hooks.example.com/cordon")
            .unwrap()
            .with_bearer_token("secret")
            .with_header("X-Env", "staging");
        assert_eq!(
            notifier.headers.get("Authorization"),
            Some(&"Bearer secret".to_string())
        );
        assert_eq!(notifier.headers.get("X-Env"), Some(&"staging".to_string()));
    }
}
