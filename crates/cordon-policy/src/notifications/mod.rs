//! Notification channels for decision requests.
//!
//! Implementations of the engine's [`Notifier`] seam. The webhook channel
//! posts decision requests to an arbitrary HTTP endpoint; the mock channel
//! records them in memory for tests.

mod webhook;

pub use webhook::WebhookNotifier;

use async_trait::async_trait;
use std::sync::Mutex;

use cordon_core::{DecisionRequest, NotificationError, Notifier};

/// In-memory notifier that records every decision request.
///
/// Configurable to fail, for exercising the non-fatal delivery-failure
/// path.
#[derive(Default)]
pub struct MockNotifier {
    requests: Mutex<Vec<DecisionRequest>>,
    failure: Option<String>,
}

impl MockNotifier {
    /// A mock that accepts every request.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock that fails every delivery with the given message.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            failure: Some(message.into()),
        }
    }

    /// Requests received so far, including failed deliveries.
    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().expect("mock lock poisoned").clone()
    }

    /// Number of requests received.
    pub fn sent(&self) -> usize {
        self.requests.lock().expect("mock lock poisoned").len()
    }

    /// Token carried by the most recent request.
    pub fn last_token(&self) -> Option<String> {
        self.requests
            .lock()
            .expect("mock lock poisoned")
            .last()
            .map(|r| r.approval_token.clone())
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    fn name(&self) -> &str {
        "mock"
    }

    async fn notify(&self, request: &DecisionRequest) -> Result<(), NotificationError> {
        self.requests
            .lock()
            .expect("mock lock poisoned")
            .push(request.clone());
        match &self.failure {
            Some(message) => Err(NotificationError::SendFailed(message.clone())),
            None => Ok(()),
        }
    }
}
