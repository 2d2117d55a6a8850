//! Webhook notifications
//!
//! Tells dependent services that an image they subscribe to was pushed.
//! Delivery is best-effort: one attempt, bounded by a timeout.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when notifying a subscriber
#[derive(Debug, Error)]
pub enum NotifyError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Subscriber answered with a non-success status
    #[error("subscriber answered with status {status}")]
    Rejected { status: u16 },
}

/// Delivers completion notices to subscribers
#[async_trait]
pub trait WebhookNotifier: Send + Sync {
    /// Notifies `callback_url` that `image_name` was published
    async fn notify(&self, callback_url: &str, image_name: &str) -> Result<(), NotifyError>;
}

/// Notifier sending an empty `PUT` to the callback URL
#[derive(Debug, Clone)]
pub struct HttpWebhookNotifier {
    client: Client,
}

impl HttpWebhookNotifier {
    /// Creates a notifier whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookNotifier for HttpWebhookNotifier {
    async fn notify(&self, callback_url: &str, _image_name: &str) -> Result<(), NotifyError> {
        let response = self.client.put(callback_url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, routing::put};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_notify_success() {
        let base = serve(Router::new().route("/hook", put(|| async { StatusCode::NO_CONTENT }))).await;
        let notifier = HttpWebhookNotifier::new(Duration::from_secs(5)).unwrap();

        let result = notifier.notify(&format!("{}/hook", base), "api").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_notify_non_success_status() {
        let base = serve(Router::new().route(
            "/hook",
            put(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;
        let notifier = HttpWebhookNotifier::new(Duration::from_secs(5)).unwrap();

        let result = notifier.notify(&format!("{}/hook", base), "api").await;
        assert!(matches!(result, Err(NotifyError::Rejected { status: 500 })));
    }

    #[tokio::test]
    async fn test_notify_unreachable() {
        let notifier = HttpWebhookNotifier::new(Duration::from_secs(1)).unwrap();
        let result = notifier.notify("http://127.0.0.1:1/hook", "api").await;
        assert!(matches!(result, Err(NotifyError::RequestFailed(_))));
    }
}
