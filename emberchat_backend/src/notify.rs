use serde::Serialize;

/// Lifecycle events pushed to the external notification endpoint.
#[derive(Debug, Clone, Serialize)]
pub enum NotifyEvent {
    ClientConnected { client_id: String },
    ClientDisconnected { client_id: String },
    FilesCleared { scope: String, deleted: usize },
}

/// Fire-and-forget webhook sink. Delivery runs detached from the triggering
/// operation; failures are logged and never retried or surfaced.
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn new(client: reqwest::Client, webhook_url: Option<String>) -> Self {
        Self {
            client,
            webhook_url,
        }
    }

    /// A sink with no endpoint configured; every notify is a debug-logged
    /// no-op. Used when `EMBERCHAT_NOTIFY_WEBHOOK` is unset and in tests.
    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: None,
        }
    }

    pub fn notify_detached(&self, event: NotifyEvent) {
        let Some(url) = self.webhook_url.clone() else {
            tracing::debug!(event = ?event, "notification sink disabled, dropping event");
            return;
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            let result = client.post(&url).json(&event).send().await;
            match result {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(event = ?event, "notification delivered");
                }
                Ok(response) => {
                    tracing::warn!(
                        event = ?event,
                        status = %response.status(),
                        "notification endpoint rejected event"
                    );
                }
                Err(err) => {
                    tracing::warn!(event = ?event, error = ?err, "failed to deliver notification");
                }
            }
        });
    }
}
